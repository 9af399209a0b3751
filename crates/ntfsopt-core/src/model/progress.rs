//! The progress snapshot and cluster-state map exported to the host's
//! [`crate::host::ProgressSink`] (spec §3 "Progress record", §6
//! "Cluster-state map" / "Progress record" bit-exact tables).
use crate::types::Lcn;
use serde::Serialize;

/// `current_operation` (spec §6 progress record table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum Operation {
    Analyze = 0,
    Defrag = 1,
    Optimize = 2,
}

/// The sixteen-name, ten-priority color classes a cluster-map cell can take
/// (spec §3 "Progress record", §4.2 "Cell coloring"). Ordered low to high
/// priority so that `Ord` doubles as the collision rule: `max()` wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u8)]
pub enum ClusterColor {
    Unused = 0,
    Free = 1,
    System = 2,
    Fragmented = 3,
    Unfragmented = 4,
    Directory = 5,
    Compressed = 6,
    MftZone = 7,
    Mft = 8,
    TemporarySystem = 9,
}

/// A fixed-length, row-major grid of [`ClusterColor`]s summarizing the
/// whole volume (spec §6 "Cluster-state map (bit-exact)").
#[derive(Debug, Clone, Serialize)]
pub struct ClusterMap {
    rows: usize,
    cols: usize,
    total_clusters: u64,
    cells: Vec<ClusterColor>,
}

impl ClusterMap {
    /// `bucket := ceil(total_clusters / (rows*cols))` clusters per cell,
    /// all cells initialized `Unused` and then painted by the caller.
    pub fn new(rows: usize, cols: usize, total_clusters: u64) -> Self {
        let n = (rows * cols).max(1);
        Self {
            rows,
            cols,
            total_clusters,
            cells: vec![ClusterColor::Unused; n],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    fn bucket_size(&self) -> u64 {
        let n = (self.rows * self.cols).max(1) as u64;
        self.total_clusters.div_ceil(n)
    }

    /// Paint every cell touched by `[lcn, lcn+length)` with `color`,
    /// keeping the higher-priority color on collision (spec §4.2 step 3).
    pub fn paint_range(&mut self, lcn: Lcn, length: u64, color: ClusterColor) {
        if length == 0 {
            return;
        }
        let bucket = self.bucket_size();
        if bucket == 0 {
            return;
        }
        let start = lcn.0 / bucket;
        let end = (lcn.0 + length - 1) / bucket;
        for idx in start..=end {
            if let Some(cell) = self.cells.get_mut(idx as usize) {
                if color > *cell {
                    *cell = color;
                }
            }
        }
    }

    pub fn cells(&self) -> &[ClusterColor] {
        &self.cells
    }

    /// Cell `(r, c)`'s color, for tests and for rendering the map into a
    /// flat byte buffer at the host boundary.
    pub fn get(&self, r: usize, c: usize) -> Option<ClusterColor> {
        self.cells.get(r * self.cols + c).copied()
    }
}

/// A snapshot exported to the progress sink (spec §6 "Progress record
/// (bit-exact)").
#[derive(Debug, Clone, Serialize)]
pub struct ProgressRecord {
    pub current_operation: Operation,
    pub pass_number: u32,
    pub files: u32,
    pub directories: u32,
    pub compressed: u32,
    pub fragmented: u32,
    pub fragments: u64,
    pub total_space: u64,
    pub free_space: u64,
    pub mft_size: u64,
    pub clusters_to_process: u64,
    pub processed_clusters: u64,
    pub moved_clusters: u64,
    pub total_moves: u64,
    pub percentage: f64,
    /// `0` running, `>0` done, `<0` failed (carries [`crate::error::ErrorCode`]
    /// on failure).
    pub completion_status: i32,
    pub cluster_map: ClusterMap,
}

impl ProgressRecord {
    pub fn new(current_operation: Operation, cluster_map: ClusterMap) -> Self {
        Self {
            current_operation,
            pass_number: 1,
            files: 0,
            directories: 0,
            compressed: 0,
            fragmented: 0,
            fragments: 0,
            total_space: 0,
            free_space: 0,
            mft_size: 0,
            clusters_to_process: 0,
            processed_clusters: 0,
            moved_clusters: 0,
            total_moves: 0,
            percentage: 0.0,
            completion_status: 0,
            cluster_map,
        }
    }

    /// Render this snapshot as JSON, for a host that wants to pipe progress
    /// somewhere other than a terminal (teacher's own `model/size.rs`
    /// export pattern, applied to the progress record instead of a tree
    /// summary).
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_color_wins_on_collision() {
        let mut map = ClusterMap::new(1, 4, 400);
        map.paint_range(Lcn(0), 100, ClusterColor::Free);
        map.paint_range(Lcn(0), 100, ClusterColor::Mft);
        map.paint_range(Lcn(0), 100, ClusterColor::System);
        assert_eq!(map.get(0, 0), Some(ClusterColor::Mft));
    }

    #[test]
    fn last_cell_absorbs_remainder() {
        // 10 clusters over 3 cells -> bucket = ceil(10/3) = 4, so cells
        // cover [0,4) [4,8) [8,12) — the third absorbs the short remainder.
        let map = ClusterMap::new(1, 3, 10);
        assert_eq!(map.cells().len(), 3);
    }

    #[test]
    fn unpainted_cells_default_unused() {
        let map = ClusterMap::new(1, 5, 500);
        assert!(map.cells().iter().all(|c| *c == ClusterColor::Unused));
    }

    #[test]
    fn color_priority_ordering_matches_spec() {
        assert!(ClusterColor::Free > ClusterColor::Unused);
        assert!(ClusterColor::System > ClusterColor::Free);
        assert!(ClusterColor::Fragmented > ClusterColor::System);
        assert!(ClusterColor::Unfragmented > ClusterColor::Fragmented);
        assert!(ClusterColor::Directory > ClusterColor::Unfragmented);
        assert!(ClusterColor::Compressed > ClusterColor::Directory);
        assert!(ClusterColor::MftZone > ClusterColor::Compressed);
        assert!(ClusterColor::Mft > ClusterColor::MftZone);
        assert!(ClusterColor::TemporarySystem > ClusterColor::Mft);
    }
}
