//! The volume model: cluster bitmap/free-region index plus the file-entry
//! arena, and the queries the planner and mover need (spec §4.2).
use crate::config::JobOptions;
use crate::error::{CoreError, Result};
use crate::host::{BitmapChunk, Volume};
use crate::model::entities::{Extent, FileEntry, FileId, Stream, StreamId};
use crate::model::free_list::{FreeList, FreeRegion};
use crate::model::progress::{ClusterColor, ClusterMap};
use crate::types::{ClusterCount, Lcn, MftIndex, Vcn};
use std::collections::HashMap;

/// Owns every [`FileEntry`], [`Stream`] and [`Extent`] produced by a scan,
/// plus the free-region index derived from the volume bitmap.
///
/// Spec §9 calls for "a pair of arrays — streams and extents — indexed by
/// integer IDs" in place of the original's pointer graphs; `files` follows
/// the same shape so the whole model is one flat, serializable structure,
/// mirroring the arena the teacher uses for its own file tree
/// (`model/file_tree.rs`).
pub struct VolumeModel {
    pub bytes_per_cluster: u32,
    pub bytes_per_sector: u16,
    pub total_clusters: u64,

    pub files: Vec<FileEntry>,
    pub streams: Vec<Stream>,
    by_mft_index: HashMap<MftIndex, FileId>,

    pub free_list: FreeList,
    /// A single reserved `(start, length)` LCN range the filesystem set
    /// aside for `$MFT` growth (SPEC_FULL.md Open Question resolution for
    /// "MFT zone" — spec §9 notes the rule is not authoritative upstream
    /// either).
    pub mft_zone: Option<(Lcn, ClusterCount)>,
    /// `(major, minor)` read from `$Volume`'s `VOLUME_INFORMATION` attribute.
    pub ntfs_version: Option<(u8, u8)>,
    /// Dirty-volume bit from the same attribute (spec §4.1 pre-flight check;
    /// `ErrorCode::DirtyVolume`).
    pub volume_dirty: bool,
}

impl VolumeModel {
    pub fn new(bytes_per_cluster: u32, bytes_per_sector: u16, total_clusters: u64) -> Self {
        Self {
            bytes_per_cluster,
            bytes_per_sector,
            total_clusters,
            files: Vec::new(),
            streams: Vec::new(),
            by_mft_index: HashMap::new(),
            free_list: FreeList::new(),
            mft_zone: None,
            ntfs_version: None,
            volume_dirty: false,
        }
    }

    /// Read the whole bitmap through the host in chunks and derive the
    /// free-region list by scanning for maximal zero-runs (spec §4.2
    /// "Bitmap").
    pub fn load_bitmap(&mut self, volume: &dyn Volume) -> Result<()> {
        let mut regions = Vec::new();
        let mut run_start: Option<u64> = None;
        let mut lcn: u64 = 0;
        let mut next_start = Some(Lcn(0));

        while let Some(start) = next_start {
            let BitmapChunk { bits, next_start: ns } = volume
                .volume_bitmap(start)
                .map_err(|e| CoreError::HostIo(e.0))?;
            if bits.is_empty() && ns.is_none() {
                break;
            }
            for byte in &bits {
                for bit in 0..8u8 {
                    if lcn >= self.total_clusters {
                        break;
                    }
                    let allocated = (byte >> bit) & 1 == 1;
                    match (allocated, run_start) {
                        (false, None) => run_start = Some(lcn),
                        (true, Some(s)) => {
                            regions.push(FreeRegion { lcn: Lcn(s), length: ClusterCount(lcn - s) });
                            run_start = None;
                        }
                        _ => {}
                    }
                    lcn += 1;
                }
            }
            next_start = ns;
        }
        if let Some(s) = run_start {
            regions.push(FreeRegion { lcn: Lcn(s), length: ClusterCount(lcn - s) });
        }

        self.free_list = FreeList::from_regions(regions);
        Ok(())
    }

    pub fn add_file(&mut self, entry: FileEntry) -> FileId {
        let id = FileId(self.files.len() as u32);
        self.by_mft_index.insert(entry.mft_index, id);
        self.files.push(entry);
        id
    }

    pub fn file_by_mft_index(&self, index: MftIndex) -> Option<FileId> {
        self.by_mft_index.get(&index).copied()
    }

    pub fn add_stream(&mut self, stream: Stream) -> StreamId {
        let owner = stream.owner;
        let id = StreamId(self.streams.len() as u32);
        self.streams.push(stream);
        self.files[owner.0 as usize].streams.push(id);
        id
    }

    pub fn file(&self, id: FileId) -> &FileEntry {
        &self.files[id.0 as usize]
    }

    pub fn file_mut(&mut self, id: FileId) -> &mut FileEntry {
        &mut self.files[id.0 as usize]
    }

    pub fn stream(&self, id: StreamId) -> &Stream {
        &self.streams[id.0 as usize]
    }

    pub fn stream_mut(&mut self, id: StreamId) -> &mut Stream {
        &mut self.streams[id.0 as usize]
    }

    /// Assemble each file entry's absolute path by walking parent indices
    /// up to the root (spec §4.1 "Path assembly"). `files` is already
    /// indexed by `by_mft_index` so parent lookup is O(1) rather than the
    /// sorted-array binary search the original needs — the fallback for
    /// "allocation fails" described there does not apply to a `HashMap`.
    /// Cycles break assembly for the offending entry, which falls back to
    /// its bare name.
    pub fn assemble_paths(&mut self, drive_root: &str) {
        let indices: Vec<FileId> = (0..self.files.len() as u32).map(FileId).collect();
        for id in indices {
            let path = self.assemble_one_path(id, drive_root);
            self.files[id.0 as usize].path = Some(path.into());
        }
    }

    fn assemble_one_path(&self, id: FileId, drive_root: &str) -> String {
        let mut components = Vec::new();
        let mut current = id;
        let mut seen = std::collections::HashSet::new();

        loop {
            if !seen.insert(current) {
                // Cycle detected: fall back to the bare name.
                return format!("{drive_root}{}", self.file(id).name);
            }
            let entry = self.file(current);
            if entry.mft_index == MftIndex::ROOT {
                break;
            }
            components.push(entry.name.clone());
            match self.file_by_mft_index(entry.parent_index) {
                Some(parent) if parent != current => current = parent,
                _ => break,
            }
        }

        let mut path = drive_root.to_string();
        for component in components.iter().rev() {
            if !path.ends_with('\\') {
                path.push('\\');
            }
            path.push_str(component);
        }
        path
    }

    /// Build the fixed-size cluster-state map (spec §4.2 "Cell coloring").
    pub fn cluster_map(&self, cells: usize) -> ClusterMap {
        let mut map = ClusterMap::new(1, cells, self.total_clusters);

        for region in self.free_list.iter() {
            map.paint_range(region.lcn, region.length.0, ClusterColor::Free);
        }
        if let Some((lcn, len)) = self.mft_zone {
            map.paint_range(lcn, len.0, ClusterColor::MftZone);
        }

        for file in &self.files {
            let file_color = if file.mft_index == MftIndex::MFT || file.mft_index == MftIndex::MFT_MIRROR {
                ClusterColor::Mft
            } else if file.is_system() {
                ClusterColor::System
            } else if file.is_directory() {
                ClusterColor::Directory
            } else {
                ClusterColor::Unfragmented
            };

            for &stream_id in &file.streams {
                let stream = self.stream(stream_id);
                let color = if stream.flags.contains(crate::model::entities::StreamFlags::COMPRESSED) {
                    ClusterColor::Compressed
                } else if stream.is_fragmented() {
                    ClusterColor::Fragmented
                } else {
                    file_color
                };
                for extent in &stream.extents {
                    if !extent.is_sparse() {
                        map.paint_range(extent.lcn, extent.length.0, color);
                    }
                }
            }
        }

        map
    }

    /// `sum(free) + sum(physical extents) == total_clusters` (spec §8
    /// quiescent invariant). Exposed for tests and for the mover's
    /// post-move consistency check.
    pub fn check_cluster_accounting(&self) -> bool {
        let free: u64 = self.free_list.total_free();
        let used: u64 = self
            .streams
            .iter()
            .map(|s| s.cluster_count().0)
            .sum();
        free + used == self.total_clusters
    }

    /// Filters a stream for movability per spec §4.3 "Inclusion/exclusion
    /// filters": not a system file, no unmovable-reparse flag, not an
    /// in-use system stream.
    pub fn is_movable(&self, stream_id: StreamId, options: &JobOptions) -> bool {
        let stream = self.stream(stream_id);
        let file = self.file(stream.owner);

        if file.is_system() || file.is_reparse_point() {
            return false;
        }
        // $LogFile, $Bitmap and the MFT mirror are in-use system streams
        // even though their MFT index (>= 16 in theory never applies here
        // since these are always < 16) — guarded defensively by index too.
        if matches!(
            file.mft_index,
            MftIndex::LOG_FILE | MftIndex::BITMAP | MftIndex::MFT_MIRROR
        ) {
            return false;
        }

        if let Some(path) = &file.path {
            if !options.include_patterns.is_empty()
                && !options.include_patterns.iter().any(|p| p.matches(path))
            {
                return false;
            }
            if options.exclude_patterns.iter().any(|p| p.matches(path)) {
                return false;
            }
        }

        if let Some(max_size) = options.file_size_threshold {
            let size = stream.cluster_count().0 * self.bytes_per_cluster as u64;
            if size > max_size {
                return false;
            }
        }
        if let Some(min_fragments) = options.fragments_threshold {
            if stream.fragment_count() < min_fragments {
                return false;
            }
        }

        true
    }

    /// Extents of `stream_id` that cover `[start_vcn, start_vcn+count)`,
    /// used by the mover to find the runs a move touches (spec §4.4 step 4).
    pub fn extents_covering(
        &self,
        stream_id: StreamId,
        start_vcn: Vcn,
        count: ClusterCount,
    ) -> Vec<(usize, Extent)> {
        let end = start_vcn.0 + count.0;
        self.stream(stream_id)
            .extents
            .iter()
            .enumerate()
            .filter(|(_, e)| e.vcn.0 < end && e.vcn_end().0 > start_vcn.0)
            .map(|(i, e)| (i, *e))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entities::FileFlags;
    use compact_str::CompactString;

    fn root_and_child() -> VolumeModel {
        let mut model = VolumeModel::new(4096, 512, 1000);
        let root = FileEntry {
            mft_index: MftIndex::ROOT,
            parent_index: MftIndex::ROOT,
            flags: FileFlags::DIRECTORY,
            name: CompactString::new(""),
            path: None,
            streams: Vec::new(),
            created: 0,
            modified: 0,
            accessed: 0,
        };
        model.add_file(root);
        let child = FileEntry {
            mft_index: MftIndex(20),
            parent_index: MftIndex::ROOT,
            flags: FileFlags::empty(),
            name: CompactString::new("a.txt"),
            path: None,
            streams: Vec::new(),
            created: 0,
            modified: 0,
            accessed: 0,
        };
        model.add_file(child);
        model
    }

    #[test]
    fn assemble_paths_walks_to_root() {
        let mut model = root_and_child();
        model.assemble_paths("C:\\");
        assert_eq!(model.file(FileId(1)).path.as_deref(), Some("C:\\a.txt"));
    }

    #[test]
    fn assemble_paths_breaks_cycle() {
        let mut model = VolumeModel::new(4096, 512, 1000);
        let a = model.add_file(FileEntry {
            mft_index: MftIndex(20),
            parent_index: MftIndex(21),
            flags: FileFlags::empty(),
            name: CompactString::new("a"),
            path: None,
            streams: Vec::new(),
            created: 0,
            modified: 0,
            accessed: 0,
        });
        model.add_file(FileEntry {
            mft_index: MftIndex(21),
            parent_index: MftIndex(20),
            flags: FileFlags::empty(),
            name: CompactString::new("b"),
            path: None,
            streams: Vec::new(),
            created: 0,
            modified: 0,
            accessed: 0,
        });
        model.assemble_paths("C:\\");
        // Falls back to bare name rather than looping forever.
        assert_eq!(model.file(a).path.as_deref(), Some("C:\\a"));
    }

    #[test]
    fn cluster_accounting_balances_for_empty_model() {
        let mut model = VolumeModel::new(4096, 512, 100);
        model.free_list = FreeList::from_regions(vec![FreeRegion { lcn: Lcn(0), length: ClusterCount(100) }]);
        assert!(model.check_cluster_accounting());
    }
}
