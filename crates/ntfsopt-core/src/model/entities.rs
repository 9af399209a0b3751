//! Arena-addressed entities: extents, streams and file entries (spec §3).
//!
//! Spec §9 flags the original's raw pointer graphs in runlists (linked
//! lists threaded with `prev`/`next`) for re-architecture: here extents and
//! streams live in flat `Vec`s on [`super::volume_model::VolumeModel`],
//! addressed by the `u32` newtypes below, the same arena-by-index shape
//! the teacher uses for `FileNode`/`NodeIndex` in `model/file_node.rs`.
use crate::types::{ClusterCount, Lcn, MftIndex, Vcn};
use compact_str::CompactString;

/// Index of an [`Extent`] in [`super::volume_model::VolumeModel::extents`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtentId(pub u32);

/// Index of a [`Stream`] in [`super::volume_model::VolumeModel::streams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(pub u32);

/// Index of a [`FileEntry`] in [`super::volume_model::VolumeModel::files`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u32);

/// A maximal run of consecutive clusters belonging to one stream (spec §3
/// "Extent"). Invariant enforced by construction order, not by the type:
/// within a stream's `extents` slice, `extent[i+1].vcn == extent[i].vcn +
/// extent[i].length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub vcn: Vcn,
    pub lcn: Lcn,
    pub length: ClusterCount,
}

impl Extent {
    #[inline]
    pub fn is_sparse(&self) -> bool {
        self.lcn.is_sparse()
    }

    #[inline]
    pub fn vcn_end(&self) -> Vcn {
        Vcn(self.vcn.0 + self.length.0)
    }
}

bitflags::bitflags! {
    /// Per-stream disposition flags (spec §3 "Stream").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StreamFlags: u8 {
        const FRAGMENTED = 1 << 0;
        const COMPRESSED = 1 << 1;
        const SPARSE     = 1 << 2;
    }
}

/// A named data attribute of a file (spec §3 "Stream").
#[derive(Debug, Clone)]
pub struct Stream {
    pub owner: FileId,
    pub mft_index: MftIndex,
    pub name: CompactString,
    /// Contiguous range into `VolumeModel::extents`, in declared VCN order.
    pub extents: Vec<Extent>,
    pub flags: StreamFlags,
}

impl Stream {
    pub fn new(owner: FileId, mft_index: MftIndex, name: CompactString) -> Self {
        Self {
            owner,
            mft_index,
            name,
            extents: Vec::new(),
            flags: StreamFlags::empty(),
        }
    }

    /// Total physical cluster count (sparse runs contribute zero, spec §8
    /// boundary behavior).
    pub fn cluster_count(&self) -> ClusterCount {
        ClusterCount(
            self.extents
                .iter()
                .filter(|e| !e.is_sparse())
                .map(|e| e.length.0)
                .sum(),
        )
    }

    /// Fragment count per spec §4.1 "Fragmentation tally": the first
    /// physical run counts as one fragment, each subsequent physical run
    /// not contiguous with the previous physical run increments the count.
    /// A stream with only sparse runs has zero fragments (spec §8).
    pub fn fragment_count(&self) -> u32 {
        let mut count = 0u32;
        let mut prev: Option<Extent> = None;
        for e in &self.extents {
            if e.is_sparse() {
                continue;
            }
            match prev {
                None => count += 1,
                Some(p) if p.lcn.0 + p.length.0 != e.lcn.0 => count += 1,
                Some(_) => {}
            }
            prev = Some(*e);
        }
        count
    }

    pub fn is_fragmented(&self) -> bool {
        self.fragment_count() >= 2
    }
}

bitflags::bitflags! {
    /// Per-file flags (spec §3 "File entry").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileFlags: u16 {
        const DIRECTORY      = 1 << 0;
        const REPARSE_POINT  = 1 << 1;
        const SYSTEM         = 1 << 2;
        const HIDDEN         = 1 << 3;
        const COMPRESSED     = 1 << 4;
        const ENCRYPTED      = 1 << 5;
        const READ_ONLY      = 1 << 6;
    }
}

/// A single MFT base record with derived metadata (spec §3 "File entry").
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub mft_index: MftIndex,
    pub parent_index: MftIndex,
    pub flags: FileFlags,
    pub name: CompactString,
    /// Filled in by `VolumeModel::assemble_paths` after every base record
    /// has been seen (spec §4.1 "Path assembly").
    pub path: Option<CompactString>,
    pub streams: Vec<StreamId>,
    /// Raw NTFS FILETIME ticks from `$STANDARD_INFORMATION`, used only as
    /// sort keys (spec §4.3 "Target selection (optimization)") — never
    /// converted to wall-clock time inside the core.
    pub created: u64,
    pub modified: u64,
    pub accessed: u64,
}

impl FileEntry {
    /// MFT indices below 16 name fixed system files and must never be
    /// considered movable (spec §3 invariant).
    pub fn is_system(&self) -> bool {
        self.mft_index.is_system()
    }

    pub fn is_directory(&self) -> bool {
        self.flags.contains(FileFlags::DIRECTORY)
    }

    pub fn is_reparse_point(&self) -> bool {
        self.flags.contains(FileFlags::REPARSE_POINT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(vcn: u64, lcn: u64, len: u64) -> Extent {
        Extent { vcn: Vcn(vcn), lcn: Lcn(lcn), length: ClusterCount(len) }
    }

    #[test]
    fn single_sparse_run_has_zero_fragments_and_clusters() {
        let mut s = Stream::new(FileId(0), MftIndex(16), CompactString::new(""));
        s.extents
            .push(Extent { vcn: Vcn(0), lcn: Lcn::SPARSE, length: ClusterCount(10) });
        assert_eq!(s.fragment_count(), 0);
        assert_eq!(s.cluster_count(), ClusterCount(0));
    }

    #[test]
    fn contiguous_runs_count_as_one_fragment() {
        let mut s = Stream::new(FileId(0), MftIndex(16), CompactString::new(""));
        s.extents.push(extent(0, 10, 5));
        s.extents.push(extent(5, 15, 5));
        assert_eq!(s.fragment_count(), 1);
        assert!(!s.is_fragmented());
    }

    #[test]
    fn non_adjacent_runs_increment_fragment_count() {
        let mut s = Stream::new(FileId(0), MftIndex(16), CompactString::new(""));
        s.extents.push(extent(0, 10, 5));
        s.extents.push(extent(5, 30, 5));
        assert_eq!(s.fragment_count(), 2);
        assert!(s.is_fragmented());
    }

    #[test]
    fn logically_contiguous_but_physically_split_counts_fragmented() {
        // Two runs whose VCNs are contiguous but LCNs are not: this is the
        // "compressed file" case spec §4.1 calls out explicitly.
        let mut s = Stream::new(FileId(0), MftIndex(16), CompactString::new(""));
        s.extents.push(extent(0, 10, 5));
        s.extents.push(extent(5, 100, 5));
        assert_eq!(s.fragment_count(), 2);
    }
}
