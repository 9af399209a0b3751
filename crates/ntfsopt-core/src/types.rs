/// Shared numeric newtypes used throughout the engine.
///
/// Keeping LCN, VCN, cluster counts and MFT indices as distinct types (rather
/// than bare `u64`) catches the class of bug where a VCN is accidentally
/// used where an LCN was meant, which is exactly the kind of mistake the
/// original C sources (raw `ULONGLONG` everywhere) could not catch at
/// compile time.
use std::fmt;

/// A sentinel LCN marking a sparse/compressed virtual run that occupies no
/// physical clusters (spec §3, Extent).
pub const SPARSE_LCN: u64 = u64::MAX;

/// Logical Cluster Number — absolute cluster index on the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lcn(pub u64);

impl Lcn {
    /// The sentinel value used for sparse/compressed virtual runs.
    pub const SPARSE: Lcn = Lcn(SPARSE_LCN);

    #[inline]
    pub fn is_sparse(self) -> bool {
        self.0 == SPARSE_LCN
    }

    #[inline]
    pub fn checked_add(self, count: ClusterCount) -> Option<Lcn> {
        self.0.checked_add(count.0).map(Lcn)
    }
}

impl fmt::Display for Lcn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sparse() {
            write!(f, "sparse")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Virtual Cluster Number — cluster index within one file stream, starting
/// at zero for each stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vcn(pub u64);

impl Vcn {
    #[inline]
    pub fn checked_add(self, count: ClusterCount) -> Option<Vcn> {
        self.0.checked_add(count.0).map(Vcn)
    }
}

impl fmt::Display for Vcn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A count of clusters (a length, never an absolute position).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClusterCount(pub u64);

impl ClusterCount {
    pub const ZERO: ClusterCount = ClusterCount(0);

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ClusterCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for ClusterCount {
    type Output = ClusterCount;
    fn add(self, rhs: ClusterCount) -> ClusterCount {
        ClusterCount(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for ClusterCount {
    fn add_assign(&mut self, rhs: ClusterCount) {
        self.0 += rhs.0;
    }
}

/// Index of a file's base record in the Master File Table.
///
/// MFT indices `0..16` name fixed system files (spec §3, File entry
/// invariant) and must never be considered movable by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MftIndex(pub u64);

impl MftIndex {
    /// The NTFS root directory always has this MFT index.
    pub const ROOT: MftIndex = MftIndex(5);

    /// The `$MFT` itself.
    pub const MFT: MftIndex = MftIndex(0);

    /// The `$MFTMirr`.
    pub const MFT_MIRROR: MftIndex = MftIndex(1);

    /// The `$LogFile`.
    pub const LOG_FILE: MftIndex = MftIndex(2);

    /// The `$Volume` record (NTFS version, dirty flag).
    pub const VOLUME: MftIndex = MftIndex(3);

    /// The `$Bitmap`.
    pub const BITMAP: MftIndex = MftIndex(6);

    /// The `$BadClus`.
    pub const BAD_CLUS: MftIndex = MftIndex(8);

    /// First record index usable by ordinary files (spec §3 invariant:
    /// indices below this must never be considered movable).
    pub const FIRST_USER: MftIndex = MftIndex(16);

    #[inline]
    pub fn is_system(self) -> bool {
        self.0 < Self::FIRST_USER.0
    }
}

impl fmt::Display for MftIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_lcn_roundtrip() {
        assert!(Lcn::SPARSE.is_sparse());
        assert!(!Lcn(0).is_sparse());
        assert!(!Lcn(12345).is_sparse());
    }

    #[test]
    fn mft_index_system_boundary() {
        assert!(MftIndex(0).is_system());
        assert!(MftIndex(15).is_system());
        assert!(!MftIndex(16).is_system());
        assert!(!MftIndex(1000).is_system());
    }

    #[test]
    fn cluster_count_add() {
        let a = ClusterCount(10);
        let b = ClusterCount(5);
        assert_eq!((a + b).0, 15);
    }
}
