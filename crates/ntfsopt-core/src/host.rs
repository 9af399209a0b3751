//! Host primitives consumed by the core (spec §6).
//!
//! The core never touches a disk, a clock, or a UI directly — it only calls
//! through these traits. This is the seam spec.md §9 calls out under
//! "Global mutable state": the only state the core itself owns is what is
//! reachable from a `Job` context built around one `&dyn Volume`.
pub mod mock;
#[cfg(windows)]
pub mod windows_volume;

use crate::types::{ClusterCount, Lcn, MftIndex, Vcn};
use std::time::Instant;

/// Identifies one stream for the move-extent and extent-query primitives:
/// the owning file's base MFT index plus the stream name (empty for the
/// unnamed `$DATA`/`$I30`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamRef {
    pub mft_index: MftIndex,
    pub stream_name: String,
}

/// Volume-wide metadata (`volume_info` host primitive).
#[derive(Debug, Clone, Copy)]
pub struct VolumeInfo {
    pub bytes_per_cluster: u32,
    pub bytes_per_sector: u16,
    pub total_clusters: u64,
    pub free_clusters: u64,
}

/// One decoded run from the `volume_bitmap` primitive: `(bytes, next_start)`.
#[derive(Debug, Clone)]
pub struct BitmapChunk {
    /// Packed bits, one bit per cluster starting at the queried LCN.
    pub bits: Vec<u8>,
    /// The LCN to pass as `start_lcn` for the next chunk, or `None` if this
    /// was the last chunk.
    pub next_start: Option<Lcn>,
}

/// A host error. The core wraps these in [`crate::error::CoreError::HostIo`]
/// or treats them as local/per-item failures depending on where they occur
/// (spec §7 category 3/4).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
    pub fn new(msg: impl Into<String>) -> Self {
        HostError(msg.into())
    }
}

/// The block-device primitives the MFT scanner and volume model need:
/// `volume_read`, `volume_bitmap`, `mft_record`, `volume_info` (spec §6).
pub trait Volume: Send + Sync {
    /// Raw byte read at a volume-relative offset.
    fn volume_read(&self, offset: u64, len: usize) -> Result<Vec<u8>, HostError>;

    /// One chunk of the cluster allocation bitmap, starting at `start_lcn`.
    fn volume_bitmap(&self, start_lcn: Lcn) -> Result<BitmapChunk, HostError>;

    /// Fetch the fixed-size MFT record at the given index.
    fn mft_record(&self, index: MftIndex, record_size: usize) -> Result<Vec<u8>, HostError>;

    /// Cluster/sector sizes and cluster counts (from the boot sector /
    /// filesystem control block).
    fn volume_info(&self) -> Result<VolumeInfo, HostError>;
}

/// The non-NTFS fallback's per-file extent query (spec §4.5
/// `FILE_EXTENT_QUERY`), and the re-read the mover optionally performs to
/// verify atomicity (`Config::verify_moves`, SPEC_FULL.md Open Question).
pub trait ExtentQuery: Send + Sync {
    fn extent_query(&self, stream: &StreamRef) -> Result<Vec<(Vcn, Lcn, ClusterCount)>, HostError>;
}

/// The move-extent primitive (spec §4.4, §6 `move_extent`). The contract
/// the core relies on: either all `count` clusters are copied and the
/// stream's runlist is rewritten, or nothing changes and an error is
/// returned.
pub trait MoveExtent: Send + Sync {
    fn move_extent(
        &self,
        stream: &StreamRef,
        source_vcn: Vcn,
        target_lcn: Lcn,
        count: ClusterCount,
    ) -> Result<(), HostError>;
}

/// Monotonic clock (`clock_now` host primitive). A trait (rather than
/// calling `Instant::now()` directly) so tests can inject a fake clock to
/// exercise `TIME_LIMIT` deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real-time clock, backed by `std::time::Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealClock;

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Cancellation + progress sink (spec §5). A single shared boolean flag
/// observed by the control thread between records/moves/passes, paired
/// with a callback that receives each [`crate::model::progress::ProgressRecord`]
/// snapshot.
pub trait ProgressSink: Send + Sync {
    /// Deliver one progress snapshot. Called at most once per
    /// `REFRESH_INTERVAL` by the control thread (spec §5).
    fn on_progress(&self, progress: &crate::model::progress::ProgressRecord);

    /// Whether cancellation has been requested. Checked at every
    /// suspension point spec §5 lists (record reads, bitmap reads, move
    /// invocations, inter-pass sleeps).
    fn should_cancel(&self) -> bool {
        false
    }
}

/// A [`ProgressSink`] that does nothing and never cancels, for tests and
/// one-shot CLI invocations that only care about the final result.
#[derive(Debug, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_progress(&self, _progress: &crate::model::progress::ProgressRecord) {}
}

/// An [`ExtentQuery`] that reports every stream as empty, for walker tests
/// that only care about tree shape, not layout.
#[derive(Debug, Default)]
pub struct AcceptAllExtentQuery;

impl ExtentQuery for AcceptAllExtentQuery {
    fn extent_query(&self, _stream: &StreamRef) -> Result<Vec<(Vcn, Lcn, ClusterCount)>, HostError> {
        Ok(Vec::new())
    }
}

/// Bundles every host capability the core needs for one job. Kept as a
/// single trait (rather than threading four separate trait objects through
/// every function) because every real implementation backs all four with
/// the same underlying volume handle anyway.
pub trait Host: Volume + ExtentQuery + MoveExtent + Clock {}
impl<T: Volume + ExtentQuery + MoveExtent + Clock> Host for T {}
