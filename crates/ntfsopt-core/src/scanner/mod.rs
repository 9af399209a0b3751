//! The MFT scanner (spec §4.1) and the non-NTFS file-tree walker fallback
//! (spec §4.5). Both produce the same thing: a populated [`crate::model::VolumeModel`]
//! file/stream set, with the free-region list still to be loaded separately
//! from the bitmap (spec §4.2) — scanning and bitmap loading are independent
//! host round-trips.
pub mod boot;
pub mod mft;
pub mod record;
pub mod walker;

use crate::error::Result;
use crate::model::FileEntry;

/// Per-scan options recognized by both the MFT scanner and the walker
/// fallback (spec §4.1 "Failure model").
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// If set, per-record/per-file errors are counted and the scan still
    /// returns its partial results; if unset, any error fails the whole scan.
    pub allow_partial_scan: bool,
}

/// Called once per candidate file entry before it is added to the model,
/// letting the caller drop subtrees or individual files early (spec §4.1
/// `scan(volume, filter_cb, ...)`). Returning `false` drops the entry.
pub trait ScanFilter: Send + Sync {
    fn include(&self, entry: &FileEntry) -> bool;
}

/// The filter that keeps everything — the default when the caller doesn't
/// need to restrict the scan up front (filtering by path pattern normally
/// happens later, in the planner's movability check).
pub struct AcceptAll;

impl ScanFilter for AcceptAll {
    fn include(&self, _entry: &FileEntry) -> bool {
        true
    }
}

/// The populated entity store a scan produces (spec §4.1 `-> FileSet`).
pub struct FileSet {
    pub model: crate::model::VolumeModel,
    /// Count of per-record (MFT scanner) or per-file (walker) errors
    /// encountered and swallowed because `allow_partial_scan` was set.
    pub error_count: u64,
}

/// Shared plumbing both scanners use to check cancellation (spec §5
/// "Suspension points": checked at least once per record / per file).
pub(crate) fn check_cancel(cancel: &dyn crate::host::ProgressSink) -> Result<()> {
    if cancel.should_cancel() {
        return Err(crate::error::CoreError::Cancelled);
    }
    Ok(())
}
