//! The engine's error taxonomy (spec §7) and the stable integer error codes
//! exposed to callers (spec §6).
//!
//! `CoreError` is the kind of error that can abort a job outright
//! (environment errors and fatal invariant violations). Per-record,
//! per-file and per-move failures (spec §7 categories 2-4) are *not*
//! represented here — they are counted and surfaced through
//! [`crate::model::progress::ProgressRecord`] instead, exactly as spec §7
//! describes: "only invariant violations and fatal environment errors
//! propagate to the job entry point".

use thiserror::Error;

/// Stable integer error codes (spec §6). These are part of the host-facing
/// contract and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Unknown = -1,
    FatOptimization = -2,
    W2k4kbClusters = -3,
    NoMem = -4,
    Cdrom = -5,
    Remote = -6,
    AssignedBySubst = -7,
    Removable = -8,
    UdfDefrag = -9,
    NoMft = -10,
    UnmovableMft = -11,
    DirtyVolume = -12,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// The engine's fatal error type.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Environment errors (spec §7 category 1): the job refuses to start.
    #[error("volume is not NTFS")]
    NotNtfs,
    #[error("cannot optimize FAT-family volumes")]
    FatOptimization,
    #[error("Windows 2000 volumes with 4KB clusters are not supported for MFT optimization")]
    W2k4kbClusters,
    #[error("out of memory")]
    NoMem,
    #[error("CD-ROM volumes cannot be defragmented")]
    Cdrom,
    #[error("remote/network volumes cannot be defragmented")]
    Remote,
    #[error("volume is assigned by SUBST and cannot be defragmented")]
    AssignedBySubst,
    #[error("removable volumes are excluded by configuration")]
    Removable,
    #[error("UDF volumes cannot be defragmented")]
    UdfDefrag,
    #[error("$MFT could not be read")]
    NoMft,
    #[error("$MFT cannot be moved")]
    UnmovableMft,
    #[error("volume is dirty; run chkdsk first")]
    DirtyVolume,

    /// Structural errors (spec §7 category 2), escalated to fatal because
    /// `ALLOW_PARTIAL_SCAN` was not set.
    #[error("MFT could not be read ({error_count} record error(s))")]
    MftUnreadable { error_count: u64 },

    /// Invariant violations (spec §7 category 5): always fatal.
    #[error("volume model corrupted: {context}")]
    ModelCorrupted { context: String },

    /// Cancellation is not an error per spec §7 category 6, but the
    /// scanner's bootstrap phase (before any partial results exist) needs
    /// a way to unwind early.
    #[error("operation cancelled")]
    Cancelled,

    /// A host primitive returned an error that the engine could not
    /// recover from (i.e. outside the per-move/per-record retry rules).
    #[error("host I/O error: {0}")]
    HostIo(String),
}

impl CoreError {
    /// The stable integer error code for this error (spec §6/§7
    /// "user-visible behavior": completion_status < 0 plus this code).
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::NotNtfs => ErrorCode::Unknown,
            CoreError::FatOptimization => ErrorCode::FatOptimization,
            CoreError::W2k4kbClusters => ErrorCode::W2k4kbClusters,
            CoreError::NoMem => ErrorCode::NoMem,
            CoreError::Cdrom => ErrorCode::Cdrom,
            CoreError::Remote => ErrorCode::Remote,
            CoreError::AssignedBySubst => ErrorCode::AssignedBySubst,
            CoreError::Removable => ErrorCode::Removable,
            CoreError::UdfDefrag => ErrorCode::UdfDefrag,
            CoreError::NoMft | CoreError::MftUnreadable { .. } => ErrorCode::NoMft,
            CoreError::UnmovableMft => ErrorCode::UnmovableMft,
            CoreError::DirtyVolume => ErrorCode::DirtyVolume,
            CoreError::ModelCorrupted { .. } => ErrorCode::Unknown,
            CoreError::Cancelled => ErrorCode::Unknown,
            CoreError::HostIo(_) => ErrorCode::Unknown,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_spec_constants() {
        assert_eq!(CoreError::FatOptimization.code().as_i32(), -2);
        assert_eq!(CoreError::W2k4kbClusters.code().as_i32(), -3);
        assert_eq!(CoreError::NoMem.code().as_i32(), -4);
        assert_eq!(CoreError::Cdrom.code().as_i32(), -5);
        assert_eq!(CoreError::Remote.code().as_i32(), -6);
        assert_eq!(CoreError::AssignedBySubst.code().as_i32(), -7);
        assert_eq!(CoreError::Removable.code().as_i32(), -8);
        assert_eq!(CoreError::UdfDefrag.code().as_i32(), -9);
        assert_eq!(CoreError::NoMft.code().as_i32(), -10);
        assert_eq!(CoreError::UnmovableMft.code().as_i32(), -11);
        assert_eq!(CoreError::DirtyVolume.code().as_i32(), -12);
    }

    #[test]
    fn mft_unreadable_maps_to_no_mft_code() {
        let err = CoreError::MftUnreadable { error_count: 3 };
        assert_eq!(err.code().as_i32(), -10);
    }
}
