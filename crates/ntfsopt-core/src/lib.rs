/// ntfsopt-core — NTFS defragmentation/optimization engine.
///
/// This crate contains the three tightly coupled subsystems of the engine
/// (MFT scanner, volume model, planner/mover) plus the host-facing traits
/// and shared types that let the engine run against either a real Windows
/// volume or an in-memory mock. It has zero UI or CLI dependencies.
///
/// # Modules
///
/// - [`types`] — shared numeric newtypes (`Lcn`, `Vcn`, `ClusterCount`, `MftIndex`).
/// - [`error`] — the error taxonomy and stable integer error codes (spec §6/§7).
/// - [`config`] — job configuration, filters, byte/duration parsing (spec §6).
/// - [`host`] — traits for the block device, move-extent primitive, clock,
///   and cancellation/progress sink consumed by the core (spec §6), plus a
///   [`host::mock`] implementation used by tests and a `cfg(windows)` real
///   implementation.
/// - [`model`] — extents, streams, file entries, the cluster bitmap and
///   free-region list, and the progress/cluster-map types (spec §3, §4.2).
/// - [`scanner`] — the MFT scanner (spec §4.1) and the non-NTFS file-tree
///   walker fallback (spec §4.5).
/// - [`planner`] — job classification and move-target selection (spec §4.3).
/// - [`mover`] — applying a single move request to host and model (spec §4.4).
/// - [`job`] — orchestrates scanner → model → planner → mover for one job
///   (spec §2's pipeline, §5's concurrency model).
pub mod config;
pub mod error;
pub mod host;
pub mod job;
pub mod model;
pub mod mover;
pub mod planner;
pub mod scanner;
pub mod types;

pub use error::{CoreError, ErrorCode};
pub use job::{run_job, JobHandle};
pub use types::{ClusterCount, Lcn, MftIndex, Vcn};
