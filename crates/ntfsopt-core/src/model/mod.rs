//! The volume model: cluster bitmap/free-region index, the file-entry
//! arena, and the progress snapshot types (spec §3, §4.2).
pub mod entities;
pub mod free_list;
pub mod progress;
pub mod volume_model;

pub use entities::{Extent, FileEntry, FileFlags, FileId, Stream, StreamFlags, StreamId};
pub use free_list::{FreeList, FreeRegion};
pub use progress::{ClusterColor, ClusterMap, Operation, ProgressRecord};
pub use volume_model::VolumeModel;
