//! The non-NTFS file-tree walker fallback (spec §4.5). Enumerates entries
//! depth-first, querying extent maps per file via the host's
//! `FILE_EXTENT_QUERY` primitive (here, [`crate::host::ExtentQuery`]).
//! Symbolic links and reparse points are not followed.
//!
//! Directory traversal is parallelized with `jwalk` (the teacher's own
//! Tier-2 scanner dependency), matching SPEC_FULL.md's "Parallelism"
//! section: this is the one data-parallel phase the spec allows outside the
//! strictly sequential control thread.
use super::{FileSet, ScanFilter, ScanOptions};
use crate::error::{CoreError, Result};
use crate::host::{ExtentQuery, ProgressSink, StreamRef, Volume};
use crate::model::{Extent, FileEntry, FileFlags, Stream, StreamFlags, VolumeModel};
use crate::types::MftIndex;
use compact_str::CompactString;
use jwalk::WalkDir;
use std::path::Path;

/// Walk `root` and build a [`FileSet`] the same shape the MFT scanner
/// produces, using synthetic sequential MFT indices (spec §4.5: "the only
/// difference is that the file-entry set is built by filesystem walking
/// rather than direct MFT reading").
pub fn scan(
    root: &Path,
    volume: &dyn Volume,
    extent_query: &dyn ExtentQuery,
    filter: &dyn ScanFilter,
    progress: &dyn ProgressSink,
    options: ScanOptions,
) -> Result<FileSet> {
    let info = volume.volume_info().map_err(|e| CoreError::HostIo(e.0))?;
    let mut model = VolumeModel::new(info.bytes_per_cluster, info.bytes_per_sector, info.total_clusters);

    // Reserve the system-file index range (spec §3 "0..15 name fixed system
    // files"); synthetic indices for walked entries start past it.
    let mut next_index: u64 = MftIndex::FIRST_USER.0;
    let root_index = MftIndex::ROOT;

    let root_entry = FileEntry {
        mft_index: root_index,
        parent_index: root_index,
        flags: FileFlags::DIRECTORY,
        name: CompactString::new(""),
        path: None,
        streams: Vec::new(),
        created: 0,
        modified: 0,
        accessed: 0,
    };
    model.add_file(root_entry);

    let mut error_count: u64 = 0;

    // jwalk parallelizes directory enumeration internally; entries are
    // drained back onto the control thread here, which is the only thread
    // permitted to mutate `model` (spec §5).
    let walker = WalkDir::new(root)
        .skip_hidden(false)
        .follow_links(false)
        .sort(true);

    for entry in walker {
        if progress.should_cancel() {
            return Err(CoreError::Cancelled);
        }

        let entry = match entry {
            Ok(e) => e,
            Err(_) => {
                error_count += 1;
                if !options.allow_partial_scan {
                    return Err(CoreError::MftUnreadable { error_count });
                }
                continue;
            }
        };

        if entry.path() == root {
            continue;
        }

        let file_type = entry.file_type();
        // Symbolic links and reparse points are not followed (spec §4.5).
        if file_type.is_symlink() {
            continue;
        }

        let is_dir = file_type.is_dir();
        let name = CompactString::new(entry.file_name().to_string_lossy());
        let mut flags = FileFlags::empty();
        if is_dir {
            flags |= FileFlags::DIRECTORY;
        }

        let metadata = entry.metadata().ok();
        if let Some(meta) = &metadata {
            if meta.permissions().readonly() {
                flags |= FileFlags::READ_ONLY;
            }
        }

        let mft_index = MftIndex(next_index);
        next_index += 1;

        let file_entry = FileEntry {
            mft_index,
            // Synthetic parent linkage is reconstructed below from the path
            // components rather than jwalk's own depth-first parent, since
            // the model only knows parents by MFT index.
            parent_index: root_index,
            flags,
            name,
            path: Some(CompactString::new(entry.path().to_string_lossy())),
            streams: Vec::new(),
            created: 0,
            modified: 0,
            accessed: 0,
        };

        if !filter.include(&file_entry) {
            continue;
        }

        let file_id = model.add_file(file_entry);

        if !is_dir {
            let stream_ref = StreamRef { mft_index, stream_name: String::new() };
            match extent_query.extent_query(&stream_ref) {
                Ok(runs) => {
                    let mut stream = Stream::new(file_id, mft_index, CompactString::new(""));
                    stream.extents = runs
                        .into_iter()
                        .map(|(vcn, lcn, length)| Extent { vcn, lcn, length })
                        .collect();
                    if stream.extents.iter().any(|e| e.is_sparse()) {
                        stream.flags |= StreamFlags::SPARSE;
                    }
                    if stream.is_fragmented() {
                        stream.flags |= StreamFlags::FRAGMENTED;
                    }
                    model.add_stream(stream);
                }
                Err(_) => {
                    error_count += 1;
                    if !options.allow_partial_scan {
                        return Err(CoreError::MftUnreadable { error_count });
                    }
                }
            }
        }
    }

    // Paths were already stamped onto each entry as it was walked (jwalk
    // gives us depth-first order for free); parent indices stay at
    // `root_index` for all entries since the walker fallback does not need
    // the MFT's index-based parent linkage — the path is already absolute.
    Ok(FileSet { model, error_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::mock_host;
    use crate::host::AcceptAllExtentQuery;
    use crate::scanner::AcceptAll;
    use tempfile::tempdir;

    #[test]
    fn walks_a_small_tree_and_counts_files() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"world").unwrap();

        let vol = mock_host(1000, 4096);
        let extents = AcceptAllExtentQuery;
        let filter = AcceptAll;
        let result = scan(
            dir.path(),
            &vol,
            &extents,
            &filter,
            &crate::host::NullProgressSink,
            ScanOptions { allow_partial_scan: true },
        )
        .unwrap();

        // root + sub + a.txt + b.txt == 4 entries.
        assert_eq!(result.model.files.len(), 4);
    }
}
