//! The MFT scanner (spec §4.1): reads raw file records, follows attribute
//! lists into child records, reconstructs per-file cluster runlists, and
//! materializes the complete file-entry set.
use super::boot::read_boot_sector;
use super::record::{
    decode_runlist, iter_attribute_list, iter_attributes, parse_file_name,
    parse_standard_information_flags, parse_volume_information, read_record_header,
    AttributeBody, AttributeType, RecordError,
};
use super::{FileSet, ScanFilter, ScanOptions};
use crate::error::{CoreError, Result};
use crate::host::{ProgressSink, Volume};
use crate::model::{Extent, FileEntry, FileFlags, Stream, StreamFlags, VolumeModel};
use crate::types::{ClusterCount, Lcn, MftIndex, Vcn};
use compact_str::CompactString;
use std::collections::HashMap;

/// Name-type precedence for `$FILE_NAME` selection: POSIX > WIN32 (and
/// WIN32_AND_DOS, which carries the same long name) > DOS (spec §4.1 Pass A
/// "choose names with precedence POSIX > WIN32 > DOS").
fn name_type_rank(name_type: u8) -> u8 {
    match name_type {
        0x00 => 3, // POSIX
        0x01 | 0x03 => 2, // WIN32, WIN32_AND_DOS
        0x02 => 1, // DOS
        _ => 0,
    }
}

/// Accumulated state for one base MFT record across both passes, before it
/// is committed to the [`VolumeModel`] (lets the scan filter run against a
/// fully-formed name/flags before any allocation happens in the model).
struct PendingFile {
    mft_index: MftIndex,
    parent_index: MftIndex,
    flags: FileFlags,
    name: CompactString,
    created: u64,
    modified: u64,
    accessed: u64,
    name_rank: u8,
    streams: Vec<PendingStream>,
}

struct PendingStream {
    name: CompactString,
    extents: Vec<Extent>,
    compressed: bool,
}

impl PendingFile {
    fn new(mft_index: MftIndex) -> Self {
        Self {
            mft_index,
            parent_index: MftIndex::ROOT,
            flags: FileFlags::empty(),
            name: CompactString::new(""),
            created: 0,
            modified: 0,
            accessed: 0,
            name_rank: 0,
            streams: Vec::new(),
        }
    }

    fn stream_mut(&mut self, name: &str) -> &mut PendingStream {
        if let Some(idx) = self.streams.iter().position(|s| s.name == name) {
            &mut self.streams[idx]
        } else {
            self.streams.push(PendingStream {
                name: CompactString::new(name),
                extents: Vec::new(),
                compressed: false,
            });
            self.streams.last_mut().unwrap()
        }
    }
}

/// Normalize a data-bearing attribute's name to the engine's internal stream
/// naming convention (spec §4.1 "Stream naming"): unnamed `$DATA` and the
/// directory index's default `$I30` name both become the empty string.
fn normalize_stream_name(attr_type: AttributeType, name: &str) -> CompactString {
    if name.is_empty() {
        return CompactString::new("");
    }
    if attr_type == AttributeType::IndexAllocation && name == "$I30" {
        return CompactString::new("");
    }
    CompactString::new(name)
}

/// Read the full byte value of an `$ATTRIBUTE_LIST` attribute, following its
/// own runlist through `volume_read` when it is itself non-resident (spec
/// §4.1 Pass B: "An `ATTRIBUTE_LIST` attribute (resident or non-resident)
/// enumerates attribute references").
fn read_attribute_list_bytes(
    volume: &dyn Volume,
    body: &AttributeBody<'_>,
    bytes_per_cluster: u32,
) -> Result<Vec<u8>> {
    match body {
        AttributeBody::Resident { value } => Ok(value.to_vec()),
        AttributeBody::NonResident { low_vcn, mapping_pairs, data_size } => {
            let runs = decode_runlist(mapping_pairs, *low_vcn);
            let mut bytes = Vec::with_capacity(*data_size as usize);
            for (_, lcn, length) in runs {
                if lcn.is_sparse() {
                    let zero_len = (length.0 * bytes_per_cluster as u64) as usize;
                    bytes.extend(std::iter::repeat(0u8).take(zero_len));
                    continue;
                }
                let offset = lcn.0 * bytes_per_cluster as u64;
                let len = (length.0 * bytes_per_cluster as u64) as usize;
                let chunk = volume
                    .volume_read(offset, len)
                    .map_err(|e| CoreError::HostIo(e.0))?;
                bytes.extend_from_slice(&chunk);
            }
            bytes.truncate(*data_size as usize);
            Ok(bytes)
        }
    }
}

/// Validate a stream's decoded extents per spec §4.1 "Runlist decoding":
/// drop them (marking the stream corrupt, not the whole file) if the first
/// run is sparse or any run's LCN is out of range. `$BadClus` (record 8) is
/// exempted per SPEC_FULL.md's Open Question resolution.
fn validate_and_attach(stream: &mut PendingStream, total_clusters: u64, owner_index: MftIndex) {
    if stream.extents.is_empty() {
        return;
    }
    if owner_index == MftIndex::BAD_CLUS {
        return;
    }
    let first_sparse = stream.extents[0].is_sparse();
    let any_out_of_range = stream
        .extents
        .iter()
        .any(|e| !e.is_sparse() && e.lcn.0 >= total_clusters);
    if first_sparse || any_out_of_range {
        stream.extents.clear();
    }
}

/// Parse one base record's attributes (pass A) plus any attribute-list
/// references (pass B), producing a [`PendingFile`]. Returns `Err` only for
/// structural corruption the caller should count (spec §4.1 "Two-pass
/// processing per base record").
fn process_base_record(
    mft_index: MftIndex,
    record: &[u8],
    volume: &dyn Volume,
    record_size: usize,
    bytes_per_cluster: u32,
    total_clusters: u64,
    model: &mut VolumeModel,
) -> std::result::Result<PendingFile, RecordError> {
    let header = read_record_header(record)?;
    let mut pending = PendingFile::new(mft_index);
    if header.is_directory {
        pending.flags |= FileFlags::DIRECTORY;
    }

    // Attribute lists referenced from this record, collected during pass A
    // and walked in pass B once the record's own attributes are fully read.
    let mut attribute_lists: Vec<Vec<u8>> = Vec::new();

    for attr in iter_attributes(record, &header) {
        let attr = attr?;
        match attr.attr_type {
            AttributeType::StandardInformation => {
                if let AttributeBody::Resident { value } = &attr.body {
                    if let Some(flags) = parse_standard_information_flags(value) {
                        pending.flags |= standard_info_flags_to_file_flags(flags);
                    }
                }
            }
            AttributeType::FileName => {
                if let AttributeBody::Resident { value } = &attr.body {
                    if let Some(fna) = parse_file_name(value) {
                        let rank = name_type_rank(fna.name_type);
                        if rank > pending.name_rank {
                            pending.name_rank = rank;
                            pending.parent_index = MftIndex(fna.parent_mft_index);
                            pending.name = CompactString::new(&fna.name);
                            pending.created = fna.created;
                            pending.modified = fna.modified;
                            pending.accessed = fna.accessed;
                        }
                    }
                }
            }
            AttributeType::VolumeInformation if mft_index == MftIndex::VOLUME => {
                if let AttributeBody::Resident { value } = &attr.body {
                    if let Some(vi) = parse_volume_information(value) {
                        model.ntfs_version = Some((vi.major_version, vi.minor_version));
                        model.volume_dirty = vi.is_dirty;
                    }
                }
            }
            AttributeType::ReparsePoint => {
                pending.flags |= FileFlags::REPARSE_POINT;
            }
            AttributeType::AttributeList => {
                match read_attribute_list_bytes(volume, &attr.body, bytes_per_cluster) {
                    Ok(bytes) => attribute_lists.push(bytes),
                    // Unreadable attribute list: treat like any other
                    // corrupt attribute (spec §4.1 "Scanner must continue
                    // past individual corrupt records").
                    Err(_) => return Err(RecordError::AttributeOutOfRange { offset: 0 }),
                }
            }
            _ => {
                if attr.non_resident {
                    if let AttributeBody::NonResident { low_vcn, mapping_pairs, .. } = &attr.body {
                        let stream_name = normalize_stream_name(attr.attr_type, &attr.name);
                        let stream = pending.stream_mut(&stream_name);
                        let runs = decode_runlist(mapping_pairs, *low_vcn);
                        for (vcn, lcn, length) in runs {
                            stream.extents.push(Extent { vcn, lcn, length });
                        }
                        if attr.attr_type == AttributeType::Data {
                            // Compressed-file runs alias the same LCN across
                            // sparse compression-unit boundaries; we take the
                            // attribute's own flags bit via name-convention
                            // absence here and rely on file-level COMPRESSED
                            // for the stream color (spec §4.2 cell coloring
                            // already special-cases this at the file level).
                            let _ = stream; // no attribute-level flag to read here
                        }
                    }
                }
                // Unknown non-data-bearing resident attributes are skipped
                // silently (spec §4.1).
            }
        }
    }

    // Pass B: walk every attribute-list reference whose child record differs
    // from this base record, merging its extents into the named stream.
    for list_bytes in &attribute_lists {
        for entry in iter_attribute_list(list_bytes) {
            if entry.child_mft_index == mft_index.0 {
                continue; // already covered by pass A
            }
            let child_record = match volume.mft_record(MftIndex(entry.child_mft_index), record_size) {
                Ok(bytes) => bytes,
                Err(_) => continue, // per-child fetch failure: local, not fatal
            };
            let Ok(child_header) = read_record_header(&child_record) else {
                continue;
            };
            for child_attr in iter_attributes(&child_record, &child_header) {
                let Ok(child_attr) = child_attr else { continue };
                if child_attr.attr_type.code() != entry.attr_type.code() {
                    continue;
                }
                if child_attr.name != entry.name || child_attr.instance != entry.instance {
                    continue;
                }
                if let AttributeBody::NonResident { low_vcn, mapping_pairs, .. } = &child_attr.body {
                    let stream_name = normalize_stream_name(child_attr.attr_type, &child_attr.name);
                    let stream = pending.stream_mut(&stream_name);
                    for (vcn, lcn, length) in decode_runlist(mapping_pairs, *low_vcn) {
                        stream.extents.push(Extent { vcn, lcn, length });
                    }
                }
            }
        }
    }

    for stream in &mut pending.streams {
        stream.extents.sort_by_key(|e| e.vcn.0);
        validate_and_attach(stream, total_clusters, mft_index);
    }

    Ok(pending)
}

fn standard_info_flags_to_file_flags(flags: u32) -> FileFlags {
    const FILE_ATTRIBUTE_READONLY: u32 = 0x1;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
    const FILE_ATTRIBUTE_COMPRESSED: u32 = 0x800;
    const FILE_ATTRIBUTE_ENCRYPTED: u32 = 0x4000;

    let mut out = FileFlags::empty();
    if flags & FILE_ATTRIBUTE_READONLY != 0 {
        out |= FileFlags::READ_ONLY;
    }
    if flags & FILE_ATTRIBUTE_HIDDEN != 0 {
        out |= FileFlags::HIDDEN;
    }
    if flags & FILE_ATTRIBUTE_SYSTEM != 0 {
        out |= FileFlags::SYSTEM;
    }
    if flags & FILE_ATTRIBUTE_COMPRESSED != 0 {
        out |= FileFlags::COMPRESSED;
    }
    if flags & FILE_ATTRIBUTE_ENCRYPTED != 0 {
        out |= FileFlags::ENCRYPTED;
    }
    out
}

/// Read record 0 (`$MFT` itself) and compute the total MFT record count from
/// its non-resident `$DATA` attribute (spec §4.1 "Bootstrap").
fn bootstrap_record_count(
    volume: &dyn Volume,
    record_size: usize,
) -> Result<u64> {
    let record = volume
        .mft_record(MftIndex::MFT, record_size)
        .map_err(|e| CoreError::HostIo(e.0))?;
    let header = read_record_header(&record).map_err(|_| CoreError::NoMft)?;

    for attr in iter_attributes(&record, &header) {
        let Ok(attr) = attr else { continue };
        if attr.attr_type == AttributeType::Data && attr.name.is_empty() {
            if let AttributeBody::NonResident { data_size, .. } = attr.body {
                if data_size == 0 || record_size == 0 {
                    return Err(CoreError::NoMft);
                }
                return Ok(data_size / record_size as u64);
            }
        }
    }
    Err(CoreError::NoMft)
}

/// Scan one NTFS volume and produce the complete file-entry set (spec §4.1
/// `scan(volume, filter_cb, progress_cb, cancel) -> FileSet`).
pub fn scan(
    volume: &dyn Volume,
    filter: &dyn ScanFilter,
    progress: &dyn ProgressSink,
    options: ScanOptions,
    drive_root: &str,
) -> Result<FileSet> {
    let boot = read_boot_sector(volume)?;
    let info = volume.volume_info().map_err(|e| CoreError::HostIo(e.0))?;
    let bytes_per_cluster = info.bytes_per_cluster.max(boot.bytes_per_cluster());
    let total_clusters = info.total_clusters.max(boot.total_clusters());
    let record_size = boot.bytes_per_file_record as usize;

    let total_records = bootstrap_record_count(volume, record_size)?;

    let mut model = VolumeModel::new(bytes_per_cluster, boot.bytes_per_sector, total_clusters);
    model.mft_zone = Some((
        boot.mft_start_lcn,
        // A conservative placeholder extent; job.rs refines this once the
        // $MFT's own extents are known (SPEC_FULL.md Open Question
        // resolution: "MFT zone is modeled as a single reserved LCN range").
        ClusterCount(0),
    ));

    let mut error_count: u64 = 0;
    let mut pending_by_index: HashMap<u64, FileEntry> = HashMap::new();
    let mut pending_streams: HashMap<u64, Vec<PendingStream>> = HashMap::new();

    // Records scanned right to left (highest index first), spec §4.1
    // "Record reading".
    for idx in (0..total_records).rev() {
        if progress.should_cancel() {
            return Err(CoreError::Cancelled);
        }

        let record = match volume.mft_record(MftIndex(idx), record_size) {
            Ok(bytes) => bytes,
            Err(_) => {
                error_count += 1;
                if !options.allow_partial_scan {
                    return Err(CoreError::MftUnreadable { error_count });
                }
                continue;
            }
        };

        let header = match read_record_header(&record) {
            Ok(h) => h,
            Err(_) => {
                error_count += 1;
                if !options.allow_partial_scan {
                    return Err(CoreError::MftUnreadable { error_count });
                }
                continue;
            }
        };

        if header.base_file_record != 0 {
            // Child/extension record: processed on demand via its base
            // record's attribute-list walk, not as a top-level entry.
            continue;
        }

        let mft_index = MftIndex(idx);
        match process_base_record(
            mft_index,
            &record,
            volume,
            record_size,
            bytes_per_cluster,
            total_clusters,
            &mut model,
        ) {
            Ok(pending) => {
                let entry = FileEntry {
                    mft_index: pending.mft_index,
                    parent_index: pending.parent_index,
                    flags: pending.flags,
                    name: pending.name,
                    path: None,
                    streams: Vec::new(),
                    created: pending.created,
                    modified: pending.modified,
                    accessed: pending.accessed,
                };
                if filter.include(&entry) {
                    pending_streams.insert(idx, pending.streams);
                    pending_by_index.insert(idx, entry);
                }
            }
            Err(_) => {
                error_count += 1;
                if !options.allow_partial_scan {
                    return Err(CoreError::MftUnreadable { error_count });
                }
            }
        }
    }

    // Commit in ascending index order so FileId allocation is deterministic
    // and parent lookups in assemble_paths are stable across runs.
    let mut indices: Vec<u64> = pending_by_index.keys().copied().collect();
    indices.sort_unstable();
    for idx in indices {
        let entry = pending_by_index.remove(&idx).unwrap();
        let streams = pending_streams.remove(&idx).unwrap_or_default();
        let file_id = model.add_file(entry);
        for pending_stream in streams {
            let mut stream = Stream::new(file_id, MftIndex(idx), pending_stream.name);
            stream.extents = pending_stream.extents;
            if stream.extents.iter().any(|e| e.is_sparse()) {
                stream.flags |= StreamFlags::SPARSE;
            }
            if pending_stream.compressed {
                stream.flags |= StreamFlags::COMPRESSED;
            }
            if stream.is_fragmented() {
                stream.flags |= StreamFlags::FRAGMENTED;
            }
            model.add_stream(stream);
        }
    }

    model.assemble_paths(drive_root);

    Ok(FileSet { model, error_count })
}
