//! End-to-end scanner integration tests.
//!
//! These exercise the real `scanner::mft::scan` entry point — bootstrap,
//! the right-to-left per-record loop, and the attribute-list (Pass B)
//! traversal — against a hand-built in-memory MFT, rather than against the
//! narrower helper functions `scanner::mft`'s own unit tests cover.
//!
//! **Why a `tests/` integration test (not unit test)?**
//!
//! `mft::scan` ties together the boot sector, the bootstrap record count,
//! the per-record loop and the attribute-list walk in one call. Unit-testing
//! each piece in isolation (as `scanner/mft.rs`'s own `#[cfg(test)]` module
//! does) doesn't prove they compose correctly; this does, against a real
//! [`MockVolume`] with zero mocking of the scan logic itself.
use ntfsopt_core::host::mock::mock_host;
use ntfsopt_core::host::NullProgressSink;
use ntfsopt_core::scanner::{mft, AcceptAll, ScanOptions};
use ntfsopt_core::types::MftIndex;
use ntfsopt_core::CoreError;

const RECORD_SIZE: usize = 1024;
const BYTES_PER_SECTOR: u16 = 512;
const SECTORS_PER_CLUSTER: u8 = 8;
const BYTES_PER_CLUSTER: u32 = BYTES_PER_SECTOR as u32 * SECTORS_PER_CLUSTER as u32;

// ── Byte-level helpers ───────────────────────────────────────────────────

fn utf16_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}

/// Write the common 16-byte attribute header prefix (type, length,
/// non-resident flag, name length/offset, instance); the resident- or
/// non-resident-specific fields past byte 16 are the caller's job.
fn write_attr_header(
    record: &mut [u8],
    offset: usize,
    attr_type: u32,
    length: u32,
    non_resident: bool,
    name_length: u8,
    name_offset: u16,
    instance: u16,
) {
    record[offset..offset + 4].copy_from_slice(&attr_type.to_le_bytes());
    record[offset + 4..offset + 8].copy_from_slice(&length.to_le_bytes());
    record[offset + 8] = non_resident as u8;
    record[offset + 9] = name_length;
    record[offset + 10..offset + 12].copy_from_slice(&name_offset.to_le_bytes());
    record[offset + 14..offset + 16].copy_from_slice(&instance.to_le_bytes());
}

/// Record index 0: doubles as both `$MFT`'s own base record (read via
/// `mft_record`) and the volume's boot sector (the mock's `volume_read`
/// reads offset 0 out of the same backing buffer). The two field sets
/// don't overlap: the boot sector's BPB lives in bytes 11..65, the record
/// header's fixed fields end at byte 40, and attributes start at 72.
fn build_mft_record(total_records: u64, total_clusters: u64) -> Vec<u8> {
    let mut record = vec![0u8; RECORD_SIZE];
    record[0..4].copy_from_slice(b"FILE");
    record[20..22].copy_from_slice(&72u16.to_le_bytes()); // attribute_offset
    record[22..24].copy_from_slice(&1u16.to_le_bytes()); // flags: in-use
    record[32..40].copy_from_slice(&0u64.to_le_bytes()); // base_file_record

    // Boot sector BPB fields.
    record[0x0B..0x0D].copy_from_slice(&BYTES_PER_SECTOR.to_le_bytes());
    record[0x0D] = SECTORS_PER_CLUSTER;
    record[0x28..0x30].copy_from_slice(&(total_clusters * SECTORS_PER_CLUSTER as u64).to_le_bytes());
    record[0x30..0x38].copy_from_slice(&4u64.to_le_bytes()); // mft_start_lcn
    record[0x38..0x40].copy_from_slice(&100u64.to_le_bytes()); // mftmirr_start_lcn
    record[0x40] = (-10i8) as u8; // record size exponent -> 1 << 10 == 1024

    // Non-resident, unnamed $DATA: only `data_size` matters (bootstrap
    // reads the record count from it); mapping pairs are a bare terminator
    // starting right after the 64-byte non-resident header (no name).
    let attr_offset = 72usize;
    let data_size = total_records * RECORD_SIZE as u64;
    let attr_len = 72u32;
    write_attr_header(&mut record, attr_offset, 0x80, attr_len, true, 0, 0, 0);
    record[attr_offset + 32..attr_offset + 34].copy_from_slice(&64u16.to_le_bytes()); // run_array_offset
    record[attr_offset + 48..attr_offset + 56].copy_from_slice(&data_size.to_le_bytes());
    record[attr_offset + 64] = 0x00; // mapping-pairs terminator, length padded below

    let end = attr_offset + attr_len as usize;
    record[end..end + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    let bytes_in_use = (end + 8) as u32;
    record[24..28].copy_from_slice(&bytes_in_use.to_le_bytes());
    record
}

/// A plain base record (`base_file_record == 0`): resident
/// `$STANDARD_INFORMATION` + resident `$FILE_NAME`, no attribute list.
fn build_minimal_base_record(name: &str, parent_index: u64) -> Vec<u8> {
    let mut record = vec![0u8; RECORD_SIZE];
    record[0..4].copy_from_slice(b"FILE");
    record[22..24].copy_from_slice(&1u16.to_le_bytes());
    record[32..40].copy_from_slice(&0u64.to_le_bytes());
    let attr_offset: u16 = 56;
    record[20..22].copy_from_slice(&attr_offset.to_le_bytes());

    let mut offset = attr_offset as usize;

    let si_len = 24 + 36;
    write_attr_header(&mut record, offset, 0x10, si_len as u32, false, 0, 0, 0);
    record[offset + 16..offset + 20].copy_from_slice(&36u32.to_le_bytes());
    record[offset + 20..offset + 22].copy_from_slice(&24u16.to_le_bytes());
    offset += si_len;

    let name_bytes = utf16_bytes(name);
    let fn_body_len = 66 + name_bytes.len();
    let fn_len = 24 + fn_body_len;
    write_attr_header(&mut record, offset, 0x30, fn_len as u32, false, 0, 0, 1);
    record[offset + 16..offset + 20].copy_from_slice(&(fn_body_len as u32).to_le_bytes());
    record[offset + 20..offset + 22].copy_from_slice(&24u16.to_le_bytes());
    let body = offset + 24;
    record[body..body + 8].copy_from_slice(&parent_index.to_le_bytes());
    record[body + 64] = name.encode_utf16().count() as u8;
    record[body + 65] = 0x01; // WIN32
    record[body + 66..body + 66 + name_bytes.len()].copy_from_slice(&name_bytes);
    offset += fn_len;

    record[offset..offset + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    let bytes_in_use = (offset + 8) as u32;
    record[24..28].copy_from_slice(&bytes_in_use.to_le_bytes());
    record
}

fn build_corrupt_record() -> Vec<u8> {
    let mut record = vec![0u8; RECORD_SIZE];
    record[0..4].copy_from_slice(b"BAAD");
    record
}

/// A base record carrying a resident `$ATTRIBUTE_LIST` referencing three
/// named `$DATA` streams in child records 2, 3 and 4, plus one entry that
/// points back at the base record itself (to confirm Pass B skips it
/// rather than re-processing it).
fn build_base_record_with_attribute_list(name: &str) -> Vec<u8> {
    let mut record = vec![0u8; RECORD_SIZE];
    record[0..4].copy_from_slice(b"FILE");
    record[22..24].copy_from_slice(&1u16.to_le_bytes());
    record[32..40].copy_from_slice(&0u64.to_le_bytes());
    let attr_offset: u16 = 56;
    record[20..22].copy_from_slice(&attr_offset.to_le_bytes());

    let mut offset = attr_offset as usize;

    let si_len = 24 + 36;
    write_attr_header(&mut record, offset, 0x10, si_len as u32, false, 0, 0, 0);
    record[offset + 16..offset + 20].copy_from_slice(&36u32.to_le_bytes());
    record[offset + 20..offset + 22].copy_from_slice(&24u16.to_le_bytes());
    offset += si_len;

    let name_bytes = utf16_bytes(name);
    let fn_body_len = 66 + name_bytes.len();
    let fn_len = 24 + fn_body_len;
    write_attr_header(&mut record, offset, 0x30, fn_len as u32, false, 0, 0, 1);
    record[offset + 16..offset + 20].copy_from_slice(&(fn_body_len as u32).to_le_bytes());
    record[offset + 20..offset + 22].copy_from_slice(&24u16.to_le_bytes());
    let body = offset + 24;
    record[body..body + 8].copy_from_slice(&5u64.to_le_bytes()); // parent: root
    record[body + 64] = name.encode_utf16().count() as u8;
    record[body + 65] = 0x01;
    record[body + 66..body + 66 + name_bytes.len()].copy_from_slice(&name_bytes);
    offset += fn_len;

    // $ATTRIBUTE_LIST value: one self-referencing entry + three stream entries.
    let mut list = Vec::new();
    list.extend(attribute_list_entry(0x10, "", 1)); // points back at this record
    list.extend(attribute_list_entry(0x80, "stream1", 2));
    list.extend(attribute_list_entry(0x80, "stream2", 3));
    list.extend(attribute_list_entry(0x80, "stream3", 4));

    let al_len = 24 + list.len();
    write_attr_header(&mut record, offset, 0x20, al_len as u32, false, 0, 0, 2);
    record[offset + 16..offset + 20].copy_from_slice(&(list.len() as u32).to_le_bytes());
    record[offset + 20..offset + 22].copy_from_slice(&24u16.to_le_bytes());
    let body = offset + 24;
    record[body..body + list.len()].copy_from_slice(&list);
    offset += al_len;

    record[offset..offset + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    let bytes_in_use = (offset + 8) as u32;
    record[24..28].copy_from_slice(&bytes_in_use.to_le_bytes());
    record
}

/// One `ATTRIBUTE_LIST` entry, padded to at least 32 bytes
/// (`iter_attribute_list` rejects shorter declared lengths).
fn attribute_list_entry(attr_type: u32, name: &str, child_mft_index: u64) -> Vec<u8> {
    let name_bytes = utf16_bytes(name);
    let fixed_len = 26;
    let len = (fixed_len + name_bytes.len()).max(32);
    let mut entry = vec![0u8; len];
    entry[0..4].copy_from_slice(&attr_type.to_le_bytes());
    entry[4..6].copy_from_slice(&(len as u16).to_le_bytes());
    entry[6] = name.encode_utf16().count() as u8;
    entry[7] = fixed_len as u8;
    entry[8..16].copy_from_slice(&0u64.to_le_bytes()); // low_vcn
    entry[16..24].copy_from_slice(&child_mft_index.to_le_bytes());
    entry[24..26].copy_from_slice(&0u16.to_le_bytes()); // instance
    if !name_bytes.is_empty() {
        entry[fixed_len..fixed_len + name_bytes.len()].copy_from_slice(&name_bytes);
    }
    entry
}

/// A child record (`base_file_record == base_index`) holding one named,
/// non-resident `$DATA` attribute with a single run at `lcn`.
fn build_named_data_child_record(base_index: u64, stream_name: &str, lcn: u64, len: u64) -> Vec<u8> {
    let mut record = vec![0u8; RECORD_SIZE];
    record[0..4].copy_from_slice(b"FILE");
    record[22..24].copy_from_slice(&1u16.to_le_bytes());
    record[32..40].copy_from_slice(&base_index.to_le_bytes());
    let attr_offset: u16 = 56;
    record[20..22].copy_from_slice(&attr_offset.to_le_bytes());

    let offset = attr_offset as usize;
    let name_bytes = utf16_bytes(stream_name);
    let name_offset = 64u16;
    let mapping_pairs = [0x11u8, len as u8, lcn as u8, 0x00u8];
    let run_array_offset = name_offset as usize + name_bytes.len();
    let attr_len = run_array_offset + mapping_pairs.len();

    write_attr_header(
        &mut record,
        offset,
        0x80,
        attr_len as u32,
        true,
        stream_name.encode_utf16().count() as u8,
        name_offset,
        0,
    );
    record[offset + 16..offset + 24].copy_from_slice(&0u64.to_le_bytes()); // low_vcn
    record[offset + 32..offset + 34].copy_from_slice(&(run_array_offset as u16).to_le_bytes());
    let data_size = len * BYTES_PER_CLUSTER as u64;
    record[offset + 48..offset + 56].copy_from_slice(&data_size.to_le_bytes());
    let name_start = offset + name_offset as usize;
    record[name_start..name_start + name_bytes.len()].copy_from_slice(&name_bytes);
    let mp_start = offset + run_array_offset;
    record[mp_start..mp_start + mapping_pairs.len()].copy_from_slice(&mapping_pairs);

    let end = offset + attr_len;
    record[end..end + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    let bytes_in_use = (end + 8) as u32;
    record[24..28].copy_from_slice(&bytes_in_use.to_le_bytes());
    record
}

// ── Tests ────────────────────────────────────────────────────────────────

/// Spec scenario: "MFT of 10 records, record 7 has invalid type signature."
/// With `allow_partial_scan` set, the scan succeeds, skips the corrupt
/// record, counts it, and keeps the other nine.
#[test]
fn partial_scan_skips_corrupt_record_and_counts_it() {
    let mut vol = mock_host(1000, BYTES_PER_CLUSTER);
    let mut records = vec![build_mft_record(10, 1000)];
    for i in 1..10u64 {
        if i == 7 {
            records.push(build_corrupt_record());
        } else {
            records.push(build_minimal_base_record(&format!("file{i}.txt"), 5));
        }
    }
    vol.set_mft_records(records);

    let result = mft::scan(&vol, &AcceptAll, &NullProgressSink, ScanOptions { allow_partial_scan: true }, "C:\\")
        .expect("partial scan should succeed");

    assert_eq!(result.error_count, 1);
    assert_eq!(result.model.files.len(), 9);
    assert!(result.model.file_by_mft_index(MftIndex(7)).is_none());
    for i in [0u64, 1, 2, 3, 4, 5, 6, 8, 9] {
        assert!(
            result.model.file_by_mft_index(MftIndex(i)).is_some(),
            "expected record {i} to be present"
        );
    }
}

/// Same MFT, but without `allow_partial_scan`: the whole scan must fail on
/// the first unreadable record and hand back no entries.
#[test]
fn scan_without_partial_flag_fails_hard_on_corrupt_record() {
    let mut vol = mock_host(1000, BYTES_PER_CLUSTER);
    let mut records = vec![build_mft_record(10, 1000)];
    for i in 1..10u64 {
        if i == 7 {
            records.push(build_corrupt_record());
        } else {
            records.push(build_minimal_base_record(&format!("file{i}.txt"), 5));
        }
    }
    vol.set_mft_records(records);

    let err = mft::scan(&vol, &AcceptAll, &NullProgressSink, ScanOptions { allow_partial_scan: false }, "C:\\")
        .expect_err("scan should fail without allow_partial_scan");

    assert!(matches!(err, CoreError::MftUnreadable { error_count: 1 }));
}

/// Spec scenario: a file with three named streams whose `$DATA` attributes
/// live in three different child records referenced by an `ATTRIBUTE_LIST`
/// in the base record. The scan must produce three distinct streams, each
/// with its own extent, and must not duplicate the entry that references
/// the base record itself.
#[test]
fn attribute_list_traversal_collects_streams_from_child_records() {
    let mut vol = mock_host(200, BYTES_PER_CLUSTER);
    vol.set_mft_records(vec![
        build_mft_record(5, 200),
        build_base_record_with_attribute_list("multi.bin"),
        build_named_data_child_record(1, "stream1", 50, 5),
        build_named_data_child_record(1, "stream2", 60, 5),
        build_named_data_child_record(1, "stream3", 70, 5),
    ]);

    let result = mft::scan(&vol, &AcceptAll, &NullProgressSink, ScanOptions::default(), "C:\\")
        .expect("scan should succeed");

    assert_eq!(result.error_count, 0);
    let file_id = result
        .model
        .file_by_mft_index(MftIndex(1))
        .expect("base record should produce a file entry");
    let file = result.model.file(file_id);
    assert_eq!(file.streams.len(), 3, "base-referencing entry must not be duplicated");

    let mut seen = Vec::new();
    for &stream_id in &file.streams {
        let stream = result.model.stream(stream_id);
        assert_eq!(stream.extents.len(), 1);
        seen.push(stream.name.clone());
    }
    for expected in ["stream1", "stream2", "stream3"] {
        assert!(seen.iter().any(|n| n.as_str() == expected), "missing stream {expected}");
    }
}
