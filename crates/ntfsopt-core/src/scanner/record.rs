//! Low-level MFT record and attribute parsing (spec §4.1 "Attribute
//! enumeration", "Runlist decoding"). Field offsets are grounded in the
//! `FILE_RECORD_HEADER` / `ATTRIBUTE` / `NONRESIDENT_ATTRIBUTE` layouts from
//! `ntfs.h` in the original sources.
use crate::types::{ClusterCount, Lcn, Vcn};

/// Recognized attribute type codes (spec §4.1 "the attribute type is one of
/// the recognized values"; `ntfs.h` `ATTRIBUTE_TYPE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    StandardInformation,
    AttributeList,
    FileName,
    ObjectId,
    SecurityDescriptor,
    VolumeName,
    VolumeInformation,
    Data,
    IndexRoot,
    IndexAllocation,
    Bitmap,
    ReparsePoint,
    EaInformation,
    Ea,
    PropertySet,
    LoggedUtilityStream,
    /// Any value not in the recognized set. Non-data unknowns are skipped
    /// silently; unknown data-bearing attributes (any non-resident
    /// attribute) must not terminate the scan (spec §4.1).
    Unknown(u32),
}

impl AttributeType {
    pub fn from_code(code: u32) -> Self {
        match code {
            0x10 => Self::StandardInformation,
            0x20 => Self::AttributeList,
            0x30 => Self::FileName,
            0x40 => Self::ObjectId,
            0x50 => Self::SecurityDescriptor,
            0x60 => Self::VolumeName,
            0x70 => Self::VolumeInformation,
            0x80 => Self::Data,
            0x90 => Self::IndexRoot,
            0xA0 => Self::IndexAllocation,
            0xB0 => Self::Bitmap,
            0xC0 => Self::ReparsePoint,
            0xD0 => Self::EaInformation,
            0xE0 => Self::Ea,
            0xF0 => Self::PropertySet,
            0x100 => Self::LoggedUtilityStream,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::StandardInformation => 0x10,
            Self::AttributeList => 0x20,
            Self::FileName => 0x30,
            Self::ObjectId => 0x40,
            Self::SecurityDescriptor => 0x50,
            Self::VolumeName => 0x60,
            Self::VolumeInformation => 0x70,
            Self::Data => 0x80,
            Self::IndexRoot => 0x90,
            Self::IndexAllocation => 0xA0,
            Self::Bitmap => 0xB0,
            Self::ReparsePoint => 0xC0,
            Self::EaInformation => 0xD0,
            Self::Ea => 0xE0,
            Self::PropertySet => 0xF0,
            Self::LoggedUtilityStream => 0x100,
            Self::Unknown(code) => code,
        }
    }
}

/// End-of-attribute-list sentinel values (spec §4.1: "stop on the end
/// sentinel (`0xffffffff` or type `0x0`) or a length of zero").
const ATTR_END_MARKER: u32 = 0xFFFF_FFFF;

const ATTRIBUTE_HEADER_SIZE: usize = 16;
const RESIDENT_HEADER_SIZE: usize = 24;
/// `NONRESIDENT_ATTRIBUTE` minus the optional trailing `CompressedSize`
/// field (spec §4.1 "non-resident ≥ non-resident-header minus
/// CompressedSize").
const NONRESIDENT_HEADER_SIZE_MIN: usize = 64;

/// One parsed attribute header, resident or non-resident.
#[derive(Debug, Clone)]
pub struct ParsedAttribute<'a> {
    pub attr_type: AttributeType,
    pub non_resident: bool,
    pub name: String,
    pub instance: u16,
    pub body: AttributeBody<'a>,
}

#[derive(Debug, Clone)]
pub enum AttributeBody<'a> {
    Resident { value: &'a [u8] },
    NonResident {
        low_vcn: u64,
        mapping_pairs: &'a [u8],
        data_size: u64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record is not a FILE record")]
    NotFileRecord,
    #[error("record in-use flag clear")]
    NotInUse,
    #[error("bytes-in-use exceeds record size")]
    BytesInUseOutOfRange,
    #[error("attribute at offset {offset} is truncated")]
    TruncatedAttribute { offset: usize },
    #[error("attribute at offset {offset} extends past the record")]
    AttributeOutOfRange { offset: usize },
}

/// Fixed fields the scanner reads straight out of `FILE_RECORD_HEADER`
/// (spec §4.1: record header type signature, in-use flag, attribute
/// offset, bytes-in-use, base file record).
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub bytes_in_use: u32,
    pub attribute_offset: u16,
    pub base_file_record: u64,
    pub is_directory: bool,
}

const FLAG_IN_USE: u16 = 0x1;
const FLAG_DIRECTORY: u16 = 0x2;

/// Validate and decode a record's fixed header (spec §4.1 "A record is
/// ignored when its header type signature is not `FILE`, its in-use flag is
/// clear, or its declared byte-count exceeds the record size").
pub fn read_record_header(record: &[u8]) -> Result<RecordHeader, RecordError> {
    if record.len() < 42 || &record[0..4] != b"FILE" {
        return Err(RecordError::NotFileRecord);
    }
    let flags = u16::from_le_bytes([record[22], record[23]]);
    if flags & FLAG_IN_USE == 0 {
        return Err(RecordError::NotInUse);
    }
    let bytes_in_use = u32::from_le_bytes(record[24..28].try_into().unwrap());
    if bytes_in_use as usize > record.len() {
        return Err(RecordError::BytesInUseOutOfRange);
    }
    let attribute_offset = u16::from_le_bytes([record[20], record[21]]);
    let base_file_record = u64::from_le_bytes(record[32..40].try_into().unwrap()) & 0x0000_FFFF_FFFF_FFFF;

    Ok(RecordHeader {
        bytes_in_use,
        attribute_offset,
        base_file_record,
        is_directory: flags & FLAG_DIRECTORY != 0,
    })
}

/// Iterate the attributes of one record starting at `header.attribute_offset`,
/// stopping at the end sentinel, a zero length, or the first structurally
/// invalid attribute (spec §4.1 "Attribute enumeration").
pub fn iter_attributes<'a>(
    record: &'a [u8],
    header: &RecordHeader,
) -> impl Iterator<Item = Result<ParsedAttribute<'a>, RecordError>> + 'a {
    let bytes_in_use = header.bytes_in_use as usize;
    let mut offset = header.attribute_offset as usize;
    let record_len = record.len();
    let mut done = false;

    std::iter::from_fn(move || {
        if done {
            return None;
        }
        loop {
            if offset + 4 > record_len {
                done = true;
                return None;
            }
            let attr_type_code = u32::from_le_bytes(record[offset..offset + 4].try_into().unwrap());
            if attr_type_code == ATTR_END_MARKER || attr_type_code == 0 {
                done = true;
                return None;
            }

            if offset + ATTRIBUTE_HEADER_SIZE > record_len {
                done = true;
                return Some(Err(RecordError::TruncatedAttribute { offset }));
            }
            let length = u32::from_le_bytes(record[offset + 4..offset + 8].try_into().unwrap()) as usize;
            if length == 0 {
                done = true;
                return None;
            }
            if offset + length > bytes_in_use || offset + length > record_len {
                done = true;
                return Some(Err(RecordError::AttributeOutOfRange { offset }));
            }

            let non_resident = record[offset + 8] != 0;
            let name_length = record[offset + 9] as usize;
            let name_offset = u16::from_le_bytes([record[offset + 10], record[offset + 11]]) as usize;
            let instance = u16::from_le_bytes([record[offset + 14], record[offset + 15]]);

            let min_header = if non_resident {
                NONRESIDENT_HEADER_SIZE_MIN
            } else {
                RESIDENT_HEADER_SIZE
            };
            if length < min_header {
                // Unknown/malformed non-data attributes are skipped
                // silently; we treat an undersized header as skippable
                // rather than scan-terminating, matching "unknown types are
                // skipped silently only for non-data attributes" — a
                // truncated header carries no usable data either way.
                offset += length;
                continue;
            }

            let name = if name_length > 0 {
                let name_start = offset + name_offset;
                let name_bytes_len = name_length * 2;
                if name_start + name_bytes_len > offset + length {
                    offset += length;
                    continue;
                }
                let name_bytes = &record[name_start..name_start + name_bytes_len];
                decode_utf16_name(name_bytes)
            } else {
                String::new()
            };

            let attr_type = AttributeType::from_code(attr_type_code);
            let is_data_bearing = matches!(
                attr_type,
                AttributeType::Data | AttributeType::IndexAllocation | AttributeType::Unknown(_)
            ) || non_resident;

            if matches!(attr_type, AttributeType::Unknown(_)) && !non_resident && !is_data_bearing {
                offset += length;
                continue;
            }

            let body = if non_resident {
                let low_vcn = u64::from_le_bytes(record[offset + 16..offset + 24].try_into().unwrap());
                let run_array_offset =
                    u16::from_le_bytes([record[offset + 32], record[offset + 33]]) as usize;
                let data_size = u64::from_le_bytes(record[offset + 48..offset + 56].try_into().unwrap());
                let mp_start = offset + run_array_offset;
                if mp_start > offset + length {
                    offset += length;
                    continue;
                }
                AttributeBody::NonResident {
                    low_vcn,
                    mapping_pairs: &record[mp_start..offset + length],
                    data_size,
                }
            } else {
                let value_length =
                    u32::from_le_bytes(record[offset + 16..offset + 20].try_into().unwrap()) as usize;
                let value_offset =
                    u16::from_le_bytes([record[offset + 20], record[offset + 21]]) as usize;
                let value_start = offset + value_offset;
                let value_end = value_start + value_length;
                if value_end > offset + length || value_end > record_len {
                    offset += length;
                    continue;
                }
                AttributeBody::Resident { value: &record[value_start..value_end] }
            };

            let result = ParsedAttribute { attr_type, non_resident, name, instance, body };
            offset += length;
            return Some(Ok(result));
        }
    })
}

fn decode_utf16_name(bytes: &[u8]) -> String {
    char::decode_utf16(bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])))
        .map(|r| r.unwrap_or('\u{FFFD}'))
        .collect()
}

/// Decode a `$FILE_NAME` attribute's resident value: directory reference,
/// timestamps, name (spec §4.1 Pass A `FILE_NAME`).
pub struct FileNameAttr {
    pub parent_mft_index: u64,
    pub created: u64,
    pub modified: u64,
    pub accessed: u64,
    pub name_type: u8,
    pub name: String,
}

pub fn parse_file_name(value: &[u8]) -> Option<FileNameAttr> {
    if value.len() < 66 {
        return None;
    }
    let parent_ref = u64::from_le_bytes(value[0..8].try_into().unwrap()) & 0x0000_FFFF_FFFF_FFFF;
    let created = u64::from_le_bytes(value[8..16].try_into().unwrap());
    let modified = u64::from_le_bytes(value[24..32].try_into().unwrap());
    let accessed = u64::from_le_bytes(value[32..40].try_into().unwrap());
    let name_length = value[64] as usize;
    let name_type = value[65];
    let name_start = 66;
    let name_bytes_len = name_length * 2;
    if name_start + name_bytes_len > value.len() {
        return None;
    }
    let name = decode_utf16_name(&value[name_start..name_start + name_bytes_len]);
    Some(FileNameAttr {
        parent_mft_index: parent_ref,
        created,
        modified,
        accessed,
        name_type,
        name,
    })
}

/// `$STANDARD_INFORMATION` flags (spec §4.1 Pass A).
pub fn parse_standard_information_flags(value: &[u8]) -> Option<u32> {
    if value.len() < 36 {
        return None;
    }
    Some(u32::from_le_bytes(value[32..36].try_into().unwrap()))
}

/// `$VOLUME_INFORMATION` (spec §4.1 Pass A, record 3 only): NTFS version and
/// dirty bit.
pub struct VolumeInformationAttr {
    pub major_version: u8,
    pub minor_version: u8,
    pub is_dirty: bool,
}

pub fn parse_volume_information(value: &[u8]) -> Option<VolumeInformationAttr> {
    if value.len() < 12 {
        return None;
    }
    let major_version = value[8];
    let minor_version = value[9];
    let flags = u16::from_le_bytes([value[10], value[11]]);
    Some(VolumeInformationAttr {
        major_version,
        minor_version,
        is_dirty: flags & 0x1 != 0,
    })
}

/// One reference from an `$ATTRIBUTE_LIST` entry (spec §4.1 Pass B): the
/// (type, name, instance) triple plus the child record index it lives in.
#[derive(Debug, Clone)]
pub struct AttributeListEntry {
    pub attr_type: AttributeType,
    pub name: String,
    pub low_vcn: u64,
    pub child_mft_index: u64,
    pub instance: u16,
}

/// Walk the entries of an `$ATTRIBUTE_LIST` attribute's value (spec §4.1
/// Pass B). Each entry's declared `Length` advances the cursor; a
/// zero/short length stops iteration defensively.
pub fn iter_attribute_list(value: &[u8]) -> impl Iterator<Item = AttributeListEntry> + '_ {
    let mut offset = 0usize;
    std::iter::from_fn(move || {
        loop {
            if offset + 32 > value.len() {
                return None;
            }
            let attr_type_code = u32::from_le_bytes(value[offset..offset + 4].try_into().unwrap());
            let length = u16::from_le_bytes([value[offset + 4], value[offset + 5]]) as usize;
            if length < 32 || offset + length > value.len() {
                return None;
            }
            let name_length = value[offset + 6] as usize;
            let name_offset = value[offset + 7] as usize;
            let low_vcn = u64::from_le_bytes(value[offset + 8..offset + 16].try_into().unwrap());
            let frn = u64::from_le_bytes(value[offset + 16..offset + 24].try_into().unwrap());
            let instance = u16::from_le_bytes([value[offset + 24], value[offset + 25]]);

            let name = if name_length > 0 {
                let name_start = offset + name_offset;
                let name_len_bytes = name_length * 2;
                if name_start + name_len_bytes > offset + length {
                    offset += length;
                    continue;
                }
                decode_utf16_name(&value[name_start..name_start + name_len_bytes])
            } else {
                String::new()
            };

            let entry = AttributeListEntry {
                attr_type: AttributeType::from_code(attr_type_code),
                name,
                low_vcn,
                child_mft_index: frn & 0x0000_FFFF_FFFF_FFFF,
                instance,
            };
            offset += length;
            return Some(entry);
        }
    })
}

/// Decode a mapping-pairs (runlist) byte stream into `(vcn, lcn, length)`
/// triples (spec §4.1 "Runlist decoding"). `start_vcn` seeds the running
/// VCN; the running LCN starts at zero and accumulates signed deltas.
pub fn decode_runlist(mapping_pairs: &[u8], start_vcn: u64) -> Vec<(Vcn, Lcn, ClusterCount)> {
    let mut runs = Vec::new();
    let mut pos = 0usize;
    let mut vcn = start_vcn;
    let mut lcn: i64 = 0;

    while pos < mapping_pairs.len() {
        let header = mapping_pairs[pos];
        if header == 0 {
            break; // terminator byte
        }
        let count_len = (header & 0x0F) as usize;
        let offset_len = ((header >> 4) & 0x0F) as usize;
        pos += 1;

        if count_len == 0 || pos + count_len > mapping_pairs.len() {
            break;
        }
        let count = read_le_unsigned(&mapping_pairs[pos..pos + count_len]);
        pos += count_len;

        let length = ClusterCount(count);

        if offset_len == 0 {
            // Sparse run: no LCN delta, the run occupies no physical clusters.
            runs.push((Vcn(vcn), Lcn::SPARSE, length));
        } else {
            if pos + offset_len > mapping_pairs.len() {
                break;
            }
            let delta = read_le_signed(&mapping_pairs[pos..pos + offset_len]);
            pos += offset_len;
            lcn += delta;
            if lcn < 0 {
                break;
            }
            runs.push((Vcn(vcn), Lcn(lcn as u64), length));
        }

        vcn += count;
    }

    runs
}

fn read_le_unsigned(bytes: &[u8]) -> u64 {
    let mut value = 0u64;
    for (i, &b) in bytes.iter().enumerate() {
        value |= (b as u64) << (8 * i);
    }
    value
}

fn read_le_signed(bytes: &[u8]) -> i64 {
    let mut value = read_le_unsigned(bytes) as i64;
    let bits = bytes.len() * 8;
    if bits < 64 && bytes.last().is_some_and(|&b| b & 0x80 != 0) {
        value -= 1i64 << bits;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_runlist_simple_positive_delta() {
        // header 0x31: count_len=1, offset_len=3; count=0x0A, offset=0x001000
        let bytes = [0x31, 0x0A, 0x00, 0x10, 0x00, 0x00];
        let runs = decode_runlist(&bytes, 0);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, Vcn(0));
        assert_eq!(runs[0].1, Lcn(0x001000));
        assert_eq!(runs[0].2, ClusterCount(0x0A));
    }

    #[test]
    fn decode_runlist_sparse_run_has_no_offset_bytes() {
        // header 0x01: count_len=1, offset_len=0 -> sparse.
        let bytes = [0x01, 0x05];
        let runs = decode_runlist(&bytes, 0);
        assert_eq!(runs.len(), 1);
        assert!(runs[0].1.is_sparse());
        assert_eq!(runs[0].2, ClusterCount(5));
    }

    #[test]
    fn decode_runlist_negative_delta_moves_lcn_backward() {
        // First run at LCN 100, second run with a negative 1-byte delta (-20).
        let bytes = [
            0x11, 0x0A, 100, // count=10, offset=+100
            0x11, 0x05, (-20i8) as u8, // count=5, offset=-20 -> lcn = 80
        ];
        let runs = decode_runlist(&bytes, 0);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].1, Lcn(100));
        assert_eq!(runs[1].1, Lcn(80));
        assert_eq!(runs[1].0, Vcn(10));
    }

    #[test]
    fn decode_runlist_stops_at_terminator() {
        let bytes = [0x11, 0x0A, 50, 0x00, 0xFF, 0xFF];
        let runs = decode_runlist(&bytes, 0);
        assert_eq!(runs.len(), 1);
    }
}
