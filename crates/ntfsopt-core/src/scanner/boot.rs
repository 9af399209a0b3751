//! NTFS boot sector parsing (spec §4.1 "Bootstrap").
//!
//! Layout is the standard NTFS BIOS Parameter Block; field offsets are fixed
//! by the NTFS on-disk format and are not expected to change across NTFS
//! revisions (grounded in `ftw_ntfs.c`'s own boot-sector reader in the
//! original sources, which reads the same offsets by hand).
use crate::error::{CoreError, Result};
use crate::host::Volume;
use crate::types::Lcn;

/// Decoded fields the scanner needs out of the boot sector (spec §4.1
/// "Bootstrap": bytes per sector, sectors per cluster, file-record size,
/// MFT starting LCN).
#[derive(Debug, Clone, Copy)]
pub struct BootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub mft_start_lcn: Lcn,
    pub mftmirr_start_lcn: Lcn,
    pub bytes_per_file_record: u32,
    pub total_sectors: u64,
}

impl BootSector {
    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector as u32 * self.sectors_per_cluster as u32
    }

    pub fn total_clusters(&self) -> u64 {
        self.total_sectors / self.sectors_per_cluster.max(1) as u64
    }
}

/// Read and decode the boot sector (always cluster 0 / sector 0).
pub fn read_boot_sector(volume: &dyn Volume) -> Result<BootSector> {
    let raw = volume
        .volume_read(0, 512)
        .map_err(|e| CoreError::HostIo(e.0))?;
    if raw.len() < 512 {
        return Err(CoreError::HostIo("boot sector read truncated".into()));
    }

    let bytes_per_sector = u16::from_le_bytes([raw[0x0B], raw[0x0C]]);
    let sectors_per_cluster = raw[0x0D];
    let total_sectors = u64::from_le_bytes(raw[0x28..0x30].try_into().unwrap());
    let mft_start_cluster = u64::from_le_bytes(raw[0x30..0x38].try_into().unwrap());
    let mftmirr_start_cluster = u64::from_le_bytes(raw[0x38..0x40].try_into().unwrap());

    // Clusters-per-file-record-segment: a signed byte. Positive means "this
    // many clusters"; zero or negative means "1 << -value" bytes (spec §4.1
    // "may be given as a signed exponent when <= 0").
    let clusters_per_record = raw[0x40] as i8;
    let bytes_per_cluster = bytes_per_sector as u32 * sectors_per_cluster.max(1) as u32;
    let bytes_per_file_record: u32 = if clusters_per_record > 0 {
        clusters_per_record as u32 * bytes_per_cluster
    } else {
        1u32 << (-(clusters_per_record as i32)) as u32
    };

    if bytes_per_sector == 0 || sectors_per_cluster == 0 {
        return Err(CoreError::HostIo("boot sector reports zero-size sector/cluster".into()));
    }

    Ok(BootSector {
        bytes_per_sector,
        sectors_per_cluster,
        mft_start_lcn: Lcn(mft_start_cluster),
        mftmirr_start_lcn: Lcn(mftmirr_start_cluster),
        bytes_per_file_record,
        total_sectors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::mock_host;

    fn write_boot_sector(sectors_per_cluster: u8, record_size_byte: i8) -> Vec<u8> {
        let mut raw = vec![0u8; 512];
        raw[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
        raw[0x0D] = sectors_per_cluster;
        raw[0x28..0x30].copy_from_slice(&200_000u64.to_le_bytes());
        raw[0x30..0x38].copy_from_slice(&4u64.to_le_bytes());
        raw[0x38..0x40].copy_from_slice(&100_000u64.to_le_bytes());
        raw[0x40] = record_size_byte as u8;
        raw
    }

    #[test]
    fn decodes_positive_clusters_per_record() {
        let vol = mock_host(1000, 4096);
        vol.set_mft_records(vec![write_boot_sector(8, 1)]);
        let boot = read_boot_sector(&vol).unwrap();
        assert_eq!(boot.bytes_per_sector, 512);
        assert_eq!(boot.sectors_per_cluster, 8);
        assert_eq!(boot.bytes_per_file_record, 4096);
        assert_eq!(boot.mft_start_lcn, Lcn(4));
    }

    #[test]
    fn decodes_negative_exponent_record_size() {
        let vol = mock_host(1000, 4096);
        // -10 -> record size 1 << 10 == 1024 bytes, the common case.
        vol.set_mft_records(vec![write_boot_sector(8, -10)]);
        let boot = read_boot_sector(&vol).unwrap();
        assert_eq!(boot.bytes_per_file_record, 1024);
    }
}
