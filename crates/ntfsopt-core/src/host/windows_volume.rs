//! Real `Host` implementation backed by `\\.\X:` raw volume handles (spec
//! §6: the production implementation of the host primitives).
//!
//! Uses the same raw-handle-plus-`DeviceIoControl` idiom as the MFT direct
//! reader: open the volume once with `GENERIC_READ`/`GENERIC_WRITE`, then
//! issue `FSCTL_GET_NTFS_VOLUME_DATA`, `FSCTL_GET_VOLUME_BITMAP`,
//! `FSCTL_GET_RETRIEVAL_POINTERS` and `FSCTL_MOVE_FILE` against that handle.
use crate::host::{BitmapChunk, Clock, ExtentQuery, Host, HostError, MoveExtent, StreamRef, Volume, VolumeInfo};
use crate::types::{ClusterCount, Lcn, MftIndex, Vcn};
use std::ffi::c_void;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::time::Instant;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::Ioctl::{
    FSCTL_GET_NTFS_VOLUME_DATA, FSCTL_GET_RETRIEVAL_POINTERS, FSCTL_GET_VOLUME_BITMAP,
    FSCTL_MOVE_FILE, NTFS_VOLUME_DATA_BUFFER,
};
use windows::Win32::System::IO::DeviceIoControl;

const GENERIC_READ: u32 = 0x8000_0000;
const GENERIC_WRITE: u32 = 0x4000_0000;

/// A host backed by an open `\\.\X:` volume handle.
///
/// `record_size` is cached from `FSCTL_GET_NTFS_VOLUME_DATA` at construction
/// time since it never changes for the lifetime of a mounted volume.
pub struct WindowsVolume {
    handle: HANDLE,
    drive_letter: char,
    bytes_per_cluster: u32,
    bytes_per_sector: u16,
    total_clusters: u64,
    record_size: u32,
    mft_start_lcn: u64,
}

// SAFETY: the handle is only ever used through `&self` methods that issue
// synchronous `DeviceIoControl`/`ReadFile` calls; Win32 file handles are
// safe to share across threads for that usage pattern.
unsafe impl Send for WindowsVolume {}
unsafe impl Sync for WindowsVolume {}

impl WindowsVolume {
    /// Open the raw volume handle for `drive_letter` (e.g. `'C'`) and cache
    /// its NTFS geometry.
    pub fn open(drive_letter: char) -> Result<Self, HostError> {
        let vol_path = format!("\\\\.\\{drive_letter}:");
        let vol_wide: Vec<u16> = std::ffi::OsStr::new(&vol_path)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let handle = unsafe {
            CreateFileW(
                PCWSTR(vol_wide.as_ptr()),
                GENERIC_READ | GENERIC_WRITE,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                Default::default(),
                None,
            )
        }
        .map_err(|e| HostError::new(format!("failed to open {vol_path}: {e}")))?;

        let vol_data = get_ntfs_volume_data(handle).ok_or_else(|| {
            HostError::new(format!("{vol_path}: FSCTL_GET_NTFS_VOLUME_DATA failed"))
        })?;

        Ok(Self {
            handle,
            drive_letter,
            bytes_per_cluster: vol_data.BytesPerCluster,
            bytes_per_sector: vol_data.BytesPerSector as u16,
            total_clusters: vol_data.TotalClusters.QuadPart as u64,
            record_size: vol_data.BytesPerFileRecordSegment,
            mft_start_lcn: vol_data.MftStartLcn.QuadPart as u64,
        })
    }

    pub fn drive_letter(&self) -> char {
        self.drive_letter
    }

    pub fn mft_start_lcn(&self) -> Lcn {
        Lcn(self.mft_start_lcn)
    }
}

impl Drop for WindowsVolume {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

fn get_ntfs_volume_data(handle: HANDLE) -> Option<NTFS_VOLUME_DATA_BUFFER> {
    let mut vol_data: NTFS_VOLUME_DATA_BUFFER = unsafe { std::mem::zeroed() };
    let mut bytes_returned: u32 = 0;

    let ok = unsafe {
        DeviceIoControl(
            handle,
            FSCTL_GET_NTFS_VOLUME_DATA,
            None,
            0,
            Some(&mut vol_data as *mut NTFS_VOLUME_DATA_BUFFER as *mut c_void),
            std::mem::size_of::<NTFS_VOLUME_DATA_BUFFER>() as u32,
            Some(&mut bytes_returned),
            None,
        )
    };

    ok.is_ok().then_some(vol_data)
}

impl Volume for WindowsVolume {
    fn volume_read(&self, offset: u64, len: usize) -> Result<Vec<u8>, HostError> {
        use windows::Win32::Storage::FileSystem::{ReadFile, SetFilePointerEx, FILE_BEGIN};

        let mut buf = vec![0u8; len];
        unsafe {
            SetFilePointerEx(self.handle, offset as i64, None, FILE_BEGIN)
                .map_err(|e| HostError::new(format!("seek to {offset}: {e}")))?;
        }

        let mut bytes_read = 0u32;
        unsafe {
            ReadFile(self.handle, Some(&mut buf), Some(&mut bytes_read), None)
                .map_err(|e| HostError::new(format!("read at {offset}: {e}")))?;
        }
        buf.truncate(bytes_read as usize);
        Ok(buf)
    }

    fn volume_bitmap(&self, start_lcn: Lcn) -> Result<BitmapChunk, HostError> {
        #[repr(C)]
        struct VolumeBitmapBuffer {
            starting_lcn: i64,
            bitmap_size: i64,
            // Followed by `bitmap_size` bits, read out manually below.
        }

        const CHUNK_BYTES: usize = 256 * 1024;
        let mut output_buf = vec![0u8; std::mem::size_of::<VolumeBitmapBuffer>() + CHUNK_BYTES];
        let input: i64 = start_lcn.0 as i64;
        let mut bytes_returned = 0u32;

        let ok = unsafe {
            DeviceIoControl(
                self.handle,
                FSCTL_GET_VOLUME_BITMAP,
                Some(&input as *const i64 as *const c_void),
                std::mem::size_of::<i64>() as u32,
                Some(output_buf.as_mut_ptr() as *mut c_void),
                output_buf.len() as u32,
                Some(&mut bytes_returned),
                None,
            )
        };

        // STATUS_BUFFER_OVERFLOW surfaces as Ok(()) with partial data filled
        // in here since `windows` maps the NTSTATUS itself; either way the
        // header tells us how many bits actually came back.
        if ok.is_err() && bytes_returned < std::mem::size_of::<VolumeBitmapBuffer>() as u32 {
            return Err(HostError::new("FSCTL_GET_VOLUME_BITMAP failed"));
        }

        let header = unsafe { &*(output_buf.as_ptr() as *const VolumeBitmapBuffer) };
        let returned_bits = (bytes_returned as usize)
            .saturating_sub(std::mem::size_of::<VolumeBitmapBuffer>())
            * 8;
        let bits_in_chunk = (header.bitmap_size as usize).min(returned_bits);
        let bytes_in_chunk = bits_in_chunk.div_ceil(8);

        let data_start = std::mem::size_of::<VolumeBitmapBuffer>();
        let bits = output_buf[data_start..data_start + bytes_in_chunk].to_vec();

        let next_lcn = header.starting_lcn as u64 + bits_in_chunk as u64;
        let next_start = if next_lcn < self.total_clusters {
            Some(Lcn(next_lcn))
        } else {
            None
        };

        Ok(BitmapChunk { bits, next_start })
    }

    fn mft_record(&self, index: MftIndex, record_size: usize) -> Result<Vec<u8>, HostError> {
        let offset = self.mft_start_lcn * self.bytes_per_cluster as u64 + index.0 * record_size as u64;
        self.volume_read(offset, record_size)
    }

    fn volume_info(&self) -> Result<VolumeInfo, HostError> {
        Ok(VolumeInfo {
            bytes_per_cluster: self.bytes_per_cluster,
            bytes_per_sector: self.bytes_per_sector,
            total_clusters: self.total_clusters,
            free_clusters: 0,
        })
    }
}

/// Resolve a `StreamRef` to an open handle via `OpenFileById`, keyed on the
/// base MFT record number rather than a path, so a file renamed or moved
/// between the scan and the move is still addressed correctly (spec §4.4
/// "moves address files by reference, not by path").
fn open_by_file_reference(volume_handle: HANDLE, mft_index: MftIndex) -> Result<HANDLE, HostError> {
    use windows::Win32::Storage::FileSystem::{
        OpenFileById, FILE_FLAG_BACKUP_SEMANTICS, FILE_ID_DESCRIPTOR, FILE_ID_DESCRIPTOR_0,
        FILE_ID_TYPE,
    };

    let descriptor = FILE_ID_DESCRIPTOR {
        dwSize: std::mem::size_of::<FILE_ID_DESCRIPTOR>() as u32,
        Type: FILE_ID_TYPE(0), // FileIdType: plain 64-bit MFT reference number.
        Anonymous: FILE_ID_DESCRIPTOR_0 { FileId: mft_index.0 as i64 },
    };

    unsafe {
        OpenFileById(
            volume_handle,
            &descriptor,
            (GENERIC_READ | GENERIC_WRITE).into(),
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            None,
            FILE_FLAG_BACKUP_SEMANTICS,
        )
    }
    .map_err(|e| HostError::new(format!("OpenFileById({:#x}): {e}", mft_index.0)))
}

impl ExtentQuery for WindowsVolume {
    fn extent_query(&self, stream: &StreamRef) -> Result<Vec<(Vcn, Lcn, ClusterCount)>, HostError> {
        #[repr(C)]
        struct StartingVcnInputBuffer {
            starting_vcn: i64,
        }
        #[repr(C)]
        struct RetrievalPointerRaw {
            vcn: i64,
            lcn: i64,
        }
        #[repr(C)]
        struct RetrievalPointersBuffer {
            extent_count: u32,
            _padding: u32,
            starting_vcn: i64,
            // followed by `extent_count` `RetrievalPointerRaw`s
        }

        let file_handle = open_by_file_reference(self.drive_letter, stream.mft_index)?;

        let mut starting_vcn = StartingVcnInputBuffer { starting_vcn: 0 };
        let mut extents = Vec::new();

        loop {
            let mut output_buf =
                vec![0u8; std::mem::size_of::<RetrievalPointersBuffer>() + std::mem::size_of::<RetrievalPointerRaw>() * 64];
            let mut bytes_returned = 0u32;

            let status = unsafe {
                DeviceIoControl(
                    file_handle,
                    FSCTL_GET_RETRIEVAL_POINTERS,
                    Some(&starting_vcn as *const StartingVcnInputBuffer as *const c_void),
                    std::mem::size_of::<StartingVcnInputBuffer>() as u32,
                    Some(output_buf.as_mut_ptr() as *mut c_void),
                    output_buf.len() as u32,
                    Some(&mut bytes_returned),
                    None,
                )
            };

            if status.is_err() && bytes_returned == 0 {
                break;
            }

            let header = unsafe { &*(output_buf.as_ptr() as *const RetrievalPointersBuffer) };
            let pairs_start = std::mem::size_of::<RetrievalPointersBuffer>();
            let mut prev_vcn = header.starting_vcn;

            for i in 0..header.extent_count as usize {
                let offset = pairs_start + i * std::mem::size_of::<RetrievalPointerRaw>();
                let pair = unsafe { &*(output_buf.as_ptr().add(offset) as *const RetrievalPointerRaw) };
                let length = (pair.vcn - prev_vcn) as u64;
                extents.push((Vcn(prev_vcn as u64), Lcn(pair.lcn as u64), ClusterCount(length)));
                prev_vcn = pair.vcn;
            }

            if status.is_ok() {
                break;
            }
            starting_vcn.starting_vcn = prev_vcn;
        }

        unsafe {
            let _ = CloseHandle(file_handle);
        }
        Ok(extents)
    }
}

impl MoveExtent for WindowsVolume {
    fn move_extent(
        &self,
        stream: &StreamRef,
        source_vcn: Vcn,
        target_lcn: Lcn,
        count: ClusterCount,
    ) -> Result<(), HostError> {
        #[repr(C)]
        struct MoveFileData {
            file_handle: HANDLE,
            starting_vcn: i64,
            starting_lcn: i64,
            cluster_count: u32,
        }

        let file_handle = open_by_file_reference(self.drive_letter, stream.mft_index)?;
        let input = MoveFileData {
            file_handle,
            starting_vcn: source_vcn.0 as i64,
            starting_lcn: target_lcn.0 as i64,
            cluster_count: count.0 as u32,
        };

        let mut bytes_returned = 0u32;
        let result = unsafe {
            DeviceIoControl(
                self.handle,
                FSCTL_MOVE_FILE,
                Some(&input as *const MoveFileData as *const c_void),
                std::mem::size_of::<MoveFileData>() as u32,
                None,
                0,
                Some(&mut bytes_returned),
                None,
            )
        };

        unsafe {
            let _ = CloseHandle(file_handle);
        }

        result.map_err(|e| HostError::new(format!("FSCTL_MOVE_FILE failed: {e}")))
    }
}

impl Clock for WindowsVolume {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl Host for WindowsVolume {}
