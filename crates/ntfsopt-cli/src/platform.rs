//! Windows-only pre-flight gathering: drive type, filesystem name and the
//! dirty-volume bit, assembled into the [`ntfsopt_core::job::VolumeValidation`]
//! `run_job` needs before it will touch a volume (spec §7 category 1).
//!
//! This lives in the CLI, not the core, on purpose — spec §1 draws the
//! line at "a block device handle ... the core consumes from these only",
//! and classifying removable/remote/CD-ROM media is exactly the kind of
//! drive-enumeration concern spec §4.1's `VolumeValidation` doc comment
//! calls out as the caller's job.
#![cfg(windows)]

use anyhow::{bail, Context, Result};
use ntfsopt_core::job::VolumeValidation;
use std::ffi::c_void;
use std::os::windows::ffi::OsStrExt;
use windows::core::PCWSTR;
use windows::Win32::Foundation::CloseHandle;
use windows::Win32::Storage::FileSystem::{
    CreateFileW, GetDriveTypeW, GetVolumeInformationW, FILE_SHARE_READ, FILE_SHARE_WRITE,
    OPEN_EXISTING,
};
use windows::Win32::System::Ioctl::FSCTL_IS_VOLUME_DIRTY;
use windows::Win32::System::IO::DeviceIoControl;

// Drive type constants from the Windows API (`GetDriveTypeW` return value).
const DRIVE_REMOVABLE_VAL: u32 = 2;
const DRIVE_REMOTE_VAL: u32 = 4;
const DRIVE_CDROM_VAL: u32 = 5;

/// Gather the facts `validate_volume` needs by querying the drive itself,
/// in the same fixed order the engine checks them (spec §7 category 1).
pub fn validate(drive_letter: char) -> Result<VolumeValidation> {
    let root_path = format!("{drive_letter}:\\");
    let root_wide = to_wide(&root_path);

    let drive_type = unsafe { GetDriveTypeW(PCWSTR(root_wide.as_ptr())) };

    let mut fs_name_buf = [0u16; 32];
    let mut volume_name_buf = [0u16; 1];
    unsafe {
        GetVolumeInformationW(
            PCWSTR(root_wide.as_ptr()),
            Some(&mut volume_name_buf),
            None,
            None,
            None,
            Some(&mut fs_name_buf),
        )
        .with_context(|| format!("GetVolumeInformationW({root_path}) failed"))?;
    }
    let fs_name = String::from_utf16_lossy(&fs_name_buf)
        .trim_end_matches('\0')
        .to_string();

    Ok(VolumeValidation {
        is_ntfs: fs_name.eq_ignore_ascii_case("NTFS"),
        is_removable: drive_type == DRIVE_REMOVABLE_VAL,
        is_cdrom: drive_type == DRIVE_CDROM_VAL,
        is_remote: drive_type == DRIVE_REMOTE_VAL,
        is_assigned_by_subst: is_subst_drive(drive_letter)?,
        is_udf: false,
        is_dirty: is_volume_dirty(drive_letter)?,
        bytes_per_cluster: 0,
        is_windows_2000: false,
    })
}

fn to_wide(s: &str) -> Vec<u16> {
    std::ffi::OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

/// `QueryDosDeviceW` reports a `\Device\...` target for a real drive letter
/// and a path under the host filesystem for one created by `SUBST` — the
/// same distinction the original tool uses to reject `ASSIGNED_BY_SUBST`.
fn is_subst_drive(drive_letter: char) -> Result<bool> {
    use windows::Win32::Storage::FileSystem::QueryDosDeviceW;

    let device = format!("{drive_letter}:");
    let device_wide = to_wide(&device);
    let mut target = [0u16; 260];

    let len = unsafe { QueryDosDeviceW(PCWSTR(device_wide.as_ptr()), Some(&mut target)) };
    if len == 0 {
        bail!("QueryDosDeviceW({device}) failed");
    }
    let target = String::from_utf16_lossy(&target[..len as usize]);
    Ok(!target.starts_with("\\Device\\"))
}

fn is_volume_dirty(drive_letter: char) -> Result<bool> {
    let vol_path = format!("\\\\.\\{drive_letter}:");
    let vol_wide = to_wide(&vol_path);

    let handle = unsafe {
        CreateFileW(
            PCWSTR(vol_wide.as_ptr()),
            0,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            None,
            OPEN_EXISTING,
            Default::default(),
            None,
        )
    }
    .with_context(|| format!("failed to open {vol_path} for dirty-bit check"))?;

    let mut flags: u32 = 0;
    let mut bytes_returned: u32 = 0;
    let ok = unsafe {
        DeviceIoControl(
            handle,
            FSCTL_IS_VOLUME_DIRTY,
            None,
            0,
            Some(&mut flags as *mut u32 as *mut c_void),
            std::mem::size_of::<u32>() as u32,
            Some(&mut bytes_returned),
            None,
        )
    };
    unsafe {
        let _ = CloseHandle(handle);
    }
    ok.with_context(|| format!("FSCTL_IS_VOLUME_DIRTY({vol_path}) failed"))?;

    const VOLUME_IS_DIRTY: u32 = 0x0000_0001;
    Ok(flags & VOLUME_IS_DIRTY != 0)
}
