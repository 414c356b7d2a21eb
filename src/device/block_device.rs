// device/block_device.rs — Raw OS block-device adapter.
// Migrated from create_block_device / bdev_* (libdevs.c), Unix-only.
//
// The original queries size and sector size via BLKGETSIZE64/BLKSSZGET,
// opens O_DIRECT, and offers three reset policies backed by udev
// device-event monitoring. This crate does not vendor a libudev binding
// (not in this corpus's dependency stack); instead the reset *mechanism* is
// injected by the caller as a `ResetPolicy`, while this module owns the
// *protocol* — close the fd, invoke the policy, reopen, re-publish the
// filename — exactly as spec §6 frames the OS capability as an external
// collaborator.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;

use crate::device::{check_range, Device};
use crate::error::ProbeError;

const BLKGETSIZE64: libc::c_ulong = 0x8008_1272;
const BLKSSZGET: libc::c_ulong = 0x1268;

/// Returns `true` if the raw file descriptor `fd` refers to a block device.
/// Uses `fstat(2)` to query the file type, the same way this corpus's
/// `is_stdin_regular_file` checks fd 0 for `S_IFREG`; `false` on an `fstat`
/// failure.
fn is_block_fd(fd: std::os::unix::io::RawFd) -> bool {
    use nix::sys::stat::fstat;
    const S_IFMT: u32 = 0o170000;
    const S_IFBLK: u32 = 0o060000;
    match fstat(fd) {
        Ok(stat) => (stat.st_mode as u32 & S_IFMT) == S_IFBLK,
        Err(_) => false,
    }
}

/// A pluggable USB-reset mechanism. The `None` policy never needs one; the
/// Programmatic and Manual policies described in spec §4.4 are both
/// expressible as a closure: trigger whatever out-of-band reset the host
/// exposes and return the (possibly new) device path to reopen.
pub trait ResetPolicy {
    /// Performs the reset side-effect (ioctl-based USB port reset, or an
    /// interactive unplug/replug prompt) and returns the path to reopen the
    /// device under, which may differ from the path it was opened under if
    /// the device re-enumerates.
    fn trigger(&mut self, current_path: &str) -> Result<String, ProbeError>;
}

/// `reset()` always succeeds immediately and keeps the same path.
/// Equivalent to `bdev_none_reset` (`RT_DEFAULT = RT_MANUAL_USB` in the
/// original refers to the default *policy choice*, not this no-op).
pub struct NoReset;

impl ResetPolicy for NoReset {
    fn trigger(&mut self, current_path: &str) -> Result<String, ProbeError> {
        Ok(current_path.to_string())
    }
}

/// Delegates the reset mechanism to a caller-supplied closure. Used for
/// both the "Programmatic USB" policy (an ioctl-based reset, no user
/// interaction) and the "Manual USB" policy (prompting the user and
/// waiting on a device-event stream for the matching re-attach) — the
/// distinction lives entirely in what the closure does; this wrapper only
/// implements the close/trigger/reopen protocol.
pub struct CallbackReset<F: FnMut(&str) -> Result<String, ProbeError>> {
    callback: F,
}

impl<F: FnMut(&str) -> Result<String, ProbeError>> CallbackReset<F> {
    pub fn new(callback: F) -> Self {
        CallbackReset { callback }
    }
}

impl<F: FnMut(&str) -> Result<String, ProbeError>> ResetPolicy for CallbackReset<F> {
    fn trigger(&mut self, current_path: &str) -> Result<String, ProbeError> {
        (self.callback)(current_path)
    }
}

/// A raw OS block device opened with direct, unbuffered access.
/// Equivalent to `struct block_device`.
pub struct BlockDevice {
    file: Option<File>,
    path: String,
    size_byte: u64,
    block_order: u32,
    reset_policy: Box<dyn ResetPolicy>,
}

impl BlockDevice {
    /// Opens `path` as a raw block device with `O_DIRECT`, queries its size
    /// and logical sector size via ioctls, and derives `block_order` from
    /// the sector size. Equivalent to `create_block_device`.
    pub fn open(path: impl Into<String>, reset_policy: Box<dyn ResetPolicy>) -> Result<Self, ProbeError> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_DIRECT)
            .open(&path)?;

        let fd = file.as_raw_fd();
        if !is_block_fd(fd) {
            return Err(ProbeError::InvalidArgument(format!(
                "{path} is not a block device"
            )));
        }

        let size_byte = unsafe {
            let mut size: u64 = 0;
            if libc::ioctl(fd, BLKGETSIZE64, &mut size as *mut u64) != 0 {
                return Err(ProbeError::Io(std::io::Error::last_os_error().to_string()));
            }
            size
        };
        let sector_size = unsafe {
            let mut sector: libc::c_int = 0;
            if libc::ioctl(fd, BLKSSZGET, &mut sector as *mut libc::c_int) != 0 {
                return Err(ProbeError::Io(std::io::Error::last_os_error().to_string()));
            }
            sector as u32
        };
        if sector_size == 0 || !sector_size.is_power_of_two() {
            return Err(ProbeError::InvalidArgument(format!(
                "device reported non-power-of-two sector size {sector_size}"
            )));
        }
        let block_order = crate::util::ilog2(sector_size as u64);

        Ok(BlockDevice {
            file: Some(file),
            path,
            size_byte,
            block_order,
            reset_policy,
        })
    }

    fn file_mut(&mut self) -> Result<&mut File, ProbeError> {
        self.file.as_mut().ok_or(ProbeError::DeviceGone)
    }

    /// Writes `data` durably: `fsync` followed by `posix_fadvise(DONTNEED)`
    /// so a later read cannot be satisfied from the host's page cache — a
    /// counterfeit's lie must come from the device itself, never from our
    /// own cache.
    fn durability_barrier(&mut self) -> Result<(), ProbeError> {
        let file = self.file_mut()?;
        file.sync_all()?;
        let fd = file.as_raw_fd();
        unsafe {
            libc::posix_fadvise(fd, 0, 0, libc::POSIX_FADV_DONTNEED);
        }
        Ok(())
    }
}

impl Device for BlockDevice {
    fn size_byte(&self) -> u64 {
        self.size_byte
    }

    fn block_order(&self) -> u32 {
        self.block_order
    }

    fn filename(&self) -> &str {
        &self.path
    }

    fn read_blocks(&mut self, buf: &mut [u8], first_pos: u64, last_pos: u64) -> Result<(), ProbeError> {
        check_range(self, buf.len(), first_pos, last_pos)?;
        use std::io::{Read, Seek, SeekFrom};
        let offset = first_pos << self.block_order;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_blocks(&mut self, buf: &[u8], first_pos: u64, last_pos: u64) -> Result<(), ProbeError> {
        check_range(self, buf.len(), first_pos, last_pos)?;
        use std::io::{Seek, SeekFrom, Write};
        let offset = first_pos << self.block_order;
        {
            let file = self.file_mut()?;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(buf)?;
        }
        self.durability_barrier()
    }

    fn reset(&mut self) -> Result<(), ProbeError> {
        // Close the handle first so the reset mechanism (which may power-
        // cycle the USB port) doesn't race an open fd, matching the
        // original's "invalidate the fd before acting" ordering.
        self.file = None;
        let new_path = match self.reset_policy.trigger(&self.path) {
            Ok(p) => p,
            Err(e) => {
                // The fd is already gone; subsequent operations fail fast
                // rather than acting on a stale handle.
                return Err(e);
            }
        };
        self.path = new_path;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_DIRECT)
            .open(&self.path)
            .map_err(|_| ProbeError::DeviceGone)?;
        self.file = Some(file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_reset_policy_keeps_same_path() {
        let mut policy = NoReset;
        assert_eq!(policy.trigger("/dev/sdx").unwrap(), "/dev/sdx");
    }

    #[test]
    fn callback_reset_invokes_closure() {
        let mut calls = 0;
        let mut policy = CallbackReset::new(|path: &str| {
            calls += 1;
            Ok(format!("{path}-reopened"))
        });
        assert_eq!(policy.trigger("/dev/sdx").unwrap(), "/dev/sdx-reopened");
        assert_eq!(calls, 1);
    }

    #[test]
    fn callback_reset_propagates_failure_as_device_gone() {
        let mut policy = CallbackReset::new(|_: &str| Err(ProbeError::DeviceGone));
        assert!(matches!(policy.trigger("/dev/sdx"), Err(ProbeError::DeviceGone)));
    }

    #[test]
    fn is_block_fd_rejects_a_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_a_block_device");
        let file = std::fs::File::create(&path).unwrap();
        assert!(!is_block_fd(file.as_raw_fd()));
    }
}
