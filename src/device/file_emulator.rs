// device/file_emulator.rs — File-backed device emulator.
// Migrated from create_file_device / fdev_read_block / fdev_write_block
// (examples/original_source/src/f3-extra/lib/libdevs.c).
//
// Ground truth for testing the prober: a sparse backing file of
// `real_size_byte` bytes stands in for the physical media, while the
// emulator reports `announced_size_byte` to callers. Writes landing past
// the wrap point are absorbed by a small volatile cache instead of being
// written to disk, simulating a counterfeit's on-device RAM.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::DEFAULT_BLOCK_ORDER;
use crate::device::{check_range, Device};
use crate::error::ProbeError;

/// One slot of the emulator's volatile write-back cache.
struct CacheSlot {
    /// Block position this slot currently holds, if any.
    tag: Option<u64>,
    data: Vec<u8>,
}

/// A device backed by a sparse file, simulating Good / Limbo / Wraparound /
/// Chain behaviour and an optional on-device cache.
///
/// Equivalent to `struct file_device`.
pub struct FileDevice {
    file: File,
    path: PathBuf,
    real_size_byte: u64,
    announced_size_byte: u64,
    block_order: u32,
    /// `address_mask = (1 << wrap) - 1`; the physical offset a request maps
    /// to is `requested_offset & address_mask`.
    address_mask: u64,
    cache: Option<Vec<CacheSlot>>,
    cache_order: u32,
    /// In strict mode, a cache hit requires the slot's tag to match the
    /// requested position; otherwise any occupied slot is returned,
    /// simulating a cheaper (buggier) cache implementation.
    strict: bool,
    keep_file: bool,
}

impl FileDevice {
    /// Creates a new file-backed emulator at `path`, failing if the path
    /// already exists (the original's `O_EXCL` creation).
    ///
    /// `wrap` is the bit width at which the address space folds
    /// (`address_mask = (1 << wrap) - 1`); pass `wrap >= 64` semantics by
    /// capping at 63 internally since addresses are 64-bit.
    /// `block_order == 0` requests the filesystem's natural block size.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        path: impl AsRef<Path>,
        real_size_byte: u64,
        announced_size_byte: u64,
        wrap: u32,
        mut block_order: u32,
        cache_order: Option<u32>,
        strict: bool,
        keep_file: bool,
    ) -> Result<Self, ProbeError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        if block_order == 0 {
            block_order = natural_block_order(&file).unwrap_or(DEFAULT_BLOCK_ORDER);
        }
        if !(crate::config::MIN_BLOCK_ORDER..=crate::config::MAX_BLOCK_ORDER).contains(&block_order) {
            return Err(ProbeError::InvalidArgument(format!(
                "block_order {block_order} out of range"
            )));
        }
        file.set_len(real_size_byte)?;

        let cache_order = cache_order.unwrap_or(0);
        let cache = if cache_order > 0 {
            let n_slots = 1usize << cache_order;
            let block_size = 1usize << block_order;
            Some(
                (0..n_slots)
                    .map(|_| CacheSlot {
                        tag: None,
                        data: vec![0u8; block_size],
                    })
                    .collect(),
            )
        } else {
            None
        };

        let address_mask = if wrap >= 64 { u64::MAX } else { (1u64 << wrap) - 1 };

        Ok(FileDevice {
            file,
            path,
            real_size_byte,
            announced_size_byte,
            block_order,
            address_mask,
            cache,
            cache_order,
            strict,
            keep_file,
        })
    }

    fn cache_index(&self, pos: u64) -> usize {
        let mask = (1u64 << self.cache_order) - 1;
        (pos & mask) as usize
    }

    fn read_one_block(&mut self, pos: u64, out: &mut [u8]) -> Result<(), ProbeError> {
        let block_size = 1u64 << self.block_order;
        let requested_offset = pos << self.block_order;
        let phys_offset = requested_offset & self.address_mask;

        if phys_offset < self.real_size_byte {
            self.file.seek(SeekFrom::Start(phys_offset))?;
            self.file.read_exact(out)?;
            return Ok(());
        }

        match &self.cache {
            None => {
                out.fill(0);
            }
            Some(cache) => {
                let idx = self.cache_index(pos);
                let slot = &cache[idx];
                let hit = match slot.tag {
                    Some(tag) if self.strict => tag == pos,
                    Some(_) => true,
                    None => false,
                };
                if hit {
                    out.copy_from_slice(&slot.data[..out.len().min(slot.data.len())]);
                } else {
                    out.fill(0);
                }
            }
        }
        let _ = block_size;
        Ok(())
    }

    fn write_one_block(&mut self, pos: u64, data: &[u8]) -> Result<(), ProbeError> {
        let requested_offset = pos << self.block_order;
        let phys_offset = requested_offset & self.address_mask;

        if phys_offset < self.real_size_byte {
            self.file.seek(SeekFrom::Start(phys_offset))?;
            self.file.write_all(data)?;
            return Ok(());
        }

        if let Some(cache) = &mut self.cache {
            let idx = self.cache_index(pos);
            let slot = &mut cache[idx];
            slot.tag = Some(pos);
            slot.data[..data.len()].copy_from_slice(data);
        }
        // No cache configured: writes beyond the real region are silently
        // discarded, matching a device with zero write-back capacity.
        Ok(())
    }
}

/// Queries the filesystem's natural block size for `file`.
/// Equivalent to the `fstat().st_blksize` fallback in `create_file_device`.
#[cfg(unix)]
fn natural_block_order(file: &File) -> Option<u32> {
    use std::os::unix::fs::MetadataExt;
    let blksize = file.metadata().ok()?.blksize();
    if blksize == 0 {
        return None;
    }
    Some(crate::util::ilog2(blksize))
}

#[cfg(not(unix))]
fn natural_block_order(_file: &File) -> Option<u32> {
    None
}

impl Device for FileDevice {
    fn size_byte(&self) -> u64 {
        self.announced_size_byte
    }

    fn block_order(&self) -> u32 {
        self.block_order
    }

    fn filename(&self) -> &str {
        self.path.to_str().unwrap_or("")
    }

    fn read_blocks(&mut self, buf: &mut [u8], first_pos: u64, last_pos: u64) -> Result<(), ProbeError> {
        check_range(self, buf.len(), first_pos, last_pos)?;
        let block_size = 1usize << self.block_order;
        for (i, pos) in (first_pos..=last_pos).enumerate() {
            let chunk = &mut buf[i * block_size..(i + 1) * block_size];
            self.read_one_block(pos, chunk)?;
        }
        Ok(())
    }

    fn write_blocks(&mut self, buf: &[u8], first_pos: u64, last_pos: u64) -> Result<(), ProbeError> {
        check_range(self, buf.len(), first_pos, last_pos)?;
        let block_size = 1usize << self.block_order;
        for (i, pos) in (first_pos..=last_pos).enumerate() {
            let chunk = &buf[i * block_size..(i + 1) * block_size];
            self.write_one_block(pos, chunk)?;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ProbeError> {
        // The cache and the real region both survive a reset: the emulator
        // has no volatile state that a reset would clear. This matches
        // libdevs.c's fdev_reset, which is a no-op.
        Ok(())
    }
}

impl Drop for FileDevice {
    fn drop(&mut self) {
        if !self.keep_file {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn good_device(dir: &Path, order: u32) -> FileDevice {
        let path = dir.join("good.img");
        let size = 1 << (order + 4); // 16 blocks
        FileDevice::create(path, size, size, 63, order, None, false, false).unwrap()
    }

    #[test]
    fn good_device_round_trips_writes() {
        let dir = tempdir().unwrap();
        let mut dev = good_device(dir.path(), 12);
        let block_size = dev.block_size() as usize;
        let data = vec![0xAB; block_size];
        dev.write_blocks(&data, 2, 2).unwrap();
        let mut out = vec![0u8; block_size];
        dev.read_blocks(&mut out, 2, 2).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn reads_past_real_region_without_cache_are_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("limbo.img");
        let order = 12u32;
        let real = 1u64 << (order + 2); // 4 blocks real
        let announced = 1u64 << (order + 8);
        let mut dev = FileDevice::create(path, real, announced, 63, order, None, false, false).unwrap();
        let block_size = dev.block_size() as usize;
        let mut out = vec![0xFFu8; block_size];
        dev.read_blocks(&mut out, 100, 100).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn cache_absorbs_writes_beyond_real_region() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cached.img");
        let order = 12u32;
        let real = 1u64 << (order + 2);
        let announced = 1u64 << (order + 8);
        let mut dev =
            FileDevice::create(path, real, announced, 63, order, Some(4), true, false).unwrap();
        let block_size = dev.block_size() as usize;
        let data = vec![0x42; block_size];
        dev.write_blocks(&data, 50, 50).unwrap();
        let mut out = vec![0u8; block_size];
        dev.read_blocks(&mut out, 50, 50).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn strict_cache_rejects_tag_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("strict.img");
        let order = 12u32;
        let real = 1u64 << (order + 2);
        let announced = 1u64 << (order + 8);
        let mut dev =
            FileDevice::create(path, real, announced, 63, order, Some(4), true, false).unwrap();
        let block_size = dev.block_size() as usize;
        let data = vec![0x42; block_size];
        // position 50 and position 50 + 16 (cache has 16 slots) collide.
        dev.write_blocks(&data, 50, 50).unwrap();
        let mut out = vec![0xFFu8; block_size];
        dev.read_blocks(&mut out, 50 + 16, 50 + 16).unwrap();
        assert!(out.iter().all(|&b| b == 0), "stale tag must not be served in strict mode");
    }

    #[test]
    fn wraparound_maps_high_offsets_into_real_region() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wrap.img");
        let order = 9u32; // 512-byte blocks
        let real = 1u64 << 20; // 1 MiB real
        let announced = 1u64 << 24;
        let wrap = 20; // wraps exactly at the real size
        let mut dev = FileDevice::create(path, real, announced, wrap, order, None, false, false).unwrap();
        let block_size = dev.block_size() as usize;
        let data = vec![0x5A; block_size];
        dev.write_blocks(&data, 0, 0).unwrap();
        // A position far beyond `real` that aliases position 0 under the mask.
        let aliasing_pos = real >> order;
        let mut out = vec![0u8; block_size];
        dev.read_blocks(&mut out, aliasing_pos, aliasing_pos).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn create_fails_if_path_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dup.img");
        let _dev = FileDevice::create(&path, 4096, 4096, 63, 12, None, false, true).unwrap();
        let second = FileDevice::create(&path, 4096, 4096, 63, 12, None, false, true);
        assert!(second.is_err());
    }

    #[test]
    fn keep_file_false_removes_backing_file_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ephemeral.img");
        {
            let _dev = FileDevice::create(&path, 4096, 4096, 63, 12, None, false, false).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
