// probe/wrap.rs — Address-space wrap detection.
// Migrated from find_wrap (libprobe.c).

use crate::device::Device;
use crate::error::ProbeError;
use crate::probe::reset::{high_level_reset, retry_once, write_stamped_blocks};
use crate::probe::bisect::is_block_good;
use crate::util::clp2;

/// Searches for the point at which the device's address space folds back
/// on itself: writes a basis block just past `left_pos`, then doubles the
/// candidate offset looking for the *same* basis block's stamp to
/// reappear — proof the underlying media is reusing storage rather than
/// genuinely holding the requested capacity. Returns the updated
/// `right_pos`, unchanged if no wrap is found before reaching it.
/// Equivalent to `find_wrap`.
pub fn find_wrap(
    dev: &mut dyn Device,
    left_pos: u64,
    right_pos: u64,
    reset_pos: u64,
    cache_size_block: u64,
    need_reset: bool,
    salt: u64,
) -> Result<u64, ProbeError> {
    let mut pos = left_pos + 1;
    if pos >= right_pos {
        return Ok(right_pos);
    }

    write_stamped_blocks(dev, pos, pos, salt)?;
    high_level_reset(dev, reset_pos, cache_size_block, need_reset, salt)?;
    if !is_block_good(dev, pos, salt)? {
        return Err(ProbeError::Io(format!(
            "basis block at position {pos} did not survive reset during wrap search"
        )));
    }

    let block_order = dev.block_order();
    let offset = pos << block_order;
    let mut high_bit = clp2(pos);
    if high_bit <= pos {
        high_bit <<= 1;
    }
    pos += high_bit;

    let block_size = 1usize << block_order;
    while pos < right_pos {
        let mut buf = vec![0u8; block_size];
        retry_once(|| dev.read_blocks(&mut buf, pos, pos))?;
        let result = crate::stamp::validate_buffer_with_block(&buf, block_order, salt);
        if result.valid && result.found_offset == offset {
            return Ok(high_bit);
        }

        high_bit <<= 1;
        pos = high_bit + left_pos + 1;
    }

    Ok(right_pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::file_emulator::FileDevice;
    use tempfile::tempdir;

    #[test]
    fn finds_wrap_point_on_a_wraparound_device() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wrap.img");
        let order = 9u32;
        let real_blocks = 1u64 << 11; // 1 MiB real
        let announced_blocks = 1u64 << 20;
        let wrap_bits = 11 + order; // wraps exactly at the real size
        let mut dev = FileDevice::create(
            path,
            real_blocks << order,
            announced_blocks << order,
            wrap_bits,
            order,
            None,
            false,
            false,
        )
        .unwrap();

        let left_pos = 0u64;
        let right_pos = announced_blocks;
        let new_right = find_wrap(&mut dev, left_pos, right_pos, 0, 0, false, 0xBEEF).unwrap();
        assert_eq!(new_right, real_blocks);
    }

    #[test]
    fn no_wrap_leaves_right_pos_unchanged_on_a_good_device() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("good.img");
        let order = 9u32;
        let n_blocks = 1u64 << 12;
        let mut dev = FileDevice::create(path, n_blocks << order, n_blocks << order, 63, order, None, false, false).unwrap();

        let new_right = find_wrap(&mut dev, 0, n_blocks, 0, 0, false, 0xABCD).unwrap();
        assert_eq!(new_right, n_blocks);
    }
}
