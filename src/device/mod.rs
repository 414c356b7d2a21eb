// device/mod.rs — Abstract block-device interface and the fake-device
// classifier. Migrated from libdevs.h / libdevs.c (examples/original_source/).
//
// The C source makes every wrapper's vtable struct begin with `struct
// device` so that pointer casts cross types. Here that's a trait: each
// wrapper owns its inner device as `Box<dyn Device>` and implements `Device`
// itself, so chaining `safe(perf(file))` is ordinary composition instead of
// a pointer reinterpretation.

#[cfg(unix)]
pub mod block_device;
pub mod file_emulator;
pub mod perf;
pub mod safe;

/// On non-Unix targets the raw block adapter is unavailable: `BLKGETSIZE64`/
/// `BLKSSZGET`/`O_DIRECT` have no portable equivalent, and spec §4.4 scopes
/// this adapter to OS-level block-device queries. Construction always
/// reports `Unsupported`, matching the taxonomy in spec §7.
#[cfg(not(unix))]
pub mod block_device {
    use crate::error::ProbeError;

    pub fn unsupported() -> ProbeError {
        ProbeError::Unsupported("raw block device access requires a Unix target".into())
    }
}

use crate::error::ProbeError;

/// Abstract block device. Implementors own exactly one underlying resource
/// (file descriptor, file handle, or another boxed `Device`) and release it
/// deterministically on drop.
///
/// Invariants every implementation must uphold (spec §4.2):
/// `first_pos <= last_pos < size_byte() >> block_order()`, and the buffer
/// passed to `read_blocks`/`write_blocks` is exactly
/// `(last_pos - first_pos + 1) << block_order()` bytes.
pub trait Device {
    /// Total addressable size of the device, in bytes.
    fn size_byte(&self) -> u64;

    /// log2 of the device's block size.
    fn block_order(&self) -> u32;

    /// The device's current path/name. May change across a reset (a manual
    /// USB reset can cause the device to re-enumerate under a new node).
    fn filename(&self) -> &str;

    /// Reads blocks `[first_pos, last_pos]` into `buf`.
    fn read_blocks(&mut self, buf: &mut [u8], first_pos: u64, last_pos: u64) -> Result<(), ProbeError>;

    /// Writes blocks `[first_pos, last_pos]` from `buf`.
    fn write_blocks(&mut self, buf: &[u8], first_pos: u64, last_pos: u64) -> Result<(), ProbeError>;

    /// Re-initializes the device, ideally clearing any volatile write cache.
    /// A no-op is a legal implementation.
    fn reset(&mut self) -> Result<(), ProbeError>;

    /// Derived convenience: block size in bytes.
    fn block_size(&self) -> u64 {
        1u64 << self.block_order()
    }

    /// Derived convenience: one past the last valid block position.
    fn n_blocks(&self) -> u64 {
        self.size_byte() >> self.block_order()
    }
}

/// Validates that `first_pos <= last_pos` and `last_pos` is in range for
/// `dev`, and that `buf` is exactly the expected size. Every `Device`
/// implementation should call this at the top of `read_blocks`/
/// `write_blocks` before touching the underlying resource.
pub fn check_range(dev: &dyn Device, buf_len: usize, first_pos: u64, last_pos: u64) -> Result<(), ProbeError> {
    if first_pos > last_pos {
        return Err(ProbeError::InvalidArgument(format!(
            "first_pos {first_pos} > last_pos {last_pos}"
        )));
    }
    if last_pos >= dev.n_blocks() {
        return Err(ProbeError::InvalidArgument(format!(
            "last_pos {last_pos} out of range (n_blocks = {})",
            dev.n_blocks()
        )));
    }
    let expected_len = ((last_pos - first_pos + 1) << dev.block_order()) as usize;
    if buf_len != expected_len {
        return Err(ProbeError::InvalidArgument(format!(
            "buffer length {buf_len} does not match expected {expected_len}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Fake-device classification (libdevs.h enum fake_type, dev_param_valid,
// dev_param_to_type)
// ---------------------------------------------------------------------------

/// Closed set of counterfeit-device classifications. Equivalent to
/// `enum fake_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeType {
    /// Real capacity matches the announced capacity.
    Good,
    /// No usable capacity at all (`real_size_byte == 0`).
    Bad,
    /// Real capacity is below the wrap point but the device still reports
    /// more space than it has, without visibly wrapping within the probed
    /// range.
    Limbo,
    /// The address space folds back on itself at or before the real
    /// capacity: writes past `1 << wrap` silently alias earlier blocks.
    Wraparound,
    /// The wrap point falls strictly inside the announced capacity but
    /// above the real capacity — a multi-stage counterfeit.
    Chain,
}

/// Checks whether `(real_size_byte, announced_size_byte, wrap, block_order)`
/// is a coherent device-parameter tuple. Equivalent to `dev_param_valid`.
pub fn dev_param_valid(real_size_byte: u64, announced_size_byte: u64, wrap: u32, block_order: u32) -> bool {
    if real_size_byte > announced_size_byte {
        return false;
    }
    if wrap >= 64 {
        return false;
    }
    if !(crate::config::MIN_BLOCK_ORDER..=crate::config::MAX_BLOCK_ORDER).contains(&block_order) {
        return false;
    }
    let block_size = 1u64 << block_order;
    if real_size_byte % block_size != 0 || announced_size_byte % block_size != 0 {
        return false;
    }
    if real_size_byte == announced_size_byte {
        // wrap == 63 means "no wrap" (1 << 63 always bounds any realistic size).
        let wrap_bound = 1u64 << wrap;
        if announced_size_byte > wrap_bound {
            return false;
        }
    }
    true
}

/// Classifies a validated device-parameter tuple. Equivalent to
/// `dev_param_to_type`. Callers should only invoke this after
/// `dev_param_valid` returns `true`.
pub fn dev_param_to_type(real_size_byte: u64, announced_size_byte: u64, wrap: u32) -> FakeType {
    if real_size_byte == announced_size_byte {
        return FakeType::Good;
    }
    if real_size_byte == 0 {
        return FakeType::Bad;
    }
    let w = 1u64 << wrap;
    if w <= real_size_byte {
        FakeType::Wraparound
    } else if w < announced_size_byte {
        FakeType::Chain
    } else {
        FakeType::Limbo
    }
}

/// Human-readable name for a `FakeType`, matching the strings `f3probe`
/// prints for each classification.
pub fn fake_type_to_name(ft: FakeType) -> &'static str {
    match ft {
        FakeType::Good => "good",
        FakeType::Bad => "bad",
        FakeType::Limbo => "limbo",
        FakeType::Wraparound => "wraparound",
        FakeType::Chain => "chain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn good_when_real_equals_announced() {
        assert_eq!(dev_param_to_type(1 << 30, 1 << 30, 30), FakeType::Good);
    }

    #[test]
    fn bad_when_real_is_zero() {
        assert_eq!(dev_param_to_type(0, 1 << 30, 30), FakeType::Bad);
    }

    #[test]
    fn wraparound_when_wrap_bound_at_or_below_real() {
        // real = 2^31, announced = 2^34, wrap = 31 -> wraparound
        assert_eq!(dev_param_to_type(1 << 31, 1 << 34, 31), FakeType::Wraparound);
    }

    #[test]
    fn limbo_when_wrap_bound_at_or_above_announced() {
        // real = 2^31, announced = 2^34, wrap = 34 -> limbo
        assert_eq!(dev_param_to_type(1 << 31, 1 << 34, 34), FakeType::Limbo);
    }

    #[test]
    fn chain_when_wrap_bound_strictly_between() {
        // real = 2^20, announced = 2^34, wrap = 30 -> chain
        assert_eq!(dev_param_to_type(1 << 20, 1 << 34, 30), FakeType::Chain);
    }

    #[test]
    fn validity_rejects_real_greater_than_announced() {
        assert!(!dev_param_valid(1 << 31, 1 << 30, 30, 12));
    }

    #[test]
    fn validity_rejects_unaligned_sizes() {
        assert!(!dev_param_valid(4097, 4096 * 4, 30, 12));
    }

    #[test]
    fn validity_accepts_coherent_tuple() {
        assert!(dev_param_valid(1 << 31, 1 << 31, 31, 9));
    }
}
