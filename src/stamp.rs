// stamp.rs — Pseudo-random block stamping and validation.
// Migrated from fill_buffer_with_block / validate_buffer_with_block
// (examples/original_source/src/f3-extra/lib/libutils.c).
//
// Every stamped block's first native-endian u64 word holds its own offset
// (unsalted, so a block's position can always be recovered even from a
// device that mixes up blocks). Every subsequent word is the next value of
// a linear congruential generator seeded by `offset ^ salt`.

use crate::config::{DEFAULT_TOLERANCE, LCG_INCREMENT, LCG_MULTIPLIER};

/// Advances the stamp codec's linear congruential generator by one step.
/// Equivalent to `next_random_number` in libutils.c.
#[inline]
pub fn next_random_number(r: u64) -> u64 {
    r.wrapping_mul(LCG_MULTIPLIER).wrapping_add(LCG_INCREMENT)
}

/// Number of 8-byte words in a block of the given order.
#[inline]
fn words_per_block(block_order: u32) -> usize {
    debug_assert!(block_order >= 3, "block_order must cover at least one u64 word");
    1usize << (block_order - 3)
}

/// Stamps `buf` (a block of `1 << block_order` bytes) so that it encodes
/// `offset` under `salt`. `buf.len()` must equal `1 << block_order`.
///
/// Equivalent to `fill_buffer_with_block`.
pub fn fill_buffer_with_block(buf: &mut [u8], block_order: u32, offset: u64, salt: u64) {
    let num_words = words_per_block(block_order);
    assert_eq!(buf.len(), 1usize << block_order, "buffer size must match block_order");

    let mut random_number = offset ^ salt;
    write_word(buf, 0, offset);
    for i in 1..num_words {
        random_number = next_random_number(random_number);
        write_word(buf, i, random_number);
    }
}

/// Outcome of validating a previously stamped block against the strict
/// (exact-match) codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationResult {
    /// The offset recovered from the block's first word.
    pub found_offset: u64,
    /// `true` if every subsequent word matched the LCG sequence seeded from
    /// `found_offset ^ salt` — i.e. the block is intact.
    pub valid: bool,
}

/// Validates `buf` against the stamp codec seeded with `salt`.
///
/// Equivalent to `validate_buffer_with_block`: the recovered offset is
/// always returned (even when invalid) so callers can still report where an
/// overwritten block claims to belong.
pub fn validate_buffer_with_block(buf: &[u8], block_order: u32, salt: u64) -> ValidationResult {
    let num_words = words_per_block(block_order);
    assert_eq!(buf.len(), 1usize << block_order, "buffer size must match block_order");

    let found_offset = read_word(buf, 0);
    let mut random_number = found_offset ^ salt;
    for i in 1..num_words {
        random_number = next_random_number(random_number);
        if read_word(buf, i) != random_number {
            return ValidationResult {
                found_offset,
                valid: false,
            };
        }
    }
    ValidationResult {
        found_offset,
        valid: true,
    }
}

/// Tri-state classification of a block read back during probing.
/// Equivalent to the Good/Overwritten/Bad outcomes `libprobe.c`'s
/// `is_block_good` derives from `validate_buffer_with_block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState3 {
    /// The block validates and its recovered offset matches what was written.
    Good,
    /// The block validates against the stamp codec, but the recovered
    /// offset does not match the expected one (data moved, or wrapped).
    Overwritten,
    /// The block fails stamp validation outright.
    Bad,
}

/// Classifies a block read back at `expected_offset` using the strict codec.
pub fn classify_block(buf: &[u8], block_order: u32, expected_offset: u64, salt: u64) -> BlockState3 {
    let result = validate_buffer_with_block(buf, block_order, salt);
    if !result.valid {
        BlockState3::Bad
    } else if result.found_offset == expected_offset {
        BlockState3::Good
    } else {
        BlockState3::Overwritten
    }
}

/// Four-state classification used by the brew-style tolerant read-back
/// utility. Not used by `probe_device` itself (see SPEC_FULL.md §2); kept
/// for completeness of this module's documented data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState4 {
    Good,
    Overwritten,
    Changed,
    Bad,
}

/// Counts mismatched words against the LCG sequence without short-circuiting
/// on the first mismatch, so a tolerance threshold can be applied.
fn count_mismatches(buf: &[u8], block_order: u32, salt: u64) -> (u64, usize) {
    let num_words = words_per_block(block_order);
    let found_offset = read_word(buf, 0);
    let mut random_number = found_offset ^ salt;
    let mut mismatches = 0usize;
    for i in 1..num_words {
        random_number = next_random_number(random_number);
        if read_word(buf, i) != random_number {
            mismatches += 1;
        }
    }
    (found_offset, mismatches)
}

/// Classifies a block using the brew-style tolerant validator: up to
/// `tolerance` mismatched words are still considered `Changed` rather than
/// `Bad`, provided the recovered offset matches `expected_offset`.
/// Equivalent to the `TOLERANCE`-gated comparison described in spec §3.
pub fn classify_block_tolerant(
    buf: &[u8],
    block_order: u32,
    expected_offset: u64,
    salt: u64,
    tolerance: usize,
) -> BlockState4 {
    let (found_offset, mismatches) = count_mismatches(buf, block_order, salt);
    if mismatches > tolerance {
        return BlockState4::Bad;
    }
    if found_offset != expected_offset {
        return BlockState4::Overwritten;
    }
    if mismatches == 0 {
        BlockState4::Good
    } else {
        BlockState4::Changed
    }
}

/// Convenience wrapper around [`classify_block_tolerant`] using
/// [`DEFAULT_TOLERANCE`].
pub fn classify_block_tolerant_default(
    buf: &[u8],
    block_order: u32,
    expected_offset: u64,
    salt: u64,
) -> BlockState4 {
    classify_block_tolerant(buf, block_order, expected_offset, salt, DEFAULT_TOLERANCE)
}

#[inline]
fn write_word(buf: &mut [u8], word_idx: usize, value: u64) {
    let start = word_idx * 8;
    buf[start..start + 8].copy_from_slice(&value.to_ne_bytes());
}

#[inline]
fn read_word(buf: &[u8], word_idx: usize) -> u64 {
    let start = word_idx * 8;
    u64::from_ne_bytes(buf[start..start + 8].try_into().unwrap())
}
