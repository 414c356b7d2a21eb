//! E2E: bisection must converge to the exact good/bad boundary regardless of
//! how lopsided the write/reset cost ratio is, exercising the adaptive
//! sample-count estimator across more than one pass.

use tempfile::tempdir;

use f3::device::file_emulator::FileDevice;
use f3::probe::bisect::bisect;
use f3::probe::stats::BisectStats;

#[test]
fn bisection_converges_on_a_wide_gap_with_default_stats() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bisect.img");
    let order = 9u32;
    let real_blocks = 10_000u64;
    let announced_blocks = 1u64 << 20;
    let mut dev = FileDevice::create(
        path,
        real_blocks << order,
        announced_blocks << order,
        63,
        order,
        None,
        false,
        false,
    )
    .unwrap();

    let mut stats = BisectStats::new();
    let mut right_pos = announced_blocks;
    bisect(&mut dev, &mut stats, 0, &mut right_pos, 0, 0, false, 0xF00D).unwrap();

    assert_eq!(right_pos, real_blocks);
    assert!(stats.write_count > 0);
    assert!(stats.reset_count > 0);
}
