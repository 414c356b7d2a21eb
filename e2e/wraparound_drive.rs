//! E2E: a drive whose address space folds back on itself at its real
//! capacity must be classified as `Wraparound`, with the wrap point detected
//! at or below the real capacity.

use tempfile::tempdir;

use f3::device::file_emulator::FileDevice;
use f3::{probe_device, FakeType};

#[test]
fn wraparound_drive_detects_the_fold_point() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wrap.img");
    let order = 12u32;
    let real = 128u64 << 20; // 128 MiB real
    let announced = 4u64 << 30; // 4 GiB announced
    let wrap_bits = f3::util::ilog2(real);
    let mut dev = FileDevice::create(path, real, announced, wrap_bits, order, None, false, false).unwrap();

    let result = probe_device(&mut dev).expect("probe should succeed against a wraparound drive");

    assert_eq!(result.fake_type, FakeType::Wraparound);
    assert_eq!(result.real_size_byte, real);
    assert!((1u64 << result.wrap) <= real);
}
