//! E2E: a drive whose announced capacity far exceeds its real capacity, with
//! no wraparound behaviour, must be classified as `Limbo` and its real size
//! recovered exactly.

use tempfile::tempdir;

use f3::device::file_emulator::FileDevice;
use f3::{probe_device, FakeType};

#[test]
fn limbo_drive_reports_its_true_capacity() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("limbo.img");
    let order = 12u32;
    let real = 64u64 << 20; // 64 MiB real
    let announced = 8u64 << 30; // 8 GiB announced
    let mut dev = FileDevice::create(path, real, announced, 63, order, None, false, false).unwrap();

    let result = probe_device(&mut dev).expect("probe should succeed against a limbo drive");

    assert_eq!(result.fake_type, FakeType::Limbo);
    assert_eq!(result.real_size_byte, real);
    assert_eq!(result.announced_size_byte, announced);
}
