//! E2E: probing a genuine, correctly-sized drive must report `FakeType::Good`
//! with no discrepancy between real and announced capacity.

use tempfile::tempdir;

use f3::device::file_emulator::FileDevice;
use f3::{probe_device, FakeType};

#[test]
fn good_two_gigabyte_drive_is_classified_as_good() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("good.img");
    let size = 2u64 << 30;
    let mut dev = FileDevice::create(path, size, size, 63, 12, None, false, false).unwrap();

    let result = probe_device(&mut dev).expect("probe should succeed against a good drive");

    assert_eq!(result.fake_type, FakeType::Good);
    assert_eq!(result.real_size_byte, size);
    assert_eq!(result.announced_size_byte, size);
}
