//! E2E: a limbo drive fronted by a small volatile write-back cache must still
//! be detected correctly — the cache only postpones bad-block discovery
//! until after a reset, it never hides the real capacity permanently.

use tempfile::tempdir;

use f3::device::file_emulator::FileDevice;
use f3::{probe_device, FakeType};

#[test]
fn cached_limbo_drive_is_still_unmasked_after_reset() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cached_limbo.img");
    let order = 12u32;
    let real = 32u64 << 20; // 32 MiB real
    let announced = 2u64 << 30; // 2 GiB announced
    let cache_order = 6u32; // 64-slot volatile cache
    let mut dev = FileDevice::create(path, real, announced, 63, order, Some(cache_order), true, false).unwrap();

    let result = probe_device(&mut dev).expect("probe should succeed against a cached limbo drive");

    assert_eq!(result.fake_type, FakeType::Limbo);
    assert_eq!(result.real_size_byte, real);
}
