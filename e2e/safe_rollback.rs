//! E2E: wrapping a device in `SafeDevice` before handing it to the prober
//! must leave the original contents of every probed block intact once the
//! wrapper is dropped, even though the probe itself writes destructively.

use tempfile::tempdir;

use f3::device::file_emulator::FileDevice;
use f3::{probe_device, Device, SafeDevice};

#[test]
fn safe_wrapper_restores_original_contents_after_a_probe() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("safe.img");
    let order = 12u32;
    let size = 16u64 << 20; // 16 MiB
    let block_size = 1usize << order;

    let sentinel = vec![0x5Au8; block_size];
    let filename;
    {
        let mut dev = FileDevice::create(&path, size, size, 63, order, None, false, true).unwrap();
        dev.write_blocks(&sentinel, 0, 0).unwrap();
        filename = dev.filename().to_string();

        let max_blocks = f3::probe_device_max_blocks(&dev).min(4096);
        let mut safe = SafeDevice::new(Box::new(dev), max_blocks, false).unwrap();
        probe_device(&mut safe).expect("probe should run to completion under the safe wrapper");
        // drop here restores every block the probe touched, including block 0
    }

    let mut raw = std::fs::File::open(&filename).unwrap();
    use std::io::Read;
    let mut restored = vec![0u8; block_size];
    raw.read_exact(&mut restored).unwrap();
    assert_eq!(restored, sentinel);

    let _ = std::fs::remove_file(&filename);
}
