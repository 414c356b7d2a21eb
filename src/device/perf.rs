// device/perf.rs — Timing/counting decorator.
// Migrated from struct perf_device / pdev_* (libdevs.c).
//
// Transparent delegation: every call is timed with a monotonic clock and
// tallied before being forwarded to the inner device. No semantic effect on
// reads, writes, or resets.

use std::time::Instant;

use crate::device::Device;
use crate::error::ProbeError;

/// The six counters `libdevs.c`'s `struct perf_device` tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfCounters {
    pub read_count: u64,
    pub read_time_us: u64,
    pub write_count: u64,
    pub write_time_us: u64,
    pub reset_count: u64,
    pub reset_time_us: u64,
}

/// Wraps a `Device`, recording elapsed time and call counts for every
/// delegated operation. Equivalent to `struct perf_device`.
pub struct PerfDevice {
    inner: Option<Box<dyn Device>>,
    counters: PerfCounters,
}

impl PerfDevice {
    pub fn new(inner: Box<dyn Device>) -> Self {
        PerfDevice {
            inner: Some(inner),
            counters: PerfCounters::default(),
        }
    }

    pub fn counters(&self) -> PerfCounters {
        self.counters
    }

    fn inner_mut(&mut self) -> &mut Box<dyn Device> {
        self.inner.as_mut().expect("PerfDevice used after detach")
    }

    fn inner_ref(&self) -> &dyn Device {
        self.inner.as_deref().expect("PerfDevice used after detach")
    }

    /// Unlinks the inner device from this wrapper and returns it, without
    /// running the inner device's `Drop`. The wrapper itself becomes a
    /// frozen husk; it must not be used again.
    ///
    /// Equivalent to `pdev_detach_and_free`: in the original this frees the
    /// wrapper struct but nulls its `free` pointer so dropping it doesn't
    /// cascade into the inner device. Here, `Option::take` achieves the
    /// same effect without unsafe code.
    pub fn detach_and_free(mut self) -> Box<dyn Device> {
        self.inner.take().expect("PerfDevice used after detach")
    }
}

impl Device for PerfDevice {
    fn size_byte(&self) -> u64 {
        self.inner_ref().size_byte()
    }

    fn block_order(&self) -> u32 {
        self.inner_ref().block_order()
    }

    fn filename(&self) -> &str {
        self.inner_ref().filename()
    }

    fn read_blocks(&mut self, buf: &mut [u8], first_pos: u64, last_pos: u64) -> Result<(), ProbeError> {
        let start = Instant::now();
        let result = self.inner_mut().read_blocks(buf, first_pos, last_pos);
        self.counters.read_count += 1;
        self.counters.read_time_us += start.elapsed().as_micros() as u64;
        result
    }

    fn write_blocks(&mut self, buf: &[u8], first_pos: u64, last_pos: u64) -> Result<(), ProbeError> {
        let start = Instant::now();
        let result = self.inner_mut().write_blocks(buf, first_pos, last_pos);
        self.counters.write_count += 1;
        self.counters.write_time_us += start.elapsed().as_micros() as u64;
        result
    }

    fn reset(&mut self) -> Result<(), ProbeError> {
        let start = Instant::now();
        let result = self.inner_mut().reset();
        self.counters.reset_count += 1;
        self.counters.reset_time_us += start.elapsed().as_micros() as u64;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::file_emulator::FileDevice;
    use tempfile::tempdir;

    #[test]
    fn counters_are_monotonic_across_calls() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("perf.img");
        let dev = FileDevice::create(path, 1 << 16, 1 << 16, 63, 12, None, false, false).unwrap();
        let mut perf = PerfDevice::new(Box::new(dev));
        let block_size = perf.block_size() as usize;
        let data = vec![0u8; block_size];

        assert_eq!(perf.counters().write_count, 0);
        perf.write_blocks(&data, 0, 0).unwrap();
        let after_one = perf.counters();
        assert_eq!(after_one.write_count, 1);
        perf.write_blocks(&data, 1, 1).unwrap();
        let after_two = perf.counters();
        assert_eq!(after_two.write_count, 2);
        assert!(after_two.write_time_us >= after_one.write_time_us);

        let mut out = vec![0u8; block_size];
        perf.read_blocks(&mut out, 0, 0).unwrap();
        assert_eq!(perf.counters().read_count, 1);

        perf.reset().unwrap();
        assert_eq!(perf.counters().reset_count, 1);
    }

    #[test]
    fn detach_and_free_returns_usable_inner_device() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("detach.img");
        let dev = FileDevice::create(path, 1 << 16, 1 << 16, 63, 12, None, false, false).unwrap();
        let perf = PerfDevice::new(Box::new(dev));
        let mut inner = perf.detach_and_free();
        assert_eq!(inner.size_byte(), 1 << 16);
    }
}
