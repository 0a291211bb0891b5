//! FPGA parser driver: MMIO register layout, address translation, and the
//! per-kernel parse protocol shared by the battery and trip backends.

pub mod battery;
pub mod context;
pub mod trip;

use bolson_types::{PipelineError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Control register bits, shared by every kernel instance.
pub const CTRL_START: u32 = 1 << 0;
pub const CTRL_STOP: u32 = 1 << 1;
pub const CTRL_RESET: u32 = 1 << 2;

/// Status register bits.
pub const STAT_IDLE: u32 = 1 << 0;
pub const STAT_BUSY: u32 = 1 << 1;
pub const STAT_DONE: u32 = 1 << 2;

/// Number of 32-bit registers reserved for the global kernel
/// (control, status, return lo, return hi).
const GLOBAL_REGS: usize = 4;

/// Which hardware parser array a [`RegisterLayout`] describes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backend {
    /// List-of-uint64 `voltage` schema.
    Battery,
    /// 19-field trip-report schema.
    Trip,
}

impl Backend {
    /// Custom per-kernel register count: 4 for battery (control, status,
    /// result-rows lo/hi), 2 for trip (tag, bytes-consumed).
    fn custom_regs_per_inst(self) -> usize {
        match self {
            Backend::Battery => 4,
            Backend::Trip => 2,
        }
    }

    /// Backend-specific output-buffer device-address registers per kernel.
    /// Battery registers two output buffers (offsets, values), each as a
    /// lo/hi address pair. Trip's output buffers are pre-registered once at
    /// context-enable time and addressed through the `AddressMap` rather
    /// than per-kernel registers.
    fn out_addr_regs_per_inst(self) -> usize {
        match self {
            Backend::Battery => 4,
            Backend::Trip => 0,
        }
    }

    /// Base string the AFU GUID is derived from when none is supplied.
    pub fn afu_base(self) -> &'static str {
        match self {
            Backend::Battery => "bolson-battery-",
            Backend::Trip => "bolson-trip-",
        }
    }
}

/// Derives the AFU identifier from a backend base string plus a two-hex-digit
/// suffix encoding the kernel count `n`.
///
/// `n` must fit in a byte; larger counts are rejected since the suffix is
/// fixed at two hex digits.
pub fn derive_afu_id(backend: Backend, n: usize) -> Result<String> {
    if n > 255 {
        return Err(PipelineError::Config(format!(
            "FPGA kernel count {n} exceeds the 255 kernels a two hex digit AFU suffix can encode"
        )));
    }
    Ok(format!("{}{:02x}", backend.afu_base(), n))
}

/// Word-offset register layout for an `n`-kernel array of a given backend.
///
/// Every offset is derived from `n` and `backend` rather than hard-coded, so
/// the layout for a 4-kernel and a 64-kernel array of the same backend are
/// computed by the same formulas.
#[derive(Clone, Copy, Debug)]
pub struct RegisterLayout {
    n: usize,
    backend: Backend,
}

impl RegisterLayout {
    pub fn new(backend: Backend, n: usize) -> Self {
        RegisterLayout { n, backend }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn global_ctrl(&self) -> usize {
        0
    }

    pub fn global_status(&self) -> usize {
        1
    }

    pub fn global_return_lo(&self) -> usize {
        2
    }

    pub fn global_return_hi(&self) -> usize {
        3
    }

    fn input_range_base(&self) -> usize {
        GLOBAL_REGS
    }

    pub fn input_firstidx_offset(&self, idx: usize) -> usize {
        self.input_range_base() + 2 * idx
    }

    pub fn input_lastidx_offset(&self, idx: usize) -> usize {
        self.input_firstidx_offset(idx) + 1
    }

    fn input_values_base(&self) -> usize {
        self.input_range_base() + 2 * self.n
    }

    pub fn input_values_lo_offset(&self, idx: usize) -> usize {
        self.input_values_base() + 2 * idx
    }

    pub fn input_values_hi_offset(&self, idx: usize) -> usize {
        self.input_values_lo_offset(idx) + 1
    }

    fn out_addr_base(&self) -> usize {
        self.input_values_base() + 2 * self.n
    }

    /// Offset of the `which`-th (0-indexed) output address register pair's
    /// low word for kernel `idx`. Only meaningful for backends with
    /// `out_addr_regs_per_inst() > 0`.
    pub fn output_addr_lo_offset(&self, idx: usize, which: usize) -> usize {
        self.out_addr_base() + idx * self.backend.out_addr_regs_per_inst() + 2 * which
    }

    pub fn output_addr_hi_offset(&self, idx: usize, which: usize) -> usize {
        self.output_addr_lo_offset(idx, which) + 1
    }

    fn custom_regs_base(&self) -> usize {
        self.out_addr_base() + self.n * self.backend.out_addr_regs_per_inst()
    }

    /// Offset of the `which`-th custom register for kernel `idx`.
    pub fn custom_reg_offset(&self, idx: usize, which: usize) -> usize {
        self.custom_regs_base() + idx * self.backend.custom_regs_per_inst() + which
    }

    /// Total number of 32-bit registers this layout spans.
    pub fn total_regs(&self) -> usize {
        self.custom_regs_base() + self.n * self.backend.custom_regs_per_inst()
    }
}

/// Abstraction over the MMIO window exposed by the FPGA platform.
///
/// The device interface is not concurrent-safe: callers serialize access
/// through a single [`MmioBus`] mutex rather than requiring `&mut self` here,
/// matching the reference driver's single-mutex-around-raw-pointer design.
pub trait MmioTarget: Send {
    fn read_mmio(&self, offset: usize) -> Result<u32>;
    fn write_mmio(&self, offset: usize, value: u32) -> Result<()>;
}

/// Serializes MMIO access to one FPGA platform. Cloning the `Arc` this is
/// typically stored in lets every kernel's [`Parser`](crate::parse::Parser)
/// instance share the same bus.
pub struct MmioBus {
    target: Mutex<Box<dyn MmioTarget>>,
}

impl MmioBus {
    pub fn new(target: Box<dyn MmioTarget>) -> Self {
        MmioBus {
            target: Mutex::new(target),
        }
    }

    pub fn read(&self, offset: usize) -> Result<u32> {
        let t = self.target.lock().unwrap();
        t.read_mmio(offset)
    }

    pub fn write(&self, offset: usize, value: u32) -> Result<()> {
        let t = self.target.lock().unwrap();
        t.write_mmio(offset, value)
    }
}

/// Host buffer pointer to device physical address translation table.
/// Populated once, at context enable, and read-only thereafter.
#[derive(Default)]
pub struct AddressMap {
    entries: HashMap<usize, u64>,
}

impl AddressMap {
    pub fn new() -> Self {
        AddressMap::default()
    }

    /// Registers `ptr` at device address `device_addr`. Called only during
    /// context enable.
    pub fn register(&mut self, ptr: *const u8, device_addr: u64) {
        self.entries.insert(ptr as usize, device_addr);
    }

    /// Translates a host pointer into the `(lo, hi)` 32-bit halves of its
    /// device address.
    pub fn translate(&self, ptr: *const u8) -> Result<(u32, u32)> {
        let addr = *self.entries.get(&(ptr as usize)).ok_or_else(|| {
            PipelineError::Device(format!("no device address registered for host pointer {:p}", ptr))
        })?;
        Ok(((addr & 0xFFFF_FFFF) as u32, (addr >> 32) as u32))
    }
}

/// Runs the common MMIO parse protocol for one kernel against one input
/// buffer: reset, write the input range and address, start, poll for
/// `DONE`, then read back `extra_regs` (typically a row count or
/// backend-specific return value) before releasing the bus.
///
/// Backend-specific output wrapping happens in the caller once this
/// returns; this function only performs the register choreography.
pub fn run_kernel(
    bus: &MmioBus,
    layout: &RegisterLayout,
    idx: usize,
    input_ptr: *const u8,
    input_size: usize,
    addr_map: &AddressMap,
    poll_interval: Duration,
    poll_timeout: Duration,
) -> Result<()> {
    bus.write(layout.global_ctrl(), CTRL_RESET)?;
    bus.write(layout.global_ctrl(), 0)?;

    bus.write(layout.input_lastidx_offset(idx), input_size as u32)?;

    let (lo, hi) = addr_map.translate(input_ptr)?;
    bus.write(layout.input_values_lo_offset(idx), lo)?;
    bus.write(layout.input_values_hi_offset(idx), hi)?;

    bus.write(layout.global_ctrl(), CTRL_START)?;
    bus.write(layout.global_ctrl(), 0)?;

    let start = Instant::now();
    loop {
        let status = bus.read(layout.global_status())?;
        if status & STAT_DONE != 0 {
            return Ok(());
        }
        if start.elapsed() > poll_timeout {
            return Err(PipelineError::Timeout(poll_timeout));
        }
        std::thread::sleep(poll_interval);
    }
}

/// A fake MMIO device used by unit tests and the `bench` subcommands'
/// dry-run mode. It answers every register write by recording it, and
/// reports `DONE` immediately so tests don't depend on real timing, while
/// letting a test pre-load the values a "hardware" run would have produced
/// (e.g. a result-row count).
#[cfg(test)]
pub mod sim {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    pub struct SimulatedMmio {
        regs: StdMutex<HashMap<usize, u32>>,
    }

    impl SimulatedMmio {
        pub fn new() -> Self {
            SimulatedMmio::default()
        }

        /// Pre-loads a register so a subsequent `read_mmio` observes it
        /// without a prior `write_mmio`, simulating hardware-written state
        /// (e.g. a result-row count).
        pub fn preload(&self, offset: usize, value: u32) {
            self.regs.lock().unwrap().insert(offset, value);
        }
    }

    impl MmioTarget for SimulatedMmio {
        fn read_mmio(&self, offset: usize) -> Result<u32> {
            let regs = self.regs.lock().unwrap();
            if offset == 1 {
                // Global status register: always report DONE.
                return Ok(STAT_DONE);
            }
            Ok(*regs.get(&offset).unwrap_or(&0))
        }

        fn write_mmio(&self, offset: usize, value: u32) -> Result<()> {
            self.regs.lock().unwrap().insert(offset, value);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_layout_is_monotonic_and_non_overlapping() {
        let layout = RegisterLayout::new(Backend::Battery, 4);
        assert_eq!(layout.input_firstidx_offset(0), 4);
        assert_eq!(layout.input_lastidx_offset(0), 5);
        assert_eq!(layout.input_firstidx_offset(1), 6);
        // Input-value address regs start right after all 4 kernels' ranges.
        assert_eq!(layout.input_values_lo_offset(0), 4 + 2 * 4);
        assert!(layout.total_regs() > layout.custom_reg_offset(3, 3));
    }

    #[test]
    fn trip_layout_has_no_output_addr_regs() {
        let layout = RegisterLayout::new(Backend::Trip, 8);
        // Custom regs begin immediately after input-value address regs.
        assert_eq!(layout.custom_reg_offset(0, 0), layout.input_values_lo_offset(0) + 2 * 8);
    }

    #[test]
    fn afu_id_rejects_too_many_kernels() {
        assert!(derive_afu_id(Backend::Battery, 256).is_err());
        assert_eq!(derive_afu_id(Backend::Battery, 8).unwrap(), "bolson-battery-08");
    }
}
