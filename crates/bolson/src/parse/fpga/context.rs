//! Context enable: allocates one [`Parser`] per hardware kernel instance,
//! sharing a single [`MmioBus`] and [`AddressMap`] across the array.

use crate::buffer::{Allocator, Region};
use crate::parse::fpga::battery::BatteryParser;
use crate::parse::fpga::trip::{self, TripParser};
use crate::parse::fpga::{AddressMap, Backend, MmioBus, MmioTarget};
use crate::parse::SharedParser;
use bolson_types::{AllocatorKind, FpgaOptions, Result};
use std::sync::Arc;

/// Owns the shared bus/address map and the per-kernel output regions for one
/// enabled FPGA backend. Dropping it frees every pre-registered output
/// region (subject to the `FpgaFixed` allocator's free-at-exit contract).
pub struct FpgaContext {
    bus: Arc<MmioBus>,
    addr_map: Arc<AddressMap>,
    parsers: Vec<SharedParser>,
}

impl FpgaContext {
    /// Enables `opts.num_parsers` kernels of `backend` against `target`,
    /// allocating each kernel's output regions from an `FpgaFixed` allocator
    /// and registering their addresses in a fresh [`AddressMap`].
    ///
    /// `device_addr_of` maps a host region's pointer to its device physical
    /// address; the platform layer that owns DMA-capable memory supplies
    /// this (for the simulated device, identity is sufficient).
    pub fn enable(
        backend: Backend,
        opts: &FpgaOptions,
        target: Box<dyn MmioTarget>,
        device_addr_of: impl Fn(*const u8) -> u64,
    ) -> Result<Self> {
        let bus = Arc::new(MmioBus::new(target));
        let allocator = Allocator::new(AllocatorKind::FpgaFixed, opts.output_buffer_capacity);
        let mut addr_map = AddressMap::new();

        // Every kernel's output regions must be registered in the same
        // address map before any parser is constructed, since the map is
        // shared (immutably, via one `Arc`) across the whole kernel array
        // once context enable completes.
        let mut parsers: Vec<SharedParser> = Vec::with_capacity(opts.num_parsers);
        match backend {
            Backend::Battery => {
                let mut per_kernel = Vec::with_capacity(opts.num_parsers);
                for _ in 0..opts.num_parsers {
                    let out_offsets = allocator.allocate(opts.output_buffer_capacity)?;
                    let out_values = allocator.allocate(opts.output_buffer_capacity)?;
                    addr_map.register(out_offsets.as_ptr(), device_addr_of(out_offsets.as_ptr()));
                    addr_map.register(out_values.as_ptr(), device_addr_of(out_values.as_ptr()));
                    per_kernel.push((out_offsets, out_values));
                }
                let addr_map = Arc::new(addr_map);
                for (idx, (out_offsets, out_values)) in per_kernel.into_iter().enumerate() {
                    parsers.push(Arc::new(BatteryParser::new(
                        bus.clone(),
                        opts.num_parsers,
                        idx,
                        addr_map.clone(),
                        out_offsets,
                        out_values,
                        opts.poll_interval,
                        opts.poll_timeout,
                    )));
                }
                return Ok(FpgaContext { bus, addr_map, parsers });
            }
            Backend::Trip => {
                let num_fields = trip::output_schema().fields().len();
                let mut per_kernel = Vec::with_capacity(opts.num_parsers);
                for _ in 0..opts.num_parsers {
                    let mut out_regions: Vec<Region> = Vec::with_capacity(num_fields);
                    for _ in 0..num_fields {
                        let region = allocator.allocate(opts.output_buffer_capacity)?;
                        addr_map.register(region.as_ptr(), device_addr_of(region.as_ptr()));
                        out_regions.push(region);
                    }
                    per_kernel.push(out_regions);
                }
                let addr_map = Arc::new(addr_map);
                for (idx, out_regions) in per_kernel.into_iter().enumerate() {
                    parsers.push(Arc::new(TripParser::new(
                        bus.clone(),
                        opts.num_parsers,
                        idx,
                        addr_map.clone(),
                        out_regions,
                        opts.poll_interval,
                        opts.poll_timeout,
                    )));
                }
                return Ok(FpgaContext { bus, addr_map, parsers });
            }
        }
    }

    pub fn bus(&self) -> &Arc<MmioBus> {
        &self.bus
    }

    pub fn address_map(&self) -> &Arc<AddressMap> {
        &self.addr_map
    }

    /// The per-kernel parsers, to be round-robined across converter threads
    /// one kernel per thread.
    pub fn parsers(&self) -> &[SharedParser] {
        &self.parsers
    }
}
