//! FPGA driver for the battery-status kernel array: a single `voltage`
//! field, a variable-length list of uint64.

use crate::buffer::{JsonBuffer, Region};
use crate::parse::fpga::{run_kernel, AddressMap, Backend, MmioBus, RegisterLayout};
use crate::parse::{ParsedBatch, Parser};
use arrow::array::{Array, ListArray, UInt64Array};
use arrow::buffer::{OffsetBuffer, ScalarBuffer};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use bolson_types::{PipelineError, Result, SeqRange};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Returns the hard-coded battery output schema: `voltage: List<UInt64>`.
pub fn output_schema() -> SchemaRef {
    let item = Field::new("item", DataType::UInt64, false);
    Arc::new(Schema::new(vec![Field::new(
        "voltage",
        DataType::List(Arc::new(item)),
        false,
    )]))
}

/// One software-side driver for one battery kernel instance.
///
/// Shares `bus`/`addr_map` with every other kernel instance in the same
/// `FpgaContext`; owns its own pre-registered output regions exclusively.
pub struct BatteryParser {
    bus: Arc<MmioBus>,
    layout: RegisterLayout,
    idx: usize,
    addr_map: Arc<AddressMap>,
    out_offsets: Mutex<Region>,
    out_values: Mutex<Region>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

/// Custom register indices within a battery kernel's 4-register block.
/// Indices 0 and 1 (control, status) duplicate the global kernel's control
/// and status for per-instance addressing in the real register map; Bolson
/// drives start/reset/done through the global registers instead (see
/// `run_kernel`) and only reads the result-row count from here.
const CUSTOM_RESULT_ROWS_LO: usize = 2;
const CUSTOM_RESULT_ROWS_HI: usize = 3;

impl BatteryParser {
    pub fn new(
        bus: Arc<MmioBus>,
        n: usize,
        idx: usize,
        addr_map: Arc<AddressMap>,
        out_offsets: Region,
        out_values: Region,
        poll_interval: Duration,
        poll_timeout: Duration,
    ) -> Self {
        BatteryParser {
            bus,
            layout: RegisterLayout::new(Backend::Battery, n),
            idx,
            addr_map,
            out_offsets: Mutex::new(out_offsets),
            out_values: Mutex::new(out_values),
            poll_interval,
            poll_timeout,
        }
    }

    fn parse_one(&self, buf: &JsonBuffer) -> Result<ParsedBatch> {
        let seq_range = buf.seq_range().ok_or_else(|| PipelineError::Device(
            "battery parser received an empty buffer".to_string(),
        ))?;

        let out_offsets = self.out_offsets.lock().unwrap();
        let out_values = self.out_values.lock().unwrap();
        let (off_lo, off_hi) = self.addr_map.translate(out_offsets.as_ptr())?;
        let (val_lo, val_hi) = self.addr_map.translate(out_values.as_ptr())?;
        self.bus
            .write(self.layout.output_addr_lo_offset(self.idx, 0), off_lo)?;
        self.bus
            .write(self.layout.output_addr_hi_offset(self.idx, 0), off_hi)?;
        self.bus
            .write(self.layout.output_addr_lo_offset(self.idx, 1), val_lo)?;
        self.bus
            .write(self.layout.output_addr_hi_offset(self.idx, 1), val_hi)?;

        run_kernel(
            &self.bus,
            &self.layout,
            self.idx,
            buf.data().as_ptr(),
            buf.size(),
            &self.addr_map,
            self.poll_interval,
            self.poll_timeout,
        )?;

        let lo = self
            .bus
            .read(self.layout.custom_reg_offset(self.idx, CUSTOM_RESULT_ROWS_LO))?;
        let hi = self
            .bus
            .read(self.layout.custom_reg_offset(self.idx, CUSTOM_RESULT_ROWS_HI))?;
        let rows = ((hi as u64) << 32 | lo as u64) as usize;

        let batch = wrap_output(&out_offsets, &out_values, rows)?;
        Ok(ParsedBatch::new(batch, seq_range))
    }
}

/// Builds the `voltage: List<UInt64>` record batch from the raw offsets and
/// values the hardware wrote into its pre-registered output buffers.
///
/// `raw_offsets` holds `rows + 1` little-endian `u64` offsets into
/// `raw_values`, which holds `offsets[rows]` little-endian `u64` values.
pub fn wrap_output(
    raw_offsets: &Region,
    raw_values: &Region,
    rows: usize,
) -> Result<arrow::record_batch::RecordBatch> {
    let offsets_u64: &[u64] = cast_slice(raw_offsets.as_slice(), rows + 1)?;
    let num_values = *offsets_u64.last().unwrap_or(&0) as usize;
    let values_u64: &[u64] = cast_slice(raw_values.as_slice(), num_values)?;

    let offsets_i32: Vec<i32> = offsets_u64.iter().map(|&o| o as i32).collect();
    let values = UInt64Array::from(values_u64.to_vec());
    let item_field = Arc::new(Field::new("item", DataType::UInt64, false));
    let list = ListArray::new(
        item_field,
        OffsetBuffer::new(ScalarBuffer::from(offsets_i32)),
        Arc::new(values) as Arc<dyn Array>,
        None,
    );

    arrow::record_batch::RecordBatch::try_new(output_schema(), vec![Arc::new(list)])
        .map_err(|e| PipelineError::Device(format!("failed to wrap battery output: {e}")))
}

fn cast_slice(bytes: &[u8], len: usize) -> Result<&[u64]> {
    let needed = len * std::mem::size_of::<u64>();
    if bytes.len() < needed {
        return Err(PipelineError::Device(format!(
            "output region too small: need {needed} bytes, have {}",
            bytes.len()
        )));
    }
    // SAFETY: `bytes` is at least `needed` bytes and originates from a
    // `Region` allocated with page alignment, which exceeds `u64`'s
    // alignment requirement.
    Ok(unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const u64, len) })
}

impl Parser for BatteryParser {
    fn parse(&self, inputs: &[&JsonBuffer]) -> Result<Vec<ParsedBatch>> {
        inputs.iter().map(|b| self.parse_one(b)).collect()
    }

    fn input_schema(&self) -> SchemaRef {
        // The battery kernel's hard-coded input shape is the same
        // `voltage: List<UInt64>` JSON field the output batch carries; any
        // caller-supplied schema is ignored, per the FPGA backend contract.
        output_schema()
    }

    fn output_schema(&self) -> SchemaRef {
        output_schema()
    }

    fn preferred_thread_count(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Allocator;
    use bolson_types::AllocatorKind;

    #[test]
    fn wraps_list_of_uint64_from_raw_buffers() {
        let a = Allocator::new(AllocatorKind::System, 0);
        let mut offsets = a.allocate(64).unwrap();
        let mut values = a.allocate(64).unwrap();

        let raw_offsets: [u64; 3] = [0, 2, 3];
        let raw_values: [u64; 3] = [10, 20, 30];
        offsets.as_mut_slice()[..24].copy_from_slice(bytemuck_u64(&raw_offsets));
        values.as_mut_slice()[..24].copy_from_slice(bytemuck_u64(&raw_values));

        let batch = wrap_output(&offsets, &values, 2).unwrap();
        assert_eq!(batch.num_rows(), 2);
        let list = batch
            .column(0)
            .as_any()
            .downcast_ref::<ListArray>()
            .unwrap();
        let row0 = list.value(0);
        let row0 = row0.as_any().downcast_ref::<UInt64Array>().unwrap();
        assert_eq!(row0.values(), &[10, 20]);
        let row1 = list.value(1);
        let row1 = row1.as_any().downcast_ref::<UInt64Array>().unwrap();
        assert_eq!(row1.values(), &[30]);
    }

    fn bytemuck_u64(v: &[u64]) -> &[u8] {
        // SAFETY: `u64` has no padding and any bit pattern is valid.
        unsafe { std::slice::from_raw_parts(v.as_ptr() as *const u8, v.len() * 8) }
    }
}
