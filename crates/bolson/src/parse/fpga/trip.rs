//! FPGA driver for the trip-report kernel array: a 19-field schema mixing
//! primitives, fixed-size lists, and one string field.

use crate::buffer::{JsonBuffer, Region};
use crate::parse::fpga::{run_kernel, AddressMap, Backend, MmioBus, RegisterLayout};
use crate::parse::{ParsedBatch, Parser};
use arrow::array::{
    Array, ArrayRef, BooleanArray, FixedSizeListArray, StringArray, UInt64Array,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use bolson_types::{PipelineError, Result, SeqRange};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scalar or fixed-size-list field of the trip-report schema.
/// `list_len` is `None` for scalar fields.
struct TripField {
    name: &'static str,
    dtype: DataType,
    list_len: Option<usize>,
}

/// The 19 trip-report fields in declaration order, matching the reference
/// `TripBuilder`.
fn trip_fields() -> Vec<TripField> {
    use DataType::*;
    vec![
        TripField { name: "timestamp", dtype: Utf8, list_len: None },
        TripField { name: "timezone", dtype: UInt64, list_len: None },
        TripField { name: "vin", dtype: UInt64, list_len: None },
        TripField { name: "odometer", dtype: UInt64, list_len: None },
        TripField { name: "hypermiling", dtype: Boolean, list_len: None },
        TripField { name: "avgspeed", dtype: UInt64, list_len: None },
        TripField { name: "sec_in_band", dtype: UInt64, list_len: Some(12) },
        TripField { name: "miles_in_time_range", dtype: UInt64, list_len: Some(24) },
        TripField { name: "const_speed_miles_in_band", dtype: UInt64, list_len: Some(12) },
        TripField { name: "vary_speed_miles_in_band", dtype: UInt64, list_len: Some(12) },
        TripField { name: "sec_decel", dtype: UInt64, list_len: Some(10) },
        TripField { name: "sec_accel", dtype: UInt64, list_len: Some(10) },
        TripField { name: "braking", dtype: UInt64, list_len: Some(6) },
        TripField { name: "accel", dtype: UInt64, list_len: Some(6) },
        TripField { name: "orientation", dtype: Boolean, list_len: None },
        TripField { name: "small_speed_var", dtype: UInt64, list_len: Some(13) },
        TripField { name: "large_speed_var", dtype: UInt64, list_len: Some(13) },
        TripField { name: "accel_decel", dtype: UInt64, list_len: None },
        TripField { name: "speed_changes", dtype: UInt64, list_len: None },
    ]
}

/// The software-visible schema: fixed-size-list fields use true
/// `FixedSizeList` Arrow types.
pub fn output_schema() -> SchemaRef {
    let fields: Vec<Field> = trip_fields()
        .into_iter()
        .map(|f| match f.list_len {
            None => Field::new(f.name, f.dtype, false),
            Some(n) => Field::new(
                f.name,
                DataType::FixedSizeList(Arc::new(Field::new("item", f.dtype, false)), n as i32),
                false,
            ),
        })
        .collect();
    Arc::new(Schema::new(fields))
}

/// The schema the hardware driver itself observes: every fixed-size-list
/// field is a flat primitive array of `rows * list_len` values instead of a
/// `FixedSizeList`, since the hardware has no notion of nested types. This
/// is purely a view distinction over the same underlying output buffers
/// (see DESIGN.md's `HwView`/`SwView` note).
pub fn hw_output_schema() -> SchemaRef {
    let fields: Vec<Field> = trip_fields()
        .into_iter()
        .map(|f| Field::new(f.name, f.dtype, false))
        .collect();
    Arc::new(Schema::new(fields))
}

/// One software-side driver for the trip-report kernel array. Unlike
/// battery, the trip kernel's per-kernel custom regs are `{tag,
/// bytes_consumed}`; the row count is returned through the global kernel
/// return register instead of a custom one.
pub struct TripParser {
    bus: Arc<MmioBus>,
    layout: RegisterLayout,
    idx: usize,
    addr_map: Arc<AddressMap>,
    /// One pre-allocated output region per field, in `trip_fields()` order.
    out_regions: Mutex<Vec<Region>>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

const CUSTOM_TAG: usize = 0;
const CUSTOM_BYTES_CONSUMED: usize = 1;

impl TripParser {
    pub fn new(
        bus: Arc<MmioBus>,
        n: usize,
        idx: usize,
        addr_map: Arc<AddressMap>,
        out_regions: Vec<Region>,
        poll_interval: Duration,
        poll_timeout: Duration,
    ) -> Self {
        assert_eq!(out_regions.len(), trip_fields().len());
        TripParser {
            bus,
            layout: RegisterLayout::new(Backend::Trip, n),
            idx,
            addr_map,
            out_regions: Mutex::new(out_regions),
            poll_interval,
            poll_timeout,
        }
    }

    fn parse_one(&self, buf: &JsonBuffer) -> Result<ParsedBatch> {
        let seq_range = buf
            .seq_range()
            .ok_or_else(|| PipelineError::Device("trip parser received an empty buffer".to_string()))?;

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

        // Tag and bytes-consumed are diagnostic; the authoritative row
        // count comes from the global kernel's return register.
        let _tag = self.bus.read(self.layout.custom_reg_offset(self.idx, CUSTOM_TAG))?;
        let _bytes_consumed = self
            .bus
            .read(self.layout.custom_reg_offset(self.idx, CUSTOM_BYTES_CONSUMED))?;
        let lo = self.bus.read(self.layout.global_return_lo())?;
        let hi = self.bus.read(self.layout.global_return_hi())?;
        let rows = ((hi as u64) << 32 | lo as u64) as usize;

        let regions = self.out_regions.lock().unwrap();
        let hw_batch = wrap_hw_output(&regions, rows)?;
        let sw_batch = hw_to_sw_view(&hw_batch)?;
        Ok(ParsedBatch::new(sw_batch, seq_range))
    }
}

/// Wraps each field's raw output region into the flat primitive array the
/// hardware driver observes, sliced to `rows` (or `rows * list_len` for
/// list-shaped fields).
pub fn wrap_hw_output(
    regions: &[Region],
    rows: usize,
) -> Result<arrow::record_batch::RecordBatch> {
    let fields = trip_fields();
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.len());
    for (field, region) in fields.iter().zip(regions.iter()) {
        let len = rows * field.list_len.unwrap_or(1);
        let array: ArrayRef = match field.dtype {
            DataType::UInt64 => Arc::new(read_u64_array(region, len)?),
            DataType::Boolean => Arc::new(read_bool_array(region, len)?),
            DataType::Utf8 => Arc::new(read_string_array(region, rows)?),
            ref other => {
                return Err(PipelineError::Device(format!(
                    "unsupported trip field type {other:?}"
                )))
            }
        };
        columns.push(array);
    }
    arrow::record_batch::RecordBatch::try_new(hw_output_schema(), columns)
        .map_err(|e| PipelineError::Device(format!("failed to wrap trip hw output: {e}")))
}

/// Converts the hardware's flat-primitive view into the software-visible
/// schema by wrapping each list-shaped field's underlying values buffer in a
/// zero-copy `FixedSizeListArray`.
pub fn hw_to_sw_view(hw_batch: &arrow::record_batch::RecordBatch) -> Result<arrow::record_batch::RecordBatch> {
    let fields = trip_fields();
    let sw_schema = output_schema();
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.len());
    for (i, field) in fields.iter().enumerate() {
        let col = hw_batch.column(i).clone();
        let wrapped: ArrayRef = match field.list_len {
            None => col,
            Some(n) => {
                let item_field = Arc::new(Field::new("item", field.dtype.clone(), false));
                Arc::new(
                    FixedSizeListArray::try_new(item_field, n as i32, col, None).map_err(|e| {
                        PipelineError::Device(format!("failed to build sw view for {}: {e}", field.name))
                    })?,
                )
            }
        };
        columns.push(wrapped);
    }
    arrow::record_batch::RecordBatch::try_new(sw_schema, columns)
        .map_err(|e| PipelineError::Device(format!("failed to wrap trip sw output: {e}")))
}

fn read_u64_array(region: &Region, len: usize) -> Result<UInt64Array> {
    let needed = len * std::mem::size_of::<u64>();
    if region.len() < needed {
        return Err(PipelineError::Device(format!(
            "trip output region too small: need {needed}, have {}",
            region.len()
        )));
    }
    // SAFETY: `region` is at least `needed` bytes, page-aligned (exceeds
    // `u64` alignment).
    let slice: &[u64] =
        unsafe { std::slice::from_raw_parts(region.as_slice().as_ptr() as *const u64, len) };
    Ok(UInt64Array::from(slice.to_vec()))
}

fn read_bool_array(region: &Region, len: usize) -> Result<BooleanArray> {
    let bytes = region.as_slice();
    if bytes.len() < len {
        return Err(PipelineError::Device(format!(
            "trip output region too small: need {len}, have {}",
            bytes.len()
        )));
    }
    Ok(BooleanArray::from_iter(
        bytes[..len].iter().map(|&b| Some(b != 0)),
    ))
}

fn read_string_array(region: &Region, rows: usize) -> Result<StringArray> {
    // The hardware writes each row's timestamp as a fixed-width,
    // NUL-padded ASCII field; the field width is the region's capacity
    // divided by the pre-allocated row capacity.
    let bytes = region.as_slice();
    if rows == 0 {
        return Ok(StringArray::from(Vec::<&str>::new()));
    }
    let width = bytes.len() / rows.max(1);
    let mut values = Vec::with_capacity(rows);
    for r in 0..rows {
        let start = r * width;
        let end = start + width;
        let raw = &bytes[start..end];
        let nul = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        values.push(String::from_utf8_lossy(&raw[..nul]).into_owned());
    }
    Ok(StringArray::from(values))
}

impl Parser for TripParser {
    fn parse(&self, inputs: &[&JsonBuffer]) -> Result<Vec<ParsedBatch>> {
        inputs.iter().map(|b| self.parse_one(b)).collect()
    }

    fn input_schema(&self) -> SchemaRef {
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

    fn region_with_u64(values: &[u64], cap: usize) -> Region {
        let a = Allocator::new(AllocatorKind::System, 0);
        let mut r = a.allocate(cap).unwrap();
        let bytes: &[u8] =
            unsafe { std::slice::from_raw_parts(values.as_ptr() as *const u8, values.len() * 8) };
        r.as_mut_slice()[..bytes.len()].copy_from_slice(bytes);
        r
    }

    #[test]
    fn hw_to_sw_view_wraps_fixed_size_lists() {
        // Two rows, sec_in_band has list_len 12.
        let fields = trip_fields();
        let mut regions = Vec::new();
        for field in &fields {
            let len = 2 * field.list_len.unwrap_or(1);
            match field.dtype {
                DataType::Utf8 => regions.push(region_with_u64(&[0; 32], 64)),
                DataType::Boolean => regions.push(region_with_u64(&[0; 2], 64)),
                _ => regions.push(region_with_u64(&vec![7u64; len], len * 8 + 8)),
            }
        }
        let hw = wrap_hw_output(&regions, 2).unwrap();
        let sw = hw_to_sw_view(&hw).unwrap();
        assert_eq!(sw.num_rows(), 2);
        let sec_in_band_idx = fields.iter().position(|f| f.name == "sec_in_band").unwrap();
        let col = sw
            .column(sec_in_band_idx)
            .as_any()
            .downcast_ref::<FixedSizeListArray>()
            .unwrap();
        assert_eq!(col.value_length(), 12);
        let row0 = col.value(0);
        let row0 = row0.as_any().downcast_ref::<UInt64Array>().unwrap();
        assert_eq!(row0.value(0), 7);
    }
}
