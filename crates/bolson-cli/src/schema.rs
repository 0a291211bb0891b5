//! Loads an Arrow input schema from a small JSON description, for the
//! `--schema` flag the Arrow parser backend takes.
//!
//! The file is a JSON array of `{"name": ..., "type": ..., "nullable": ...}`
//! objects, e.g.:
//! ```json
//! [{"name": "voltage", "type": "int64"}, {"name": "label", "type": "utf8"}]
//! ```

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Deserialize)]
struct FieldSpec {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    nullable: bool,
}

pub fn load_schema(path: &Path) -> anyhow::Result<SchemaRef> {
    let text = std::fs::read_to_string(path)?;
    let specs: Vec<FieldSpec> = serde_json::from_str(&text)?;
    let fields: Vec<Field> = specs
        .into_iter()
        .map(|spec| {
            let dtype = parse_type(&spec.ty)?;
            Ok(Field::new(spec.name, dtype, spec.nullable))
        })
        .collect::<anyhow::Result<_>>()?;
    Ok(Arc::new(Schema::new(fields)))
}

fn parse_type(name: &str) -> anyhow::Result<DataType> {
    Ok(match name {
        "utf8" | "string" => DataType::Utf8,
        "int64" => DataType::Int64,
        "uint64" => DataType::UInt64,
        "int32" => DataType::Int32,
        "uint32" => DataType::UInt32,
        "float64" | "double" => DataType::Float64,
        "float32" | "float" => DataType::Float32,
        "bool" | "boolean" => DataType::Boolean,
        other => anyhow::bail!("unsupported schema field type {other:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_a_simple_schema_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"[{{"name":"voltage","type":"uint64"}}]"#).unwrap();
        let schema = load_schema(f.path()).unwrap();
        assert_eq!(schema.field(0).name(), "voltage");
        assert_eq!(schema.field(0).data_type(), &DataType::UInt64);
    }
}
