use crate::error::GpkgError;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Result as SqlResult, ToSql};

#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(C)]
pub enum ColumnType {
    Boolean,
    Varchar,
    Double,
    Integer,
    Geometry,
}

/// A dynamically-typed column value, bridging SQLite's storage classes and
/// the crate's public insert/update/read API.
///
/// `Value::Geometry` is distinct from `Value::Blob`: both are stored as
/// SQLite blobs, but only `Geometry` carries an already gpkg-encoded
/// geometry header (see `gpkg::feature`) and is never produced by reading a
/// row back — `features()` always decodes the geometry column separately
/// and yields plain property values.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Geometry(Vec<u8>),
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl TryFrom<Value> for String {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(GpkgError::ValueTypeMismatch {
                expected: "text",
                actual: other.type_name(),
            }),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Integer(i) => Ok(i != 0),
            other => Err(GpkgError::ValueTypeMismatch {
                expected: "boolean",
                actual: other.type_name(),
            }),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Integer(i) => Ok(i),
            other => Err(GpkgError::ValueTypeMismatch {
                expected: "integer",
                actual: other.type_name(),
            }),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = GpkgError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Real(r) => Ok(r),
            Value::Integer(i) => Ok(i as f64),
            other => Err(GpkgError::ValueTypeMismatch {
                expected: "real",
                actual: other.type_name(),
            }),
        }
    }
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Geometry(_) => "geometry",
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> SqlResult<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::from(rusqlite::types::Null),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(r) => ToSqlOutput::from(*r),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Blob(b) => ToSqlOutput::from(b.as_slice()),
            Value::Geometry(b) => ToSqlOutput::from(b.as_slice()),
        })
    }
}

#[derive(Clone, Debug)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

/// Intermediate result of resolving a layer's `pragma_table_info`: the single
/// primary key column plus every other declared column (including the
/// geometry column, filtered out by the caller).
pub(crate) struct ColumnSpecs {
    pub primary_key: String,
    pub other_columns: Vec<ColumnSpec>,
}

/// Schema/metadata snapshot for a single layer, independent of any open
/// connection — the shape `inspector::describe` hands back (C1).
#[derive(Clone, Debug)]
pub struct GpkgLayerMetadata {
    pub layer_name: String,
    pub geometry_column: String,
    pub geometry_type: wkb::reader::GeometryType,
    pub geometry_dimension: wkb::reader::Dimension,
    pub srs_id: u32,
    pub columns: Vec<ColumnSpec>,
    pub feature_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_roundtrips_through_integer_storage() {
        let value = Value::from(true);
        assert_eq!(value, Value::Integer(1));
        let back: bool = value.try_into().unwrap();
        assert!(back);
    }

    #[test]
    fn text_conversion_rejects_non_text_values() {
        let value = Value::Integer(5);
        let err = String::try_from(value).unwrap_err();
        assert!(matches!(err, GpkgError::ValueTypeMismatch { expected: "text", .. }));
    }

    #[test]
    fn real_conversion_accepts_integers() {
        let value = Value::Integer(3);
        let as_real: f64 = value.try_into().unwrap();
        assert_eq!(as_real, 3.0);
    }
}
