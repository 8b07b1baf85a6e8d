//! Layer Inspector (C1): reports feature count, column list, geometry
//! column name and declared geometry type for a layer in a container.

use crate::gpkg::Gpkg;
use crate::op_error::{GfoError, Result};
use crate::types::GpkgLayerMetadata;
use std::path::Path;

/// `describe(path, layer?) -> LayerDescriptor`. When `layer` is unset and the
/// container holds exactly one layer, that layer is chosen; otherwise an
/// "ambiguous layer" precondition error is raised.
pub fn describe(path: &Path, layer: Option<&str>) -> Result<GpkgLayerMetadata> {
    let gpkg = Gpkg::open_read_only(path)?;
    let layer_name = match layer {
        Some(name) => name.to_string(),
        None => {
            let mut layers = gpkg.list_layers()?;
            if layers.len() != 1 {
                return Err(GfoError::Precondition(format!(
                    "ambiguous layer in {}: container holds {} layers, expected exactly one",
                    path.display(),
                    layers.len()
                )));
            }
            layers.remove(0)
        }
    };

    let handle = gpkg.open_layer(&layer_name)?;
    let feature_count = feature_count(&gpkg, &layer_name)?;

    let mut columns = handle.other_columns.clone();
    columns.retain(|c| c.name != handle.geometry_column && c.name != handle.primary_key_column);

    Ok(GpkgLayerMetadata {
        layer_name: handle.layer_name.clone(),
        geometry_column: handle.geometry_column.clone(),
        geometry_type: handle.geometry_type,
        geometry_dimension: handle.geometry_dimension,
        srs_id: handle.srs_id,
        columns,
        feature_count,
    })
}

fn feature_count(gpkg: &Gpkg, layer_name: &str) -> Result<u64> {
    let sql = format!(r#"SELECT COUNT(*) FROM "{layer_name}""#);
    let count: i64 = gpkg.connection().query_row(&sql, [], |row| row.get(0))?;
    Ok(count as u64)
}

/// `min(rowid)`/`max(rowid)` of a layer, used by the batch planner (C4).
/// `None` for an empty layer.
pub fn rowid_extrema(path: &Path, layer_name: &str) -> Result<Option<(i64, i64)>> {
    let gpkg = Gpkg::open_read_only(path)?;
    let sql = format!(r#"SELECT MIN(rowid), MAX(rowid) FROM "{layer_name}""#);
    let (min, max): (Option<i64>, Option<i64>) =
        gpkg.connection().query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(min.zip(max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpkg::Gpkg;
    use crate::types::{ColumnSpec, ColumnType};
    use geo_types::Point;
    use wkb::reader::{Dimension, GeometryType};

    fn fixture() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.gpkg");
        let gpkg = Gpkg::new(&path).unwrap();
        let layer = gpkg
            .new_layer(
                "points",
                "geom".to_string(),
                GeometryType::Point,
                Dimension::Xy,
                4326,
                &[ColumnSpec {
                    name: "name".to_string(),
                    column_type: ColumnType::Varchar,
                }],
            )
            .unwrap();
        layer
            .insert(Point::new(1.0, 2.0), [crate::Value::from("a".to_string())])
            .unwrap();
        layer
            .insert(Point::new(3.0, 4.0), [crate::Value::from("b".to_string())])
            .unwrap();
        drop(layer);
        drop(gpkg);
        (dir, path)
    }

    #[test]
    fn describes_the_sole_layer_when_unambiguous() {
        let (_dir, path) = fixture();
        let descriptor = describe(&path, None).unwrap();
        assert_eq!(descriptor.layer_name, "points");
        assert_eq!(descriptor.feature_count, 2);
        assert_eq!(descriptor.columns.len(), 1);
    }

    #[test]
    fn rowid_extrema_reflects_inserted_rows() {
        let (_dir, path) = fixture();
        let extrema = rowid_extrema(&path, "points").unwrap();
        assert_eq!(extrema, Some((1, 2)));
    }
}
