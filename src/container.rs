//! Container I/O Adapter (C2): translation into the engine's native
//! container format, cross-container layer append, spatial indexing, and
//! file lifecycle (move/remove).
//!
//! The native container format is GeoPackage-over-SQLite (`src/gpkg`).
//! Translation between other vector formats and the native one is delegated
//! to an external collaborator (`translate`, §6) rather than implemented
//! here — this crate only ever reads/writes GeoPackage directly.

use crate::gpkg::Gpkg;
use crate::ogc_sql::execute_rtree_sqls;
use crate::op_error::{GfoError, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

const NATIVE_EXTENSION: &str = "gpkg";

/// `ensure_native(path, layer) -> path'`: if `path` is already a GeoPackage,
/// return it unchanged; otherwise translate the named layer into a new
/// scratch container under `scratch_dir` and return that path.
pub fn ensure_native(path: &Path, layer: &str, scratch_dir: &Path) -> Result<PathBuf> {
    if path.extension().and_then(|e| e.to_str()) == Some(NATIVE_EXTENSION) {
        return Ok(path.to_path_buf());
    }
    let dst = scratch_dir.join(format!("{layer}.{NATIVE_EXTENSION}"));
    translate(TranslateRequest {
        src: path.to_path_buf(),
        src_layer: Some(layer.to_string()),
        dst: dst.clone(),
        dst_layer: Some(layer.to_string()),
        create_spatial_index: false,
        sql_stmt: None,
        sql_dialect: None,
        explode: false,
        force_geometrytype: None,
        append: false,
        update: false,
    })?;
    Ok(dst)
}

/// Appends all features of `src`'s sole layer into `dst_layer` in `dst`.
///
/// Must be serial across calls into the same `dst`: the container format
/// does not support concurrent writers, so the coordinator (C6) is the only
/// caller and calls this once per completed batch, in arrival order.
pub fn append(src: &Path, dst: &Path, dst_layer: &str, create_index: bool) -> Result<()> {
    let source = Gpkg::open_read_only(src)?;
    let src_layer_name = {
        let mut layers = source.list_layers()?;
        if layers.len() != 1 {
            return Err(GfoError::Io(format!(
                "expected exactly one layer in partial output {}, found {}",
                src.display(),
                layers.len()
            )));
        }
        layers.remove(0)
    };
    let src_layer = source.open_layer(&src_layer_name)?;

    let destination = if dst.exists() {
        Gpkg::open(dst)?
    } else {
        let gpkg = Gpkg::new(dst)?;
        gpkg.new_layer(
            dst_layer,
            src_layer.geometry_column.clone(),
            src_layer.geometry_type,
            src_layer.geometry_dimension,
            src_layer.srs_id,
            &src_layer.other_columns,
        )?;
        gpkg
    };
    let dest_layer = destination.open_layer(dst_layer)?;

    for feature in src_layer.features()? {
        let geom = feature.geometry()?;
        let properties = feature.properties().to_vec();
        dest_layer.insert(geom, properties)?;
    }

    if create_index {
        create_spatial_index(dst, dst_layer)?;
    }

    Ok(())
}

/// Builds the R-tree side table supporting a layer's spatial joins.
pub fn create_spatial_index(path: &Path, layer: &str) -> Result<()> {
    let gpkg = Gpkg::open(path)?;
    let handle = gpkg.open_layer(layer)?;
    execute_rtree_sqls(
        gpkg.connection(),
        layer,
        &handle.geometry_column,
        &handle.primary_key_column,
    )?;
    Ok(())
}

/// Atomic rename within a filesystem, falling back to copy+delete across
/// filesystems (e.g. scratch dir on a different mount than the destination).
pub fn move_container(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(src, dst)?;
            std::fs::remove_file(src)?;
            Ok(())
        }
    }
}

/// Removes a container file. Missing files are not an error: CLEANUP may
/// race a partial output that was already consumed.
pub fn remove(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Parameters for the external vector-translation collaborator (§6).
pub struct TranslateRequest {
    pub src: PathBuf,
    pub src_layer: Option<String>,
    pub dst: PathBuf,
    pub dst_layer: Option<String>,
    pub create_spatial_index: bool,
    pub sql_stmt: Option<String>,
    pub sql_dialect: Option<String>,
    pub explode: bool,
    pub force_geometrytype: Option<String>,
    pub append: bool,
    pub update: bool,
}

/// Delegates format conversion to an external `ogr2ogr`-style binary.
///
/// `GFO_GDAL_HOME` (§6/D) is read here, and only here: if set, the binary is
/// looked up in that directory; otherwise it's resolved from `PATH`.
pub fn translate(req: TranslateRequest) -> Result<()> {
    let binary = match std::env::var_os(crate::config::GFO_GDAL_HOME_VAR) {
        Some(home) => Path::new(&home).join("ogr2ogr"),
        None => PathBuf::from("ogr2ogr"),
    };

    let mut cmd = Command::new(&binary);
    if req.append {
        cmd.arg("-append");
    }
    if req.update {
        cmd.arg("-update");
    }
    if req.explode {
        cmd.arg("-explodecollections");
    }
    if let Some(geomtype) = &req.force_geometrytype {
        cmd.args(["-nlt", geomtype]);
    }
    if let Some(dialect) = &req.sql_dialect {
        cmd.args(["-dialect", dialect]);
    }
    if let Some(sql) = &req.sql_stmt {
        cmd.args(["-sql", sql]);
    }
    if let Some(dst_layer) = &req.dst_layer {
        cmd.args(["-nln", dst_layer]);
    }
    if req.create_spatial_index {
        cmd.args(["-lco", "SPATIAL_INDEX=YES"]);
    }
    cmd.arg(&req.dst).arg(&req.src);
    if let Some(src_layer) = &req.src_layer {
        cmd.arg(src_layer);
    }

    let status = cmd
        .status()
        .map_err(|err| GfoError::Io(format!("failed to launch {}: {err}", binary.display())))?;
    if !status.success() {
        return Err(GfoError::Io(format!(
            "{} exited with {status}",
            binary.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnSpec, ColumnType};
    use geo_types::Point;
    use wkb::reader::{Dimension, GeometryType};

    fn make_gpkg_with_point(path: &Path, layer: &str) {
        let gpkg = Gpkg::new(path).unwrap();
        let l = gpkg
            .new_layer(
                layer,
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
        l.insert(Point::new(1.0, 1.0), [crate::Value::from("a".to_string())])
            .unwrap();
    }

    #[test]
    fn ensure_native_returns_gpkg_paths_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("already_native.gpkg");
        make_gpkg_with_point(&path, "points");
        let result = ensure_native(&path, "points", dir.path()).unwrap();
        assert_eq!(result, path);
    }

    #[test]
    fn append_creates_destination_and_copies_rows() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("partial.gpkg");
        make_gpkg_with_point(&src, "partial_0");

        let dst = dir.path().join("consolidated.gpkg");
        append(&src, &dst, "result", false).unwrap();

        let gpkg = Gpkg::open_read_only(&dst).unwrap();
        let layer = gpkg.open_layer("result").unwrap();
        assert_eq!(layer.features().unwrap().count(), 1);
    }

    #[test]
    fn move_container_renames_within_same_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.gpkg");
        make_gpkg_with_point(&src, "points");
        let dst = dir.path().join("nested").join("b.gpkg");
        move_container(&src, &dst).unwrap();
        assert!(!src.exists());
        assert!(dst.exists());
    }

    #[test]
    fn remove_is_idempotent_for_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.gpkg");
        remove(&missing).unwrap();
    }
}
