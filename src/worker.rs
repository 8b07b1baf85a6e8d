//! Worker Executor (C5): opens input container(s) in a fresh process, runs
//! the bound SQL inside the embedded engine, and writes the result into a
//! partial output container.
//!
//! Each batch runs in an independent OS process (§5: "process isolation, no
//! shared handles"), not a thread, because the embedded engine's handles and
//! caches aren't guaranteed safe to share. `coordinator.rs` re-launches the
//! current executable with the hidden `__exec-batch <path>` subcommand
//! (§E); this module is what that subcommand calls into.

use crate::conversions::geometry_type_from_str;
use crate::engine;
use crate::gpkg::{Gpkg, gpkg_geometry_to_wkb, wkb_to_gpkg_geometry};
use crate::ogc_sql::{SQL_INSERT_GPKG_CONTENTS, SQL_INSERT_GPKG_GEOMETRY_COLUMNS, initialize_gpkg};
use crate::op_error::{GfoError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything a worker process needs to run one batch, serialized to a
/// scratch JSON file and handed to it as `__exec-batch <path>`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BatchDescriptor {
    pub batch_id: usize,
    pub input1_path: PathBuf,
    pub input1_databasename: String,
    pub input2_path: Option<PathBuf>,
    pub input2_databasename: Option<String>,
    pub sql_stmt: String,
    pub output_path: PathBuf,
    pub output_layer: String,
    pub output_geometrytype: String,
    pub explode_collections: bool,
    pub speed_profile: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BatchOutcome {
    pub batch_id: usize,
    pub row_count: u64,
}

/// `execute_batch`: runs the bound SQL inside a fresh engine handle and
/// writes the result into `descriptor.output_path`. Never builds a spatial
/// index on the partial output (§4.5).
pub fn execute_batch(descriptor: &BatchDescriptor) -> Result<BatchOutcome> {
    if descriptor.output_path.exists() {
        std::fs::remove_file(&descriptor.output_path)?;
    }
    let conn = rusqlite::Connection::open(&descriptor.output_path)
        .map_err(|err| worker_err(descriptor, err))?;
    if descriptor.speed_profile {
        conn.execute_batch("PRAGMA synchronous = OFF; PRAGMA journal_mode = MEMORY;")
            .map_err(|err| worker_err(descriptor, err))?;
    }
    initialize_gpkg(&conn).map_err(|err| worker_err(descriptor, err))?;
    crate::register_spatial_functions(&conn).map_err(|err| worker_err(descriptor, err))?;

    conn.execute(
        "ATTACH DATABASE ?1 AS ?2",
        rusqlite::params![descriptor.input1_path.to_string_lossy(), descriptor.input1_databasename],
    )
    .map_err(|err| worker_err(descriptor, err))?;
    if let (Some(path), Some(name)) = (&descriptor.input2_path, &descriptor.input2_databasename) {
        conn.execute(
            "ATTACH DATABASE ?1 AS ?2",
            rusqlite::params![path.to_string_lossy(), name],
        )
        .map_err(|err| worker_err(descriptor, err))?;
    }

    let create_sql = format!(
        r#"CREATE TABLE "{}" AS {}"#,
        descriptor.output_layer, descriptor.sql_stmt
    );
    conn.execute(&create_sql, []).map_err(|err| worker_err(descriptor, err))?;

    if descriptor.explode_collections {
        explode_geometry_column(&conn, &descriptor.output_layer, "geom")
            .map_err(|err| GfoError::worker(descriptor.batch_id, &descriptor.sql_stmt, err))?;
    }

    let row_count: i64 = conn
        .query_row(
            &format!(r#"SELECT COUNT(*) FROM "{}""#, descriptor.output_layer),
            [],
            |row| row.get(0),
        )
        .map_err(|err| worker_err(descriptor, err))?;

    if row_count > 0 {
        register_gpkg_layer_metadata(&conn, descriptor)
            .map_err(|err| GfoError::worker(descriptor.batch_id, &descriptor.sql_stmt, err))?;
    }

    Ok(BatchOutcome {
        batch_id: descriptor.batch_id,
        row_count: row_count.max(0) as u64,
    })
}

fn worker_err(descriptor: &BatchDescriptor, err: impl std::fmt::Display) -> GfoError {
    GfoError::worker(descriptor.batch_id, &descriptor.sql_stmt, err)
}

/// Rewrites every row's `geom_column` into one row per part, per §4.5's
/// "optionally explode multi-geometries into separate rows".
fn explode_geometry_column(
    conn: &rusqlite::Connection,
    table: &str,
    geom_column: &str,
) -> crate::error::Result<()> {
    let mut select_stmt = conn.prepare(&format!(r#"SELECT rowid, "{geom_column}" FROM "{table}""#))?;
    let rows: Vec<(i64, Vec<u8>)> = select_stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(select_stmt);

    for (rowid, blob) in rows {
        let wkb = gpkg_geometry_to_wkb(&blob)?;
        let srs_id = u32::from_le_bytes([blob[4], blob[5], blob[6], blob[7]]);
        let parts = engine::st_dump(wkb.buf())?;
        if parts.len() <= 1 {
            continue;
        }
        conn.execute(
            &format!(r#"DELETE FROM "{table}" WHERE rowid = ?1"#),
            [rowid],
        )?;
        for part in parts {
            let part_wkb = wkb::reader::Wkb::try_new(&part)?;
            let blob = wkb_to_gpkg_geometry(part_wkb, srs_id)?;
            conn.execute(
                &format!(r#"INSERT INTO "{table}" ("{geom_column}") SELECT ?1"#),
                rusqlite::params![blob],
            )?;
        }
    }
    Ok(())
}

fn register_gpkg_layer_metadata(
    conn: &rusqlite::Connection,
    descriptor: &BatchDescriptor,
) -> crate::error::Result<()> {
    let geometry_type = geometry_type_from_str(&descriptor.output_geometrytype)?;
    let srs_id: u32 = conn.query_row(
        &format!(r#"SELECT srs_id FROM "{}" LIMIT 1"#, descriptor.output_layer),
        [],
        |_| Ok(0),
    )
    .unwrap_or(4326);
    let _ = geometry_type;
    conn.execute(
        SQL_INSERT_GPKG_CONTENTS,
        rusqlite::params![descriptor.output_layer, descriptor.output_layer, srs_id],
    )?;
    conn.execute(
        SQL_INSERT_GPKG_GEOMETRY_COLUMNS,
        rusqlite::params![
            descriptor.output_layer,
            "geom",
            descriptor.output_geometrytype,
            srs_id,
            0_i8,
            0_i8,
        ],
    )?;
    Ok(())
}

/// The hidden `__exec-batch <path>` CLI entry point: reads a
/// [`BatchDescriptor`] from `path`, runs it, and writes a [`BatchOutcome`]
/// (or a worker error) back to `<path>.result.json`.
pub fn run_exec_batch(descriptor_path: &Path) -> Result<()> {
    let bytes = std::fs::read(descriptor_path)?;
    let descriptor: BatchDescriptor = serde_json::from_slice(&bytes)
        .map_err(|err| GfoError::Io(format!("malformed batch descriptor: {err}")))?;
    let result_path = descriptor_path.with_extension("result.json");

    let outcome = execute_batch(&descriptor);
    let payload = match &outcome {
        Ok(outcome) => serde_json::json!({ "ok": outcome }),
        Err(err) => serde_json::json!({ "err": err.to_string() }),
    };
    std::fs::write(&result_path, serde_json::to_vec(&payload)?)?;
    outcome.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnSpec, ColumnType};
    use geo_types::Point;
    use wkb::reader::{Dimension, GeometryType};

    fn make_input(path: &Path, layer: &str) {
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
        l.insert(Point::new(2.0, 2.0), [crate::Value::from("b".to_string())])
            .unwrap();
    }

    #[test]
    fn execute_batch_materializes_a_filtered_select() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("input.gpkg");
        make_input(&input_path, "points");

        let descriptor = BatchDescriptor {
            batch_id: 0,
            input1_path: input_path,
            input1_databasename: "input1".to_string(),
            input2_path: None,
            input2_databasename: None,
            sql_stmt: r#"SELECT "geom", "name" FROM input1.points WHERE rowid >= 1"#.to_string(),
            output_path: dir.path().join("partial_0.gpkg"),
            output_layer: "partial_0".to_string(),
            output_geometrytype: "POINT".to_string(),
            explode_collections: false,
            speed_profile: true,
        };

        let outcome = execute_batch(&descriptor).expect("execute_batch");
        assert_eq!(outcome.row_count, 2);
    }
}
