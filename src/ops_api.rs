//! Public per-operation surface (§6): one callable per §4.7 operation, each
//! taking an [`OperationRequest`] plus whatever scalar parameters are
//! specific to that operation. This is what both `src/bin/gfo.rs` and any
//! library caller go through; none of them touch `coordinator`/`operations`
//! directly.
//!
//! Two-layer operations that need a primitive family to choose their output
//! geometry type (`erase`, `intersect`, `split`) derive it themselves from
//! the input layers' declared geometry types, the way the original source
//! inspects `input_layer_info.geometrytypename` up front rather than asking
//! the caller to classify it.

use crate::container;
use crate::coordinator::{self, OperationRequest, RunOutcome};
use crate::gpkg::Gpkg;
use crate::inspector;
use crate::op_error::{GfoError, Result};
use crate::operations;
use crate::types::ColumnSpec;
use geo_types::Polygon;

pub fn buffer(request: &OperationRequest, distance: f64, quadrant_segments: i32) -> Result<RunOutcome> {
    coordinator::run(&operations::buffer(distance, quadrant_segments), request)
}

/// Returns `true` iff no invalid geometries were found (§6: "true iff no
/// output file is produced").
pub fn isvalid(request: &OperationRequest, only_invalid: bool) -> Result<bool> {
    let outcome = coordinator::run(&operations::isvalid(only_invalid), request)?;
    Ok(!outcome.output_produced)
}

pub fn convexhull(request: &OperationRequest) -> Result<RunOutcome> {
    coordinator::run(&operations::convexhull(), request)
}

pub fn simplify(request: &OperationRequest, tolerance: f64) -> Result<RunOutcome> {
    coordinator::run(&operations::simplify(tolerance), request)
}

pub fn makevalid(request: &OperationRequest) -> Result<RunOutcome> {
    coordinator::run(&operations::makevalid(), request)
}

pub fn select(request: &OperationRequest, sql_stmt: String) -> Result<RunOutcome> {
    coordinator::run(&operations::select(sql_stmt), request)
}

fn require_input2(request: &OperationRequest) -> Result<&std::path::Path> {
    request
        .input2_path
        .as_deref()
        .ok_or_else(|| GfoError::Precondition("two-layer operation requires input2".to_string()))
}

pub fn erase(request: &OperationRequest) -> Result<RunOutcome> {
    let _ = require_input2(request)?;
    let input1_meta = inspector::describe(&request.input1_path, request.input1_layer.as_deref())?;
    let primitive = operations::primitive_of(input1_meta.geometry_type);
    coordinator::run(&operations::erase(primitive), request)
}

pub fn intersect(request: &OperationRequest) -> Result<RunOutcome> {
    let input2_path = require_input2(request)?;
    let input1_meta = inspector::describe(&request.input1_path, request.input1_layer.as_deref())?;
    let input2_meta = inspector::describe(input2_path, request.input2_layer.as_deref())?;
    let smaller = operations::primitive_of(input1_meta.geometry_type)
        .min(operations::primitive_of(input2_meta.geometry_type));
    coordinator::run(&operations::intersect(smaller), request)
}

pub fn split(request: &OperationRequest) -> Result<RunOutcome> {
    let _ = require_input2(request)?;
    let input1_meta = inspector::describe(&request.input1_path, request.input1_layer.as_deref())?;
    let primitive = operations::primitive_of(input1_meta.geometry_type);
    coordinator::run(&operations::split(primitive), request)
}

pub fn join_by_location(
    request: &OperationRequest,
    discard_nonmatching: bool,
    min_area_intersect: Option<f64>,
    area_inters_column: Option<&str>,
) -> Result<RunOutcome> {
    let _ = require_input2(request)?;
    coordinator::run(
        &operations::join_by_location(discard_nonmatching, min_area_intersect, area_inters_column),
        request,
    )
}

pub fn export_by_location(
    request: &OperationRequest,
    min_area_intersect: Option<f64>,
    area_inters_column: Option<&str>,
) -> Result<RunOutcome> {
    let _ = require_input2(request)?;
    coordinator::run(
        &operations::export_by_location(min_area_intersect, area_inters_column),
        request,
    )
}

pub fn export_by_distance(request: &OperationRequest, max_distance: f64) -> Result<RunOutcome> {
    let _ = require_input2(request)?;
    coordinator::run(&operations::export_by_distance(max_distance), request)
}

/// **union(input1, input2)**: `split(input1, input2) ∪ erase(input2,
/// input1)`. Not an `Operation` template — runs both halves to scratch
/// outputs, appends erase's rows into split's, and moves the result into
/// place (§4.7).
pub fn union(request: &OperationRequest) -> Result<RunOutcome> {
    let input2_path = require_input2(request)?.to_path_buf();
    if request.output_path.exists() {
        if !request.force {
            return Ok(RunOutcome {
                output_produced: true,
                feature_count: 0,
            });
        }
        container::remove(&request.output_path)?;
    }
    let scratch = tempfile::tempdir()?;
    let output_layer = request.output_layer.clone().unwrap_or_else(|| "result".to_string());

    let mut split_request = request.clone();
    split_request.output_path = scratch.path().join("split.gpkg");
    split_request.output_layer = Some(output_layer.clone());
    split_request.force = true;
    let split_outcome = split(&split_request)?;

    let mut erase_request = request.clone();
    erase_request.input1_path = input2_path;
    erase_request.input1_layer = request.input2_layer.clone();
    erase_request.input1_columns = request.input2_columns.clone();
    erase_request.input1_columns_prefix = request.input2_columns_prefix.clone();
    erase_request.input2_path = Some(request.input1_path.clone());
    erase_request.input2_layer = request.input1_layer.clone();
    erase_request.input2_columns = request.input1_columns.clone();
    erase_request.input2_columns_prefix = request.input1_columns_prefix.clone();
    erase_request.output_path = scratch.path().join("erase.gpkg");
    erase_request.output_layer = Some(output_layer.clone());
    erase_request.force = true;
    let erase_outcome = erase(&erase_request)?;

    match (split_outcome.output_produced, erase_outcome.output_produced) {
        (false, false) => Ok(RunOutcome {
            output_produced: false,
            feature_count: 0,
        }),
        (false, true) => {
            container::move_container(&erase_request.output_path, &request.output_path)?;
            Ok(erase_outcome)
        }
        (true, false) => {
            container::move_container(&split_request.output_path, &request.output_path)?;
            Ok(split_outcome)
        }
        (true, true) => {
            // `split_request.output_path` already carries the rtree index and
            // triggers installed by its own finalization; appending through
            // `GpkgLayer::insert` lets those triggers keep it current, so no
            // second index build is needed here.
            container::append(
                &erase_request.output_path,
                &split_request.output_path,
                &output_layer,
                false,
            )?;
            container::remove(&erase_request.output_path)?;
            container::move_container(&split_request.output_path, &request.output_path)?;
            Ok(RunOutcome {
                output_produced: true,
                feature_count: split_outcome.feature_count + erase_outcome.feature_count,
            })
        }
    }
}

/// **dissolve(groupby_columns?)**: single query, no batching — run directly
/// against the input container rather than through the worker/coordinator
/// pipeline (§4.7: "currently single-threaded, one query, no batching").
pub fn dissolve(request: &OperationRequest, groupby_columns: &[String]) -> Result<RunOutcome> {
    if request.output_path.exists() {
        if !request.force {
            return Ok(RunOutcome {
                output_produced: true,
                feature_count: 0,
            });
        }
        container::remove(&request.output_path)?;
    }

    let input_meta = inspector::describe(&request.input1_path, request.input1_layer.as_deref())?;
    if input_meta.feature_count == 0 {
        return Ok(RunOutcome {
            output_produced: false,
            feature_count: 0,
        });
    }

    let groupby_specs = resolve_groupby_columns(groupby_columns, &input_meta.columns)?;
    let output_geometry_type = operations::multi_of(operations::primitive_of(input_meta.geometry_type));
    let output_layer = request.output_layer.clone().unwrap_or_else(|| "result".to_string());
    let sql = operations::dissolve_sql(&input_meta.layer_name, groupby_columns);

    let source = Gpkg::open_read_only(&request.input1_path)?;

    let scratch = tempfile::tempdir()?;
    let scratch_output = scratch.path().join("dissolve.gpkg");
    let dest = Gpkg::new(&scratch_output)?;
    let dest_layer = dest.new_layer(
        &output_layer,
        "geom".to_string(),
        output_geometry_type,
        input_meta.geometry_dimension,
        input_meta.srs_id,
        &groupby_specs,
    )?;

    let row_count = run_dissolve_query(&source, &sql, &dest_layer)?;
    drop(dest_layer);
    drop(dest);
    drop(source);

    if row_count == 0 {
        return Ok(RunOutcome {
            output_produced: false,
            feature_count: 0,
        });
    }
    container::create_spatial_index(&scratch_output, &output_layer)?;
    container::move_container(&scratch_output, &request.output_path)?;
    Ok(RunOutcome {
        output_produced: true,
        feature_count: row_count,
    })
}

fn resolve_groupby_columns(groupby_columns: &[String], available: &[ColumnSpec]) -> Result<Vec<ColumnSpec>> {
    groupby_columns
        .iter()
        .map(|name| {
            available
                .iter()
                .find(|spec| spec.name.eq_ignore_ascii_case(name))
                .cloned()
                .ok_or_else(|| GfoError::Precondition(format!("unknown groupby column: {name}")))
        })
        .collect()
}

fn run_dissolve_query(source: &Gpkg, sql: &str, dest_layer: &crate::GpkgLayer<'_>) -> Result<u64> {
    let mut stmt = sql_err(source.connection().prepare(sql))?;
    let column_count = stmt.column_count();
    let mut rows = sql_err(stmt.query([]))?;
    let mut row_count: u64 = 0;
    while let Some(row) = sql_err(rows.next())? {
        let geom_blob: Option<Vec<u8>> = sql_err(row.get(0))?;
        let Some(geom_blob) = geom_blob else { continue };
        let wkb = crate::gpkg::gpkg_geometry_to_wkb(&geom_blob)?;
        let properties = (1..column_count)
            .map(|idx| sql_err(row.get_ref(idx)).map(crate::Value::from))
            .collect::<Result<Vec<_>>>()?;
        dest_layer.insert(wkb, properties)?;
        row_count += 1;
    }
    Ok(row_count)
}

fn sql_err<T>(result: rusqlite::Result<T>) -> Result<T> {
    result.map_err(|err| GfoError::Io(err.to_string()))
}

/// **dissolve_cardsheets(cells)**: partitions dissolve work along an
/// external polygon grid, one partial per cell, appended serially. Each
/// cell's query is restricted to rows whose bounding box overlaps the
/// cell's (§G, supplemented from `geofileops_sql.py`'s grid-dissolve path).
pub fn dissolve_cardsheets(
    request: &OperationRequest,
    groupby_columns: &[String],
    cells: &[Polygon<f64>],
) -> Result<RunOutcome> {
    if request.output_path.exists() {
        if !request.force {
            return Ok(RunOutcome {
                output_produced: true,
                feature_count: 0,
            });
        }
        container::remove(&request.output_path)?;
    }
    if cells.is_empty() {
        return Err(GfoError::Precondition("dissolve_cardsheets requires at least one cell".to_string()));
    }

    let input_meta = inspector::describe(&request.input1_path, request.input1_layer.as_deref())?;
    let groupby_specs = resolve_groupby_columns(groupby_columns, &input_meta.columns)?;
    let output_geometry_type = operations::multi_of(operations::primitive_of(input_meta.geometry_type));
    let output_layer = request.output_layer.clone().unwrap_or_else(|| "result".to_string());

    let source = Gpkg::open_read_only(&request.input1_path)?;

    let scratch = tempfile::tempdir()?;
    let consolidated_path = scratch.path().join("cardsheets.gpkg");
    let mut total_rows: u64 = 0;

    for (cell_id, cell) in cells.iter().enumerate() {
        let (minx, miny, maxx, maxy) = polygon_bbox(cell);
        let sql = cardsheet_cell_sql(&input_meta.layer_name, groupby_columns, minx, miny, maxx, maxy);

        let cell_dest = Gpkg::new(scratch.path().join(format!("cell_{cell_id}.gpkg")))?;
        let cell_layer = cell_dest.new_layer(
            &output_layer,
            "geom".to_string(),
            output_geometry_type,
            input_meta.geometry_dimension,
            input_meta.srs_id,
            &groupby_specs,
        )?;
        let cell_rows = run_dissolve_query(&source, &sql, &cell_layer)?;
        drop(cell_layer);
        drop(cell_dest);

        let cell_path = scratch.path().join(format!("cell_{cell_id}.gpkg"));
        if cell_rows > 0 {
            container::append(&cell_path, &consolidated_path, &output_layer, false)?;
            total_rows += cell_rows;
        }
        container::remove(&cell_path)?;
    }

    if total_rows == 0 {
        return Ok(RunOutcome {
            output_produced: false,
            feature_count: 0,
        });
    }
    container::create_spatial_index(&consolidated_path, &output_layer)?;
    container::move_container(&consolidated_path, &request.output_path)?;
    Ok(RunOutcome {
        output_produced: true,
        feature_count: total_rows,
    })
}

fn polygon_bbox(polygon: &Polygon<f64>) -> (f64, f64, f64, f64) {
    let mut minx = f64::INFINITY;
    let mut miny = f64::INFINITY;
    let mut maxx = f64::NEG_INFINITY;
    let mut maxy = f64::NEG_INFINITY;
    for coord in polygon.exterior().coords() {
        minx = minx.min(coord.x);
        miny = miny.min(coord.y);
        maxx = maxx.max(coord.x);
        maxy = maxy.max(coord.y);
    }
    (minx, miny, maxx, maxy)
}

fn cardsheet_cell_sql(
    input_layer: &str,
    groupby_columns: &[String],
    minx: f64,
    miny: f64,
    maxx: f64,
    maxy: f64,
) -> String {
    let bbox_filter = format!(
        r#"ST_MaxX(t."geom") >= {minx} AND ST_MinX(t."geom") <= {maxx}
           AND ST_MaxY(t."geom") >= {miny} AND ST_MinY(t."geom") <= {maxy}"#
    );
    if groupby_columns.is_empty() {
        format!(
            r#"SELECT ST_UnionAgg(t."geom") AS geom FROM "{input_layer}" t WHERE {bbox_filter} GROUP BY '1'"#
        )
    } else {
        let select_cols: String = groupby_columns.iter().map(|c| format!(r#", t."{c}""#)).collect();
        let group_cols: String = groupby_columns
            .iter()
            .map(|c| format!(r#"t."{c}""#))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            r#"SELECT ST_UnionAgg(t."geom") AS geom{select_cols} FROM "{input_layer}" t WHERE {bbox_filter} GROUP BY {group_cols}"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnSpec, ColumnType};
    use geo_types::{LineString, Point};
    use std::path::Path;
    use wkb::reader::{Dimension, GeometryType};

    fn make_point_gpkg(path: &Path, layer: &str, groups: &[&str]) {
        let gpkg = Gpkg::new(path).unwrap();
        let l = gpkg
            .new_layer(
                layer,
                "geom".to_string(),
                GeometryType::Point,
                Dimension::Xy,
                4326,
                &[ColumnSpec {
                    name: "grp".to_string(),
                    column_type: ColumnType::Varchar,
                }],
            )
            .unwrap();
        for (i, group) in groups.iter().enumerate() {
            l.insert(
                Point::new(i as f64, i as f64),
                [crate::Value::from(group.to_string())],
            )
            .unwrap();
        }
    }

    #[test]
    fn dissolve_groups_points_by_column() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.gpkg");
        make_point_gpkg(&input, "points", &["a", "a", "b"]);
        let output = dir.path().join("output.gpkg");

        let request = OperationRequest::single_layer(input, output.clone());
        let outcome = dissolve(&request, &["grp".to_string()]).unwrap();
        assert!(outcome.output_produced);
        assert_eq!(outcome.feature_count, 2);

        let gpkg = Gpkg::open_read_only(&output).unwrap();
        let layer = gpkg.open_layer("result").unwrap();
        assert_eq!(layer.features().unwrap().count(), 2);
    }

    #[test]
    fn dissolve_without_groupby_merges_everything() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.gpkg");
        make_point_gpkg(&input, "points", &["a", "b", "c"]);
        let output = dir.path().join("output.gpkg");

        let request = OperationRequest::single_layer(input, output.clone());
        let outcome = dissolve(&request, &[]).unwrap();
        assert!(outcome.output_produced);
        assert_eq!(outcome.feature_count, 1);
    }

    #[test]
    fn dissolve_rejects_unknown_groupby_column() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.gpkg");
        make_point_gpkg(&input, "points", &["a"]);
        let request = OperationRequest::single_layer(input, dir.path().join("output.gpkg"));
        let err = dissolve(&request, &["bogus".to_string()]).unwrap_err();
        assert!(matches!(err, GfoError::Precondition(_)));
    }

    #[test]
    fn dissolve_cardsheets_splits_work_by_cell() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.gpkg");
        make_point_gpkg(&input, "points", &["a", "a", "b"]);
        let output = dir.path().join("output.gpkg");

        let left_cell = Polygon::new(
            LineString::from(vec![(-1.0, -1.0), (1.5, -1.0), (1.5, 1.5), (-1.0, 1.5), (-1.0, -1.0)]),
            vec![],
        );
        let right_cell = Polygon::new(
            LineString::from(vec![(1.5, -1.0), (3.0, -1.0), (3.0, 3.0), (1.5, 3.0), (1.5, -1.0)]),
            vec![],
        );

        let request = OperationRequest::single_layer(input, output.clone());
        let outcome =
            dissolve_cardsheets(&request, &["grp".to_string()], &[left_cell, right_cell]).unwrap();
        assert!(outcome.output_produced);
        assert_eq!(outcome.feature_count, 2);
    }

    #[test]
    fn polygon_bbox_covers_all_vertices() {
        let polygon = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (2.0, 0.0), (2.0, 3.0), (0.0, 3.0), (0.0, 0.0)]),
            vec![],
        );
        assert_eq!(polygon_bbox(&polygon), (0.0, 0.0, 2.0, 3.0));
    }
}
