//! Coordinator (C6): owns the lifecycle of a single operation end to end —
//! validate, plan, dispatch, collect, finalize, clean up — per the state
//! machine in §4.6:
//!
//! ```text
//! INIT -> VALIDATED -> PLANNED -> DISPATCHING -> COLLECTING -> FINALIZING -> DONE
//!                                           \-> failed -> CLEANUP
//! ```

use crate::batch::{self, ProcessingPlan};
use crate::conversions::geometry_type_to_str;
use crate::container;
use crate::inspector;
use crate::op_error::{GfoError, Result};
use crate::operations::{self, Arity, GeometryTypePolicy, Operation};
use crate::progress::ProgressReporter;
use crate::template::{self, TemplateContext};
use crate::types::{ColumnSpec, GpkgLayerMetadata};
use crate::worker::{self, BatchDescriptor};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wkb::reader::GeometryType;

/// Operation request (§3): everything an operation needs beyond the
/// `Operation` template itself.
#[derive(Clone, Debug)]
pub struct OperationRequest {
    pub input1_path: PathBuf,
    pub input1_layer: Option<String>,
    pub input1_columns: Option<Vec<String>>,
    pub input1_columns_prefix: String,
    pub input2_path: Option<PathBuf>,
    pub input2_layer: Option<String>,
    pub input2_columns: Option<Vec<String>>,
    pub input2_columns_prefix: String,
    pub output_path: PathBuf,
    pub output_layer: Option<String>,
    pub output_geometrytype_override: Option<GeometryType>,
    pub explode_collections: bool,
    pub nb_parallel: Option<i64>,
    pub force: bool,
    pub speed_profile: bool,
}

impl OperationRequest {
    pub fn single_layer(input1_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        OperationRequest {
            input1_path: input1_path.into(),
            input1_layer: None,
            input1_columns: None,
            input1_columns_prefix: String::new(),
            input2_path: None,
            input2_layer: None,
            input2_columns: None,
            input2_columns_prefix: String::new(),
            output_path: output_path.into(),
            output_layer: None,
            output_geometrytype_override: None,
            explode_collections: false,
            nb_parallel: None,
            force: false,
            speed_profile: true,
        }
    }

    pub fn two_layer(
        input1_path: impl Into<PathBuf>,
        input2_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        OperationRequest {
            input2_path: Some(input2_path.into()),
            input1_columns_prefix: "l1_".to_string(),
            input2_columns_prefix: "l2_".to_string(),
            ..OperationRequest::single_layer(input1_path, output_path)
        }
    }
}

/// Outcome of a completed (or early-returned) operation.
#[derive(Debug)]
pub struct RunOutcome {
    pub output_produced: bool,
    pub feature_count: u64,
}

/// Runs `operation` against `request` to completion, per the C6 state
/// machine. This is the single entry point every `ops_api.rs` wrapper calls
/// into.
pub fn run(operation: &Operation, request: &OperationRequest) -> Result<RunOutcome> {
    let span = tracing::info_span!("operation", name = operation.name);
    let _enter = span.enter();

    // INIT -> VALIDATED
    if !request.input1_path.exists() {
        return Err(GfoError::Precondition(format!(
            "input file does not exist: {}",
            request.input1_path.display()
        )));
    }
    if operation.arity == Arity::Two {
        match &request.input2_path {
            Some(path) if path.exists() => {}
            Some(path) => {
                return Err(GfoError::Precondition(format!(
                    "input2 file does not exist: {}",
                    path.display()
                )));
            }
            None => {
                return Err(GfoError::Precondition(
                    "two-layer operation requires input2_path".to_string(),
                ));
            }
        }
    }
    if request.output_path.exists() {
        if !request.force {
            tracing::info!("output already exists and force=false, nothing to do");
            return Ok(RunOutcome {
                output_produced: true,
                feature_count: 0,
            });
        }
        container::remove(&request.output_path)?;
    }

    // VALIDATED -> PLANNED
    let scratch_dir = tempfile::tempdir()?;
    let input1_meta = inspector::describe(&request.input1_path, request.input1_layer.as_deref())?;
    let input2_meta = match (&request.input2_path, operation.arity) {
        (Some(path), Arity::Two) => {
            Some(inspector::describe(path, request.input2_layer.as_deref())?)
        }
        _ => None,
    };

    let nb_parallel_hint = request.nb_parallel.unwrap_or(operation.default_parallelism);
    let rowid_extrema = inspector::rowid_extrema(&request.input1_path, &input1_meta.layer_name)?;
    let plan = batch::plan(
        input1_meta.feature_count,
        rowid_extrema,
        nb_parallel_hint,
        operation.arity == Arity::Two,
    )?;

    if input1_meta.feature_count == 0 {
        tracing::warn!("input layer is empty, no output will be produced");
        return Ok(RunOutcome {
            output_produced: false,
            feature_count: 0,
        });
    }

    let output_layer = request
        .output_layer
        .clone()
        .unwrap_or_else(|| "result".to_string());
    let output_geometrytype = request.output_geometrytype_override.unwrap_or_else(|| {
        resolve_output_geometrytype(&operation.geometry_type_policy, &input1_meta, input2_meta.as_ref())
    });

    // PLANNED -> DISPATCHING
    let descriptors = build_descriptors(
        operation,
        request,
        &plan,
        &input1_meta,
        input2_meta.as_ref(),
        scratch_dir.path(),
        &output_layer,
        output_geometrytype,
    )?;

    let mut reporter = ProgressReporter::new(operation.name, descriptors.len());
    let mut children: Vec<(usize, PathBuf, std::process::Child)> = Vec::with_capacity(descriptors.len());
    let current_exe = std::env::current_exe()?;
    for descriptor in &descriptors {
        let descriptor_path = scratch_dir.path().join(format!("batch_{}.json", descriptor.batch_id));
        std::fs::write(&descriptor_path, serde_json::to_vec(descriptor)?)?;
        let child = std::process::Command::new(&current_exe)
            .arg("__exec-batch")
            .arg(&descriptor_path)
            .spawn()?;
        children.push((descriptor.batch_id, descriptor_path, child));
    }

    // DISPATCHING -> COLLECTING
    let consolidated_path = scratch_dir.path().join("consolidated.gpkg");
    let mut total_rows: u64 = 0;
    let mut failure: Option<GfoError> = None;

    while !children.is_empty() {
        let mut i = 0;
        while i < children.len() {
            let finished = {
                let (_, _, child) = &mut children[i];
                matches!(child.try_wait(), Ok(Some(_)))
            };
            if !finished {
                i += 1;
                continue;
            }
            let (batch_id, descriptor_path, mut child) = children.remove(i);
            let _ = child.wait();
            let result_path = descriptor_path.with_extension("result.json");

            if failure.is_some() {
                // Already failing: drain remaining completions without
                // appending their (untrusted) partials.
                let _ = std::fs::remove_file(&result_path);
                continue;
            }

            match read_outcome(&result_path) {
                Ok(outcome) if outcome.row_count == 0 => {
                    // Nothing was registered as a gpkg layer for an empty
                    // batch (worker.rs only does so when row_count > 0);
                    // there is nothing to append.
                    let _ = container::remove(&descriptors[batch_id].output_path);
                    reporter.record_completion();
                }
                Ok(outcome) => {
                    let partial = &descriptors[batch_id].output_path;
                    match container::append(partial, &consolidated_path, &output_layer, false) {
                        Ok(()) => {
                            total_rows += outcome.row_count;
                            let _ = container::remove(partial);
                            reporter.record_completion();
                        }
                        Err(err) => failure = Some(err),
                    }
                }
                Err(err) => failure = Some(err),
            }
        }
        if !children.is_empty() {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    if let Some(err) = failure {
        // CLEANUP: scratch_dir is removed on drop.
        return Err(err);
    }

    // FINALIZING
    if total_rows == 0 || !consolidated_path.exists() {
        reporter.warn_empty_result();
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

fn read_outcome(result_path: &Path) -> Result<worker::BatchOutcome> {
    let bytes = std::fs::read(result_path)
        .map_err(|err| GfoError::Io(format!("missing worker result {}: {err}", result_path.display())))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)?;
    if let Some(err) = value.get("err").and_then(|v| v.as_str()) {
        return Err(GfoError::Io(err.to_string()));
    }
    let outcome: worker::BatchOutcome = serde_json::from_value(
        value
            .get("ok")
            .cloned()
            .ok_or_else(|| GfoError::Io("malformed worker result".to_string()))?,
    )?;
    Ok(outcome)
}

fn resolve_output_geometrytype(
    policy: &GeometryTypePolicy,
    input1: &GpkgLayerMetadata,
    input2: Option<&GpkgLayerMetadata>,
) -> GeometryType {
    match policy {
        GeometryTypePolicy::SameAsInput | GeometryTypePolicy::SameAsInput1 => input1.geometry_type,
        GeometryTypePolicy::MultiOfInput1Primitive => {
            operations::multi_of(operations::primitive_of(input1.geometry_type))
        }
        GeometryTypePolicy::MultiOfSmallerPrimitive => {
            let p1 = operations::primitive_of(input1.geometry_type);
            let p2 = input2.map(|m| operations::primitive_of(m.geometry_type)).unwrap_or(p1);
            operations::multi_of(p1.min(p2))
        }
        GeometryTypePolicy::Override(geometry_type) => *geometry_type,
    }
}

#[allow(clippy::too_many_arguments)]
fn build_descriptors(
    operation: &Operation,
    request: &OperationRequest,
    plan: &ProcessingPlan,
    input1_meta: &GpkgLayerMetadata,
    input2_meta: Option<&GpkgLayerMetadata>,
    scratch_dir: &Path,
    output_layer: &str,
    output_geometrytype: GeometryType,
) -> Result<Vec<BatchDescriptor>> {
    let input1_projection = template::resolve_projection(
        request.input1_columns.as_deref(),
        &input1_meta.columns,
    )?;
    let input2_projection = match input2_meta {
        Some(meta) => template::resolve_projection(request.input2_columns.as_deref(), &meta.columns)?,
        None => Vec::new(),
    };

    let single_batch = plan.single_batch();
    let mut descriptors = Vec::with_capacity(plan.batches.len());
    for batch in &plan.batches {
        let batch_filter = template::batch_filter(&batch.range, single_batch, operation.arity == Arity::Two);
        let ctx = build_context(
            operation,
            input1_meta,
            input2_meta,
            request,
            &input1_projection,
            &input2_projection,
            batch_filter,
        );
        let bound = template::bind(&operation.sql_template, &ctx)?;
        let sql_stmt = if operation.filter_null_geoms {
            format!(r#"SELECT sub.* FROM ({bound}) sub WHERE sub.geom IS NOT NULL"#)
        } else {
            bound
        };

        descriptors.push(BatchDescriptor {
            batch_id: batch.batch_id,
            input1_path: request.input1_path.clone(),
            input1_databasename: "input1".to_string(),
            input2_path: request.input2_path.clone(),
            input2_databasename: input2_meta.map(|_| "input2".to_string()),
            sql_stmt,
            output_path: scratch_dir.join(format!("partial_{}.gpkg", batch.batch_id)),
            output_layer: format!("partial_{}", batch.batch_id),
            output_geometrytype: geometry_type_to_str(output_geometrytype).to_string(),
            explode_collections: request.explode_collections,
            speed_profile: request.speed_profile,
        });
    }
    let _ = output_layer;
    Ok(descriptors)
}

#[allow(clippy::too_many_arguments)]
fn build_context(
    operation: &Operation,
    input1_meta: &GpkgLayerMetadata,
    input2_meta: Option<&GpkgLayerMetadata>,
    request: &OperationRequest,
    input1_projection: &[&ColumnSpec],
    input2_projection: &[&ColumnSpec],
    batch_filter: String,
) -> TemplateContext {
    match operation.arity {
        Arity::Single => TemplateContext {
            geometrycolumn: Some(input1_meta.geometry_column.clone()),
            input_layer: Some(input1_meta.layer_name.clone()),
            columns_to_select_str: Some(template::columns_to_select_str(input1_projection)),
            batch_filter: Some(batch_filter),
            ..Default::default()
        },
        Arity::Two => {
            let input2_meta = input2_meta.expect("two-layer operation requires input2 metadata");
            TemplateContext {
                input1_geometrycolumn: Some(input1_meta.geometry_column.clone()),
                input2_geometrycolumn: Some(input2_meta.geometry_column.clone()),
                input1_tmp_layer: Some(input1_meta.layer_name.clone()),
                input2_tmp_layer: Some(input2_meta.layer_name.clone()),
                input1_databasename: Some("input1".to_string()),
                input2_databasename: Some("input2".to_string()),
                layer1_columns_prefix_alias_str: Some(template::columns_prefix_alias_str(
                    input1_projection,
                    &request.input1_columns_prefix,
                )),
                layer2_columns_prefix_alias_str: Some(template::columns_prefix_alias_str(
                    input2_projection,
                    &request.input2_columns_prefix,
                )),
                layer2_columns_prefix_alias_null_str: Some(template::columns_prefix_alias_null_str(
                    input2_projection,
                    &request.input2_columns_prefix,
                )),
                layer1_columns_from_subselect_str: Some(template::columns_from_subselect_str(
                    input1_projection,
                    &request.input1_columns_prefix,
                )),
                layer2_columns_from_subselect_str: Some(template::columns_from_subselect_str(
                    input2_projection,
                    &request.input2_columns_prefix,
                )),
                layer1_columns_prefix_str: Some(template::columns_prefix_str(input1_projection, "layer1")),
                layer2_columns_prefix_str: Some(template::columns_prefix_str(input2_projection, "layer2")),
                batch_filter: Some(batch_filter),
                ..Default::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpkg::Gpkg;
    use crate::operations::buffer;
    use crate::types::{ColumnSpec, ColumnType};
    use geo_types::Point;
    use wkb::reader::Dimension;

    fn make_point_gpkg(path: &Path, layer: &str, count: i64) {
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
        for i in 0..count {
            l.insert(
                Point::new(i as f64, i as f64),
                [crate::Value::from(format!("f{i}"))],
            )
            .unwrap();
        }
    }

    // `run`'s DISPATCHING/COLLECTING phases relaunch the current executable
    // as `__exec-batch`, which under `cargo test` is the test harness
    // binary rather than `gfo` — so a full end-to-end `run()` cannot be
    // exercised from a unit test. `build_descriptors` is exactly the part
    // of the pipeline that turns a request into what gets handed to a
    // worker, so it's tested directly instead.
    #[test]
    fn build_descriptors_binds_one_batch_per_plan_batch() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.gpkg");
        make_point_gpkg(&input, "points", 5);

        let operation = buffer(1.0, 4);
        let request = OperationRequest::single_layer(&input, dir.path().join("output.gpkg"));
        let input1_meta = inspector::describe(&input, None).unwrap();
        let rowid_extrema = inspector::rowid_extrema(&input, &input1_meta.layer_name).unwrap();
        let plan = batch::plan(input1_meta.feature_count, rowid_extrema, 2, false).unwrap();

        let descriptors = build_descriptors(
            &operation,
            &request,
            &plan,
            &input1_meta,
            None,
            dir.path(),
            "result",
            GeometryType::MultiPolygon,
        )
        .unwrap();

        assert_eq!(descriptors.len(), plan.batches.len());
        for descriptor in &descriptors {
            assert_eq!(descriptor.output_geometrytype, "MULTIPOLYGON");
            assert!(descriptor.sql_stmt.contains("ST_Buffer"));
            assert!(!descriptor.sql_stmt.contains('{'));
        }
    }

    #[test]
    fn resolve_output_geometrytype_covers_each_policy() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.gpkg");
        make_point_gpkg(&input, "points", 1);
        let points_meta = inspector::describe(&input, None).unwrap();

        assert_eq!(
            resolve_output_geometrytype(&GeometryTypePolicy::SameAsInput, &points_meta, None),
            GeometryType::Point
        );
        assert_eq!(
            resolve_output_geometrytype(&GeometryTypePolicy::MultiOfInput1Primitive, &points_meta, None),
            GeometryType::MultiPoint
        );
        assert_eq!(
            resolve_output_geometrytype(
                &GeometryTypePolicy::Override(GeometryType::MultiPolygon),
                &points_meta,
                None
            ),
            GeometryType::MultiPolygon
        );
    }

    #[test]
    fn missing_input_is_a_precondition_error() {
        let dir = tempfile::tempdir().unwrap();
        let operation = buffer(1.0, 4);
        let request = OperationRequest::single_layer(
            dir.path().join("nope.gpkg"),
            dir.path().join("out.gpkg"),
        );
        let err = run(&operation, &request).unwrap_err();
        assert!(matches!(err, GfoError::Precondition(_)));
    }

    #[test]
    fn existing_output_without_force_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.gpkg");
        make_point_gpkg(&input, "points", 1);
        let output = dir.path().join("output.gpkg");
        std::fs::write(&output, b"not really a gpkg").unwrap();

        let operation = buffer(1.0, 4);
        let request = OperationRequest::single_layer(input, output.clone());
        let outcome = run(&operation, &request).unwrap();
        assert!(outcome.output_produced);
        assert_eq!(
            std::fs::read(&output).unwrap(),
            b"not really a gpkg"
        );
    }
}
