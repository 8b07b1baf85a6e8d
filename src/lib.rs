//! Parallel batched spatial-SQL execution engine for large on-disk vector
//! datasets, built on a GeoPackage container and an embedded GEOS engine.
//!
//! ## Overview
//!
//! - `Gpkg` / `GpkgLayer` / `GpkgFeature` / `Value` are the low-level
//!   GeoPackage container primitives: open, list layers, read/write features.
//! - [`engine`] binds the embedded spatial engine (GEOS) used to evaluate
//!   the `ST_*` functions that [`sql_functions::register_spatial_functions`]
//!   installs into a connection.
//! - [`inspector`], [`container`], [`template`], [`batch`], [`worker`],
//!   [`coordinator`] and [`operations`] implement the parallel batched
//!   execution engine itself (see `SPEC_FULL.md` §4 for the pipeline and
//!   §3 for the per-operation request shapes); [`ops_api`] is the public
//!   surface that wraps them one operation at a time.
//!
//! `Gpkg` is the entry point and supports several open modes:
//! `Gpkg::open_read_only(path)`, `Gpkg::open(path)`, and `Gpkg::new_in_memory()`.
//!
//! `GpkgLayer::features()` loads all features into memory. For large datasets,
//! use `features_batch(batch_size)` to stream in chunks.
//!
//! `GpkgLayer::insert` and `GpkgLayer::update` accept any geometry that implements
//! `geo_traits::GeometryTrait<T = f64>` (for example `geo_types::Point`).
//!
//! ## Gpkg
//!
//! `Gpkg` represents the GeoPackage connection and is the entry point for
//! opening databases, listing layers, and creating new layers.
//!
//! ```no_run
//! use geofileops::Gpkg;
//! let gpkg = Gpkg::open_read_only("data/example.gpkg")?;
//! let layer = gpkg.open_layer("points")?;
//! # Ok::<(), geofileops::GpkgError>(())
//! ```
//!
//! ## GpkgLayer
//!
//! `GpkgLayer` models a single feature table. It exposes schema information
//! (geometry column, property columns) and provides read/write operations.
//!
//! ```no_run
//! use geo_types::Point;
//! use geofileops::{Gpkg, params};
//! let layer = Gpkg::open("data.gpkg")?.open_layer("points")?;
//! layer.insert(Point::new(1.0, 2.0), params!["alpha", 7_i64])?;
//! # Ok::<(), geofileops::GpkgError>(())
//! ```
//!
//! ## GpkgFeature
//!
//! `GpkgFeature` represents one row. You can read the primary key, geometry, and
//! property values from it.
//!
//! ```no_run
//! use geofileops::Gpkg;
//! let features = Gpkg::open_read_only("data.gpkg")?
//!     .open_layer("points")?
//!     .features()?;
//! let feature = features.first().expect("feature");
//! let _geom = feature.geometry()?;
//! # Ok::<(), geofileops::GpkgError>(())
//! ```
//!
//! ## Value
//!
//! `Value` is the crate's owned dynamic value for feature properties, mirroring
//! SQLite's dynamic typing. Convert with `try_into()` or match directly.
//!
//! ```no_run
//! use geofileops::Gpkg;
//! let features = Gpkg::open_read_only("data.gpkg")?
//!     .open_layer("points")?
//!     .features()?;
//! let feature = features.first().expect("feature");
//! let name: String = feature
//!     .property("name")
//!     .ok_or_else(|| geofileops::GpkgError::MissingProperty {
//!         property: "name".to_string(),
//!     })?
//!     .try_into()?;
//! # Ok::<(), geofileops::GpkgError>(())
//! ```

mod error;
mod gpkg;
mod sql_functions;

mod conversions;
mod ogc_sql;
mod types;

pub mod engine;
mod op_error;

pub mod batch;
pub mod config;
pub mod container;
pub mod coordinator;
pub mod inspector;
pub mod operations;
pub mod ops_api;
pub mod progress;
pub mod template;
pub mod worker;

pub use error::{GpkgError, Result};
pub use gpkg::{Gpkg, GpkgFeature, GpkgFeatureBatchIterator, GpkgLayer};
pub use op_error::{GfoError, Result as GfoResult};
pub use sql_functions::register_spatial_functions;
pub use types::{ColumnSpec, ColumnType, GpkgLayerMetadata, Value};

// Re-export types used in public fields to keep the public API stable.
pub use rusqlite::params;
pub use wkb::reader::{Dimension, GeometryType};
