use crate::engine::{self, Primitive};
use crate::error::Result;
use crate::gpkg::{gpkg_geometry_to_wkb, wkb_to_gpkg_geometry};
use geo_traits::{
    CoordTrait, GeometryCollectionTrait, GeometryTrait, LineStringTrait, MultiLineStringTrait,
    MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait,
};
use rusqlite::functions::{Aggregate, Context, FunctionFlags};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, Error};
use wkb::reader::Wkb;

#[derive(Clone, Copy)]
struct Bounds {
    minx: f64,
    maxx: f64,
    miny: f64,
    maxy: f64,
}

/// Register all spatial SQL helper functions in the provided connection.
///
/// Example:
/// ```no_run
/// use rusqlite::Connection;
/// use rusqlite_gpkg::register_spatial_functions;
///
/// let conn = Connection::open_in_memory()?;
/// register_spatial_functions(&conn)?;
/// # Ok::<(), rusqlite_gpkg::GpkgError>(())
/// ```
pub fn register_spatial_functions(conn: &Connection) -> Result<()> {
    register_st_minx(conn)?;
    register_st_miny(conn)?;
    register_st_maxx(conn)?;
    register_st_maxy(conn)?;
    register_st_isempty(conn)?;
    register_st_buffer(conn)?;
    register_st_convexhull(conn)?;
    register_st_simplify(conn)?;
    register_st_makevalid(conn)?;
    register_st_isvalid(conn)?;
    register_st_isvalidreason(conn)?;
    register_st_intersection(conn)?;
    register_st_union(conn)?;
    register_st_difference(conn)?;
    register_st_distance(conn)?;
    register_st_touches(conn)?;
    register_st_area(conn)?;
    register_st_npoints(conn)?;
    register_st_collectionextract(conn)?;
    register_st_forcemulti(conn)?;
    register_st_unionagg(conn)?;
    Ok(())
}

pub(crate) fn register_st_minx(conn: &Connection) -> Result<()> {
    register_bounds_component(conn, "ST_MinX", |b| b.minx)
}

pub(crate) fn register_st_miny(conn: &Connection) -> Result<()> {
    register_bounds_component(conn, "ST_MinY", |b| b.miny)
}

pub(crate) fn register_st_maxx(conn: &Connection) -> Result<()> {
    register_bounds_component(conn, "ST_MaxX", |b| b.maxx)
}

pub(crate) fn register_st_maxy(conn: &Connection) -> Result<()> {
    register_bounds_component(conn, "ST_MaxY", |b| b.maxy)
}

pub(crate) fn register_st_isempty(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_IsEmpty",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let wkb = match wkb_from_ctx(ctx)? {
                Some(wkb) => wkb,
                None => return Ok(None),
            };
            let is_empty = bounds_from_geometry(&wkb).is_none();
            Ok(Some(i64::from(is_empty)))
        },
    )?;
    Ok(())
}

fn register_bounds_component<F>(conn: &Connection, name: &str, f: F) -> Result<()>
where
    F: Fn(Bounds) -> f64 + Copy + Send + Sync + 'static,
{
    conn.create_scalar_function(name, 1, FunctionFlags::SQLITE_DETERMINISTIC, move |ctx| {
        let wkb = match wkb_from_ctx(ctx)? {
            Some(wkb) => wkb,
            None => return Ok(None),
        };
        Ok(bounds_from_geometry(&wkb).map(f))
    })?;
    Ok(())
}

fn wkb_from_ctx<'a>(ctx: &'a Context<'a>) -> std::result::Result<Option<Wkb<'a>>, Error> {
    let value = ctx.get_raw(0);
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Blob(blob) => {
            let wkb = gpkg_geometry_to_wkb(blob)
                .map_err(|err| Error::UserFunctionError(Box::new(err)))?;
            Ok(Some(wkb))
        }
        _ => Err(Error::InvalidFunctionParameterType(0, Type::Blob)),
    }
}

fn bounds_from_geometry<G: GeometryTrait<T = f64>>(geom: &G) -> Option<Bounds> {
    use geo_traits::GeometryType as GeoType;

    let mut bounds: Option<Bounds> = None;
    match geom.as_type() {
        GeoType::Point(point) => {
            if let Some(coord) = point.coord() {
                add_coord(&mut bounds, &coord);
            }
        }
        GeoType::LineString(line) => {
            for coord in line.coords() {
                add_coord(&mut bounds, &coord);
            }
        }
        GeoType::Polygon(poly) => {
            if let Some(ring) = poly.exterior() {
                add_line_string(&mut bounds, &ring);
            }
            for ring in poly.interiors() {
                add_line_string(&mut bounds, &ring);
            }
        }
        GeoType::MultiPoint(multi) => {
            for point in multi.points() {
                if let Some(coord) = point.coord() {
                    add_coord(&mut bounds, &coord);
                }
            }
        }
        GeoType::MultiLineString(multi) => {
            for line in multi.line_strings() {
                add_line_string(&mut bounds, &line);
            }
        }
        GeoType::MultiPolygon(multi) => {
            for poly in multi.polygons() {
                if let Some(ring) = poly.exterior() {
                    add_line_string(&mut bounds, &ring);
                }
                for ring in poly.interiors() {
                    add_line_string(&mut bounds, &ring);
                }
            }
        }
        GeoType::GeometryCollection(collection) => {
            for sub_geom in collection.geometries() {
                if let Some(sub_bounds) = bounds_from_geometry(&sub_geom) {
                    merge_bounds(&mut bounds, sub_bounds);
                }
            }
        }
        GeoType::Rect(_) | GeoType::Triangle(_) | GeoType::Line(_) => {
            // No GeoPackage geometry types should reach here.
            unreachable!()
        }
    }

    bounds
}

fn add_line_string<L: LineStringTrait<T = f64>>(bounds: &mut Option<Bounds>, line: &L) {
    for coord in line.coords() {
        add_coord(bounds, &coord);
    }
}

fn add_coord<C: CoordTrait<T = f64>>(bounds: &mut Option<Bounds>, coord: &C) {
    let (x, y) = coord.x_y();
    match bounds {
        Some(existing) => {
            existing.minx = existing.minx.min(x);
            existing.maxx = existing.maxx.max(x);
            existing.miny = existing.miny.min(y);
            existing.maxy = existing.maxy.max(y);
        }
        None => {
            *bounds = Some(Bounds {
                minx: x,
                maxx: x,
                miny: y,
                maxy: y,
            });
        }
    }
}

fn merge_bounds(bounds: &mut Option<Bounds>, other: Bounds) {
    match bounds {
        Some(existing) => {
            existing.minx = existing.minx.min(other.minx);
            existing.maxx = existing.maxx.max(other.maxx);
            existing.miny = existing.miny.min(other.miny);
            existing.maxy = existing.maxy.max(other.maxy);
        }
        None => *bounds = Some(other),
    }
}

fn srs_id_from_gpkg_blob(blob: &[u8]) -> u32 {
    u32::from_le_bytes([blob[4], blob[5], blob[6], blob[7]])
}

fn blob_from_ctx(ctx: &Context<'_>, idx: usize) -> std::result::Result<Option<Vec<u8>>, Error> {
    match ctx.get_raw(idx) {
        ValueRef::Null => Ok(None),
        ValueRef::Blob(blob) => Ok(Some(blob.to_vec())),
        _ => Err(Error::InvalidFunctionParameterType(idx, Type::Blob)),
    }
}

fn raw_wkb_and_srs(blob: &[u8]) -> std::result::Result<(Vec<u8>, u32), Error> {
    let wkb = gpkg_geometry_to_wkb(blob).map_err(|err| Error::UserFunctionError(Box::new(err)))?;
    Ok((wkb.buf().to_vec(), srs_id_from_gpkg_blob(blob)))
}

fn wrap_output(raw_wkb: Vec<u8>, srs_id: u32) -> std::result::Result<Vec<u8>, Error> {
    let wkb = Wkb::try_new(&raw_wkb).map_err(|err| {
        Error::UserFunctionError(Box::new(crate::error::GpkgError::from(err)))
    })?;
    wkb_to_gpkg_geometry(wkb, srs_id).map_err(|err| Error::UserFunctionError(Box::new(err)))
}

/// Registers a unary geometry-to-geometry SQL function backed by one of the
/// `engine::st_*` operators.
fn register_unary_geom<F>(conn: &Connection, name: &str, f: F) -> Result<()>
where
    F: Fn(&[u8]) -> crate::error::Result<Vec<u8>> + Send + Sync + 'static,
{
    conn.create_scalar_function(name, 1, FunctionFlags::SQLITE_DETERMINISTIC, move |ctx| {
        let Some(blob) = blob_from_ctx(ctx, 0)? else {
            return Ok(None);
        };
        let (raw, srs_id) = raw_wkb_and_srs(&blob)?;
        let out = f(&raw).map_err(|err| Error::UserFunctionError(Box::new(err)))?;
        Ok(Some(wrap_output(out, srs_id)?))
    })?;
    Ok(())
}

pub(crate) fn register_st_buffer(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_Buffer",
        3,
        FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let Some(blob) = blob_from_ctx(ctx, 0)? else {
                return Ok(None);
            };
            let distance: f64 = ctx.get(1)?;
            let quadrant_segments: i32 = ctx.get(2)?;
            let (raw, srs_id) = raw_wkb_and_srs(&blob)?;
            let out = engine::st_buffer(&raw, distance, quadrant_segments)
                .map_err(|err| Error::UserFunctionError(Box::new(err)))?;
            Ok(Some(wrap_output(out, srs_id)?))
        },
    )?;
    Ok(())
}

pub(crate) fn register_st_convexhull(conn: &Connection) -> Result<()> {
    register_unary_geom(conn, "ST_ConvexHull", engine::st_convex_hull)
}

pub(crate) fn register_st_simplify(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_Simplify",
        2,
        FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let Some(blob) = blob_from_ctx(ctx, 0)? else {
                return Ok(None);
            };
            let tolerance: f64 = ctx.get(1)?;
            let (raw, srs_id) = raw_wkb_and_srs(&blob)?;
            let out = engine::st_simplify(&raw, tolerance)
                .map_err(|err| Error::UserFunctionError(Box::new(err)))?;
            Ok(Some(wrap_output(out, srs_id)?))
        },
    )?;
    Ok(())
}

pub(crate) fn register_st_makevalid(conn: &Connection) -> Result<()> {
    register_unary_geom(conn, "ST_MakeValid", engine::st_make_valid)
}

pub(crate) fn register_st_forcemulti(conn: &Connection) -> Result<()> {
    register_unary_geom(conn, "ST_ForceMulti", engine::st_force_multi)
}

pub(crate) fn register_st_isvalid(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_IsValid",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let Some(blob) = blob_from_ctx(ctx, 0)? else {
                return Ok(None);
            };
            let (raw, _) = raw_wkb_and_srs(&blob)?;
            let valid =
                engine::st_is_valid(&raw).map_err(|err| Error::UserFunctionError(Box::new(err)))?;
            Ok(Some(i64::from(valid)))
        },
    )?;
    Ok(())
}

pub(crate) fn register_st_isvalidreason(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_IsValidReason",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let Some(blob) = blob_from_ctx(ctx, 0)? else {
                return Ok(None);
            };
            let (raw, _) = raw_wkb_and_srs(&blob)?;
            let reason = engine::st_is_valid_reason(&raw)
                .map_err(|err| Error::UserFunctionError(Box::new(err)))?;
            Ok(Some(reason))
        },
    )?;
    Ok(())
}

/// Registers a binary geometry-geometry-to-geometry SQL function.
fn register_binary_geom<F>(conn: &Connection, name: &str, f: F) -> Result<()>
where
    F: Fn(&[u8], &[u8]) -> crate::error::Result<Vec<u8>> + Send + Sync + 'static,
{
    conn.create_scalar_function(name, 2, FunctionFlags::SQLITE_DETERMINISTIC, move |ctx| {
        let (Some(a), Some(b)) = (blob_from_ctx(ctx, 0)?, blob_from_ctx(ctx, 1)?) else {
            return Ok(None);
        };
        let (raw_a, srs_id) = raw_wkb_and_srs(&a)?;
        let (raw_b, _) = raw_wkb_and_srs(&b)?;
        let out = f(&raw_a, &raw_b).map_err(|err| Error::UserFunctionError(Box::new(err)))?;
        Ok(Some(wrap_output(out, srs_id)?))
    })?;
    Ok(())
}

pub(crate) fn register_st_intersection(conn: &Connection) -> Result<()> {
    register_binary_geom(conn, "ST_Intersection", engine::st_intersection)
}

pub(crate) fn register_st_union(conn: &Connection) -> Result<()> {
    register_binary_geom(conn, "ST_Union", engine::st_union)
}

pub(crate) fn register_st_difference(conn: &Connection) -> Result<()> {
    register_binary_geom(conn, "ST_Difference", engine::st_difference)
}

pub(crate) fn register_st_distance(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_Distance",
        2,
        FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let (Some(a), Some(b)) = (blob_from_ctx(ctx, 0)?, blob_from_ctx(ctx, 1)?) else {
                return Ok(None);
            };
            let (raw_a, _) = raw_wkb_and_srs(&a)?;
            let (raw_b, _) = raw_wkb_and_srs(&b)?;
            let d = engine::st_distance(&raw_a, &raw_b)
                .map_err(|err| Error::UserFunctionError(Box::new(err)))?;
            Ok(Some(d))
        },
    )?;
    Ok(())
}

pub(crate) fn register_st_touches(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_Touches",
        2,
        FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let (Some(a), Some(b)) = (blob_from_ctx(ctx, 0)?, blob_from_ctx(ctx, 1)?) else {
                return Ok(None);
            };
            let (raw_a, _) = raw_wkb_and_srs(&a)?;
            let (raw_b, _) = raw_wkb_and_srs(&b)?;
            let touches = engine::st_touches(&raw_a, &raw_b)
                .map_err(|err| Error::UserFunctionError(Box::new(err)))?;
            Ok(Some(i64::from(touches)))
        },
    )?;
    Ok(())
}

pub(crate) fn register_st_area(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_Area",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let Some(blob) = blob_from_ctx(ctx, 0)? else {
                return Ok(None);
            };
            let (raw, _) = raw_wkb_and_srs(&blob)?;
            let area =
                engine::st_area(&raw).map_err(|err| Error::UserFunctionError(Box::new(err)))?;
            Ok(Some(area))
        },
    )?;
    Ok(())
}

pub(crate) fn register_st_npoints(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_NPoints",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let Some(blob) = blob_from_ctx(ctx, 0)? else {
                return Ok(None);
            };
            let (raw, _) = raw_wkb_and_srs(&blob)?;
            let n =
                engine::st_npoints(&raw).map_err(|err| Error::UserFunctionError(Box::new(err)))?;
            Ok(Some(n as i64))
        },
    )?;
    Ok(())
}

pub(crate) fn register_st_collectionextract(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_CollectionExtract",
        2,
        FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let Some(blob) = blob_from_ctx(ctx, 0)? else {
                return Ok(None);
            };
            let primitive_id: i64 = ctx.get(1)?;
            let primitive = match primitive_id {
                0 => Primitive::Point,
                1 => Primitive::Line,
                2 => Primitive::Polygon,
                other => {
                    return Err(Error::InvalidParameterName(format!(
                        "unknown primitive id {other}"
                    )));
                }
            };
            let (raw, srs_id) = raw_wkb_and_srs(&blob)?;
            let extracted = engine::st_collection_extract(&raw, primitive)
                .map_err(|err| Error::UserFunctionError(Box::new(err)))?;
            match extracted {
                Some(out) => Ok(Some(wrap_output(out, srs_id)?)),
                None => Ok(None),
            }
        },
    )?;
    Ok(())
}

/// Accumulator for `ST_UnionAgg`: collects the raw (un-gpkg-wrapped) WKB of
/// every non-null geometry in the group, plus the srs_id of the first one
/// seen, so two-layer operations (erase, split, union, dissolve) can fold a
/// whole group of layer-2 matches into a single geometry per §4.7.
#[derive(Default)]
struct UnionAggState {
    srs_id: Option<u32>,
    geoms: Vec<Vec<u8>>,
}

struct StUnionAgg;

impl Aggregate<UnionAggState, Option<Vec<u8>>> for StUnionAgg {
    fn init(&self, _ctx: &mut Context<'_>) -> std::result::Result<UnionAggState, Error> {
        Ok(UnionAggState::default())
    }

    fn step(
        &self,
        ctx: &mut Context<'_>,
        state: &mut UnionAggState,
    ) -> std::result::Result<(), Error> {
        let Some(blob) = blob_from_ctx(ctx, 0)? else {
            return Ok(());
        };
        let (raw, srs_id) = raw_wkb_and_srs(&blob)?;
        state.srs_id.get_or_insert(srs_id);
        state.geoms.push(raw);
        Ok(())
    }

    fn finalize(
        &self,
        _ctx: &mut Context<'_>,
        state: Option<UnionAggState>,
    ) -> std::result::Result<Option<Vec<u8>>, Error> {
        let Some(state) = state else {
            return Ok(None);
        };
        let Some(srs_id) = state.srs_id else {
            return Ok(None);
        };
        let merged = engine::st_union_many(&state.geoms)
            .map_err(|err| Error::UserFunctionError(Box::new(err)))?;
        match merged {
            Some(raw) => Ok(Some(wrap_output(raw, srs_id)?)),
            None => Ok(None),
        }
    }
}

pub(crate) fn register_st_unionagg(conn: &Connection) -> Result<()> {
    conn.create_aggregate_function(
        "ST_UnionAgg",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        StUnionAgg,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::register_spatial_functions;
    use crate::gpkg::wkb_to_gpkg_geometry;
    use geo_types::{Geometry, GeometryCollection, MultiLineString, MultiPoint};
    use geo_types::{LineString, Point};
    use rusqlite::{Connection, params};
    use wkb::reader::Wkb;

    fn gpkg_blob_from_geometry<G: geo_traits::GeometryTrait<T = f64>>(
        geometry: G,
    ) -> crate::Result<Vec<u8>> {
        let mut wkb = Vec::new();
        wkb::writer::write_geometry(&mut wkb, &geometry, &Default::default())?;
        let wkb = Wkb::try_new(&wkb)?;
        wkb_to_gpkg_geometry(wkb, 4326)
    }

    #[test]
    fn st_bounds_for_point() -> crate::Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;

        let point = Point::new(1.5, -2.0);
        let blob = gpkg_blob_from_geometry(point)?;

        let (minx, maxx, miny, maxy, empty): (f64, f64, f64, f64, i64) = conn.query_row(
            "SELECT ST_MinX(?1), ST_MaxX(?1), ST_MinY(?1), ST_MaxY(?1), ST_IsEmpty(?1)",
            params![blob],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )?;

        assert_eq!(minx, 1.5);
        assert_eq!(maxx, 1.5);
        assert_eq!(miny, -2.0);
        assert_eq!(maxy, -2.0);
        assert_eq!(empty, 0);
        Ok(())
    }

    #[test]
    fn st_is_empty_for_empty_linestring() -> crate::Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;

        let line: LineString<f64> = LineString::new(Vec::new());
        let blob = gpkg_blob_from_geometry(line)?;

        let (minx, empty): (Option<f64>, i64) =
            conn.query_row("SELECT ST_MinX(?1), ST_IsEmpty(?1)", params![blob], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;

        assert!(minx.is_none());
        assert_eq!(empty, 1);
        Ok(())
    }

    #[test]
    fn st_bounds_for_multipoint() -> crate::Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;

        let mp = MultiPoint::from(vec![Point::new(1.0, 5.0), Point::new(-2.0, 3.0)]);
        let blob = gpkg_blob_from_geometry(mp)?;

        let (minx, maxx, miny, maxy): (f64, f64, f64, f64) = conn.query_row(
            "SELECT ST_MinX(?1), ST_MaxX(?1), ST_MinY(?1), ST_MaxY(?1)",
            params![blob],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        assert_eq!(minx, -2.0);
        assert_eq!(maxx, 1.0);
        assert_eq!(miny, 3.0);
        assert_eq!(maxy, 5.0);
        Ok(())
    }

    #[test]
    fn st_bounds_for_multilinestring() -> crate::Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;

        let line_a = LineString::from(vec![(0.0, 0.0), (2.0, 1.0)]);
        let line_b = LineString::from(vec![(-3.0, 4.0), (-1.0, 2.0)]);
        let mls = MultiLineString(vec![line_a, line_b]);
        let blob = gpkg_blob_from_geometry(mls)?;

        let (minx, maxx, miny, maxy): (f64, f64, f64, f64) = conn.query_row(
            "SELECT ST_MinX(?1), ST_MaxX(?1), ST_MinY(?1), ST_MaxY(?1)",
            params![blob],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        assert_eq!(minx, -3.0);
        assert_eq!(maxx, 2.0);
        assert_eq!(miny, 0.0);
        assert_eq!(maxy, 4.0);
        Ok(())
    }

    #[test]
    fn st_bounds_for_geometry_collection() -> crate::Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;

        let point = Geometry::Point(Point::new(5.0, -1.0));
        let line = Geometry::LineString(LineString::from(vec![(-2.0, 2.0), (1.0, 3.0)]));
        let collection = GeometryCollection::from(vec![point, line]);
        let blob = gpkg_blob_from_geometry(collection)?;

        let (minx, maxx, miny, maxy): (f64, f64, f64, f64) = conn.query_row(
            "SELECT ST_MinX(?1), ST_MaxX(?1), ST_MinY(?1), ST_MaxY(?1)",
            params![blob],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        assert_eq!(minx, -2.0);
        assert_eq!(maxx, 5.0);
        assert_eq!(miny, -1.0);
        assert_eq!(maxy, 3.0);
        Ok(())
    }

    #[test]
    fn st_unionagg_merges_a_group_into_one_geometry() -> crate::Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;
        conn.execute_batch("CREATE TABLE parts (grp INTEGER, geom BLOB)")?;

        let a = gpkg_blob_from_geometry(Point::new(0.0, 0.0))?;
        let b = gpkg_blob_from_geometry(Point::new(1.0, 0.0))?;
        let c = gpkg_blob_from_geometry(Point::new(5.0, 5.0))?;
        conn.execute("INSERT INTO parts (grp, geom) VALUES (1, ?1)", params![a])?;
        conn.execute("INSERT INTO parts (grp, geom) VALUES (1, ?1)", params![b])?;
        conn.execute("INSERT INTO parts (grp, geom) VALUES (2, ?1)", params![c])?;

        let mut stmt = conn.prepare(
            "SELECT grp, ST_NPoints(ST_UnionAgg(geom)) FROM parts GROUP BY grp ORDER BY grp",
        )?;
        let rows: Vec<(i64, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        assert_eq!(rows, vec![(1, 2), (2, 1)]);
        Ok(())
    }
}
