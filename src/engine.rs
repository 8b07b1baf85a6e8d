//! Binding to the embedded spatial engine (GEOS, via the `geos` crate).
//!
//! The spec treats the geometry operators as a given: "assumes an embedded
//! engine that supplies them". This module is that assumption made
//! concrete, and is the only place in the crate that talks to `geos`
//! directly — `sql_functions.rs` registers these as SQLite scalar
//! functions, the same way the teacher wires `ST_MinX` et al.

use crate::error::{GpkgError, Result};
use geos::{Geom, Geometry, WKBReader, WKBWriter};

/// One of the three geometry families a GEOS geometry collapses to, used by
/// `ST_CollectionExtract` and by the output-geometry-type policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Primitive {
    Point = 0,
    Line = 1,
    Polygon = 2,
}

fn read_wkb(bytes: &[u8]) -> Result<Geometry> {
    let mut reader = WKBReader::new().map_err(GpkgError::from)?;
    reader.read_wkb(bytes).map_err(GpkgError::from)
}

fn write_wkb(geom: &Geometry) -> Result<Vec<u8>> {
    let mut writer = WKBWriter::new().map_err(GpkgError::from)?;
    writer.write_wkb(geom).map(|cvec| cvec.as_ref().to_vec()).map_err(GpkgError::from)
}

/// `ST_Buffer(geom, distance, quadrant_segments)`.
pub fn st_buffer(wkb: &[u8], distance: f64, quadrant_segments: i32) -> Result<Vec<u8>> {
    let geom = read_wkb(wkb)?;
    let buffered = geom.buffer(distance, quadrant_segments).map_err(GpkgError::from)?;
    write_wkb(&buffered)
}

/// `ST_ConvexHull(geom)`.
pub fn st_convex_hull(wkb: &[u8]) -> Result<Vec<u8>> {
    let geom = read_wkb(wkb)?;
    let hull = geom.convex_hull().map_err(GpkgError::from)?;
    write_wkb(&hull)
}

/// `ST_Simplify(geom, tolerance)` (Douglas-Peucker, not topology-preserving —
/// matches the behavior the original SQL templates rely on).
pub fn st_simplify(wkb: &[u8], tolerance: f64) -> Result<Vec<u8>> {
    let geom = read_wkb(wkb)?;
    let simplified = geom.simplify(tolerance).map_err(GpkgError::from)?;
    write_wkb(&simplified)
}

/// `ST_MakeValid(geom)`.
pub fn st_make_valid(wkb: &[u8]) -> Result<Vec<u8>> {
    let geom = read_wkb(wkb)?;
    let valid = geom.make_valid().map_err(GpkgError::from)?;
    write_wkb(&valid)
}

/// `ST_IsValid(geom)`.
pub fn st_is_valid(wkb: &[u8]) -> Result<bool> {
    let geom = read_wkb(wkb)?;
    Ok(geom.is_valid())
}

/// `ST_IsValidReason(geom)`.
pub fn st_is_valid_reason(wkb: &[u8]) -> Result<String> {
    let geom = read_wkb(wkb)?;
    geom.is_valid_reason().map_err(GpkgError::from)
}

/// `ST_Intersection(a, b)`.
pub fn st_intersection(a: &[u8], b: &[u8]) -> Result<Vec<u8>> {
    let ga = read_wkb(a)?;
    let gb = read_wkb(b)?;
    let result = ga.intersection(&gb).map_err(GpkgError::from)?;
    write_wkb(&result)
}

/// `ST_Union(a, b)` — pairwise union of two geometries.
pub fn st_union(a: &[u8], b: &[u8]) -> Result<Vec<u8>> {
    let ga = read_wkb(a)?;
    let gb = read_wkb(b)?;
    let result = ga.union(&gb).map_err(GpkgError::from)?;
    write_wkb(&result)
}

/// `ST_UnionAggregate`: unions an arbitrary number of geometries, as used by
/// the `GROUP BY` + unioned-layer2 step in erase/split/union/dissolve.
pub fn st_union_many(wkbs: &[Vec<u8>]) -> Result<Option<Vec<u8>>> {
    let mut acc: Option<Geometry> = None;
    for wkb in wkbs {
        let geom = read_wkb(wkb)?;
        acc = Some(match acc {
            None => geom,
            Some(prev) => prev.union(&geom).map_err(GpkgError::from)?,
        });
    }
    match acc {
        Some(geom) => write_wkb(&geom).map(Some),
        None => Ok(None),
    }
}

/// `ST_Difference(a, b)`.
pub fn st_difference(a: &[u8], b: &[u8]) -> Result<Vec<u8>> {
    let ga = read_wkb(a)?;
    let gb = read_wkb(b)?;
    let result = ga.difference(&gb).map_err(GpkgError::from)?;
    write_wkb(&result)
}

/// `ST_Distance(a, b)`.
pub fn st_distance(a: &[u8], b: &[u8]) -> Result<f64> {
    let ga = read_wkb(a)?;
    let gb = read_wkb(b)?;
    ga.distance(&gb).map_err(GpkgError::from)
}

/// `ST_Touches(a, b) = 0` / `= 1` predicate used by the R-tree join filters.
pub fn st_touches(a: &[u8], b: &[u8]) -> Result<bool> {
    let ga = read_wkb(a)?;
    let gb = read_wkb(b)?;
    ga.touches(&gb).map_err(GpkgError::from)
}

/// `ST_Area(geom)`.
pub fn st_area(wkb: &[u8]) -> Result<f64> {
    let geom = read_wkb(wkb)?;
    geom.area().map_err(GpkgError::from)
}

/// `ST_IsEmpty(geom)` (full geometry test, not just the bounding-box
/// shortcut the teacher's `ST_IsEmpty` uses for the R-tree load).
pub fn st_is_empty(wkb: &[u8]) -> Result<bool> {
    let geom = read_wkb(wkb)?;
    geom.is_empty().map_err(GpkgError::from)
}

/// `ST_NPoints(geom)`, used by erase to filter degenerate zero-point results.
pub fn st_npoints(wkb: &[u8]) -> Result<usize> {
    let geom = read_wkb(wkb)?;
    geom.get_num_points().map_err(GpkgError::from)
}

fn primitive_of(geom: &Geometry) -> Result<Option<Primitive>> {
    use geos::GeometryTypes::*;
    let ty = geom.geometry_type().map_err(GpkgError::from)?;
    Ok(match ty {
        Point | MultiPoint => Some(Primitive::Point),
        LineString | MultiLineString | LinearRing => Some(Primitive::Line),
        Polygon | MultiPolygon => Some(Primitive::Polygon),
        GeometryCollection => None,
        __Unknown(_) => None,
    })
}

/// `ST_CollectionExtract(geom, primitive)`: returns the sub-geometries of
/// `geom` matching `primitive`, collapsed into the multi-variant of that
/// family, or `None` if nothing of that family is present.
pub fn st_collection_extract(wkb: &[u8], primitive: Primitive) -> Result<Option<Vec<u8>>> {
    let geom = read_wkb(wkb)?;
    let mut matches = Vec::new();
    collect_matching(&geom, primitive, &mut matches)?;
    if matches.is_empty() {
        return Ok(None);
    }
    let multi = to_multi(primitive, matches)?;
    write_wkb(&multi).map(Some)
}

fn collect_matching(geom: &Geometry, primitive: Primitive, out: &mut Vec<Geometry>) -> Result<()> {
    use geos::GeometryTypes::GeometryCollection as Gc;
    let ty = geom.geometry_type().map_err(GpkgError::from)?;
    if ty == Gc {
        let n = geom.get_num_geometries().map_err(GpkgError::from)?;
        for i in 0..n {
            let sub = geom.get_geometry_n(i).map_err(GpkgError::from)?;
            collect_matching(&sub, primitive, out)?;
        }
        return Ok(());
    }
    if primitive_of(geom)? == Some(primitive) {
        out.push(geom.clone());
    }
    Ok(())
}

fn to_multi(primitive: Primitive, parts: Vec<Geometry>) -> Result<Geometry> {
    match primitive {
        Primitive::Point => Geometry::create_multipoint(parts).map_err(GpkgError::from),
        Primitive::Line => Geometry::create_multiline_string(parts).map_err(GpkgError::from),
        Primitive::Polygon => Geometry::create_multipolygon(parts).map_err(GpkgError::from),
    }
}

/// Coerce `geom` to the multi-variant of its own primitive family, the
/// output-geometry-type policy most operations force (`multi_of_input_primitive`).
pub fn st_force_multi(wkb: &[u8]) -> Result<Vec<u8>> {
    let geom = read_wkb(wkb)?;
    let Some(primitive) = primitive_of(&geom)? else {
        // already a collection or unknown; leave untouched.
        return write_wkb(&geom);
    };
    let multi = to_multi(primitive, vec![geom])?;
    write_wkb(&multi)
}

/// Splits a multi-geometry or collection into its parts ("explode
/// collections", used by the worker executor's row-explosion step); a
/// non-collection geometry dumps to itself.
pub fn st_dump(wkb: &[u8]) -> Result<Vec<Vec<u8>>> {
    use geos::GeometryTypes::*;
    let geom = read_wkb(wkb)?;
    let ty = geom.geometry_type().map_err(GpkgError::from)?;
    match ty {
        MultiPoint | MultiLineString | MultiPolygon | GeometryCollection => {
            let n = geom.get_num_geometries().map_err(GpkgError::from)?;
            let mut parts = Vec::with_capacity(n);
            for i in 0..n {
                let part = geom.get_geometry_n(i).map_err(GpkgError::from)?;
                parts.push(write_wkb(&part)?);
            }
            Ok(parts)
        }
        _ => Ok(vec![write_wkb(&geom)?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_wkb(x: f64, y: f64) -> Vec<u8> {
        let geom = Geometry::create_point(geos::CoordSeq::new_from_vec(&[vec![x, y]]).unwrap())
            .unwrap();
        let mut writer = WKBWriter::new().unwrap();
        writer.write_wkb(&geom).unwrap().as_ref().to_vec()
    }

    #[test]
    fn buffer_produces_polygon() {
        let wkb = point_wkb(0.0, 0.0);
        let buffered = st_buffer(&wkb, 1.0, 8).expect("buffer");
        assert!(!buffered.is_empty());
        assert!(st_area(&buffered).expect("area") > 0.0);
    }

    #[test]
    fn distance_between_points() {
        let a = point_wkb(0.0, 0.0);
        let b = point_wkb(3.0, 4.0);
        let d = st_distance(&a, &b).expect("distance");
        assert!((d - 5.0).abs() < 1e-9);
    }

    #[test]
    fn is_valid_for_a_point() {
        let a = point_wkb(1.0, 1.0);
        assert!(st_is_valid(&a).expect("is_valid"));
    }

    #[test]
    fn dump_splits_multipoint_into_parts() {
        let a = point_wkb(0.0, 0.0);
        let b = point_wkb(1.0, 1.0);
        let ga = read_wkb(&a).unwrap();
        let gb = read_wkb(&b).unwrap();
        let multi = Geometry::create_multipoint(vec![ga, gb]).unwrap();
        let multi_wkb = write_wkb(&multi).unwrap();
        let parts = st_dump(&multi_wkb).expect("dump");
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn dump_of_a_single_geometry_is_itself() {
        let a = point_wkb(2.0, 3.0);
        let parts = st_dump(&a).expect("dump");
        assert_eq!(parts.len(), 1);
    }
}
