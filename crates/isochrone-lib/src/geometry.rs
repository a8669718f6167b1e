//! Geometry values and the pure operations applied to them
//!
//! Points and areas always carry the spatial reference their coordinates are
//! expressed in. The analysis reference is Web Mercator (wkid 3857), the same as
//! the map view; WGS84 (wkid 4326) is supported for input and display.

use crate::{Error, Result, utils};
use geo::{
    BooleanOps, BoundingRect, Contains, Coord, Intersects, LineString, MapCoords, MultiPolygon,
    Point, Polygon, Rect, Winding,
};
use serde::{Deserialize, Serialize};

/// Spatial reference identified by its well-known id
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "wire::EsriSpatialReference")]
pub struct SpatialReference {
    pub wkid: u32,
}

impl SpatialReference {
    pub const WGS84: Self = Self { wkid: 4326 };
    pub const WEB_MERCATOR: Self = Self { wkid: 3857 };

    /// Normalise legacy Web Mercator ids (102100, 102113, 900913) to 3857
    pub fn from_wkid(wkid: u32) -> Self {
        match wkid {
            102100 | 102113 | 900913 => Self::WEB_MERCATOR,
            other => Self { wkid: other },
        }
    }

    pub fn is_web_mercator(&self) -> bool {
        *self == Self::WEB_MERCATOR
    }

    pub fn is_wgs84(&self) -> bool {
        *self == Self::WGS84
    }
}

impl std::fmt::Display for SpatialReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wkid:{}", self.wkid)
    }
}

/// A 2D coordinate in a spatial reference. Immutable once created.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MapPoint {
    x: f64,
    y: f64,
    spatial_reference: SpatialReference,
}

impl MapPoint {
    pub fn new(x: f64, y: f64, spatial_reference: SpatialReference) -> Self {
        Self {
            x,
            y,
            spatial_reference,
        }
    }

    /// Create a Web Mercator point from WGS84 latitude/longitude
    pub fn from_lat_lon(lat: f64, lon: f64) -> Self {
        let p = utils::wgs84_to_mercator(lat, lon);
        Self::new(p.x(), p.y(), SpatialReference::WEB_MERCATOR)
    }

    #[inline]
    pub fn x(&self) -> f64 {
        self.x
    }

    #[inline]
    pub fn y(&self) -> f64 {
        self.y
    }

    #[inline]
    pub fn spatial_reference(&self) -> SpatialReference {
        self.spatial_reference
    }

    #[inline]
    pub fn as_geo(&self) -> Point<f64> {
        Point::new(self.x, self.y)
    }

    /// Latitude/longitude of this point in degrees
    pub fn to_lat_lon(&self) -> (f64, f64) {
        let wgs = self.project(SpatialReference::WGS84);
        (wgs.y, wgs.x)
    }

    /// Re-express the point in another spatial reference
    ///
    /// Only WGS84 <-> Web Mercator is supported; other pairs keep the
    /// coordinates untouched and only relabel them.
    pub fn project(&self, target: SpatialReference) -> Self {
        let c = project_coord(
            Coord {
                x: self.x,
                y: self.y,
            },
            self.spatial_reference,
            target,
        );
        Self::new(c.x, c.y, target)
    }
}

fn project_coord(c: Coord<f64>, from: SpatialReference, to: SpatialReference) -> Coord<f64> {
    if from == to {
        return c;
    }
    if from.is_wgs84() && to.is_web_mercator() {
        let p = utils::wgs84_to_mercator(c.y, c.x);
        return Coord { x: p.x(), y: p.y() };
    }
    if from.is_web_mercator() && to.is_wgs84() {
        let (lat, lon) = utils::mercator_to_wgs84(c.x, c.y);
        return Coord { x: lon, y: lat };
    }
    tracing::warn!("Unsupported projection {} -> {}, keeping coordinates", from, to);
    c
}

/// Polygon value: an ordered set of rings in a spatial reference
///
/// Produced by the travel-time service or by [`intersect`]; never mutated once
/// returned. An area with no polygons is the empty geometry.
#[derive(Clone, Debug, PartialEq)]
pub struct Area {
    polygons: MultiPolygon<f64>,
    spatial_reference: SpatialReference,
}

impl Area {
    pub fn new(polygons: MultiPolygon<f64>, spatial_reference: SpatialReference) -> Self {
        Self {
            polygons,
            spatial_reference,
        }
    }

    pub fn from_polygon(polygon: Polygon<f64>, spatial_reference: SpatialReference) -> Self {
        Self::new(MultiPolygon::new(vec![polygon]), spatial_reference)
    }

    pub fn empty(spatial_reference: SpatialReference) -> Self {
        Self::new(MultiPolygon::new(Vec::new()), spatial_reference)
    }

    /// Build an area from Esri JSON rings
    ///
    /// Clockwise rings are outer boundaries, counter-clockwise rings are holes and
    /// are attached to the first outer ring containing them. A hole with no
    /// enclosing outer ring is kept as an outer ring of its own.
    pub fn from_rings(rings: &[Vec<Vec<f64>>], spatial_reference: SpatialReference) -> Result<Self> {
        let mut outers: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();
        let mut holes: Vec<LineString<f64>> = Vec::new();

        for ring in rings {
            let coords = ring
                .iter()
                .map(|c| match c.as_slice() {
                    [x, y, ..] => Ok(Coord { x: *x, y: *y }),
                    _ => Err(Error::InvalidGeometry(format!(
                        "ring coordinate with {} ordinates",
                        c.len()
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;

            let mut line = LineString::new(coords);
            line.close();
            if line.0.len() < 4 {
                return Err(Error::InvalidGeometry(format!(
                    "ring with {} vertices",
                    line.0.len()
                )));
            }

            if line.is_cw() {
                outers.push((line, Vec::new()));
            } else {
                holes.push(line);
            }
        }

        for hole in holes {
            let sample = hole.0[0];
            let owner = outers
                .iter_mut()
                .find(|(outer, _)| Polygon::new(outer.clone(), Vec::new()).contains(&sample));
            match owner {
                Some((_, interiors)) => interiors.push(hole),
                None => outers.push((hole, Vec::new())),
            }
        }

        let polygons = outers
            .into_iter()
            .map(|(exterior, interiors)| Polygon::new(exterior, interiors))
            .collect();

        Ok(Self::new(MultiPolygon::new(polygons), spatial_reference))
    }

    /// Esri JSON rings: outer rings clockwise, holes counter-clockwise
    pub fn to_rings(&self) -> Vec<Vec<[f64; 2]>> {
        let mut rings = Vec::new();
        for polygon in &self.polygons {
            let mut exterior = polygon.exterior().clone();
            exterior.make_cw_winding();
            rings.push(exterior.coords().map(|c| [c.x, c.y]).collect());
            for interior in polygon.interiors() {
                let mut hole = interior.clone();
                hole.make_ccw_winding();
                rings.push(hole.coords().map(|c| [c.x, c.y]).collect());
            }
        }
        rings
    }

    #[inline]
    pub fn polygons(&self) -> &MultiPolygon<f64> {
        &self.polygons
    }

    #[inline]
    pub fn spatial_reference(&self) -> SpatialReference {
        self.spatial_reference
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.0.is_empty()
    }

    /// Bounding rectangle, `None` for the empty geometry
    pub fn extent(&self) -> Option<Rect<f64>> {
        self.polygons.bounding_rect()
    }

    /// Strict containment (boundary excluded)
    pub fn contains_point(&self, point: &MapPoint) -> bool {
        let p = point.project(self.spatial_reference).as_geo();
        self.polygons.contains(&p)
    }

    /// Point lies inside or on the boundary
    pub fn intersects_point(&self, point: &MapPoint) -> bool {
        let p = point.project(self.spatial_reference).as_geo();
        self.polygons.intersects(&p)
    }

    /// Re-express every vertex in another spatial reference
    pub fn project(&self, target: SpatialReference) -> Self {
        if target == self.spatial_reference {
            return self.clone();
        }
        let from = self.spatial_reference;
        let polygons = self.polygons.map_coords(|c| project_coord(c, from, target));
        Self::new(polygons, target)
    }
}

/// Boolean intersection of two areas
///
/// Pure and deterministic. `b` is projected into `a`'s spatial reference when
/// they differ. Disjoint or empty operands yield an empty area, never an error.
pub fn intersect(a: &Area, b: &Area) -> Area {
    profiling::scope!("geometry::intersect");

    let sr = a.spatial_reference;
    if a.is_empty() || b.is_empty() {
        return Area::empty(sr);
    }

    let b = b.project(sr);

    // Cheap reject before running the sweep
    if let (Some(ea), Some(eb)) = (a.extent(), b.extent())
        && !ea.intersects(&eb)
    {
        return Area::empty(sr);
    }

    let result = a.polygons.intersection(&b.polygons);
    Area::new(result, sr)
}

/// Esri JSON wire representations
pub(crate) mod wire {
    use super::{Area, MapPoint, SpatialReference};
    use crate::Result;
    use serde::{Deserialize, Serialize};

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct EsriSpatialReference {
        wkid: Option<u32>,
        latest_wkid: Option<u32>,
    }

    impl From<EsriSpatialReference> for SpatialReference {
        fn from(raw: EsriSpatialReference) -> Self {
            SpatialReference::from_wkid(raw.latest_wkid.or(raw.wkid).unwrap_or(4326))
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct EsriPoint {
        pub x: f64,
        pub y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub spatial_reference: Option<SpatialReference>,
    }

    impl EsriPoint {
        pub fn into_map_point(self, fallback: SpatialReference) -> MapPoint {
            MapPoint::new(self.x, self.y, self.spatial_reference.unwrap_or(fallback))
        }
    }

    impl From<&MapPoint> for EsriPoint {
        fn from(point: &MapPoint) -> Self {
            Self {
                x: point.x(),
                y: point.y(),
                spatial_reference: Some(point.spatial_reference()),
            }
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct EsriPolygon {
        pub rings: Vec<Vec<Vec<f64>>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub spatial_reference: Option<SpatialReference>,
    }

    impl EsriPolygon {
        pub fn into_area(self, fallback: SpatialReference) -> Result<Area> {
            Area::from_rings(&self.rings, self.spatial_reference.unwrap_or(fallback))
        }
    }

    impl From<&Area> for EsriPolygon {
        fn from(area: &Area) -> Self {
            Self {
                rings: area
                    .to_rings()
                    .into_iter()
                    .map(|ring| ring.into_iter().map(|[x, y]| vec![x, y]).collect())
                    .collect(),
                spatial_reference: Some(area.spatial_reference()),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use geo::{Area as _, polygon};

    /// Axis-aligned square in Web Mercator meters
    pub(crate) fn square(min_x: f64, min_y: f64, size: f64) -> Area {
        Area::from_polygon(
            polygon![
                (x: min_x, y: min_y),
                (x: min_x + size, y: min_y),
                (x: min_x + size, y: min_y + size),
                (x: min_x, y: min_y + size),
                (x: min_x, y: min_y),
            ],
            SpatialReference::WEB_MERCATOR,
        )
    }

    #[test]
    fn test_spatial_reference_normalisation() {
        let sr: SpatialReference =
            serde_json::from_str(r#"{"wkid":102100,"latestWkid":3857}"#).unwrap();
        assert_eq!(sr, SpatialReference::WEB_MERCATOR);
        let sr: SpatialReference = serde_json::from_str(r#"{"wkid":102100}"#).unwrap();
        assert_eq!(sr, SpatialReference::WEB_MERCATOR);
        assert_eq!(
            serde_json::to_string(&SpatialReference::WGS84).unwrap(),
            r#"{"wkid":4326}"#
        );
    }

    #[test]
    fn test_disjoint_intersection_is_empty() {
        let a = square(0.0, 0.0, 10.0);
        let b = square(100.0, 100.0, 10.0);
        let result = intersect(&a, &b);
        assert!(result.is_empty());
        assert!(result.extent().is_none());
    }

    #[test]
    fn test_empty_operand_intersection_is_empty() {
        let a = square(0.0, 0.0, 10.0);
        let empty = Area::empty(SpatialReference::WEB_MERCATOR);
        assert!(intersect(&a, &empty).is_empty());
        assert!(intersect(&empty, &a).is_empty());
    }

    #[test]
    fn test_overlapping_intersection_within_both_extents() {
        let a = square(0.0, 0.0, 10.0);
        let b = square(5.0, 5.0, 10.0);
        let result = intersect(&a, &b);

        assert!(!result.is_empty());
        let extent = result.extent().unwrap();
        for operand in [&a, &b] {
            let e = operand.extent().unwrap();
            assert!(extent.min().x >= e.min().x - 1e-9);
            assert!(extent.min().y >= e.min().y - 1e-9);
            assert!(extent.max().x <= e.max().x + 1e-9);
            assert!(extent.max().y <= e.max().y + 1e-9);
        }
        assert!((result.polygons().unsigned_area() - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_intersection_projects_second_operand() {
        let a = square(-360_000.0, 7_540_000.0, 2_000.0);
        let b = square(-359_000.0, 7_541_000.0, 2_000.0).project(SpatialReference::WGS84);
        let result = intersect(&a, &b);
        assert_eq!(result.spatial_reference(), SpatialReference::WEB_MERCATOR);
        let area = result.polygons().unsigned_area();
        assert!((area - 1_000_000.0).abs() < 100.0, "{area}");
    }

    #[test]
    fn test_rings_with_hole() {
        // Outer clockwise, hole counter-clockwise
        let rings = vec![
            vec![
                vec![0.0, 0.0],
                vec![0.0, 10.0],
                vec![10.0, 10.0],
                vec![10.0, 0.0],
                vec![0.0, 0.0],
            ],
            vec![
                vec![2.0, 2.0],
                vec![8.0, 2.0],
                vec![8.0, 8.0],
                vec![2.0, 8.0],
                vec![2.0, 2.0],
            ],
        ];
        let area = Area::from_rings(&rings, SpatialReference::WEB_MERCATOR).unwrap();
        assert_eq!(area.polygons().0.len(), 1);
        assert_eq!(area.polygons().0[0].interiors().len(), 1);
        assert!((area.polygons().unsigned_area() - 64.0).abs() < 1e-9);

        let inside_hole = MapPoint::new(5.0, 5.0, SpatialReference::WEB_MERCATOR);
        let inside_ring = MapPoint::new(1.0, 1.0, SpatialReference::WEB_MERCATOR);
        assert!(!area.contains_point(&inside_hole));
        assert!(area.contains_point(&inside_ring));

        let back = area.to_rings();
        assert_eq!(back.len(), 2);
    }

    #[test]
    fn test_degenerate_ring_rejected() {
        let rings = vec![vec![vec![0.0, 0.0], vec![1.0, 1.0]]];
        let err = Area::from_rings(&rings, SpatialReference::WEB_MERCATOR).unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry(_)));
    }

    #[test]
    fn test_point_projection_and_lat_lon() {
        let p = MapPoint::from_lat_lon(55.942, -3.210);
        assert!(p.spatial_reference().is_web_mercator());
        let (lat, lon) = p.to_lat_lon();
        assert!((lat - 55.942).abs() < 1e-6);
        assert!((lon + 3.210).abs() < 1e-6);
    }
}
