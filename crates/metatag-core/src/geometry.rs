//! GeoJSON geometries and the little spherical math the built-ins need.

use serde::{Deserialize, Serialize};

/// `[lon, lat]` in degrees.
pub type Position = [f64; 2];

/// Mean earth radius in metres, used for distances and lengths.
const EARTH_RADIUS_M: f64 = 6_371_008.8;
/// Equatorial radius, used for surface areas.
const EARTH_EQUATORIAL_RADIUS_M: f64 = 6_378_137.0;

/// A GeoJSON geometry. Serialises as `{"type": ..., "coordinates": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl Geometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::LineString(_) => "LineString",
            Geometry::MultiLineString(_) => "MultiLineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    fn positions(&self) -> Box<dyn Iterator<Item = &Position> + '_> {
        match self {
            Geometry::Point(p) => Box::new(std::iter::once(p)),
            Geometry::MultiPoint(ps) | Geometry::LineString(ps) => Box::new(ps.iter()),
            Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => {
                Box::new(lines.iter().flatten())
            }
            Geometry::MultiPolygon(polys) => Box::new(polys.iter().flatten().flatten()),
        }
    }

    pub fn bbox(&self) -> Option<BBox> {
        let mut positions = self.positions();
        let first = positions.next()?;
        Some(positions.fold(BBox::around(*first), |bbox, p| bbox.extend(*p)))
    }

    /// Point for `_lat`/`_lon`: the point itself, the area-weighted centroid
    /// for polygons, the vertex mean otherwise.
    pub fn centroid(&self) -> Option<Position> {
        match self {
            Geometry::Point(p) => Some(*p),
            Geometry::Polygon(rings) => rings
                .first()
                .and_then(|outer| planar_centroid(outer))
                .or_else(|| vertex_mean(self.positions())),
            Geometry::MultiPolygon(polys) => {
                let mut weight = 0.0;
                let mut lon = 0.0;
                let mut lat = 0.0;
                for outer in polys.iter().filter_map(|rings| rings.first()) {
                    let area = planar_area(outer).abs();
                    if let Some(c) = planar_centroid(outer) {
                        weight += area;
                        lon += c[0] * area;
                        lat += c[1] * area;
                    }
                }
                if weight > 0.0 {
                    Some([lon / weight, lat / weight])
                } else {
                    vertex_mean(self.positions())
                }
            }
            _ => vertex_mean(self.positions()),
        }
    }

    /// Surface in square metres. Zero for anything that is not a polygon.
    pub fn area_m2(&self) -> f64 {
        match self {
            Geometry::Polygon(rings) => polygon_area(rings),
            Geometry::MultiPolygon(polys) => polys.iter().map(|rings| polygon_area(rings)).sum(),
            _ => 0.0,
        }
    }

    /// Length in metres: line length, or ring perimeter for polygons.
    pub fn length_m(&self) -> f64 {
        match self {
            Geometry::Point(_) | Geometry::MultiPoint(_) => 0.0,
            Geometry::LineString(line) => line_length(line),
            Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => {
                lines.iter().map(|l| line_length(l)).sum()
            }
            Geometry::MultiPolygon(polys) => polys.iter().flatten().map(|l| line_length(l)).sum(),
        }
    }
}

/// Great-circle distance in metres.
pub fn distance_m(a: Position, b: Position) -> f64 {
    let d_lat = (b[1] - a[1]).to_radians();
    let d_lon = (b[0] - a[0]).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a[1].to_radians().cos() * b[1].to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

fn line_length(line: &[Position]) -> f64 {
    line.windows(2).map(|w| distance_m(w[0], w[1])).sum()
}

fn polygon_area(rings: &[Vec<Position>]) -> f64 {
    let mut rings = rings.iter();
    let Some(outer) = rings.next() else {
        return 0.0;
    };
    let holes: f64 = rings.map(|r| ring_area(r).abs()).sum();
    (ring_area(outer).abs() - holes).max(0.0)
}

// Spherical excess approximation over consecutive vertex triples.
fn ring_area(coords: &[Position]) -> f64 {
    let n = coords.len();
    if n <= 2 {
        return 0.0;
    }
    let mut total = 0.0;
    for i in 0..n {
        let (lower, middle, upper) = if i == n - 2 {
            (n - 2, n - 1, 0)
        } else if i == n - 1 {
            (n - 1, 0, 1)
        } else {
            (i, i + 1, i + 2)
        };
        let p1 = coords[lower];
        let p2 = coords[middle];
        let p3 = coords[upper];
        total += (p3[0].to_radians() - p1[0].to_radians()) * p2[1].to_radians().sin();
    }
    total * EARTH_EQUATORIAL_RADIUS_M * EARTH_EQUATORIAL_RADIUS_M / 2.0
}

fn planar_area(ring: &[Position]) -> f64 {
    ring.windows(2)
        .map(|w| w[0][0] * w[1][1] - w[1][0] * w[0][1])
        .sum::<f64>()
        / 2.0
}

fn planar_centroid(ring: &[Position]) -> Option<Position> {
    let area = planar_area(ring);
    if area == 0.0 {
        return None;
    }
    let (mut lon, mut lat) = (0.0, 0.0);
    for w in ring.windows(2) {
        let cross = w[0][0] * w[1][1] - w[1][0] * w[0][1];
        lon += (w[0][0] + w[1][0]) * cross;
        lat += (w[0][1] + w[1][1]) * cross;
    }
    Some([lon / (6.0 * area), lat / (6.0 * area)])
}

fn vertex_mean<'a>(positions: impl Iterator<Item = &'a Position>) -> Option<Position> {
    let (count, lon, lat) = positions.fold((0usize, 0.0, 0.0), |(n, lon, lat), p| {
        (n + 1, lon + p[0], lat + p[1])
    });
    (count > 0).then(|| [lon / count as f64, lat / count as f64])
}

/// Axis-aligned bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BBox {
    pub fn around(p: Position) -> Self {
        Self {
            min_lon: p[0],
            min_lat: p[1],
            max_lon: p[0],
            max_lat: p[1],
        }
    }

    pub fn extend(self, p: Position) -> Self {
        Self {
            min_lon: self.min_lon.min(p[0]),
            min_lat: self.min_lat.min(p[1]),
            max_lon: self.max_lon.max(p[0]),
            max_lat: self.max_lat.max(p[1]),
        }
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    pub fn contains(&self, p: Position) -> bool {
        self.min_lon <= p[0] && p[0] <= self.max_lon && self.min_lat <= p[1] && p[1] <= self.max_lat
    }

    /// Grow every side by `degrees`.
    pub fn pad(&self, degrees: f64) -> Self {
        Self {
            min_lon: self.min_lon - degrees,
            min_lat: self.min_lat - degrees,
            max_lon: self.max_lon + degrees,
            max_lat: self.max_lat + degrees,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square(size: f64) -> Geometry {
        Geometry::Polygon(vec![vec![
            [0.0, 0.0],
            [size, 0.0],
            [size, size],
            [0.0, size],
            [0.0, 0.0],
        ]])
    }

    #[test]
    fn geojson_shape_round_trips_through_serde() {
        let raw = json!({"type": "LineString", "coordinates": [[4.0, 51.0], [4.1, 51.0]]});
        let geometry: Geometry = serde_json::from_value(raw.clone()).expect("parse");
        assert_eq!(geometry.type_name(), "LineString");
        assert_eq!(serde_json::to_value(&geometry).expect("serialise"), raw);
    }

    #[test]
    fn one_degree_of_latitude() {
        let d = distance_m([0.0, 0.0], [0.0, 1.0]);
        assert!((d - 111_195.08).abs() < 1.0, "{d}");
    }

    #[test]
    fn small_square_area_near_equator() {
        let area = square(0.01).area_m2();
        assert!((area - 1_236_000.0).abs() / 1_236_000.0 < 0.01, "{area}");
        assert_eq!(Geometry::Point([1.0, 1.0]).area_m2(), 0.0);
    }

    #[test]
    fn holes_are_subtracted() {
        let Geometry::Polygon(mut rings) = square(0.02) else {
            unreachable!()
        };
        rings.push(vec![
            [0.005, 0.005],
            [0.015, 0.005],
            [0.015, 0.015],
            [0.005, 0.015],
            [0.005, 0.005],
        ]);
        let with_hole = Geometry::Polygon(rings).area_m2();
        let full = square(0.02).area_m2();
        assert!((with_hole / full - 0.75).abs() < 0.01);
    }

    #[test]
    fn centroid_of_square_is_its_middle() {
        let c = square(2.0).centroid().expect("centroid");
        assert!((c[0] - 1.0).abs() < 1e-9 && (c[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn bbox_intersection() {
        let a = square(1.0).bbox().expect("bbox");
        let b = BBox::around([1.5, 1.5]);
        assert!(!a.intersects(&b));
        assert!(a.pad(0.5).intersects(&b));
        assert!(a.contains([0.5, 0.5]));
    }
}
