// geometry.rs
//
// Distance helpers for the corridor resolver. Route segments are short (a few
// km inside one city), so segment math runs on a local equirectangular
// projection centred on the segment start; point-to-point distances use the
// haversine formula.

use crate::data_structures::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6371.0;
const KM_PER_DEGREE: f64 = EARTH_RADIUS_KM * std::f64::consts::PI / 180.0;

/// Great-circle distance between two points in km.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();
    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Offset of `p` from `origin` in km on a plane tangent at `origin`.
fn to_local_km(origin: GeoPoint, p: GeoPoint) -> (f64, f64) {
    let x = (p.lng - origin.lng) * origin.lat.to_radians().cos() * KM_PER_DEGREE;
    let y = (p.lat - origin.lat) * KM_PER_DEGREE;
    (x, y)
}

/// Where a point falls relative to a route segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentProjection {
    /// Distance from the segment start to the foot of the perpendicular, in km.
    pub along_km: f64,
    /// Perpendicular distance from the point to the segment line, in km.
    pub offset_km: f64,
    /// Position of the foot as a fraction of the segment; 0..=1 means on the segment.
    pub fraction: f64,
}

/// Projects `point` onto the segment `start -> end`.
/// Returns `None` for a degenerate segment (start == end).
pub fn project_onto_segment(
    start: GeoPoint,
    end: GeoPoint,
    point: GeoPoint,
) -> Option<SegmentProjection> {
    let (ex, ey) = to_local_km(start, end);
    let length_sq = ex * ex + ey * ey;
    if length_sq <= f64::EPSILON {
        return None;
    }
    let (px, py) = to_local_km(start, point);
    let fraction = (px * ex + py * ey) / length_sq;
    let length = length_sq.sqrt();
    // |cross| / |e| is the distance to the infinite line through the segment.
    let offset_km = (px * ey - py * ex).abs() / length;
    Some(SegmentProjection {
        along_km: fraction * length,
        offset_km,
        fraction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_matches_known_distance() {
        // One degree of latitude is ~111.19 km.
        let d = haversine_km(GeoPoint::new(13.0, 80.0), GeoPoint::new(14.0, 80.0));
        assert!((d - 111.19).abs() < 0.05, "got {}", d);
        assert_eq!(haversine_km(GeoPoint::new(13.0, 80.0), GeoPoint::new(13.0, 80.0)), 0.0);
    }

    #[test]
    fn projection_of_point_beside_the_midpoint() {
        let start = GeoPoint::new(13.00, 80.25);
        let end = GeoPoint::new(13.02, 80.25);
        // ~0.11 km east of the midpoint
        let point = GeoPoint::new(13.01, 80.251);

        let p = project_onto_segment(start, end, point).unwrap();
        assert!((p.fraction - 0.5).abs() < 1e-6);
        assert!((p.along_km - 0.5 * 0.02 * KM_PER_DEGREE).abs() < 1e-6);
        assert!(p.offset_km > 0.1 && p.offset_km < 0.12, "got {}", p.offset_km);
    }

    #[test]
    fn point_behind_start_has_negative_fraction() {
        let p = project_onto_segment(
            GeoPoint::new(13.00, 80.25),
            GeoPoint::new(13.02, 80.25),
            GeoPoint::new(12.99, 80.25),
        )
        .unwrap();
        assert!(p.fraction < 0.0);
        assert!(p.offset_km < 1e-9);
    }

    #[test]
    fn degenerate_segment_has_no_projection() {
        let a = GeoPoint::new(13.0, 80.0);
        assert!(project_onto_segment(a, a, GeoPoint::new(13.1, 80.0)).is_none());
    }
}
