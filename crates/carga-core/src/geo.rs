//! Great-circle distance along a route

use carga_api::TrackingPoint;

/// Mean Earth radius used for all distances
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in km between two `(latitude, longitude)` pairs in degrees
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Sum of consecutive leg distances. Fewer than two points is zero.
pub fn route_distance_km(coordinates: &[(f64, f64)]) -> f64 {
    coordinates
        .windows(2)
        .map(|leg| haversine_km(leg[0], leg[1]))
        .sum()
}

/// Distance along tracking points, in the order given
pub fn points_distance_km(points: &[TrackingPoint]) -> f64 {
    let coordinates: Vec<(f64, f64)> = points.iter().map(|p| p.sample.coordinates()).collect();
    route_distance_km(&coordinates)
}
