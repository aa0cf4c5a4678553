//! Great-circle distance on a spherical Earth.

use crate::join::types::Position;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Returned when either side has no position. Larger than any realistic radius,
/// so radius tests fail closed.
pub const UNREACHABLE_M: f64 = 1e12;

/// Haversine distance in meters between two positions.
pub fn haversine_m(a: Position, b: Position) -> f64 {
    let p1 = a.lat.to_radians();
    let p2 = b.lat.to_radians();
    let dphi = (b.lat - a.lat).to_radians();
    let dlambda = (b.lon - a.lon).to_radians();

    let h = (dphi / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Distance between two optional positions; [`UNREACHABLE_M`] if either is missing.
pub fn distance_m(a: Option<Position>, b: Option<Position>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => haversine_m(a, b),
        _ => UNREACHABLE_M,
    }
}

/// Radius membership. A distance exactly on the radius is a match.
pub fn within_radius(distance_m: f64, radius_m: f64) -> bool {
    distance_m <= radius_m
}
