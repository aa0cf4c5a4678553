//! Fixed-grid bucketing of coordinates.
//!
//! Latitude and longitude are rounded independently to three decimals
//! (0.001°, roughly 111 m of latitude). A point-in-radius search becomes a
//! scan over a small block of neighboring cells followed by an exact
//! distance check.

use std::collections::HashMap;

use crate::join::distance::EARTH_RADIUS_M;
use crate::join::types::Position;

/// Cells per degree.
const SCALE: f64 = 1000.0;

/// A grid cell, stored as thousandths of a degree on each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeoCell {
    pub lat: i64,
    pub lon: i64,
}

impl GeoCell {
    /// Rounds a position to its cell. Non-finite coordinates have no cell.
    pub fn of(position: Position) -> Option<Self> {
        if !position.lat.is_finite() || !position.lon.is_finite() {
            return None;
        }
        Some(Self {
            lat: (position.lat * SCALE).round() as i64,
            lon: (position.lon * SCALE).round() as i64,
        })
    }

    /// Cell center in degrees.
    pub fn center(&self) -> Position {
        Position::new(self.lat as f64 / SCALE, self.lon as f64 / SCALE)
    }

    fn offset(&self, dlat: i64, dlon: i64) -> Self {
        Self {
            lat: self.lat + dlat,
            lon: self.lon + dlon,
        }
    }
}

/// The 3×3 block centered on `cell`, the cell itself included.
pub fn neighbors(cell: GeoCell) -> [GeoCell; 9] {
    let mut out = [cell; 9];
    let mut i = 0;
    for dlat in -1..=1 {
        for dlon in -1..=1 {
            out[i] = cell.offset(dlat, dlon);
            i += 1;
        }
    }
    out
}

/// All cells within `reach.0` rows and `reach.1` columns of `cell`.
///
/// A reach of `(1, 1)` is exactly [`neighbors`].
pub fn block(cell: GeoCell, reach: (i64, i64)) -> Vec<GeoCell> {
    if reach == (1, 1) {
        return neighbors(cell).to_vec();
    }
    let (rows, cols) = reach;
    (-rows..=rows)
        .flat_map(|dlat| (-cols..=cols).map(move |dlon| cell.offset(dlat, dlon)))
        .collect()
}

/// Half-width of the block that must be scanned around a point at `lat` so
/// that every position within `radius_m` lands inside it.
///
/// Two rounded values differ by at most `floor(|a - b| / step) + 1` steps
/// (one more than the span when both sit on rounding ties), so the reach is
/// that bound applied to the largest coordinate delta a `radius_m` arc can
/// span. Never narrower than the 3×3 neighborhood.
pub fn reach_for(lat: f64, radius_m: f64) -> (i64, i64) {
    let dlat_deg = (radius_m / EARTH_RADIUS_M).to_degrees();
    let widest = (lat.abs() + dlat_deg).min(89.9).to_radians().cos();
    let dlon_deg = dlat_deg / widest;

    let rows = (dlat_deg * SCALE).floor() as i64 + 1;
    let cols = (dlon_deg * SCALE).floor() as i64 + 1;
    (rows.max(1), cols.max(1))
}

/// Payloads grouped by [`GeoCell`].
#[derive(Debug, Clone)]
pub struct CellIndex<T> {
    cells: HashMap<GeoCell, Vec<T>>,
    len: usize,
}

impl<T> Default for CellIndex<T> {
    fn default() -> Self {
        Self {
            cells: HashMap::new(),
            len: 0,
        }
    }
}

impl<T> CellIndex<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files `payload` under the cell of `position`.
    ///
    /// Returns `false` and drops the payload when there is no usable position.
    pub fn insert(&mut self, position: Option<Position>, payload: T) -> bool {
        let Some(cell) = position.and_then(GeoCell::of) else {
            return false;
        };
        self.cells.entry(cell).or_default().push(payload);
        self.len += 1;
        true
    }

    /// Payloads filed under exactly `cell`.
    pub fn lookup(&self, cell: &GeoCell) -> &[T] {
        self.cells.get(cell).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of payloads.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of populated cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounds_to_three_decimals() {
        let cell = GeoCell::of(Position::new(48.8604, 2.3496)).unwrap();
        assert_eq!(cell, GeoCell { lat: 48860, lon: 2350 });

        let cell = GeoCell::of(Position::new(-33.4567, -70.6484)).unwrap();
        assert_eq!(cell, GeoCell { lat: -33457, lon: -70648 });
    }

    #[test]
    fn test_non_finite_has_no_cell() {
        assert_eq!(GeoCell::of(Position::new(f64::NAN, 2.0)), None);
        assert_eq!(GeoCell::of(Position::new(1.0, f64::INFINITY)), None);
    }

    #[test]
    fn test_neighbors_cover_3x3() {
        let center = GeoCell { lat: 48860, lon: 2350 };
        let cells = neighbors(center);

        assert_eq!(cells.len(), 9);
        assert!(cells.contains(&center));
        for dlat in -1..=1 {
            for dlon in -1..=1 {
                assert!(cells.contains(&GeoCell {
                    lat: 48860 + dlat,
                    lon: 2350 + dlon
                }));
            }
        }
    }

    #[test]
    fn test_block_with_unit_reach_matches_neighbors() {
        let center = GeoCell { lat: 10, lon: -10 };
        let mut from_block = block(center, (1, 1));
        let mut from_neighbors = neighbors(center).to_vec();
        from_block.sort();
        from_neighbors.sort();
        assert_eq!(from_block, from_neighbors);
    }

    #[test]
    fn test_reach_widens_with_latitude() {
        let equator = reach_for(0.0, 150.0);
        let paris = reach_for(48.86, 150.0);
        assert_eq!(equator, (2, 2));
        assert_eq!(paris.0, 2);
        assert_eq!(paris.1, 3);
    }

    #[test]
    fn test_block_size_follows_reach() {
        let cells = block(GeoCell { lat: 0, lon: 0 }, (2, 3));
        assert_eq!(cells.len(), 5 * 7);
        assert!(cells.contains(&GeoCell { lat: -2, lon: 3 }));
        assert!(!cells.contains(&GeoCell { lat: 3, lon: 0 }));
    }

    #[test]
    fn test_reach_covers_rounding_ties() {
        // 0.001° apart, yet rounded half away from zero into cells two rows apart
        let south = GeoCell::of(Position::new(-0.0005, 0.0)).unwrap();
        let north = GeoCell::of(Position::new(0.0005, 0.0)).unwrap();
        assert_eq!(north.lat - south.lat, 2);

        let one_cell_arc = 0.001f64.to_radians() * EARTH_RADIUS_M;
        assert!(reach_for(0.0, one_cell_arc).0 >= 2);

        let two_cell_arc = 0.002f64.to_radians() * EARTH_RADIUS_M;
        assert!(reach_for(0.0, two_cell_arc).0 >= 3);
    }

    #[test]
    fn test_reach_never_below_one() {
        assert_eq!(reach_for(0.0, 1.0), (1, 1));
    }

    #[test]
    fn test_insert_drops_missing_position() {
        let mut index = CellIndex::new();
        assert!(!index.insert(None, "a"));
        assert!(index.insert(Some(Position::new(48.86, 2.35)), "b"));
        assert_eq!(index.len(), 1);
        assert_eq!(index.cell_count(), 1);
    }

    #[test]
    fn test_lookup_exact_cell_only() {
        let mut index = CellIndex::new();
        index.insert(Some(Position::new(48.8601, 2.3501)), 1);
        index.insert(Some(Position::new(48.8602, 2.3499)), 2);

        let hit = GeoCell { lat: 48860, lon: 2350 };
        assert_eq!(index.lookup(&hit), &[1, 2]);
        assert!(index.lookup(&GeoCell { lat: 48861, lon: 2350 }).is_empty());
    }
}
