//! Spatial candidate pruning
//!
//! Before matching, the reference table is cut down to the records in a
//! square box around the previous estimate. The box is a Chebyshev bound
//! on tile coordinates, a cheap pre-filter ahead of the actual metric.

use log::warn;

use crate::error::CoreError;
use crate::fingerprint::{CandidateSet, FingerprintStore};

/// Select the candidate records for one localization step.
///
/// With no prior estimate the whole table is returned. Otherwise the box
/// `[cx - radius, cx + radius] x [cy - radius, cy + radius]` around the
/// center's tile is returned; if that box comes up empty the whole table
/// is returned instead, so callers are guaranteed a non-empty set. An id
/// missing from the store is the caller's error and is surfaced as such.
pub fn select<'a>(
    center: Option<&str>,
    radius: f64,
    store: &'a FingerprintStore,
) -> Result<CandidateSet<'a>, CoreError> {
    let center_id = match center {
        None => return Ok(store.all()),
        Some(id) => id,
    };
    let center_record = store.lookup(center_id)?;
    let (cx, cy) = (center_record.tile_x, center_record.tile_y);

    let selected: CandidateSet<'a> = store
        .all()
        .into_iter()
        .filter(|r| {
            r.tile_x >= cx - radius
                && r.tile_x <= cx + radius
                && r.tile_y >= cy - radius
                && r.tile_y <= cy + radius
        })
        .collect();

    if selected.is_empty() {
        warn!(
            "candidate window around {center_id} (radius {radius}) is empty, \
             falling back to the full table"
        );
        return Ok(store.all());
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::MagneticVector;
    use crate::fingerprint::FingerprintRecord;

    fn grid_store() -> FingerprintStore {
        // 5x5 tile grid, one record per tile
        let mut records = Vec::new();
        for y in 0..5 {
            for x in 0..5 {
                records.push(FingerprintRecord {
                    location_id: format!("loc_{x}_{y}"),
                    tile_x: x as f64,
                    tile_y: y as f64,
                    fingerprint: MagneticVector::new(x as f64, y as f64, 0.0),
                });
            }
        }
        FingerprintStore::from_records(records).unwrap()
    }

    #[test]
    fn no_center_returns_full_table() {
        let store = grid_store();
        assert_eq!(select(None, 1.0, &store).unwrap().len(), store.len());
    }

    #[test]
    fn box_is_chebyshev_not_circular() {
        let store = grid_store();
        let selected = select(Some("loc_2_2"), 1.0, &store).unwrap();
        // full 3x3 block, corners included
        assert_eq!(selected.len(), 9);
        assert!(selected.iter().any(|r| r.location_id == "loc_1_1"));
        assert!(selected.iter().any(|r| r.location_id == "loc_3_3"));
    }

    #[test]
    fn growth_is_monotonic_in_radius() {
        let store = grid_store();
        for r in 0..5 {
            let smaller = select(Some("loc_2_2"), r as f64, &store).unwrap();
            let larger = select(Some("loc_2_2"), (r + 1) as f64, &store).unwrap();
            for record in &smaller {
                assert!(
                    larger.iter().any(|l| l.location_id == record.location_id),
                    "radius {} dropped {}",
                    r + 1,
                    record.location_id
                );
            }
        }
    }

    #[test]
    fn unknown_center_is_an_error() {
        let store = grid_store();
        assert!(matches!(
            select(Some("loc_9_9"), 1.0, &store),
            Err(CoreError::UnknownLocation { .. })
        ));
    }

    #[test]
    fn empty_box_falls_back_to_full_table() {
        // A record with NaN tiles never satisfies the box comparisons, so
        // windowing around it produces an empty box.
        let store = FingerprintStore::from_records(vec![
            FingerprintRecord {
                location_id: "adrift".into(),
                tile_x: f64::NAN,
                tile_y: f64::NAN,
                fingerprint: MagneticVector::new(0.0, 0.0, 0.0),
            },
            FingerprintRecord {
                location_id: "anchored".into(),
                tile_x: 0.0,
                tile_y: 0.0,
                fingerprint: MagneticVector::new(1.0, 1.0, 1.0),
            },
        ])
        .unwrap();

        let selected = select(Some("adrift"), 2.0, &store).unwrap();
        assert_eq!(selected.len(), store.len());
    }
}
