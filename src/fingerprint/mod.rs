//! Reference fingerprint table
//!
//! The table is loaded once at startup and treated as read-only for the
//! lifetime of the process. Every localization step works against a
//! borrowed view of it (a [`CandidateSet`]), never a copy.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::info;

use crate::common::types::MagneticVector;
use crate::error::CoreError;

/// One reference location: its tile-grid coordinates and the magnetic
/// fingerprint recorded there.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintRecord {
    pub location_id: String,
    pub tile_x: f64,
    pub tile_y: f64,
    pub fingerprint: MagneticVector,
}

/// The subset of the table considered for one localization step.
/// Borrowed from the store, discarded after use.
pub type CandidateSet<'a> = Vec<&'a FingerprintRecord>;

/// Immutable table of reference fingerprints keyed by location id.
#[derive(Debug)]
pub struct FingerprintStore {
    records: Vec<FingerprintRecord>,
    index: HashMap<String, usize>,
}

impl FingerprintStore {
    /// Build a store from already-parsed records.
    ///
    /// Rejects an empty table and duplicate location ids; iteration order
    /// of the resulting store is the input order, which the matchers rely
    /// on for stable tie-breaking.
    pub fn from_records(records: Vec<FingerprintRecord>) -> Result<Self, CoreError> {
        if records.is_empty() {
            return Err(CoreError::EmptyStore);
        }
        let mut index = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            if index.insert(record.location_id.clone(), i).is_some() {
                return Err(CoreError::DuplicateLocation {
                    id: record.location_id.clone(),
                });
            }
        }
        Ok(FingerprintStore { records, index })
    }

    /// Load the reference dataset from a CSV file.
    pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let file = File::open(path.as_ref())?;
        let store = Self::load_csv_reader(BufReader::new(file))?;
        info!(
            "loaded {} fingerprint records from {}",
            store.len(),
            path.as_ref().display()
        );
        Ok(store)
    }

    /// Load the reference dataset from any buffered reader.
    ///
    /// The header row must name `location_id, tile_x, tile_y, mag_x, mag_y,
    /// mag_z`; the survey tool's original spellings (`Location, X, Y, M_X,
    /// M_Y, M_Z`) are accepted as aliases. Column order is free and extra
    /// columns are ignored.
    pub fn load_csv_reader<R: BufRead>(reader: R) -> Result<Self, CoreError> {
        let mut lines = reader.lines().enumerate();

        let (_, header) = lines.next().ok_or(CoreError::Dataset {
            line: 1,
            reason: "missing header row".into(),
        })?;
        let header = header?;
        let columns = HeaderColumns::parse(&header)?;

        let mut records = Vec::new();
        for (i, line) in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(columns.parse_row(&line, i + 1)?);
        }
        Self::from_records(records)
    }

    /// The entire table as a candidate set.
    pub fn all(&self) -> CandidateSet<'_> {
        self.records.iter().collect()
    }

    /// Look up one record by location id.
    pub fn lookup(&self, location_id: &str) -> Result<&FingerprintRecord, CoreError> {
        self.index
            .get(location_id)
            .map(|&i| &self.records[i])
            .ok_or_else(|| CoreError::UnknownLocation {
                id: location_id.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Resolved column positions for the six required fields.
struct HeaderColumns {
    location: usize,
    tile_x: usize,
    tile_y: usize,
    mag: [usize; 3],
}

impl HeaderColumns {
    fn parse(header: &str) -> Result<Self, CoreError> {
        let names: Vec<String> = header
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .collect();
        let find = |wanted: &[&str]| -> Result<usize, CoreError> {
            names
                .iter()
                .position(|n| wanted.contains(&n.as_str()))
                .ok_or_else(|| CoreError::Dataset {
                    line: 1,
                    reason: format!("missing column {}", wanted[0]),
                })
        };
        Ok(HeaderColumns {
            location: find(&["location_id", "location"])?,
            tile_x: find(&["tile_x", "x"])?,
            tile_y: find(&["tile_y", "y"])?,
            mag: [
                find(&["mag_x", "m_x"])?,
                find(&["mag_y", "m_y"])?,
                find(&["mag_z", "m_z"])?,
            ],
        })
    }

    fn parse_row(&self, line: &str, line_no: usize) -> Result<FingerprintRecord, CoreError> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let field = |i: usize| -> Result<&str, CoreError> {
            fields.get(i).copied().ok_or_else(|| CoreError::Dataset {
                line: line_no,
                reason: format!("expected at least {} columns, got {}", i + 1, fields.len()),
            })
        };
        let number = |i: usize| -> Result<f64, CoreError> {
            let raw = field(i)?;
            raw.parse::<f64>().map_err(|_| CoreError::Dataset {
                line: line_no,
                reason: format!("not a number: {raw:?}"),
            })
        };
        Ok(FingerprintRecord {
            location_id: field(self.location)?.to_string(),
            tile_x: number(self.tile_x)?,
            tile_y: number(self.tile_y)?,
            fingerprint: MagneticVector::new(
                number(self.mag[0])?,
                number(self.mag[1])?,
                number(self.mag[2])?,
            ),
        })
    }
}
