//! Localization engine
//!
//! Owns the estimator state and orchestrates one update cycle per sensor
//! reading: validate, prune the table around the previous estimate, run
//! the selected algorithm, raise change/arrival signals.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info};

use crate::common::types::MagneticVector;
use crate::error::CoreError;
use crate::fingerprint::FingerprintStore;
use crate::localization::matcher::{self, DistanceMetric};
use crate::localization::particle::{Particle, ParticleFilter};
use crate::localization::window;

/// Closed set of localization algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Euclidean,
    Manhattan,
    Weighted,
    Knn3,
    Particle,
}

impl Algorithm {
    fn distance_metric(self) -> Option<DistanceMetric> {
        match self {
            Algorithm::Euclidean => Some(DistanceMetric::Euclidean),
            Algorithm::Manhattan => Some(DistanceMetric::Manhattan),
            Algorithm::Weighted => Some(DistanceMetric::Weighted),
            Algorithm::Knn3 => Some(DistanceMetric::Knn3),
            Algorithm::Particle => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Euclidean => "euclidean",
            Algorithm::Manhattan => "manhattan",
            Algorithm::Weighted => "weighted",
            Algorithm::Knn3 => "knn3",
            Algorithm::Particle => "particle",
        }
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" => Ok(Algorithm::Euclidean),
            "manhattan" => Ok(Algorithm::Manhattan),
            "weighted" => Ok(Algorithm::Weighted),
            "knn" | "knn3" => Ok(Algorithm::Knn3),
            "particle" => Ok(Algorithm::Particle),
            other => Err(format!("unknown algorithm: {other}")),
        }
    }
}

/// Particle-filter tuning, adjustable before or between runs.
#[derive(Debug, Clone, Copy)]
pub struct ParticleParams {
    pub count: usize,
    pub sensor_noise: f64,
    pub motion_noise: f64,
    /// Fixed RNG seed for reproducible runs; None draws from the OS
    pub seed: Option<u64>,
}

impl Default for ParticleParams {
    fn default() -> Self {
        ParticleParams {
            count: 200,
            sensor_noise: 2.0,
            motion_noise: 0.5,
            seed: None,
        }
    }
}

/// Outcome of one update cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateResult {
    /// The reading was malformed; no state changed
    Rejected,
    Located {
        location: String,
        /// The estimate differs from the previous one
        changed: bool,
        /// The estimate equals the configured target
        reached_target: bool,
    },
}

const DEFAULT_WINDOW_RADIUS: f64 = 5.0;

/// Sequential location estimator over an immutable fingerprint store.
pub struct LocalizationEngine {
    store: Arc<FingerprintStore>,
    algorithm: Algorithm,
    window_radius: f64,
    previous_location: Option<String>,
    target_location: Option<String>,
    particle_params: ParticleParams,
    filter: Option<ParticleFilter>,
}

impl LocalizationEngine {
    pub fn new(store: Arc<FingerprintStore>) -> Self {
        LocalizationEngine {
            store,
            algorithm: Algorithm::Euclidean,
            window_radius: DEFAULT_WINDOW_RADIUS,
            previous_location: None,
            target_location: None,
            particle_params: ParticleParams::default(),
            filter: None,
        }
    }

    /// One localization step.
    ///
    /// A reading needs at least three finite components; anything beyond
    /// the first three is ignored. Malformed readings come back as
    /// [`UpdateResult::Rejected`] with no state change.
    pub fn update(&mut self, reading: &[f64]) -> Result<UpdateResult, CoreError> {
        let measurement = match validate_reading(reading) {
            Some(m) => m,
            None => {
                debug!("rejected malformed reading: {reading:?}");
                return Ok(UpdateResult::Rejected);
            }
        };

        let store = Arc::clone(&self.store);
        let candidates = window::select(
            self.previous_location.as_deref(),
            self.window_radius,
            &store,
        )?;

        let location = match self.algorithm.distance_metric() {
            Some(metric) => {
                // static classifiers carry no state across steps
                self.filter = None;
                matcher::classify(&measurement, &candidates, metric)?
            }
            None => {
                // rebuild the filter whenever the window changed size;
                // in-place adaptation is not worth the bookkeeping
                let needs_rebuild = self
                    .filter
                    .as_ref()
                    .map(|f| f.candidate_count() != candidates.len())
                    .unwrap_or(true);
                if needs_rebuild {
                    let p = self.particle_params;
                    self.filter = Some(ParticleFilter::new(
                        &candidates,
                        p.count,
                        p.sensor_noise,
                        p.motion_noise,
                        p.seed,
                    )?);
                }
                // the filter always exists at this point
                match self.filter.as_mut() {
                    Some(filter) => filter.update(&measurement),
                    None => return Err(CoreError::EmptyCandidates),
                }
            }
        };

        let changed = self.previous_location.as_deref() != Some(location.as_str());
        if changed {
            info!("location changed to {location}");
            self.previous_location = Some(location.clone());
        }
        let reached_target = self.target_location.as_deref() == Some(location.as_str());

        Ok(UpdateResult::Located {
            location,
            changed,
            reached_target,
        })
    }

    /// Switch the active algorithm. Takes effect on the next update; any
    /// particle-filter state is metric-specific and is discarded.
    pub fn set_algorithm(&mut self, algorithm: Algorithm) {
        if algorithm != self.algorithm {
            info!("switching algorithm to {}", algorithm.name());
        }
        self.algorithm = algorithm;
        self.filter = None;
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Set the half-width of the candidate window, in tiles.
    pub fn set_window_radius(&mut self, radius: f64) -> Result<(), CoreError> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(CoreError::InvalidParameter {
                name: "window_radius",
                value: radius,
            });
        }
        self.window_radius = radius;
        self.filter = None;
        Ok(())
    }

    pub fn window_radius(&self) -> f64 {
        self.window_radius
    }

    /// Tune the particle filter; applies from the next rebuild.
    pub fn set_particle_params(&mut self, params: ParticleParams) {
        self.particle_params = params;
        self.filter = None;
    }

    /// Seed the estimator with a known starting location.
    pub fn set_initial_location(&mut self, location_id: &str) -> Result<(), CoreError> {
        self.store.lookup(location_id)?;
        self.previous_location = Some(location_id.to_string());
        Ok(())
    }

    /// Set or clear the arrival target.
    pub fn set_target(&mut self, location_id: Option<&str>) -> Result<(), CoreError> {
        if let Some(id) = location_id {
            self.store.lookup(id)?;
        }
        self.target_location = location_id.map(str::to_string);
        Ok(())
    }

    pub fn previous_location(&self) -> Option<&str> {
        self.previous_location.as_deref()
    }

    pub fn target_location(&self) -> Option<&str> {
        self.target_location.as_deref()
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    /// Current particle population, when the particle algorithm is active.
    pub fn particle_population(&self) -> Option<&[Particle]> {
        self.filter.as_ref().map(|f| f.population())
    }

    /// Configuration entry point: numeric parameters by name, unknown
    /// names ignored, bad values rejected.
    pub fn configure(&mut self, params: &HashMap<String, f64>) -> Result<(), CoreError> {
        if let Some(&radius) = params.get("window_radius") {
            self.set_window_radius(radius)?;
        }
        let mut particle = self.particle_params;
        if let Some(&count) = params.get("particle_count") {
            if count < 1.0 || count.fract() != 0.0 {
                return Err(CoreError::InvalidParameter {
                    name: "particle_count",
                    value: count,
                });
            }
            particle.count = count as usize;
        }
        if let Some(&sigma) = params.get("sensor_noise") {
            particle.sensor_noise = sigma;
        }
        if let Some(&sigma) = params.get("motion_noise") {
            particle.motion_noise = sigma;
        }
        self.set_particle_params(particle);
        Ok(())
    }
}

/// First three components as a measurement vector, if all are finite.
fn validate_reading(reading: &[f64]) -> Option<MagneticVector> {
    if reading.len() < 3 {
        return None;
    }
    let (x, y, z) = (reading[0], reading[1], reading[2]);
    if !(x.is_finite() && y.is_finite() && z.is_finite()) {
        return None;
    }
    Some(MagneticVector::new(x, y, z))
}
