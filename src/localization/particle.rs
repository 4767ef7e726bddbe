//! Particle-filter sequential estimator over the fingerprint space
//!
//! Each particle is a weighted hypothesis: a location tag plus a perturbed
//! copy of that location's reference fingerprint. There is no spatial
//! transition model; the "motion" step is a random walk in sensed-value
//! space anchored to the tag. That behavior is deliberate and matches the
//! system this estimator was built for.

use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::VecDeque;

use crate::common::types::MagneticVector;
use crate::error::CoreError;
use crate::fingerprint::CandidateSet;

/// Raw-estimate history length for temporal smoothing.
const SMOOTHING_WINDOW: usize = 5;

/// Weight sums below this are treated as total degeneracy.
const DEGENERACY_EPS: f64 = 1e-300;

/// One weighted location hypothesis.
#[derive(Debug, Clone)]
pub struct Particle {
    pub location_id: String,
    pub estimated_fingerprint: MagneticVector,
    pub weight: f64,
}

/// Sequential Bayesian estimator over a fixed candidate set.
///
/// The population lives in a flat array and is replaced wholesale on every
/// resampling step; particles carry no identity across steps.
#[derive(Debug)]
pub struct ParticleFilter {
    /// Size of the candidate set the filter was built against
    candidate_count: usize,
    particles: Vec<Particle>,
    motion_noise: Normal<f64>,
    sensor_sigma: f64,
    history: VecDeque<String>,
    rng: StdRng,
}

impl ParticleFilter {
    /// Build a filter of `count` particles over `candidates`.
    ///
    /// Tags are drawn uniformly with replacement; each particle starts at
    /// its tag's reference fingerprint plus per-axis `N(0, sensor_noise)`
    /// jitter, with weight `1/count`. Pass a seed for deterministic runs.
    pub fn new(
        candidates: &CandidateSet<'_>,
        count: usize,
        sensor_noise: f64,
        motion_noise: f64,
        seed: Option<u64>,
    ) -> Result<Self, CoreError> {
        if candidates.is_empty() {
            return Err(CoreError::EmptyCandidates);
        }
        if count == 0 {
            return Err(CoreError::InvalidParameter {
                name: "particle_count",
                value: 0.0,
            });
        }
        let sensor_dist = positive_normal("sensor_noise", sensor_noise)?;
        let motion_dist = positive_normal("motion_noise", motion_noise)?;

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let references: Vec<(String, MagneticVector)> = candidates
            .iter()
            .map(|r| (r.location_id.clone(), r.fingerprint))
            .collect();

        let uniform = 1.0 / count as f64;
        let particles = (0..count)
            .map(|_| {
                let (id, reference) = &references[rng.random_range(0..references.len())];
                Particle {
                    location_id: id.clone(),
                    estimated_fingerprint: perturb(*reference, &sensor_dist, &mut rng),
                    weight: uniform,
                }
            })
            .collect();

        Ok(ParticleFilter {
            candidate_count: references.len(),
            particles,
            motion_noise: motion_dist,
            sensor_sigma: sensor_noise,
            history: VecDeque::with_capacity(SMOOTHING_WINDOW),
            rng,
        })
    }

    /// Number of candidate records the filter was built against. The engine
    /// uses this to detect a moved window and rebuild the filter.
    pub fn candidate_count(&self) -> usize {
        self.candidate_count
    }

    /// Current population, for diagnostics/visualization.
    pub fn population(&self) -> &[Particle] {
        &self.particles
    }

    /// One measurement update; returns the temporally-smoothed estimate.
    pub fn update(&mut self, measurement: &MagneticVector) -> String {
        // 1. weight by measurement likelihood
        let sigma = self.sensor_sigma;
        for particle in &mut self.particles {
            particle.weight = likelihood(measurement, &particle.estimated_fingerprint, sigma);
        }

        // 2. normalize, with a uniform reset if every weight collapsed
        let total: f64 = self.particles.iter().map(|p| p.weight).sum();
        let uniform = 1.0 / self.particles.len() as f64;
        if total <= DEGENERACY_EPS || !total.is_finite() {
            warn!("particle weights degenerate (sum {total:e}), resetting to uniform");
            for particle in &mut self.particles {
                particle.weight = uniform;
            }
        } else {
            for particle in &mut self.particles {
                particle.weight /= total;
            }
        }

        // 3. aggregate post-normalization weight per location tag
        let raw_estimate = self.dominant_location();

        // 4. multinomial resample and random-walk the fingerprint estimates
        self.resample();

        // 5. temporal smoothing over the last few raw estimates
        if self.history.len() == SMOOTHING_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(raw_estimate);
        self.smoothed_estimate()
    }

    /// Aggregate weight per location tag, heaviest first.
    pub fn location_weights(&self) -> Vec<(String, f64)> {
        let mut totals: Vec<(String, f64)> = Vec::new();
        for particle in &self.particles {
            match totals.iter_mut().find(|(id, _)| *id == particle.location_id) {
                Some((_, w)) => *w += particle.weight,
                None => totals.push((particle.location_id.clone(), particle.weight)),
            }
        }
        totals.sort_by(|a, b| b.1.total_cmp(&a.1));
        totals
    }

    fn dominant_location(&self) -> String {
        // location_weights is sorted heaviest-first and the population is
        // never empty, so the front entry is the raw estimate
        self.location_weights()
            .into_iter()
            .next()
            .map(|(id, _)| id)
            .unwrap_or_default()
    }

    /// Draw a whole new population from the current one, proportional to
    /// weight, then perturb each survivor's fingerprint estimate and reset
    /// weights to uniform.
    fn resample(&mut self) {
        let n = self.particles.len();
        let uniform = 1.0 / n as f64;
        let cumulative: Vec<f64> = self
            .particles
            .iter()
            .scan(0.0, |acc, p| {
                *acc += p.weight;
                Some(*acc)
            })
            .collect();

        let mut next = Vec::with_capacity(n);
        for _ in 0..n {
            let u: f64 = self.rng.random();
            let idx = cumulative
                .iter()
                .position(|&cw| cw >= u)
                .unwrap_or(n - 1);
            let source = &self.particles[idx];
            next.push(Particle {
                location_id: source.location_id.clone(),
                estimated_fingerprint: perturb(
                    source.estimated_fingerprint,
                    &self.motion_noise,
                    &mut self.rng,
                ),
                weight: uniform,
            });
        }
        self.particles = next;
    }

    /// Most frequent raw estimate in the history; ties break toward the
    /// most recently seen one.
    fn smoothed_estimate(&self) -> String {
        let mut best: Option<(&str, usize, usize)> = None; // (id, count, last index)
        for (i, id) in self.history.iter().enumerate() {
            let count = self.history.iter().filter(|h| *h == id).count();
            let last_seen = i;
            best = match best {
                Some((_, best_count, best_seen))
                    if count < best_count || (count == best_count && last_seen < best_seen) =>
                {
                    best
                }
                _ => Some((id, count, last_seen)),
            };
        }
        best.map(|(id, _, _)| id.to_string()).unwrap_or_default()
    }
}

/// Independent per-axis Gaussian likelihood of a measurement given a
/// particle's fingerprint estimate.
fn likelihood(measurement: &MagneticVector, estimate: &MagneticVector, sigma: f64) -> f64 {
    let norm = 1.0 / ((2.0 * std::f64::consts::PI).sqrt() * sigma);
    (0..3)
        .map(|axis| {
            let z = (measurement[axis] - estimate[axis]) / sigma;
            norm * (-0.5 * z * z).exp()
        })
        .product()
}

fn positive_normal(name: &'static str, sigma: f64) -> Result<Normal<f64>, CoreError> {
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(CoreError::InvalidParameter { name, value: sigma });
    }
    Normal::new(0.0, sigma).map_err(|_| CoreError::InvalidParameter { name, value: sigma })
}

fn perturb(vector: MagneticVector, noise: &Normal<f64>, rng: &mut StdRng) -> MagneticVector {
    MagneticVector::new(
        vector.x + noise.sample(rng),
        vector.y + noise.sample(rng),
        vector.z + noise.sample(rng),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{FingerprintRecord, FingerprintStore};

    fn rec(id: &str, tile: (f64, f64), mag: (f64, f64, f64)) -> FingerprintRecord {
        FingerprintRecord {
            location_id: id.to_string(),
            tile_x: tile.0,
            tile_y: tile.1,
            fingerprint: MagneticVector::new(mag.0, mag.1, mag.2),
        }
    }

    /// One location matches the measurement exactly; the rest are separated
    /// by well over 3 sigma.
    fn separated_store() -> FingerprintStore {
        FingerprintStore::from_records(vec![
            rec("true_spot", (0.0, 0.0), (20.0, -5.0, 43.0)),
            rec("decoy_1", (1.0, 0.0), (50.0, -5.0, 43.0)),
            rec("decoy_2", (0.0, 1.0), (20.0, 40.0, 43.0)),
            rec("decoy_3", (1.0, 1.0), (20.0, -5.0, -10.0)),
        ])
        .unwrap()
    }

    #[test]
    fn weights_are_normalized_after_update() {
        let store = separated_store();
        let candidates = store.all();
        let mut filter = ParticleFilter::new(&candidates, 100, 2.0, 0.5, Some(7)).unwrap();
        filter.update(&MagneticVector::new(20.0, -5.0, 43.0));
        let total: f64 = filter.population().iter().map(|p| p.weight).sum();
        assert!((total - 1.0).abs() < 1e-9, "weights sum to {total}");
        assert!(filter.population().iter().all(|p| p.weight >= 0.0));
    }

    #[test]
    fn repeated_measurement_converges_on_the_true_location() {
        let store = separated_store();
        let candidates = store.all();
        let mut filter = ParticleFilter::new(&candidates, 200, 2.0, 0.5, Some(42)).unwrap();
        let measurement = MagneticVector::new(20.0, -5.0, 43.0);

        let mut estimate = String::new();
        for _ in 0..20 {
            estimate = filter.update(&measurement);
        }
        assert_eq!(estimate, "true_spot");

        // the true location's aggregate weight strictly dominates the rest
        let weights = filter.location_weights();
        assert_eq!(weights[0].0, "true_spot");
        for (id, w) in &weights[1..] {
            assert!(
                weights[0].1 > *w,
                "true_spot ({}) does not dominate {id} ({w})",
                weights[0].1
            );
        }
    }

    #[test]
    fn degenerate_weights_reset_to_uniform() {
        let store = separated_store();
        let candidates = store.all();
        let mut filter = ParticleFilter::new(&candidates, 50, 1.0, 0.1, Some(3)).unwrap();
        // measurement absurdly far from every fingerprint: likelihoods
        // underflow to zero across the whole population
        filter.update(&MagneticVector::new(1e9, 1e9, 1e9));
        let total: f64 = filter.population().iter().map(|p| p.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
        let uniform = 1.0 / 50.0;
        assert!(filter
            .population()
            .iter()
            .all(|p| (p.weight - uniform).abs() < 1e-12));
    }

    #[test]
    fn smoothing_suppresses_a_single_step_flicker() {
        let store = separated_store();
        let candidates = store.all();
        let mut filter = ParticleFilter::new(&candidates, 200, 2.0, 0.5, Some(11)).unwrap();
        let stable = MagneticVector::new(20.0, -5.0, 43.0);
        for _ in 0..5 {
            filter.update(&stable);
        }
        // one outlier step toward a decoy; the majority vote holds
        let estimate = filter.update(&MagneticVector::new(50.0, -5.0, 43.0));
        assert_eq!(estimate, "true_spot");
    }

    #[test]
    fn history_is_bounded() {
        let store = separated_store();
        let candidates = store.all();
        let mut filter = ParticleFilter::new(&candidates, 50, 2.0, 0.5, Some(1)).unwrap();
        for _ in 0..30 {
            filter.update(&MagneticVector::new(20.0, -5.0, 43.0));
        }
        assert!(filter.history.len() <= SMOOTHING_WINDOW);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let store = separated_store();
        let candidates = store.all();
        assert!(matches!(
            ParticleFilter::new(&candidates, 0, 1.0, 1.0, None),
            Err(CoreError::InvalidParameter { .. })
        ));
        assert!(matches!(
            ParticleFilter::new(&candidates, 10, 0.0, 1.0, None),
            Err(CoreError::InvalidParameter { .. })
        ));
        assert!(matches!(
            ParticleFilter::new(&candidates, 10, 1.0, -2.0, None),
            Err(CoreError::InvalidParameter { .. })
        ));
        assert!(matches!(
            ParticleFilter::new(&vec![], 10, 1.0, 1.0, None),
            Err(CoreError::EmptyCandidates)
        ));
    }

    #[test]
    fn population_size_is_fixed_across_updates() {
        let store = separated_store();
        let candidates = store.all();
        let mut filter = ParticleFilter::new(&candidates, 64, 2.0, 0.5, Some(9)).unwrap();
        for _ in 0..10 {
            filter.update(&MagneticVector::new(20.0, -5.0, 43.0));
            assert_eq!(filter.population().len(), 64);
        }
    }
}
