use lodestar_core::common::types::MagneticVector;
use lodestar_core::fingerprint::{FingerprintRecord, FingerprintStore};
use lodestar_core::localization::engine::{Algorithm, ParticleParams, UpdateResult};
use lodestar_core::localization::LocalizationStack;
use lodestar_core::LodestarCore;
use std::collections::HashMap;
use std::sync::Arc;

fn main() {
    env_logger::init();
    println!("Initializing Lodestar Core...");

    let store = match demo_store() {
        Ok(store) => Arc::new(store),
        Err(e) => {
            println!("Failed to build demo store: {}", e);
            return;
        }
    };
    let mut core = LodestarCore::new();

    // Create a localization stack and configure the estimator
    let mut loc_stack = LocalizationStack::new(Arc::clone(&store));

    let mut params = HashMap::new();
    params.insert("window_radius".to_string(), 5.0);
    params.insert("particle_count".to_string(), 200.0);
    params.insert("sensor_noise".to_string(), 2.0);
    params.insert("motion_noise".to_string(), 0.5);

    if let Err(e) = loc_stack.configure(&params) {
        println!("Failed to configure localization stack: {}", e);
    }

    // Register components
    core.register(loc_stack);

    // Initialize the core
    match core.init() {
        Ok(_) => println!("Core initialized successfully!"),
        Err(e) => {
            println!("Failed to initialize core: {}", e);
            return;
        }
    }

    // Walk a synthetic reading through every algorithm
    let reading = [9.0, 1.0, 0.0];
    println!("Matching reading {:?} against {} locations", reading, store.len());

    for algorithm in [
        Algorithm::Euclidean,
        Algorithm::Manhattan,
        Algorithm::Weighted,
        Algorithm::Knn3,
        Algorithm::Particle,
    ] {
        if let Some(stack) = core.localization_stack_mut() {
            stack.engine_mut().set_algorithm(algorithm);
            if algorithm == Algorithm::Particle {
                stack.engine_mut().set_particle_params(ParticleParams {
                    seed: Some(7),
                    ..ParticleParams::default()
                });
            }
            match stack.update(&reading) {
                Ok(UpdateResult::Located { location, .. }) => {
                    println!("{:>10}: {}", algorithm.name(), location)
                }
                Ok(UpdateResult::Rejected) => println!("{:>10}: rejected", algorithm.name()),
                Err(e) => println!("{:>10}: error: {}", algorithm.name(), e),
            }
        }
    }

    // Run the particle filter to convergence on one location
    if let Some(stack) = core.localization_stack_mut() {
        stack.engine_mut().set_algorithm(Algorithm::Particle);
        let steady = [0.0, 10.0, 0.0];
        let mut last = String::new();
        for _ in 0..20 {
            if let Ok(UpdateResult::Located { location, .. }) = stack.update(&steady) {
                last = location;
            }
        }
        println!("Particle filter settled on: {}", last);
        if let Some(population) = stack.engine().particle_population() {
            println!("Population size: {}", population.len());
        }
    }

    // Shutdown the core
    match core.shutdown() {
        Ok(_) => println!("Core shutdown successfully!"),
        Err(e) => println!("Failed to shutdown core: {}", e),
    }
}

fn demo_store() -> Result<FingerprintStore, lodestar_core::error::CoreError> {
    let rec = |id: &str, tile: (f64, f64), mag: (f64, f64, f64)| FingerprintRecord {
        location_id: id.to_string(),
        tile_x: tile.0,
        tile_y: tile.1,
        fingerprint: MagneticVector::new(mag.0, mag.1, mag.2),
    };
    FingerprintStore::from_records(vec![
        rec("data_location_1", (0.0, 0.0), (0.0, 0.0, 0.0)),
        rec("data_location_2", (1.0, 0.0), (10.0, 0.0, 0.0)),
        rec("data_location_3", (0.0, 1.0), (0.0, 10.0, 0.0)),
        rec("data_location_4", (1.0, 1.0), (10.0, 10.0, 0.0)),
    ])
}
