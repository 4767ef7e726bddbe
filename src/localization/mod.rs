//! Localization module for the Lodestar robot
pub mod engine;
pub mod matcher;
pub mod particle;
pub mod window;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CoreError;
use crate::fingerprint::FingerprintStore;
use crate::{LifecycleNode, LifecycleNodeBase, State};

use self::engine::{Algorithm, LocalizationEngine, UpdateResult};

/// Localization stack for the robot: the fingerprint store plus the
/// sequential estimator, packaged as a lifecycle component.
pub struct LocalizationStack {
    base: LifecycleNodeBase,
    engine: LocalizationEngine,
}

impl LocalizationStack {
    /// Create a new localization stack over a loaded fingerprint store.
    pub fn new(store: Arc<FingerprintStore>) -> Self {
        LocalizationStack {
            base: LifecycleNodeBase::new("localization_stack"),
            engine: LocalizationEngine::new(store),
        }
    }

    /// Create a stack with a specific algorithm preselected.
    pub fn with_algorithm(store: Arc<FingerprintStore>, algorithm: Algorithm) -> Self {
        let mut stack = Self::new(store);
        stack.engine.set_algorithm(algorithm);
        stack
    }

    /// Run one localization step on a raw reading.
    pub fn update(&mut self, reading: &[f64]) -> Result<UpdateResult, CoreError> {
        self.engine.update(reading)
    }

    /// Configure the estimator with numeric parameters
    /// (`window_radius`, `particle_count`, `sensor_noise`, `motion_noise`).
    pub fn configure(&mut self, params: &HashMap<String, f64>) -> Result<(), CoreError> {
        self.engine.configure(params)
    }

    pub fn engine(&self) -> &LocalizationEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut LocalizationEngine {
        &mut self.engine
    }

    /// Consume the stack, handing the engine to an owner task.
    pub fn into_engine(self) -> LocalizationEngine {
        self.engine
    }

    /// Name of the active algorithm.
    pub fn algorithm_name(&self) -> &'static str {
        self.engine.algorithm().name()
    }
}

impl LifecycleNode for LocalizationStack {
    fn on_configure(&mut self) -> Result<(), String> {
        log::info!(
            "configuring localization stack ({} reference locations)",
            self.engine.store().len()
        );
        self.base.set_state(State::Inactive);
        Ok(())
    }

    fn on_activate(&mut self) -> Result<(), String> {
        log::info!("activating localization stack");
        self.base.set_state(State::Active);
        Ok(())
    }

    fn on_deactivate(&mut self) -> Result<(), String> {
        log::info!("deactivating localization stack");
        self.base.set_state(State::Inactive);
        Ok(())
    }

    fn on_cleanup(&mut self) -> Result<(), String> {
        log::info!("cleaning up localization stack");
        self.base.set_state(State::Unconfigured);
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::MagneticVector;
    use crate::fingerprint::FingerprintRecord;

    fn store() -> Arc<FingerprintStore> {
        Arc::new(
            FingerprintStore::from_records(vec![FingerprintRecord {
                location_id: "only".to_string(),
                tile_x: 0.0,
                tile_y: 0.0,
                fingerprint: MagneticVector::new(1.0, 2.0, 3.0),
            }])
            .unwrap(),
        )
    }

    #[test]
    fn stack_walks_the_lifecycle() {
        let mut stack = LocalizationStack::new(store());
        assert_eq!(stack.base.get_state(), State::Unconfigured);
        stack.on_configure().unwrap();
        stack.on_activate().unwrap();
        assert_eq!(stack.base.get_state(), State::Active);
        stack.on_deactivate().unwrap();
        stack.on_cleanup().unwrap();
        assert_eq!(stack.base.get_state(), State::Unconfigured);
    }

    #[test]
    fn with_algorithm_preselects() {
        let stack = LocalizationStack::with_algorithm(store(), Algorithm::Manhattan);
        assert_eq!(stack.algorithm_name(), "manhattan");
    }
}
