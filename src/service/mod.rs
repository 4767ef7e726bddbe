//! Async reading pipeline
//!
//! The sensor collaborator pushes validated frames onto a bounded channel;
//! one consumer task owns the engine and all of its mutable state, and
//! publishes an immutable snapshot of the latest estimate after every
//! accepted reading. The presentation side only ever reads snapshots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::localization::engine::{LocalizationEngine, UpdateResult};

/// Immutable view of the latest estimate, published after each accepted
/// reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub location: Option<String>,
    pub changed: bool,
    pub reached_target: bool,
    /// Count of accepted readings so far
    pub step: u64,
}

impl Snapshot {
    fn initial() -> Self {
        Snapshot {
            location: None,
            changed: false,
            reached_target: false,
            step: 0,
        }
    }
}

/// Handle to the running consumer task.
pub struct LocalizationService {
    snapshots: watch::Receiver<Snapshot>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<LocalizationEngine>,
}

impl LocalizationService {
    /// Spawn the consumer task. It runs until the reading channel closes
    /// or the stop flag is raised, then hands the engine back via
    /// [`join`](Self::join).
    pub fn spawn(
        mut engine: LocalizationEngine,
        mut readings: mpsc::Receiver<Vec<f64>>,
    ) -> Self {
        let (publisher, snapshots) = watch::channel(Snapshot::initial());
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = tokio::spawn(async move {
            let mut step: u64 = 0;
            while let Some(reading) = readings.recv().await {
                // cooperative cancellation, checked once per cycle
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                match engine.update(&reading) {
                    Ok(UpdateResult::Located {
                        location,
                        changed,
                        reached_target,
                    }) => {
                        step += 1;
                        // receivers may be gone during shutdown
                        let _ = publisher.send(Snapshot {
                            location: Some(location),
                            changed,
                            reached_target,
                            step,
                        });
                    }
                    Ok(UpdateResult::Rejected) => {
                        debug!("dropped malformed reading");
                    }
                    Err(err) => {
                        error!("localization step failed: {err}");
                    }
                }
            }
            engine
        });

        LocalizationService {
            snapshots,
            stop,
            handle,
        }
    }

    /// A fresh subscription to estimate snapshots.
    pub fn snapshots(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Raise the stop flag; the consumer exits on its next cycle.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Wait for the consumer to finish and recover the engine.
    pub async fn join(self) -> Result<LocalizationEngine, JoinError> {
        self.handle.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::MagneticVector;
    use crate::fingerprint::{FingerprintRecord, FingerprintStore};

    fn store_abc() -> Arc<FingerprintStore> {
        let rec = |id: &str, tile: (f64, f64), mag: (f64, f64, f64)| FingerprintRecord {
            location_id: id.to_string(),
            tile_x: tile.0,
            tile_y: tile.1,
            fingerprint: MagneticVector::new(mag.0, mag.1, mag.2),
        };
        Arc::new(
            FingerprintStore::from_records(vec![
                rec("A", (0.0, 0.0), (0.0, 0.0, 0.0)),
                rec("B", (1.0, 0.0), (10.0, 0.0, 0.0)),
                rec("C", (0.0, 1.0), (0.0, 10.0, 0.0)),
            ])
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn publishes_snapshots_for_accepted_readings() {
        let (tx, rx) = mpsc::channel(16);
        let service = LocalizationService::spawn(LocalizationEngine::new(store_abc()), rx);
        let mut snaps = service.snapshots();

        tx.send(vec![9.0, 1.0, 0.0]).await.unwrap();
        snaps.changed().await.unwrap();
        {
            let snap = snaps.borrow_and_update();
            assert_eq!(snap.location.as_deref(), Some("B"));
            assert!(snap.changed);
            assert_eq!(snap.step, 1);
        }

        // a malformed frame publishes nothing; the next good one does
        tx.send(vec![f64::NAN, 0.0, 0.0]).await.unwrap();
        tx.send(vec![0.0, 0.0, 0.0]).await.unwrap();
        snaps.changed().await.unwrap();
        {
            let snap = snaps.borrow_and_update();
            assert_eq!(snap.location.as_deref(), Some("A"));
            assert_eq!(snap.step, 2);
        }

        drop(tx);
        let engine = service.join().await.unwrap();
        assert_eq!(engine.previous_location(), Some("A"));
    }

    #[tokio::test]
    async fn target_arrival_shows_up_in_the_snapshot() {
        let (tx, rx) = mpsc::channel(4);
        let mut engine = LocalizationEngine::new(store_abc());
        engine.set_target(Some("C")).unwrap();
        let service = LocalizationService::spawn(engine, rx);
        let mut snaps = service.snapshots();

        tx.send(vec![0.0, 9.5, 0.0]).await.unwrap();
        snaps.changed().await.unwrap();
        let snap = snaps.borrow_and_update().clone();
        assert_eq!(snap.location.as_deref(), Some("C"));
        assert!(snap.reached_target);

        drop(tx);
        service.join().await.unwrap();
    }

    #[tokio::test]
    async fn stop_flag_halts_the_consumer_without_processing() {
        let (tx, rx) = mpsc::channel(4);
        let service = LocalizationService::spawn(LocalizationEngine::new(store_abc()), rx);

        service.stop();
        tx.send(vec![0.0, 0.0, 0.0]).await.unwrap();
        let engine = service.join().await.unwrap();
        // the reading arrived after the flag was raised and was not applied
        assert_eq!(engine.previous_location(), None);
    }

    #[tokio::test]
    async fn channel_close_is_a_clean_shutdown() {
        let (tx, rx) = mpsc::channel::<Vec<f64>>(4);
        let service = LocalizationService::spawn(LocalizationEngine::new(store_abc()), rx);
        drop(tx);
        assert!(service.join().await.is_ok());
    }
}
