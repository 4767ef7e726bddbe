use anyhow::{bail, Context, Result};
use lodestar_core::common::heading_between;
use lodestar_core::fingerprint::FingerprintStore;
use lodestar_core::localization::engine::{Algorithm, LocalizationEngine};
use lodestar_core::sensor;
use lodestar_core::service::LocalizationService;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

// Single-character commands on the downstream serial link
const CMD_TARGET_REACHED: &str = "5";
const CMD_TURN_TO_HEADING: &str = "6";

struct Options {
    dataset: PathBuf,
    algorithm: Algorithm,
    start: Option<String>,
    target: Option<String>,
    window_radius: Option<f64>,
}

impl Options {
    fn parse(mut args: std::env::Args) -> Result<Options> {
        args.next(); // program name
        let mut dataset = None;
        let mut algorithm = Algorithm::Euclidean;
        let mut start = None;
        let mut target = None;
        let mut window_radius = None;

        while let Some(arg) = args.next() {
            let mut value = |name: &str| {
                args.next()
                    .with_context(|| format!("{name} needs a value"))
            };
            match arg.as_str() {
                "--algorithm" | "-a" => {
                    algorithm = value("--algorithm")?
                        .parse()
                        .map_err(|e: String| anyhow::anyhow!(e))?;
                }
                "--start" => start = Some(value("--start")?),
                "--target" => target = Some(value("--target")?),
                "--window-radius" => {
                    window_radius = Some(
                        value("--window-radius")?
                            .parse::<f64>()
                            .context("--window-radius must be a number")?,
                    );
                }
                other if other.starts_with('-') => bail!("unknown option: {other}"),
                other if dataset.is_none() => dataset = Some(PathBuf::from(other)),
                other => bail!("unexpected argument: {other}"),
            }
        }

        let Some(dataset) = dataset else {
            bail!(
                "usage: lodestar_localization_node <fingerprints.csv> \
                 [--algorithm euclidean|manhattan|weighted|knn3|particle] \
                 [--start ID] [--target ID] [--window-radius N]"
            );
        };
        Ok(Options {
            dataset,
            algorithm,
            start,
            target,
            window_radius,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let options = Options::parse(std::env::args())?;

    println!("Initializing Lodestar Localization Node...");

    let store = Arc::new(
        FingerprintStore::load_csv(&options.dataset)
            .with_context(|| format!("loading {}", options.dataset.display()))?,
    );
    println!(
        "Loaded {} reference locations, algorithm: {}",
        store.len(),
        options.algorithm.name()
    );

    let mut engine = LocalizationEngine::new(Arc::clone(&store));
    engine.set_algorithm(options.algorithm);
    if let Some(radius) = options.window_radius {
        engine.set_window_radius(radius)?;
    }
    if let Some(start) = &options.start {
        engine.set_initial_location(start)?;
    }
    engine.set_target(options.target.as_deref())?;

    // With both endpoints known, tell the robot which way to face before
    // any fingerprint updates arrive.
    if let (Some(start), Some(target)) = (&options.start, &options.target) {
        let from = store.lookup(start)?;
        let to = store.lookup(target)?;
        let heading = heading_between((from.tile_x, from.tile_y), (to.tile_x, to.tile_y));
        println!("{CMD_TURN_TO_HEADING}");
        println!("{heading}");
        println!("Angle to turn (radians): {heading}");
    }

    let (frames, readings) = mpsc::channel(64);
    let service = LocalizationService::spawn(engine, readings);
    let mut snapshots = service.snapshots();

    // Reader task: one sensor frame per stdin line. Malformed lines are
    // dropped by the framing layer; EOF closes the channel and drains the
    // pipeline.
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match sensor::parse_line(&line) {
                Some(values) => {
                    if frames.send(values).await.is_err() {
                        break;
                    }
                }
                None => log::debug!("discarding sensor line: {line:?}"),
            }
        }
    });

    // Presentation loop: announce changes, stop on arrival.
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        let Some(location) = snapshot.location else {
            continue;
        };
        if snapshot.changed {
            println!("The robot is at: {location}");
        }
        if snapshot.reached_target {
            println!("Robot has reached the target location: {location}");
            println!("{CMD_TARGET_REACHED}");
            service.stop();
            break;
        }
    }

    reader.abort();
    let _ = service.join().await;
    println!("Lodestar Localization Node shut down.");
    Ok(())
}
