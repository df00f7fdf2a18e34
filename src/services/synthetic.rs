//! Synthetic data producer
//!
//! Publishes a graph, spectrum and map sample on every tick. It only ever
//! sees a [`Publisher`]; delivery is the dispatcher's job.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use rand::Rng;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::ProducerConfig;
use crate::error::Result;
use crate::hub::Publisher;
use crate::models::{kind, Message};

const GRAPH_POINTS: usize = 1000;
const GRAPH_AMPLITUDE: f64 = 15.0;
const GRAPH_PERIOD: f64 = 80.0;
const GRAPH_NOISE: f64 = 2.0;
const SHIFT_STEP: f64 = 0.02;

const SPECTRUM_BINS: usize = 20;
const SPECTRUM_MAX: f64 = 50.0;

/// San Francisco, jittered by up to ±0.05 degrees
const MAP_ORIGIN: (f64, f64) = (37.7749, -122.4194);
const MAP_JITTER: f64 = 0.1;

/// Periodic producer of synthetic samples
pub struct SyntheticProducer {
    publisher: Publisher,
    config: ProducerConfig,
}

impl SyntheticProducer {
    pub fn new(publisher: Publisher, config: ProducerConfig) -> Self {
        Self { publisher, config }
    }

    /// Run until shutdown or until the broadcast channel closes
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting synthetic producer (interval: {}ms)",
            self.config.interval_ms
        );

        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shift = 0.0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    shift = next_shift(shift);
                    if let Err(e) = self.publish_tick(shift).await {
                        warn!("Synthetic producer stopping: {}", e);
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Synthetic producer shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Publish one graph/spectrum/map triple
    async fn publish_tick(&self, shift: f64) -> Result<()> {
        // ThreadRng is not Send, so build the batch before awaiting
        let batch = {
            let mut rng = rand::thread_rng();
            [
                graph_sample(&mut rng, shift),
                spectrum_sample(&mut rng),
                map_sample(&mut rng),
            ]
        };

        for message in batch {
            self.publisher.publish(message).await?;
        }

        debug!(shift, "published synthetic tick");
        Ok(())
    }
}

/// Advance the phase, wrapping to keep precision over long runs
fn next_shift(shift: f64) -> f64 {
    (shift + SHIFT_STEP) % (2.0 * PI * GRAPH_PERIOD)
}

pub fn graph_sample(rng: &mut impl Rng, shift: f64) -> Message {
    Message::series(
        kind::GRAPH,
        (0..GRAPH_POINTS).map(|i| {
            rng.gen::<f64>() * GRAPH_NOISE
                + GRAPH_AMPLITUDE * (i as f64 / GRAPH_PERIOD + shift).sin()
        }),
    )
}

pub fn spectrum_sample(rng: &mut impl Rng) -> Message {
    Message::series(
        kind::SPECTRUM,
        (0..SPECTRUM_BINS).map(|_| rng.gen::<f64>() * SPECTRUM_MAX),
    )
}

pub fn map_sample(rng: &mut impl Rng) -> Message {
    let mut fields = BTreeMap::new();
    fields.insert(
        "lat".to_string(),
        MAP_ORIGIN.0 + (rng.gen::<f64>() - 0.5) * MAP_JITTER,
    );
    fields.insert(
        "lng".to_string(),
        MAP_ORIGIN.1 + (rng.gen::<f64>() - 0.5) * MAP_JITTER,
    );
    Message::fields(kind::MAP, fields)
}

/// Handle for stopping the synthetic producer
pub struct SyntheticProducerHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl SyntheticProducerHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for SyntheticProducerHandle {
    fn default() -> Self {
        Self::new().0
    }
}
