//! Periodic task driver
//!
//! A cron runs its task on a fixed interval in a single loop, so ticks of
//! the same cron never overlap. A slow tick delays the next one instead of
//! queueing a burst. Failed ticks go to the error handler and the schedule
//! continues.

use crate::error::{Error, Result};
use crate::health::HealthRegistry;
use crate::observability::{OperatorMetrics, StructuredLogger};
use crate::telemetry::TelemetrySink;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

pub type ErrorHandler = Box<dyn Fn(Error) + Send + Sync>;

/// Log a failed tick and forward it to telemetry
pub fn cron_error_handler(
    name: &'static str,
    telemetry: Arc<dyn TelemetrySink>,
    logger: StructuredLogger,
) -> ErrorHandler {
    Box::new(move |err: Error| {
        let err = err.wrap(format!("{} cron failed", name));
        logger.log_cron_failed(name, &err.to_string());
        telemetry.error(&err);
    })
}

pub struct Cron {
    name: &'static str,
    period: Duration,
    on_error: ErrorHandler,
    health: Option<HealthRegistry>,
    metrics: OperatorMetrics,
}

impl Cron {
    pub fn new(name: &'static str, period: Duration, on_error: ErrorHandler) -> Self {
        Self {
            name,
            period,
            on_error,
            health: None,
            metrics: OperatorMetrics::new(),
        }
    }

    /// Report each tick's outcome under the cron's name
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Tick until shutdown; the first tick fires immediately
    pub async fn run<F, Fut>(self, mut task: F, mut shutdown: broadcast::Receiver<()>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        info!(
            cron = self.name,
            interval_secs = self.period.as_secs(),
            "Starting cron"
        );

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once(&mut task).await;
                }
                _ = shutdown.recv() => {
                    info!(cron = self.name, "Stopping cron");
                    break;
                }
            }
        }
    }

    /// Run a single tick, returning whether it succeeded
    pub async fn run_once<F, Fut>(&self, task: &mut F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let start = Instant::now();
        let outcome = task().await;
        let elapsed = start.elapsed();
        self.metrics.observe_cron_tick(self.name, elapsed.as_secs_f64());

        if let Some(health) = &self.health {
            health.record(self.name, &outcome).await;
        }

        match outcome {
            Ok(()) => {
                debug!(cron = self.name, elapsed_ms = elapsed.as_millis(), "Cron tick complete");
                true
            }
            Err(e) => {
                self.metrics.inc_cron_failures(self.name);
                (self.on_error)(e);
                false
            }
        }
    }
}
