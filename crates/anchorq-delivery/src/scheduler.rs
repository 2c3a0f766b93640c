//! Periodic scheduling of processing passes with graceful shutdown.

use std::{sync::Arc, time::Duration};

use anchorq_core::Clock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{error::Result, processor::QueueProcessor};

/// Configuration for the processing schedule.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between the end of one pass and the start of the next.
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { poll_interval: crate::DEFAULT_POLL_INTERVAL }
    }
}

/// Runs the queue processor on a fixed interval until shutdown.
///
/// The loop sleeps between passes rather than on a fixed tick, so a slow
/// pass simply delays the next one instead of stacking up. Cancellation is
/// checked during the sleep, so shutdown never waits out a full interval.
pub struct ProcessorScheduler {
    processor: Arc<QueueProcessor>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    cancellation_token: CancellationToken,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl ProcessorScheduler {
    /// Creates a new scheduler.
    pub fn new(
        processor: Arc<QueueProcessor>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            processor,
            clock,
            config,
            cancellation_token: CancellationToken::new(),
            handle: None,
        }
    }

    /// Starts the scheduling loop in a background task.
    pub fn start(&mut self) {
        let processor = self.processor.clone();
        let clock = self.clock.clone();
        let poll_interval = self.config.poll_interval;
        let token = self.cancellation_token.clone();

        info!(poll_interval_secs = poll_interval.as_secs(), "starting queue scheduler");

        self.handle = Some(tokio::spawn(async move {
            loop {
                processor.run().await;

                tokio::select! {
                    () = token.cancelled() => {
                        info!("queue scheduler stopping");
                        break;
                    }
                    () = clock.sleep(poll_interval) => {}
                }
            }
        }));
    }

    /// Signals the loop to stop and waits for the in-progress pass.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if the background task panicked.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancellation_token.cancel();

        if let Some(handle) = self.handle.take() {
            handle.await.map_err(|e| {
                error!(error = %e, "scheduler task join failed");
                crate::error::DeliveryError::storage(format!("scheduler task panicked: {e}"))
            })?;
        }

        Ok(())
    }

    /// Token observed by the scheduling loop, for wiring into signal
    /// handling.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }
}
