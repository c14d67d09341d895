//! Fixed-cadence listing poll.
//!
//! `Poller::start` spawns one task per poll generation. The first cycle runs
//! immediately, later cycles follow a `tokio::time::interval` that skips
//! missed ticks. Cycles run one after another on that task, so a slow
//! listing delays the next tick instead of overlapping with it.

use sflog_core::{extract_records, ListingShapeError, LogSummary};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::controller::ControllerEvent;
use crate::host::{Host, StatusSlot};
use crate::process::{run_json, RunError, ShellCommand};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const LOADING_STATUS: &str = "Loading Salesforce logs...";

#[derive(Debug, Error)]
pub enum ListingError {
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Shape(#[from] ListingShapeError),
}

pub trait ListingSource: Send + Sync + 'static {
    fn list(&self) -> impl Future<Output = Result<Vec<LogSummary>, ListingError>> + Send;
}

/// Lists logs by running the listing query through the process runner.
#[derive(Debug, Clone)]
pub struct CommandListing {
    command: ShellCommand,
}

impl CommandListing {
    pub fn new(command: ShellCommand) -> Self {
        Self { command }
    }
}

impl ListingSource for CommandListing {
    async fn list(&self) -> Result<Vec<LogSummary>, ListingError> {
        let document = run_json(&self.command).await?;
        Ok(extract_records(&document)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Scheduled,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub generation: u64,
    pub sequence: u64,
    pub summaries: Vec<LogSummary>,
}

pub struct Poller<S> {
    source: Arc<S>,
    host: Arc<dyn Host>,
    interval: Duration,
}

impl<S: ListingSource> Poller<S> {
    pub fn new(source: Arc<S>, host: Arc<dyn Host>, interval: Duration) -> Self {
        Self {
            source,
            host,
            interval,
        }
    }

    pub fn start(
        &self,
        generation: u64,
        reports: mpsc::UnboundedSender<ControllerEvent>,
    ) -> PollHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(PollState::Idle);
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.source),
            Arc::clone(&self.host),
            self.interval,
            generation,
            reports,
            stop_rx,
            state_tx,
        ));
        info!(
            event = "poll_start",
            generation,
            interval_ms = self.interval.as_millis() as u64
        );
        PollHandle {
            generation,
            stop_tx,
            state_rx,
            task,
        }
    }
}

async fn poll_loop<S: ListingSource>(
    source: Arc<S>,
    host: Arc<dyn Host>,
    interval: Duration,
    generation: u64,
    reports: mpsc::UnboundedSender<ControllerEvent>,
    mut stop_rx: watch::Receiver<bool>,
    state: watch::Sender<PollState>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }
        if *stop_rx.borrow() {
            break;
        }

        state.send_replace(PollState::Polling);
        sequence += 1;
        host.set_status(StatusSlot::Listing, Some(LOADING_STATUS));
        let outcome = source.list().await;
        host.set_status(StatusSlot::Listing, None);

        match outcome {
            Ok(summaries) => {
                debug!(event = "poll_ok", generation, sequence, rows = summaries.len());
                let report = PollReport {
                    generation,
                    sequence,
                    summaries,
                };
                if reports.send(ControllerEvent::Poll(report)).is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(event = "poll_failed", generation, sequence, error = %err);
                host.show_info(&format!("Failed to retrieve Salesforce logs: {err}"));
            }
        }
        state.send_replace(PollState::Scheduled);
    }

    state.send_replace(PollState::Stopped);
    info!(event = "poll_stopped", generation, cycles = sequence);
}

/// The live recurring poll. Dropping the handle stops the poll.
#[derive(Debug)]
pub struct PollHandle {
    generation: u64,
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<PollState>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> PollState {
        *self.state_rx.borrow()
    }

    /// Prevents future ticks; an in-flight listing is left to finish.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopping(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Stop and wait for the poll task to exit.
    pub async fn join(mut self) {
        self.stop();
        if let Err(err) = (&mut self.task).await {
            warn!(event = "poll_task_join", generation = self.generation, error = %err);
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}
