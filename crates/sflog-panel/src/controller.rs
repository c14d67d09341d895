//! Panel Controller: owns the single panel and the poll that feeds it.
//!
//! The controller is an actor. Hosts, the poller and detail fetches all talk
//! to it through one unbounded channel, and `run` drains that channel on a
//! single task, so panel state and the poll handle are only ever touched
//! from there.

use sflog_core::{LogId, LogSummary, PanelMessage, PanelTemplate};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::detail::{DetailFetchError, DetailFetcher};
use crate::host::{Host, PanelEvent, PanelEvents, PanelId, PanelSurface};
use crate::poller::{ListingSource, PollHandle, PollReport, PollState, Poller};

#[derive(Debug)]
pub enum ControllerEvent {
    /// The user command: show the panel and make sure the poll is running.
    ShowLogs,
    Poll(PollReport),
    Panel {
        panel: PanelId,
        event: PanelEvent,
    },
    FetchFinished {
        id: LogId,
        outcome: Result<PathBuf, DetailFetchError>,
    },
    Shutdown,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("no panel is open")]
    NoPanel,
}

/// Cloneable entry point into a running controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl ControllerHandle {
    pub fn show_logs(&self) -> bool {
        self.tx.send(ControllerEvent::ShowLogs).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.tx.send(ControllerEvent::Shutdown).is_ok()
    }
}

struct PanelState {
    id: PanelId,
    surface: Box<dyn PanelSurface>,
    rendered: Vec<LogSummary>,
    last_sequence: Option<u64>,
}

pub struct PanelController<S> {
    host: Arc<dyn Host>,
    template: PanelTemplate,
    poller: Poller<S>,
    detail: Arc<DetailFetcher>,
    tx: mpsc::UnboundedSender<ControllerEvent>,
    inbox: mpsc::UnboundedReceiver<ControllerEvent>,
    panel: Option<PanelState>,
    poll: Option<PollHandle>,
    /// Fetches in flight. Outlives the panel: a fetch started before a close
    /// still blocks a second fetch of the same id after a reopen.
    pending: HashSet<LogId>,
    next_panel: u64,
    next_generation: u64,
}

impl<S: ListingSource> PanelController<S> {
    pub fn new(
        host: Arc<dyn Host>,
        template: PanelTemplate,
        poller: Poller<S>,
        detail: DetailFetcher,
    ) -> (Self, ControllerHandle) {
        let (tx, inbox) = mpsc::unbounded_channel();
        let handle = ControllerHandle { tx: tx.clone() };
        let controller = Self {
            host,
            template,
            poller,
            detail: Arc::new(detail),
            tx,
            inbox,
            panel: None,
            poll: None,
            pending: HashSet::new(),
            next_panel: 1,
            next_generation: 1,
        };
        (controller, handle)
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            tx: self.tx.clone(),
        }
    }

    pub async fn run(mut self) {
        while self.step().await {}
        info!(event = "controller_stopped");
    }

    /// Wait for and handle one event. Returns false after shutdown.
    pub async fn step(&mut self) -> bool {
        match self.inbox.recv().await {
            Some(event) => self.handle_event(event),
            None => false,
        }
    }

    pub fn handle_event(&mut self, event: ControllerEvent) -> bool {
        match event {
            ControllerEvent::ShowLogs => self.show_logs(),
            ControllerEvent::Poll(report) => self.apply_report(report),
            ControllerEvent::Panel { panel, event } => self.apply_panel_event(panel, event),
            ControllerEvent::FetchFinished { id, outcome } => self.finish_fetch(id, outcome),
            ControllerEvent::Shutdown => {
                self.close_panel();
                return false;
            }
        }
        true
    }

    pub fn panel_id(&self) -> Option<PanelId> {
        self.panel.as_ref().map(|panel| panel.id)
    }

    pub fn is_visible(&self) -> bool {
        self.panel.is_some()
    }

    pub fn rendered(&self) -> &[LogSummary] {
        self.panel
            .as_ref()
            .map(|panel| panel.rendered.as_slice())
            .unwrap_or_default()
    }

    pub fn poll_state(&self) -> Option<PollState> {
        self.poll.as_ref().map(PollHandle::state)
    }

    pub fn pending_fetches(&self) -> usize {
        self.pending.len()
    }

    pub fn show_logs(&mut self) {
        if let Err(err) = self.ensure_visible() {
            warn!(event = "panel_create_failed", error = %err);
            self.host
                .show_error(&format!("Failed to open the log panel: {err}"));
            return;
        }
        if self.poll.is_none() {
            let generation = self.next_generation;
            self.next_generation += 1;
            self.poll = Some(self.poller.start(generation, self.tx.clone()));
        }
    }

    /// Create the panel on first use, otherwise bring it to front.
    pub fn ensure_visible(&mut self) -> Result<PanelId, crate::host::HostError> {
        if let Some(panel) = self.panel.as_mut() {
            panel.surface.reveal();
            return Ok(panel.id);
        }

        let id = PanelId(self.next_panel);
        self.next_panel += 1;
        let mut surface = self
            .host
            .create_panel(PanelEvents::new(id, self.tx.clone()))?;
        surface.set_html(&self.template.render(&[]));
        info!(event = "panel_created", panel = %id);
        self.panel = Some(PanelState {
            id,
            surface,
            rendered: Vec::new(),
            last_sequence: None,
        });
        Ok(id)
    }

    /// Replace the panel content with `summaries`, in the order given.
    pub fn render(&mut self, summaries: Vec<LogSummary>) -> Result<(), RenderError> {
        let panel = self.panel.as_mut().ok_or(RenderError::NoPanel)?;
        let html = self.template.render(&summaries);
        panel.surface.set_html(&html);
        panel.rendered = summaries;
        Ok(())
    }

    fn apply_report(&mut self, report: PollReport) {
        let live_generation = self.poll.as_ref().map(PollHandle::generation);
        if live_generation != Some(report.generation) {
            debug!(
                event = "poll_report_discarded",
                generation = report.generation,
                reason = "stopped"
            );
            return;
        }
        let Some(panel) = self.panel.as_ref() else {
            return;
        };
        if panel
            .last_sequence
            .is_some_and(|last| report.sequence <= last)
        {
            debug!(
                event = "poll_report_discarded",
                sequence = report.sequence,
                reason = "stale"
            );
            return;
        }

        let rows = report.summaries.len();
        if self.render(report.summaries).is_ok() {
            if let Some(panel) = self.panel.as_mut() {
                panel.last_sequence = Some(report.sequence);
            }
            debug!(event = "panel_rendered", sequence = report.sequence, rows);
        }
    }

    fn apply_panel_event(&mut self, panel: PanelId, event: PanelEvent) {
        if self.panel_id() != Some(panel) {
            debug!(event = "panel_event_ignored", panel = %panel);
            return;
        }
        match event {
            PanelEvent::Message(PanelMessage::CallFunction { id }) => self.request_detail(id),
            PanelEvent::Closed => self.close_panel(),
        }
    }

    fn request_detail(&mut self, raw_id: String) {
        let id = match LogId::parse(&raw_id) {
            Ok(id) => id,
            Err(err) => {
                warn!(event = "detail_failed", id = %raw_id, error = %err);
                self.report_fetch_error(&DetailFetchError::from(err));
                return;
            }
        };
        if !self.pending.insert(id.clone()) {
            debug!(event = "detail_already_pending", id = %id);
            return;
        }
        info!(event = "detail_requested", id = %id);

        let detail = Arc::clone(&self.detail);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let outcome = detail.fetch_and_open(&id).await;
            let _ = tx.send(ControllerEvent::FetchFinished { id, outcome });
        });
    }

    fn finish_fetch(&mut self, id: LogId, outcome: Result<PathBuf, DetailFetchError>) {
        self.pending.remove(&id);
        match outcome {
            Ok(path) => debug!(event = "detail_opened", id = %id, path = %path.display()),
            Err(err) => {
                warn!(event = "detail_failed", id = %id, error = %err);
                self.report_fetch_error(&err);
            }
        }
    }

    fn report_fetch_error(&self, err: &DetailFetchError) {
        self.host
            .show_error(&format!("Failed to retrieve full log: {err}"));
    }

    fn close_panel(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.stop();
        }
        if let Some(panel) = self.panel.take() {
            info!(
                event = "panel_closed",
                panel = %panel.id,
                pending = self.pending.len()
            );
        }
    }
}
