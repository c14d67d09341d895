#![allow(dead_code)]

use sflog_core::LogSummary;
use sflog_panel::poller::{ListingError, ListingSource};
use sflog_panel::{Host, HostError, PanelEvents, PanelId, PanelSurface, StatusSlot};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default, Clone)]
pub struct Recorded {
    pub created: Vec<PanelId>,
    pub disposed: Vec<PanelId>,
    pub html: Vec<(PanelId, String)>,
    pub reveals: Vec<PanelId>,
    pub opened: Vec<PathBuf>,
    pub infos: Vec<String>,
    pub errors: Vec<String>,
    pub statuses: Vec<(StatusSlot, Option<String>)>,
}

/// Host double that records every call and keeps each panel's event sender.
#[derive(Default)]
pub struct RecordingHost {
    state: Arc<Mutex<Recorded>>,
    events: Mutex<Vec<PanelEvents>>,
    fail_create: AtomicBool,
    fail_open: AtomicBool,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> Recorded {
        self.state.lock().unwrap().clone()
    }

    pub fn last_html(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .html
            .last()
            .map(|(_, html)| html.clone())
    }

    pub fn events_for(&self, panel: PanelId) -> PanelEvents {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|events| events.panel_id() == panel)
            .cloned()
            .expect("panel was created")
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }
}

impl Host for RecordingHost {
    fn create_panel(&self, events: PanelEvents) -> Result<Box<dyn PanelSurface>, HostError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(HostError::Panel {
                message: "no display".to_string(),
            });
        }
        let id = events.panel_id();
        self.state.lock().unwrap().created.push(id);
        self.events.lock().unwrap().push(events);
        Ok(Box::new(RecordingSurface {
            id,
            state: Arc::clone(&self.state),
        }))
    }

    fn open_file(&self, path: &Path) -> Result<(), HostError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(HostError::Open {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no editor"),
            });
        }
        self.state.lock().unwrap().opened.push(path.to_path_buf());
        Ok(())
    }

    fn set_status(&self, slot: StatusSlot, message: Option<&str>) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .push((slot, message.map(str::to_string)));
    }

    fn show_info(&self, message: &str) {
        self.state.lock().unwrap().infos.push(message.to_string());
    }

    fn show_error(&self, message: &str) {
        self.state.lock().unwrap().errors.push(message.to_string());
    }
}

struct RecordingSurface {
    id: PanelId,
    state: Arc<Mutex<Recorded>>,
}

impl PanelSurface for RecordingSurface {
    fn set_html(&mut self, html: &str) {
        self.state
            .lock()
            .unwrap()
            .html
            .push((self.id, html.to_string()));
    }

    fn reveal(&mut self) {
        self.state.lock().unwrap().reveals.push(self.id);
    }
}

impl Drop for RecordingSurface {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.disposed.push(self.id);
        }
    }
}

/// Listing double: serves scripted results in order, then empty listings.
#[derive(Default)]
pub struct ScriptedListing {
    script: Mutex<VecDeque<Result<Vec<LogSummary>, ListingError>>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl ScriptedListing {
    pub fn new(results: Vec<Result<Vec<LogSummary>, ListingError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(results.into()),
            ..Self::default()
        })
    }

    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ListingSource for ScriptedListing {
    async fn list(&self) -> Result<Vec<LogSummary>, ListingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        let next = self.script.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        next.unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub fn summary(id: &str) -> LogSummary {
    LogSummary {
        id: id.to_string(),
        application: "Unknown".to_string(),
        operation: "/apex/Page".to_string(),
        start_time: "2024-01-01T00:00:00.000+0000".to_string(),
        status: "Success".to_string(),
        log_user: Some(sflog_core::LogUser {
            name: "Ann".to_string(),
        }),
        length: "1024".to_string(),
    }
}

/// Write an executable `sh` script and return a command line that runs it.
pub fn script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    format!("sh '{}'", path.display())
}
