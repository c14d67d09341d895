//! The seam between the orchestration core and whatever displays the panel.
//!
//! A `Host` creates panel surfaces, opens files and shows transient
//! status/notifications. Panels report user activity back through
//! `PanelEvents`, which carries the id of the panel it was issued for so
//! stale events from a disposed panel can be told apart.

use sflog_core::PanelMessage;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::controller::ControllerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PanelId(pub u64);

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panel-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelEvent {
    Message(PanelMessage),
    Closed,
}

/// Sender half handed to a host when its panel is created.
#[derive(Debug, Clone)]
pub struct PanelEvents {
    panel: PanelId,
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl PanelEvents {
    pub(crate) fn new(panel: PanelId, tx: mpsc::UnboundedSender<ControllerEvent>) -> Self {
        Self { panel, tx }
    }

    pub fn panel_id(&self) -> PanelId {
        self.panel
    }

    /// Returns false once the controller has shut down.
    pub fn message(&self, message: PanelMessage) -> bool {
        self.send(PanelEvent::Message(message))
    }

    pub fn closed(&self) -> bool {
        self.send(PanelEvent::Closed)
    }

    fn send(&self, event: PanelEvent) -> bool {
        self.tx
            .send(ControllerEvent::Panel {
                panel: self.panel,
                event,
            })
            .is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusSlot {
    Listing,
    Detail,
}

/// A live display surface. Dropping it disposes the panel.
pub trait PanelSurface: Send {
    fn set_html(&mut self, html: &str);
    fn reveal(&mut self);
}

pub trait Host: Send + Sync {
    fn create_panel(&self, events: PanelEvents) -> Result<Box<dyn PanelSurface>, HostError>;
    fn open_file(&self, path: &Path) -> Result<(), HostError>;
    fn set_status(&self, slot: StatusSlot, message: Option<&str>);
    fn show_info(&self, message: &str);
    fn show_error(&self, message: &str);
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to create panel: {message}")]
    Panel { message: String },
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
