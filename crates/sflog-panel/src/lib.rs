//! Live Salesforce debug-log panel.
//!
//! A recurring poll lists recent logs through the `sfdx` CLI and renders
//! them into a single panel. Selecting a row streams the full log into the
//! output directory and opens it. `controller` owns the panel; `host` is the
//! seam to whatever displays it, with `web` serving it to a browser.

pub mod config;
pub mod controller;
pub mod detail;
pub mod files;
pub mod host;
pub mod poller;
pub mod process;
pub mod stream;
pub mod web;

pub use controller::{ControllerEvent, ControllerHandle, PanelController};
pub use host::{Host, HostError, PanelEvent, PanelEvents, PanelId, PanelSurface, StatusSlot};
