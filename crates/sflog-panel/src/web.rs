//! Browser-backed `Host`.
//!
//! The shell page served at `/` hosts the rendered panel document in an
//! iframe and relays anything the document posts to `window.parent` over
//! `/ws`. One panel is live at a time; every websocket attached to it gets the
//! current document on connect and each replacement after that. When the last
//! socket of the live panel goes away the controller is told the panel closed.

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, ConnectInfo, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Router,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use sflog_core::PanelMessage;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::controller::ControllerHandle;
use crate::host::{Host, HostError, PanelEvents, PanelId, PanelSurface, StatusSlot};

const SHELL_PAGE: &str = include_str!("../assets/shell.html");
const FRAME_BUFFER: usize = 64;
const STATUS_SEPARATOR: &str = " | ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Server-to-page frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageFrame {
    Html { html: String },
    Reveal,
    Status { text: Option<String> },
    Notice { level: NoticeLevel, text: String },
    Detached,
}

#[derive(Debug, Clone)]
pub struct WebHostConfig {
    /// Address the shell page is reachable at, used for browser launch.
    pub url: String,
    /// Program (plus leading args) used to open files and the panel url.
    pub opener: String,
    pub open_browser: bool,
}

#[derive(Clone)]
pub struct WebHost {
    shared: Arc<Shared>,
}

struct Shared {
    config: WebHostConfig,
    frames: broadcast::Sender<PageFrame>,
    active: Mutex<Option<ActivePanel>>,
    statuses: Mutex<BTreeMap<StatusSlot, String>>,
}

struct ActivePanel {
    id: PanelId,
    events: PanelEvents,
    html: watch::Receiver<String>,
    connections: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WebHost {
    pub fn new(config: WebHostConfig) -> Self {
        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        Self {
            shared: Arc::new(Shared {
                config,
                frames,
                active: Mutex::new(None),
                statuses: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn active_panel(&self) -> Option<PanelId> {
        lock(&self.shared.active).as_ref().map(|panel| panel.id)
    }

    pub fn current_html(&self) -> Option<String> {
        lock(&self.shared.active)
            .as_ref()
            .map(|panel| panel.html.borrow().clone())
    }

    pub fn connections(&self) -> usize {
        lock(&self.shared.active)
            .as_ref()
            .map(|panel| panel.connections)
            .unwrap_or(0)
    }

    pub fn status_text(&self) -> Option<String> {
        let statuses = lock(&self.shared.statuses);
        if statuses.is_empty() {
            return None;
        }
        let parts: Vec<&str> = statuses.values().map(String::as_str).collect();
        Some(parts.join(STATUS_SEPARATOR))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PageFrame> {
        self.shared.frames.subscribe()
    }

    fn broadcast(&self, frame: PageFrame) {
        // No receivers just means no page is connected.
        let _ = self.shared.frames.send(frame);
    }

    fn open_browser(&self) {
        let url = &self.shared.config.url;
        match launch(&self.shared.config.opener, OsStr::new(url)) {
            Ok(()) => info!(event = "browser_opened", url = %url),
            Err(err) => warn!(event = "browser_open_failed", url = %url, error = %err),
        }
    }

    fn attach(&self) -> Option<(PanelId, PanelEvents, watch::Receiver<String>)> {
        let mut active = lock(&self.shared.active);
        let panel = active.as_mut()?;
        panel.connections += 1;
        Some((panel.id, panel.events.clone(), panel.html.clone()))
    }

    /// Returns the events sender when `panel` just lost its last socket.
    fn detach(&self, panel: PanelId) -> Option<PanelEvents> {
        let mut active = lock(&self.shared.active);
        let state = active.as_mut().filter(|state| state.id == panel)?;
        state.connections = state.connections.saturating_sub(1);
        (state.connections == 0).then(|| state.events.clone())
    }
}

impl Host for WebHost {
    fn create_panel(&self, events: PanelEvents) -> Result<Box<dyn PanelSurface>, HostError> {
        let id = events.panel_id();
        let (html_tx, html_rx) = watch::channel(String::new());
        let replaced = lock(&self.shared.active).replace(ActivePanel {
            id,
            events,
            html: html_rx,
            connections: 0,
        });
        if let Some(previous) = replaced {
            warn!(event = "panel_replaced", previous = %previous.id, panel = %id);
        }
        debug!(event = "web_panel_created", panel = %id);
        if self.shared.config.open_browser {
            self.open_browser();
        }
        Ok(Box::new(WebSurface {
            host: self.clone(),
            id,
            html: html_tx,
        }))
    }

    fn open_file(&self, path: &Path) -> Result<(), HostError> {
        launch(&self.shared.config.opener, path.as_os_str()).map_err(|source| HostError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        info!(event = "file_opened", path = %path.display());
        Ok(())
    }

    fn set_status(&self, slot: StatusSlot, message: Option<&str>) {
        {
            let mut statuses = lock(&self.shared.statuses);
            match message {
                Some(text) => statuses.insert(slot, text.to_string()),
                None => statuses.remove(&slot),
            };
        }
        self.broadcast(PageFrame::Status {
            text: self.status_text(),
        });
    }

    fn show_info(&self, message: &str) {
        info!(event = "notice", level = "info", text = %message);
        self.broadcast(PageFrame::Notice {
            level: NoticeLevel::Info,
            text: message.to_string(),
        });
    }

    fn show_error(&self, message: &str) {
        warn!(event = "notice", level = "error", text = %message);
        self.broadcast(PageFrame::Notice {
            level: NoticeLevel::Error,
            text: message.to_string(),
        });
    }
}

struct WebSurface {
    host: WebHost,
    id: PanelId,
    html: watch::Sender<String>,
}

impl PanelSurface for WebSurface {
    fn set_html(&mut self, html: &str) {
        self.html.send_if_modified(|current| {
            if current.as_str() == html {
                return false;
            }
            html.clone_into(current);
            true
        });
    }

    fn reveal(&mut self) {
        if self.host.connections() == 0 && self.host.shared.config.open_browser {
            self.host.open_browser();
        }
        self.host.broadcast(PageFrame::Reveal);
    }
}

impl Drop for WebSurface {
    fn drop(&mut self) {
        let mut active = lock(&self.host.shared.active);
        if active.as_ref().is_some_and(|panel| panel.id == self.id) {
            *active = None;
        }
        debug!(event = "web_panel_disposed", panel = %self.id);
    }
}

/// Spawn `opener target` without waiting for it to finish.
fn launch(opener: &str, target: &OsStr) -> io::Result<()> {
    let mut parts = opener.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no opener configured"))?;
    let mut child = tokio::process::Command::new(program)
        .args(parts)
        .arg(target)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    let program = program.to_string();
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    warn!(event = "opener_exit", program = %program, code = ?status.code());
                }
                Ok(_) => {}
                Err(err) => warn!(event = "opener_wait", program = %program, error = %err),
            }
        });
    }
    Ok(())
}

#[derive(Clone)]
struct AppState {
    host: WebHost,
    controller: ControllerHandle,
}

pub fn router(host: WebHost, controller: ControllerHandle) -> Router {
    Router::new()
        .route("/", get(shell_page))
        .route("/ws", get(ws_handler))
        .route("/commands/show-logs", post(show_logs))
        .route("/health", get(|| async { "ok" }))
        .with_state(AppState { host, controller })
}

async fn shell_page() -> Html<&'static str> {
    Html(SHELL_PAGE)
}

async fn show_logs(State(state): State<AppState>) -> StatusCode {
    if state.controller.show_logs() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    if !addr.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| async move {
        handle_socket(state.host, socket, addr).await;
    })
}

async fn handle_socket(host: WebHost, socket: WebSocket, addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();
    let mut frames = host.subscribe();

    let Some((panel, events, mut html)) = host.attach() else {
        debug!(event = "ws_detached", peer = %addr);
        let _ = send_frame(&mut sender, &PageFrame::Detached).await;
        let _ = sender.close().await;
        return;
    };
    info!(event = "ws_attached", panel = %panel, peer = %addr);

    let initial = PageFrame::Html {
        html: html.borrow_and_update().clone(),
    };
    let status = PageFrame::Status {
        text: host.status_text(),
    };
    let mut open = send_frame(&mut sender, &initial).await && send_frame(&mut sender, &status).await;

    while open {
        tokio::select! {
            incoming = receiver.next() => {
                let data = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        warn!(event = "ws_read_error", panel = %panel, error = %err);
                        break;
                    }
                };
                match PanelMessage::decode(&data) {
                    Ok(message) => {
                        debug!(event = "panel_message", panel = %panel, payload = ?message);
                        if !events.message(message) {
                            break;
                        }
                    }
                    Err(err) => warn!(event = "panel_message_invalid", panel = %panel, error = %err),
                }
            }
            changed = html.changed() => {
                if changed.is_err() {
                    let _ = send_frame(&mut sender, &PageFrame::Detached).await;
                    break;
                }
                let frame = PageFrame::Html { html: html.borrow_and_update().clone() };
                open = send_frame(&mut sender, &frame).await;
            }
            frame = frames.recv() => {
                match frame {
                    Ok(frame) => open = send_frame(&mut sender, &frame).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(event = "ws_frames_lagged", panel = %panel, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    info!(event = "ws_closed", panel = %panel, peer = %addr);
    if let Some(events) = host.detach(panel) {
        events.closed();
    }
}

async fn send_frame<S>(sender: &mut S, frame: &PageFrame) -> bool
where
    S: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(err) => {
            warn!(event = "frame_encode_failed", error = %err);
            return true;
        }
    };
    sender.send(Message::Text(text)).await.is_ok()
}
