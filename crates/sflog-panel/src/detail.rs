use sflog_core::{log_file_path, InvalidLogId, LogId, ID_PLACEHOLDER};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::files::{ensure_dir, FilesystemError};
use crate::host::{Host, HostError, StatusSlot};
use crate::process::ShellCommand;
use crate::stream::{fetch_to_file, StreamError};

pub const RETRIEVING_STATUS: &str = "Retrieving full log...";

#[derive(Debug, Error)]
pub enum DetailFetchError {
    #[error(transparent)]
    InvalidId(#[from] InvalidLogId),
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Open(#[from] HostError),
}

/// Materializes one log body to `<output_dir>/<id>.log` and opens it.
pub struct DetailFetcher {
    host: Arc<dyn Host>,
    output_dir: PathBuf,
    command_template: String,
}

impl DetailFetcher {
    /// `command_template` must contain `{id}`; it is replaced by the log id.
    pub fn new(
        host: Arc<dyn Host>,
        output_dir: impl Into<PathBuf>,
        command_template: impl Into<String>,
    ) -> Self {
        Self {
            host,
            output_dir: output_dir.into(),
            command_template: command_template.into(),
        }
    }

    pub fn destination(&self, id: &LogId) -> PathBuf {
        log_file_path(&self.output_dir, id)
    }

    pub fn command_for(&self, id: &LogId) -> ShellCommand {
        ShellCommand::new(self.command_template.replace(ID_PLACEHOLDER, id.as_str()))
    }

    pub async fn fetch_and_open(&self, id: &LogId) -> Result<PathBuf, DetailFetchError> {
        ensure_dir(&self.output_dir).await?;
        let destination = self.destination(id);

        self.host
            .set_status(StatusSlot::Detail, Some(RETRIEVING_STATUS));
        let fetched = fetch_to_file(&self.command_for(id), &destination).await;
        self.host.set_status(StatusSlot::Detail, None);
        fetched?;

        info!(event = "detail_written", id = %id, path = %destination.display());
        self.host.open_file(&destination)?;
        Ok(destination)
    }
}
