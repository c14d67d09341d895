//! Streams the body of a detail-retrieval command into a file.
//!
//! Stdout is fed into an incremental document reader: each complete document is
//! shape-checked and its `result[0].log` text is appended to the destination
//! as soon as it arrives. A document split across reads simply waits for the
//! rest of its bytes. A complete document of the wrong shape aborts the fetch
//! without waiting for the process to exit.

use serde_json::Value;
use sflog_core::extract_log_body;
use std::io;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::ChildStderr;
use tracing::{debug, warn};

use crate::files::FilesystemError;
use crate::process::{ProcessError, ShellCommand};

const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("unexpected response format: {detail}")]
    UnexpectedFormat { detail: String },
    #[error("command failed with {}", exit_label(.code))]
    ProcessExit { code: Option<i32> },
    #[error("failed reading command output: {source}")]
    Read {
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

/// Tracks where the current top-level document ends without parsing it.
#[derive(Debug, Default, Clone, Copy)]
struct Frame {
    depth: usize,
    in_string: bool,
    escaped: bool,
}

/// Accumulates stdout bytes and yields log bodies for complete documents.
///
/// Each byte is scanned once. A document is handed to serde only after its
/// outermost bracket closes.
#[derive(Debug, Default)]
pub struct PayloadReader {
    buffer: Vec<u8>,
    scanned: usize,
    frame: Frame,
    documents: usize,
}

impl PayloadReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> usize {
        self.documents
    }

    /// Bytes held for the document that has not closed yet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, StreamError> {
        self.buffer.extend_from_slice(chunk);
        let mut bodies = Vec::new();
        let mut start = 0;

        for index in self.scanned..self.buffer.len() {
            let byte = self.buffer[index];
            let frame = &mut self.frame;
            if frame.depth == 0 {
                match byte {
                    b'{' | b'[' => {
                        start = index;
                        frame.depth = 1;
                    }
                    b if b.is_ascii_whitespace() => start = index + 1,
                    _ => {
                        return Err(StreamError::UnexpectedFormat {
                            detail: format!(
                                "expected a JSON document, found {:?}",
                                char::from(byte)
                            ),
                        });
                    }
                }
                continue;
            }
            if frame.in_string {
                if frame.escaped {
                    frame.escaped = false;
                } else if byte == b'\\' {
                    frame.escaped = true;
                } else if byte == b'"' {
                    frame.in_string = false;
                }
                continue;
            }
            match byte {
                b'"' => frame.in_string = true,
                b'{' | b'[' => frame.depth += 1,
                b'}' | b']' => {
                    frame.depth -= 1;
                    if frame.depth == 0 {
                        bodies.push(decode_document(&self.buffer[start..=index])?);
                        start = index + 1;
                    }
                }
                _ => {}
            }
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        self.documents += bodies.len();
        Ok(bodies)
    }

    /// Anything but whitespace left over is a truncated document.
    pub fn finish(&self) -> Result<(), StreamError> {
        if self.buffer.iter().any(|b| !b.is_ascii_whitespace()) {
            return Err(StreamError::UnexpectedFormat {
                detail: format!(
                    "output ended inside a document ({} trailing bytes)",
                    self.buffer.len()
                ),
            });
        }
        Ok(())
    }
}

fn decode_document(bytes: &[u8]) -> Result<String, StreamError> {
    let document: Value =
        serde_json::from_slice(bytes).map_err(|err| StreamError::UnexpectedFormat {
            detail: err.to_string(),
        })?;
    extract_log_body(&document)
        .map(str::to_string)
        .ok_or_else(|| StreamError::UnexpectedFormat {
            detail: "expected result[0].log in response".to_string(),
        })
}

/// Run `command` and write every log body it streams into `destination`,
/// replacing any previous content.
pub async fn fetch_to_file(command: &ShellCommand, destination: &Path) -> Result<(), StreamError> {
    let mut file = tokio::fs::File::create(destination)
        .await
        .map_err(|source| FilesystemError::WriteFile {
            path: destination.to_path_buf(),
            source,
        })?;

    let mut child = command
        .to_command()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            command: command.line().to_string(),
            source,
        })?;

    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(log_stderr(stderr, command.line().to_string())));

    let mut stdout = child.stdout.take().ok_or_else(|| ProcessError::Spawn {
        command: command.line().to_string(),
        source: io::Error::other("stdout was not captured"),
    })?;

    let mut reader = PayloadReader::new();
    let streamed = pump(&mut stdout, &mut reader, &mut file, destination).await;
    if let Err(err) = streamed {
        let _ = child.kill().await;
        return Err(err);
    }

    file.flush()
        .await
        .map_err(|source| FilesystemError::WriteFile {
            path: destination.to_path_buf(),
            source,
        })?;

    let status = child.wait().await.map_err(|source| ProcessError::Wait {
        command: command.line().to_string(),
        source,
    })?;
    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    debug!(
        event = "detail_stream_finished",
        command = %command.line(),
        documents = reader.documents(),
        code = ?status.code()
    );

    if !status.success() {
        return Err(StreamError::ProcessExit {
            code: status.code(),
        });
    }
    Ok(())
}

async fn pump<R>(
    stdout: &mut R,
    reader: &mut PayloadReader,
    file: &mut tokio::fs::File,
    destination: &Path,
) -> Result<(), StreamError>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let read = stdout
            .read(&mut chunk)
            .await
            .map_err(|source| StreamError::Read { source })?;
        if read == 0 {
            return reader.finish();
        }
        for body in reader.push(&chunk[..read])? {
            file.write_all(body.as_bytes())
                .await
                .map_err(|source| FilesystemError::WriteFile {
                    path: destination.to_path_buf(),
                    source,
                })?;
        }
    }
}

async fn log_stderr(stderr: ChildStderr, command: String) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if !line.trim().is_empty() => {
                warn!(event = "detail_stderr", command = %command, line = %line);
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(err) => {
                warn!(event = "detail_stderr_read", command = %command, error = %err);
                break;
            }
        }
    }
}
