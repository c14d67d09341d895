use clap::Parser;
use sflog_core::{
    PanelTemplate, TemplateError, DEFAULT_DETAIL_COMMAND, DEFAULT_LISTING_COMMAND, ID_PLACEHOLDER,
};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

pub const DEFAULT_ADDR: &str = "127.0.0.1:4199";
pub const LOG_FILE_NAME: &str = "sflog-panel.log";
const OUTPUT_SUBDIR: &str = "sflog/developerLogs";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sflog-panel",
    about = "Browse Salesforce debug logs in a live panel"
)]
pub struct Args {
    /// Loopback address the panel is served on.
    #[arg(long, env = "SFLOG_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,
    #[arg(long, env = "SFLOG_POLL_INTERVAL_SECS", default_value_t = 5)]
    pub poll_interval_secs: u64,
    /// Where retrieved logs are written as `<id>.log`.
    #[arg(long, env = "SFLOG_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,
    #[arg(long, env = "SFLOG_LISTING_COMMAND", default_value = DEFAULT_LISTING_COMMAND)]
    pub listing_command: String,
    /// Must contain `{id}`.
    #[arg(long, env = "SFLOG_DETAIL_COMMAND", default_value = DEFAULT_DETAIL_COMMAND)]
    pub detail_command: String,
    /// Panel document template; must contain `<!--LOG_ROWS-->`.
    #[arg(long, env = "SFLOG_TEMPLATE")]
    pub template: Option<PathBuf>,
    /// Program used to open files and the panel url.
    #[arg(long, env = "SFLOG_OPENER")]
    pub opener: Option<String>,
    #[arg(long)]
    pub open_browser: bool,
    #[arg(long)]
    pub no_show_on_start: bool,
    #[arg(long)]
    pub debug: bool,
    #[arg(long, env = "SFLOG_LOG_DIR", default_value = "")]
    pub log_dir: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub poll_interval: Duration,
    pub output_dir: PathBuf,
    pub listing_command: String,
    pub detail_command: String,
    pub template: PanelTemplate,
    pub opener: String,
    pub open_browser: bool,
    pub show_on_start: bool,
    pub debug: bool,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid address {addr}: {source}")]
    InvalidAddr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("address {addr} is not a loopback address")]
    NotLoopback { addr: SocketAddr },
    #[error("poll interval must be at least one second")]
    ZeroInterval,
    #[error("{field} must not be empty")]
    EmptyCommand { field: &'static str },
    #[error("detail command must contain the {{id}} placeholder")]
    MissingIdPlaceholder,
    #[error("failed to read template {}: {source}", .path.display())]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("template {}: {source}", .path.display())]
    Template {
        path: PathBuf,
        #[source]
        source: TemplateError,
    },
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let addr: SocketAddr = args
            .addr
            .trim()
            .parse()
            .map_err(|source| ConfigError::InvalidAddr {
                addr: args.addr.clone(),
                source,
            })?;
        if !addr.ip().is_loopback() {
            return Err(ConfigError::NotLoopback { addr });
        }
        if args.poll_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if args.listing_command.trim().is_empty() {
            return Err(ConfigError::EmptyCommand {
                field: "listing command",
            });
        }
        if args.detail_command.trim().is_empty() {
            return Err(ConfigError::EmptyCommand {
                field: "detail command",
            });
        }
        if !args.detail_command.contains(ID_PLACEHOLDER) {
            return Err(ConfigError::MissingIdPlaceholder);
        }

        let template = match &args.template {
            Some(path) => load_template(path)?,
            None => PanelTemplate::default(),
        };
        let opener = args
            .opener
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| default_opener().to_string());
        let output_dir = args.output_dir.unwrap_or_else(|| {
            default_output_dir(
                std::env::var_os("XDG_STATE_HOME").map(PathBuf::from),
                std::env::var_os("HOME").map(PathBuf::from),
            )
        });
        let log_dir = Some(args.log_dir.trim())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            addr,
            poll_interval: Duration::from_secs(args.poll_interval_secs),
            output_dir,
            listing_command: args.listing_command,
            detail_command: args.detail_command,
            template,
            opener,
            open_browser: args.open_browser || env_true("SFLOG_OPEN_BROWSER"),
            show_on_start: !(args.no_show_on_start || env_true("SFLOG_NO_SHOW_ON_START")),
            debug: args.debug || env_true("SFLOG_DEBUG"),
            log_dir,
        })
    }

    pub fn panel_url(&self) -> String {
        format!("http://{}/", self.addr)
    }
}

fn load_template(path: &Path) -> Result<PanelTemplate, ConfigError> {
    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::TemplateRead {
        path: path.to_path_buf(),
        source,
    })?;
    PanelTemplate::parse(source).map_err(|source| ConfigError::Template {
        path: path.to_path_buf(),
        source,
    })
}

/// `$XDG_STATE_HOME/sflog/developerLogs`, then `$HOME/.local/state/...`,
/// then a directory relative to the working directory.
pub fn default_output_dir(xdg_state_home: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = xdg_state_home.filter(|dir| !dir.as_os_str().is_empty()) {
        return dir.join(OUTPUT_SUBDIR);
    }
    if let Some(home) = home.filter(|dir| !dir.as_os_str().is_empty()) {
        return home.join(".local/state").join(OUTPUT_SUBDIR);
    }
    PathBuf::from(".sflog/developerLogs")
}

pub fn default_opener() -> &'static str {
    if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(windows) {
        "explorer"
    } else {
        "xdg-open"
    }
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

type SharedFile = Arc<Mutex<std::fs::File>>;

/// Keeps the log file open for the life of the process.
pub struct LogGuard {
    path: Option<PathBuf>,
    file: Option<SharedFile>,
}

impl LogGuard {
    fn stderr_only() -> Self {
        Self {
            path: None,
            file: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn open(log_dir: Option<&Path>) -> io::Result<Self> {
        let Some(dir) = log_dir else {
            return Ok(Self::stderr_only());
        };
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path: Some(path),
            file: Some(Arc::new(Mutex::new(file))),
        })
    }

    fn writer(&self) -> TeeWriter {
        TeeWriter {
            file: self.file.clone(),
        }
    }
}

/// Copies every formatted event to stderr and the log file, if any.
#[derive(Clone)]
struct TeeWriter {
    file: Option<SharedFile>,
}

impl TeeWriter {
    fn each(&self, mut op: impl FnMut(&mut dyn Write) -> io::Result<()>) {
        let _ = op(&mut io::stderr().lock());
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = op(&mut *file);
        }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.each(|out| out.write_all(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.each(|out| out.flush());
        Ok(())
    }
}

/// `RUST_LOG` wins; otherwise `--debug`, then `SFLOG_LOG_LEVEL`, then `info`.
pub fn init_logging(config: &Config) -> Option<LogGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match (config.debug, std::env::var("SFLOG_LOG_LEVEL")) {
            (true, _) => "debug".to_string(),
            (false, Ok(level)) => level,
            (false, Err(_)) => "info".to_string(),
        };
        EnvFilter::new(level)
    });
    let guard = LogGuard::open(config.log_dir.as_deref()).unwrap_or_else(|err| {
        eprintln!("log_file_error: {err}");
        LogGuard::stderr_only()
    });
    let writer = guard.writer();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(guard.file.is_none())
        .with_writer(BoxMakeWriter::new(move || writer.clone()))
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["sflog-panel"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::from_args(parse(&["--output-dir", "/tmp/logs"])).unwrap();
        assert_eq!(config.addr, DEFAULT_ADDR.parse::<SocketAddr>().unwrap());
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.output_dir, PathBuf::from("/tmp/logs"));
        assert!(config.detail_command.contains(ID_PLACEHOLDER));
        assert_eq!(config.panel_url(), "http://127.0.0.1:4199/");
    }

    #[test]
    fn rejects_non_loopback_addr() {
        let err = Config::from_args(parse(&["--addr", "0.0.0.0:4199"])).unwrap_err();
        assert!(matches!(err, ConfigError::NotLoopback { .. }));
        let err = Config::from_args(parse(&["--addr", "localhost"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddr { .. }));
    }

    #[test]
    fn rejects_zero_interval() {
        let err = Config::from_args(parse(&["--poll-interval-secs", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroInterval));
    }

    #[test]
    fn detail_command_needs_id_placeholder() {
        let err =
            Config::from_args(parse(&["--detail-command", "sfdx force:apex:log:get --json"]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::MissingIdPlaceholder));
    }

    #[test]
    fn template_file_is_loaded_and_checked() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.html");
        std::fs::write(&good, "<table><!--LOG_ROWS--></table>").unwrap();
        let bad = dir.path().join("bad.html");
        std::fs::write(&bad, "<table></table>").unwrap();

        let config =
            Config::from_args(parse(&["--template", good.to_str().unwrap()])).unwrap();
        assert_eq!(config.template.render(&[]), "<table></table>");

        let err = Config::from_args(parse(&["--template", bad.to_str().unwrap()])).unwrap_err();
        assert!(matches!(err, ConfigError::Template { .. }));

        let missing = dir.path().join("missing.html");
        let err =
            Config::from_args(parse(&["--template", missing.to_str().unwrap()])).unwrap_err();
        assert!(matches!(err, ConfigError::TemplateRead { .. }));
    }

    #[test]
    fn output_dir_prefers_xdg_state_then_home() {
        assert_eq!(
            default_output_dir(Some("/state".into()), Some("/home/u".into())),
            PathBuf::from("/state/sflog/developerLogs")
        );
        assert_eq!(
            default_output_dir(Some("".into()), Some("/home/u".into())),
            PathBuf::from("/home/u/.local/state/sflog/developerLogs")
        );
        assert_eq!(
            default_output_dir(None, None),
            PathBuf::from(".sflog/developerLogs")
        );
    }

    #[test]
    fn log_file_is_created_in_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs");
        let guard = LogGuard::open(Some(&nested)).unwrap();
        assert_eq!(guard.path(), Some(nested.join(LOG_FILE_NAME).as_path()));
        assert!(nested.join(LOG_FILE_NAME).is_file());
        assert!(LogGuard::open(None).unwrap().path().is_none());
    }

    #[test]
    fn tee_writer_appends_to_the_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let guard = LogGuard::open(Some(dir.path())).unwrap();
        let mut first = guard.writer();
        let mut second = guard.writer();
        first.write_all(b"event=one\n").unwrap();
        second.write_all(b"event=two\n").unwrap();
        second.flush().unwrap();

        let written = std::fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
        assert_eq!(written, "event=one\nevent=two\n");
    }
}
