use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser};
use reqwest::Url;

pub const DEFAULT_ENDPOINT: &str = "https://repo.accrescent.app/repodata.0.json";

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_filter_directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "appwatch",
    about = "Watch an app repository feed for new, removed, updated and re-signed apps",
    version = crate::version::VERSION
)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    #[arg(
        long,
        env = "APPWATCH_ENDPOINT",
        value_name = "URL",
        default_value = DEFAULT_ENDPOINT,
        value_parser = parse_endpoint
    )]
    pub endpoint: Url,

    /// Seconds between polls.
    #[arg(
        long,
        env = "APPWATCH_INTERVAL",
        value_name = "SECS",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(1..=86_400)
    )]
    pub interval: u64,

    #[arg(
        long,
        env = "APPWATCH_STATE_FILE",
        value_name = "PATH",
        default_value = "known_apps.json",
        value_parser = parse_state_file
    )]
    pub state_file: PathBuf,

    #[arg(
        long,
        env = "APPWATCH_LOG_FILE",
        value_name = "PATH",
        default_value = "app_updates.log",
        value_parser = parse_log_file
    )]
    pub log_file: PathBuf,

    #[arg(
        long,
        env = "APPWATCH_LOG_LEVEL",
        value_name = "LEVEL",
        default_value = "info",
        ignore_case = true,
        value_enum
    )]
    pub log_level: LogLevel,

    /// Do not echo messages to the console.
    #[arg(long, env = "APPWATCH_QUIET")]
    pub quiet: bool,

    /// Poll once and exit.
    #[arg(long, env = "APPWATCH_ONCE")]
    pub once: bool,

    /// Consecutive failed polls before giving up.
    #[arg(
        long,
        env = "APPWATCH_MAX_FAILURES",
        value_name = "N",
        default_value_t = 5,
        value_parser = clap::value_parser!(u32).range(1..=1000)
    )]
    pub max_failures: u32,

    #[arg(
        long = "request-timeout-secs",
        env = "APPWATCH_REQUEST_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..=300)
    )]
    pub request_timeout_secs: u64,

    #[arg(
        long = "max-backoff-secs",
        env = "APPWATCH_MAX_BACKOFF_SECS",
        value_name = "SECS",
        default_value_t = 2400,
        value_parser = clap::value_parser!(u64).range(1..=86_400)
    )]
    pub max_backoff_secs: u64,
}

impl Config {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Never shorter than one interval.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs.max(self.interval))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidEndpoint { value: String, reason: String },
    InvalidLogFile { value: String },
    InvalidStateFile { value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEndpoint { value, reason } => {
                write!(f, "invalid endpoint {value:?}: {reason}")
            }
            Self::InvalidLogFile { value } => {
                write!(f, "invalid log file {value:?}: expected a path ending in a file name")
            }
            Self::InvalidStateFile { value } => {
                write!(f, "invalid state file {value:?}: expected a path ending in a file name")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

pub fn parse_endpoint(value: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEndpoint {
        value: value.to_string(),
        reason,
    };

    let url = Url::parse(value.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme {other:?}"))),
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

fn file_path(value: &str) -> Option<PathBuf> {
    let path = PathBuf::from(value);
    if value.trim().is_empty() || value.ends_with('/') || path.file_name().is_none() {
        return None;
    }
    Some(path)
}

pub fn parse_log_file(value: &str) -> Result<PathBuf, ConfigError> {
    file_path(value).ok_or_else(|| ConfigError::InvalidLogFile {
        value: value.to_string(),
    })
}

pub fn parse_state_file(value: &str) -> Result<PathBuf, ConfigError> {
    file_path(value).ok_or_else(|| ConfigError::InvalidStateFile {
        value: value.to_string(),
    })
}
