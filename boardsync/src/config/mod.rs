//! Configuration for the sync engine and the `boardsync` binary.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/boardsync/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::engine::RetryConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    sync: SyncFileConfig,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    debounce_ms: Option<u64>,
    poll_interval_secs: Option<u64>,
    poll_enabled: Option<bool>,
    event_buffer: Option<usize>,
    refetch_buffer: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved sync configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Retries after a transient remote failure.
    pub retries: u32,
    /// Wait between retries.
    pub retry_backoff: Duration,
    /// Quiescence window of the name editor.
    pub debounce: Duration,
    /// Interval of the optional poller.
    pub poll_interval: Duration,
    /// Whether the binary starts a poller.
    pub poll_enabled: bool,
    /// Capacity of the engine event channel.
    pub event_buffer: usize,
    /// Capacity of the cache refetch queue.
    pub refetch_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            retry_backoff: Duration::from_millis(250),
            debounce: Duration::from_millis(500),
            poll_interval: Duration::from_secs(30),
            poll_enabled: false,
            event_buffer: 64,
            refetch_buffer: 32,
        }
    }
}

impl SyncConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path
    /// (`~/.config/boardsync/config.toml`) is tried and silently ignored
    /// if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default. Separated from `load()` so it can be
    /// tested without touching the filesystem.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let sync = &file.sync;

        Self {
            retries: cli.retries.or(sync.retries).unwrap_or(defaults.retries),
            retry_backoff: sync
                .retry_backoff_ms
                .map_or(defaults.retry_backoff, Duration::from_millis),
            debounce: cli
                .debounce_ms
                .or(sync.debounce_ms)
                .map_or(defaults.debounce, Duration::from_millis),
            poll_interval: sync
                .poll_interval_secs
                .filter(|s| *s > 0)
                .map_or(defaults.poll_interval, Duration::from_secs),
            poll_enabled: cli.poll || sync.poll_enabled.unwrap_or(defaults.poll_enabled),
            event_buffer: sync.event_buffer.unwrap_or(defaults.event_buffer),
            refetch_buffer: sync.refetch_buffer.unwrap_or(defaults.refetch_buffer),
        }
    }

    /// The engine's retry policy.
    #[must_use]
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            retries: self.retries,
            backoff: self.retry_backoff,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Optimistic task-board sync, driven from the command line")]
pub struct CliArgs {
    /// Path to config file (default: `~/.config/boardsync/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Board JSON file; read at start and rewritten with the result.
    #[arg(short, long, env = "BOARDSYNC_BOARD")]
    pub board: Option<PathBuf>,

    /// Retries after a transient failure.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Quiescence window for name edits, in milliseconds.
    #[arg(long)]
    pub debounce_ms: Option<u64>,

    /// Poll the board while the command runs.
    #[arg(long)]
    pub poll: bool,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "BOARDSYNC_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/boardsync.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// What to do with the board.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Board operations offered by the binary.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the board grouped by container.
    Show,
    /// Drag a task or section and drop it on a target (omit to cancel).
    Drag {
        /// Task or section id to drag.
        subject: String,
        /// Drop target: a task, section, or `unassigned`.
        #[arg(long)]
        over: Option<String>,
    },
    /// Move a task by neighbor references.
    MoveTask {
        /// Task id.
        task: String,
        /// Destination section id, or `unassigned`.
        #[arg(long)]
        to: String,
        /// Task that should follow it.
        #[arg(long)]
        before: Option<String>,
        /// Task that should precede it.
        #[arg(long)]
        after: Option<String>,
    },
    /// Move a section by neighbor references.
    MoveSection {
        /// Section id.
        section: String,
        /// Section that should follow it.
        #[arg(long)]
        before: Option<String>,
        /// Section that should precede it.
        #[arg(long)]
        after: Option<String>,
    },
    /// Rename a task or section.
    Rename {
        /// Task or section id.
        id: String,
        /// New name.
        name: String,
    },
    /// Mark a task done, or open again with `--undo`.
    SetDone {
        /// Task id.
        task: String,
        /// Reopen instead.
        #[arg(long)]
        undo: bool,
    },
    /// Replace a task's assignees.
    Assign {
        /// Task id.
        task: String,
        /// User ids, in order.
        users: Vec<String>,
    },
    /// Add a task at the end of a container.
    AddTask {
        /// Task name.
        name: String,
        /// Destination section id; unassigned if omitted.
        #[arg(long)]
        section: Option<String>,
    },
    /// Add a section at the end of the board.
    AddSection {
        /// Section name.
        name: String,
    },
    /// Delete a task and its subtasks.
    Delete {
        /// Task id.
        task: String,
    },
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("boardsync").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
