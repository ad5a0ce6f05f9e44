//! Event loop configuration.
//!
//! # Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: builder methods such as [`EventLoopConfig::event_loops`]
//! 2. **Environment variables**: `AFFINITY_*`
//! 3. **Config file**: TOML, requires the `config-file` feature
//! 4. **Defaults**: [`EventLoopConfig::default()`]
//!
//! # Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `AFFINITY_EVENT_LOOPS` | `usize` | `event_loops` |
//! | `AFFINITY_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `AFFINITY_SHUTDOWN_TIMEOUT_MS` | `u64` | `shutdown_timeout` |
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `event_loops` | available CPU parallelism |
//! | `thread_name_prefix` | `"affinity-loop"` |
//! | `shutdown_timeout` | 5 s |

use core::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Environment variable name for the number of event loops.
pub const ENV_EVENT_LOOPS: &str = "AFFINITY_EVENT_LOOPS";
/// Environment variable name for the event loop thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "AFFINITY_THREAD_NAME_PREFIX";
/// Environment variable name for the graceful shutdown timeout, in milliseconds.
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "AFFINITY_SHUTDOWN_TIMEOUT_MS";

const DEFAULT_THREAD_NAME_PREFIX: &str = "affinity-loop";
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors produced while building an [`EventLoopConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting was present but could not be parsed.
    #[error("invalid value for {name}: {reason}")]
    InvalidValue {
        /// Variable or key that failed to parse.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The group would have no event loops.
    #[error("event_loops must be at least 1")]
    NoEventLoops,

    /// The thread name prefix was empty.
    #[error("thread_name_prefix must not be empty")]
    EmptyThreadNamePrefix,

    /// The config file could not be read.
    #[cfg(feature = "config-file")]
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File that failed to load.
        path: std::path::PathBuf,
        /// The source I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[cfg(feature = "config-file")]
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl From<ConfigError> for crate::error::Error {
    fn from(err: ConfigError) -> Self {
        Self::new(crate::error::ErrorKind::Config)
            .with_message(err.to_string())
            .with_source(err)
    }
}

/// Thread lifecycle callback.
pub type ThreadCallback = Arc<dyn Fn() + Send + Sync>;

/// Configuration for an [`EventLoopGroup`](super::EventLoopGroup) and its loops.
#[derive(Clone)]
pub struct EventLoopConfig {
    /// Number of event loops in a group.
    pub event_loops: usize,
    /// Loop threads are named `{thread_name_prefix}-{index}`.
    pub thread_name_prefix: String,
    /// Upper bound on graceful shutdown when a loop is dropped.
    pub shutdown_timeout: Duration,
    /// Callback executed on a loop thread before it runs any task.
    pub on_thread_start: Option<ThreadCallback>,
    /// Callback executed on a loop thread after it drains.
    pub on_thread_stop: Option<ThreadCallback>,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            event_loops: std::thread::available_parallelism().map_or(1, usize::from),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for EventLoopConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopConfig")
            .field("event_loops", &self.event_loops)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}

impl EventLoopConfig {
    /// Defaults with `AFFINITY_*` environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Sets the number of event loops.
    #[must_use]
    pub fn event_loops(mut self, n: usize) -> Self {
        self.event_loops = n;
        self
    }

    /// Sets the thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Sets the graceful shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the thread start callback.
    #[must_use]
    pub fn on_thread_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_thread_start = Some(Arc::new(f));
        self
    }

    /// Sets the thread stop callback.
    #[must_use]
    pub fn on_thread_stop(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_thread_stop = Some(Arc::new(f));
        self
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_loops == 0 {
            return Err(ConfigError::NoEventLoops);
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ConfigError::EmptyThreadNamePrefix);
        }
        Ok(())
    }

    /// Applies the `AFFINITY_*` environment variables that are set.
    ///
    /// Returns an error if a variable is set but unparseable.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides using `lookup` in place of the process environment.
    pub fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(val) = lookup(ENV_EVENT_LOOPS) {
            self.event_loops = parse_usize(ENV_EVENT_LOOPS, &val)?;
        }
        if let Some(val) = lookup(ENV_THREAD_NAME_PREFIX) {
            self.thread_name_prefix = val;
        }
        if let Some(val) = lookup(ENV_SHUTDOWN_TIMEOUT_MS) {
            self.shutdown_timeout =
                Duration::from_millis(parse_u64(ENV_SHUTDOWN_TIMEOUT_MS, &val)?);
        }
        Ok(())
    }
}

fn parse_usize(name: &str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            reason: format!("expected unsigned integer, got {val:?} ({e})"),
        })
}

fn parse_u64(name: &str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            reason: format!("expected u64, got {val:?} ({e})"),
        })
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable event loop settings.
///
/// ```toml
/// [event_loop]
/// count = 4
/// thread_name_prefix = "proxy-loop"
/// shutdown_timeout_ms = 2000
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct EventLoopToml {
    /// The `[event_loop]` table.
    #[serde(default)]
    pub event_loop: EventLoopSection,
}

/// `[event_loop]` section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct EventLoopSection {
    /// Number of event loops.
    pub count: Option<usize>,
    /// Name prefix for loop threads.
    pub thread_name_prefix: Option<String>,
    /// Graceful shutdown timeout in milliseconds.
    pub shutdown_timeout_ms: Option<u64>,
}

#[cfg(feature = "config-file")]
impl EventLoopConfig {
    /// Parses TOML text and applies it over the defaults. Environment
    /// variables are not consulted.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let parsed: EventLoopToml = toml::from_str(text)?;
        let mut config = Self::default();
        config.apply_toml(parsed);
        Ok(config)
    }

    /// Loads defaults, then the file at `path`, then environment overrides.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_toml(&mut self, toml: EventLoopToml) {
        let section = toml.event_loop;
        if let Some(count) = section.count {
            self.event_loops = count;
        }
        if let Some(prefix) = section.thread_name_prefix {
            self.thread_name_prefix = prefix;
        }
        if let Some(ms) = section.shutdown_timeout_ms {
            self.shutdown_timeout = Duration::from_millis(ms);
        }
    }
}
