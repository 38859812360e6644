//! Layered configuration for kbsync.
//!
//! Values are merged from, in increasing order of precedence:
//!
//! 1. built-in defaults,
//! 2. a configuration file (TOML, YAML or JSON, picked by extension),
//! 3. environment variables prefixed with `KBSYNC_`, using `__` to reach
//!    into sections (`KBSYNC_RECONCILE__MAX_ATTEMPTS=5`).
//!
//! Every section is also what the engine consumes directly, so there is no
//! second "settings" layer to keep in sync.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "KBSYNC_";
const FILE_NAME: &str = "kbsync.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "kbsync")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub cache: CacheConfig,
    pub selection: SelectionConfig,
    pub reconcile: ReconcileConfig,
}

/// Which store to talk to and which job to manage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Connection name, used as the connection id in logs.
    pub name: String,
    /// Directory served by the local remote.
    pub root: Option<PathBuf>,
    /// Where job membership documents are kept.
    pub state_dir: Option<PathBuf>,
    /// Drop membership writes instead of sending them.
    pub read_only: bool,
    /// Job (knowledge base) to manage.
    pub job: String,
}
impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            root: None,
            state_dir: None,
            read_only: false,
            job: "default".to_string(),
        }
    }
}
impl RemoteConfig {
    /// Configured state directory, else the platform data directory, else
    /// `.kbsync` in the working directory.
    pub fn state_dir(&self) -> PathBuf {
        match &self.state_dir {
            Some(dir) => dir.clone(),
            None => project_dirs().map_or_else(|| PathBuf::from(".kbsync"), |dirs| dirs.data_dir().join("jobs")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Warm the cache one level below every freshly listed folder.
    pub prefetch: bool,
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self { prefetch: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Upper bound on resources visited while expanding one folder.
    pub max_nodes: usize,
}
impl Default for SelectionConfig {
    fn default() -> Self {
        Self { max_nodes: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub resync_interval_ms: u64,
    /// How long an id removed locally is shielded from resyncs that still
    /// see it as a member.
    pub protect_window_ms: u64,
}
impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3_000,
            max_attempts: 20,
            resync_interval_ms: 10_000,
            protect_window_ms: 30_000,
        }
    }
}
impl ReconcileConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_millis(self.resync_interval_ms)
    }

    pub fn protect_window(&self) -> Duration {
        Duration::from_millis(self.protect_window_ms)
    }
}

impl Config {
    /// Default configuration file location for this platform, if the
    /// platform has one.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(FILE_NAME))
    }

    /// Load configuration from defaults, a file and the environment.
    ///
    /// An explicit `file` must exist; the [default path](Self::default_path)
    /// is only used when it does.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file = match file {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::MissingFile(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|path| path.is_file()),
        };
        tracing::debug!(file = ?file, "Loading configuration");
        Self::from_figment(Self::figment(file.as_deref())?)
    }

    /// Build the layered [`Figment`] without extracting it.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = file {
            let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
            figment = match extension.as_deref() {
                Some("toml") => figment.merge(Toml::file(path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the engine spin or never converge.
    pub fn validate(&self) -> Result<()> {
        if self.reconcile.poll_interval_ms == 0 {
            exn::bail!(ErrorKind::Invalid("reconcile.poll_interval_ms"));
        }
        if self.reconcile.max_attempts == 0 {
            exn::bail!(ErrorKind::Invalid("reconcile.max_attempts"));
        }
        if self.reconcile.resync_interval_ms == 0 {
            exn::bail!(ErrorKind::Invalid("reconcile.resync_interval_ms"));
        }
        if self.selection.max_nodes == 0 {
            exn::bail!(ErrorKind::Invalid("selection.max_nodes"));
        }
        if self.remote.job.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("remote.job"));
        }
        Ok(())
    }
}
