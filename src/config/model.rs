// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::Result;
use crate::limits::StaticLimitsProvider;
use crate::progress::{CURRENT_PATTERN_VERSION, PatternTable};
use crate::types::{Limits, LogLevel};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [tool]
/// path = "/opt/steam/workshop-fetch"
/// work_root = "/var/lib/workshop-jobs"
///
/// [jobs]
/// max_runtime_seconds = 3600
///
/// [limits.default]
/// max_concurrent = 2
/// rate_per_minute = 10
///
/// [limits.identity."some-api-key"]
/// max_concurrent = 8
/// ```
///
/// Only `[tool].path` is required.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub logging: LoggingSection,

    pub tool: ToolSection,

    #[serde(default)]
    pub jobs: JobsSection,

    #[serde(default)]
    pub progress: ProgressSection,

    #[serde(default)]
    pub hub: HubSection,

    #[serde(default)]
    pub limits: LimitsSection,
}

/// Validated configuration. Build it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub logging: LoggingSection,
    pub tool: ToolSection,
    pub jobs: JobsSection,
    pub progress: ProgressSection,
    pub hub: HubSection,
    pub limits: LimitsSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            logging: raw.logging,
            tool: raw.tool,
            jobs: raw.jobs,
            progress: raw.progress,
            hub: raw.hub,
            limits: raw.limits,
        }
    }

    /// Runtime settings for the scheduler.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let patterns = PatternTable::builtin(self.progress.pattern_version)?
            .with_failure_patterns(&self.progress.failure_patterns)?;

        Ok(EngineConfig {
            tool_path: self.tool.path.clone(),
            tool_args: self.tool.args.clone(),
            work_root: self.tool.work_root.clone(),
            max_runtime: Duration::from_secs(self.jobs.max_runtime_seconds),
            kill_grace: Duration::from_millis(self.jobs.kill_grace_ms),
            artifact_retention: Duration::from_secs(self.jobs.artifact_retention_seconds),
            failed_retention: Duration::from_secs(self.jobs.failed_retention_seconds),
            progress_persist_step: self.jobs.progress_persist_step,
            patterns: Arc::new(patterns),
            subscriber_buffer: self.hub.subscriber_buffer,
            retained_terminal_markers: self.hub.retained_terminal_markers,
        })
    }

    /// Limits provider for `[limits]`.
    pub fn limits_provider(&self) -> StaticLimitsProvider {
        self.limits
            .identity
            .iter()
            .fold(StaticLimitsProvider::new(self.limits.default), |p, (id, l)| {
                p.with_override(id.as_str(), *l)
            })
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingSection {
    /// Falls back to `WORKSHOP_JOBS_LOG`, then `info`.
    #[serde(default)]
    pub level: Option<LogLevel>,
}

/// `[tool]` section: the external download tool.
///
/// The tool is invoked as `<path> <args...> <target> <destination>`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolSection {
    pub path: PathBuf,

    /// Extra leading arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Parent directory of the per-job working directories.
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,
}

fn default_work_root() -> PathBuf {
    PathBuf::from("workshop-jobs")
}

/// `[jobs]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsSection {
    #[serde(default = "default_max_runtime_seconds")]
    pub max_runtime_seconds: u64,

    /// How long to wait for a killed tool to be reaped.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// How long a succeeded job's artifact is kept.
    #[serde(default = "default_artifact_retention_seconds")]
    pub artifact_retention_seconds: u64,

    /// How long a failed or cancelled job's partial files are kept.
    #[serde(default)]
    pub failed_retention_seconds: u64,

    /// Minimum progress increase between two persisted updates.
    #[serde(default = "default_progress_persist_step")]
    pub progress_persist_step: f64,
}

fn default_max_runtime_seconds() -> u64 {
    3600
}

fn default_kill_grace_ms() -> u64 {
    5000
}

fn default_artifact_retention_seconds() -> u64 {
    24 * 60 * 60
}

fn default_progress_persist_step() -> f64 {
    0.05
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            max_runtime_seconds: default_max_runtime_seconds(),
            kill_grace_ms: default_kill_grace_ms(),
            artifact_retention_seconds: default_artifact_retention_seconds(),
            failed_retention_seconds: 0,
            progress_persist_step: default_progress_persist_step(),
        }
    }
}

/// `[progress]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressSection {
    #[serde(default = "default_pattern_version")]
    pub pattern_version: u32,

    /// Extra regexes treated as failure markers. A named group `msg`, if
    /// present, becomes the job's error message.
    #[serde(default)]
    pub failure_patterns: Vec<String>,
}

fn default_pattern_version() -> u32 {
    CURRENT_PATTERN_VERSION
}

impl Default for ProgressSection {
    fn default() -> Self {
        Self {
            pattern_version: default_pattern_version(),
            failure_patterns: Vec::new(),
        }
    }
}

/// `[hub]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct HubSection {
    /// Progress events a subscriber may lag behind before it is dropped.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Terminal markers kept for late subscribers.
    #[serde(default = "default_retained_terminal_markers")]
    pub retained_terminal_markers: usize,
}

fn default_subscriber_buffer() -> usize {
    64
}

fn default_retained_terminal_markers() -> usize {
    1024
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
            retained_terminal_markers: default_retained_terminal_markers(),
        }
    }
}

/// `[limits]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LimitsSection {
    #[serde(default)]
    pub default: Limits,

    /// Per-identity overrides, keyed by identity id.
    #[serde(default)]
    pub identity: BTreeMap<String, Limits>,
}

/// Runtime settings consumed by the scheduler.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tool_path: PathBuf,
    pub tool_args: Vec<String>,
    pub work_root: PathBuf,
    pub max_runtime: Duration,
    pub kill_grace: Duration,
    pub artifact_retention: Duration,
    pub failed_retention: Duration,
    pub progress_persist_step: f64,
    pub patterns: Arc<PatternTable>,
    pub subscriber_buffer: usize,
    pub retained_terminal_markers: usize,
}

impl EngineConfig {
    /// Defaults from an empty config file with the given tool and work root.
    pub fn new(tool_path: impl Into<PathBuf>, work_root: impl Into<PathBuf>) -> Result<Self> {
        let jobs = JobsSection::default();
        let hub = HubSection::default();
        Ok(Self {
            tool_path: tool_path.into(),
            tool_args: Vec::new(),
            work_root: work_root.into(),
            max_runtime: Duration::from_secs(jobs.max_runtime_seconds),
            kill_grace: Duration::from_millis(jobs.kill_grace_ms),
            artifact_retention: Duration::from_secs(jobs.artifact_retention_seconds),
            failed_retention: Duration::from_secs(jobs.failed_retention_seconds),
            progress_persist_step: jobs.progress_persist_step,
            patterns: Arc::new(PatternTable::current()?),
            subscriber_buffer: hub.subscriber_buffer,
            retained_terminal_markers: hub.retained_terminal_markers,
        })
    }
}
