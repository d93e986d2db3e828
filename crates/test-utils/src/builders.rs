#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use workshop_jobs::config::{EngineConfig, RawConfigFile};
use workshop_jobs::progress::PatternTable;

use crate::tool::ToolScript;

/// Builder for `EngineConfig` with test-friendly durations.
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new(tool_path: impl Into<PathBuf>, work_root: impl Into<PathBuf>) -> Self {
        let mut config =
            EngineConfig::new(tool_path, work_root).expect("builtin patterns compile");
        config.max_runtime = Duration::from_secs(30);
        config.kill_grace = Duration::from_secs(2);
        Self { config }
    }

    /// Run `tool` through `/bin/sh`.
    pub fn for_tool(tool: &ToolScript) -> Self {
        Self::new("/bin/sh", tool.work_root()).tool_arg(tool.script().to_string_lossy())
    }

    pub fn tool_arg(mut self, arg: impl Into<String>) -> Self {
        self.config.tool_args.push(arg.into());
        self
    }

    pub fn max_runtime(mut self, d: Duration) -> Self {
        self.config.max_runtime = d;
        self
    }

    pub fn kill_grace(mut self, d: Duration) -> Self {
        self.config.kill_grace = d;
        self
    }

    pub fn artifact_retention(mut self, d: Duration) -> Self {
        self.config.artifact_retention = d;
        self
    }

    pub fn failed_retention(mut self, d: Duration) -> Self {
        self.config.failed_retention = d;
        self
    }

    pub fn progress_persist_step(mut self, step: f64) -> Self {
        self.config.progress_persist_step = step;
        self
    }

    pub fn subscriber_buffer(mut self, n: usize) -> Self {
        self.config.subscriber_buffer = n;
        self
    }

    pub fn retained_terminal_markers(mut self, n: usize) -> Self {
        self.config.retained_terminal_markers = n;
        self
    }

    pub fn failure_pattern(mut self, pattern: &str) -> Self {
        let table = (*self.config.patterns)
            .clone()
            .with_failure_patterns(&[pattern])
            .expect("valid failure pattern");
        self.config.patterns = Arc::new(table);
        self
    }

    pub fn patterns(mut self, table: PatternTable) -> Self {
        self.config.patterns = Arc::new(table);
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

/// Parse a TOML snippet into a `RawConfigFile`.
pub fn raw_config(toml_src: &str) -> RawConfigFile {
    toml::from_str(toml_src).expect("test TOML parses")
}
