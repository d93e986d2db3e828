// src/progress/patterns.rs

//! Versioned table of download tool output patterns.
//!
//! When the tool changes its output format, add a new version here and bump
//! [`CURRENT_PATTERN_VERSION`]; the parser and scheduler stay untouched.

use regex::Regex;
use serde::Serialize;

use crate::errors::{JobsError, Result};

pub const CURRENT_PATTERN_VERSION: u32 = 1;

/// Coarse stage of a download, as reported to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Starting,
    Connecting,
    Downloading,
    Verifying,
    Complete,
    Error,
}

/// Compiled patterns for one tool output format.
#[derive(Debug, Clone)]
pub struct PatternTable {
    version: u32,
    /// Each must capture the percentage in a group named `pct`.
    percent: Vec<Regex>,
    phases: Vec<(Regex, Phase)>,
    /// Each may capture a human-readable reason in a group named `msg`.
    failures: Vec<Regex>,
    completion: Vec<Regex>,
}

impl PatternTable {
    /// The builtin table for `version`.
    pub fn builtin(version: u32) -> Result<Self> {
        match version {
            1 => Self::v1(),
            other => Err(JobsError::ConfigError(format!(
                "unknown progress pattern_version {other} (latest is {CURRENT_PATTERN_VERSION})"
            ))),
        }
    }

    pub fn current() -> Result<Self> {
        Self::builtin(CURRENT_PATTERN_VERSION)
    }

    /// SteamCMD `workshop_download_item` output plus DepotDownloader-style
    /// percentage lines.
    fn v1() -> Result<Self> {
        Ok(Self {
            version: 1,
            percent: vec![
                compile(r"progress:\s*(?P<pct>\d{1,3}(?:\.\d+)?)")?,
                compile(r"(?P<pct>\d{1,3}(?:\.\d+)?)\s*%")?,
            ],
            phases: vec![
                (compile(r"(?i)\b(logging in|connecting)\b")?, Phase::Connecting),
                (compile(r"(?i)\b(validating|verifying)\b")?, Phase::Verifying),
                (compile(r"(?i)^\s*downloading item\b")?, Phase::Downloading),
                (compile(r"(?i)\bdownloading\b")?, Phase::Downloading),
            ],
            failures: vec![
                compile(r"^\s*ERROR!\s*(?P<msg>.*)$")?,
                compile(r"(?i)^\s*error:\s*(?P<msg>.*)$")?,
                compile(r"^\s*FAILED\b[:\s]*(?P<msg>.*)$")?,
            ],
            completion: vec![compile(r"^\s*Success\.\s+Downloaded item\b")?],
        })
    }

    /// Append operator-supplied failure patterns.
    pub fn with_failure_patterns<S: AsRef<str>>(mut self, extra: &[S]) -> Result<Self> {
        for pattern in extra {
            self.failures.push(compile(pattern.as_ref())?);
        }
        Ok(self)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Failure message if `line` is a failure marker.
    pub(crate) fn match_failure(&self, line: &str) -> Option<String> {
        self.failures.iter().find_map(|re| {
            re.captures(line).map(|caps| {
                caps.name("msg")
                    .map(|m| m.as_str().trim())
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| line.trim())
                    .to_string()
            })
        })
    }

    pub(crate) fn is_completion(&self, line: &str) -> bool {
        self.completion.iter().any(|re| re.is_match(line))
    }

    /// Percentage on `line` as a fraction in `[0, 1]`.
    pub(crate) fn match_fraction(&self, line: &str) -> Option<f64> {
        self.percent.iter().find_map(|re| {
            re.captures(line)
                .and_then(|caps| caps.name("pct"))
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .map(|pct| (pct / 100.0).clamp(0.0, 1.0))
        })
    }

    pub(crate) fn match_phase(&self, line: &str) -> Option<Phase> {
        self.phases
            .iter()
            .find(|(re, _)| re.is_match(line))
            .map(|(_, phase)| *phase)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        JobsError::ConfigError(format!("invalid progress pattern '{pattern}': {e}"))
    })
}
