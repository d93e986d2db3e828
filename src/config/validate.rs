// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{JobsError, Result};
use crate::progress::PatternTable;
use crate::types::Limits;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::JobsError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_tool(cfg)?;
    validate_jobs(cfg)?;
    validate_progress(cfg)?;
    validate_hub(cfg)?;
    validate_limits(cfg)?;
    Ok(())
}

fn validate_tool(cfg: &RawConfigFile) -> Result<()> {
    if cfg.tool.path.as_os_str().is_empty() {
        return Err(JobsError::ConfigError(
            "[tool].path must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.jobs.max_runtime_seconds == 0 {
        return Err(JobsError::ConfigError(
            "[jobs].max_runtime_seconds must be >= 1 (got 0)".to_string(),
        ));
    }

    let step = cfg.jobs.progress_persist_step;
    if !(step > 0.0 && step <= 1.0) {
        return Err(JobsError::ConfigError(format!(
            "[jobs].progress_persist_step must be in (0, 1] (got {step})"
        )));
    }

    Ok(())
}

fn validate_progress(cfg: &RawConfigFile) -> Result<()> {
    // Compiling the table checks both the version and the extra regexes.
    PatternTable::builtin(cfg.progress.pattern_version)?
        .with_failure_patterns(&cfg.progress.failure_patterns)?;
    Ok(())
}

fn validate_hub(cfg: &RawConfigFile) -> Result<()> {
    if cfg.hub.subscriber_buffer == 0 {
        return Err(JobsError::ConfigError(
            "[hub].subscriber_buffer must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_limits(cfg: &RawConfigFile) -> Result<()> {
    check_limits("[limits.default]", &cfg.limits.default)?;
    for (identity, limits) in cfg.limits.identity.iter() {
        if identity.trim().is_empty() {
            return Err(JobsError::ConfigError(
                "[limits.identity] keys must not be empty".to_string(),
            ));
        }
        check_limits(&format!("[limits.identity.\"{identity}\"]"), limits)?;
    }
    Ok(())
}

/// Zero would deny every submission; leave the field out for "unbounded".
fn check_limits(section: &str, limits: &Limits) -> Result<()> {
    let zero = [
        ("max_concurrent", limits.max_concurrent.map(u64::from)),
        ("rate_per_minute", limits.rate_per_minute.map(u64::from)),
        ("quota_daily", limits.quota_daily),
        ("quota_monthly", limits.quota_monthly),
    ]
    .into_iter()
    .find(|(_, v)| *v == Some(0));

    if let Some((field, _)) = zero {
        return Err(JobsError::ConfigError(format!(
            "{section}.{field} must be >= 1 (got 0); omit it for no limit"
        )));
    }
    Ok(())
}
