// src/limits.rs

//! Resolution of an identity's limits at submission time.

use std::collections::HashMap;
use std::fmt::Debug;

use crate::types::{IdentityId, Limits};

pub trait LimitsProvider: Send + Sync + Debug {
    fn limits_for(&self, identity: &IdentityId) -> Limits;
}

/// Fixed default limits plus per-identity overrides, usually built from the
/// `[limits]` config section. Override fields replace default fields one by
/// one; unset override fields fall back to the default.
#[derive(Debug, Clone, Default)]
pub struct StaticLimitsProvider {
    default: Limits,
    overrides: HashMap<IdentityId, Limits>,
}

impl StaticLimitsProvider {
    pub fn new(default: Limits) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, identity: impl Into<IdentityId>, limits: Limits) -> Self {
        self.overrides.insert(identity.into(), limits);
        self
    }
}

impl LimitsProvider for StaticLimitsProvider {
    fn limits_for(&self, identity: &IdentityId) -> Limits {
        match self.overrides.get(identity) {
            Some(over) => self.default.overlay(*over),
            None => self.default,
        }
    }
}
