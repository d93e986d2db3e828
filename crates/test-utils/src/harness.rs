#![allow(dead_code)]

use std::sync::Arc;

use workshop_jobs::JobScheduler;
use workshop_jobs::audit::MemoryAuditSink;
use workshop_jobs::clock::{Clock, SystemClock};
use workshop_jobs::limits::{LimitsProvider, StaticLimitsProvider};
use workshop_jobs::store::InMemoryJobStore;

use crate::builders::EngineConfigBuilder;
use crate::tool::ToolScript;

/// A scheduler wired to in-memory collaborators the test can inspect.
pub struct Harness {
    pub scheduler: JobScheduler,
    pub store: Arc<InMemoryJobStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub tool: ToolScript,
}

impl Harness {
    /// Defaults: no limits, system clock, test-friendly durations.
    pub fn new(tool: ToolScript) -> Self {
        HarnessBuilder::new(tool).build()
    }

    pub fn builder(tool: ToolScript) -> HarnessBuilder {
        HarnessBuilder::new(tool)
    }
}

pub struct HarnessBuilder {
    tool: ToolScript,
    config: EngineConfigBuilder,
    limits: Arc<dyn LimitsProvider>,
    clock: Arc<dyn Clock>,
}

impl HarnessBuilder {
    fn new(tool: ToolScript) -> Self {
        Self {
            config: EngineConfigBuilder::for_tool(&tool),
            tool,
            limits: Arc::new(StaticLimitsProvider::default()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(mut self, f: impl FnOnce(EngineConfigBuilder) -> EngineConfigBuilder) -> Self {
        self.config = f(self.config);
        self
    }

    pub fn limits(mut self, limits: impl LimitsProvider + 'static) -> Self {
        self.limits = Arc::new(limits);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Harness {
        let store = Arc::new(InMemoryJobStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let scheduler = JobScheduler::builder(self.config.build())
            .store(store.clone())
            .audit(audit.clone())
            .limits(self.limits)
            .clock(self.clock)
            .build();

        Harness {
            scheduler,
            store,
            audit,
            tool: self.tool,
        }
    }
}
