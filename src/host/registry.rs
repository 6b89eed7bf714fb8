use indexmap::IndexMap;

use crate::engine::{Limits, v0_14, v0_16};
use crate::error::{HostError, HostResult};
use crate::runner::{AiScript014Runner, AiScript016Runner, OutputSink, Runner};

/// Builds a runner for one release.
pub type RunnerFactory = fn(OutputSink, &Limits) -> Box<dyn Runner>;

/// Ordered table of supported releases, oldest first.
#[derive(Clone, Default)]
pub struct RunnerRegistry {
    factories: IndexMap<&'static str, RunnerFactory>,
}

impl RunnerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every release shipped in this crate
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(v0_14::VERSION, |sink, limits| {
            Box::new(AiScript014Runner::with_limits(sink, limits))
        });
        registry.register(v0_16::VERSION, |sink, limits| {
            Box::new(AiScript016Runner::with_limits(sink, limits))
        });
        registry
    }

    /// Add or replace a release. A new release becomes the latest.
    pub fn register(&mut self, version: &'static str, factory: RunnerFactory) {
        self.factories.insert(version, factory);
    }

    /// Registered releases, oldest first
    pub fn versions(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Most recently registered release
    pub fn latest(&self) -> Option<&'static str> {
        self.factories.keys().last().copied()
    }

    /// Whether `version` is registered
    pub fn contains(&self, version: &str) -> bool {
        self.factories.contains_key(version)
    }

    /// Build a runner for `version`
    pub fn create(
        &self,
        version: &str,
        sink: OutputSink,
        limits: &Limits,
    ) -> HostResult<Box<dyn Runner>> {
        let factory = self
            .factories
            .get(version)
            .ok_or_else(|| HostError::UnknownVersion(version.to_string()))?;
        Ok(factory(sink, limits))
    }
}
