use std::sync::Arc;

use crate::adapter::AdapterInner;
use crate::model::ModelRef;
use crate::run::RunBuilder;

/// Configuration used to create a `Thread`.
#[derive(Clone, Debug)]
pub struct ThreadConfig {
    /// Human-readable thread name (useful for logs).
    pub name: String,
}

impl ThreadConfig {
    /// Creates a named thread config.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Logical conversation that runs belong to.
///
/// Threads are in-memory handles; history is supplied per run by the caller.
#[derive(Clone)]
pub struct Thread {
    pub(crate) adapter: Arc<AdapterInner>,
    pub(crate) thread_id: uuid::Uuid,
    pub(crate) config: ThreadConfig,
}

impl Thread {
    pub(crate) fn new(adapter: Arc<AdapterInner>, config: ThreadConfig) -> Self {
        Self {
            adapter,
            thread_id: uuid::Uuid::new_v4(),
            config,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.thread_id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Starts building a run for the given model.
    pub fn run(&self, model: ModelRef) -> RunBuilder {
        RunBuilder::new(
            self.adapter.clone(),
            self.thread_id,
            self.config.name.clone(),
            model,
        )
    }
}
