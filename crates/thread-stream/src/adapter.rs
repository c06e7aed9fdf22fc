use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::errors::AdapterError;
use crate::model::ProviderId;
use crate::provider::ProviderAdapter;
use crate::thread::{Thread, ThreadConfig};
use crate::tool::ToolRegistry;

pub(crate) struct AdapterInner {
    providers: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
    pub(crate) tools: ToolRegistry,
}

impl AdapterInner {
    pub(crate) fn provider(&self, id: &ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.get(id).cloned()
    }
}

/// Entry point for creating threads and streaming runs.
#[derive(Clone)]
pub struct ThreadAdapter {
    pub(crate) inner: Arc<AdapterInner>,
}

impl ThreadAdapter {
    /// Starts a builder for registering providers and tools.
    pub fn builder() -> ThreadAdapterBuilder {
        ThreadAdapterBuilder::default()
    }

    /// Creates a logical thread for grouping related runs.
    pub fn thread(&self, config: ThreadConfig) -> Thread {
        Thread::new(self.inner.clone(), config)
    }

    /// Tools shared by every run started from this adapter.
    pub fn tools(&self) -> &ToolRegistry {
        &self.inner.tools
    }
}

/// Builder used to register provider adapters before creating a `ThreadAdapter`.
#[derive(Default)]
pub struct ThreadAdapterBuilder {
    providers: Vec<Arc<dyn ProviderAdapter>>,
    tools: ToolRegistry,
}

impl ThreadAdapterBuilder {
    /// Registers a provider adapter.
    ///
    /// Register one adapter per provider id (for example one `openai` adapter).
    pub fn register_provider(mut self, provider: Arc<dyn ProviderAdapter>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Sets the tool registry used to resolve tool calls.
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Builds the adapter and validates provider registration (including duplicates).
    pub fn build(self) -> Result<ThreadAdapter, AdapterError> {
        let mut map: HashMap<ProviderId, Arc<dyn ProviderAdapter>> = HashMap::new();
        let mut seen: HashSet<ProviderId> = HashSet::new();
        for provider in self.providers {
            let id = provider.id();
            if !seen.insert(id.clone()) {
                return Err(AdapterError::Config(format!(
                    "duplicate provider registration: {id}"
                )));
            }
            map.insert(id, provider);
        }
        Ok(ThreadAdapter {
            inner: Arc::new(AdapterInner {
                providers: map,
                tools: self.tools,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use crate::provider::{ProviderRequest, ProviderStreamHandle};
    use crate::tool::ToolDeclaration;
    use tokio_util::sync::CancellationToken;

    struct DummyProvider;

    #[async_trait::async_trait]
    impl ProviderAdapter for DummyProvider {
        fn id(&self) -> ProviderId {
            ProviderId::new("dummy")
        }

        async fn start_stream(
            &self,
            _req: ProviderRequest,
            _cancel: CancellationToken,
        ) -> Result<ProviderStreamHandle, ProviderError> {
            unreachable!("not used in this test")
        }
    }

    #[test]
    fn build_rejects_duplicate_provider_ids() {
        let result = ThreadAdapter::builder()
            .register_provider(Arc::new(DummyProvider))
            .register_provider(Arc::new(DummyProvider))
            .build();
        assert!(
            matches!(result, Err(AdapterError::Config(message)) if message.contains("duplicate provider"))
        );
    }

    #[test]
    fn tools_are_shared_with_the_adapter() {
        let adapter = ThreadAdapter::builder()
            .register_provider(Arc::new(DummyProvider))
            .tools(
                ToolRegistry::builder()
                    .declaration(ToolDeclaration::new("confirm"))
                    .build()
                    .expect("tools"),
            )
            .build()
            .expect("adapter");
        assert_eq!(adapter.tools().declarations().len(), 1);
        assert!(adapter.inner.provider(&ProviderId::new("dummy")).is_some());
    }
}
