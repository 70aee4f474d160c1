//! Agent/Provider directory and transport wiring
//!
//! The worker pool never talks to an LLM backend directly. It asks a
//! `ProviderDirectory` to resolve a provider ID into connection parameters,
//! then asks a `TransportConnector` to turn those parameters into a
//! `TaskTransport` the worker is bound to for its whole lifetime.

use crate::config::ProviderConfig;
use sdk::errors::EngineError;
use sdk::transport::TaskTransport;
use sdk::types::{Agent, ConnectionParams};
use std::collections::HashMap;
use std::sync::Arc;

pub mod chat;

pub use chat::{ChatCompletionConnector, ChatCompletionTransport};

/// Resolves provider IDs to connection parameters
pub trait ProviderDirectory: Send + Sync {
    /// Resolve `provider_id`, failing with `ProviderNotFound` if unknown
    fn resolve(&self, provider_id: &str) -> Result<ConnectionParams, EngineError>;
}

/// Builds the transport a worker uses to reach its provider
pub trait TransportConnector: Send + Sync {
    fn connect(
        &self,
        agent: &Agent,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn TaskTransport>, EngineError>;
}

/// Provider directory backed by the `[[providers]]` config section
#[derive(Debug, Clone, Default)]
pub struct StaticProviderDirectory {
    providers: HashMap<String, ProviderConfig>,
}

impl StaticProviderDirectory {
    pub fn new(providers: impl IntoIterator<Item = ProviderConfig>) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl ProviderDirectory for StaticProviderDirectory {
    fn resolve(&self, provider_id: &str) -> Result<ConnectionParams, EngineError> {
        let provider = self
            .providers
            .get(provider_id)
            .ok_or_else(|| EngineError::ProviderNotFound(provider_id.to_string()))?;

        // Keys live in the environment, never in the config file
        let api_key = provider
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty());

        Ok(ConnectionParams {
            provider_id: provider.id.clone(),
            name: provider.name.clone(),
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            model: provider.model.clone(),
            api_key,
        })
    }
}
