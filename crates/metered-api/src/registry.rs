//! One metered client per configured provider

use crate::client::MeteredClient;
use crate::config::MeteredConfig;
use crate::error::{MeteredError, Result};
use crate::store::UsageStore;
use crate::transport::{HttpTransport, Transport};
use std::collections::HashMap;
use std::sync::Arc;

/// Clients for every provider of a [`MeteredConfig`]
#[derive(Debug)]
pub struct ProviderRegistry {
    clients: HashMap<String, Arc<MeteredClient>>,
}

impl ProviderRegistry {
    /// Open a store per provider and build clients sharing one HTTP transport
    pub fn open(config: &MeteredConfig) -> Result<Self> {
        config.validate()?;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config.request_timeout)?);
        Self::open_with_transport(config, transport)
    }

    /// Same as [`open`](Self::open) with a caller-supplied transport
    pub fn open_with_transport(
        config: &MeteredConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        let mut clients = HashMap::new();

        for provider in &config.providers {
            let store = Arc::new(UsageStore::open(&config.database_path, &provider.name)?);
            let client = MeteredClient::new(provider.clone(), store, Arc::clone(&transport))?;
            tracing::info!(
                provider = %provider.name,
                keys = provider.api_keys.len(),
                daily_limit = provider.daily_limit,
                "provider registered"
            );
            clients.insert(provider.name.clone(), Arc::new(client));
        }

        Ok(Self { clients })
    }

    /// Client for a provider
    pub fn get(&self, name: &str) -> Option<Arc<MeteredClient>> {
        self.clients.get(name).cloned()
    }

    /// Client for a provider, or a configuration error naming it
    pub fn require(&self, name: &str) -> Result<Arc<MeteredClient>> {
        self.get(name)
            .ok_or_else(|| MeteredError::Config(format!("provider not configured: {name}")))
    }

    /// Registered provider names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.clients.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Close every provider store
    ///
    /// All stores are closed even if one fails; the first failure is returned.
    pub fn close(&self) -> Result<()> {
        let mut first_err = None;
        for client in self.clients.values() {
            if let Err(e) = client.close() {
                tracing::warn!(provider = %client.provider().name, error = %e, "failed to close store");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
