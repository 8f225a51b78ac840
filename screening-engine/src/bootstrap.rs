//! Wiring configured sources and cache backends into live components

use crate::cache::{RedisStore, ResultCache};
use crate::config::{CacheBackend, EngineConfig, Provider, SourceConfig};
use crate::error::{Result, ScreeningError};
use crate::registry::{SourceRegistry, SourceSettings};
use crate::sources::ofac::SDN_LIST_NAME;
use crate::sources::{
    EuAdapter, OfacAdapter, OpenSanctionsAdapter, SourceAdapter, StaticListAdapter, Transport, UnAdapter,
};
use std::sync::Arc;
use tracing::info;

pub fn build_adapter(
    source_id: &str,
    config: &SourceConfig,
    transport: Arc<dyn Transport>,
) -> Result<Arc<dyn SourceAdapter>> {
    let endpoint = || {
        config
            .endpoint
            .clone()
            .ok_or_else(|| ScreeningError::Config(format!("source {} needs an endpoint", source_id)))
    };
    let max_age = config.max_age();

    let adapter: Arc<dyn SourceAdapter> = match config.provider {
        Provider::Ofac => {
            let list_name = config.list_name.as_deref().unwrap_or(SDN_LIST_NAME);
            Arc::new(OfacAdapter::new(source_id, list_name, endpoint()?, transport, max_age))
        }
        Provider::Un => Arc::new(UnAdapter::new(source_id, endpoint()?, transport, max_age)),
        Provider::Eu => Arc::new(EuAdapter::new(
            source_id,
            endpoint()?,
            config.fallback_endpoint.clone(),
            transport,
            max_age,
        )),
        Provider::OpenSanctions => Arc::new(OpenSanctionsAdapter::new(source_id, endpoint()?, transport, max_age)),
        Provider::Static => {
            let path = config
                .path
                .clone()
                .ok_or_else(|| ScreeningError::Config(format!("static source {} needs a path", source_id)))?;
            Arc::new(StaticListAdapter::from_file(source_id, path))
        }
    };
    Ok(adapter)
}

/// Registers every configured source, enabled or not
pub fn build_registry(config: &EngineConfig, transport: Arc<dyn Transport>) -> Result<SourceRegistry> {
    let registry = SourceRegistry::new();
    let default_timeout = config.orchestrator.default_source_timeout();

    for (source_id, source) in &config.sources {
        let adapter = build_adapter(source_id, source, transport.clone())?;
        registry.register(adapter, SourceSettings::from_config(source, default_timeout));
    }

    Ok(registry)
}

pub async fn build_cache(config: &EngineConfig) -> Result<ResultCache> {
    let ttl = config.cache.result_ttl();
    match &config.cache.backend {
        CacheBackend::Memory => {
            info!("Using in-memory result cache");
            Ok(ResultCache::in_memory(ttl))
        }
        CacheBackend::Redis { url } => {
            let store = RedisStore::connect(url, config.cache.key_prefix.clone())
                .await
                .map_err(|e| ScreeningError::Config(e.to_string()))?;
            Ok(ResultCache::new(Arc::new(store), ttl))
        }
    }
}
