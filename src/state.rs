use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::{
    auth::{jwt::JwtKeys, revocation::RevocationList},
    config::{AppConfig, JwtConfig, StoreConfig, DEFAULT_REVOCATION_CAPACITY},
    store::{BoundedStore, MemoryStore, PgStore, RecordStore},
};

/// Shared per-process resources. Built once before the first request and
/// cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub config: Arc<AppConfig>,
    pub keys: JwtKeys,
    pub revoked: RevocationList,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let db = PgPoolOptions::new()
            .max_connections(config.store.max_connections)
            .acquire_timeout(config.store.timeout())
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
            tracing::warn!(error = %e, "migration failed; continuing");
        }

        let pg = PgStore::new(db, config.store.timeout_ms);
        let store = BoundedStore::new(Arc::new(pg), config.store.clone());
        Ok(Self::from_parts(Arc::new(store), Arc::new(config)))
    }

    pub fn from_parts(store: Arc<dyn RecordStore>, config: Arc<AppConfig>) -> Self {
        Self {
            store,
            keys: JwtKeys::new(&config.jwt),
            revoked: RevocationList::new(config.revocation_capacity),
            config,
        }
    }

    /// State over an in-memory store, for tests and local experiments.
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        let config = Arc::new(AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            database_url: "memory://".into(),
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
            revocation_capacity: DEFAULT_REVOCATION_CAPACITY,
            store: StoreConfig {
                timeout_ms: 1_000,
                retry_backoff_ms: 1,
                ..StoreConfig::default()
            },
        });
        let bounded = BoundedStore::new(store, config.store.clone());
        Self::from_parts(Arc::new(bounded), config)
    }
}
