//! Context factories and the named-target registry.
//!
//! A [`ContextFactory`] is bound to one connection source and one schema
//! qualifier. It is cheap to clone and safe to share; every
//! [`create`](ContextFactory::create) call yields an independent context
//! with its own connection.
//!
//! [`ContextFactories`] maps target ids (`production`, `sales`, ...) to
//! factories built from configuration.

use crate::config::{Config, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_QUERY_TIMEOUT_SECS};
use crate::db::context::Context;
use crate::db::executor::{SessionFlags, bounded};
use crate::db::pool::{DbPool, create_pool};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionConfig, DatabaseType, TransactionSpec};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Settings every context of a factory shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    /// Timeout for statements that do not set their own.
    pub default_timeout: Duration,
    /// Bound on acquiring or opening a connection.
    pub connect_timeout: Duration,
    /// Allow streaming multi-type reads.
    pub streaming_joins: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            streaming_joins: false,
        }
    }
}

impl From<&Config> for ContextOptions {
    fn from(config: &Config) -> Self {
        Self {
            default_timeout: config.query_timeout_duration(),
            connect_timeout: config.connect_timeout_duration(),
            streaming_joins: config.streaming_joins,
        }
    }
}

#[derive(Debug)]
struct FactoryInner {
    id: String,
    pool: DbPool,
    schema: Option<String>,
    options: ContextOptions,
}

/// Creates contexts for one (connection source, schema) pair.
#[derive(Debug, Clone)]
pub struct ContextFactory {
    inner: Arc<FactoryInner>,
}

impl ContextFactory {
    /// Create the connection source for `config` and bind a factory to it.
    pub async fn connect(config: &ConnectionConfig, options: ContextOptions) -> DbResult<Self> {
        let pool = create_pool(config, options.connect_timeout).await?;
        Ok(Self::from_pool(
            config.id.clone(),
            pool,
            config.schema.clone(),
            options,
        ))
    }

    /// Bind a factory to an existing connection source.
    pub fn from_pool(
        id: impl Into<String>,
        pool: DbPool,
        schema: Option<String>,
        options: ContextOptions,
    ) -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                id: id.into(),
                pool,
                schema: schema.filter(|s| !s.is_empty()),
                options,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn db_type(&self) -> DatabaseType {
        self.inner.pool.db_type()
    }

    pub fn schema(&self) -> Option<&str> {
        self.inner.schema.as_deref()
    }

    pub fn options(&self) -> &ContextOptions {
        &self.inner.options
    }

    /// Open a context, beginning a transaction when `spec` is given.
    pub async fn create(&self, spec: Option<TransactionSpec>) -> DbResult<Context> {
        self.create_with(spec, &CancellationToken::new()).await
    }

    pub async fn create_with(
        &self,
        spec: Option<TransactionSpec>,
        cancel: &CancellationToken,
    ) -> DbResult<Context> {
        if cancel.is_cancelled() {
            return Err(DbError::cancelled("create_context"));
        }
        let options = &self.inner.options;
        let connect_secs = options.connect_timeout.as_secs();

        let mut conn = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DbError::cancelled("create_context")),
            acquired = tokio::time::timeout(options.connect_timeout, self.inner.pool.acquire()) => {
                acquired.unwrap_or_else(|_| {
                    Err(DbError::connection(
                        format!(
                            "Timed out after {connect_secs}s acquiring a connection for '{}'",
                            self.inner.id
                        ),
                        "Check that the server is reachable or raise --connect-timeout",
                    ))
                })
            }
        }?;

        let mut flags = SessionFlags::default();
        if let Some(spec) = spec {
            let begun = bounded(
                &mut flags,
                "begin",
                options.default_timeout,
                cancel,
                conn.begin(spec.isolation),
            )
            .await;
            if let Err(e) = begun {
                conn.discard();
                return Err(e);
            }
            flags.in_transaction = true;
        }

        let context = Context::new(
            self.inner.id.clone(),
            conn,
            flags,
            self.inner.schema.clone(),
            options.clone(),
        );
        debug!(
            context_id = %context.id(),
            target_id = %self.inner.id,
            isolation = ?spec.map(|s| s.isolation),
            "Context opened"
        );
        Ok(context)
    }

    /// Run `f` with a fresh context and close it afterwards, whatever `f`
    /// returned. Work `f` leaves uncommitted is rolled back.
    pub async fn with_context<T, F>(&self, spec: Option<TransactionSpec>, f: F) -> DbResult<T>
    where
        F: for<'c> FnOnce(&'c mut Context) -> BoxFuture<'c, DbResult<T>>,
    {
        let mut context = self.create(spec).await?;
        let result = f(&mut context).await;
        context.close().await;
        result
    }

    /// Close the connection source. Contexts still open keep working until
    /// they release their connection.
    pub async fn close(&self) {
        self.inner.pool.close().await;
        info!(target_id = %self.inner.id, "Factory closed");
    }
}

/// Registry of factories by target id.
#[derive(Debug, Clone, Default)]
pub struct ContextFactories {
    factories: Arc<RwLock<HashMap<String, ContextFactory>>>,
}

impl ContextFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a factory for every target in `config`.
    pub async fn from_config(config: &Config) -> DbResult<Self> {
        let options = ContextOptions::from(config);
        let registry = Self::new();
        let targets = config.parse_targets()?;
        info!(count = targets.len(), "Connecting to configured targets");

        for target in targets {
            let connection = target.into_connection_config()?;
            if let Err(e) = registry.connect(connection, options.clone()).await {
                registry.close_all().await;
                return Err(e);
            }
        }
        Ok(registry)
    }

    /// Create a factory for `config` and register it under `config.id`.
    pub async fn connect(
        &self,
        config: ConnectionConfig,
        options: ContextOptions,
    ) -> DbResult<ContextFactory> {
        if self.exists(&config.id).await {
            return Err(DbError::configuration(format!(
                "Target '{}' already exists",
                config.id
            )));
        }

        info!(
            target_id = %config.id,
            db_type = %config.db_type,
            schema = ?config.schema,
            "Registering target"
        );
        let factory = ContextFactory::connect(&config, options).await?;

        // Re-check after the connect await; close the duplicate outside the lock.
        let duplicate = {
            let mut factories = self.factories.write().await;
            if factories.contains_key(&config.id) {
                Some(factory.clone())
            } else {
                factories.insert(config.id.clone(), factory.clone());
                None
            }
        };
        if let Some(duplicate) = duplicate {
            duplicate.close().await;
            return Err(DbError::configuration(format!(
                "Target '{}' already exists",
                config.id
            )));
        }
        Ok(factory)
    }

    /// Register an already built factory.
    pub async fn register(&self, factory: ContextFactory) -> DbResult<()> {
        let mut factories = self.factories.write().await;
        if factories.contains_key(factory.id()) {
            return Err(DbError::configuration(format!(
                "Target '{}' already exists",
                factory.id()
            )));
        }
        factories.insert(factory.id().to_string(), factory);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> DbResult<ContextFactory> {
        let factories = self.factories.read().await;
        factories.get(id).cloned().ok_or_else(|| {
            DbError::configuration(format!(
                "Unknown target '{id}'. Configure it with --target {id}=<url>"
            ))
        })
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.factories.read().await.contains_key(id)
    }

    /// Registered target ids, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let factories = self.factories.read().await;
        let mut ids: Vec<String> = factories.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.factories.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.factories.read().await.is_empty()
    }

    /// Close every factory and clear the registry.
    pub async fn close_all(&self) {
        let mut factories = self.factories.write().await;
        for (_, factory) in factories.drain() {
            factory.close().await;
        }
        info!("All targets closed");
    }
}
