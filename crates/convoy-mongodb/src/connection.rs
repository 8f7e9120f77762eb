//! Pooled connection to the deployment behind a [`MongoStore`]
//!
//! [`MongoStore`]: crate::store::MongoStore

use bson::{doc, Document};
use convoy_common::{ConvoyError, Result};
use mongodb::{options::ClientOptions, Client, Collection, Database};
use std::time::Duration;

/// Pool settings tuned for a batching workload.
///
/// The scheduler coalesces each round into a handful of concurrent store
/// calls (one aggregation per model group, one write batch per
/// collection), so the pool stays small: two warm connections cover
/// steady state and the ceiling only matters when rounds overlap.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    min_pool_size: u32,
    max_pool_size: u32,
    max_idle_time: Option<Duration>,
    connect_timeout: Duration,
    server_selection_timeout: Duration,
    app_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: 2,
            max_pool_size: 8,
            max_idle_time: None,
            connect_timeout: Duration::from_secs(10),
            server_selection_timeout: Duration::from_secs(30),
            app_name: "convoy".to_string(),
        }
    }
}

impl PoolConfig {
    /// Start from the batching-workload defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the pool size
    pub fn with_pool_bounds(mut self, min: u32, max: u32) -> Self {
        self.min_pool_size = min;
        self.max_pool_size = max;
        self
    }

    /// Close connections idle longer than this
    pub fn with_max_idle_time(mut self, idle: Duration) -> Self {
        self.max_idle_time = Some(idle);
        self
    }

    /// Time limit for establishing a single connection
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Time limit for picking a server to run an operation on
    pub fn with_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = timeout;
        self
    }

    /// Application name reported to the server
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    fn apply(self, options: &mut ClientOptions) {
        options.min_pool_size = Some(self.min_pool_size);
        options.max_pool_size = Some(self.max_pool_size);
        options.max_idle_time = self.max_idle_time;
        options.connect_timeout = Some(self.connect_timeout);
        options.server_selection_timeout = Some(self.server_selection_timeout);
        options.app_name = Some(self.app_name);
    }
}

/// Established client plus the default database named by the connection
/// string; collections resolve against that database.
pub struct Connection {
    client: Client,
    database: Database,
}

impl Connection {
    /// Connect with the default pool settings
    pub async fn connect(uri: &str) -> Result<Self> {
        Self::connect_with(uri, PoolConfig::default()).await
    }

    /// Connect with explicit pool settings
    pub async fn connect_with(uri: &str, config: PoolConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(uri).await?;
        config.apply(&mut options);

        let client = Client::with_options(options)?;
        let database = client.default_database().ok_or_else(|| {
            ConvoyError::Connection("connection string names no default database".to_string())
        })?;
        tracing::debug!(database = database.name(), "mongodb connection established");

        Ok(Self { client, database })
    }

    /// The underlying driver client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The default database
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Name of the default database
    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    /// A collection in the default database
    pub fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }

    /// Round-trip a ping to verify the deployment is reachable
    pub async fn ping(&self) -> Result<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| ConvoyError::Connection(format!("ping failed: {}", e)))?;
        Ok(())
    }
}
