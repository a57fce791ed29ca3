use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::create_pool;
use crate::memory::MemoryStore;
use crate::pg_store::PgStore;
use crate::store::Repositories;

#[derive(Clone)]
pub struct NotifyContext {
    pub config: Arc<Config>,
    pub repositories: Repositories,
    pub clock: Arc<dyn Clock>,
}

impl NotifyContext {
    /// Connects to Postgres when `DATABASE_URL` is set, otherwise keeps
    /// records in process memory.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let repositories = if config.database.url.is_some() {
            let pool = create_pool(&config.database).await?;
            Repositories::from_store(Arc::new(PgStore::new(pool)))
        } else {
            tracing::warn!("DATABASE_URL not set, using in-memory record store");
            Repositories::from_store(Arc::new(MemoryStore::new()))
        };

        Ok(Self::with_repositories(config, repositories, Arc::new(SystemClock)))
    }

    pub fn with_repositories(
        config: Config,
        repositories: Repositories,
        clock: Arc<dyn Clock>,
    ) -> Self {
        NotifyContext {
            config: Arc::new(config),
            repositories,
            clock,
        }
    }
}
