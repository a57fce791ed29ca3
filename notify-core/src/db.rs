use anyhow::{anyhow, Result};
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use std::sync::Arc;
use tokio::time::Duration;
use tracing;

use crate::config::DatabaseConfig;

pub type DbPool = Pool<AsyncPgConnection>;
pub type DbConnection = Object<AsyncPgConnection>;

const CONNECT_ATTEMPTS: u32 = 5;

pub async fn create_pool(config: &DatabaseConfig) -> Result<Arc<DbPool>> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| anyhow!("DATABASE_URL is not configured"))?;

    tracing::info!("Setting up database connection pool");
    tracing::info!("Database URL: {}", mask_database_url(url));

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(url);

    let pool = Pool::builder(manager)
        .max_size(config.max_connections as usize)
        .build()
        .map_err(|e| anyhow!("Failed to create connection pool: {}", e))?;

    tracing::info!("Database connection pool created, testing connection...");

    let mut last_error = None;
    for attempt in 1..=CONNECT_ATTEMPTS {
        tracing::info!("Connection attempt {} of {}", attempt, CONNECT_ATTEMPTS);

        match tokio::time::timeout(Duration::from_secs(15), pool.get()).await {
            Ok(Ok(_conn)) => {
                tracing::info!("Database connection established successfully!");
                return Ok(Arc::new(pool));
            }
            Ok(Err(e)) => {
                tracing::warn!("Database connection failed on attempt {}: {}", attempt, e);
                last_error = Some(anyhow!("Database connection failed: {}", e));
            }
            Err(_) => {
                tracing::warn!("Database connection timed out on attempt {}", attempt);
                last_error = Some(anyhow!("Database connection timed out"));
            }
        }

        if attempt < CONNECT_ATTEMPTS {
            let wait_time = Duration::from_secs(2_u64.pow(attempt - 1));
            tracing::info!("Waiting {:?} before retry...", wait_time);
            tokio::time::sleep(wait_time).await;
        }
    }

    tracing::error!("All database connection attempts failed");
    Err(last_error.unwrap_or_else(|| {
        anyhow!(
            "Failed to establish database connection after {} attempts",
            CONNECT_ATTEMPTS
        )
    }))
}

pub fn mask_database_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        let (before_at, after_at) = url.split_at(at_pos);
        if let Some(colon_pos) = before_at.rfind(':') {
            let (protocol_user, password) = before_at.split_at(colon_pos);
            if password.starts_with("://") {
                // postgres://user@host has no password to hide
                return url.to_string();
            }
            format!("{}:****{}", protocol_user, after_at)
        } else {
            url.to_string()
        }
    } else {
        "Invalid URL format".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_database_url_hides_password() {
        assert_eq!(
            mask_database_url("postgres://notify:s3cret@db:5432/notify"),
            "postgres://notify:****@db:5432/notify"
        );
    }

    #[test]
    fn test_mask_database_url_without_credentials() {
        assert_eq!(mask_database_url("localhost"), "Invalid URL format");
    }
}
