use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub dispatch: DispatchConfig,
    pub scheduler: SchedulerConfig,
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres URL. Without one the runner keeps records in memory.
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub base_retry_delay_secs: u64,
    pub max_retry_delay_secs: u64,
    pub default_max_retries: i32,
    pub queue_capacity: usize,
    pub worker_concurrency: usize,
    /// Age after which a `pending` row with no queued attempt is re-enqueued.
    pub pending_grace_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_retry_delay_secs: 60,
            max_retry_delay_secs: 3600,
            default_max_retries: 3,
            queue_capacity: 1024,
            worker_concurrency: 16,
            pending_grace_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub scheduled_interval_ms: u64,
    pub retry_interval_ms: u64,
    pub pending_interval_ms: u64,
    pub health_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduled_interval_ms: 1000,
            retry_interval_ms: 1000,
            pending_interval_ms: 30_000,
            health_interval_secs: 60,
        }
    }
}

/// Channel adapter credentials. Any adapter whose credentials are missing
/// stays registered but reports itself unhealthy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub resend_api_key: Option<String>,
    pub resend_from_email: Option<String>,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_from_number: Option<String>,
    pub apns_bundle_id: Option<String>,
    pub apns_key_id: Option<String>,
    pub apns_team_id: Option<String>,
    pub apns_key_path: Option<String>,
    pub apns_key_content: Option<String>, // Base64 encoded key content (alternative to path)
    pub fcm_server_key: Option<String>,
    pub webhook_signing_secret: Option<String>,
    /// none | bearer | basic | api_key
    pub webhook_auth_type: Option<String>,
    pub webhook_auth_token: Option<String>,
    pub webhook_auth_header: Option<String>,
    pub webhook_timeout_secs: u64,
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();

        let dispatch_defaults = DispatchConfig::default();
        let scheduler_defaults = SchedulerConfig::default();

        Config {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
                max_connections: parsed_or("DATABASE_MAX_CONNECTIONS", 10),
            },
            dispatch: DispatchConfig {
                base_retry_delay_secs: parsed_or(
                    "RETRY_BASE_DELAY_SECS",
                    dispatch_defaults.base_retry_delay_secs,
                ),
                max_retry_delay_secs: parsed_or(
                    "RETRY_MAX_DELAY_SECS",
                    dispatch_defaults.max_retry_delay_secs,
                ),
                default_max_retries: parsed_or(
                    "DEFAULT_MAX_RETRIES",
                    dispatch_defaults.default_max_retries,
                ),
                queue_capacity: parsed_or("DELIVERY_QUEUE_CAPACITY", dispatch_defaults.queue_capacity),
                worker_concurrency: parsed_or("DELIVERY_WORKERS", dispatch_defaults.worker_concurrency),
                pending_grace_secs: parsed_or(
                    "PENDING_GRACE_SECS",
                    dispatch_defaults.pending_grace_secs,
                ),
            },
            scheduler: SchedulerConfig {
                scheduled_interval_ms: parsed_or(
                    "SCHEDULED_POLL_INTERVAL_MS",
                    scheduler_defaults.scheduled_interval_ms,
                ),
                retry_interval_ms: parsed_or(
                    "RETRY_POLL_INTERVAL_MS",
                    scheduler_defaults.retry_interval_ms,
                ),
                pending_interval_ms: parsed_or(
                    "PENDING_POLL_INTERVAL_MS",
                    scheduler_defaults.pending_interval_ms,
                ),
                health_interval_secs: parsed_or(
                    "HEALTH_CHECK_INTERVAL_SECS",
                    scheduler_defaults.health_interval_secs,
                ),
            },
            delivery: DeliveryConfig {
                resend_api_key: env::var("RESEND_API_KEY").ok(),
                resend_from_email: env::var("RESEND_FROM_EMAIL").ok(),
                twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").ok(),
                twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").ok(),
                twilio_from_number: env::var("TWILIO_FROM_NUMBER").ok(),
                apns_bundle_id: env::var("APNS_BUNDLE_ID").ok(),
                apns_key_id: env::var("APNS_KEY_ID").ok(),
                apns_team_id: env::var("APNS_TEAM_ID").ok(),
                apns_key_path: env::var("APNS_KEY_PATH").ok(),
                apns_key_content: env::var("APNS_KEY_CONTENT").ok(),
                fcm_server_key: env::var("FCM_SERVER_KEY").ok(),
                webhook_signing_secret: env::var("WEBHOOK_SIGNING_SECRET").ok(),
                webhook_auth_type: env::var("WEBHOOK_AUTH_TYPE").ok(),
                webhook_auth_token: env::var("WEBHOOK_AUTH_TOKEN").ok(),
                webhook_auth_header: env::var("WEBHOOK_AUTH_HEADER").ok(),
                webhook_timeout_secs: parsed_or("WEBHOOK_TIMEOUT_SECS", 10),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_defaults_match_retry_policy() {
        let defaults = DispatchConfig::default();
        assert_eq!(defaults.base_retry_delay_secs, 60);
        assert_eq!(defaults.max_retry_delay_secs, 3600);
    }

    #[test]
    fn test_parsed_or_falls_back_on_garbage() {
        env::set_var("NOTIFY_TEST_GARBAGE_NUMBER", "not-a-number");
        assert_eq!(parsed_or("NOTIFY_TEST_GARBAGE_NUMBER", 7u64), 7);
        env::remove_var("NOTIFY_TEST_GARBAGE_NUMBER");
    }
}
