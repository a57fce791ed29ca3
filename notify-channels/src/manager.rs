//! Registry of channel providers and their live configuration.
//!
//! Registry and configs sit behind `parking_lot` locks that are never held
//! across an `.await`: selection snapshots the candidate list, drops the
//! guard, then runs health checks.

use chrono::{DateTime, Duration, Utc};
use notify_core::store::ProviderConfigRepository;
use notify_core::{Channel, Clock, ProviderConfig, ProviderHealth, SystemClock};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ChannelError;
use crate::provider::ChannelProvider;

pub struct ProviderManager {
    providers: RwLock<HashMap<Channel, Vec<Arc<dyn ChannelProvider>>>>,
    configs: RwLock<HashMap<String, ProviderConfig>>,
    store: Option<Arc<dyn ProviderConfigRepository>>,
    clock: Arc<dyn Clock>,
}

impl Default for ProviderManager {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

fn window_elapsed(config: &ProviderConfig, now: DateTime<Utc>) -> bool {
    now - config.usage_window_start >= Duration::minutes(1)
}

impl ProviderManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
            store: None,
            clock,
        }
    }

    /// Persist config and health changes to `store` as they happen.
    pub fn with_store(mut self, store: Arc<dyn ProviderConfigRepository>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace in-memory configs with whatever the store holds. Usage
    /// counters start fresh.
    pub async fn load_configs(&self) -> anyhow::Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let stored = store.list_provider_configs().await?;
        let now = self.clock.now();
        let count = stored.len();

        let mut configs = self.configs.write();
        for mut config in stored {
            config.usage_count = 0;
            config.usage_window_start = now;
            configs.insert(config.name.clone(), config);
        }
        Ok(count)
    }

    pub fn register(&self, provider: Arc<dyn ChannelProvider>) {
        let name = provider.name().to_string();
        let channel = provider.channel();
        let rate_limit = provider.capabilities().rate_limit_per_minute as i32;

        self.providers
            .write()
            .entry(channel)
            .or_default()
            .push(provider);

        let now = self.clock.now();
        self.configs
            .write()
            .entry(name.clone())
            .or_insert_with(|| ProviderConfig::new(name.clone(), channel, rate_limit, now));

        tracing::info!(provider = %name, %channel, "Registered channel provider");
    }

    /// Providers registered for `channel`, in registration order.
    pub fn providers(&self, channel: Channel) -> Vec<Arc<dyn ChannelProvider>> {
        self.providers
            .read()
            .get(&channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Named selection returns that provider only when healthy; unnamed
    /// selection falls back through the channel's providers in order,
    /// skipping any whose config is marked `Down`.
    pub async fn select(
        &self,
        channel: Channel,
        name: Option<&str>,
    ) -> Result<Arc<dyn ChannelProvider>, ChannelError> {
        let candidates = self.providers(channel);

        match name.filter(|n| !n.is_empty()) {
            Some(name) => {
                let provider = candidates
                    .iter()
                    .rev()
                    .find(|p| p.name() == name)
                    .cloned()
                    .ok_or_else(|| ChannelError::ProviderNotFound(name.to_string()))?;
                provider
                    .health_check()
                    .await
                    .map_err(|_| ChannelError::ProviderNotHealthy(name.to_string()))?;
                Ok(provider)
            }
            None => {
                for provider in candidates {
                    if self.marked_down(provider.name()) {
                        tracing::debug!(provider = provider.name(), "Skipping provider marked down");
                        continue;
                    }
                    match provider.health_check().await {
                        Ok(()) => return Ok(provider),
                        Err(e) => {
                            tracing::debug!(
                                provider = provider.name(),
                                "Skipping unhealthy provider: {}",
                                e
                            );
                        }
                    }
                }
                Err(ChannelError::NoActiveProvider(channel))
            }
        }
    }

    /// Whether `name` is under its per-minute limit. Unknown providers and a
    /// limit of 0 are unlimited.
    pub fn check_rate_limit(&self, name: &str) -> bool {
        let now = self.clock.now();
        match self.configs.read().get(name) {
            None => true,
            Some(config) if config.rate_limit <= 0 => true,
            Some(config) if window_elapsed(config, now) => true,
            Some(config) => config.usage_count < config.rate_limit,
        }
    }

    pub fn increment_usage(&self, name: &str) {
        let now = self.clock.now();
        if let Some(config) = self.configs.write().get_mut(name) {
            if window_elapsed(config, now) {
                config.usage_count = 0;
                config.usage_window_start = now;
            }
            config.usage_count += 1;
        }
    }

    pub fn get_config(&self, name: &str) -> Option<ProviderConfig> {
        self.configs.read().get(name).cloned()
    }

    pub fn configs(&self) -> Vec<ProviderConfig> {
        let mut configs: Vec<_> = self.configs.read().values().cloned().collect();
        configs.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        configs
    }

    pub async fn save_config(&self, mut config: ProviderConfig) {
        config.updated_at = self.clock.now();
        self.configs
            .write()
            .insert(config.name.clone(), config.clone());
        self.persist(&config).await;
    }

    /// Returns false when no config exists under `name`.
    pub async fn update_health(&self, name: &str, health: ProviderHealth) -> bool {
        let now = self.clock.now();
        let updated = {
            let mut configs = self.configs.write();
            match configs.get_mut(name) {
                Some(config) => {
                    if config.health != health {
                        tracing::info!(provider = name, from = %config.health, to = %health, "Provider health changed");
                    }
                    config.health = health;
                    config.last_health_check = Some(now);
                    config.updated_at = now;
                    Some(config.clone())
                }
                None => None,
            }
        };

        match updated {
            Some(config) => {
                self.persist(&config).await;
                true
            }
            None => false,
        }
    }

    fn marked_down(&self, name: &str) -> bool {
        self.configs
            .read()
            .get(name)
            .map_or(false, |c| c.health == ProviderHealth::Down)
    }

    /// Probe every registered provider and record the outcome.
    pub async fn health_check_all(&self) -> Vec<(String, ProviderHealth)> {
        let all: Vec<Arc<dyn ChannelProvider>> = {
            let providers = self.providers.read();
            providers.values().flatten().cloned().collect()
        };

        let mut results = Vec::with_capacity(all.len());
        for provider in all {
            let health = match provider.health_check().await {
                Ok(()) => ProviderHealth::Healthy,
                Err(e) => {
                    tracing::warn!(provider = provider.name(), "Health check failed: {}", e);
                    ProviderHealth::Down
                }
            };
            self.update_health(provider.name(), health).await;
            results.push((provider.name().to_string(), health));
        }
        results
    }

    async fn persist(&self, config: &ProviderConfig) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_provider_config(config).await {
                tracing::error!(provider = %config.name, "Failed to persist provider config: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderCapabilities, SendResult};
    use async_trait::async_trait;
    use notify_core::store::ProviderConfigRepository;
    use notify_core::{ManualClock, MemoryStore, Notification};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubProvider {
        name: &'static str,
        channel: Channel,
        healthy: AtomicBool,
        rate_limit: u32,
    }

    impl StubProvider {
        fn new(name: &'static str, channel: Channel, healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                channel,
                healthy: AtomicBool::new(healthy),
                rate_limit: 0,
            })
        }
    }

    #[async_trait]
    impl ChannelProvider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(&self, _notification: &Notification) -> Result<SendResult, ChannelError> {
            Ok(SendResult::sent(None, None))
        }

        fn validate(&self, _notification: &Notification) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn health_check(&self) -> Result<(), ChannelError> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ChannelError::NotConfigured(self.name.to_string()))
            }
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                rate_limit_per_minute: self.rate_limit,
                ..Default::default()
            }
        }
    }

    #[tokio::test]
    async fn test_select_falls_back_past_unhealthy_provider() {
        let manager = ProviderManager::default();
        manager.register(StubProvider::new("primary", Channel::Email, false));
        manager.register(StubProvider::new("secondary", Channel::Email, true));

        let selected = manager.select(Channel::Email, None).await.unwrap();
        assert_eq!(selected.name(), "secondary");

        let selected = manager.select(Channel::Email, Some("")).await.unwrap();
        assert_eq!(selected.name(), "secondary");
    }

    #[tokio::test]
    async fn test_select_errors() {
        let manager = ProviderManager::default();
        manager.register(StubProvider::new("primary", Channel::Email, false));

        assert!(matches!(
            manager.select(Channel::Email, None).await,
            Err(ChannelError::NoActiveProvider(Channel::Email))
        ));
        assert!(matches!(
            manager.select(Channel::Email, Some("primary")).await,
            Err(ChannelError::ProviderNotHealthy(_))
        ));
        assert!(matches!(
            manager.select(Channel::Email, Some("missing")).await,
            Err(ChannelError::ProviderNotFound(_))
        ));
        assert!(matches!(
            manager.select(Channel::Sms, None).await,
            Err(ChannelError::NoActiveProvider(Channel::Sms))
        ));
    }

    #[tokio::test]
    async fn test_select_skips_provider_marked_down() {
        let manager = ProviderManager::default();
        manager.register(StubProvider::new("primary", Channel::Email, true));
        manager.register(StubProvider::new("secondary", Channel::Email, true));

        assert!(manager.update_health("primary", ProviderHealth::Down).await);
        let selected = manager.select(Channel::Email, None).await.unwrap();
        assert_eq!(selected.name(), "secondary");

        assert!(manager.update_health("primary", ProviderHealth::Degraded).await);
        let selected = manager.select(Channel::Email, None).await.unwrap();
        assert_eq!(selected.name(), "primary");
    }

    #[tokio::test]
    async fn test_named_selection_uses_last_registered() {
        let manager = ProviderManager::default();
        manager.register(StubProvider::new("dup", Channel::Sms, false));
        manager.register(StubProvider::new("dup", Channel::Sms, true));

        // Only the later, healthy registration can satisfy this.
        assert!(manager.select(Channel::Sms, Some("dup")).await.is_ok());
        assert_eq!(manager.providers(Channel::Sms).len(), 2);
    }

    #[test]
    fn test_rate_limit_window_resets() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = ProviderManager::new(clock.clone());
        manager.register(Arc::new(StubProvider {
            name: "limited",
            channel: Channel::Sms,
            healthy: AtomicBool::new(true),
            rate_limit: 2,
        }));

        assert!(manager.check_rate_limit("limited"));
        manager.increment_usage("limited");
        manager.increment_usage("limited");
        assert!(!manager.check_rate_limit("limited"));

        clock.advance(Duration::seconds(61));
        assert!(manager.check_rate_limit("limited"));
        manager.increment_usage("limited");
        assert_eq!(manager.get_config("limited").unwrap().usage_count, 1);

        assert!(manager.check_rate_limit("unknown"));
    }

    #[test]
    fn test_zero_rate_limit_is_unlimited() {
        let manager = ProviderManager::default();
        manager.register(StubProvider::new("free", Channel::Push, true));
        for _ in 0..100 {
            manager.increment_usage("free");
        }
        assert!(manager.check_rate_limit("free"));
    }

    #[tokio::test]
    async fn test_health_check_all_writes_through() {
        let store = Arc::new(MemoryStore::new());
        let manager = ProviderManager::default().with_store(store.clone());
        let flaky = StubProvider::new("flaky", Channel::Webhook, false);
        manager.register(flaky.clone());

        let results = manager.health_check_all().await;
        assert_eq!(results, vec![("flaky".to_string(), ProviderHealth::Down)]);

        let persisted = store.get_provider_config("flaky").await.unwrap().unwrap();
        assert_eq!(persisted.health, ProviderHealth::Down);
        assert!(persisted.last_health_check.is_some());

        flaky.healthy.store(true, Ordering::SeqCst);
        manager.health_check_all().await;
        assert_eq!(
            manager.get_config("flaky").unwrap().health,
            ProviderHealth::Healthy
        );
    }

    #[tokio::test]
    async fn test_load_configs_from_store() {
        let store = Arc::new(MemoryStore::new());
        let mut saved = ProviderConfig::new("resend", Channel::Email, 10, Utc::now());
        saved.priority = 5;
        saved.usage_count = 9;
        store.save_provider_config(&saved).await.unwrap();

        let manager = ProviderManager::default().with_store(store);
        assert_eq!(manager.load_configs().await.unwrap(), 1);

        let loaded = manager.get_config("resend").unwrap();
        assert_eq!(loaded.priority, 5);
        assert_eq!(loaded.usage_count, 0);
        assert!(!manager.update_health("missing", ProviderHealth::Down).await);
    }
}
