pub mod apns;
pub mod email;
pub mod error;
pub mod firebase;
pub mod manager;
pub mod provider;
pub mod sms;
pub mod webhook;

use std::sync::Arc;

use notify_core::config::DeliveryConfig;

pub use apns::ApnsProvider;
pub use email::EmailProvider;
pub use error::ChannelError;
pub use firebase::FirebaseProvider;
pub use manager::ProviderManager;
pub use provider::{ChannelProvider, ProviderCapabilities, SendResult};
pub use sms::SmsProvider;
pub use webhook::WebhookProvider;

/// Build every adapter from `config` and register it. Adapters without
/// credentials are still registered and simply fail their health check.
pub fn register_default_providers(
    manager: &ProviderManager,
    config: &DeliveryConfig,
) -> anyhow::Result<()> {
    manager.register(Arc::new(EmailProvider::new(config)?));
    manager.register(Arc::new(SmsProvider::new(config)?));
    manager.register(Arc::new(ApnsProvider::new(config)?));
    manager.register(Arc::new(FirebaseProvider::new(config)?));
    manager.register(Arc::new(WebhookProvider::new(config)?));
    Ok(())
}
