use a2::{Client, NotificationBuilder, NotificationOptions, PlainNotificationBuilder};
use anyhow::anyhow;
use async_trait::async_trait;
use notify_core::config::DeliveryConfig;
use notify_core::{Channel, Notification, Priority};
use std::fs;

use crate::error::ChannelError;
use crate::provider::{
    require_content, require_recipient, transport_failure, ChannelProvider, ProviderCapabilities,
    SendResult,
};

pub const PROVIDER_NAME: &str = "apns";

fn load_key(config: &DeliveryConfig) -> anyhow::Result<String> {
    if let Some(encoded) = &config.apns_key_content {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| anyhow!("Failed to decode base64 APNs key: {}", e))?;
        String::from_utf8(decoded).map_err(|e| anyhow!("Failed to convert APNs key to UTF-8: {}", e))
    } else if let Some(path) = &config.apns_key_path {
        fs::read_to_string(path).map_err(|e| anyhow!("Failed to read APNs key file {}: {}", path, e))
    } else {
        Err(anyhow!("Either APNS_KEY_PATH or APNS_KEY_CONTENT must be provided"))
    }
}

fn endpoint_for(bundle_id: &str) -> a2::Endpoint {
    if bundle_id.contains("sandbox") || bundle_id.contains("dev") {
        a2::Endpoint::Sandbox
    } else {
        a2::Endpoint::Production
    }
}

/// Apple push delivery for `push` notifications.
pub struct ApnsProvider {
    client: Option<Client>,
    bundle_id: String,
}

impl ApnsProvider {
    pub fn new(config: &DeliveryConfig) -> anyhow::Result<Self> {
        let bundle_id = config.apns_bundle_id.clone().unwrap_or_default();

        let client = match (&config.apns_key_id, &config.apns_team_id) {
            (Some(key_id), Some(team_id)) => {
                let key = load_key(config)?;
                let client = Client::token(key.as_bytes(), key_id, team_id, endpoint_for(&bundle_id))
                    .map_err(|e| anyhow!("Failed to create APNs client: {}", e))?;
                tracing::info!("APNs provider initialized");
                Some(client)
            }
            _ => {
                tracing::warn!("APNs provider unavailable (missing configuration)");
                None
            }
        };

        Ok(Self { client, bundle_id })
    }
}

#[async_trait]
impl ChannelProvider for ApnsProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn send(&self, notification: &Notification) -> Result<SendResult, ChannelError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured(PROVIDER_NAME.to_string()))?;
        let device_token = require_recipient(notification, Channel::Push)?;

        let body = match &notification.title {
            Some(title) => format!("{}\n{}", title, notification.content),
            None => notification.content.clone(),
        };
        let mut builder = PlainNotificationBuilder::new(&body);

        if let Some(badge) = notification.channel_value("badge").and_then(|v| v.as_u64()) {
            builder.set_badge(badge as u32);
        }
        if let Some(sound) = notification.channel_value("sound").and_then(|v| v.as_str()) {
            builder.set_sound(sound);
        }
        if let Some(category) = notification.channel_value("category").and_then(|v| v.as_str()) {
            builder.set_category(category);
        }

        let mut options = NotificationOptions::default();
        if !self.bundle_id.is_empty() {
            options.apns_topic = Some(&self.bundle_id);
        }
        options.apns_priority = Some(match notification.priority {
            Priority::Low | Priority::Normal => a2::Priority::Normal,
            Priority::High | Priority::Critical => a2::Priority::High,
        });

        let payload = builder.build(device_token, options);

        match client.send(payload).await {
            Ok(response) => {
                tracing::debug!(
                    notification_id = %notification.id,
                    "APNs accepted notification: {:?}",
                    response
                );
                Ok(SendResult::sent(
                    response.apns_id.clone(),
                    Some(serde_json::json!({
                        "code": response.code,
                        "apns_id": response.apns_id,
                    })),
                ))
            }
            Err(e) => Ok(transport_failure(PROVIDER_NAME, e)),
        }
    }

    fn validate(&self, notification: &Notification) -> Result<(), ChannelError> {
        require_recipient(notification, Channel::Push)?;
        require_content(notification)
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        match self.client {
            Some(_) => Ok(()),
            None => Err(ChannelError::NotConfigured(PROVIDER_NAME.to_string())),
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_batch: false,
            max_batch_size: 1,
            rate_limit_per_minute: 0,
            supported_priorities: Priority::ALL.to_vec(),
            supports_rich_content: false,
            supports_attachments: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_endpoint_selection() {
        assert!(matches!(endpoint_for("com.trips.app.dev"), a2::Endpoint::Sandbox));
        assert!(matches!(endpoint_for("com.trips.app"), a2::Endpoint::Production));
    }

    #[test]
    fn test_missing_key_material_is_an_error() {
        let config = DeliveryConfig {
            apns_key_id: Some("KEY".to_string()),
            apns_team_id: Some("TEAM".to_string()),
            ..Default::default()
        };
        assert!(ApnsProvider::new(&config).is_err());
    }

    #[test]
    fn test_validate_device_token() {
        let provider = ApnsProvider::new(&DeliveryConfig::default()).unwrap();
        let mut n = Notification::new(Channel::Push, "Gate changed", Utc::now());
        assert!(matches!(
            provider.validate(&n),
            Err(ChannelError::RecipientRequired(Channel::Push))
        ));

        n.recipient_device_id = Some("a1b2c3".to_string());
        assert!(provider.validate(&n).is_ok());

        n.content.clear();
        assert!(provider.validate(&n).is_err());
    }
}
