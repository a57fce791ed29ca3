use async_trait::async_trait;
use notify_core::config::DeliveryConfig;
use notify_core::{Channel, Notification, Priority};

use crate::error::ChannelError;
use crate::provider::{
    require_content, require_recipient, transport_failure, ChannelProvider, ProviderCapabilities,
    SendResult,
};

pub const PROVIDER_NAME: &str = "fcm";

/// Firebase Cloud Messaging delivery for `firebase` notifications.
pub struct FirebaseProvider {
    client: Option<fcm::Client>,
    server_key: Option<String>,
}

impl FirebaseProvider {
    pub fn new(config: &DeliveryConfig) -> anyhow::Result<Self> {
        let (client, server_key) = match &config.fcm_server_key {
            Some(key) => {
                tracing::info!("FCM provider initialized");
                (Some(fcm::Client::new()), Some(key.clone()))
            }
            None => {
                tracing::warn!("FCM provider unavailable (missing configuration)");
                (None, None)
            }
        };

        Ok(Self { client, server_key })
    }
}

fn fcm_priority(priority: Priority) -> fcm::Priority {
    match priority {
        Priority::Low | Priority::Normal => fcm::Priority::Normal,
        Priority::High | Priority::Critical => fcm::Priority::High,
    }
}

#[async_trait]
impl ChannelProvider for FirebaseProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn channel(&self) -> Channel {
        Channel::Firebase
    }

    async fn send(&self, notification: &Notification) -> Result<SendResult, ChannelError> {
        let (client, server_key) = match (&self.client, &self.server_key) {
            (Some(c), Some(k)) => (c, k),
            _ => return Err(ChannelError::NotConfigured(PROVIDER_NAME.to_string())),
        };
        let device_token = require_recipient(notification, Channel::Firebase)?;

        let mut display = fcm::NotificationBuilder::new();
        if let Some(title) = &notification.title {
            display.title(title);
        }
        display.body(&notification.content);
        if let Some(sound) = notification.channel_value("sound").and_then(|v| v.as_str()) {
            display.sound(sound);
        }

        let mut builder = fcm::MessageBuilder::new(server_key, device_token);
        builder.notification(display.finalize());
        builder.priority(fcm_priority(notification.priority));
        let message = builder.finalize();

        let response = match client.send(message).await {
            Ok(response) => response,
            Err(e) => return Ok(transport_failure(PROVIDER_NAME, e)),
        };

        let first = response.results.as_ref().and_then(|r| r.first());
        let message_id = first.and_then(|r| r.message_id.clone());
        let result_error = first.and_then(|r| r.error.as_ref()).map(|e| format!("{:?}", e));
        let top_error = response.error.as_ref().map(|e| format!("{:?}", e));

        let provider_response = serde_json::json!({
            "multicast_id": response.multicast_id,
            "success": response.success,
            "failure": response.failure,
            "message_id": message_id,
            "error": result_error.clone().or_else(|| top_error.clone()),
        });

        match result_error.or(top_error) {
            Some(error) => {
                Ok(SendResult::failed(format!("FCM rejected message: {}", error))
                    .with_response(provider_response))
            }
            None => {
                tracing::debug!(notification_id = %notification.id, "FCM accepted notification");
                Ok(SendResult::sent(message_id, Some(provider_response)))
            }
        }
    }

    fn validate(&self, notification: &Notification) -> Result<(), ChannelError> {
        require_recipient(notification, Channel::Firebase)?;
        require_content(notification)
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        match self.server_key {
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
