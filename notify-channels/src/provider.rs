//! The contract every delivery mechanism implements.

use async_trait::async_trait;
use notify_core::{Channel, Notification, NotificationStatus, Priority};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChannelError;

/// Outcome of one delivery attempt as reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    /// `Sent`, `Delivered` or `Failed`.
    pub status: NotificationStatus,
    pub external_id: Option<String>,
    pub provider_response: Option<Value>,
    pub error_message: Option<String>,
}

impl SendResult {
    pub fn sent(external_id: Option<String>, provider_response: Option<Value>) -> Self {
        Self {
            success: true,
            status: NotificationStatus::Sent,
            external_id,
            provider_response,
            error_message: None,
        }
    }

    pub fn delivered(external_id: Option<String>, provider_response: Option<Value>) -> Self {
        Self {
            status: NotificationStatus::Delivered,
            ..Self::sent(external_id, provider_response)
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: NotificationStatus::Failed,
            external_id: None,
            provider_response: None,
            error_message: Some(error_message.into()),
        }
    }

    pub fn with_response(mut self, provider_response: Value) -> Self {
        self.provider_response = Some(provider_response);
        self
    }
}

/// Static description of what a provider can do. Read by the provider
/// manager and by policy code, never by the provider itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub supports_batch: bool,
    pub max_batch_size: usize,
    /// Sends per minute, 0 for unlimited.
    pub rate_limit_per_minute: u32,
    pub supported_priorities: Vec<Priority>,
    pub supports_rich_content: bool,
    pub supports_attachments: bool,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            supports_batch: false,
            max_batch_size: 1,
            rate_limit_per_minute: 0,
            supported_priorities: Priority::ALL.to_vec(),
            supports_rich_content: false,
            supports_attachments: false,
        }
    }
}

#[async_trait]
pub trait ChannelProvider: Send + Sync {
    fn name(&self) -> &str;

    fn channel(&self) -> Channel;

    /// Attempt one delivery. Recoverable provider failures come back as
    /// `Ok(SendResult { success: false, .. })`; `Err` is reserved for a
    /// provider that cannot send at all.
    async fn send(&self, notification: &Notification) -> Result<SendResult, ChannelError>;

    /// Results are index-aligned with `notifications`.
    async fn send_batch(&self, notifications: &[Notification]) -> Vec<SendResult> {
        let mut results = Vec::with_capacity(notifications.len());
        for notification in notifications {
            let result = match self.send(notification).await {
                Ok(result) => result,
                Err(e) => SendResult::failed(e.to_string()),
            };
            results.push(result);
        }
        results
    }

    /// Channel-specific pre-flight checks. Pure.
    fn validate(&self, notification: &Notification) -> Result<(), ChannelError>;

    /// Readiness probe; does not touch the network.
    async fn health_check(&self) -> Result<(), ChannelError>;

    fn capabilities(&self) -> ProviderCapabilities;
}

pub(crate) fn require_recipient<'a>(
    notification: &'a Notification,
    channel: Channel,
) -> Result<&'a str, ChannelError> {
    if notification.channel != channel {
        return Err(ChannelError::Validation(format!(
            "notification is for channel {}, not {}",
            notification.channel, channel
        )));
    }
    notification
        .recipient_address()
        .ok_or(ChannelError::RecipientRequired(channel))
}

pub(crate) fn require_content(notification: &Notification) -> Result<(), ChannelError> {
    if notification.content.trim().is_empty() {
        return Err(ChannelError::Validation("content is required".to_string()));
    }
    Ok(())
}

/// Collapse a failure to talk to the provider into a failed result.
pub(crate) fn transport_failure(provider: &str, err: impl std::fmt::Display) -> SendResult {
    tracing::warn!(provider, "Delivery attempt failed: {}", err);
    SendResult::failed(format!("{}: {}", provider, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EveryOtherFails {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChannelProvider for EveryOtherFails {
        fn name(&self) -> &str {
            "every-other"
        }

        fn channel(&self) -> Channel {
            Channel::Email
        }

        async fn send(&self, _notification: &Notification) -> Result<SendResult, ChannelError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call % 2 == 1 {
                Err(ChannelError::Transport("connection reset".to_string()))
            } else {
                Ok(SendResult::sent(Some(format!("msg-{}", call)), None))
            }
        }

        fn validate(&self, _notification: &Notification) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn health_check(&self) -> Result<(), ChannelError> {
            Ok(())
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities::default()
        }
    }

    #[tokio::test]
    async fn test_default_send_batch_keeps_length_and_order() {
        let provider = EveryOtherFails {
            calls: AtomicUsize::new(0),
        };
        let batch: Vec<Notification> = (0..3)
            .map(|i| Notification::new(Channel::Email, format!("n{}", i), Utc::now()))
            .collect();

        let results = provider.send_batch(&batch).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(results[1].status, NotificationStatus::Failed);
        assert_eq!(results[2].external_id.as_deref(), Some("msg-2"));
    }

    #[test]
    fn test_require_recipient_checks_channel_match() {
        let mut n = Notification::new(Channel::Sms, "hi", Utc::now());
        n.recipient_phone = Some("+15550100".to_string());
        assert!(require_recipient(&n, Channel::Sms).is_ok());
        assert!(matches!(
            require_recipient(&n, Channel::Email),
            Err(ChannelError::Validation(_))
        ));
    }
}
