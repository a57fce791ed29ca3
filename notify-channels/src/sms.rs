use async_trait::async_trait;
use notify_core::config::DeliveryConfig;
use notify_core::{Channel, Notification, Priority};
use serde::Deserialize;
use std::time::Duration;

use crate::error::ChannelError;
use crate::provider::{
    require_content, require_recipient, transport_failure, ChannelProvider, ProviderCapabilities,
    SendResult,
};

pub const PROVIDER_NAME: &str = "twilio";

/// Twilio concatenates up to ten segments; longer bodies are rejected upstream.
pub const MAX_SMS_LENGTH: usize = 1600;

struct TwilioCredentials {
    account_sid: String,
    auth_token: String,
    from_number: String,
}

#[derive(Debug, Deserialize)]
struct TwilioMessageResponse {
    sid: String,
    #[serde(default)]
    status: Option<String>,
}

pub struct SmsProvider {
    client: reqwest::Client,
    credentials: Option<TwilioCredentials>,
}

impl SmsProvider {
    pub fn new(config: &DeliveryConfig) -> anyhow::Result<Self> {
        let credentials = match (
            &config.twilio_account_sid,
            &config.twilio_auth_token,
            &config.twilio_from_number,
        ) {
            (Some(sid), Some(token), Some(from)) => {
                tracing::info!("Twilio SMS provider initialized");
                Some(TwilioCredentials {
                    account_sid: sid.clone(),
                    auth_token: token.clone(),
                    from_number: from.clone(),
                })
            }
            _ => {
                tracing::warn!("SMS provider unavailable (missing Twilio configuration)");
                None
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            credentials,
        })
    }

    fn messages_url(account_sid: &str) -> String {
        format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            account_sid
        )
    }
}

#[async_trait]
impl ChannelProvider for SmsProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, notification: &Notification) -> Result<SendResult, ChannelError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured(PROVIDER_NAME.to_string()))?;
        let to = require_recipient(notification, Channel::Sms)?;

        let form = [
            ("To", to),
            ("From", credentials.from_number.as_str()),
            ("Body", notification.content.as_str()),
        ];

        let response = match self
            .client
            .post(Self::messages_url(&credentials.account_sid))
            .basic_auth(&credentials.account_sid, Some(&credentials.auth_token))
            .form(&form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Ok(transport_failure(PROVIDER_NAME, e)),
        };

        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);

        if !status.is_success() {
            let message = body
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error");
            return Ok(SendResult::failed(format!(
                "Twilio API returned error status {}: {}",
                status, message
            ))
            .with_response(body));
        }

        let parsed: Option<TwilioMessageResponse> = serde_json::from_value(body.clone()).ok();
        if let Some(parsed) = &parsed {
            tracing::debug!(
                notification_id = %notification.id,
                sid = %parsed.sid,
                status = ?parsed.status,
                "SMS accepted by Twilio"
            );
        }
        Ok(SendResult::sent(parsed.map(|p| p.sid), Some(body)))
    }

    fn validate(&self, notification: &Notification) -> Result<(), ChannelError> {
        require_recipient(notification, Channel::Sms)?;
        require_content(notification)?;
        let length = notification.content.chars().count();
        if length > MAX_SMS_LENGTH {
            return Err(ChannelError::Validation(format!(
                "sms content is {} characters, limit is {}",
                length, MAX_SMS_LENGTH
            )));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        match self.credentials {
            Some(_) => Ok(()),
            None => Err(ChannelError::NotConfigured(PROVIDER_NAME.to_string())),
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_batch: false,
            max_batch_size: 1,
            rate_limit_per_minute: 60,
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

    fn sms(content: &str) -> Notification {
        let mut n = Notification::new(Channel::Sms, content, Utc::now());
        n.recipient_phone = Some("+15550100".to_string());
        n
    }

    #[test]
    fn test_validate_length_limit() {
        let provider = SmsProvider::new(&DeliveryConfig::default()).unwrap();
        assert!(provider.validate(&sms(&"a".repeat(MAX_SMS_LENGTH))).is_ok());
        assert!(matches!(
            provider.validate(&sms(&"a".repeat(MAX_SMS_LENGTH + 1))),
            Err(ChannelError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_requires_phone() {
        let provider = SmsProvider::new(&DeliveryConfig::default()).unwrap();
        let mut n = sms("hello");
        n.recipient_phone = None;
        assert!(matches!(
            provider.validate(&n),
            Err(ChannelError::RecipientRequired(Channel::Sms))
        ));
    }

    #[test]
    fn test_messages_url() {
        assert_eq!(
            SmsProvider::messages_url("AC123"),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[tokio::test]
    async fn test_health_follows_credentials() {
        let unconfigured = SmsProvider::new(&DeliveryConfig::default()).unwrap();
        assert!(unconfigured.health_check().await.is_err());

        let config = DeliveryConfig {
            twilio_account_sid: Some("AC123".to_string()),
            twilio_auth_token: Some("token".to_string()),
            twilio_from_number: Some("+15550199".to_string()),
            ..Default::default()
        };
        let configured = SmsProvider::new(&config).unwrap();
        assert!(configured.health_check().await.is_ok());
    }
}
