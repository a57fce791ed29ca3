//! Signed HTTP callbacks.
//!
//! Every request carries `X-Timestamp` and, when a signing secret is
//! configured, `X-Signature-256: sha256=<hex>` computed over
//! `"{timestamp}.{body}"` so receivers can reject replays.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use notify_core::config::DeliveryConfig;
use notify_core::{Channel, Notification, Priority};
use reqwest::Url;
use sha2::Sha256;
use std::time::Duration;

use crate::error::ChannelError;
use crate::provider::{
    require_content, require_recipient, transport_failure, ChannelProvider, ProviderCapabilities,
    SendResult,
};

type HmacSha256 = Hmac<Sha256>;

pub const PROVIDER_NAME: &str = "webhook";
pub const SIGNATURE_HEADER: &str = "X-Signature-256";
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";
const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Hex HMAC-SHA256 of `"{timestamp}.{body}"`.
pub fn sign_payload(secret: &str, timestamp: i64, body: &str) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid signing secret: {}", e))?;
    mac.update(format!("{}.{}", timestamp, body).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Clone, PartialEq)]
enum WebhookAuth {
    None,
    Bearer(String),
    Basic { username: String, password: String },
    ApiKey { header: String, key: String },
}

impl WebhookAuth {
    fn from_config(config: &DeliveryConfig) -> anyhow::Result<Self> {
        let kind = config.webhook_auth_type.as_deref().unwrap_or("none");
        let token = || {
            config
                .webhook_auth_token
                .clone()
                .ok_or_else(|| anyhow::anyhow!("WEBHOOK_AUTH_TOKEN is required for {} auth", kind))
        };

        match kind {
            "none" | "" => Ok(WebhookAuth::None),
            "bearer" => Ok(WebhookAuth::Bearer(token()?)),
            "basic" => {
                let token = token()?;
                let (username, password) = token
                    .split_once(':')
                    .ok_or_else(|| anyhow::anyhow!("basic auth token must be user:password"))?;
                Ok(WebhookAuth::Basic {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
            "api_key" => Ok(WebhookAuth::ApiKey {
                header: config
                    .webhook_auth_header
                    .clone()
                    .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string()),
                key: token()?,
            }),
            other => Err(anyhow::anyhow!("Unknown webhook auth type: {}", other)),
        }
    }

    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            WebhookAuth::None => request,
            WebhookAuth::Bearer(token) => request.bearer_auth(token),
            WebhookAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
            WebhookAuth::ApiKey { header, key } => request.header(header.as_str(), key.as_str()),
        }
    }
}

pub struct WebhookProvider {
    client: reqwest::Client,
    signing_secret: Option<String>,
    auth: WebhookAuth,
}

impl WebhookProvider {
    pub fn new(config: &DeliveryConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.webhook_timeout_secs.max(1)))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        if config.webhook_signing_secret.is_none() {
            tracing::warn!("WEBHOOK_SIGNING_SECRET not set, webhook payloads will be unsigned");
        }

        Ok(Self {
            client,
            signing_secret: config.webhook_signing_secret.clone(),
            auth: WebhookAuth::from_config(config)?,
        })
    }

    fn payload(notification: &Notification) -> serde_json::Value {
        serde_json::json!({
            "id": notification.id,
            "type": notification.notification_type,
            "priority": notification.priority,
            "recipient_id": notification.recipient_id,
            "title": notification.title,
            "content": notification.content,
            "content_html": notification.content_html,
            "data": notification.channel_data,
            "metadata": notification.metadata,
            "created_at": notification.created_at,
        })
    }
}

#[async_trait]
impl ChannelProvider for WebhookProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn channel(&self) -> Channel {
        Channel::Webhook
    }

    async fn send(&self, notification: &Notification) -> Result<SendResult, ChannelError> {
        let url = require_recipient(notification, Channel::Webhook)?;
        let body = serde_json::to_string(&Self::payload(notification))
            .map_err(|e| ChannelError::Validation(format!("unserializable payload: {}", e)))?;
        let timestamp = chrono::Utc::now().timestamp();

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Notification-Id", notification.id.to_string())
            .header(TIMESTAMP_HEADER, timestamp.to_string());

        if let Some(secret) = &self.signing_secret {
            let signature = sign_payload(secret, timestamp, &body)
                .map_err(|e| ChannelError::Transport(e.to_string()))?;
            request = request.header(SIGNATURE_HEADER, format!("sha256={}", signature));
        }

        if let Some(headers) = notification.channel_value("headers").and_then(|v| v.as_map()) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }

        let response = match self.auth.apply(request).body(body).send().await {
            Ok(response) => response,
            Err(e) => return Ok(transport_failure(PROVIDER_NAME, e)),
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let provider_response = serde_json::json!({ "status": status.as_u16(), "body": text });

        if status.is_success() {
            tracing::debug!(notification_id = %notification.id, %status, "Webhook delivered");
            // A 2xx from the receiver is the delivery confirmation.
            Ok(SendResult::delivered(None, Some(provider_response)))
        } else {
            Ok(
                SendResult::failed(format!("webhook returned status {}", status))
                    .with_response(provider_response),
            )
        }
    }

    fn validate(&self, notification: &Notification) -> Result<(), ChannelError> {
        let url = require_recipient(notification, Channel::Webhook)?;
        let parsed = Url::parse(url)
            .map_err(|e| ChannelError::Validation(format!("invalid webhook url {}: {}", url, e)))?;
        match parsed.scheme() {
            "http" | "https" => require_content(notification),
            scheme => Err(ChannelError::Validation(format!(
                "unsupported webhook scheme: {}",
                scheme
            ))),
        }
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_batch: false,
            max_batch_size: 1,
            rate_limit_per_minute: 0,
            supported_priorities: Priority::ALL.to_vec(),
            supports_rich_content: true,
            supports_attachments: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use notify_core::DataValue;

    #[test]
    fn test_sign_payload_known_vector() {
        let signature = sign_payload("topsecret", 1_700_000_000, r#"{"id":1}"#).unwrap();
        assert_eq!(
            signature,
            "2b65dcefa7f51ac7ee445bc446105a9557bbfad37a1d5ca4c2480b0b939d1691"
        );
    }

    #[test]
    fn test_signature_depends_on_timestamp() {
        let a = sign_payload("topsecret", 1, "{}").unwrap();
        let b = sign_payload("topsecret", 2, "{}").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_auth_from_config() {
        let mut config = DeliveryConfig::default();
        assert_eq!(WebhookAuth::from_config(&config).unwrap(), WebhookAuth::None);

        config.webhook_auth_type = Some("basic".to_string());
        config.webhook_auth_token = Some("svc:pw".to_string());
        assert_eq!(
            WebhookAuth::from_config(&config).unwrap(),
            WebhookAuth::Basic {
                username: "svc".to_string(),
                password: "pw".to_string()
            }
        );

        config.webhook_auth_type = Some("api_key".to_string());
        assert_eq!(
            WebhookAuth::from_config(&config).unwrap(),
            WebhookAuth::ApiKey {
                header: "X-API-Key".to_string(),
                key: "svc:pw".to_string()
            }
        );

        config.webhook_auth_token = None;
        config.webhook_auth_type = Some("bearer".to_string());
        assert!(WebhookAuth::from_config(&config).is_err());
    }

    #[test]
    fn test_validate_url_scheme() {
        let provider = WebhookProvider::new(&DeliveryConfig::default()).unwrap();
        let mut n = Notification::new(Channel::Webhook, "trip updated", Utc::now());
        n.recipient_webhook = Some("https://hooks.example.com/trips".to_string());
        assert!(provider.validate(&n).is_ok());

        n.recipient_webhook = Some("ftp://hooks.example.com".to_string());
        assert!(provider.validate(&n).is_err());

        n.recipient_webhook = Some("not a url".to_string());
        assert!(provider.validate(&n).is_err());
    }

    #[test]
    fn test_payload_carries_channel_data() {
        let mut n = Notification::new(Channel::Webhook, "trip updated", Utc::now());
        n.channel_data = Some([("trip_id".to_string(), DataValue::from("t-42"))].into());
        let payload = WebhookProvider::payload(&n);
        assert_eq!(payload["data"]["trip_id"], "t-42");
        assert_eq!(payload["type"], "transactional");
    }
}
