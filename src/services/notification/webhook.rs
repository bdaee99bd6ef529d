//! Webhook notification dispatcher.
//!
//! Sends alerts as an HTTPS POST carrying a Slack-style attachment payload:
//! one attachment with a severity-derived color, the synthesized title and
//! body, short Count/Threshold/Severity fields, a footer, and an epoch
//! timestamp. Delivery counts as successful only on HTTP 200.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;

use super::{severity_style, AlertMessage, NotificationDispatcher, NotificationResult};
use crate::error::AppResult;
use crate::models::{ChannelConfig, ChannelKind, NotificationChannel, WebhookConfig};

/// Webhook notification dispatcher
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// Formats an alert as a webhook attachment message
    pub fn format_payload(config: &WebhookConfig, message: &AlertMessage) -> serde_json::Value {
        let (color, label) = severity_style(message.ratio);

        let mut payload = json!({
            "username": "Peep",
            "icon_emoji": ":loudspeaker:",
            "attachments": [
                {
                    "color": color,
                    "title": message.title,
                    "text": message.body,
                    "fields": [
                        { "title": "Count", "value": message.count.to_string(), "short": true },
                        { "title": "Threshold", "value": message.threshold.to_string(), "short": true },
                        { "title": "Severity", "value": label, "short": true }
                    ],
                    "footer": "Peep Log Monitor",
                    "ts": message.fired_at.timestamp()
                }
            ]
        });

        // Destination override if specified
        if let Some(ref channel) = config.channel {
            payload["channel"] = json!(channel);
        }

        payload
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookNotifier {
    async fn send(
        &self,
        channel: &NotificationChannel,
        message: &AlertMessage,
    ) -> NotificationResult {
        let config = match channel.parsed_config() {
            Ok(ChannelConfig::Webhook(c)) => c,
            Ok(_) => {
                return NotificationResult::failure(
                    "channel is not a webhook channel".to_string(),
                )
            }
            Err(e) => return NotificationResult::failure(format!("invalid webhook config: {}", e)),
        };

        let payload = Self::format_payload(&config, message);

        match self
            .client
            .post(&config.webhook_url)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                if status.as_u16() == 200 {
                    NotificationResult::success()
                } else {
                    let error_body = response.text().await.unwrap_or_default();
                    let error_msg = if error_body.is_empty() {
                        format!("HTTP {}", status.as_u16())
                    } else {
                        format!("HTTP {}: {}", status.as_u16(), error_body)
                    };
                    NotificationResult::failure(error_msg)
                }
            }
            Err(e) => {
                let error_msg = if e.is_timeout() {
                    "webhook request timed out".to_string()
                } else if e.is_connect() {
                    "webhook connection failed".to_string()
                } else {
                    format!("webhook request failed: {}", e)
                };
                NotificationResult::failure(error_msg)
            }
        }
    }

    fn validate_config(&self, config: &HashMap<String, String>) -> AppResult<()> {
        ChannelConfig::from_map(ChannelKind::Webhook, config).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertInstance;
    use chrono::{TimeZone, Utc};

    fn test_message() -> AlertMessage {
        AlertMessage::from_alert(&AlertInstance {
            id: 1,
            rule_id: 1,
            rule_name: "Errs".to_string(),
            count: 9,
            threshold: 3,
            query: "SELECT COUNT(*) FROM logs WHERE level='error'".to_string(),
            fired_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            resolved: false,
        })
    }

    #[test]
    fn test_format_payload_structure() {
        let config = WebhookConfig {
            webhook_url: "https://hooks.example.com/T1/B2".to_string(),
            channel: Some("#alerts".to_string()),
        };
        let message = test_message();

        let payload = WebhookNotifier::format_payload(&config, &message);

        assert_eq!(payload["username"], "Peep");
        assert_eq!(payload["channel"], "#alerts");
        let attachment = &payload["attachments"][0];
        // ratio 3.0 maps to the critical style
        assert_eq!(attachment["color"], "#dc2626");
        assert_eq!(attachment["title"], "Alert: Errs");
        assert_eq!(attachment["fields"][0]["value"], "9");
        assert_eq!(attachment["fields"][1]["value"], "3");
        assert_eq!(attachment["fields"][2]["value"], "critical");
        assert_eq!(attachment["ts"], message.fired_at.timestamp());
    }

    #[test]
    fn test_format_payload_without_channel_override() {
        let config = WebhookConfig {
            webhook_url: "https://hooks.example.com/T1/B2".to_string(),
            channel: None,
        };
        let payload = WebhookNotifier::format_payload(&config, &test_message());
        assert!(payload.get("channel").is_none());
    }
}
