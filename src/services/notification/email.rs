//! Email notification dispatcher.
//!
//! Submits the alert over SMTP using the lettre crate: STARTTLS when the
//! channel has TLS enabled, a plain relay otherwise, authenticated with the
//! configured credentials, one message to all recipients.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{AlertMessage, NotificationDispatcher, NotificationResult};
use crate::error::AppResult;
use crate::models::{ChannelConfig, ChannelKind, EmailConfig, NotificationChannel};

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Email notification dispatcher
pub struct EmailNotifier;

impl EmailNotifier {
    pub fn new() -> Self {
        Self
    }

    /// Builds the message with all recipients attached
    fn build_message(config: &EmailConfig, message: &AlertMessage) -> Result<Message, String> {
        let from: Mailbox = format!(
            "{} <{}>",
            config.from_name.as_deref().unwrap_or("Peep Alerts"),
            config.from_email
        )
        .parse()
        .map_err(|e| format!("invalid from address: {}", e))?;

        let mut builder = Message::builder().from(from).subject(message.title.clone());

        for recipient in &config.to_emails {
            let to: Mailbox = recipient
                .parse()
                .map_err(|e| format!("invalid recipient '{}': {}", recipient, e))?;
            builder = builder.to(to);
        }

        builder
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| format!("failed to build email: {}", e))
    }

    fn build_transport(config: &EmailConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, String> {
        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| format!("invalid SMTP host: {}", e))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        Ok(builder
            .port(config.smtp_port)
            .timeout(Some(SMTP_TIMEOUT))
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build())
    }
}

impl Default for EmailNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationDispatcher for EmailNotifier {
    async fn send(
        &self,
        channel: &NotificationChannel,
        message: &AlertMessage,
    ) -> NotificationResult {
        let config = match channel.parsed_config() {
            Ok(ChannelConfig::Email(c)) => c,
            Ok(_) => {
                return NotificationResult::failure("channel is not an email channel".to_string())
            }
            Err(e) => return NotificationResult::failure(format!("invalid email config: {}", e)),
        };

        let email = match Self::build_message(&config, message) {
            Ok(email) => email,
            Err(e) => return NotificationResult::failure(e),
        };

        let mailer = match Self::build_transport(&config) {
            Ok(mailer) => mailer,
            Err(e) => return NotificationResult::failure(e),
        };

        match mailer.send(email).await {
            Ok(_) => NotificationResult::success(),
            Err(e) => NotificationResult::failure(format!("SMTP delivery failed: {}", e)),
        }
    }

    fn validate_config(&self, config: &HashMap<String, String>) -> AppResult<()> {
        ChannelConfig::from_map(ChannelKind::Email, config).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertInstance;
    use chrono::{TimeZone, Utc};

    fn test_config() -> EmailConfig {
        EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            username: "alerts".to_string(),
            password: "hunter2".to_string(),
            from_email: "alerts@example.com".to_string(),
            from_name: Some("Peep".to_string()),
            to_emails: vec!["ops@example.com".to_string(), "dev@example.com".to_string()],
            use_tls: true,
        }
    }

    fn test_message() -> AlertMessage {
        AlertMessage::from_alert(&AlertInstance {
            id: 1,
            rule_id: 1,
            rule_name: "Errs".to_string(),
            count: 4,
            threshold: 3,
            query: "SELECT COUNT(*) FROM logs WHERE level='error'".to_string(),
            fired_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            resolved: false,
        })
    }

    #[test]
    fn test_build_message_headers() {
        let email = EmailNotifier::build_message(&test_config(), &test_message()).unwrap();
        let rendered = String::from_utf8(email.formatted()).unwrap();
        assert!(rendered.contains("Alert: Errs"));
        assert!(rendered.contains("ops@example.com"));
        assert!(rendered.contains("dev@example.com"));
    }

    #[test]
    fn test_build_message_rejects_bad_recipient() {
        let mut config = test_config();
        config.to_emails = vec!["not-an-address".to_string()];
        assert!(EmailNotifier::build_message(&config, &test_message()).is_err());
    }
}
