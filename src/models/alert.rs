//! Alert models: rules, firings, notification channels and their configs.
//!
//! Channels persist as a `(kind, string -> string config)` pair; the map is
//! parsed into a typed [`ChannelConfig`] variant when a channel is loaded or
//! validated. The required keys per kind live in one place
//! ([`required_keys`]) so add-time and load-time validation agree.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

// =============================================================================
// Channel Kind Enum
// =============================================================================

/// Kind of notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Desktop,
    Webhook,
    Email,
    Script,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Desktop => write!(f, "desktop"),
            ChannelKind::Webhook => write!(f, "webhook"),
            ChannelKind::Email => write!(f, "email"),
            ChannelKind::Script => write!(f, "script"),
        }
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "desktop" => Ok(ChannelKind::Desktop),
            "webhook" => Ok(ChannelKind::Webhook),
            "email" => Ok(ChannelKind::Email),
            "script" => Ok(ChannelKind::Script),
            other => Err(AppError::Validation(format!(
                "unknown channel kind '{}'",
                other
            ))),
        }
    }
}

/// Config keys that must be present for a channel of the given kind
pub fn required_keys(kind: ChannelKind) -> &'static [&'static str] {
    match kind {
        ChannelKind::Desktop => &[],
        ChannelKind::Webhook => &["webhook_url"],
        ChannelKind::Email => &[
            "smtp_host",
            "username",
            "password",
            "from_email",
            "to_emails",
        ],
        ChannelKind::Script => &["script_path"],
    }
}

// =============================================================================
// Typed Channel Configurations
// =============================================================================

/// Webhook channel configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookConfig {
    pub webhook_url: String,
    /// Destination override (e.g. a Slack channel name)
    pub channel: Option<String>,
}

/// Email channel configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub to_emails: Vec<String>,
    pub use_tls: bool,
}

/// Script channel configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptConfig {
    pub script_path: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub working_dir: Option<String>,
    pub environment: Vec<(String, String)>,
}

/// Default wall-clock timeout for script executions
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(30);

/// A channel's configuration parsed into its kind-specific form
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelConfig {
    Desktop,
    Webhook(WebhookConfig),
    Email(EmailConfig),
    Script(ScriptConfig),
}

impl ChannelConfig {
    /// Parses the persisted string map into the typed variant for `kind`,
    /// checking required keys and value shapes.
    pub fn from_map(kind: ChannelKind, config: &HashMap<String, String>) -> AppResult<Self> {
        for key in required_keys(kind) {
            match config.get(*key) {
                Some(v) if !v.trim().is_empty() => {}
                _ => {
                    return Err(AppError::Validation(format!(
                        "{} channel requires config key '{}'",
                        kind, key
                    )))
                }
            }
        }

        match kind {
            ChannelKind::Desktop => Ok(ChannelConfig::Desktop),
            ChannelKind::Webhook => {
                let webhook_url = config["webhook_url"].trim().to_string();
                let parsed = url::Url::parse(&webhook_url).map_err(|_| {
                    AppError::Validation(format!("invalid webhook URL '{}'", webhook_url))
                })?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(AppError::Validation(
                        "webhook URL must use HTTP or HTTPS".to_string(),
                    ));
                }
                Ok(ChannelConfig::Webhook(WebhookConfig {
                    webhook_url,
                    channel: config.get("channel").map(|s| s.trim().to_string()),
                }))
            }
            ChannelKind::Email => {
                let to_emails: Vec<String> = config["to_emails"]
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if to_emails.is_empty() {
                    return Err(AppError::Validation(
                        "email channel requires at least one recipient in 'to_emails'".to_string(),
                    ));
                }
                for addr in &to_emails {
                    if !addr.contains('@') || addr.len() < 5 {
                        return Err(AppError::Validation(format!(
                            "invalid email address '{}'",
                            addr
                        )));
                    }
                }
                let smtp_port = match config.get("smtp_port") {
                    Some(v) => v.trim().parse().map_err(|_| {
                        AppError::Validation(format!("invalid smtp_port '{}'", v))
                    })?,
                    None => 587,
                };
                Ok(ChannelConfig::Email(EmailConfig {
                    smtp_host: config["smtp_host"].trim().to_string(),
                    smtp_port,
                    username: config["username"].clone(),
                    password: config["password"].clone(),
                    from_email: config["from_email"].trim().to_string(),
                    from_name: config.get("from_name").map(|s| s.trim().to_string()),
                    to_emails,
                    use_tls: config
                        .get("use_tls")
                        .map(|v| v == "true" || v == "1")
                        .unwrap_or(true),
                }))
            }
            ChannelKind::Script => {
                let args = config
                    .get("args")
                    .map(|s| s.split_whitespace().map(|a| a.to_string()).collect())
                    .unwrap_or_default();
                let timeout = match config.get("timeout") {
                    Some(v) => humantime::parse_duration(v.trim()).map_err(|_| {
                        AppError::Validation(format!("invalid script timeout '{}'", v))
                    })?,
                    None => DEFAULT_SCRIPT_TIMEOUT,
                };
                let environment = config
                    .get("environment")
                    .map(|s| {
                        s.split(',')
                            .filter_map(|pair| {
                                let pair = pair.trim();
                                pair.split_once('=')
                                    .map(|(k, v)| (k.to_string(), v.to_string()))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(ChannelConfig::Script(ScriptConfig {
                    script_path: config["script_path"].trim().to_string(),
                    args,
                    timeout,
                    working_dir: config.get("working_dir").map(|s| s.trim().to_string()),
                    environment,
                }))
            }
        }
    }
}

// =============================================================================
// Alert Rule Model
// =============================================================================

/// A predicate plus firing policy, evaluated over a trailing time window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRule {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Read-only query returning a single scalar count
    pub query: String,
    pub threshold: i64,
    /// Duration string such as "30s", "5m", "1h"
    pub window: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_alert: Option<DateTime<Utc>>,
}

/// DTO for creating an alert rule
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAlertRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub query: String,
    pub threshold: i64,
    pub window: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Alert Instance Model
// =============================================================================

/// One firing of a rule. Rule name and query are denormalized so history
/// survives rule deletion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertInstance {
    pub id: i64,
    pub rule_id: i64,
    pub rule_name: String,
    pub count: i64,
    pub threshold: i64,
    pub query: String,
    pub fired_at: DateTime<Utc>,
    pub resolved: bool,
}

// =============================================================================
// Notification Channel Model
// =============================================================================

/// A named notification sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationChannel {
    pub id: i64,
    pub name: String,
    pub kind: ChannelKind,
    /// Raw persisted configuration map
    pub config: HashMap<String, String>,
    pub enabled: bool,
}

impl NotificationChannel {
    /// Parses the stored map into the typed configuration for this kind
    pub fn parsed_config(&self) -> AppResult<ChannelConfig> {
        ChannelConfig::from_map(self.kind, &self.config)
    }
}

/// DTO for creating a notification channel
#[derive(Debug, Clone, Deserialize)]
pub struct CreateNotificationChannel {
    pub name: String,
    pub kind: ChannelKind,
    #[serde(default)]
    pub config: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// =============================================================================
// Notification Attempt Model
// =============================================================================

/// Audit row: one delivery attempt to one channel. Never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationAttempt {
    pub id: i64,
    pub alert_id: i64,
    pub channel_id: i64,
    pub sent_at: DateTime<Utc>,
    pub success: bool,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_channel_kind_round_trip() {
        for kind in [
            ChannelKind::Desktop,
            ChannelKind::Webhook,
            ChannelKind::Email,
            ChannelKind::Script,
        ] {
            let parsed: ChannelKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("pager".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn test_desktop_config_needs_no_keys() {
        let config = ChannelConfig::from_map(ChannelKind::Desktop, &HashMap::new()).unwrap();
        assert_eq!(config, ChannelConfig::Desktop);
    }

    #[test]
    fn test_webhook_config_requires_url() {
        let err = ChannelConfig::from_map(ChannelKind::Webhook, &HashMap::new());
        assert!(err.is_err());

        let err = ChannelConfig::from_map(
            ChannelKind::Webhook,
            &map(&[("webhook_url", "not a url")]),
        );
        assert!(err.is_err());

        let err = ChannelConfig::from_map(
            ChannelKind::Webhook,
            &map(&[("webhook_url", "ftp://example.com/hook")]),
        );
        assert!(err.is_err());

        let ok = ChannelConfig::from_map(
            ChannelKind::Webhook,
            &map(&[
                ("webhook_url", "https://hooks.example.com/T123/B456"),
                ("channel", "#alerts"),
            ]),
        )
        .unwrap();
        match ok {
            ChannelConfig::Webhook(w) => {
                assert_eq!(w.webhook_url, "https://hooks.example.com/T123/B456");
                assert_eq!(w.channel.as_deref(), Some("#alerts"));
            }
            other => panic!("expected webhook config, got {:?}", other),
        }
    }

    #[test]
    fn test_email_config_parses_recipients_and_defaults() {
        let config = ChannelConfig::from_map(
            ChannelKind::Email,
            &map(&[
                ("smtp_host", "smtp.example.com"),
                ("username", "alerts"),
                ("password", "hunter2"),
                ("from_email", "alerts@example.com"),
                ("to_emails", "ops@example.com, dev@example.com ,"),
            ]),
        )
        .unwrap();

        match config {
            ChannelConfig::Email(e) => {
                assert_eq!(e.smtp_port, 587);
                assert!(e.use_tls);
                assert_eq!(
                    e.to_emails,
                    vec!["ops@example.com".to_string(), "dev@example.com".to_string()]
                );
            }
            other => panic!("expected email config, got {:?}", other),
        }
    }

    #[test]
    fn test_email_config_missing_key_rejected() {
        let err = ChannelConfig::from_map(
            ChannelKind::Email,
            &map(&[("smtp_host", "smtp.example.com")]),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_script_config_args_timeout_environment() {
        let config = ChannelConfig::from_map(
            ChannelKind::Script,
            &map(&[
                ("script_path", "/usr/local/bin/page.sh"),
                ("args", "--quiet --retry 3"),
                ("timeout", "5s"),
                ("environment", "TEAM=core,REGION=eu-west-1"),
            ]),
        )
        .unwrap();

        match config {
            ChannelConfig::Script(s) => {
                assert_eq!(s.script_path, "/usr/local/bin/page.sh");
                assert_eq!(s.args, vec!["--quiet", "--retry", "3"]);
                assert_eq!(s.timeout, Duration::from_secs(5));
                assert_eq!(
                    s.environment,
                    vec![
                        ("TEAM".to_string(), "core".to_string()),
                        ("REGION".to_string(), "eu-west-1".to_string()),
                    ]
                );
            }
            other => panic!("expected script config, got {:?}", other),
        }
    }

    #[test]
    fn test_script_config_default_timeout() {
        let config = ChannelConfig::from_map(
            ChannelKind::Script,
            &map(&[("script_path", "/bin/true")]),
        )
        .unwrap();
        match config {
            ChannelConfig::Script(s) => assert_eq!(s.timeout, DEFAULT_SCRIPT_TIMEOUT),
            other => panic!("expected script config, got {:?}", other),
        }
    }
}
