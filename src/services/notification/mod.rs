//! Notification dispatcher system using the Strategy pattern.
//!
//! Message synthesis is deterministic and shared across transports; each
//! channel kind (desktop, webhook, email, script) implements delivery behind
//! a common trait. Every dispatch records exactly one audit row, success or
//! not, and no retries happen at this layer.

pub mod desktop;
pub mod email;
pub mod script;
pub mod webhook;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::models::{AlertInstance, ChannelKind, NotificationChannel};
use crate::services::store::LogStore;

pub use desktop::DesktopNotifier;
pub use email::EmailNotifier;
pub use script::ScriptNotifier;
pub use webhook::WebhookNotifier;

// =============================================================================
// Notification Result
// =============================================================================

/// Result of a notification delivery attempt
#[derive(Debug)]
pub struct NotificationResult {
    pub success: bool,
    pub error_message: Option<String>,
}

impl NotificationResult {
    pub fn success() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }

    pub fn failure(error_message: String) -> Self {
        Self {
            success: false,
            error_message: Some(error_message),
        }
    }
}

// =============================================================================
// Message Synthesis
// =============================================================================

/// How far past the threshold a firing is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// The rendered alert, independent of transport
#[derive(Debug, Clone)]
pub struct AlertMessage {
    pub title: String,
    pub body: String,
    pub severity: Severity,
    /// count / threshold
    pub ratio: f64,
    pub count: i64,
    pub threshold: i64,
    pub fired_at: DateTime<Utc>,
}

impl AlertMessage {
    pub fn from_alert(alert: &AlertInstance) -> Self {
        let severity = if alert.count >= 2 * alert.threshold {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let ratio = alert.count as f64 / alert.threshold as f64;

        let body = format!(
            "Rule: {}\nQuery: {}\nCount: {} (threshold: {})\nFired at: {}",
            alert.rule_name,
            alert.query,
            alert.count,
            alert.threshold,
            alert.fired_at.with_timezone(&chrono::Local).to_rfc3339(),
        );

        Self {
            title: format!("Alert: {}", alert.rule_name),
            body,
            severity,
            ratio,
            count: alert.count,
            threshold: alert.threshold,
            fired_at: alert.fired_at,
        }
    }
}

/// Color and human severity label for transports that render richer payloads
pub fn severity_style(ratio: f64) -> (&'static str, &'static str) {
    if ratio >= 3.0 {
        ("#dc2626", "critical")
    } else if ratio >= 2.0 {
        ("#f59e0b", "high")
    } else if ratio >= 1.5 {
        ("#eab308", "medium")
    } else {
        ("#22c55e", "low")
    }
}

// =============================================================================
// Notification Dispatcher Trait
// =============================================================================

/// Trait for notification dispatchers (Strategy pattern)
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Deliver a message through this channel
    async fn send(
        &self,
        channel: &NotificationChannel,
        message: &AlertMessage,
    ) -> NotificationResult;

    /// Validate channel configuration before it is persisted
    fn validate_config(&self, config: &HashMap<String, String>) -> AppResult<()>;
}

/// Creates the appropriate dispatcher for a channel kind
pub fn create_dispatcher(kind: ChannelKind) -> Box<dyn NotificationDispatcher> {
    match kind {
        ChannelKind::Desktop => Box::new(DesktopNotifier::new()),
        ChannelKind::Webhook => Box::new(WebhookNotifier::new()),
        ChannelKind::Email => Box::new(EmailNotifier::new()),
        ChannelKind::Script => Box::new(ScriptNotifier::new()),
    }
}

/// Sends one alert through one channel and records the outcome.
///
/// Writes exactly one `alert_notifications` row per call regardless of how
/// delivery went; a failure to write the audit row is logged, never raised.
pub async fn dispatch(
    store: &LogStore,
    channel: &NotificationChannel,
    alert: &AlertInstance,
) -> NotificationResult {
    let message = AlertMessage::from_alert(alert);
    let dispatcher = create_dispatcher(channel.kind);
    let result = dispatcher.send(channel, &message).await;

    if result.success {
        log::info!(
            "alert {} delivered to channel {} ({})",
            alert.id,
            channel.id,
            channel.name
        );
    } else {
        log::warn!(
            "alert {} delivery to channel {} ({}) failed: {:?}",
            alert.id,
            channel.id,
            channel.name,
            result.error_message
        );
    }

    if let Err(e) = store
        .insert_notification_attempt(
            alert.id,
            channel.id,
            Utc::now(),
            result.success,
            result.error_message.as_deref(),
        )
        .await
    {
        log::error!(
            "failed to record notification attempt for alert {} on channel {}: {}",
            alert.id,
            channel.id,
            e
        );
    }

    result
}
