//! Desktop notification dispatcher.
//!
//! Shows the alert through the platform-native notifier. Best-effort: when
//! the notifier is unavailable (headless host, no session bus) the message is
//! echoed on stderr and the attempt is still recorded as failed.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{AlertMessage, NotificationDispatcher, NotificationResult};
use crate::error::AppResult;
use crate::models::{ChannelConfig, ChannelKind, NotificationChannel};

/// Desktop notification dispatcher
pub struct DesktopNotifier;

impl DesktopNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationDispatcher for DesktopNotifier {
    async fn send(
        &self,
        _channel: &NotificationChannel,
        message: &AlertMessage,
    ) -> NotificationResult {
        let title = message.title.clone();
        let body = message.body.clone();

        // The notifier blocks on the session bus
        let shown = tokio::task::spawn_blocking(move || {
            notify_rust::Notification::new()
                .appname("Peep")
                .summary(&title)
                .body(&body)
                .show()
                .map(|_| ())
        })
        .await;

        let error = match shown {
            Ok(Ok(())) => return NotificationResult::success(),
            Ok(Err(e)) => format!("desktop notification failed: {}", e),
            Err(e) => format!("desktop notification task failed: {}", e),
        };

        // Fall back to the diagnostic stream so the alert is never invisible
        eprintln!("[peep alert] {}\n{}", message.title, message.body);
        NotificationResult::failure(error)
    }

    fn validate_config(&self, config: &HashMap<String, String>) -> AppResult<()> {
        ChannelConfig::from_map(ChannelKind::Desktop, config).map(|_| ())
    }
}
