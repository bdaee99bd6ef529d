//! Script notification dispatcher.
//!
//! Executes a user script with the alert fields injected as PEEP_ALERT_*
//! environment variables. The child gets a hard wall-clock timeout and is
//! killed on expiry; exit code 0 is the only success.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::{AlertMessage, NotificationDispatcher, NotificationResult};
use crate::error::AppResult;
use crate::models::{ChannelConfig, ChannelKind, NotificationChannel, ScriptConfig};

/// Script notification dispatcher
pub struct ScriptNotifier;

impl ScriptNotifier {
    pub fn new() -> Self {
        Self
    }

    fn build_command(config: &ScriptConfig, message: &AlertMessage) -> Command {
        let mut cmd = Command::new(&config.script_path);
        cmd.args(&config.args)
            .env("PEEP_ALERT_TITLE", &message.title)
            .env("PEEP_ALERT_MESSAGE", &message.body)
            .env("PEEP_ALERT_SEVERITY", message.severity.to_string())
            .env("PEEP_ALERT_COUNT", message.count.to_string())
            .env("PEEP_ALERT_THRESHOLD", message.threshold.to_string())
            .env("PEEP_ALERT_RATIO", format!("{:.2}", message.ratio))
            .env(
                "PEEP_ALERT_TIMESTAMP",
                message
                    .fired_at
                    .with_timezone(&chrono::Local)
                    .to_rfc3339(),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        for (key, value) in &config.environment {
            cmd.env(key, value);
        }
        if let Some(ref dir) = config.working_dir {
            cmd.current_dir(dir);
        }

        cmd
    }
}

impl Default for ScriptNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationDispatcher for ScriptNotifier {
    async fn send(
        &self,
        channel: &NotificationChannel,
        message: &AlertMessage,
    ) -> NotificationResult {
        let config = match channel.parsed_config() {
            Ok(ChannelConfig::Script(c)) => c,
            Ok(_) => {
                return NotificationResult::failure("channel is not a script channel".to_string())
            }
            Err(e) => return NotificationResult::failure(format!("invalid script config: {}", e)),
        };

        let mut child = match Self::build_command(&config, message).spawn() {
            Ok(child) => child,
            Err(e) => {
                return NotificationResult::failure(format!(
                    "failed to start script '{}': {}",
                    config.script_path, e
                ))
            }
        };

        match tokio::time::timeout(config.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => NotificationResult::success(),
            Ok(Ok(status)) => {
                let detail = match status.code() {
                    Some(code) => format!("exit code {}", code),
                    None => "terminated by signal".to_string(),
                };
                NotificationResult::failure(format!(
                    "script '{}' failed with {}",
                    config.script_path, detail
                ))
            }
            Ok(Err(e)) => {
                NotificationResult::failure(format!("script execution failed: {}", e))
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    log::warn!("failed to kill timed-out script: {}", e);
                }
                NotificationResult::failure(format!(
                    "script '{}' timed out after {}",
                    config.script_path,
                    humantime::format_duration(config.timeout)
                ))
            }
        }
    }

    fn validate_config(&self, config: &HashMap<String, String>) -> AppResult<()> {
        ChannelConfig::from_map(ChannelKind::Script, config).map(|_| ())
    }
}
