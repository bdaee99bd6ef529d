pub mod alert;
pub mod log;

pub use alert::{
    required_keys, AlertInstance, AlertRule, ChannelConfig, ChannelKind, CreateAlertRule,
    CreateNotificationChannel, EmailConfig, NotificationAttempt, NotificationChannel,
    ScriptConfig, WebhookConfig, DEFAULT_SCRIPT_TIMEOUT,
};
pub use log::{LogRecord, NewLogRecord};
