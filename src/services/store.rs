//! Embedded store access: durable append for logs, CRUD for rules and
//! channels, audit writes, the engine's scalar evaluation primitive, and the
//! bulk delete + compact surface used by retention.
//!
//! All timestamps are UTC and persist as TEXT in one canonical second-
//! precision format, so `timestamp >= '<cutoff>'` predicates appended to rule
//! queries compare correctly as text.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row};

use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::{
    AlertInstance, AlertRule, ChannelKind, CreateAlertRule, CreateNotificationChannel, LogRecord,
    NewLogRecord, NotificationAttempt, NotificationChannel,
};

/// Canonical persisted timestamp format (UTC, second precision)
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats a UTC timestamp in the store's canonical form
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// Parses a timestamp in the store's canonical form
pub fn parse_ts(s: &str) -> AppResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| AppError::Internal(format!("malformed stored timestamp '{}': {}", s, e)))
}

/// Truncates a timestamp to the precision the store persists
pub fn truncate_ts(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(ts.timestamp(), 0).single().unwrap_or(ts)
}

/// Handle to the embedded store. Cheap to clone; all mutation in the process
/// goes through this type.
#[derive(Clone)]
pub struct LogStore {
    pool: DbPool,
}

impl LogStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    // =========================================================================
    // Logs
    // =========================================================================

    /// Appends one log row. The event timestamp is preserved as given;
    /// a missing timestamp falls back to ingestion wall-clock.
    pub async fn insert_log(&self, record: &NewLogRecord) -> AppResult<i64> {
        let now = truncate_ts(Utc::now());
        let timestamp = record.timestamp.map(truncate_ts).unwrap_or(now);

        let result = sqlx::query(
            r#"
            INSERT INTO logs (timestamp, level, message, service, context, raw_log, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(fmt_ts(timestamp))
        .bind(&record.level)
        .bind(&record.message)
        .bind(&record.service)
        .bind(&record.context)
        .bind(&record.raw_log)
        .bind(fmt_ts(now))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Gets a log row by id
    pub async fn get_log(&self, id: i64) -> AppResult<LogRecord> {
        sqlx::query(
            r#"
            SELECT id, timestamp, level, message, service, context, raw_log, created_at
            FROM logs
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| log_from_row(&row))
        .transpose()?
        .ok_or_else(|| AppError::NotFound(format!("log {} not found", id)))
    }

    /// Most recent log rows, newest first (read surface for the dashboard)
    pub async fn recent_logs(&self, limit: i64) -> AppResult<Vec<LogRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, level, message, service, context, raw_log, created_at
            FROM logs
            ORDER BY timestamp DESC, id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(log_from_row).collect()
    }

    pub async fn count_logs(&self) -> AppResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get(0)?)
    }

    /// Current database size in bytes (page count times page size)
    pub async fn approx_storage_bytes(&self) -> AppResult<u64> {
        let page_count: i64 = sqlx::query("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        let page_size: i64 = sqlx::query("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        Ok((page_count as u64) * (page_size as u64))
    }

    // =========================================================================
    // Scalar Evaluation
    // =========================================================================

    /// Runs an arbitrary read query that must produce exactly one row with
    /// exactly one integer column. Anything else is an error.
    pub async fn run_scalar(&self, sql: &str) -> AppResult<i64> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;

        if rows.len() != 1 {
            return Err(AppError::Validation(format!(
                "scalar query returned {} rows, expected exactly 1",
                rows.len()
            )));
        }
        let row = &rows[0];
        if row.columns().len() != 1 {
            return Err(AppError::Validation(format!(
                "scalar query returned {} columns, expected exactly 1",
                row.columns().len()
            )));
        }

        row.try_get::<i64, _>(0).map_err(|e| {
            AppError::Validation(format!("scalar query result is not an integer: {}", e))
        })
    }

    /// Checks that the store accepts a query without executing it
    pub async fn validate_query(&self, sql: &str) -> AppResult<()> {
        (&self.pool)
            .prepare(sql)
            .await
            .map_err(|e| AppError::Validation(format!("query rejected by store: {}", e)))?;
        Ok(())
    }

    // =========================================================================
    // Alert Rules
    // =========================================================================

    pub async fn insert_rule(&self, input: &CreateAlertRule) -> AppResult<AlertRule> {
        let created_at = truncate_ts(Utc::now());

        let result = sqlx::query(
            r#"
            INSERT INTO alert_rules (name, description, query, threshold, "window", enabled, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.query)
        .bind(input.threshold)
        .bind(&input.window)
        .bind(input.enabled)
        .bind(fmt_ts(created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("rule '{}' already exists", input.name)))?;

        Ok(AlertRule {
            id: result.last_insert_rowid(),
            name: input.name.clone(),
            description: input.description.clone(),
            query: input.query.clone(),
            threshold: input.threshold,
            window: input.window.clone(),
            enabled: input.enabled,
            created_at,
            last_check: None,
            last_alert: None,
        })
    }

    pub async fn list_rules(&self) -> AppResult<Vec<AlertRule>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, query, threshold, "window", enabled,
                   created_at, last_check, last_alert
            FROM alert_rules
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(rule_from_row).collect()
    }

    pub async fn update_rule_check_time(&self, id: i64, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE alert_rules SET last_check = ?2 WHERE id = ?1")
            .bind(id)
            .bind(fmt_ts(at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_rule_fire_time(&self, id: i64, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE alert_rules SET last_alert = ?2 WHERE id = ?1")
            .bind(id)
            .bind(fmt_ts(at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_rule(&self, id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("rule {} not found", id)));
        }
        Ok(())
    }

    // =========================================================================
    // Notification Channels
    // =========================================================================

    pub async fn insert_channel(
        &self,
        input: &CreateNotificationChannel,
    ) -> AppResult<NotificationChannel> {
        let config_string = serde_json::to_string(&input.config)
            .map_err(|e| AppError::Internal(format!("failed to encode channel config: {}", e)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO notification_channels (name, type, config_string, enabled)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&input.name)
        .bind(input.kind.to_string())
        .bind(&config_string)
        .bind(input.enabled)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || format!("channel '{}' already exists", input.name))
        })?;

        Ok(NotificationChannel {
            id: result.last_insert_rowid(),
            name: input.name.clone(),
            kind: input.kind,
            config: input.config.clone(),
            enabled: input.enabled,
        })
    }

    pub async fn list_channels(&self) -> AppResult<Vec<NotificationChannel>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, type, config_string, enabled
            FROM notification_channels
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(channel_from_row).collect()
    }

    pub async fn delete_channel(&self, id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM notification_channels WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("channel {} not found", id)));
        }
        Ok(())
    }

    // =========================================================================
    // Alert Instances & Notification Attempts
    // =========================================================================

    pub async fn insert_alert_instance(
        &self,
        rule: &AlertRule,
        count: i64,
        fired_at: DateTime<Utc>,
    ) -> AppResult<AlertInstance> {
        let fired_at = truncate_ts(fired_at);

        let result = sqlx::query(
            r#"
            INSERT INTO alert_instances (rule_id, rule_name, count, threshold, query, fired_at, resolved)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(count)
        .bind(rule.threshold)
        .bind(&rule.query)
        .bind(fmt_ts(fired_at))
        .execute(&self.pool)
        .await?;

        Ok(AlertInstance {
            id: result.last_insert_rowid(),
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            count,
            threshold: rule.threshold,
            query: rule.query.clone(),
            fired_at,
            resolved: false,
        })
    }

    pub async fn list_instances(&self, limit: i64) -> AppResult<Vec<AlertInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT id, rule_id, rule_name, count, threshold, query, fired_at, resolved
            FROM alert_instances
            ORDER BY fired_at DESC, id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(instance_from_row).collect()
    }

    /// Marks all open instances of a rule resolved; returns how many changed
    pub async fn resolve_instances(&self, rule_id: i64) -> AppResult<u64> {
        let result =
            sqlx::query("UPDATE alert_instances SET resolved = 1 WHERE rule_id = ?1 AND resolved = 0")
                .bind(rule_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn insert_notification_attempt(
        &self,
        alert_id: i64,
        channel_id: i64,
        sent_at: DateTime<Utc>,
        success: bool,
        error_message: Option<&str>,
    ) -> AppResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO alert_notifications (alert_id, channel_id, sent_at, success, error_message)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(alert_id)
        .bind(channel_id)
        .bind(fmt_ts(truncate_ts(sent_at)))
        .bind(success)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn list_attempts(&self, alert_id: i64) -> AppResult<Vec<NotificationAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT id, alert_id, channel_id, sent_at, success, error_message
            FROM alert_notifications
            WHERE alert_id = ?1
            ORDER BY sent_at, id
            "#,
        )
        .bind(alert_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(attempt_from_row).collect()
    }

    // =========================================================================
    // Retention Primitives
    // =========================================================================

    /// Deletes the oldest rows by event time, keeping the newest
    /// `keep_last_n`. Returns how many rows were deleted.
    pub async fn delete_oldest_by_count(&self, keep_last_n: u64) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM logs
            WHERE id NOT IN (
                SELECT id FROM logs ORDER BY timestamp DESC, id DESC LIMIT ?1
            )
            "#,
        )
        .bind(keep_last_n as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes rows with event time strictly older than the cutoff
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM logs WHERE timestamp < ?1")
            .bind(fmt_ts(truncate_ts(cutoff)))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Reclaims free pages after bulk deletes
    pub async fn compact(&self) -> AppResult<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}

fn conflict_on_unique(e: sqlx::Error, msg: impl FnOnce() -> String) -> AppError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.message().contains("UNIQUE constraint failed") {
            return AppError::Conflict(msg());
        }
    }
    AppError::Database(e)
}

// =============================================================================
// Row Mapping
// =============================================================================

fn get_ts(row: &SqliteRow, column: &str) -> AppResult<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    parse_ts(&raw)
}

fn get_opt_ts(row: &SqliteRow, column: &str) -> AppResult<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.as_deref().map(parse_ts).transpose()
}

fn log_from_row(row: &SqliteRow) -> AppResult<LogRecord> {
    Ok(LogRecord {
        id: row.try_get("id")?,
        timestamp: get_ts(row, "timestamp")?,
        level: row.try_get("level")?,
        message: row.try_get("message")?,
        service: row.try_get("service")?,
        context: row.try_get("context")?,
        raw_log: row.try_get("raw_log")?,
        created_at: get_ts(row, "created_at")?,
    })
}

fn rule_from_row(row: &SqliteRow) -> AppResult<AlertRule> {
    Ok(AlertRule {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        query: row.try_get("query")?,
        threshold: row.try_get("threshold")?,
        window: row.try_get("window")?,
        enabled: row.try_get("enabled")?,
        created_at: get_ts(row, "created_at")?,
        last_check: get_opt_ts(row, "last_check")?,
        last_alert: get_opt_ts(row, "last_alert")?,
    })
}

fn channel_from_row(row: &SqliteRow) -> AppResult<NotificationChannel> {
    let kind_raw: String = row.try_get("type")?;
    let config_raw: String = row.try_get("config_string")?;
    let config: HashMap<String, String> = serde_json::from_str(&config_raw)
        .map_err(|e| AppError::Internal(format!("malformed channel config: {}", e)))?;

    Ok(NotificationChannel {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind: kind_raw.parse::<ChannelKind>()?,
        config,
        enabled: row.try_get("enabled")?,
    })
}

fn instance_from_row(row: &SqliteRow) -> AppResult<AlertInstance> {
    Ok(AlertInstance {
        id: row.try_get("id")?,
        rule_id: row.try_get("rule_id")?,
        rule_name: row.try_get("rule_name")?,
        count: row.try_get("count")?,
        threshold: row.try_get("threshold")?,
        query: row.try_get("query")?,
        fired_at: get_ts(row, "fired_at")?,
        resolved: row.try_get("resolved")?,
    })
}

fn attempt_from_row(row: &SqliteRow) -> AppResult<NotificationAttempt> {
    Ok(NotificationAttempt {
        id: row.try_get("id")?,
        alert_id: row.try_get("alert_id")?,
        channel_id: row.try_get("channel_id")?,
        sent_at: get_ts(row, "sent_at")?,
        success: row.try_get("success")?,
        error_message: row.try_get("error_message")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ts_round_trip() {
        let now = truncate_ts(Utc::now());
        assert_eq!(parse_ts(&fmt_ts(now)).unwrap(), now);
    }

    #[test]
    fn test_fmt_ts_is_lexically_ordered() {
        let older = Utc.with_ymd_and_hms(2025, 3, 1, 23, 59, 59).unwrap();
        let newer = Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap();
        assert!(fmt_ts(older) < fmt_ts(newer));
    }

    #[test]
    fn test_parse_ts_rejects_garbage() {
        assert!(parse_ts("yesterday").is_err());
        assert!(parse_ts("2025-03-01T12:00:00Z").is_err());
    }
}
