//! Common test utilities and helpers
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use peep::db;
use peep::models::NewLogRecord;
use peep::services::LogStore;

/// A store backed by a temp-dir database file, deleted on drop
pub struct TestDb {
    pub store: LogStore,
    dir: TempDir,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("peep-test.db");
        let pool = db::create_pool(&path).await.expect("create pool");
        db::bootstrap_schema(&pool).await.expect("bootstrap schema");

        Self {
            store: LogStore::new(pool),
            dir,
        }
    }

    pub fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("peep-test.db")
    }
}

/// Current time truncated to the second precision the store persists
pub fn now_s() -> DateTime<Utc> {
    Utc.timestamp_opt(Utc::now().timestamp(), 0).unwrap()
}

pub fn log_at(timestamp: DateTime<Utc>, level: &str, message: &str) -> NewLogRecord {
    NewLogRecord {
        timestamp: Some(timestamp),
        level: level.to_string(),
        message: message.to_string(),
        service: "api".to_string(),
        context: "{}".to_string(),
        raw_log: format!("[{}] {}", level, message),
    }
}

pub async fn seed_logs(store: &LogStore, n: usize, timestamp: DateTime<Utc>, level: &str) {
    for i in 0..n {
        store
            .insert_log(&log_at(timestamp, level, &format!("event {}", i)))
            .await
            .expect("insert log");
    }
}

/// Builds a channel config map from literal pairs
pub fn config_map(pairs: &[(&str, &str)]) -> std::collections::HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
