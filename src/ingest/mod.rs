//! Ingest front-end: accepts normalized log records and appends them
//! through the store. Line parsing heuristics live upstream; this module
//! only consumes the normalized form (one JSON object per line on stdin).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use crate::error::AppResult;
use crate::models::NewLogRecord;
use crate::services::retention::RetentionManager;
use crate::services::store::LogStore;

/// How many appended records between eager retention pokes
const EAGER_SWEEP_EVERY: u64 = 500;

/// Writer half of the ingest path
pub struct Ingestor {
    store: LogStore,
    retention: Option<Arc<RetentionManager>>,
    written: AtomicU64,
}

impl Ingestor {
    pub fn new(store: LogStore) -> Self {
        Self {
            store,
            retention: None,
            written: AtomicU64::new(0),
        }
    }

    /// Enables eager retention sweeps from the ingest path
    pub fn with_retention(mut self, retention: Arc<RetentionManager>) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Appends one record. A missing event timestamp is set to ingestion
    /// wall-clock so stored timestamps are never null.
    pub async fn write(&self, mut record: NewLogRecord) -> AppResult<i64> {
        if record.timestamp.is_none() {
            record.timestamp = Some(Utc::now());
        }

        let id = self.store.insert_log(&record).await?;

        let written = self.written.fetch_add(1, Ordering::Relaxed) + 1;
        if written % EAGER_SWEEP_EVERY == 0 {
            if let Some(ref retention) = self.retention {
                // Single-flight inside trigger_now makes redundant pokes free
                if let Err(e) = retention.trigger_now().await {
                    log::warn!("eager retention sweep failed: {}", e);
                }
            }
        }

        Ok(id)
    }

    /// Reads normalized records from stdin, one JSON object per line, until
    /// the stream closes or shutdown is signalled
    pub async fn run_stdin(&self, mut shutdown: watch::Receiver<bool>) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<NewLogRecord>(line) {
                            Ok(mut record) => {
                                if record.raw_log.is_empty() {
                                    record.raw_log = line.to_string();
                                }
                                if let Err(e) = self.write(record).await {
                                    log::error!("failed to store log record: {}", e);
                                }
                            }
                            Err(e) => log::warn!("skipping malformed input line: {}", e),
                        }
                    }
                    Ok(None) => {
                        log::info!("input stream closed");
                        break;
                    }
                    Err(e) => {
                        log::error!("failed to read input: {}", e);
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    log::info!("ingest shutting down");
                    break;
                }
            }
        }
    }
}
