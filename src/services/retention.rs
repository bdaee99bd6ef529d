//! Retention manager: periodic policy checks against the store, bounded
//! deletes when a policy is violated, and a best-effort compact afterwards.
//!
//! The count cap is applied before the age cap so that after a sweep the
//! store satisfies every enabled policy. `max_size_mb` is a trigger only:
//! when the database outgrows it, reclamation is delegated to the count cap.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::RetentionConfig;
use crate::error::AppResult;
use crate::services::store::LogStore;

/// What one sweep did
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub deleted_by_count: u64,
    pub deleted_by_age: u64,
    pub compacted: bool,
}

impl SweepReport {
    pub fn total_deleted(&self) -> u64 {
        self.deleted_by_count + self.deleted_by_age
    }
}

/// The retention manager (C4). Mutates only the `logs` table.
pub struct RetentionManager {
    store: LogStore,
    policy: RetentionConfig,
    sweeping: AtomicBool,
}

impl RetentionManager {
    pub fn new(store: LogStore, policy: RetentionConfig) -> Self {
        Self {
            store,
            policy,
            sweeping: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> &RetentionConfig {
        &self.policy
    }

    /// Runs one policy check immediately. Concurrent calls are collapsed by
    /// a single-flight guard: a sweep that finds one already running is a
    /// no-op reporting zero deletions.
    pub async fn trigger_now(&self) -> AppResult<SweepReport> {
        if !self.policy.enabled {
            return Ok(SweepReport::default());
        }

        if self
            .sweeping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("retention sweep already running, skipping");
            return Ok(SweepReport::default());
        }

        let result = self.sweep().await;
        self.sweeping.store(false, Ordering::SeqCst);
        result
    }

    async fn sweep(&self) -> AppResult<SweepReport> {
        let mut report = SweepReport::default();

        if self.policy.max_logs > 0 {
            let count = self.store.count_logs().await? as u64;
            if count > self.policy.max_logs {
                report.deleted_by_count =
                    self.store.delete_oldest_by_count(self.policy.max_logs).await?;
                log::info!(
                    "retention: deleted {} row(s) over the {}-row cap",
                    report.deleted_by_count,
                    self.policy.max_logs
                );
            }
        }

        if let Some(max_age) = self.policy.max_age {
            if let Ok(age) = chrono::Duration::from_std(max_age) {
                let deleted = self.store.delete_older_than(Utc::now() - age).await?;
                if deleted > 0 {
                    log::info!(
                        "retention: deleted {} row(s) older than {}",
                        deleted,
                        humantime::format_duration(max_age)
                    );
                }
                report.deleted_by_age = deleted;
            }
        }

        if self.policy.max_size_mb > 0 && report.total_deleted() == 0 {
            let bytes = self.store.approx_storage_bytes().await?;
            if bytes > self.policy.max_size_mb * 1024 * 1024 {
                if self.policy.max_logs > 0 {
                    report.deleted_by_count =
                        self.store.delete_oldest_by_count(self.policy.max_logs).await?;
                    log::info!(
                        "retention: database at {} bytes exceeds {} MB, trimmed {} row(s)",
                        bytes,
                        self.policy.max_size_mb,
                        report.deleted_by_count
                    );
                } else {
                    log::warn!(
                        "database size {} bytes exceeds {} MB but no row policy is configured to reclaim space",
                        bytes,
                        self.policy.max_size_mb
                    );
                }
            }
        }

        if report.total_deleted() > 0 {
            match self.store.compact().await {
                Ok(()) => report.compacted = true,
                Err(e) => log::warn!("compact after retention sweep failed: {}", e),
            }
        }

        Ok(report)
    }

    /// Runs the policy ticker until shutdown is signalled
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.policy.enabled {
            log::info!("retention manager disabled");
            return;
        }

        let mut ticker = tokio::time::interval(self.policy.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        log::info!(
            "retention manager running, check interval {:?}",
            self.policy.check_interval
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.trigger_now().await {
                        log::error!("retention sweep failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    log::info!("retention manager shutting down");
                    break;
                }
            }
        }
    }
}
