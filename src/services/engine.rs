//! Alert engine: owns the in-memory rule and channel caches, runs the
//! periodic evaluation loop, and drives the check -> fire -> persist ->
//! notify transition for each enabled rule.
//!
//! Rule queries are evaluated over a trailing window by appending a
//! `timestamp >= '<cutoff>'` predicate; the cutoff is computed in UTC with
//! the same canonical formatting ingestion writes, so the comparison is
//! exact.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;

use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use crate::models::{AlertRule, CreateAlertRule, CreateNotificationChannel, NotificationChannel};
use crate::services::notification::{self, create_dispatcher};
use crate::services::store::{fmt_ts, truncate_ts, LogStore};

/// Fallback when a rule's window string does not parse
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Consecutive failures to persist `last_check` before the engine task
/// considers the store gone and stops
const MAX_STORE_FAILURES: u32 = 10;

/// Name given to the channel seeded on first start
pub const DEFAULT_CHANNEL_NAME: &str = "Desktop Notifications";

/// Parses a rule window string ("30s", "5m", "1h"); falls back to 5 minutes
pub fn parse_window(window: &str) -> Duration {
    humantime::parse_duration(window.trim()).unwrap_or(DEFAULT_WINDOW)
}

/// Appends the trailing-window predicate to a rule query. Joins with AND
/// when the query already has a WHERE clause (any case), otherwise adds one.
pub fn compose_query(query: &str, cutoff: &str) -> String {
    let base = query.trim_end().trim_end_matches(';').trim_end();
    let has_where = base
        .to_uppercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .any(|token| token == "WHERE");

    if has_where {
        format!("{} AND timestamp >= '{}'", base, cutoff)
    } else {
        format!("{} WHERE timestamp >= '{}'", base, cutoff)
    }
}

/// The alert evaluation engine (C3). Exclusive owner of the in-memory rule
/// and channel caches; all external mutation goes through its operations.
pub struct AlertEngine {
    store: LogStore,
    config: EngineConfig,
    rules: Mutex<Vec<AlertRule>>,
    channels: Mutex<Vec<NotificationChannel>>,
    store_failures: AtomicU32,
}

impl AlertEngine {
    pub fn new(store: LogStore, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            rules: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            store_failures: AtomicU32::new(0),
        }
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Loads rules and channels into memory. Seeds the default desktop
    /// channel when none exist; channels whose stored config no longer
    /// parses are kept but disabled.
    pub async fn load(&self) -> AppResult<()> {
        let rules = self.store.list_rules().await?;
        let mut channels = self.store.list_channels().await?;

        if channels.is_empty() {
            let default = self
                .store
                .insert_channel(&CreateNotificationChannel {
                    name: DEFAULT_CHANNEL_NAME.to_string(),
                    kind: crate::models::ChannelKind::Desktop,
                    config: Default::default(),
                    enabled: true,
                })
                .await?;
            log::info!("no notification channels found, created default desktop channel");
            channels.push(default);
        }

        for channel in &mut channels {
            if channel.enabled {
                if let Err(e) = channel.parsed_config() {
                    log::warn!(
                        "channel {} ({}) has invalid config, disabling: {}",
                        channel.id,
                        channel.name,
                        e
                    );
                    channel.enabled = false;
                }
            }
        }

        log::info!(
            "alert engine loaded {} rule(s), {} channel(s)",
            rules.len(),
            channels.len()
        );

        *self.rules.lock().await = rules;
        *self.channels.lock().await = channels;
        Ok(())
    }

    // =========================================================================
    // Rule & Channel Operations
    // =========================================================================

    /// Snapshot of the in-memory rule cache
    pub async fn rules(&self) -> Vec<AlertRule> {
        self.rules.lock().await.clone()
    }

    /// Snapshot of the in-memory channel cache
    pub async fn channels(&self) -> Vec<NotificationChannel> {
        self.channels.lock().await.clone()
    }

    /// Validates and persists a rule, then updates the cache. A rejected
    /// rule leaves both unchanged.
    pub async fn add_rule(&self, input: CreateAlertRule) -> AppResult<AlertRule> {
        if input.name.trim().is_empty() {
            return Err(AppError::Validation("rule name must not be empty".to_string()));
        }
        if input.threshold < 1 {
            return Err(AppError::Validation(
                "rule threshold must be at least 1".to_string(),
            ));
        }

        // The query must be accepted with the window predicate appended,
        // exactly as the evaluation loop will run it.
        let cutoff = self.window_cutoff(&input.window, Utc::now());
        self.store
            .validate_query(&compose_query(&input.query, &fmt_ts(cutoff)))
            .await?;

        let rule = self.store.insert_rule(&input).await?;
        self.rules.lock().await.push(rule.clone());
        Ok(rule)
    }

    pub async fn remove_rule(&self, id: i64) -> AppResult<()> {
        self.store.delete_rule(id).await?;
        self.rules.lock().await.retain(|r| r.id != id);
        Ok(())
    }

    /// Validates and persists a channel, then updates the cache. A channel
    /// with missing required keys is rejected outright.
    pub async fn add_channel(
        &self,
        input: CreateNotificationChannel,
    ) -> AppResult<NotificationChannel> {
        if input.name.trim().is_empty() {
            return Err(AppError::Validation(
                "channel name must not be empty".to_string(),
            ));
        }

        create_dispatcher(input.kind).validate_config(&input.config)?;

        let channel = self.store.insert_channel(&input).await?;
        self.channels.lock().await.push(channel.clone());
        Ok(channel)
    }

    pub async fn remove_channel(&self, id: i64) -> AppResult<()> {
        self.store.delete_channel(id).await?;
        self.channels.lock().await.retain(|c| c.id != id);
        Ok(())
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Runs one evaluation pass over every enabled rule
    pub async fn tick(&self) {
        let snapshot: Vec<AlertRule> = self
            .rules
            .lock()
            .await
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect();

        for rule in snapshot {
            self.evaluate_rule(&rule).await;
        }
    }

    fn window_cutoff(&self, window: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let window = parse_window(window);
        now - chrono::Duration::from_std(window)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_WINDOW.as_secs() as i64))
    }

    async fn evaluate_rule(&self, rule: &AlertRule) {
        let cutoff = self.window_cutoff(&rule.window, Utc::now());
        let sql = compose_query(&rule.query, &fmt_ts(cutoff));

        // Second precision, matching what the store persists, so the cache
        // and the on-disk row stay identical
        let checked_at = truncate_ts(Utc::now());
        let count = match self.store.run_scalar(&sql).await {
            Ok(count) => count,
            Err(e) => {
                // The rule is skipped this tick, not disabled
                log::warn!("rule {} ({}) evaluation failed: {}", rule.id, rule.name, e);
                self.persist_check_time(rule.id, checked_at).await;
                return;
            }
        };

        self.persist_check_time(rule.id, checked_at).await;
        log::debug!(
            "rule {} ({}) evaluated: count={} threshold={}",
            rule.id,
            rule.name,
            count,
            rule.threshold
        );

        if count >= rule.threshold {
            if self.in_cooldown(rule, checked_at) {
                log::debug!("rule {} ({}) is in cooldown, not firing", rule.id, rule.name);
                return;
            }
            if let Err(e) = self.fire(rule, count).await {
                log::error!("rule {} ({}) fire failed: {}", rule.id, rule.name, e);
            }
        } else {
            // One full tick below threshold resolves open firings
            match self.store.resolve_instances(rule.id).await {
                Ok(n) if n > 0 => {
                    log::info!("rule {} ({}) recovered, resolved {} alert(s)", rule.id, rule.name, n)
                }
                Ok(_) => {}
                Err(e) => log::warn!("failed to resolve alerts for rule {}: {}", rule.id, e),
            }
        }
    }

    fn in_cooldown(&self, rule: &AlertRule, now: DateTime<Utc>) -> bool {
        match (self.config.cooldown, rule.last_alert) {
            (Some(cooldown), Some(last_alert)) => {
                let elapsed = now - last_alert;
                elapsed < chrono::Duration::from_std(cooldown).unwrap_or_else(|_| elapsed)
            }
            _ => false,
        }
    }

    /// Persists an alert instance for the firing, advances `last_alert`, and
    /// fans out to every enabled channel. Attempts run concurrently and are
    /// all awaited; a failing channel never blocks the others.
    async fn fire(&self, rule: &AlertRule, count: i64) -> AppResult<()> {
        let fired_at = truncate_ts(Utc::now());
        let alert = self.store.insert_alert_instance(rule, count, fired_at).await?;

        log::info!(
            "rule {} ({}) fired: count {} >= threshold {}",
            rule.id,
            rule.name,
            count,
            rule.threshold
        );

        self.update_cached_rule(rule.id, |r| r.last_alert = Some(fired_at))
            .await;
        self.store.update_rule_fire_time(rule.id, fired_at).await?;

        let channels: Vec<NotificationChannel> = self
            .channels
            .lock()
            .await
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .collect();

        join_all(
            channels
                .iter()
                .map(|channel| notification::dispatch(&self.store, channel, &alert)),
        )
        .await;

        Ok(())
    }

    async fn persist_check_time(&self, rule_id: i64, at: DateTime<Utc>) {
        self.update_cached_rule(rule_id, |r| r.last_check = Some(at))
            .await;

        // This write uses known-good SQL, so repeated failure here means the
        // store itself is gone rather than a bad rule query.
        match self.store.update_rule_check_time(rule_id, at).await {
            Ok(()) => {
                self.store_failures.store(0, Ordering::Relaxed);
            }
            Err(e) => {
                self.store_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("failed to persist last_check for rule {}: {}", rule_id, e);
            }
        }
    }

    async fn update_cached_rule(&self, id: i64, update: impl FnOnce(&mut AlertRule)) {
        let mut rules = self.rules.lock().await;
        if let Some(rule) = rules.iter_mut().find(|r| r.id == id) {
            update(rule);
        }
    }

    // =========================================================================
    // Run Loop
    // =========================================================================

    /// Runs the evaluation ticker until shutdown is signalled. An in-flight
    /// tick always completes; no new tick starts afterwards.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // intervals fire immediately; the first evaluation waits a full period
        ticker.tick().await;

        log::info!(
            "alert engine running, tick interval {:?}",
            self.config.tick_interval
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                    if self.store_failures.load(Ordering::Relaxed) >= MAX_STORE_FAILURES {
                        log::error!(
                            "store unreachable for {} consecutive writes, stopping alert engine",
                            MAX_STORE_FAILURES
                        );
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    log::info!("alert engine shutting down");
                    break;
                }
            }
        }
    }
}
