//! Integration tests for the embedded store: schema bootstrap, log append
//! round-trips, the scalar evaluation primitive, CRUD, and the retention
//! delete/compact surface.

mod common;

use chrono::Duration;
use pretty_assertions::assert_eq;

use common::{log_at, now_s, seed_logs, TestDb};
use peep::db;
use peep::error::AppError;
use peep::ingest::Ingestor;
use peep::models::{ChannelKind, CreateAlertRule, CreateNotificationChannel, NewLogRecord};

fn sample_rule(name: &str) -> CreateAlertRule {
    CreateAlertRule {
        name: name.to_string(),
        description: "errors in the last window".to_string(),
        query: "SELECT COUNT(*) FROM logs WHERE level='error'".to_string(),
        threshold: 3,
        window: "5m".to_string(),
        enabled: true,
    }
}

#[tokio::test]
async fn test_schema_bootstrap_is_idempotent() {
    let db = TestDb::new().await;

    let id = db.store.insert_log(&log_at(now_s(), "info", "hello")).await.unwrap();

    // Re-running the bootstrap must not alter existing data
    db::bootstrap_schema(db.store.pool()).await.unwrap();
    db::bootstrap_schema(db.store.pool()).await.unwrap();

    assert_eq!(db.store.count_logs().await.unwrap(), 1);
    assert_eq!(db.store.get_log(id).await.unwrap().message, "hello");
    assert!(db::health_check(db.store.pool()).await);
}

#[tokio::test]
async fn test_log_round_trip_preserves_fields() {
    let db = TestDb::new().await;
    let ts = now_s() - Duration::minutes(7);

    let mut record = log_at(ts, "error", "disk full");
    record.context = r#"{"disk":"/dev/sda1","free_bytes":0}"#.to_string();
    record.raw_log = "2025-06-01T09:00:00Z ERROR [api] disk full \u{1f4a5}\t{raw}".to_string();

    let id = db.store.insert_log(&record).await.unwrap();
    let stored = db.store.get_log(id).await.unwrap();

    assert_eq!(stored.timestamp, ts);
    assert_eq!(stored.level, "error");
    assert_eq!(stored.message, "disk full");
    assert_eq!(stored.service, "api");
    assert_eq!(stored.context, record.context);
    assert_eq!(stored.raw_log, record.raw_log);
}

#[tokio::test]
async fn test_insert_log_defaults_missing_timestamp() {
    let db = TestDb::new().await;

    let mut record = log_at(now_s(), "warn", "no ts");
    record.timestamp = None;

    let before = now_s();
    let id = db.store.insert_log(&record).await.unwrap();
    let stored = db.store.get_log(id).await.unwrap();

    assert!(stored.timestamp >= before);
    assert_eq!(stored.timestamp, stored.created_at);
}

#[tokio::test]
async fn test_run_scalar_returns_count() {
    let db = TestDb::new().await;
    seed_logs(&db.store, 4, now_s(), "error").await;
    seed_logs(&db.store, 2, now_s(), "info").await;

    let count = db
        .store
        .run_scalar("SELECT COUNT(*) FROM logs WHERE level='error'")
        .await
        .unwrap();
    assert_eq!(count, 4);
}

#[tokio::test]
async fn test_run_scalar_rejects_wrong_shapes() {
    let db = TestDb::new().await;
    seed_logs(&db.store, 2, now_s(), "error").await;

    // more than one column
    assert!(db.store.run_scalar("SELECT id, level FROM logs LIMIT 1").await.is_err());
    // more than one row
    assert!(db.store.run_scalar("SELECT id FROM logs").await.is_err());
    // zero rows
    assert!(db.store.run_scalar("SELECT id FROM logs WHERE 1=0").await.is_err());
    // invalid SQL
    assert!(db.store.run_scalar("SELEC COUNT(*) FROM logs").await.is_err());
}

#[tokio::test]
async fn test_validate_query() {
    let db = TestDb::new().await;

    assert!(db.store.validate_query("SELECT COUNT(*) FROM logs").await.is_ok());
    let err = db.store.validate_query("SELECT COUNT(*) FROM nope").await;
    assert!(matches!(err, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn test_rule_crud_and_unique_name() {
    let db = TestDb::new().await;

    let rule = db.store.insert_rule(&sample_rule("Errs")).await.unwrap();
    assert!(rule.id > 0);
    assert!(rule.last_check.is_none());
    assert!(rule.last_alert.is_none());

    let dup = db.store.insert_rule(&sample_rule("Errs")).await;
    assert!(matches!(dup, Err(AppError::Conflict(_))));

    let at = now_s();
    db.store.update_rule_check_time(rule.id, at).await.unwrap();
    db.store.update_rule_fire_time(rule.id, at).await.unwrap();

    let rules = db.store.list_rules().await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].last_check, Some(at));
    assert_eq!(rules[0].last_alert, Some(at));

    db.store.delete_rule(rule.id).await.unwrap();
    assert!(matches!(
        db.store.delete_rule(rule.id).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_channel_crud_round_trip() {
    let db = TestDb::new().await;

    let channel = db
        .store
        .insert_channel(&CreateNotificationChannel {
            name: "Ops hook".to_string(),
            kind: ChannelKind::Webhook,
            config: common::config_map(&[("webhook_url", "https://hooks.example.com/T1/B2")]),
            enabled: true,
        })
        .await
        .unwrap();

    let channels = db.store.list_channels().await.unwrap();
    assert_eq!(channels, vec![channel.clone()]);

    let dup = db
        .store
        .insert_channel(&CreateNotificationChannel {
            name: "Ops hook".to_string(),
            kind: ChannelKind::Desktop,
            config: Default::default(),
            enabled: true,
        })
        .await;
    assert!(matches!(dup, Err(AppError::Conflict(_))));

    db.store.delete_channel(channel.id).await.unwrap();
    assert!(db.store.list_channels().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_alert_instance_and_attempt_audit() {
    let db = TestDb::new().await;
    let rule = db.store.insert_rule(&sample_rule("Errs")).await.unwrap();

    let fired_at = now_s();
    let alert = db.store.insert_alert_instance(&rule, 5, fired_at).await.unwrap();
    assert_eq!(alert.rule_name, "Errs");
    assert_eq!(alert.count, 5);
    assert!(!alert.resolved);

    db.store
        .insert_notification_attempt(alert.id, 1, fired_at, true, None)
        .await
        .unwrap();
    db.store
        .insert_notification_attempt(alert.id, 2, fired_at, false, Some("boom"))
        .await
        .unwrap();

    let attempts = db.store.list_attempts(alert.id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert!(attempts[0].success);
    assert_eq!(attempts[1].error_message.as_deref(), Some("boom"));

    let resolved = db.store.resolve_instances(rule.id).await.unwrap();
    assert_eq!(resolved, 1);
    let instances = db.store.list_instances(10).await.unwrap();
    assert!(instances[0].resolved);

    // already resolved: nothing left to change
    assert_eq!(db.store.resolve_instances(rule.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_oldest_by_count_keeps_newest() {
    let db = TestDb::new().await;
    let base = now_s();

    for i in 0..10 {
        db.store
            .insert_log(&log_at(base - Duration::seconds(i), "info", &format!("m{}", i)))
            .await
            .unwrap();
    }

    let deleted = db.store.delete_oldest_by_count(4).await.unwrap();
    assert_eq!(deleted, 6);
    assert_eq!(db.store.count_logs().await.unwrap(), 4);

    let remaining = db.store.recent_logs(10).await.unwrap();
    for record in &remaining {
        assert!(record.timestamp >= base - Duration::seconds(3));
    }
}

#[tokio::test]
async fn test_delete_older_than_cutoff() {
    let db = TestDb::new().await;
    let base = now_s();

    seed_logs(&db.store, 5, base - Duration::hours(2), "info").await;
    seed_logs(&db.store, 3, base, "info").await;

    let deleted = db.store.delete_older_than(base - Duration::hours(1)).await.unwrap();
    assert_eq!(deleted, 5);
    assert_eq!(db.store.count_logs().await.unwrap(), 3);

    // nothing older than the cutoff remains
    assert_eq!(
        db.store.delete_older_than(base - Duration::hours(1)).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_ingestor_appends_and_defaults_timestamp() {
    let db = TestDb::new().await;
    let ingestor = Ingestor::new(db.store.clone());

    let before = now_s();
    let id1 = ingestor
        .write(NewLogRecord {
            raw_log: "bare line with no metadata".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let id2 = ingestor.write(log_at(now_s(), "error", "boom")).await.unwrap();
    assert!(id2 > id1);

    let stored = db.store.get_log(id1).await.unwrap();
    assert!(stored.timestamp >= before, "missing timestamp must default to now");
    assert_eq!(stored.raw_log, "bare line with no metadata");
}

#[tokio::test]
async fn test_compact_and_storage_size() {
    let db = TestDb::new().await;
    seed_logs(&db.store, 50, now_s(), "info").await;

    let bytes = db.store.approx_storage_bytes().await.unwrap();
    assert!(bytes > 0);

    db.store.delete_oldest_by_count(1).await.unwrap();
    db.store.compact().await.unwrap();
    assert_eq!(db.store.count_logs().await.unwrap(), 1);
}
