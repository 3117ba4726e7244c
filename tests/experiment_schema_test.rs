//! Experiment Schema Tests
//!
//! Run and row documents as they land in a `RunStore`.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use trueno_trainer::experiment::{
    fields, MemoryRunStore, MetricRecord, RunRecord, RunStatus, RunStore, ValidationRecord,
};

// =============================================================================
// RunRecord Tests
// =============================================================================

#[test]
fn test_run_record_creation() {
    let run = RunRecord::new("e42_kettle");

    assert_eq!(run.run_id(), "e42_kettle");
    assert_eq!(run.status(), RunStatus::Pending);
    assert_eq!(run.iteration(), None);
    assert_eq!(run.next_iteration(), 0);
    assert!(run.learning_rate().is_none());
    assert!(run.best_cost().is_infinite());
    assert!(run.created_at().timestamp() > 0);
}

#[test]
fn test_run_id_from_parts() {
    assert_eq!(RunRecord::id_from_parts(&["e42", "kettle"]), "e42_kettle");
    assert_eq!(RunRecord::id_from_parts(&[String::from("solo")]), "solo");
}

#[test]
fn test_run_record_with_config() {
    let config = serde_json::json!({
        "trainer": {"iteration_limit": 100},
        "model": "dae",
    });

    let run = RunRecord::builder("run-002").config(config.clone()).build();

    assert_eq!(run.config(), Some(&config));
}

#[test]
fn test_run_record_lifecycle() {
    let mut run = RunRecord::new("run-003");

    run.start();
    assert_eq!(run.status(), RunStatus::Running);
    assert!(run.started_at().is_some());
    assert!(run.ended_at().is_none());

    run.complete_iteration(0);
    run.complete_iteration(1);
    assert_eq!(run.next_iteration(), 2);

    run.complete(RunStatus::Interrupted);
    assert_eq!(run.status(), RunStatus::Interrupted);
    assert!(run.ended_at().is_some());
}

#[test]
fn test_learning_rate_change_log() {
    let mut run = RunRecord::new("run-004");

    assert!(run.set_learning_rate(0, 0.01));
    assert!(!run.set_learning_rate(50, 0.01));
    assert!(run.set_learning_rate(100, 0.001));

    assert_eq!(run.learning_rate(), Some(0.001));
    assert_eq!(run.learning_rates().len(), 2);
    assert_eq!(run.learning_rates().get(&100), Some(&0.001));
}

#[test]
fn test_best_cost_ties_count() {
    let mut run = RunRecord::new("run-005");

    assert!(run.observe_loss(0.5));
    assert!(!run.observe_loss(0.7));
    assert!(run.observe_loss(0.5));
    assert!(run.observe_loss(0.1));
    assert!((run.best_cost() - 0.1).abs() < f64::EPSILON);
}

#[test]
fn test_run_record_serialization() {
    let created_at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
    let mut run = RunRecord::builder("run-006").created_at(created_at).build();
    run.set_learning_rate(0, 0.01);
    run.complete_iteration(9);

    let json = serde_json::to_string(&run).expect("serialization failed");
    let deserialized: RunRecord = serde_json::from_str(&json).expect("deserialization failed");

    assert_eq!(run, deserialized);
    assert_eq!(deserialized.created_at(), created_at);
}

#[test]
fn test_infinite_best_cost_is_absent_in_json() {
    let run = RunRecord::new("run-007");
    let json = serde_json::to_value(&run).unwrap();
    assert!(json[fields::BEST_COST].is_null());
}

#[test]
fn test_partial_document_deserializes() {
    let run: RunRecord = serde_json::from_value(serde_json::json!({
        "run_id": "sparse",
        "iteration": 12,
    }))
    .unwrap();

    assert_eq!(run.status(), RunStatus::Pending);
    assert_eq!(run.next_iteration(), 13);
    assert!(run.learning_rates().is_empty());
}

// =============================================================================
// MetricRecord Tests
// =============================================================================

#[test]
fn test_metric_record_creation() {
    let metric = MetricRecord::new("run-001", 7, 0.25, "kettle", Duration::from_millis(1500));

    assert_eq!(metric.run_id(), "run-001");
    assert_eq!(metric.iteration(), 7);
    assert!((metric.loss() - 0.25).abs() < f64::EPSILON);
    assert_eq!(metric.source_id(), "kettle");
    assert!((metric.duration_secs() - 1.5).abs() < 1e-9);
}

#[test]
fn test_metric_record_custom_timestamp() {
    let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let metric = MetricRecord::builder("run-001", 0, 1.0, "a", Duration::ZERO)
        .timestamp(timestamp)
        .build();
    assert_eq!(metric.timestamp(), timestamp);
}

// =============================================================================
// ValidationRecord Tests
// =============================================================================

#[test]
fn test_validation_record_serialization() {
    let record = ValidationRecord::new("run-001", 100, "fridge", "unseen_appliances")
        .with_score("loss", 0.4);

    let json = serde_json::to_string(&record).unwrap();
    let deserialized: ValidationRecord = serde_json::from_str(&json).unwrap();

    assert_eq!(record, deserialized);
    assert_eq!(deserialized.score("loss"), Some(0.4));
}

// =============================================================================
// MemoryRunStore Tests
// =============================================================================

#[test]
fn test_store_round_trip_of_field_updates() {
    let store = MemoryRunStore::new();
    store.insert_run(&RunRecord::new("run-001")).unwrap();

    store
        .upsert_run_field("run-001", fields::ITERATION, serde_json::json!(41))
        .unwrap();
    store
        .upsert_run_field("run-001", &fields::learning_rate_at(40), serde_json::json!(0.001))
        .unwrap();
    store
        .upsert_run_field("run-001", fields::STATUS, serde_json::json!("Interrupted"))
        .unwrap();

    let run = store.find_run("run-001").unwrap().unwrap();
    assert_eq!(run.iteration(), Some(41));
    assert_eq!(run.learning_rates().get(&40), Some(&0.001));
    assert_eq!(run.status(), RunStatus::Interrupted);

    let document = store.run_document("run-001").unwrap();
    assert_eq!(document[fields::LEARNING_RATES]["40"], serde_json::json!(0.001));
}

#[test]
fn test_store_rows_are_per_run() {
    let store = MemoryRunStore::new();
    store
        .insert_metric(&MetricRecord::new("a", 0, 1.0, "s", Duration::ZERO))
        .unwrap();
    store
        .insert_metric(&MetricRecord::new("b", 0, 1.0, "s", Duration::ZERO))
        .unwrap();
    store
        .insert_validation(&ValidationRecord::new("a", 0, "s", "train"))
        .unwrap();

    assert_eq!(store.metric_count(), 2);
    assert_eq!(store.metrics_for_run("a").len(), 1);
    assert_eq!(store.validations_for_run("a").len(), 1);
    assert!(store.validations_for_run("b").is_empty());
}
