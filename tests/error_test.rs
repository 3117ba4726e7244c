//! Tests for error types

use trueno_trainer::error::TrainingFailure;
use trueno_trainer::Error;

#[test]
fn test_channel_closed_error() {
    let error = Error::ChannelClosed;
    assert_eq!(format!("{error}"), "Batch channel closed");
}

#[test]
fn test_interrupted_error() {
    let error = Error::Interrupted;
    assert!(format!("{error}").contains("interrupted by operator"));
}

#[test]
fn test_source_errors() {
    assert_eq!(format!("{}", Error::SourceExhausted), "Batch source exhausted");

    let error = Error::Source("disk unplugged".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Batch source error"));
    assert!(error_str.contains("disk unplugged"));
}

#[test]
fn test_training_error_carries_iteration() {
    let error = Error::Training {
        iteration: 42,
        cause: TrainingFailure::NanLoss,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("iteration 42"));
    assert!(error_str.contains("NaN"));
    assert_eq!(error.iteration(), Some(42));
    assert!(error.is_divergence());
}

#[test]
fn test_step_failure_is_not_divergence() {
    let error = Error::Training {
        iteration: 3,
        cause: TrainingFailure::Step("out of memory".to_string()),
    };
    assert!(!error.is_divergence());
    assert!(format!("{error}").contains("out of memory"));
    assert_eq!(Error::ChannelClosed.iteration(), None);
}

#[test]
fn test_empty_loss_failure() {
    let failure = TrainingFailure::EmptyLoss;
    assert!(format!("{failure}").contains("empty loss tensor"));
}

#[test]
fn test_invalid_schedule_error() {
    let error = Error::InvalidSchedule("period must be positive, got 0".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid schedule"));
    assert!(error_str.contains("got 0"));
}

#[test]
fn test_run_exists_error_has_guidance() {
    let error = Error::RunExists("e1_kettle".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Run already exists: e1_kettle"));
    assert!(error_str.contains("ConflictPolicy::Delete"));
}

#[test]
fn test_store_and_model_errors() {
    assert!(format!("{}", Error::Store("timeout".into())).contains("Run store error: timeout"));
    assert!(format!("{}", Error::Model("no disk".into())).contains("Model error: no disk"));
    assert!(format!("{}", Error::Config("bad".into())).contains("Config validation error"));
}

#[test]
fn test_command_and_state_errors() {
    let error = Error::InvalidCommand("x".to_string());
    assert!(format!("{error}").contains("Unrecognised operator command: x"));

    let error = Error::InvalidState("run was aborted".to_string());
    assert!(format!("{error}").contains("Invalid state: run was aborted"));
}

#[test]
fn test_worker_panicked_error() {
    let error_str = format!("{}", Error::WorkerPanicked);
    assert!(error_str.contains("Prefetch worker panicked"));
    assert!(error_str.contains("Please report this issue"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let error: Error = json_error.into();
    assert!(format!("{error}").contains("JSON error"));
}

#[test]
fn test_error_debug() {
    let error = Error::Source("test".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("Source"));
}
