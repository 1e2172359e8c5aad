use jobqueue::{
    BackoffStrategy, Error, Job, JobOptions, JobState, QueueConfig, QueueConfigBuilder,
    QueueEvent,
};
use serde_json::json;
use std::time::Duration;

#[test]
fn test_config_builder() {
    let config = QueueConfigBuilder::new()
        .key_prefix("bookmarks")
        .concurrency(8)
        .max_jobs(50)
        .poll_interval(Duration::from_millis(20))
        .promotion_interval(Duration::from_secs(1))
        .cleanup_interval(Duration::from_secs(30))
        .max_job_age(Duration::from_secs(3_600))
        .error_backoff(Duration::from_millis(250))
        .build();

    assert_eq!(config.key_prefix, "bookmarks");
    assert_eq!(config.concurrency, 8);
    assert_eq!(config.max_jobs, 50);
    assert_eq!(config.poll_interval, Duration::from_millis(20));
    assert_eq!(config.promotion_interval, Duration::from_secs(1));
    assert_eq!(config.cleanup_interval, Duration::from_secs(30));
    assert_eq!(config.max_job_age, Duration::from_secs(3_600));
    assert_eq!(config.error_backoff, Duration::from_millis(250));
}

#[test]
fn test_config_defaults() {
    let config = QueueConfig::default();

    assert_eq!(config.key_prefix, "jobqueue");
    assert_eq!(config.concurrency, 5);
    assert_eq!(config.max_jobs, 10_000);
    assert_eq!(config.poll_interval, Duration::from_millis(100));
    assert_eq!(config.promotion_interval, Duration::from_secs(5));
    assert_eq!(config.cleanup_interval, Duration::from_secs(60));
    assert_eq!(config.max_job_age, Duration::from_secs(86_400));
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation() {
    let invalid = [
        QueueConfigBuilder::new().key_prefix(""),
        QueueConfigBuilder::new().concurrency(0),
        QueueConfigBuilder::new().max_jobs(0),
        QueueConfigBuilder::new().poll_interval(Duration::ZERO),
        QueueConfigBuilder::new().promotion_interval(Duration::ZERO),
        QueueConfigBuilder::new().cleanup_interval(Duration::ZERO),
    ];

    for builder in invalid {
        match builder.build_and_validate() {
            Err(Error::Config(_)) => {}
            other => panic!("Expected configuration error, got {:?}", other),
        }
    }
}

#[test]
fn test_config_from_env() {
    std::env::set_var("JOBQUEUE_CONCURRENCY", "12");
    std::env::set_var("JOBQUEUE_PROMOTION_INTERVAL_MS", "750");
    std::env::set_var("JOBQUEUE_MAX_JOBS", "not-a-number");

    let config = QueueConfig::from_env();

    std::env::remove_var("JOBQUEUE_CONCURRENCY");
    std::env::remove_var("JOBQUEUE_PROMOTION_INTERVAL_MS");
    std::env::remove_var("JOBQUEUE_MAX_JOBS");

    assert_eq!(config.concurrency, 12);
    assert_eq!(config.promotion_interval, Duration::from_millis(750));
    assert_eq!(config.max_jobs, 10_000);
}

#[test]
fn test_error_display() {
    let full = Error::QueueFull {
        queue: "emails".to_string(),
        max_jobs: 3,
    };
    assert_eq!(
        full.to_string(),
        "Queue full: queue 'emails' already holds 3 waiting jobs"
    );

    let missing = Error::ProcessorNotRegistered("resize".to_string());
    assert_eq!(
        missing.to_string(),
        "Processor not registered: no handler for job type 'resize'"
    );

    let timeout = Error::JobTimeout {
        job_id: "abc".to_string(),
        timeout_ms: 250,
    };
    assert_eq!(timeout.to_string(), "Job timeout: job abc exceeded 250ms");

    let handler = Error::Handler("Job failed".to_string());
    assert_eq!(handler.to_string(), "Handler error: Job failed");

    let config = Error::Config("Invalid configuration".to_string());
    assert_eq!(
        config.to_string(),
        "Configuration error: Invalid configuration"
    );
}

#[test]
fn test_error_from_serde() {
    let serde_error = serde_json::from_str::<String>("invalid json").unwrap_err();
    let error: Error = serde_error.into();

    match error {
        Error::Serialization(_) => {} // Expected
        _ => panic!("Expected Serialization error"),
    }
}

#[test]
fn test_backoff_formulas() {
    let base = 5_000;
    for attempt in 1..=5_u32 {
        assert_eq!(BackoffStrategy::Fixed.delay_ms(base, attempt), base);
        assert_eq!(
            BackoffStrategy::Linear.delay_ms(base, attempt),
            base * u64::from(attempt)
        );
        assert_eq!(
            BackoffStrategy::Exponential.delay_ms(base, attempt),
            base * 2_u64.pow(attempt - 1)
        );
    }
}

#[test]
fn test_job_option_defaults() {
    let options = JobOptions::default();

    assert_eq!(options.priority, 0);
    assert_eq!(options.max_attempts, 3);
    assert_eq!(options.delay_ms, 0);
    assert_eq!(options.timeout_ms, Some(30_000));
    assert_eq!(options.retry_base_delay_ms, 5_000);
    assert_eq!(options.backoff_strategy, BackoffStrategy::Exponential);
    assert!(options.tags.is_empty());
    assert_eq!(JobOptions::default().without_timeout().timeout_ms, None);
}

#[test]
fn test_job_creation() {
    let options = JobOptions::default().with_priority(3).with_tag("nightly");
    let job = Job::new("categorize", json!({ "bookmark": 1 }), &options, 1_000).unwrap();

    assert!(!job.id.is_empty());
    assert_eq!(job.job_type, "categorize");
    assert_eq!(job.priority, 3);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.created_at, 1_000);
    assert_eq!(job.waiting_score(), -3.0);
    assert!(job.has_attempts_left());
    assert!(job.processed_at.is_none());
    assert!(job.result.is_none());
}

#[test]
fn test_job_serialization_uses_type_key() {
    let job = Job::new("categorize", json!([1, 2]), &JobOptions::default(), 0).unwrap();
    let value = serde_json::to_value(&job).unwrap();

    assert_eq!(value["type"], "categorize");
    assert_eq!(value["backoff_strategy"], "exponential");
    assert!(value.get("job_type").is_none());
}

#[test]
fn test_retry_delay_follows_attempts() {
    let options = JobOptions::default()
        .with_retry_base_delay_ms(100)
        .with_max_attempts(5)
        .with_backoff(BackoffStrategy::Exponential);
    let mut job = Job::new("x", json!(null), &options, 0).unwrap();

    job.attempts = 1;
    assert_eq!(job.retry_delay_ms(), 100);
    job.attempts = 3;
    assert_eq!(job.retry_delay_ms(), 400);
    assert!(job.has_attempts_left());
    job.max_attempts = 3;
    assert!(!job.has_attempts_left());
}

#[test]
fn test_job_state_names() {
    assert_eq!(JobState::DeadLetter.as_str(), "dead_letter");
    assert!(JobState::Completed.is_terminal());
    assert!(!JobState::Delayed.is_terminal());
}

#[test]
fn test_event_names() {
    let job = Job::new("x", json!(null), &JobOptions::default(), 0).unwrap();

    assert_eq!(QueueEvent::Added(job.clone()).name(), "job:added");
    assert_eq!(QueueEvent::Active(job.clone()).name(), "job:active");
    assert_eq!(QueueEvent::Completed(job.clone()).name(), "job:completed");
    assert_eq!(QueueEvent::Failed(job.clone()).name(), "job:failed");
    let retry = QueueEvent::Retry {
        job: job.clone(),
        delay_ms: 5,
    };
    assert_eq!(retry.name(), "job:retry");
    assert_eq!(retry.job().id, job.id);
}
