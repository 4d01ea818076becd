use super::*;

fn options(max_attempts: u32) -> RetryOptions {
    RetryOptions {
        interval_secs: 60,
        backoff_rate: 1.3,
        max_attempts,
    }
}

#[test]
fn thirty_attempts_outlive_a_day() {
    assert!(options(30).exceeds(DEFAULT_JOB_QUEUE_EXPIRY));
}

#[test]
fn twenty_three_attempts_fit_in_a_day() {
    assert!(!options(23).exceeds(DEFAULT_JOB_QUEUE_EXPIRY));
}

#[test]
fn default_options_fit_in_a_day() {
    assert!(!RetryOptions::default().exceeds(DEFAULT_JOB_QUEUE_EXPIRY));
}

#[test]
fn delays_grow_geometrically() {
    let opts = RetryOptions {
        interval_secs: 10,
        backoff_rate: 2.0,
        max_attempts: 5,
    };
    assert_eq!(opts.delay_for_retry(1), Duration::from_secs(10));
    assert_eq!(opts.delay_for_retry(2), Duration::from_secs(20));
    assert_eq!(opts.delay_for_retry(4), Duration::from_secs(80));
}

#[test]
fn unit_backoff_rate_is_linear() {
    let opts = RetryOptions {
        interval_secs: 30,
        backoff_rate: 1.0,
        max_attempts: 4,
    };
    assert_eq!(opts.projected_total_wait(), Duration::from_secs(120));
    assert_eq!(opts.delay_for_retry(3), Duration::from_secs(30));
}

#[test]
fn rate_below_one_is_invalid() {
    let opts = RetryOptions {
        interval_secs: 30,
        backoff_rate: 0.5,
        max_attempts: 4,
    };
    assert!(opts.invalid_reason().is_some());
    assert!(RetryOptions::default().invalid_reason().is_none());
}

#[test]
fn budget_findings_cover_backend_overrides() {
    let mut gpu = BackendDescriptor::new(
        crate::BackendId::new("gpu").unwrap(),
        crate::LabelSet::from_strs(["gpu"]),
    );
    gpu.retry = Some(options(30));
    let plain = BackendDescriptor::new(
        crate::BackendId::new("plain").unwrap(),
        crate::LabelSet::from_strs(["linux"]),
    );

    let findings =
        retry_budget_findings(&RetryOptions::default(), &[gpu, plain], DEFAULT_JOB_QUEUE_EXPIRY);

    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].level, crate::FindingLevel::Warning);
    assert!(findings[0].message.contains("backend 'gpu'"));
}

#[test]
fn invalid_global_options_are_errors() {
    let broken = RetryOptions {
        interval_secs: 0,
        backoff_rate: 1.5,
        max_attempts: 3,
    };
    let findings = retry_budget_findings(&broken, &[], DEFAULT_JOB_QUEUE_EXPIRY);
    assert_eq!(findings[0].level, crate::FindingLevel::Error);
}
