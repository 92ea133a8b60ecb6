use super::*;

#[test]
fn test_default_policy() {
    let policy = RetryPolicy::default();

    assert_eq!(policy.max_attempts, 5);
    assert_eq!(policy.initial_delay, Duration::from_millis(100));
    assert_eq!(policy.max_delay, Duration::from_secs(5));
    assert_eq!(policy.backoff_multiplier, 2.0);
    assert_eq!(policy.jitter, Some(DEFAULT_JITTER));
}

#[test]
fn test_delays_grow_exponentially_up_to_cap() {
    let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(16), 2.0)
        .without_jitter();

    let delays: Vec<u64> = (0..6).map(|n| policy.delay_for(n).as_secs()).collect();

    assert_eq!(delays, vec![1, 2, 4, 8, 16, 16]);
}

#[test]
fn test_jitter_stays_within_spread() {
    let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(16), 2.0);

    for _ in 0..20 {
        let secs = policy.delay_for(0).as_secs_f64();
        assert!((0.75..=1.25).contains(&secs), "delay {} out of range", secs);
    }
}

#[test]
fn test_jitter_fraction_is_clamped() {
    assert_eq!(RetryPolicy::default().with_jitter(3.0).jitter, Some(1.0));
    assert_eq!(
        RetryPolicy::default().with_jitter(0.0).delay_for(0),
        Duration::from_millis(100)
    );
}

#[test]
fn test_huge_retry_numbers_hit_the_cap() {
    let policy = RetryPolicy::default().without_jitter();

    assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(5));
}

#[test]
fn test_state_hands_out_delays_until_exhausted() {
    let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_secs(1), 2.0)
        .without_jitter();
    let mut state = RetryState::new();

    assert_eq!(state.next_delay(&policy), Some(Duration::from_millis(10)));
    assert_eq!(state.next_delay(&policy), Some(Duration::from_millis(20)));
    assert_eq!(state.next_delay(&policy), None);
    assert_eq!(state.retries(), 2);
}

#[test]
fn test_zero_retries_fail_immediately() {
    let policy = RetryPolicy::new(0, Duration::from_millis(10), Duration::from_secs(1), 2.0);

    assert_eq!(RetryState::new().next_delay(&policy), None);
}
