use super::*;

#[test]
fn default_schedule_doubles_from_one_second_and_caps_at_64() {
    let mut backoff = Backoff::new(BackoffPolicy::default());
    let delays: Vec<u64> = (0..9).map(|_| backoff.next_delay().as_millis() as u64).collect();
    assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 64_000, 64_000, 64_000]);
    assert_eq!(backoff.attempt(), 6);
}

#[test]
fn nth_attempt_waits_at_least_two_to_the_capped_n_seconds() {
    let mut backoff = Backoff::new(BackoffPolicy::default());
    for n in 0..12_u32 {
        let delay = backoff.next_delay();
        let floor = Duration::from_millis(1_000 * (1_u64 << n.min(6)));
        assert!(delay >= floor, "attempt {n}: {delay:?} < {floor:?}");
    }
}

#[test]
fn reset_restarts_the_schedule() {
    let mut backoff = Backoff::new(BackoffPolicy::default());
    backoff.next_delay();
    backoff.next_delay();
    backoff.next_delay();
    assert_eq!(backoff.attempt(), 3);

    backoff.reset();
    assert_eq!(backoff.attempt(), 0);
    assert_eq!(backoff.next_delay(), Duration::from_secs(1));
}

#[test]
fn custom_policy_scales_base_and_cap() {
    let mut backoff = Backoff::new(BackoffPolicy { base: Duration::from_millis(10), max_exponent: 2 });
    assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    assert_eq!(backoff.next_delay(), Duration::from_millis(20));
    assert_eq!(backoff.next_delay(), Duration::from_millis(40));
    assert_eq!(backoff.next_delay(), Duration::from_millis(40));
}

#[test]
fn delay_for_does_not_overflow_on_large_exponents() {
    let backoff = Backoff::new(BackoffPolicy { base: Duration::from_secs(1), max_exponent: 200 });
    assert!(backoff.delay_for(200) > Duration::from_secs(1));
}
