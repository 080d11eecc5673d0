// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use yare::parameterized;

#[parameterized(
    first_attempt_low = { 60.0, 0, 0.0, 0.1 },
    first_attempt_high = { 60.0, 0, 1.0, 0.35 },
    second_attempt = { 60.0, 1, 0.0, 0.2 },
    third_attempt_half_jitter = { 60.0, 2, 1.0, 0.9 },
    late_attempt_full_jitter = { 60.0, 6, 1.0, 7.4 },
    capped = { 30.0, 15, 0.0, 30.0 },
    capped_jitter_clamped = { 30.0, 15, 0.99, 30.0 },
)]
fn backoff_with_jitter_values(max: f64, attempt: u32, unit: f64, expected: f64) {
    let got = backoff_with_jitter(max, attempt, unit);
    assert!((got - expected).abs() < 1e-9, "got {got}, expected {expected}");
}

#[test]
fn backoff_stays_within_bounds() {
    for max in [0.5, 1.0, 30.0, 900.0] {
        for attempt in 0..40 {
            for step in 0..=10 {
                let unit = f64::from(step) / 10.0;
                let value = backoff_with_jitter(max, attempt, unit);
                assert!(value >= 0.0);
                assert!(value <= max, "attempt {attempt} gave {value} > {max}");
            }
        }
    }
}

#[test]
fn backoff_grows_until_capped() {
    // Compare the midpoint of each attempt's jitter range.
    let mut previous = 0.0;
    for attempt in 0..20 {
        let mid = backoff_with_jitter(900.0, attempt, 0.5);
        assert!(mid >= previous, "attempt {attempt} shrank: {mid} < {previous}");
        previous = mid;
    }
    assert_eq!(backoff_with_jitter(900.0, 20, 0.5), 900.0);
}

#[test]
fn backoff_degenerate_max() {
    assert_eq!(backoff_with_jitter(0.0, 3, 0.5), 0.0);
    assert_eq!(backoff_with_jitter(-1.0, 3, 0.5), 0.0);
    assert_eq!(backoff_with_jitter(f64::NAN, 3, 0.5), 0.0);
}

#[test]
fn random_backoff_in_range() {
    for _ in 0..100 {
        let value = exponential_backoff_seconds(60.0, 0);
        assert!((0.1..=0.35).contains(&value));
    }
    let duration = backoff_duration(5.0, 30);
    assert!(duration <= Duration::from_secs(5));
}
