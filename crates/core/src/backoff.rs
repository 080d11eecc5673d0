// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Randomized exponential backoff.
//!
//! Shared by reconnect scheduling, offline-check scheduling and sync retries.
//! The base wait doubles per attempt starting at 0.1s and is capped at the
//! caller's maximum; a random offset spreads clients that lost connectivity
//! at the same moment.

use std::time::Duration;

/// Computes a backoff in seconds for the given attempt, using a random jitter.
pub fn exponential_backoff_seconds(max_seconds: f64, attempt: u32) -> f64 {
    backoff_with_jitter(max_seconds, attempt, jitter_unit())
}

/// A uniform sample in `[0, 1)`.
pub fn jitter_unit() -> f64 {
    rand::random::<f64>()
}

/// Same as [`exponential_backoff_seconds`], wrapped as a `Duration`.
pub fn backoff_duration(max_seconds: f64, attempt: u32) -> Duration {
    Duration::from_secs_f64(exponential_backoff_seconds(max_seconds, attempt))
}

/// Deterministic backoff computation.
///
/// `unit` is the random sample in `[0, 1)`. Early attempts get a narrower
/// jitter so the first retries stay quick; the result never exceeds
/// `max_seconds`.
pub fn backoff_with_jitter(max_seconds: f64, attempt: u32, unit: f64) -> f64 {
    if !max_seconds.is_finite() || max_seconds <= 0.0 {
        return 0.0;
    }
    let unit = unit.clamp(0.0, 1.0);

    // 2^attempt overflows f64 precision long before it matters; cap the exponent.
    let exponent = attempt.min(63) as i32;
    let base = (2f64.powi(exponent) / 10.0).min(max_seconds);

    let offset = match attempt {
        0..=1 => unit / 4.0,
        2..=5 => unit / 2.0,
        _ => unit,
    };

    (base + offset).min(max_seconds)
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
