// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for msync-core operations.

use thiserror::Error;

/// Errors raised by the pure building blocks.
///
/// These are programming or protocol errors: they surface at the point of
/// misuse and are never queued or retried.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid id: '{0}'\n  hint: ids must be non-empty and contain no whitespace")]
    InvalidId(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid patch on '{property}': {reason}")]
    InvalidPatch { property: String, reason: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid_patch(property: &str, reason: impl Into<String>) -> Self {
        Error::InvalidPatch {
            property: property.to_string(),
            reason: reason.into(),
        }
    }
}

/// A specialized Result type for msync-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
