// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Object id validation and resource paths.
//!
//! Ids are opaque strings. Server ids usually take the form
//! `layer:///conversations/<uuid>`, where everything after `://` is the
//! REST path of the resource.

use crate::error::{Error, Result};
use crate::protocol::ObjectRef;

/// Validates an object id.
///
/// Ids must be non-empty and contain no whitespace.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.chars().any(char::is_whitespace) {
        return Err(Error::InvalidId(id.to_string()));
    }
    Ok(())
}

/// REST path used to load an object that is not cached yet.
///
/// `layer:///conversations/c1` becomes `/conversations/c1`; an id without a
/// scheme is placed under the pluralized, lowercased type name.
pub fn resource_path(object: &ObjectRef) -> String {
    if let Some((_, path)) = object.id.split_once("://") {
        if path.starts_with('/') {
            return path.to_string();
        }
        return format!("/{path}");
    }
    format!("/{}/{}", collection_name(&object.kind), object.id)
}

fn collection_name(kind: &str) -> String {
    let lower = kind.to_lowercase();
    match lower.strip_suffix('y') {
        Some(stem) if !stem.is_empty() => format!("{stem}ies"),
        _ => format!("{lower}s"),
    }
}

#[cfg(test)]
#[path = "ids_tests.rs"]
mod tests;
