// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Patch application for cached objects.
//!
//! A patch is an ordered list of operations on dotted property paths:
//!
//! - `set`: assign a value, creating intermediate objects as needed
//! - `add` / `remove`: add to or remove from an array-valued property
//! - `delete`: remove a property
//!
//! Operations in one call are applied atomically: either every operation
//! succeeds and the target sees the result, or the target is untouched.
//! Exactly one [`PropertyChange`] is reported per top-level property that
//! actually changed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Kind of a patch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOperation {
    Set,
    Add,
    Remove,
    Delete,
}

/// A single patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub operation: PatchOperation,
    /// Dotted path, e.g. `metadata.title`.
    pub property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Id of another cached object to assign instead of a literal value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl PatchOp {
    pub fn set(property: impl Into<String>, value: Value) -> Self {
        PatchOp::new(PatchOperation::Set, property, Some(value))
    }

    /// Sets a reference property to the object with the given id.
    pub fn set_ref(property: impl Into<String>, id: impl Into<String>) -> Self {
        PatchOp {
            id: Some(id.into()),
            ..PatchOp::new(PatchOperation::Set, property, None)
        }
    }

    pub fn add(property: impl Into<String>, value: Value) -> Self {
        PatchOp::new(PatchOperation::Add, property, Some(value))
    }

    pub fn remove(property: impl Into<String>, value: Value) -> Self {
        PatchOp::new(PatchOperation::Remove, property, Some(value))
    }

    pub fn delete(property: impl Into<String>) -> Self {
        PatchOp::new(PatchOperation::Delete, property, None)
    }

    fn new(operation: PatchOperation, property: impl Into<String>, value: Option<Value>) -> Self {
        PatchOp {
            operation,
            property: property.into(),
            value,
            id: None,
        }
    }

    fn is_array_op(&self) -> bool {
        matches!(self.operation, PatchOperation::Add | PatchOperation::Remove)
    }
}

/// Read/delivery totals recomputed after a status-map patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientCounts {
    /// Recipients that have read the object.
    pub read: usize,
    /// Recipients that have at least received it (includes readers).
    pub delivered: usize,
}

/// One changed top-level property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub property: String,
    pub old_value: Value,
    pub new_value: Value,
    /// Items present after the patch that were not present before.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<Value>,
    /// Items present before the patch that are gone after it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipients: Option<RecipientCounts>,
}

/// An object that patches can be applied to.
pub trait PatchTarget {
    /// The object's properties.
    fn fields_mut(&mut self) -> &mut Map<String, Value>;

    /// Raised while a server patch is being applied and its changes reported.
    fn set_patching(&mut self, patching: bool);

    /// Called once per changed top-level property.
    fn property_changed(&mut self, change: &PropertyChange);
}

/// Resolves object ids carried by `set` operations.
pub trait ReferenceResolver {
    fn resolve(&self, id: &str) -> Option<Value>;
}

impl ReferenceResolver for HashMap<String, Value> {
    fn resolve(&self, id: &str) -> Option<Value> {
        self.get(id).cloned()
    }
}

/// Resolver that knows no objects.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReferences;

impl ReferenceResolver for NoReferences {
    fn resolve(&self, _id: &str) -> Option<Value> {
        None
    }
}

/// Per-type patch rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSchema {
    /// Properties that accept `id` references to other cached objects.
    pub references: Vec<String>,
    /// Maps of user id to delivery status that get a read/delivered recompute.
    pub status_maps: Vec<String>,
}

impl PatchSchema {
    pub fn with_reference(mut self, property: impl Into<String>) -> Self {
        self.references.push(property.into());
        self
    }

    pub fn with_status_map(mut self, property: impl Into<String>) -> Self {
        self.status_maps.push(property.into());
        self
    }
}

/// Patch schemas keyed by object type.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, PatchSchema>,
    fallback: PatchSchema,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schemas for the conversation and message types.
    pub fn messaging() -> Self {
        let mut registry = SchemaRegistry::new();
        registry.register(
            "Conversation",
            PatchSchema::default().with_reference("last_message"),
        );
        registry.register(
            "Message",
            PatchSchema::default().with_status_map("recipient_status"),
        );
        registry
    }

    pub fn register(&mut self, type_tag: impl Into<String>, schema: PatchSchema) {
        self.schemas.insert(type_tag.into(), schema);
    }

    /// The schema for a type; unknown types get an empty schema.
    pub fn schema_for(&self, type_tag: &str) -> &PatchSchema {
        self.schemas.get(type_tag).unwrap_or(&self.fallback)
    }
}

/// Everything a patch needs besides the target and the operations.
pub struct PatchContext<'a> {
    pub schemas: &'a SchemaRegistry,
    pub resolver: &'a dyn ReferenceResolver,
    /// Excluded from recipient counts.
    pub session_user_id: Option<&'a str>,
}

/// Applies `ops` to `target`, reporting one change per changed top-level property.
pub fn apply_patch<T: PatchTarget + ?Sized>(
    target: &mut T,
    type_tag: &str,
    ops: &[PatchOp],
    ctx: &PatchContext<'_>,
) -> Result<Vec<PropertyChange>> {
    let schema = ctx.schemas.schema_for(type_tag);

    let mut working = target.fields_mut().clone();
    let touched = apply_ops(&mut working, schema, ops, ctx.resolver)?;

    let changes: Vec<PropertyChange> = touched
        .into_iter()
        .filter_map(|(property, old_value)| {
            let new_value = working.get(&property).cloned().unwrap_or(Value::Null);
            describe_change(schema, ctx.session_user_id, property, old_value, new_value)
        })
        .collect();

    target.set_patching(true);
    *target.fields_mut() = working;
    for change in &changes {
        target.property_changed(change);
    }
    target.set_patching(false);

    Ok(changes)
}

/// Applies the operations, returning each touched top-level property with its
/// value before the patch, in order of first touch.
fn apply_ops(
    fields: &mut Map<String, Value>,
    schema: &PatchSchema,
    ops: &[PatchOp],
    resolver: &dyn ReferenceResolver,
) -> Result<Vec<(String, Value)>> {
    let mut touched: Vec<(String, Value)> = Vec::new();
    let mut pending_arrays: Vec<(String, Vec<&PatchOp>)> = Vec::new();

    for op in ops {
        let segments = split_path(&op.property)?;
        let top = segments[0];
        if !touched.iter().any(|(property, _)| property == top) {
            let before = fields.get(top).cloned().unwrap_or(Value::Null);
            touched.push((top.to_string(), before));
        }

        if op.is_array_op() {
            match pending_arrays.iter_mut().find(|(path, _)| *path == op.property) {
                Some((_, batch)) => batch.push(op),
                None => pending_arrays.push((op.property.clone(), vec![op])),
            }
            continue;
        }

        // A set or delete that overlaps buffered array ops must see them applied first.
        let (overlapping, rest): (Vec<_>, Vec<_>) = pending_arrays
            .into_iter()
            .partition(|(path, _)| paths_overlap(path, &op.property));
        pending_arrays = rest;
        for (path, batch) in overlapping {
            apply_array_ops(fields, &path, &batch)?;
        }

        match op.operation {
            PatchOperation::Set => {
                let value = match &op.id {
                    Some(id) => {
                        if !schema.references.iter().any(|p| *p == op.property) {
                            return Err(Error::invalid_patch(
                                &op.property,
                                "property does not accept object references",
                            ));
                        }
                        resolver.resolve(id).unwrap_or(Value::Null)
                    }
                    // `"value": null` and an absent value read the same; both clear.
                    None => op.value.clone().unwrap_or(Value::Null),
                };
                set_path(fields, &segments, &op.property, value)?;
            }
            PatchOperation::Delete => delete_path(fields, &segments, &op.property)?,
            PatchOperation::Add | PatchOperation::Remove => {}
        }
    }

    for (path, batch) in pending_arrays {
        apply_array_ops(fields, &path, &batch)?;
    }

    Ok(touched)
}

/// Reconciles all add/remove operations for one array: removes first, then
/// adds of items not already present.
fn apply_array_ops(fields: &mut Map<String, Value>, path: &str, batch: &[&PatchOp]) -> Result<()> {
    let segments = split_path(path)?;
    let array = array_mut(fields, &segments, path)?;

    for op in batch.iter().filter(|op| op.operation == PatchOperation::Remove) {
        let value = required_value(op)?;
        array.retain(|item| item != value);
    }
    for op in batch.iter().filter(|op| op.operation == PatchOperation::Add) {
        let value = required_value(op)?;
        if !array.contains(value) {
            array.push(value.clone());
        }
    }
    Ok(())
}

fn describe_change(
    schema: &PatchSchema,
    session_user_id: Option<&str>,
    property: String,
    old_value: Value,
    new_value: Value,
) -> Option<PropertyChange> {
    if old_value == new_value {
        return None;
    }

    let mut change = PropertyChange {
        property,
        old_value,
        new_value,
        added: Vec::new(),
        removed: Vec::new(),
        recipients: None,
    };

    if schema.status_maps.iter().any(|p| *p == change.property) {
        change.recipients = Some(count_recipients(&change.new_value, session_user_id));
    } else if let Value::Array(new_items) = &change.new_value {
        let old_items: &[Value] = match &change.old_value {
            Value::Array(items) => items,
            _ => &[],
        };
        change.added = new_items
            .iter()
            .filter(|item| !old_items.contains(item))
            .cloned()
            .collect();
        change.removed = old_items
            .iter()
            .filter(|item| !new_items.contains(item))
            .cloned()
            .collect();
    }

    Some(change)
}

fn count_recipients(statuses: &Value, session_user_id: Option<&str>) -> RecipientCounts {
    let mut counts = RecipientCounts::default();
    let Some(map) = statuses.as_object() else {
        return counts;
    };
    for (user_id, status) in map {
        if Some(user_id.as_str()) == session_user_id {
            continue;
        }
        match status.as_str() {
            Some("read") => {
                counts.read += 1;
                counts.delivered += 1;
            }
            Some("delivered") => counts.delivered += 1,
            _ => {}
        }
    }
    counts
}

fn split_path(property: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = property.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(Error::invalid_patch(property, "empty path segment"));
    }
    Ok(segments)
}

fn paths_overlap(a: &str, b: &str) -> bool {
    a == b
        || a.strip_prefix(b).is_some_and(|rest| rest.starts_with('.'))
        || b.strip_prefix(a).is_some_and(|rest| rest.starts_with('.'))
}

fn required_value(op: &PatchOp) -> Result<&Value> {
    op.value
        .as_ref()
        .ok_or_else(|| Error::invalid_patch(&op.property, "missing value"))
}

/// Walks to the object holding the last path segment.
///
/// With `create`, missing or null intermediates become empty objects;
/// without it, a missing intermediate yields `None`.
fn parent_mut<'a>(
    fields: &'a mut Map<String, Value>,
    parents: &[&str],
    property: &str,
    create: bool,
) -> Result<Option<&'a mut Map<String, Value>>> {
    let mut current = fields;
    for segment in parents {
        let slot = if create {
            current
                .entry((*segment).to_string())
                .or_insert(Value::Null)
        } else {
            match current.get_mut(*segment) {
                Some(slot) => slot,
                None => return Ok(None),
            }
        };
        if slot.is_null() {
            if !create {
                return Ok(None);
            }
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => {
                return Err(Error::invalid_patch(
                    property,
                    format!("'{segment}' is not an object"),
                ))
            }
        };
    }
    Ok(Some(current))
}

fn set_path(
    fields: &mut Map<String, Value>,
    segments: &[&str],
    property: &str,
    value: Value,
) -> Result<()> {
    let (last, parents) = split_last(segments, property)?;
    if let Some(parent) = parent_mut(fields, parents, property, true)? {
        parent.insert(last.to_string(), value);
    }
    Ok(())
}

fn delete_path(fields: &mut Map<String, Value>, segments: &[&str], property: &str) -> Result<()> {
    let (last, parents) = split_last(segments, property)?;
    if let Some(parent) = parent_mut(fields, parents, property, false)? {
        parent.remove(last);
    }
    Ok(())
}

fn array_mut<'a>(
    fields: &'a mut Map<String, Value>,
    segments: &[&str],
    property: &str,
) -> Result<&'a mut Vec<Value>> {
    let (last, parents) = split_last(segments, property)?;
    let parent = parent_mut(fields, parents, property, true)?
        .ok_or_else(|| Error::invalid_patch(property, "unreachable path"))?;
    let slot = parent
        .entry(last.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    match slot {
        Value::Array(items) => Ok(items),
        _ => Err(Error::invalid_patch(property, "not an array")),
    }
}

fn split_last<'s, 'p>(segments: &'s [&'p str], property: &str) -> Result<(&'p str, &'s [&'p str])> {
    segments
        .split_last()
        .map(|(last, parents)| (*last, parents))
        .ok_or_else(|| Error::invalid_patch(property, "empty property"))
}

#[cfg(test)]
#[path = "patch_tests.rs"]
mod tests;
