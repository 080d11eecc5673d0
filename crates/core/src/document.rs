// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! A schemaless cached object.
//!
//! `Document` is the simplest [`PatchTarget`]: an id, a type name and a JSON
//! property map. Entity models with typed fields implement `PatchTarget`
//! themselves; `Document` serves caches that do not need them.

use serde_json::{Map, Value};

use crate::patch::{PatchTarget, PropertyChange};
use crate::protocol::ObjectRef;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub kind: String,
    pub fields: Map<String, Value>,
    /// True when the document arrived through a socket push.
    pub from_websocket: bool,
    /// Set by the server-delete hook before the document is destroyed.
    pub deleted: bool,
    pub destroyed: bool,
    patching: bool,
    changes: Vec<PropertyChange>,
}

impl Document {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Document {
            id: id.into(),
            kind: kind.into(),
            fields: Map::new(),
            from_websocket: false,
            deleted: false,
            destroyed: false,
            patching: false,
            changes: Vec::new(),
        }
    }

    /// Builds a document from server data; non-object data yields no fields.
    pub fn from_server(object: &ObjectRef, data: &Value, from_websocket: bool) -> Self {
        let mut document = Document::new(&object.id, &object.kind);
        if let Value::Object(fields) = data {
            document.fields = fields.clone();
        }
        document.fields.remove("id");
        document.from_websocket = from_websocket;
        document
    }

    pub fn get(&self, property: &str) -> Option<&Value> {
        self.fields.get(property)
    }

    /// The document as a JSON object including its id.
    pub fn to_value(&self) -> Value {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        Value::Object(fields)
    }

    pub fn is_patching(&self) -> bool {
        self.patching
    }

    /// Changes reported by patches, oldest first.
    pub fn changes(&self) -> &[PropertyChange] {
        &self.changes
    }

    /// Drains the recorded changes.
    pub fn take_changes(&mut self) -> Vec<PropertyChange> {
        std::mem::take(&mut self.changes)
    }
}

impl PatchTarget for Document {
    fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    fn set_patching(&mut self, patching: bool) {
        self.patching = patching;
    }

    fn property_changed(&mut self, change: &PropertyChange) {
        self.changes.push(change.clone());
    }
}
