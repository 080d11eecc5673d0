// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The object cache seen by the sync core.
//!
//! The embedding application owns its cache. The sync core only needs to
//! look objects up, create them from pushed data, and remove them when the
//! server deletes them; [`ObjectStore`] is that seam. [`MemoryStore`] is a
//! map of [`Document`]s for embedders without typed models.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use msync_core::ids::validate_id;
use msync_core::patch::PatchTarget;
use msync_core::protocol::ObjectRef;
use msync_core::Document;
use serde_json::Value;

use crate::error::Result;

/// A cached object that server pushes can modify.
pub trait CachedObject: PatchTarget + Send {
    /// Flags the object as deleted by the server.
    fn mark_deleted(&mut self);

    /// Releases the object; it is removed from the store right after.
    fn destroy(&mut self);
}

/// Lookup and lifecycle operations on the client cache.
pub trait ObjectStore: Send {
    fn get_object_mut(&mut self, id: &str) -> Option<&mut dyn CachedObject>;

    /// Value assigned when a patch references the object `id`.
    fn resolve_reference(&self, id: &str) -> Option<Value>;

    /// Creates or refreshes an object from server data.
    fn create_from_push(&mut self, object: &ObjectRef, data: &Value, from_websocket: bool)
        -> Result<()>;

    /// Removes an object, returning whether it was cached.
    fn remove_object(&mut self, id: &str) -> bool;

    /// Whether a patch for an uncached object should trigger a full load.
    fn should_load_for_patch(&self, object: &ObjectRef) -> bool;

    /// Id of the authenticated user.
    fn session_user_id(&self) -> Option<String>;
}

/// The store shared between the engine and the embedder.
pub type SharedStore = Arc<Mutex<dyn ObjectStore>>;

/// Supplies the session token for socket URLs and REST requests.
pub trait SessionProvider: Send + Sync {
    fn session_token(&self) -> String;
}

/// A fixed session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticSession(String);

impl StaticSession {
    pub fn new(token: impl Into<String>) -> Self {
        StaticSession(token.into())
    }
}

impl SessionProvider for StaticSession {
    fn session_token(&self) -> String {
        self.0.clone()
    }
}

impl CachedObject for Document {
    fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    fn destroy(&mut self) {
        self.destroyed = true;
    }
}

/// In-memory store of [`Document`]s.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    objects: HashMap<String, Document>,
    loadable_types: Vec<String>,
    session_user_id: Option<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore {
            objects: HashMap::new(),
            loadable_types: vec!["Conversation".to_string()],
            session_user_id: None,
        }
    }
}

impl MemoryStore {
    /// A store that loads uncached conversations when they are patched.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loadable_type(mut self, kind: impl Into<String>) -> Self {
        self.loadable_types.push(kind.into());
        self
    }

    pub fn with_session_user(mut self, user_id: impl Into<String>) -> Self {
        self.session_user_id = Some(user_id.into());
        self
    }

    /// Wraps the store for sharing with the engine.
    pub fn shared(self) -> Arc<Mutex<MemoryStore>> {
        Arc::new(Mutex::new(self))
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.objects.get(id)
    }

    pub fn insert(&mut self, document: Document) {
        self.objects.insert(document.id.clone(), document);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl ObjectStore for MemoryStore {
    fn get_object_mut(&mut self, id: &str) -> Option<&mut dyn CachedObject> {
        self.objects
            .get_mut(id)
            .map(|document| document as &mut dyn CachedObject)
    }

    fn resolve_reference(&self, id: &str) -> Option<Value> {
        self.objects.get(id).map(Document::to_value)
    }

    fn create_from_push(
        &mut self,
        object: &ObjectRef,
        data: &Value,
        from_websocket: bool,
    ) -> Result<()> {
        validate_id(&object.id)?;
        self.insert(Document::from_server(object, data, from_websocket));
        Ok(())
    }

    fn remove_object(&mut self, id: &str) -> bool {
        self.objects.remove(id).is_some()
    }

    fn should_load_for_patch(&self, object: &ObjectRef) -> bool {
        self.loadable_types.iter().any(|kind| *kind == object.kind)
    }

    fn session_user_id(&self) -> Option<String> {
        self.session_user_id.clone()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
