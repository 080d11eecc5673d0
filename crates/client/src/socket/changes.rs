// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Applies server-pushed `change` envelopes to the object store.

use std::collections::HashMap;

use msync_core::http::{HttpRequest, HttpResponse};
use msync_core::ids::resource_path;
use msync_core::patch::{apply_patch, PatchContext, SchemaRegistry};
use msync_core::protocol::{ChangeBody, ChangeOperation, EnvelopeKind, ObjectRef, ServerEnvelope};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::ClientEvent;
use crate::outbox::{Effect, HttpPurpose, Outbox};
use crate::store::ObjectStore;

pub struct ChangeManager {
    schemas: SchemaRegistry,
}

impl Default for ChangeManager {
    fn default() -> Self {
        ChangeManager::new(SchemaRegistry::messaging())
    }
}

impl ChangeManager {
    pub fn new(schemas: SchemaRegistry) -> Self {
        ChangeManager { schemas }
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Dispatches a `change` envelope; other envelope types are ignored.
    pub fn handle(
        &self,
        envelope: &ServerEnvelope,
        store: &mut dyn ObjectStore,
        out: &mut Outbox,
    ) -> Result<()> {
        if envelope.kind != EnvelopeKind::Change {
            return Ok(());
        }
        let body = envelope.change_body()?;
        match body.operation {
            ChangeOperation::Create => self.handle_create(&body, store, out),
            ChangeOperation::Delete => {
                self.handle_delete(&body, store, out);
                Ok(())
            }
            ChangeOperation::Patch => self.handle_patch(&body, store, out),
        }
    }

    /// Stores an object fetched after a patch targeted it while uncached.
    pub fn on_load_result(
        &self,
        object: &ObjectRef,
        response: &HttpResponse,
        store: &mut dyn ObjectStore,
        out: &mut Outbox,
    ) -> Result<()> {
        if !response.is_success() {
            warn!(id = %object.id, status = ?response.status, "failed to load patched object");
            return Ok(());
        }
        store.create_from_push(object, &response.body, false)?;
        out.emit(ClientEvent::ObjectsCreated {
            objects: vec![object.clone()],
        });
        Ok(())
    }

    fn handle_create(
        &self,
        body: &ChangeBody,
        store: &mut dyn ObjectStore,
        out: &mut Outbox,
    ) -> Result<()> {
        debug!(id = %body.object.id, kind = %body.object.kind, "create");
        store.create_from_push(&body.object, &body.data, true)?;
        out.emit(ClientEvent::ObjectsCreated {
            objects: vec![body.object.clone()],
        });
        Ok(())
    }

    fn handle_delete(&self, body: &ChangeBody, store: &mut dyn ObjectStore, out: &mut Outbox) {
        let id = &body.object.id;
        let Some(object) = store.get_object_mut(id) else {
            debug!(%id, "delete for uncached object");
            return;
        };
        object.mark_deleted();
        object.destroy();
        store.remove_object(id);
        debug!(%id, "delete");
        out.emit(ClientEvent::ObjectDeleted {
            object: body.object.clone(),
        });
    }

    fn handle_patch(
        &self,
        body: &ChangeBody,
        store: &mut dyn ObjectStore,
        out: &mut Outbox,
    ) -> Result<()> {
        let ops = body.patch_ops()?;
        let references: HashMap<String, Value> = ops
            .iter()
            .filter_map(|op| op.id.as_deref())
            .filter_map(|id| store.resolve_reference(id).map(|value| (id.to_string(), value)))
            .collect();
        let session_user_id = store.session_user_id();

        if let Some(object) = store.get_object_mut(&body.object.id) {
            let ctx = PatchContext {
                schemas: &self.schemas,
                resolver: &references,
                session_user_id: session_user_id.as_deref(),
            };
            let changes = apply_patch(object, &body.object.kind, &ops, &ctx)?;
            if !changes.is_empty() {
                out.emit(ClientEvent::ObjectChanged {
                    id: body.object.id.clone(),
                    changes,
                });
            }
            return Ok(());
        }

        if store.should_load_for_patch(&body.object) {
            debug!(id = %body.object.id, "patch for uncached object, loading it");
            out.push(Effect::Http {
                purpose: HttpPurpose::Load(body.object.clone()),
                request: HttpRequest::get(resource_path(&body.object)),
            });
        } else {
            debug!(id = %body.object.id, "dropping patch for uncached object");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "changes_tests.rs"]
mod tests;
