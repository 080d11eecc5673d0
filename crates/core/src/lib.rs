// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! msync-core: I/O-free building blocks for the msync client.
//!
//! This crate provides the wire protocol, the patch applier, backoff,
//! and the outbound sync event model used by the `msync` client engine.

pub mod backoff;
pub mod document;
pub mod error;
pub mod http;
pub mod ids;
pub mod patch;
pub mod protocol;
pub mod sync_event;

pub use backoff::{backoff_duration, exponential_backoff_seconds};
pub use document::Document;
pub use error::{Error, Result};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use patch::{apply_patch, PatchContext, PatchOp, PatchTarget, PropertyChange, SchemaRegistry};
pub use protocol::{ClientEnvelope, ObjectRef, RequestBody, ServerEnvelope};
pub use sync_event::{
    classify_failure, FailureClass, Operation, SyncEvent, SyncOutcome, SyncPayload,
};
