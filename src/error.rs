// gitmesh - A client-side runtime for decentralized Git collaboration over Nostr
// Copyright (C) 2025 Awiteb <a@4rs.nl>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://gnu.org/licenses/gpl-3.0.html>.

use std::{
    collections::HashSet,
    sync::{Mutex, OnceLock},
};

use nostr::event::{Kind, builder::Error as EventBuilderError};

pub type GitMeshResult<T> = Result<T, GitMeshError>;

/// One-shot deprecation warning keys. Monotonic for the lifetime of the
/// process, clearable for tests.
static DEPRECATION_WARNINGS: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

/// How callers should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The user must change their input or credentials. Never retried.
    UserActionable,
    /// Transient. Safe to retry with backoff.
    Retriable,
    /// Broken state. Retried at most once, then surfaced.
    Fatal,
}

/// Gitmesh errors
#[derive(Debug, thiserror::Error)]
pub enum GitMeshError {
    #[error("Invalid repository key `{input}`: {reason}")]
    InvalidKey { input: String, reason: String },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {what}")]
    NotFound { what: String },
    #[error("Authentication required for `{url}`")]
    AuthRequired { url: String },
    #[error("Branch `{branch}` not found (tried {tried:?})")]
    BranchNotFound { branch: String, tried: Vec<String> },
    #[error("Invalid {kind} event at `{path}`: {message}")]
    EventInvalid {
        kind:    Kind,
        path:    String,
        message: String,
    },
    #[error("`{0}` requires async resolution. Use `normalize` instead of `normalize_sync`")]
    RequiresAsync(String),
    #[error("Network error during {operation}: {message}")]
    Network { operation: String, message: String },
    #[error("Operation `{operation}` timed out after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },
    #[error("The operation was aborted by the caller")]
    OperationAborted,
    #[error("Object `{commit}` unreachable on branch `{branch}`{}", .path.as_ref().map(|p| format!(" (path `{p}`)")).unwrap_or_default())]
    ObjectUnreachable {
        commit: String,
        branch: String,
        path:   Option<String>,
    },
    #[error("Relay `{relay}` is busy or rejected the request")]
    RelayBusy { relay: String },
    #[error("Corrupt pack received from `{url}`")]
    CorruptPack { url: String },
    #[error("Merge conflict in {0:?}")]
    MergeConflict(Vec<String>),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed building an event: {0}")]
    EventBuilder(#[from] EventBuilderError),
    #[error("Bech32 error: {0}")]
    Bech32(#[from] nostr::nips::nip19::Error),
    #[error("Event error: {0}")]
    Event(#[from] nostr::event::Error),
    #[error("Key error: {0}")]
    Key(#[from] nostr::key::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{operation} on `{address}`: {source}")]
    Context {
        operation: String,
        address:   String,
        #[source]
        source:    Box<GitMeshError>,
    },
}

impl GitMeshError {
    /// The stable error code carried by this error, as exchanged with
    /// embedders.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidKey { .. } => "INVALID_KEY",
            Self::InvalidInput(_) | Self::EventBuilder(_) | Self::Bech32(_) | Self::Key(_) => {
                "INVALID_INPUT"
            }
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AuthRequired { .. } => "AUTH_REQUIRED",
            Self::BranchNotFound { .. } => "BRANCH_NOT_FOUND",
            Self::EventInvalid { .. } | Self::Event(_) => "EVENT_INVALID",
            Self::RequiresAsync(_) => "REQUIRES_ASYNC",
            Self::Network { .. } | Self::Io(_) => "NETWORK_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::OperationAborted => "OPERATION_ABORTED",
            Self::ObjectUnreachable { .. } => "OBJECT_UNREACHABLE",
            Self::RelayBusy { .. } => "RELAY_BUSY",
            Self::CorruptPack { .. } => "CORRUPT_PACK",
            Self::MergeConflict(_) => "MERGE_CONFLICT",
            Self::Internal(_) | Self::Json(_) => "INTERNAL",
            Self::Context { source, .. } => source.code(),
        }
    }

    /// The retry category of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidKey { .. }
            | Self::InvalidInput(_)
            | Self::NotFound { .. }
            | Self::AuthRequired { .. }
            | Self::BranchNotFound { .. }
            | Self::EventInvalid { .. }
            | Self::RequiresAsync(_)
            | Self::OperationAborted
            | Self::EventBuilder(_)
            | Self::Bech32(_)
            | Self::Event(_)
            | Self::Key(_) => ErrorClass::UserActionable,
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::ObjectUnreachable { .. }
            | Self::RelayBusy { .. }
            | Self::Io(_) => ErrorClass::Retriable,
            Self::CorruptPack { .. }
            | Self::MergeConflict(_)
            | Self::Internal(_)
            | Self::Json(_) => ErrorClass::Fatal,
            Self::Context { source, .. } => source.class(),
        }
    }

    /// Wraps this error with the operation and address it happened in.
    /// Nested contexts keep the innermost code and class.
    pub fn context(self, operation: impl Into<String>, address: impl Into<String>) -> Self {
        Self::Context {
            operation: operation.into(),
            address:   address.into(),
            source:    Box::new(self),
        }
    }

    /// Shorthand for a network failure with an operation name.
    pub fn network(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Network {
            operation: operation.into(),
            message:   message.to_string(),
        }
    }

    /// Shorthand for a missing entity.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}

/// Emits a deprecation warning once per distinct `key`. Later calls with the
/// same key are silent.
pub fn warn_once(key: &str, message: &str) {
    let registry = DEPRECATION_WARNINGS.get_or_init(|| Mutex::new(HashSet::new()));
    let mut seen = registry
        .lock()
        .expect("Deprecation registry is never poisoned");
    if seen.insert(key.to_owned()) {
        tracing::warn!(key = %key, "Deprecated: {message}");
    }
}

/// Clears the deprecation warning registry. Exists for tests, which need
/// repeatable warning behavior within one process.
pub fn clear_deprecation_warnings() {
    if let Some(registry) = DEPRECATION_WARNINGS.get() {
        registry
            .lock()
            .expect("Deprecation registry is never poisoned")
            .clear();
    }
}
