//! Resource Slots
//!
//! A [`Resource`] is a state field holding an asynchronously produced value.
//! Loads are started with [`Context::load`](crate::store::Context::load),
//! which records a superseding task under a name reserved for the field, so
//! a second load always replaces an in-flight one.
//!
//! ```text
//! Idle ──load──▶ Loading ──ok──▶ Content
//!                  │  ▲            │
//!                  │  └──reload────┤
//!                  └──err──▶ Failed ──reload──▶ Loading
//! ```

use std::fmt;
use std::sync::Arc;

/// Failure of a resource load, kept in state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ResourceError {
    message: Arc<str>,
}

impl ResourceError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: Arc::from(message.to_string()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Phase of a [`Resource`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourcePhase {
    Idle,
    Loading,
    Content,
    Failed,
}

/// An asynchronously loaded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource<T> {
    Idle,
    /// A load is in flight. `previous` is the content shown meanwhile.
    Loading { previous: Option<T> },
    Content(T),
    Failed(ResourceError),
}

impl<T> Default for Resource<T> {
    fn default() -> Self {
        Resource::Idle
    }
}

impl<T> Resource<T> {
    /// The current content, or the previous content while reloading.
    pub fn value(&self) -> Option<&T> {
        match self {
            Resource::Content(value) => Some(value),
            Resource::Loading { previous } => previous.as_ref(),
            Resource::Idle | Resource::Failed(_) => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Resource::Loading { .. })
    }

    pub fn error(&self) -> Option<&ResourceError> {
        match self {
            Resource::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn phase(&self) -> ResourcePhase {
        match self {
            Resource::Idle => ResourcePhase::Idle,
            Resource::Loading { .. } => ResourcePhase::Loading,
            Resource::Content(_) => ResourcePhase::Content,
            Resource::Failed(_) => ResourcePhase::Failed,
        }
    }

    /// Enter `Loading`, keeping any content on display.
    pub(crate) fn begin_load(&mut self) {
        let previous = match std::mem::take(self) {
            Resource::Content(value) => Some(value),
            Resource::Loading { previous } => previous,
            Resource::Idle | Resource::Failed(_) => None,
        };
        *self = Resource::Loading { previous };
    }

    /// Leave `Loading` with the outcome of a load.
    pub(crate) fn finish(&mut self, outcome: Result<T, ResourceError>) {
        *self = match outcome {
            Ok(value) => Resource::Content(value),
            Err(error) => Resource::Failed(error),
        };
    }
}
