//! Error taxonomy for the reasoning core.
//!
//! Every fallible operation in noesis surfaces one of the kinds defined here.
//! Collaborator seams (LLM clients, embedders, evaluators) keep the looser
//! `Box<dyn Error + Send + Sync>` contract at the trait boundary; call sites
//! wrap those failures into [`NoesisError::Collaborator`] with the original
//! message preserved.

use std::error::Error;
use std::fmt;

/// Failure surfaced by a storage backend.
#[derive(Debug, Clone)]
pub enum StorageError {
    /// The requested entity does not exist.
    NotFound { kind: &'static str, id: String },
    /// A write conflicted with existing state (e.g. duplicate id).
    Conflict(String),
    /// The backend itself failed (I/O, serialization, connection loss).
    Backend(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            StorageError::Conflict(msg) => write!(f, "storage conflict: {}", msg),
            StorageError::Backend(msg) => write!(f, "storage backend error: {}", msg),
        }
    }
}

impl Error for StorageError {}

/// Error kinds surfaced by the reasoning core.
///
/// The propagation policy: the core recovers locally from LLM failures inside
/// Explore's scoring pass (log, skip vertex), embedder failures during
/// prototype initialization (disable semantic selection), and bandit strategy
/// load failures (disable bandit). Everything else reaches the caller through
/// one of these variants with the original cause in the message.
#[derive(Debug)]
pub enum NoesisError {
    /// Input violates a documented constraint (k outside 1..10, unknown
    /// vertex id, aggregate with too few paths, refinement past max).
    Validation(String),
    /// The injected storage layer failed.
    Storage(StorageError),
    /// An LLM, embedder, or validator collaborator failed.
    Collaborator(String),
    /// A configured limit was hit (max_vertices, max_refinements, max_active).
    Bound(String),
    /// The operation is invalid in the current state (restore of an unknown
    /// checkpoint, diff across branches, terminals pointing at unknown
    /// vertices).
    State(String),
    /// The caller's cancellation token fired.
    Cancelled,
}

impl fmt::Display for NoesisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoesisError::Validation(msg) => write!(f, "validation error: {}", msg),
            NoesisError::Storage(err) => write!(f, "storage error: {}", err),
            NoesisError::Collaborator(msg) => write!(f, "collaborator error: {}", msg),
            NoesisError::Bound(msg) => write!(f, "bound exceeded: {}", msg),
            NoesisError::State(msg) => write!(f, "invalid state: {}", msg),
            NoesisError::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl Error for NoesisError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NoesisError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for NoesisError {
    fn from(err: StorageError) -> Self {
        NoesisError::Storage(err)
    }
}

impl NoesisError {
    /// Wrap a collaborator failure, preserving its message.
    pub fn collaborator(err: impl fmt::Display) -> Self {
        NoesisError::Collaborator(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_preserves_cause() {
        let err = NoesisError::Storage(StorageError::NotFound {
            kind: "thought",
            id: "thought-1".to_string(),
        });
        assert_eq!(err.to_string(), "storage error: thought not found: thought-1");
    }

    #[test]
    fn test_collaborator_wrapping() {
        let inner: Box<dyn Error + Send + Sync> = "model timed out".into();
        let err = NoesisError::collaborator(inner);
        assert!(err.to_string().contains("model timed out"));
    }
}
