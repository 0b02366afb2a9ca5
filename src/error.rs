use thiserror::Error;

/// Errors surfaced by the binding and resolution layers.
///
/// Every variant carries a message ready for display; permission and schema
/// variants wrap the reason string supplied by the record store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EditorError {
    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    SchemaMisconfigured(String),

    #[error("Couldn't save changes: {0}")]
    Transport(String),
}

impl EditorError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, EditorError::PermissionDenied(_))
    }
}
