//! Registry error types
//!
//! Malformed identities are logged and discarded by callers; they never
//! stop a consuming loop.

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Stream id does not have the `name:category:status` shape
    InvalidStreamId(String),
    /// Status segment is neither `origin` nor `inferred`
    UnknownStatus(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::InvalidStreamId(id) => write!(f, "invalid stream id: {}", id),
            RegistryError::UnknownStatus(status) => {
                write!(f, "unknown stream status: {}", status)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
