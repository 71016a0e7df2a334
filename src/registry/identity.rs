//! Stream identity types
//!
//! A logical feed is identified by `(name, category, status)`. The same
//! physical camera shows up twice in the registry: once as it was captured
//! (`origin`) and once after the inference stage (`inferred`).

use std::str::FromStr;

use super::error::RegistryError;

/// Pipeline stage of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamStatus {
    /// Raw frames as produced by the capture side
    Origin,
    /// Frames republished by an inference worker
    Inferred,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Origin => "origin",
            StreamStatus::Inferred => "inferred",
        }
    }
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamStatus {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "origin" => Ok(StreamStatus::Origin),
            "inferred" => Ok(StreamStatus::Inferred),
            other => Err(RegistryError::UnknownStatus(other.to_string())),
        }
    }
}

/// Unique identifier for a stream (name + category + status)
///
/// The canonical string form `name:category:status` is the registry set member
/// and the pub/sub channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId {
    /// Originating stream name (e.g. "10.0.0.5-0")
    pub name: String,
    /// Inference category (e.g. "face", "body", "car")
    pub category: String,
    /// Pipeline stage
    pub status: StreamStatus,
}

impl StreamId {
    /// Create a new stream id
    pub fn new(name: impl Into<String>, category: impl Into<String>, status: StreamStatus) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            status,
        }
    }

    /// Identity of a freshly captured stream
    pub fn origin(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self::new(name, category, StreamStatus::Origin)
    }

    /// Identity of a stream after inference
    pub fn inferred(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self::new(name, category, StreamStatus::Inferred)
    }

    /// The same physical stream at another pipeline stage
    pub fn with_status(&self, status: StreamStatus) -> Self {
        Self {
            name: self.name.clone(),
            category: self.category.clone(),
            status,
        }
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.name, self.category, self.status)
    }
}

impl FromStr for StreamId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(category), Some(status), None)
                if !name.is_empty() && !category.is_empty() =>
            {
                Ok(Self::new(name, category, status.parse()?))
            }
            _ => Err(RegistryError::InvalidStreamId(s.to_string())),
        }
    }
}
