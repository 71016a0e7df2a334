//! Viewer admission and bookkeeping
//!
//! Owned by the fan-out event loop; never shared across tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Why a viewer was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The requested stream is not active
    UnknownStream,
    /// The viewer cap is reached
    Full,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::UnknownStream => f.write_str("unknown stream"),
            Rejection::Full => f.write_str("viewer limit reached"),
        }
    }
}

/// Connected viewers and the stream each one watches
#[derive(Debug)]
pub struct ViewerTable {
    max_viewers: usize,
    viewers: HashMap<u64, String>,
}

impl ViewerTable {
    pub fn new(max_viewers: usize) -> Self {
        Self {
            max_viewers,
            viewers: HashMap::new(),
        }
    }

    /// Track viewer `id` on `target` if the stream is active and there is room
    ///
    /// A rejected viewer is not tracked.
    pub fn admit(&mut self, id: u64, target: &str, stream_active: bool) -> Result<(), Rejection> {
        if !stream_active {
            return Err(Rejection::UnknownStream);
        }
        if self.viewers.len() >= self.max_viewers {
            return Err(Rejection::Full);
        }

        self.viewers.insert(id, target.to_string());
        Ok(())
    }

    /// Forget a viewer; returns the stream it was watching
    pub fn remove(&mut self, id: u64) -> Option<String> {
        self.viewers.remove(&id)
    }

    pub fn target_of(&self, id: u64) -> Option<&str> {
        self.viewers.get(&id).map(String::as_str)
    }

    /// Viewers watching `target`
    pub fn count_for(&self, target: &str) -> usize {
        self.viewers.values().filter(|t| t.as_str() == target).count()
    }

    pub fn len(&self) -> usize {
        self.viewers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.viewers.is_empty()
    }
}

/// Live counters readable from outside the event loop
#[derive(Debug, Default)]
pub struct FanoutStats {
    /// Admitted viewers
    pub viewers: AtomicUsize,
    /// Streams with a running relay
    pub streams: AtomicUsize,
    /// Viewers turned away since start
    pub rejected: AtomicUsize,
}

impl FanoutStats {
    pub fn viewers(&self) -> usize {
        self.viewers.load(Ordering::Relaxed)
    }

    pub fn streams(&self) -> usize {
        self.streams.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_stream_rejected() {
        let mut table = ViewerTable::new(100);

        assert_eq!(table.admit(1, "cam-0:face:inferred", false), Err(Rejection::UnknownStream));
        assert!(table.is_empty());
    }

    #[test]
    fn test_cap_rejects_and_does_not_track() {
        let mut table = ViewerTable::new(100);
        for id in 0..100 {
            table.admit(id, "a", true).unwrap();
        }

        assert_eq!(table.admit(100, "a", true), Err(Rejection::Full));
        assert_eq!(table.len(), 100);
        assert_eq!(table.target_of(100), None);

        // Room again once someone leaves
        assert_eq!(table.remove(0).as_deref(), Some("a"));
        table.admit(100, "a", true).unwrap();
        assert_eq!(table.len(), 100);
    }

    #[test]
    fn test_counts_per_target() {
        let mut table = ViewerTable::new(10);
        table.admit(1, "a", true).unwrap();
        table.admit(2, "b", true).unwrap();
        table.admit(3, "a", true).unwrap();

        assert_eq!(table.count_for("a"), 2);
        assert_eq!(table.count_for("b"), 1);
        assert_eq!(table.target_of(2), Some("b"));
        assert_eq!(table.remove(9), None);
    }

    #[test]
    fn test_rejection_display() {
        assert_eq!(Rejection::Full.to_string(), "viewer limit reached");
        assert_eq!(Rejection::UnknownStream.to_string(), "unknown stream");
    }
}
