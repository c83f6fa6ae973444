//! Cache span value type.

use std::path::PathBuf;

/// A contiguous region of a keyed resource.
///
/// A cached span is backed by a file on disk. A hole span is not materialised
/// and, when returned by [`Cache::start_read_write`](crate::cache::Cache::start_read_write),
/// is a lock exclusively held by the caller until released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSpan {
    pub key: String,
    pub position: u64,
    /// `None` only for an open-ended hole.
    pub length: Option<u64>,
    pub is_cached: bool,
    pub file: Option<PathBuf>,
    pub last_access_millis: i64,
}

impl CacheSpan {
    pub fn cached(
        key: impl Into<String>,
        position: u64,
        length: u64,
        file: PathBuf,
        last_access_millis: i64,
    ) -> Self {
        Self {
            key: key.into(),
            position,
            length: Some(length),
            is_cached: true,
            file: Some(file),
            last_access_millis,
        }
    }

    pub fn hole(key: impl Into<String>, position: u64, length: Option<u64>) -> Self {
        Self {
            key: key.into(),
            position,
            length,
            is_cached: false,
            file: None,
            last_access_millis: 0,
        }
    }

    pub fn is_hole(&self) -> bool {
        !self.is_cached
    }

    pub fn is_open_ended(&self) -> bool {
        self.length.is_none()
    }

    /// Exclusive end, `None` if open-ended.
    pub fn end(&self) -> Option<u64> {
        self.length.map(|len| self.position + len)
    }

    pub fn contains(&self, position: u64) -> bool {
        position >= self.position && self.end().map_or(true, |end| position < end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_span() {
        let span = CacheSpan::cached("v1", 100, 50, PathBuf::from("/c/0.100.a.span"), 7);
        assert!(span.is_cached);
        assert!(!span.is_hole());
        assert_eq!(span.end(), Some(150));
        assert!(span.contains(100));
        assert!(span.contains(149));
        assert!(!span.contains(150));
        assert!(!span.contains(99));
    }

    #[test]
    fn test_open_ended_hole() {
        let span = CacheSpan::hole("v1", 200, None);
        assert!(span.is_hole());
        assert!(span.is_open_ended());
        assert_eq!(span.end(), None);
        assert!(span.contains(u64::MAX));
        assert!(!span.contains(199));
    }
}
