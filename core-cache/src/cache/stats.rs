//! Cache statistics and precache progress

use serde::{Deserialize, Serialize};

/// Snapshot of the on-disk cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Keys with cached spans or a recorded content length
    pub keys: usize,

    /// Number of committed span files
    pub cached_spans: usize,

    /// Hole spans currently locked by writers
    pub held_holes: usize,

    /// Total bytes held by cached spans
    pub total_bytes: u64,

    /// Configured budget
    pub max_bytes: u64,
}

impl CacheStats {
    /// Cache usage as a percentage of `max_bytes`.
    pub fn usage_percentage(&self) -> f64 {
        if self.max_bytes == 0 {
            return 0.0;
        }

        (self.total_bytes as f64 / self.max_bytes as f64) * 100.0
    }

    /// Returns true if the cache is near capacity (>90%).
    pub fn is_near_capacity(&self) -> bool {
        self.usage_percentage() > 90.0
    }

    pub fn is_full(&self) -> bool {
        self.total_bytes >= self.max_bytes
    }

    /// Bytes that would have to be evicted to get back under budget.
    pub fn space_needed(&self) -> u64 {
        self.total_bytes.saturating_sub(self.max_bytes)
    }

    pub fn average_span_size(&self) -> u64 {
        if self.cached_spans == 0 {
            0
        } else {
            self.total_bytes / self.cached_spans as u64
        }
    }
}

/// Progress of a precache job over one byte range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecacheProgress {
    /// Bytes in the range, `None` while the resource length is unknown
    pub total_bytes: Option<u64>,

    /// Bytes of the range present in the cache
    pub cached_bytes: u64,

    /// Bytes fetched from upstream by this job
    pub downloaded_bytes: u64,
}

impl PrecacheProgress {
    /// Percentage of the range cached, `None` if the total is unknown.
    pub fn percent(&self) -> Option<u8> {
        match self.total_bytes {
            Some(0) => Some(100),
            Some(total) => {
                let percent = (self.cached_bytes as f64 / total as f64) * 100.0;
                Some(percent.min(100.0) as u8)
            }
            None => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total_bytes
            .map_or(false, |total| self.cached_bytes >= total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total_bytes: u64, max_bytes: u64) -> CacheStats {
        CacheStats {
            keys: 2,
            cached_spans: 4,
            held_holes: 0,
            total_bytes,
            max_bytes,
        }
    }

    #[test]
    fn test_usage_percentage() {
        assert_eq!(stats(500, 1000).usage_percentage(), 50.0);
        assert_eq!(stats(0, 0).usage_percentage(), 0.0);
    }

    #[test]
    fn test_capacity_checks() {
        assert!(!stats(900, 1000).is_near_capacity());
        assert!(stats(950, 1000).is_near_capacity());
        assert!(stats(1000, 1000).is_full());
        assert_eq!(stats(1200, 1000).space_needed(), 200);
        assert_eq!(stats(800, 1000).space_needed(), 0);
        assert_eq!(stats(800, 1000).average_span_size(), 200);
    }

    #[test]
    fn test_precache_progress() {
        let progress = PrecacheProgress {
            total_bytes: Some(200),
            cached_bytes: 50,
            downloaded_bytes: 50,
        };
        assert_eq!(progress.percent(), Some(25));
        assert!(!progress.is_complete());

        let unknown = PrecacheProgress {
            total_bytes: None,
            cached_bytes: 50,
            downloaded_bytes: 0,
        };
        assert_eq!(unknown.percent(), None);
        assert!(!unknown.is_complete());

        let done = PrecacheProgress {
            total_bytes: Some(200),
            cached_bytes: 200,
            downloaded_bytes: 150,
        };
        assert!(done.is_complete());
    }
}
