//! Per-endpoint page-size ceiling cache.
//!
//! The ceiling is the largest page size an endpoint is known to accept. It
//! starts at a configured default, is lowered when the server rejects a size,
//! and is never raised by a harvest. Only ceiling discovery writes an
//! arbitrary value, through [`CeilingCache::seed`].
//!
//! Clones share the same underlying map, so one cache can be handed to
//! several clients running on different threads. Every read and write takes
//! the lock once; no lock is held across a request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::Endpoint;

#[derive(Debug, Clone)]
pub struct CeilingCache {
    default_ceiling: usize,
    entries: Arc<Mutex<HashMap<Endpoint, usize>>>,
}

impl CeilingCache {
    /// Create an empty cache. `default_ceiling` is clamped to at least 1.
    #[must_use]
    pub fn new(default_ceiling: usize) -> Self {
        Self {
            default_ceiling: default_ceiling.max(1),
            entries: Arc::default(),
        }
    }

    #[must_use]
    pub fn default_ceiling(&self) -> usize {
        self.default_ceiling
    }

    /// Current ceiling for `endpoint`.
    #[must_use]
    pub fn get(&self, endpoint: &Endpoint) -> usize {
        self.lock()
            .get(endpoint)
            .copied()
            .unwrap_or(self.default_ceiling)
    }

    /// Ceiling for `endpoint` if one has been recorded.
    #[must_use]
    pub fn recorded(&self, endpoint: &Endpoint) -> Option<usize> {
        self.lock().get(endpoint).copied()
    }

    /// Clamp a requested page size to the endpoint's ceiling (minimum 1).
    #[must_use]
    pub fn clamp(&self, endpoint: &Endpoint, requested: usize) -> usize {
        requested.clamp(1, self.get(endpoint))
    }

    /// Lower the ceiling to `size` if that is below the current value.
    ///
    /// Returns the ceiling after the update. A concurrent writer may already
    /// have lowered it further, in which case the lower value wins.
    pub fn lower(&self, endpoint: &Endpoint, size: usize) -> usize {
        let size = size.max(1);
        let mut entries = self.lock();
        let current = entries
            .get(endpoint)
            .copied()
            .unwrap_or(self.default_ceiling);
        let updated = current.min(size);
        entries.insert(endpoint.clone(), updated);
        updated
    }

    /// Record an explicitly discovered ceiling, replacing any previous value.
    pub fn seed(&self, endpoint: &Endpoint, size: usize) {
        self.lock().insert(endpoint.clone(), size.max(1));
    }

    /// Forget everything recorded for `endpoint`.
    pub fn reset(&self, endpoint: &Endpoint) {
        self.lock().remove(endpoint);
    }

    /// Copy of all recorded ceilings.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<Endpoint, usize> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Endpoint, usize>> {
        // The map holds plain integers; a panic elsewhere cannot leave it torn.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_unknown_endpoint_uses_default() {
        let cache = CeilingCache::new(500);
        assert_eq!(cache.get(&Endpoint::publications()), 500);
        assert_eq!(cache.recorded(&Endpoint::publications()), None);
    }

    #[test]
    fn test_clamp() {
        let cache = CeilingCache::new(100);
        let endpoint = Endpoint::publications();
        assert_eq!(cache.clamp(&endpoint, 500), 100);
        assert_eq!(cache.clamp(&endpoint, 50), 50);
        assert_eq!(cache.clamp(&endpoint, 0), 1);
    }

    #[test]
    fn test_lower_never_raises() {
        let cache = CeilingCache::new(500);
        let endpoint = Endpoint::publications();

        assert_eq!(cache.lower(&endpoint, 100), 100);
        assert_eq!(cache.lower(&endpoint, 250), 100);
        assert_eq!(cache.get(&endpoint), 100);
        assert_eq!(cache.lower(&endpoint, 0), 1);
    }

    #[test]
    fn test_seed_overrides() {
        let cache = CeilingCache::new(500);
        let endpoint = Endpoint::publications();

        cache.lower(&endpoint, 25);
        cache.seed(&endpoint, 100);
        assert_eq!(cache.get(&endpoint), 100);

        cache.reset(&endpoint);
        assert_eq!(cache.get(&endpoint), 500);
    }

    #[test]
    fn test_endpoints_are_independent() {
        let cache = CeilingCache::new(500);
        cache.lower(&Endpoint::publications(), 50);
        assert_eq!(cache.get(&Endpoint::open_proposals()), 500);
        assert_eq!(cache.snapshot().len(), 1);
    }

    #[test]
    fn test_clones_share_state_across_threads() {
        let cache = CeilingCache::new(500);
        let endpoint = Endpoint::publications();

        let handles: Vec<_> = [400, 30, 200, 60]
            .into_iter()
            .map(|size| {
                let cache = cache.clone();
                let endpoint = endpoint.clone();
                thread::spawn(move || cache.lower(&endpoint, size))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.get(&endpoint), 30);
    }
}
