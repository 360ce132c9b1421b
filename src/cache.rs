use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::SystemTime;

/// LRU of rendered document fragments, keyed by relative path.
///
/// An entry only counts as a hit while the document's modification time is
/// unchanged. A capacity of zero disables caching.
pub struct RenderCache {
    inner: Option<Mutex<LruCache<String, CachedRender>>>,
}

struct CachedRender {
    modified: SystemTime,
    html: Arc<str>,
}

impl RenderCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn get(&self, path: &str, modified: SystemTime) -> Option<Arc<str>> {
        let mut guard = self.inner.as_ref()?.lock();
        let stale = match guard.get(path) {
            Some(cached) if cached.modified == modified => return Some(Arc::clone(&cached.html)),
            Some(_) => true,
            None => false,
        };
        if stale {
            guard.pop(path);
        }
        None
    }

    pub fn insert(&self, path: &str, modified: SystemTime, html: Arc<str>) {
        if let Some(inner) = &self.inner {
            inner
                .lock()
                .put(path.to_string(), CachedRender { modified, html });
        }
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map(|inner| inner.lock().len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn hit_requires_matching_mtime() {
        let cache = RenderCache::new(4);
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let t1 = t0 + Duration::from_secs(1);
        cache.insert("a.htm", t0, Arc::from("<p>a</p>"));
        assert_eq!(cache.get("a.htm", t0).as_deref(), Some("<p>a</p>"));
        assert!(cache.get("a.htm", t1).is_none());
        assert!(cache.is_empty(), "stale entries are evicted on lookup");
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let cache = RenderCache::new(2);
        let t = SystemTime::UNIX_EPOCH;
        cache.insert("a", t, Arc::from("a"));
        cache.insert("b", t, Arc::from("b"));
        assert!(cache.get("a", t).is_some());
        cache.insert("c", t, Arc::from("c"));
        assert!(cache.get("b", t).is_none());
        assert!(cache.get("a", t).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_disables_cache() {
        let cache = RenderCache::disabled();
        assert!(!cache.is_enabled());
        cache.insert("a", SystemTime::UNIX_EPOCH, Arc::from("a"));
        assert!(cache.get("a", SystemTime::UNIX_EPOCH).is_none());
    }
}
