//! LRU memo over token counting.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use lru::LruCache;

/// Anything that can report how many tokens a name encodes to.
pub trait TokenCount {
    /// Number of tokens `name` encodes to, without special tokens.
    fn token_count(&self, name: &str) -> anyhow::Result<usize>;
}

impl<T: TokenCount + ?Sized> TokenCount for std::sync::Arc<T> {
    fn token_count(&self, name: &str) -> anyhow::Result<usize> {
        (**self).token_count(name)
    }
}

/// Wraps a [`TokenCount`] with an LRU memo keyed by name.
///
/// The example bank probes the same elemental names repeatedly while it
/// filters oracle results; the memo keeps those probes off the tokenizer.
pub struct CachedTokenCounter<C> {
    inner: C,
    memo: Mutex<LruCache<String, usize>>,
    hits: AtomicU32,
    misses: AtomicU32,
}

impl<C> CachedTokenCounter<C> {
    /// Create a new memoizing wrapper with the given LRU capacity.
    pub fn new(inner: C, capacity: usize) -> Self {
        Self {
            inner,
            memo: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("memo capacity must be > 0"),
            )),
            hits: AtomicU32::new(0),
            misses: AtomicU32::new(0),
        }
    }

    /// Get a reference to the inner counter.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Return (hits, misses) counters since construction.
    pub fn counters(&self) -> (u32, u32) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl<C: TokenCount> TokenCount for CachedTokenCounter<C> {
    fn token_count(&self, name: &str) -> anyhow::Result<usize> {
        {
            let mut memo = self.memo.lock().unwrap();
            if let Some(&count) = memo.get(name) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(count);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let count = self.inner.token_count(name)?;
        let mut memo = self.memo.lock().unwrap();
        memo.put(name.to_string(), count);
        Ok(count)
    }
}
