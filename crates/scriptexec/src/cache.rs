//! Bytecode cache: an LRU cache keyed by SHA-256 hashes of script source.
//!
//! The cache stores *compiled Lua bytecode* (`Vec<u8>`, produced by
//! [`mlua::Function::dump`]) indexed by a 32-byte SHA-256 digest of the
//! corresponding source text. This avoids recompiling identical source
//! strings across successive `execute()` calls, while the interpreter that
//! later loads that bytecode is still built fresh for every call (spec §3
//! Lifecycle) — only the parse/compile step is reused, never live
//! interpreter state.
//!
//! # Environment variable
//!
//! `SCRIPTEXEC_BYTECODE_CACHE_SIZE` — maximum number of entries; defaults to
//! `256`. Setting it to `0` is treated as `1` (no panic, always keep at
//! least one entry).
//!
//! # Thread safety
//!
//! [`BytecodeCache`] wraps its inner LRU cache in a `Mutex` so it can be
//! shared across threads via the `global()` singleton.

use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};

use lru::LruCache;
use sha2::{Digest, Sha256};

/// A 32-byte SHA-256 digest used as a cache key.
pub type CacheKey = [u8; 32];

/// Compute the SHA-256 hash of `source` bytes and return it as a [`CacheKey`].
///
/// The same input always produces the same 32-byte output; different inputs
/// produce distinct outputs with overwhelming probability.
pub fn cache_key(source: &str) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.finalize().into()
}

/// LRU cache mapping [`CacheKey`] → compiled Lua bytecode.
///
/// Create a local instance with [`BytecodeCache::new`] or obtain the
/// process-wide singleton with [`BytecodeCache::global`].
pub struct BytecodeCache {
    inner: Mutex<LruCache<CacheKey, Vec<u8>>>,
    capacity: usize,
}

impl BytecodeCache {
    /// Create a new [`BytecodeCache`] with the given maximum number of entries.
    ///
    /// `capacity` is clamped to a minimum of `1`; passing `0` is safe and will
    /// behave as though `capacity == 1`.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity >= 1");
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            capacity: capacity.max(1),
        }
    }

    /// Return the process-wide singleton [`BytecodeCache`].
    ///
    /// The capacity is read once from the `SCRIPTEXEC_BYTECODE_CACHE_SIZE`
    /// environment variable. If the variable is absent or unparseable the
    /// default capacity of `256` is used. A value of `0` is treated as `1`.
    pub fn global() -> &'static BytecodeCache {
        static INSTANCE: OnceLock<BytecodeCache> = OnceLock::new();
        INSTANCE.get_or_init(|| {
            let capacity = std::env::var("SCRIPTEXEC_BYTECODE_CACHE_SIZE")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(256);
            BytecodeCache::new(capacity)
        })
    }

    /// Look up `key` in the cache.
    ///
    /// Returns `Some(bytecode)` on a hit and advances the entry to the most-recently-used
    /// position; returns `None` on a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .expect("BytecodeCache mutex poisoned")
            .get(key)
            .cloned()
    }

    /// Insert `key` → `value` into the cache.
    ///
    /// If the cache is already at capacity the least-recently-used entry is
    /// evicted to make room.
    pub fn insert(&self, key: CacheKey, value: Vec<u8>) {
        self.inner
            .lock()
            .expect("BytecodeCache mutex poisoned")
            .put(key, value);
    }

    /// Return the number of entries currently in the cache.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("BytecodeCache mutex poisoned")
            .len()
    }

    /// Return `true` if the cache contains no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the maximum number of entries the cache can hold before eviction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove all entries from the cache, leaving it empty.
    ///
    /// The capacity is unchanged. This is primarily useful for test isolation
    /// when multiple tests share the same process-wide singleton.
    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("BytecodeCache mutex poisoned")
            .clear();
    }
}
