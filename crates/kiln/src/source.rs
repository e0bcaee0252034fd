//! Rendered asset payloads.
//!
//! Templates produce [`Source`] values; the compilation stores them in its
//! asset table and the embedder decides what to do with the bytes. No file
//! I/O happens in this crate.

use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;

use crate::hasher::ContentHasher;

/// A piece of rendered output.
pub trait Source: Send + Sync + fmt::Debug {
    /// The rendered text.
    fn source(&self) -> &str;

    /// Size in bytes.
    fn size(&self) -> usize {
        self.source().len()
    }

    /// Feed the content into a hash.
    fn update_hash(&self, hasher: &mut ContentHasher) {
        hasher.update(self.source());
    }

    /// True for sources that already memoize derived data; used by
    /// [`CachedSource::wrap`] to avoid double wrapping.
    fn is_cached(&self) -> bool {
        false
    }
}

/// Plain in-memory source text.
#[derive(Debug, Clone)]
pub struct RawSource {
    text: Arc<str>,
}

impl RawSource {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self { text: text.into() }
    }
}

impl Source for RawSource {
    fn source(&self) -> &str {
        &self.text
    }
}

/// Wrapper that memoizes the size of an inner source.
///
/// Render results that survive in the asset cache across seals get wrapped
/// once so repeated hashing and size queries stay cheap.
#[derive(Debug)]
pub struct CachedSource {
    inner: Arc<dyn Source>,
    size: OnceLock<usize>,
}

impl CachedSource {
    pub fn new(inner: Arc<dyn Source>) -> Self {
        Self {
            inner,
            size: OnceLock::new(),
        }
    }

    /// Wrap `source` unless it is already a caching wrapper.
    pub fn wrap(source: Arc<dyn Source>) -> Arc<dyn Source> {
        if source.is_cached() {
            source
        } else {
            Arc::new(CachedSource::new(source))
        }
    }
}

impl Source for CachedSource {
    fn source(&self) -> &str {
        self.inner.source()
    }

    fn size(&self) -> usize {
        *self.size.get_or_init(|| self.inner.size())
    }

    fn is_cached(&self) -> bool {
        true
    }
}

/// Compare two sources by content.
pub fn same_content(a: &dyn Source, b: &dyn Source) -> bool {
    a.source() == b.source()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_source_roundtrip() {
        let s = RawSource::new("module.exports = 1;");
        assert_eq!(s.source(), "module.exports = 1;");
        assert_eq!(s.size(), 19);
    }

    #[test]
    fn wrap_is_idempotent() {
        let raw: Arc<dyn Source> = Arc::new(RawSource::new("x"));
        let wrapped = CachedSource::wrap(raw);
        assert!(wrapped.is_cached());
        let rewrapped = CachedSource::wrap(wrapped.clone());
        assert!(Arc::ptr_eq(&wrapped, &rewrapped));
    }

    #[test]
    fn content_comparison() {
        let a = RawSource::new("same");
        let b = RawSource::new("same");
        let c = RawSource::new("different");
        assert!(same_content(&a, &b));
        assert!(!same_content(&a, &c));
    }
}
