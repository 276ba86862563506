//! In-memory route table, keyed by exact request path.
//!
//! Lookups sit on the request hot path and registrations may arrive while the
//! listener is serving. The table is an immutable map behind [`ArcSwap`]:
//! readers load a snapshot without locking, and writers publish a new map
//! with read-copy-update so concurrent registrations never overwrite each
//! other.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::handler::Handler;

type RouteMap = HashMap<String, Arc<dyn Handler>>;

/// Shared, lock-free mapping from path to handler.
///
/// Cloning is cheap and every clone sees the same table.
#[derive(Clone)]
pub struct RouteTable {
    inner: Arc<ArcSwap<RouteMap>>,
}

impl RouteTable {
    /// Create an empty [`RouteTable`].
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }

    /// Bind `path` to `handler`, replacing any previous handler for that path.
    ///
    /// Returns `true` if a handler was replaced.
    pub fn insert(&self, path: impl Into<String>, handler: Arc<dyn Handler>) -> bool {
        let path = path.into();
        let mut replaced = false;
        self.inner.rcu(|current| {
            let mut next = RouteMap::clone(current);
            replaced = next.insert(path.clone(), Arc::clone(&handler)).is_some();
            next
        });
        replaced
    }

    /// Look up the handler bound to exactly `path`.
    pub fn get(&self, path: &str) -> Option<Arc<dyn Handler>> {
        self.inner.load().get(path).cloned()
    }

    /// Returns `true` if `path` has a handler.
    pub fn contains(&self, path: &str) -> bool {
        self.inner.load().contains_key(path)
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    /// Returns `true` if no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.inner.load().keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("paths", &self.paths())
            .finish()
    }
}
