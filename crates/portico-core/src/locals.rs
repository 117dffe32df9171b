//! Request-scoped local storage.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Freely-typed key/value storage scoped to one request.
///
/// Independently-authored stages use `Locals` to hand arbitrary values to
/// each other and to the route handler. Keys are strings; values may be of
/// any `Send + Sync + 'static` type and are retrieved by type.
///
/// A `Locals` is owned by exactly one [`RequestContext`](crate::RequestContext)
/// and is dropped with it.
///
/// # Example
///
/// ```
/// use portico_core::Locals;
///
/// let mut locals = Locals::new();
/// locals.insert("user_id", 42_u64);
///
/// assert_eq!(locals.get::<u64>("user_id"), Some(&42));
/// // Wrong type reads as absent.
/// assert_eq!(locals.get::<String>("user_id"), None);
/// ```
#[derive(Default)]
pub struct Locals {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Locals {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value under `key`, replacing any previous value.
    ///
    /// Returns `true` if a previous value was replaced.
    pub fn insert<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, value: T) -> bool {
        self.values.insert(key.into(), Box::new(value)).is_some()
    }

    /// Returns the value under `key` if present and of type `T`.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref())
    }

    /// Returns a mutable reference to the value under `key` if present and of type `T`.
    pub fn get_mut<T: Send + Sync + 'static>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|v| v.downcast_mut())
    }

    /// Removes and returns the value under `key` if it is of type `T`.
    ///
    /// A value of a different type is left in place.
    pub fn remove<T: Send + Sync + 'static>(&mut self, key: &str) -> Option<T> {
        if !self.values.get(key).is_some_and(|v| v.is::<T>()) {
            return None;
        }
        self.values
            .remove(key)
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Returns `true` if any value is stored under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns the number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over the stored keys in arbitrary order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl fmt::Debug for Locals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("Locals").field("keys", &keys).finish()
    }
}
