//! Query key composition.

use crate::error::QueryError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Identifies one cacheable invocation: a stable operation id plus the
/// canonicalized call arguments.
///
/// Arguments are canonicalized through `serde_json::Value`, so two argument
/// values that serialize equal produce equal keys. Map keys are sorted;
/// sequence order is kept. Numbers compare by their JSON representation
/// (`1` and `1.0` are different arguments).
///
/// # Example
///
/// ```
/// use portico_query::QueryKey;
///
/// let a = QueryKey::with_args("posts", &("alice", 2)).unwrap();
/// let b = QueryKey::with_args("posts", &("alice", 2)).unwrap();
/// assert_eq!(a, b);
///
/// let c = QueryKey::with_args("posts", &(2, "alice")).unwrap();
/// assert_ne!(a, c);
///
/// assert_eq!(QueryKey::new("posts").to_string(), "posts");
/// assert_eq!(a.to_string(), r#"posts["alice",2]"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    id: String,
    args: String,
}

impl QueryKey {
    /// Creates a key for an operation that takes no arguments.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            args: String::new(),
        }
    }

    /// Creates a key for an operation called with `args`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::KeyEncoding`] if `args` cannot be serialized
    /// (e.g. a map with non-string keys).
    pub fn with_args<A: Serialize + ?Sized>(
        id: impl Into<String>,
        args: &A,
    ) -> Result<Self, QueryError> {
        let id = id.into();
        let value = serde_json::to_value(args).map_err(|e| QueryError::KeyEncoding {
            id: id.clone(),
            message: e.to_string(),
        })?;

        Ok(Self {
            id,
            args: canonicalize(value).to_string(),
        })
    }

    /// Returns the operation id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the canonical argument encoding, empty for argument-less keys.
    #[must_use]
    pub fn args(&self) -> &str {
        &self.args
    }
}

/// Rebuilds every object with its keys in sorted order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.id, self.args)
    }
}

impl From<&str> for QueryKey {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for QueryKey {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<&QueryKey> for QueryKey {
    fn from(key: &QueryKey) -> Self {
        key.clone()
    }
}
