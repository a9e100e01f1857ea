//! Cache keys.
//!
//! A key is a resource name plus every parameter that changes the response.
//! Parameters are rendered sorted by name and escaped, so the same logical
//! query always maps to the same key and different queries never collide.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical cache key, without the durable namespace prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap a raw key verbatim.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Start building a key for `resource`.
    pub fn resource(resource: impl Into<String>) -> CacheKeyBuilder {
        CacheKeyBuilder {
            resource: resource.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for CacheKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Builder producing canonical `resource?a=1&b=2` keys.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    resource: String,
    params: BTreeMap<String, String>,
}

impl CacheKeyBuilder {
    /// Add a parameter. Setting the same name twice keeps the last value.
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    /// Add a parameter only when a value is present.
    pub fn param_opt<V: ToString>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.param(name, v),
            None => self,
        }
    }

    pub fn build(self) -> CacheKey {
        let mut key = escape(&self.resource);
        for (i, (name, value)) in self.params.iter().enumerate() {
            key.push(if i == 0 { '?' } else { '&' });
            key.push_str(&escape(name));
            key.push('=');
            key.push_str(&escape(value));
        }
        CacheKey(key)
    }
}

fn escape(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        match c {
            '%' | '?' | '&' | '=' => out.push_str(&format!("%{:02X}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_resource_key() {
        assert_eq!(CacheKey::resource("stores").build().as_str(), "stores");
    }

    #[test]
    fn test_param_order_does_not_matter() {
        let a = CacheKey::resource("sales_kpis")
            .param("from", "2024-01-01")
            .param("to", "2024-02-01")
            .build();
        let b = CacheKey::resource("sales_kpis")
            .param("to", "2024-02-01")
            .param("from", "2024-01-01")
            .build();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "sales_kpis?from=2024-01-01&to=2024-02-01");
    }

    #[test]
    fn test_separators_in_values_cannot_collide() {
        let a = CacheKey::resource("r").param("a", "1&b=2").build();
        let b = CacheKey::resource("r").param("a", "1").param("b", "2").build();
        assert_ne!(a, b);
    }

    #[test]
    fn test_param_opt() {
        let none = CacheKey::resource("recent_orders")
            .param_opt::<u32>("limit", None)
            .build();
        let some = CacheKey::resource("recent_orders")
            .param_opt("limit", Some(10))
            .build();
        assert_eq!(none.as_str(), "recent_orders");
        assert_eq!(some.as_str(), "recent_orders?limit=10");
    }
}
