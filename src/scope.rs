//! The dynamic receiver a compiled template evaluates against.

use std::collections::HashMap;

use crate::value::Value;

/// Capability interface for the caller-supplied evaluation receiver.
///
/// Compiled templates are generated against this interface, never against a
/// concrete type: `@attr` reads and writes go through [`Scope::attr`] /
/// [`Scope::set_attr`], and a bare identifier that is not a bound local falls
/// back to [`Scope::call`] as a method-style reference.
///
/// The engine never constructs a scope, only binds against one. Scopes are
/// not assumed thread-safe; sharing one scope across concurrent renders is a
/// race the caller must avoid.
pub trait Scope {
    /// Read a named attribute. `None` means the attribute does not exist
    /// (which is distinct from an attribute holding [`Value::Nil`]).
    fn attr(&self, name: &str) -> Option<Value>;

    /// Write a named attribute, creating it if absent.
    fn set_attr(&mut self, name: &str, value: Value);

    /// Invoke a named zero-argument operation. `None` means the scope does
    /// not respond to `name`.
    fn call(&self, name: &str) -> Option<Value> {
        let _ = name;
        None
    }
}

/// HashMap-backed [`Scope`] for callers that just need a bag of attributes.
#[derive(Debug, Default, Clone)]
pub struct MapScope {
    attrs: HashMap<String, Value>,
}

impl MapScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style attribute insertion.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }
}

impl Scope for MapScope {
    fn attr(&self, name: &str) -> Option<Value> {
        self.attrs.get(name).cloned()
    }

    fn set_attr(&mut self, name: &str, value: Value) {
        self.attrs.insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_scope_roundtrip() {
        let mut scope = MapScope::new().with_attr("name", "Joe");
        assert_eq!(scope.attr("name"), Some(Value::from("Joe")));
        assert_eq!(scope.attr("missing"), None);

        scope.set_attr("name", Value::from("Jane"));
        assert_eq!(scope.attr("name"), Some(Value::from("Jane")));
    }

    #[test]
    fn test_default_call_is_not_supported() {
        let scope = MapScope::new().with_attr("name", "Joe");
        assert_eq!(scope.call("name"), None);
    }
}
