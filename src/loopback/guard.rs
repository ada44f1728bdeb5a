//! Capability guard for synthesized request/response objects.
//!
//! A loopback call hands the handler objects assembled by hand rather than
//! parsed off the wire. In strict mode any read of a property outside the
//! declared set fails loudly, which surfaces handlers that depend on fields
//! the synthesis does not provide.

use serde_json::Value;

use crate::error::FetchError;

/// Dynamic, name-based view of an object's properties.
pub trait Capabilities {
    /// Name used in error messages.
    const OBJECT: &'static str;

    /// Properties the object promises to provide.
    const DECLARED: &'static [&'static str];

    /// Current value of a property, `None` if the object has no such property.
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Read a property; unknown names read as `null`.
    fn property(&self, name: &str) -> Result<Value, FetchError> {
        Ok(self.lookup(name).unwrap_or(Value::Null))
    }
}

/// Decorator that refuses reads of undeclared properties.
pub struct Guarded<'a, T: ?Sized>(pub &'a T);

impl<T: Capabilities + ?Sized> Capabilities for Guarded<'_, T> {
    const OBJECT: &'static str = T::OBJECT;
    const DECLARED: &'static [&'static str] = T::DECLARED;

    fn lookup(&self, name: &str) -> Option<Value> {
        self.0.lookup(name)
    }

    fn property(&self, name: &str) -> Result<Value, FetchError> {
        if !Self::DECLARED.contains(&name) {
            tracing::warn!(object = Self::OBJECT, property = name, "Undefined property read");
            return Err(FetchError::UndefinedProperty {
                object: Self::OBJECT,
                property: name.to_string(),
            });
        }
        Ok(self.0.lookup(name).unwrap_or(Value::Null))
    }
}

/// Whether synthesized objects are wrapped in [`Guarded`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GuardMode {
    #[default]
    Permissive,
    Strict,
}

impl GuardMode {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            GuardMode::Strict
        } else {
            GuardMode::Permissive
        }
    }

    /// Read `name` from `target`, through the guard when strict.
    pub fn read<T: Capabilities>(self, target: &T, name: &str) -> Result<Value, FetchError> {
        match self {
            GuardMode::Permissive => target.property(name),
            GuardMode::Strict => Guarded(target).property(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Widget;

    impl Capabilities for Widget {
        const OBJECT: &'static str = "widget";
        const DECLARED: &'static [&'static str] = &["size"];

        fn lookup(&self, name: &str) -> Option<Value> {
            match name {
                "size" => Some(json!(3)),
                // Present on the object but outside the declared set.
                "secret" => Some(json!("hidden")),
                _ => None,
            }
        }
    }

    #[test]
    fn test_permissive_reads_fall_back_to_null() {
        assert_eq!(Widget.property("size").unwrap(), json!(3));
        assert_eq!(Widget.property("missing").unwrap(), Value::Null);
    }

    #[test]
    fn test_guarded_rejects_undeclared() {
        let guarded = Guarded(&Widget);
        assert_eq!(guarded.property("size").unwrap(), json!(3));

        let err = guarded.property("secret").unwrap_err();
        assert_eq!(err.to_string(), "undefined property `secret` on widget");
    }

    #[test]
    fn test_mode_selects_decorator() {
        assert!(GuardMode::Permissive.read(&Widget, "missing").is_ok());
        assert!(GuardMode::Strict.read(&Widget, "missing").is_err());
        assert_eq!(GuardMode::from_strict(true), GuardMode::Strict);
    }
}
