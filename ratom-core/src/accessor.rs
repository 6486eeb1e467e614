//! JSON Accessors
//!
//! Shorthand for deriving parts of a JSON document held in a node. An
//! [`Accessor`] is a key, an index or a regular expression; applying it to a
//! [`serde_json::Value`] yields the addressed part, or nothing.
//!
//! | accessor  | applied to      | result                                |
//! |-----------|-----------------|---------------------------------------|
//! | `Key`     | object          | the member, unset when missing        |
//! | `Index`   | array           | the element, unset when out of range  |
//! | `Index`   | object          | the member named by the index         |
//! | `Index`   | string          | the character, as a one-char string   |
//! | `Pattern` | string          | capture groups as an array, or `null` |
//! | any       | `null`          | type error                            |
//! | `Pattern` | anything else   | type error                            |
//! | `Key`/`Index` | other values | unset                                |

use std::fmt;

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::reactive::{Derivable, Derivation};

/// Addresses a part of a JSON value.
#[derive(Debug, Clone)]
pub enum Accessor {
    /// Object member.
    Key(String),
    /// Array element.
    Index(usize),
    /// Regular expression matched against a string.
    Pattern(Regex),
}

impl Accessor {
    /// Interpret a JSON value as an accessor.
    ///
    /// Strings become keys and non-negative integers become indices.
    /// Anything else is a type error.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::String(key) => Ok(Accessor::Key(key.clone())),
            Value::Number(n) => n
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .map(Accessor::Index)
                .ok_or_else(|| Error::type_error(format!("cannot use {n} as an index"))),
            other => Err(Error::type_error(format!("cannot use {other} as an accessor"))),
        }
    }

    /// Apply the accessor. `Ok(None)` means the addressed part is missing.
    pub fn apply(&self, value: &Value) -> Result<Option<Value>> {
        if value.is_null() {
            return Err(Error::type_error(format!("cannot apply {self} to null")));
        }
        match (self, value) {
            (Accessor::Key(key), Value::Object(map)) => Ok(map.get(key).cloned()),
            (Accessor::Index(index), Value::Array(items)) => Ok(items.get(*index).cloned()),
            (Accessor::Index(index), Value::Object(map)) => {
                Ok(map.get(&index.to_string()).cloned())
            }
            (Accessor::Index(index), Value::String(s)) => {
                Ok(s.chars().nth(*index).map(|c| Value::String(c.to_string())))
            }
            (Accessor::Pattern(pattern), Value::String(s)) => Ok(Some(captures(pattern, s))),
            (Accessor::Pattern(pattern), other) => Err(Error::type_error(format!(
                "cannot match /{pattern}/ against non-string {other}"
            ))),
            (Accessor::Key(_) | Accessor::Index(_), _) => Ok(None),
        }
    }
}

/// Capture groups of the first match, or `null`. Groups that did not
/// participate in the match are `null`.
fn captures(pattern: &Regex, haystack: &str) -> Value {
    match pattern.captures(haystack) {
        Some(caps) => Value::Array(
            caps.iter()
                .map(|group| group.map_or(Value::Null, |m| Value::String(m.as_str().to_string())))
                .collect(),
        ),
        None => Value::Null,
    }
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accessor::Key(key) => write!(f, "key {key:?}"),
            Accessor::Index(index) => write!(f, "index {index}"),
            Accessor::Pattern(pattern) => write!(f, "pattern /{pattern}/"),
        }
    }
}

impl PartialEq for Accessor {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Accessor::Key(a), Accessor::Key(b)) => a == b,
            (Accessor::Index(a), Accessor::Index(b)) => a == b,
            (Accessor::Pattern(a), Accessor::Pattern(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl From<&str> for Accessor {
    fn from(key: &str) -> Self {
        Accessor::Key(key.to_string())
    }
}

impl From<String> for Accessor {
    fn from(key: String) -> Self {
        Accessor::Key(key)
    }
}

impl From<usize> for Accessor {
    fn from(index: usize) -> Self {
        Accessor::Index(index)
    }
}

impl From<Regex> for Accessor {
    fn from(pattern: Regex) -> Self {
        Accessor::Pattern(pattern)
    }
}

/// Accessor shorthand for nodes holding JSON.
///
/// ```rust
/// use ratom_core::{DeriveJson, Runtime};
/// use serde_json::json;
///
/// let rt = Runtime::new();
/// let user = rt.atom(json!({"name": "Ada", "langs": ["en", "fr"]}));
///
/// let name = user.derive_key("name");
/// let first_lang = user.derive_key("langs").derive_key(0_usize);
///
/// assert_eq!(name.get().unwrap(), Some(json!("Ada")));
/// assert_eq!(first_lang.get().unwrap(), Some(json!("en")));
/// ```
pub trait DeriveJson: Derivable<Value> {
    /// Derive the part addressed by `accessor`.
    fn derive_key(&self, accessor: impl Into<Accessor>) -> Derivation<Value> {
        let accessor = accessor.into();
        let input = self.input();
        let runtime = input.runtime().clone();
        runtime.try_derive(move || match input.read()? {
            Some(value) => accessor.apply(&value),
            None => Ok(None),
        })
    }

    /// One derivation per accessor, in order.
    fn derive_keys<I>(&self, accessors: I) -> Vec<Derivation<Value>>
    where
        I: IntoIterator,
        I::Item: Into<Accessor>,
    {
        accessors.into_iter().map(|accessor| self.derive_key(accessor)).collect()
    }

    /// Derive the part addressed by a JSON accessor (a string key or a
    /// non-negative index).
    fn derive_json(&self, accessor: &Value) -> Result<Derivation<Value>> {
        Ok(self.derive_key(Accessor::from_json(accessor)?))
    }

    /// Derive the part addressed by the current value of `accessor`.
    ///
    /// An accessor value of the wrong shape fails the read.
    fn derive_by<D>(&self, accessor: &D) -> Derivation<Value>
    where
        D: Derivable<Value> + ?Sized,
    {
        let (accessor, input) = (accessor.input(), self.input());
        let runtime = input.runtime().clone();
        runtime.try_derive(move || {
            let Some(key) = accessor.read()? else { return Ok(None) };
            let Some(value) = input.read()? else { return Ok(None) };
            Accessor::from_json(&key)?.apply(&value)
        })
    }
}

impl<D> DeriveJson for D where D: Derivable<Value> + ?Sized {}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::Runtime;

    #[test]
    fn from_json_accepts_strings_and_indices() {
        assert_eq!(Accessor::from_json(&json!("name")).unwrap(), Accessor::from("name"));
        assert_eq!(Accessor::from_json(&json!(2)).unwrap(), Accessor::Index(2));
        assert!(matches!(Accessor::from_json(&json!(-1)), Err(Error::Type(_))));
        assert!(matches!(Accessor::from_json(&json!(1.5)), Err(Error::Type(_))));
        assert!(matches!(Accessor::from_json(&json!([1])), Err(Error::Type(_))));
    }

    #[test]
    fn apply_follows_value_shape() {
        let doc = json!({"a": 1, "0": "zero", "list": [10, 20]});
        assert_eq!(Accessor::from("a").apply(&doc).unwrap(), Some(json!(1)));
        assert_eq!(Accessor::from("missing").apply(&doc).unwrap(), None);
        assert_eq!(Accessor::Index(0).apply(&doc).unwrap(), Some(json!("zero")));
        assert_eq!(Accessor::Index(1).apply(&json!([10, 20])).unwrap(), Some(json!(20)));
        assert_eq!(Accessor::Index(5).apply(&json!([10, 20])).unwrap(), None);
        assert_eq!(Accessor::Index(1).apply(&json!("abc")).unwrap(), Some(json!("b")));
        assert_eq!(Accessor::from("a").apply(&json!(42)).unwrap(), None);
        assert!(matches!(Accessor::from("a").apply(&Value::Null), Err(Error::Type(_))));
    }

    #[test]
    fn pattern_yields_groups_or_null() {
        let pattern = Accessor::from(Regex::new(r"(\w+)@(\w+)?").unwrap());
        assert_eq!(
            pattern.apply(&json!("ada@example")).unwrap(),
            Some(json!(["ada@example", "ada", "example"]))
        );
        assert_eq!(pattern.apply(&json!("ada@")).unwrap(), Some(json!(["ada@", "ada", null])));
        assert_eq!(pattern.apply(&json!("nobody")).unwrap(), Some(Value::Null));
        assert!(matches!(pattern.apply(&json!(7)), Err(Error::Type(_))));
    }

    #[test]
    fn derive_keys_splits_a_document() {
        let rt = Runtime::new();
        let point = rt.atom(json!({"x": 1, "y": 2}));
        let parts = point.derive_keys(["x", "y", "z"]);

        let values: Vec<_> = parts.iter().map(|d| d.get().unwrap()).collect();
        assert_eq!(values, vec![Some(json!(1)), Some(json!(2)), None]);

        point.set(json!({"x": 5, "y": 2, "z": 0})).unwrap();
        assert_eq!(parts[0].get().unwrap(), Some(json!(5)));
        assert_eq!(parts[2].get().unwrap(), Some(json!(0)));
    }

    #[test]
    fn derive_json_rejects_bad_accessors() {
        let rt = Runtime::new();
        let doc = rt.atom(json!(["a", "b"]));
        assert_eq!(doc.derive_json(&json!(1)).unwrap().get().unwrap(), Some(json!("b")));
        assert!(matches!(doc.derive_json(&json!(true)), Err(Error::Type(_))));
    }

    #[test]
    fn derive_by_follows_the_accessor_node() {
        let rt = Runtime::new();
        let doc = rt.atom(json!({"en": "hello", "fr": "bonjour"}));
        let lang = rt.atom(json!("en"));
        let greeting = doc.derive_by(&lang);

        assert_eq!(greeting.get().unwrap(), Some(json!("hello")));
        lang.set(json!("fr")).unwrap();
        assert_eq!(greeting.get().unwrap(), Some(json!("bonjour")));

        lang.set(json!({"not": "an accessor"})).unwrap();
        assert!(matches!(greeting.get(), Err(Error::Type(_))));
    }
}
