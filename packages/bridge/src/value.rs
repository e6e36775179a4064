//! Host-side values
//!
//! [`Value`] is the closed set of things that can cross the boundary. It is
//! immutable once built. Primitives compare structurally, while facts,
//! instances and external addresses compare by the engine handle they wrap.

use crate::native::{ExternalId, FactId, InstanceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A fact in working memory
///
/// Only meaningful in the session that produced it, and only while the fact
/// exists or is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fact(pub(crate) FactId);

impl Fact {
    pub fn id(&self) -> FactId {
        self.0
    }
}

/// An instance of a user class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instance(pub(crate) InstanceId);

impl Instance {
    pub fn id(&self) -> InstanceId {
        self.0
    }
}

/// An engine external address together with its type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalAddress {
    pub(crate) id: ExternalId,
    pub(crate) type_code: i32,
}

impl ExternalAddress {
    pub fn id(&self) -> ExternalId {
        self.id
    }

    pub fn type_code(&self) -> i32 {
        self.type_code
    }
}

/// A value exchanged with the engine
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum Value {
    Float(f64),
    Integer(i64),
    String(String),
    Symbol(String),
    InstanceName(String),
    Boolean(bool),
    Fact(Fact),
    Instance(Instance),
    External(ExternalAddress),
    Multifield(Vec<Value>),
    #[default]
    Void,
}

impl Value {
    /// Build a symbol value
    pub fn symbol(text: impl Into<String>) -> Self {
        Value::Symbol(text.into())
    }

    /// Build a string value
    pub fn string(text: impl Into<String>) -> Self {
        Value::String(text.into())
    }

    /// Build an instance name value (without brackets)
    pub fn instance_name(text: impl Into<String>) -> Self {
        Value::InstanceName(text.into())
    }

    /// Build a multifield, flattening nested multifields in place and
    /// dropping `Void` elements.
    ///
    /// # Example
    ///
    /// ```
    /// use clipsrules::Value;
    ///
    /// let mf = Value::multifield(vec![
    ///     Value::Integer(1),
    ///     Value::multifield(vec![Value::Integer(2), Value::Integer(3)]),
    ///     Value::Integer(4),
    /// ]);
    /// assert_eq!(mf.as_multifield().map(|v| v.len()), Some(4));
    /// ```
    pub fn multifield<I: IntoIterator<Item = Value>>(items: I) -> Self {
        let mut out = Vec::new();
        for item in items {
            flatten_into(item, &mut out);
        }
        Value::Multifield(out)
    }

    /// Return the same value with any nested multifields flattened.
    pub fn flatten(self) -> Self {
        match self {
            Value::Multifield(items) => Value::multifield(items),
            other => other,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Text of a string, symbol or instance name
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Symbol(s) | Value::InstanceName(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_multifield(&self) -> Option<&[Value]> {
        match self {
            Value::Multifield(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_fact(&self) -> Option<Fact> {
        match self {
            Value::Fact(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<Instance> {
        match self {
            Value::Instance(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_external(&self) -> Option<ExternalAddress> {
        match self {
            Value::External(e) => Some(*e),
            _ => None,
        }
    }

    /// Short type name as the engine reports it from `(type ...)`
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Float(_) => "FLOAT",
            Value::Integer(_) => "INTEGER",
            Value::String(_) => "STRING",
            Value::Symbol(_) | Value::Boolean(_) => "SYMBOL",
            Value::InstanceName(_) => "INSTANCE-NAME",
            Value::Fact(_) => "FACT-ADDRESS",
            Value::Instance(_) => "INSTANCE-ADDRESS",
            Value::External(_) => "EXTERNAL-ADDRESS",
            Value::Multifield(_) => "MULTIFIELD",
            Value::Void => "VOID",
        }
    }
}

fn flatten_into(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Multifield(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        Value::Void => {}
        other => out.push(other),
    }
}

/// Render a float the way the engine prints it: always with a fractional
/// part or exponent.
pub(crate) fn format_float(f: f64) -> String {
    let text = f.to_string();
    if f.is_finite() && !text.contains(['.', 'e', 'E']) {
        format!("{text}.0")
    } else {
        text
    }
}

/// Quote a string with the engine's escapes.
pub(crate) fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::Integer(i) => write!(f, "{i}"),
            Value::String(s) => f.write_str(&quote_string(s)),
            Value::Symbol(s) => f.write_str(s),
            Value::InstanceName(s) => write!(f, "[{s}]"),
            Value::Boolean(true) => f.write_str(crate::config::TRUE_SYMBOL),
            Value::Boolean(false) => f.write_str(crate::config::FALSE_SYMBOL),
            Value::Fact(fact) => write!(f, "<Fact-{}>", fact.0),
            Value::Instance(inst) => write!(f, "<Instance-{}>", inst.0),
            Value::External(ext) => write!(f, "<Pointer-{}-{}>", ext.type_code, ext.id),
            Value::Multifield(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Value::Void => Ok(()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::multifield(items)
    }
}

impl From<Fact> for Value {
    fn from(f: Fact) -> Self {
        Value::Fact(f)
    }
}

impl From<Instance> for Value {
    fn from(i: Instance) -> Self {
        Value::Instance(i)
    }
}

impl From<ExternalAddress> for Value {
    fn from(e: ExternalAddress) -> Self {
        Value::External(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    mod flattening {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_nested_lists_are_flattened_in_order() {
            let mf = Value::multifield(vec![
                Value::Integer(1),
                Value::Multifield(vec![Value::Integer(2), Value::Integer(3)]),
                Value::Integer(4),
            ]);
            assert_eq!(
                mf,
                Value::Multifield(vec![
                    Value::Integer(1),
                    Value::Integer(2),
                    Value::Integer(3),
                    Value::Integer(4),
                ])
            );
        }

        #[test]
        fn test_deep_nesting() {
            let mf = Value::Multifield(vec![Value::Multifield(vec![Value::Multifield(vec![
                Value::symbol("a"),
            ])])])
            .flatten();
            assert_eq!(mf, Value::Multifield(vec![Value::symbol("a")]));
        }

        #[test]
        fn test_void_elements_are_dropped() {
            let mf = Value::multifield(vec![
                Value::Integer(1),
                Value::Void,
                Value::Multifield(vec![Value::Void, Value::symbol("b")]),
            ]);
            assert_eq!(mf, Value::Multifield(vec![Value::Integer(1), Value::symbol("b")]));
            assert_eq!(
                Value::Multifield(vec![Value::Void]).flatten(),
                Value::Multifield(Vec::new())
            );
        }

        #[test]
        fn test_from_vec_flattens() {
            let v: Value = vec![Value::from(1), vec![Value::from(2)].into()].into();
            assert_eq!(v.as_multifield().map(|m| m.len()), Some(2));
        }
    }

    mod display {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_primitives() {
            assert_eq!(Value::Float(9.1).to_string(), "9.1");
            assert_eq!(Value::Float(2.0).to_string(), "2.0");
            assert_eq!(Value::Integer(-3).to_string(), "-3");
            assert_eq!(Value::string("say \"hi\"").to_string(), "\"say \\\"hi\\\"\"");
            assert_eq!(Value::symbol("foo").to_string(), "foo");
            assert_eq!(Value::instance_name("joe").to_string(), "[joe]");
            assert_eq!(Value::Boolean(false).to_string(), "FALSE");
            assert_eq!(Value::Void.to_string(), "");
        }

        #[test]
        fn test_multifield() {
            let mf = Value::multifield(vec![
                Value::Integer(1),
                Value::Boolean(true),
                Value::string("x"),
            ]);
            assert_eq!(mf.to_string(), "(1 TRUE \"x\")");
        }
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::Integer(4).as_float(), Some(4.0));
        assert_eq!(Value::symbol("s").as_str(), Some("s"));
        assert_eq!(Value::Boolean(true).as_bool(), Some(true));
        assert!(Value::default().is_void());
        assert_eq!(Value::Boolean(true).type_name(), "SYMBOL");
    }

    #[test]
    fn test_handles_compare_by_identity() {
        let a = Value::Fact(Fact(FactId(1)));
        let b = Value::Fact(Fact(FactId(1)));
        let c = Value::Fact(Fact(FactId(2)));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_serde_is_tagged() {
        let json = serde_json::to_string(&Value::symbol("apple")).unwrap();
        assert_eq!(json, r#"{"type":"symbol","value":"apple"}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::symbol("apple"));
    }
}
