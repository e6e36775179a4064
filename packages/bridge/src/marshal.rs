//! Marshaling between host [`Value`]s and engine [`ForeignValue`]s
//!
//! The two directions are inverses for every representable variant except
//! `Void`, which only exists as a standalone value. Booleans have no native
//! type of their own: they are the engine's TRUE and FALSE symbols, and are
//! recognized on the way back by lexeme identity rather than by text.

use crate::error::{BridgeError, Result};
use crate::native::{ForeignValue, LexemeKind, NativeEngine};
use crate::value::{ExternalAddress, Fact, Instance, Value};

/// Convert a host value into its engine representation.
///
/// Strings, symbols and instance names are interned, so this may allocate
/// lexemes inside the engine.
///
/// # Errors
///
/// [`BridgeError::ReservedSymbol`] if a symbol's text is one of the boolean
/// sentinels; use [`Value::Boolean`] instead.
pub fn to_foreign(native: &mut dyn NativeEngine, value: &Value) -> Result<ForeignValue> {
    let foreign = match value {
        Value::Float(f) => ForeignValue::Float(*f),
        Value::Integer(i) => ForeignValue::Integer(*i),
        Value::String(s) => ForeignValue::Lexeme(native.create_lexeme(LexemeKind::String, s)),
        Value::Symbol(s) => {
            if is_sentinel_text(native, s) {
                return Err(BridgeError::ReservedSymbol(s.clone()));
            }
            ForeignValue::Lexeme(native.create_lexeme(LexemeKind::Symbol, s))
        }
        Value::InstanceName(s) => {
            ForeignValue::Lexeme(native.create_lexeme(LexemeKind::InstanceName, s))
        }
        Value::Boolean(true) => ForeignValue::Lexeme(native.true_symbol()),
        Value::Boolean(false) => ForeignValue::Lexeme(native.false_symbol()),
        Value::Fact(f) => ForeignValue::Fact(f.0),
        Value::Instance(i) => ForeignValue::Instance(i.0),
        Value::External(e) => ForeignValue::External(e.id),
        Value::Multifield(items) => {
            let mut builder = MultifieldBuilder::new(native);
            for item in items {
                builder.append(item)?;
            }
            builder.create()
        }
        Value::Void => ForeignValue::Void,
    };
    Ok(foreign)
}

/// Convert an engine value back into a host value.
///
/// Stale handles and value types the bridge does not model come back as
/// [`Value::Void`].
pub fn from_foreign(native: &dyn NativeEngine, foreign: &ForeignValue) -> Value {
    match foreign {
        ForeignValue::Float(f) => Value::Float(*f),
        ForeignValue::Integer(i) => Value::Integer(*i),
        ForeignValue::Lexeme(id) => {
            if *id == native.true_symbol() {
                return Value::Boolean(true);
            }
            if *id == native.false_symbol() {
                return Value::Boolean(false);
            }
            match native.lexeme(*id) {
                Some(lexeme) => match lexeme.kind {
                    LexemeKind::Symbol => Value::Symbol(lexeme.text.to_string()),
                    LexemeKind::String => Value::String(lexeme.text.to_string()),
                    LexemeKind::InstanceName => Value::InstanceName(lexeme.text.to_string()),
                },
                None => {
                    tracing::warn!(lexeme = %id, "Unknown lexeme id, mapping to void");
                    Value::Void
                }
            }
        }
        ForeignValue::Fact(id) => Value::Fact(Fact(*id)),
        ForeignValue::Instance(id) => Value::Instance(Instance(*id)),
        ForeignValue::External(id) => match native.external_address(*id) {
            Some((type_code, _)) => Value::External(ExternalAddress {
                id: *id,
                type_code,
            }),
            None => Value::Void,
        },
        ForeignValue::Multifield(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match from_foreign(native, item) {
                    Value::Void => {}
                    Value::Multifield(inner) => out.extend(inner),
                    other => out.push(other),
                }
            }
            Value::Multifield(out)
        }
        ForeignValue::Void => Value::Void,
        ForeignValue::Unsupported(code) => {
            tracing::debug!(type_code = *code, "Unsupported native value type, mapping to void");
            Value::Void
        }
    }
}

fn is_sentinel_text(native: &dyn NativeEngine, text: &str) -> bool {
    [native.true_symbol(), native.false_symbol()]
        .into_iter()
        .filter_map(|id| native.lexeme(id))
        .any(|lexeme| lexeme.text == text)
}

/// Accumulates elements of a native multifield.
///
/// Nested multifields are spliced in place and `Void` elements are dropped,
/// so the result never directly contains a multifield.
pub struct MultifieldBuilder<'a> {
    native: &'a mut dyn NativeEngine,
    items: Vec<ForeignValue>,
}

impl<'a> MultifieldBuilder<'a> {
    pub fn new(native: &'a mut dyn NativeEngine) -> Self {
        Self {
            native,
            items: Vec::new(),
        }
    }

    /// Append a value, flattening it if it is a multifield.
    pub fn append(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Void => Ok(()),
            Value::Multifield(items) => {
                for item in items {
                    self.append(item)?;
                }
                Ok(())
            }
            other => {
                let foreign = to_foreign(&mut *self.native, other)?;
                self.items.push(foreign);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Finish the multifield.
    pub fn create(self) -> ForeignValue {
        ForeignValue::Multifield(self.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEngine;
    use pretty_assertions::assert_eq;

    fn round_trip(engine: &mut MemoryEngine, value: Value) -> Value {
        let foreign = to_foreign(engine, &value).unwrap();
        from_foreign(engine, &foreign)
    }

    mod primitives {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_round_trips() {
            let mut engine = MemoryEngine::new();
            for value in [
                Value::Float(9.1),
                Value::Integer(-42),
                Value::string("hello"),
                Value::symbol("foo"),
                Value::instance_name("joe"),
                Value::Boolean(true),
                Value::Boolean(false),
            ] {
                assert_eq!(round_trip(&mut engine, value.clone()), value);
            }
        }

        #[test]
        fn test_string_and_symbol_stay_distinct() {
            let mut engine = MemoryEngine::new();
            let s = to_foreign(&mut engine, &Value::string("x")).unwrap();
            let y = to_foreign(&mut engine, &Value::symbol("x")).unwrap();
            assert_ne!(s, y);
        }

        #[test]
        fn test_void_maps_to_native_void() {
            let mut engine = MemoryEngine::new();
            assert_eq!(to_foreign(&mut engine, &Value::Void).unwrap(), ForeignValue::Void);
            assert_eq!(from_foreign(&engine, &ForeignValue::Unsupported(99)), Value::Void);
        }
    }

    mod booleans {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_booleans_use_sentinel_lexemes() {
            let mut engine = MemoryEngine::new();
            let t = to_foreign(&mut engine, &Value::Boolean(true)).unwrap();
            assert_eq!(t, ForeignValue::Lexeme(engine.true_symbol()));
        }

        #[test]
        fn test_sentinel_text_symbol_is_rejected() {
            let mut engine = MemoryEngine::new();
            let err = to_foreign(&mut engine, &Value::symbol("TRUE")).unwrap_err();
            assert!(matches!(err, BridgeError::ReservedSymbol(s) if s == "TRUE"));
        }

        #[test]
        fn test_string_with_sentinel_text_is_fine() {
            let mut engine = MemoryEngine::new();
            assert_eq!(
                round_trip(&mut engine, Value::string("FALSE")),
                Value::string("FALSE")
            );
        }
    }

    mod multifields {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_builder_flattens_and_skips_void() {
            let mut engine = MemoryEngine::new();
            let value = Value::Multifield(vec![
                Value::Integer(1),
                Value::Multifield(vec![Value::Integer(2), Value::Void, Value::Integer(3)]),
                Value::Void,
                Value::Integer(4),
            ]);
            let foreign = to_foreign(&mut engine, &value).unwrap();
            assert_eq!(
                foreign,
                ForeignValue::Multifield(vec![
                    ForeignValue::Integer(1),
                    ForeignValue::Integer(2),
                    ForeignValue::Integer(3),
                    ForeignValue::Integer(4),
                ])
            );
        }

        #[test]
        fn test_mixed_round_trip() {
            let mut engine = MemoryEngine::new();
            let value = Value::multifield(vec![
                Value::Integer(1),
                Value::Boolean(false),
                Value::symbol("foo"),
                Value::string("hello"),
                Value::Float(9.1),
            ]);
            assert_eq!(round_trip(&mut engine, value.clone()), value);
        }

        #[test]
        fn test_handles_round_trip() {
            let mut engine = MemoryEngine::new();
            engine.build("(deftemplate point (slot x))").unwrap();
            engine.build("(defclass box (is-a USER) (slot w))").unwrap();
            let fact = engine.assert_string("(point (x 1))").unwrap();
            let instance = engine.make_instance("([b1] of box (w 2))").unwrap();
            let external = engine.create_external_address(7, 3);

            let value = Value::multifield(vec![
                Value::Fact(Fact(fact)),
                Value::Instance(Instance(instance)),
                Value::External(ExternalAddress {
                    id: external,
                    type_code: 3,
                }),
            ]);
            assert_eq!(round_trip(&mut engine, value.clone()), value);
        }

        #[test]
        fn test_builder_len() {
            let mut engine = MemoryEngine::new();
            let mut builder = MultifieldBuilder::new(&mut engine);
            assert!(builder.is_empty());
            builder
                .append(&Value::multifield(vec![Value::Integer(1), Value::Integer(2)]))
                .unwrap();
            assert_eq!(builder.len(), 2);
        }
    }
}
