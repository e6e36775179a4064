//! User-defined functions
//!
//! Host closures registered under a name become callable from engine code.
//! Argument count and type constraints are declared up front and enforced
//! by the engine: violations in literal arguments fail the calling `eval`
//! with a parse error before the handler runs.
//!
//! # Example
//!
//! ```
//! use clipsrules::{FunctionSignature, Session, Value};
//!
//! let mut session = Session::new();
//! session
//!     .add_function("double", FunctionSignature::default().arg_count(1..=1), |inv| {
//!         let n = inv.argument(0).and_then(|v| v.as_integer()).unwrap_or(0);
//!         inv.set_return(Value::Integer(n * 2));
//!     })
//!     .unwrap();
//! assert_eq!(session.eval("(double 21)").unwrap(), Value::Integer(42));
//! ```

use crate::error::{AddUdfError, Result};
use crate::external::ExternalBridge;
use crate::marshal::{from_foreign, to_foreign};
use crate::native::{NativeEngine, UdfFrame, UdfHandler, UdfRegistration};
use crate::session::Session;
use crate::value::{ExternalAddress, Value};
use std::any::Any;
use std::fmt;
use std::ops::RangeInclusive;
use std::rc::Rc;

/// Argument and return type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserDefinedType {
    Boolean,
    Double,
    External,
    Fact,
    Instance,
    Integer,
    Multifield,
    InstanceName,
    String,
    Symbol,
    Void,
    Any,
}

impl UserDefinedType {
    /// One-letter code used in native type strings
    pub fn code(&self) -> char {
        match self {
            UserDefinedType::Boolean => 'b',
            UserDefinedType::Double => 'd',
            UserDefinedType::External => 'e',
            UserDefinedType::Fact => 'f',
            UserDefinedType::Instance => 'i',
            UserDefinedType::Integer => 'l',
            UserDefinedType::Multifield => 'm',
            UserDefinedType::InstanceName => 'n',
            UserDefinedType::String => 's',
            UserDefinedType::Symbol => 'y',
            UserDefinedType::Void => 'v',
            UserDefinedType::Any => '*',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'b' => UserDefinedType::Boolean,
            'd' => UserDefinedType::Double,
            'e' => UserDefinedType::External,
            'f' => UserDefinedType::Fact,
            'i' => UserDefinedType::Instance,
            'l' => UserDefinedType::Integer,
            'm' => UserDefinedType::Multifield,
            'n' => UserDefinedType::InstanceName,
            's' => UserDefinedType::String,
            'y' => UserDefinedType::Symbol,
            'v' => UserDefinedType::Void,
            '*' => UserDefinedType::Any,
            _ => return None,
        })
    }
}

fn codes(types: &[UserDefinedType]) -> String {
    types.iter().map(UserDefinedType::code).collect()
}

/// Allowed argument types: a default union plus optional per-position unions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentTypes {
    /// Types allowed for any position without its own entry; empty means any
    pub default: Vec<UserDefinedType>,
    /// Types allowed for each leading position
    pub positional: Vec<Vec<UserDefinedType>>,
}

impl ArgumentTypes {
    pub fn new(default: Vec<UserDefinedType>) -> Self {
        Self {
            default,
            positional: Vec::new(),
        }
    }

    /// Constrain the next argument position.
    pub fn with_position(mut self, types: Vec<UserDefinedType>) -> Self {
        self.positional.push(types);
        self
    }
}

/// Renders the native form, `default;pos1;pos2...`
impl fmt::Display for ArgumentTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&codes(&self.default))?;
        for position in &self.positional {
            write!(f, ";{}", codes(position))?;
        }
        Ok(())
    }
}

/// Declared shape of a user-defined function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub return_types: Vec<UserDefinedType>,
    pub arg_types: ArgumentTypes,
    /// `None` means any number of arguments
    pub arg_count: Option<RangeInclusive<u16>>,
}

impl Default for FunctionSignature {
    fn default() -> Self {
        Self {
            return_types: vec![UserDefinedType::Any],
            arg_types: ArgumentTypes::default(),
            arg_count: None,
        }
    }
}

impl FunctionSignature {
    pub fn returns(mut self, types: Vec<UserDefinedType>) -> Self {
        self.return_types = types;
        self
    }

    pub fn arg_types(mut self, types: ArgumentTypes) -> Self {
        self.arg_types = types;
        self
    }

    pub fn arg_count(mut self, count: RangeInclusive<u16>) -> Self {
        self.arg_count = Some(count);
        self
    }
}

/// The context handed to a handler for one call
pub struct Invocation<'a> {
    native: &'a mut dyn NativeEngine,
    frame: &'a mut UdfFrame,
    externals: &'a ExternalBridge,
}

impl<'a> Invocation<'a> {
    /// Number of arguments passed
    pub fn arg_count(&self) -> usize {
        self.frame.args.len()
    }

    /// Every argument. A multifield argument stays a single multifield value.
    pub fn arguments(&self) -> Vec<Value> {
        self.frame
            .args
            .iter()
            .map(|arg| from_foreign(&*self.native, arg))
            .collect()
    }

    pub fn argument(&self, index: usize) -> Option<Value> {
        self.frame
            .args
            .get(index)
            .map(|arg| from_foreign(&*self.native, arg))
    }

    /// Set the function result.
    ///
    /// A value that cannot be marshaled aborts the call as if
    /// [`Invocation::throw_error`] had been called.
    pub fn set_return(&mut self, value: Value) {
        match to_foreign(&mut *self.native, &value) {
            Ok(foreign) => self.frame.result = foreign,
            Err(e) => {
                tracing::warn!(error = %e, "Could not marshal function result");
                self.frame.error_thrown = true;
            }
        }
    }

    /// Stop evaluation with an error.
    pub fn throw_error(&mut self) {
        self.frame.error_thrown = true;
    }

    /// Set the value returned by `(get-error)`. Execution continues.
    pub fn set_error(&mut self, value: Value) {
        match to_foreign(&mut *self.native, &value) {
            Ok(foreign) => self.native.set_error_value(foreign),
            Err(e) => tracing::warn!(error = %e, "Could not marshal error value"),
        }
    }

    /// Host object behind an external address argument
    pub fn external_object<T: Any>(&self, addr: &ExternalAddress) -> Option<Rc<T>> {
        self.externals.object(&*self.native, addr)
    }

    /// Wrap a host object, e.g. to return it.
    pub fn create_external_address<T: Any>(&mut self, object: Rc<T>) -> ExternalAddress {
        self.externals.wrap(&mut *self.native, object)
    }
}

impl Session {
    /// Register a user-defined function.
    ///
    /// # Errors
    ///
    /// [`AddUdfError::FunctionNameInUse`] if the name is taken; the existing
    /// function stays registered.
    pub fn add_function<F>(&mut self, name: &str, signature: FunctionSignature, handler: F) -> Result<()>
    where
        F: Fn(&mut Invocation<'_>) + 'static,
    {
        let externals = self.externals().clone();
        let native_handler: UdfHandler = Rc::new(move |native: &mut dyn NativeEngine, frame: &mut UdfFrame| {
            let mut invocation = Invocation {
                native,
                frame,
                externals: &externals,
            };
            handler(&mut invocation);
        });

        let (min_args, max_args) = match &signature.arg_count {
            Some(range) => (*range.start(), Some(*range.end())),
            None => (0, None),
        };

        let registration = UdfRegistration {
            name: name.to_string(),
            return_types: codes(&signature.return_types),
            min_args,
            max_args,
            arg_types: signature.arg_types.to_string(),
            handler: native_handler,
        };

        self.native_mut()
            .add_udf(registration)
            .map_err(AddUdfError::from_code)?;
        tracing::debug!(function = %name, "Registered user-defined function");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BridgeError, EvalError};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    mod types {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_codes_round_trip() {
            for c in "bdefilmnsyv*".chars() {
                assert_eq!(UserDefinedType::from_code(c).map(|t| t.code()), Some(c));
            }
            assert_eq!(UserDefinedType::from_code('x'), None);
        }

        #[test]
        fn test_argument_type_string() {
            let types = ArgumentTypes::new(vec![UserDefinedType::Symbol, UserDefinedType::Fact])
                .with_position(vec![UserDefinedType::Symbol])
                .with_position(vec![UserDefinedType::Boolean]);
            assert_eq!(types.to_string(), "yf;y;b");
            assert_eq!(ArgumentTypes::default().to_string(), "");
        }
    }

    mod invocation {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_arguments_keep_multifields() {
            let mut session = Session::new();
            let seen = Rc::new(RefCell::new(Vec::new()));
            let sink = seen.clone();
            session
                .add_function("foo", FunctionSignature::default(), move |inv| {
                    *sink.borrow_mut() = inv.arguments();
                })
                .unwrap();
            session.eval("(foo 1 FALSE (create$ a 2))").unwrap();
            assert_eq!(
                *seen.borrow(),
                vec![
                    Value::Integer(1),
                    Value::Boolean(false),
                    Value::multifield(vec![Value::symbol("a"), Value::Integer(2)]),
                ]
            );
        }

        #[test]
        fn test_return_values() {
            let mut session = Session::new();
            session
                .add_function("foo", FunctionSignature::default(), |inv| {
                    inv.set_return(Value::string("hello"));
                })
                .unwrap();
            session
                .add_function("foo2", FunctionSignature::default(), |inv| {
                    inv.set_return(Value::multifield(vec![Value::Boolean(true), Value::symbol("bar")]));
                })
                .unwrap();
            assert_eq!(session.eval("(foo)").unwrap(), Value::string("hello"));
            assert_eq!(
                session.eval("(foo2)").unwrap(),
                Value::multifield(vec![Value::Boolean(true), Value::symbol("bar")])
            );
        }

        #[test]
        fn test_set_error() {
            let mut session = Session::new();
            session
                .add_function("foo", FunctionSignature::default(), |inv| {
                    inv.set_error(Value::multifield(vec![Value::Integer(23), Value::symbol("oops")]));
                })
                .unwrap();
            session.eval("(foo)").unwrap();
            assert_eq!(
                session.eval("(get-error)").unwrap(),
                Value::multifield(vec![Value::Integer(23), Value::symbol("oops")])
            );
        }

        #[test]
        fn test_throw_error_is_processing_error() {
            let mut session = Session::new();
            session
                .add_function("foo", FunctionSignature::default(), |inv| inv.throw_error())
                .unwrap();
            let err = session.eval("(foo)").unwrap_err();
            assert!(matches!(err, BridgeError::Eval(EvalError::Processing)));
        }

        #[test]
        fn test_arg_count_property() {
            let mut session = Session::new();
            let count = Rc::new(RefCell::new(0));
            let sink = count.clone();
            session
                .add_function("foo", FunctionSignature::default(), move |inv| {
                    *sink.borrow_mut() = inv.arg_count();
                })
                .unwrap();
            session.eval("(foo 1 2 3)").unwrap();
            assert_eq!(*count.borrow(), 3);
        }
    }

    mod constraints {
        use super::*;
        use pretty_assertions::assert_eq;

        fn assert_parse_error(session: &mut Session, expression: &str) {
            let err = session.eval(expression).unwrap_err();
            assert!(
                matches!(err, BridgeError::Eval(EvalError::Parsing)),
                "{expression} should be rejected, got {err}"
            );
        }

        #[test]
        fn test_default_types() {
            let mut session = Session::new();
            let sig = FunctionSignature::default().arg_types(ArgumentTypes::new(vec![
                UserDefinedType::Double,
                UserDefinedType::Symbol,
            ]));
            session.add_function("foo", sig, |_| {}).unwrap();

            session.eval("(foo 1.0 bar 3.4 baz)").unwrap();
            assert_parse_error(&mut session, "(foo 1)");
            assert_parse_error(&mut session, "(foo \"hello\")");
        }

        #[test]
        fn test_positional_types() {
            let mut session = Session::new();
            let sig = FunctionSignature::default().arg_types(
                ArgumentTypes::new(vec![UserDefinedType::Symbol, UserDefinedType::Fact])
                    .with_position(vec![UserDefinedType::Symbol])
                    .with_position(vec![UserDefinedType::Boolean]),
            );
            session.add_function("bar", sig, |_| {}).unwrap();

            session.eval("(bar a TRUE b)").unwrap();
            assert_parse_error(&mut session, "(bar a TRUE 1)");
            assert_parse_error(&mut session, "(bar a TRUE \"hello\")");
        }

        #[test]
        fn test_arg_counts() {
            let mut session = Session::new();
            session
                .add_function("foo", FunctionSignature::default().arg_count(1..=3), |_| {})
                .unwrap();

            session.eval("(foo 1)").unwrap();
            session.eval("(foo 1 2)").unwrap();
            session.eval("(foo 1 2 3)").unwrap();
            assert_parse_error(&mut session, "(foo 1 2 3 4)");
            assert_parse_error(&mut session, "(foo)");
        }

        #[test]
        fn test_duplicate_names() {
            let mut session = Session::new();
            session
                .add_function("foo", FunctionSignature::default(), |inv| {
                    inv.set_return(Value::Integer(1))
                })
                .unwrap();
            let err = session
                .add_function("foo", FunctionSignature::default(), |inv| {
                    inv.set_return(Value::Integer(2))
                })
                .unwrap_err();
            assert!(matches!(err, BridgeError::AddUdf(AddUdfError::FunctionNameInUse)));
            assert_eq!(session.eval("(foo)").unwrap(), Value::Integer(1));
        }

        #[test]
        fn test_min_exceeds_max() {
            let mut session = Session::new();
            #[allow(clippy::reversed_empty_ranges)]
            let sig = FunctionSignature::default().arg_count(3..=1);
            let err = session.add_function("foo", sig, |_| {}).unwrap_err();
            assert!(matches!(err, BridgeError::AddUdf(AddUdfError::MinExceedsMax)));
        }
    }
}
