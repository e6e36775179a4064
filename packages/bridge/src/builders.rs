//! Fact, instance and function call builders
//!
//! A builder selects a target (template, class or function), accumulates
//! slot values or arguments, and performs one terminal action. The terminal
//! action consumes the accumulated values and leaves the target selected,
//! so the same builder can produce several facts in a row. Materialization
//! is a single native call: on failure nothing is added to working memory.
//!
//! Values held by a builder are retained in the engine so that collection
//! checkpoints cannot discard them before the terminal action.
//!
//! # Example
//!
//! ```
//! use clipsrules::{Session, Value};
//!
//! let mut session = Session::new();
//! session.build("(deftemplate point (slot x) (slot y))").unwrap();
//! session
//!     .build_facts(|b| {
//!         b.set_template("point")?;
//!         b.put("x", 1)?.put("y", 2)?;
//!         b.assert()
//!     })
//!     .unwrap();
//! assert_eq!(session.facts().count(), 1);
//! ```

use crate::error::{FactBuilderError, FunctionCallError, InstanceBuilderError, PutSlotError, Result};
use crate::native::{ClassId, ForeignValue, TemplateId};
use crate::session::Session;
use crate::value::{Fact, Instance, Value};

/// Accumulated `(slot, value)` pairs, retained in the engine while held
struct SlotValues(Vec<(String, ForeignValue)>);

impl SlotValues {
    fn set(&mut self, session: &mut Session, slot: &str, value: ForeignValue) {
        session.native_mut().retain_value(&value);
        if let Some(entry) = self.0.iter_mut().find(|(name, _)| name == slot) {
            let old = std::mem::replace(&mut entry.1, value);
            session.native_mut().release_value(&old);
        } else {
            self.0.push((slot.to_string(), value));
        }
    }

    fn release_all(&mut self, session: &mut Session) {
        for (_, value) in self.0.drain(..) {
            session.native_mut().release_value(&value);
        }
    }
}

// ============================================================================
// Facts
// ============================================================================

/// Builds template facts slot by slot
pub struct FactBuilder<'s> {
    session: &'s mut Session,
    template: Option<TemplateId>,
    slots: SlotValues,
}

impl<'s> FactBuilder<'s> {
    pub fn new(session: &'s mut Session) -> Self {
        Self {
            session,
            template: None,
            slots: SlotValues(Vec::new()),
        }
    }

    /// Select the template for subsequent facts. Pending values are dropped.
    ///
    /// # Errors
    ///
    /// [`FactBuilderError::DeftemplateNotFound`] for an unknown name,
    /// [`FactBuilderError::ImpliedDeftemplate`] for the template of an
    /// ordered fact.
    pub fn set_template(&mut self, name: &str) -> Result<&mut Self> {
        self.slots.release_all(self.session);
        let template = self
            .session
            .native()
            .find_template(name)
            .ok_or(FactBuilderError::DeftemplateNotFound)?;
        if self.session.native().template_is_implied(template) {
            return Err(FactBuilderError::ImpliedDeftemplate.into());
        }
        self.template = Some(template);
        Ok(self)
    }

    /// Set a slot value, checking it against the slot's constraints.
    pub fn put(&mut self, slot: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let template = self.template.ok_or(FactBuilderError::NullPointer)?;
        let foreign = self.session.to_foreign(&value.into())?;
        self.session
            .native()
            .check_template_slot(template, slot, &foreign)
            .map_err(PutSlotError::from_code)?;
        self.slots.set(self.session, slot, foreign);
        Ok(self)
    }

    /// Assert a fact from the values set so far, then clear them.
    ///
    /// Returns the existing fact when an identical one is already present and
    /// duplicates are not allowed.
    pub fn assert(&mut self) -> Result<Fact> {
        let template = self.template.ok_or(FactBuilderError::NullPointer)?;
        let result = self
            .session
            .native_mut()
            .assert_template_fact(template, &self.slots.0);
        self.slots.release_all(self.session);
        let id = result.map_err(FactBuilderError::from_code)?;
        tracing::debug!(fact = %id, "Built fact");
        Ok(Fact(id))
    }

    /// Drop pending values without asserting.
    pub fn abort(&mut self) {
        self.slots.release_all(self.session);
    }
}

impl Drop for FactBuilder<'_> {
    fn drop(&mut self) {
        self.slots.release_all(self.session);
    }
}

// ============================================================================
// Instances
// ============================================================================

/// Builds instances slot by slot
pub struct InstanceBuilder<'s> {
    session: &'s mut Session,
    class: Option<ClassId>,
    slots: SlotValues,
}

impl<'s> InstanceBuilder<'s> {
    pub fn new(session: &'s mut Session) -> Self {
        Self {
            session,
            class: None,
            slots: SlotValues(Vec::new()),
        }
    }

    /// Select the class for subsequent instances. Pending values are dropped.
    pub fn set_class(&mut self, name: &str) -> Result<&mut Self> {
        self.slots.release_all(self.session);
        let class = self
            .session
            .native()
            .find_class(name)
            .ok_or(InstanceBuilderError::DefclassNotFound)?;
        self.class = Some(class);
        Ok(self)
    }

    pub fn put(&mut self, slot: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let class = self.class.ok_or(InstanceBuilderError::NullPointer)?;
        let foreign = self.session.to_foreign(&value.into())?;
        self.session
            .native()
            .check_class_slot(class, slot, &foreign)
            .map_err(PutSlotError::from_code)?;
        self.slots.set(self.session, slot, foreign);
        Ok(self)
    }

    /// Create an instance from the values set so far, then clear them.
    ///
    /// A name is generated when `name` is `None`. An existing instance with
    /// the same name is replaced.
    pub fn make(&mut self, name: Option<&str>) -> Result<Instance> {
        let class = self.class.ok_or(InstanceBuilderError::NullPointer)?;
        let result = self
            .session
            .native_mut()
            .create_instance(class, name, &self.slots.0);
        self.slots.release_all(self.session);
        let id = result.map_err(InstanceBuilderError::from_code)?;
        tracing::debug!(instance = %id, "Built instance");
        Ok(Instance(id))
    }

    pub fn abort(&mut self) {
        self.slots.release_all(self.session);
    }
}

impl Drop for InstanceBuilder<'_> {
    fn drop(&mut self) {
        self.slots.release_all(self.session);
    }
}

// ============================================================================
// Function calls
// ============================================================================

/// Calls a function with arguments appended one at a time
pub struct FunctionCallBuilder<'s> {
    session: &'s mut Session,
    function: Option<String>,
    args: Vec<ForeignValue>,
}

impl<'s> FunctionCallBuilder<'s> {
    pub fn new(session: &'s mut Session) -> Self {
        Self {
            session,
            function: None,
            args: Vec::new(),
        }
    }

    /// Select the function to call. Pending arguments are kept.
    pub fn set_function(&mut self, name: &str) -> Result<&mut Self> {
        if !self.session.native().function_exists(name) {
            return Err(FunctionCallError::FunctionNotFound.into());
        }
        self.function = Some(name.to_string());
        Ok(self)
    }

    /// Append an argument. Multifields are passed as one argument.
    pub fn append(&mut self, value: impl Into<Value>) -> Result<&mut Self> {
        let foreign = self.session.to_foreign(&value.into())?;
        self.session.native_mut().retain_value(&foreign);
        self.args.push(foreign);
        Ok(self)
    }

    /// Call the function with the appended arguments, then clear them.
    pub fn call(&mut self) -> Result<Value> {
        let name = self
            .function
            .clone()
            .ok_or(FunctionCallError::NullPointer)?;
        let args = std::mem::take(&mut self.args);
        let result = self.session.native_mut().call_function(&name, &args);
        for arg in &args {
            self.session.native_mut().release_value(arg);
        }
        let foreign = result.map_err(FunctionCallError::from_code)?;
        Ok(self.session.from_foreign(&foreign))
    }

    pub fn abort(&mut self) {
        for arg in std::mem::take(&mut self.args) {
            self.session.native_mut().release_value(&arg);
        }
    }
}

impl Drop for FunctionCallBuilder<'_> {
    fn drop(&mut self) {
        self.abort();
    }
}

// ============================================================================
// Session helpers
// ============================================================================

impl Session {
    pub fn fact_builder(&mut self) -> FactBuilder<'_> {
        FactBuilder::new(self)
    }

    pub fn instance_builder(&mut self) -> InstanceBuilder<'_> {
        InstanceBuilder::new(self)
    }

    pub fn function_call_builder(&mut self) -> FunctionCallBuilder<'_> {
        FunctionCallBuilder::new(self)
    }

    /// Run a closure with a fresh fact builder.
    pub fn build_facts<T>(&mut self, f: impl FnOnce(&mut FactBuilder<'_>) -> Result<T>) -> Result<T> {
        let mut builder = self.fact_builder();
        f(&mut builder)
    }

    /// Run a closure with a fresh instance builder.
    pub fn build_instances<T>(
        &mut self,
        f: impl FnOnce(&mut InstanceBuilder<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut builder = self.instance_builder();
        f(&mut builder)
    }

    /// Call a function by name.
    ///
    /// # Example
    ///
    /// ```
    /// use clipsrules::{Session, Value};
    ///
    /// let mut session = Session::new();
    /// let sum = session.call("+", &[Value::Integer(2), Value::Integer(3)]).unwrap();
    /// assert_eq!(sum, Value::Integer(5));
    /// ```
    pub fn call(&mut self, function: &str, args: &[Value]) -> Result<Value> {
        let mut builder = self.function_call_builder();
        builder.set_function(function)?;
        for arg in args {
            builder.append(arg.clone())?;
        }
        builder.call()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BridgeError, ErrorKind};
    use pretty_assertions::assert_eq;

    fn session_with_templates() -> Session {
        let mut session = Session::new();
        session.build("(deftemplate foo (slot a) (slot b))").unwrap();
        session
            .build("(deftemplate bar (slot a) (slot b (default 10)))")
            .unwrap();
        session
    }

    mod facts {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_values_reset_after_assert() {
            let mut session = session_with_templates();
            let (foo1, foo2, bar1) = session
                .build_facts(|b| {
                    b.set_template("foo")?;
                    b.put("a", 45)?;
                    let foo1 = b.assert()?;
                    let foo2 = b.assert()?;
                    b.set_template("bar")?;
                    let bar1 = b.assert()?;
                    Ok((foo1, foo2, bar1))
                })
                .unwrap();

            assert_eq!(session.fact_slot(foo1, "a").unwrap(), Value::Integer(45));
            assert_eq!(session.fact_slot(foo2, "a").unwrap(), Value::symbol("nil"));
            assert_eq!(session.fact_slot(bar1, "b").unwrap(), Value::Integer(10));
        }

        #[test]
        fn test_unknown_template_leaves_facts_unchanged() {
            let mut session = session_with_templates();
            session.assert_string("(foo (a 1))").unwrap();
            let before = session.facts().count();

            let err = session
                .build_facts(|b| {
                    b.set_template("nope")?;
                    b.assert()
                })
                .unwrap_err();

            assert_eq!(err.kind(), ErrorKind::TargetNotFound);
            assert_eq!(session.facts().count(), before);
        }

        #[test]
        fn test_assert_without_template() {
            let mut session = session_with_templates();
            let err = session.build_facts(|b| b.assert()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TargetNotFound);
        }

        #[test]
        fn test_unknown_slot_rejected_at_put() {
            let mut session = session_with_templates();
            let err = session
                .build_facts(|b| {
                    b.set_template("foo")?;
                    b.put("zzz", 1)?;
                    b.assert()
                })
                .unwrap_err();
            assert!(matches!(err, BridgeError::PutSlot(PutSlotError::SlotNotFound)));
            assert_eq!(session.facts().count(), 0);
        }

        #[test]
        fn test_implied_template_rejected() {
            let mut session = session_with_templates();
            session.assert_string("(ordered 1 2)").unwrap();
            let err = session
                .build_facts(|b| b.set_template("ordered").map(|_| ()))
                .unwrap_err();
            assert!(matches!(
                err,
                BridgeError::FactBuilder(FactBuilderError::ImpliedDeftemplate)
            ));
        }
    }

    mod instances {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_make_named_and_generated() {
            let mut session = Session::new();
            session
                .build("(defclass foo (is-a USER) (slot a) (slot b))")
                .unwrap();
            let (named, generated) = session
                .build_instances(|b| {
                    b.set_class("foo")?;
                    b.put("a", 3)?.put("b", "two")?;
                    let named = b.make(Some("foo-3-two"))?;
                    let generated = b.make(None)?;
                    Ok((named, generated))
                })
                .unwrap();

            assert_eq!(session.instance_name(named).as_deref(), Some("foo-3-two"));
            assert_eq!(session.direct_get_slot(named, "b").unwrap(), Value::string("two"));
            assert_eq!(session.direct_get_slot(generated, "a").unwrap(), Value::symbol("nil"));
            assert_eq!(session.find_instance("foo-3-two", None, false), Some(named));
        }

        #[test]
        fn test_unknown_class() {
            let mut session = Session::new();
            let err = session
                .build_instances(|b| b.set_class("nope").map(|_| ()))
                .unwrap_err();
            assert!(matches!(
                err,
                BridgeError::InstanceBuilder(InstanceBuilderError::DefclassNotFound)
            ));
        }
    }

    mod calls {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_call_builtin() {
            let mut session = Session::new();
            let v = session
                .call("str-cat", &[Value::string("a"), Value::symbol("b"), Value::Integer(1)])
                .unwrap();
            assert_eq!(v, Value::string("ab1"));
        }

        #[test]
        fn test_unknown_function() {
            let mut session = Session::new();
            let err = session.call("no-such-fn", &[]).unwrap_err();
            assert!(matches!(
                err,
                BridgeError::FunctionCall(FunctionCallError::FunctionNotFound)
            ));
        }

        #[test]
        fn test_call_without_function() {
            let mut session = Session::new();
            let mut builder = session.function_call_builder();
            let err = builder.call().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TargetNotFound);
        }

        #[test]
        fn test_arguments_reset_after_call() {
            let mut session = Session::new();
            let mut builder = session.function_call_builder();
            builder.set_function("create$").unwrap();
            builder.append(1).unwrap().append(2).unwrap();
            assert_eq!(
                builder.call().unwrap(),
                Value::multifield(vec![Value::Integer(1), Value::Integer(2)])
            );
            assert_eq!(builder.call().unwrap(), Value::Multifield(vec![]));
        }
    }
}
