//! Instances of user-defined classes

use crate::error::{GetSlotError, LoadError, MakeInstanceError, PutSlotError, Result, UnmakeInstanceError};
use crate::facts::symbol_list;
use crate::modules::Module;
use crate::native::{ClassId, SaveScope};
use crate::session::Session;
use crate::value::{Instance, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A defclass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassDefinition(pub(crate) ClassId);

impl ClassDefinition {
    pub fn id(&self) -> ClassId {
        self.0
    }
}

/// Class, name and slot values of an instance, independent of any session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceAndSlots {
    pub class_name: String,
    pub instance_name: String,
    pub slots: BTreeMap<String, Value>,
}

impl Session {
    /// Create an instance from its text form, e.g. `([joe] of person (age 3))`.
    pub fn make_instance(&mut self, text: &str) -> Result<Instance> {
        let id = self
            .native_mut()
            .make_instance(text)
            .map_err(MakeInstanceError::from_code)?;
        tracing::debug!(instance = %id, "Made instance");
        Ok(Instance(id))
    }

    /// Delete an instance through message dispatch.
    pub fn unmake_instance(&mut self, instance: Instance) -> Result<()> {
        self.native_mut()
            .unmake_instance(instance.0)
            .map_err(UnmakeInstanceError::from_code)?;
        Ok(())
    }

    /// Delete an instance directly.
    pub fn delete_instance(&mut self, instance: Instance) -> Result<()> {
        self.native_mut()
            .delete_instance(instance.0)
            .map_err(UnmakeInstanceError::from_code)?;
        Ok(())
    }

    /// Whether the instance has not been deleted
    pub fn instance_valid(&self, instance: Instance) -> bool {
        self.native().instance_valid(instance.0)
    }

    pub fn retain_instance(&mut self, instance: Instance) {
        self.native_mut().retain_instance(instance.0);
    }

    pub fn release_instance(&mut self, instance: Instance) {
        self.native_mut().release_instance(instance.0);
    }

    pub fn instance_name(&self, instance: Instance) -> Option<String> {
        self.native().instance_name(instance.0)
    }

    pub fn class_of(&self, instance: Instance) -> Option<ClassDefinition> {
        self.native().instance_class(instance.0).map(ClassDefinition)
    }

    pub fn class_name(&self, class: ClassDefinition) -> Option<String> {
        self.native().class_name(class.0)
    }

    /// Name of the module defining the class
    pub fn class_module(&self, class: ClassDefinition) -> Option<String> {
        self.native().class_module(class.0)
    }

    /// Slot names of a class, optionally including inherited slots.
    pub fn class_slot_names(&mut self, class: ClassDefinition, inherit: bool) -> Vec<String> {
        let Some(foreign) = self.native_mut().class_slots(class.0, inherit) else {
            return Vec::new();
        };
        symbol_list(self.from_foreign(&foreign))
    }

    pub fn find_class(&self, name: &str) -> Option<ClassDefinition> {
        self.native().find_class(name).map(ClassDefinition)
    }

    /// Find an instance by name.
    ///
    /// # Arguments
    ///
    /// * `name` - Instance name without brackets
    /// * `module` - Module to search from; the current module when `None`
    /// * `search_imports` - Also search modules imported by `module`
    pub fn find_instance(&self, name: &str, module: Option<Module>, search_imports: bool) -> Option<Instance> {
        self.native()
            .find_instance(name, module.map(|m| m.0), search_imports)
            .map(Instance)
    }

    pub fn next_instance(&self, after: Option<Instance>) -> Option<Instance> {
        self.native().next_instance(after.map(|i| i.0)).map(Instance)
    }

    pub fn next_instance_in_class(&self, class: ClassDefinition, after: Option<Instance>) -> Option<Instance> {
        self.native()
            .next_instance_in_class(class.0, after.map(|i| i.0))
            .map(Instance)
    }

    /// Iterate over every instance in creation order.
    pub fn instances(&self) -> impl Iterator<Item = Instance> + '_ {
        std::iter::successors(self.next_instance(None), move |i| self.next_instance(Some(*i)))
    }

    pub fn pretty_print_instance(&self, instance: Instance) -> Option<String> {
        self.native().instance_pp_form(instance.0)
    }

    /// Read a slot without message dispatch.
    pub fn direct_get_slot(&self, instance: Instance, slot: &str) -> Result<Value> {
        let foreign = self
            .native()
            .direct_get_slot(instance.0, slot)
            .map_err(GetSlotError::from_code)?;
        Ok(self.from_foreign(&foreign))
    }

    /// Write a slot without message dispatch.
    pub fn direct_put_slot(&mut self, instance: Instance, slot: &str, value: impl Into<Value>) -> Result<()> {
        let foreign = self.to_foreign(&value.into())?;
        self.native_mut()
            .direct_put_slot(instance.0, slot, foreign)
            .map_err(PutSlotError::from_code)?;
        Ok(())
    }

    pub fn instances_changed(&self) -> bool {
        self.native().instances_changed()
    }

    pub fn set_instances_changed(&mut self, changed: bool) {
        self.native_mut().set_instances_changed(changed);
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn load_instances(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        Ok(self
            .native_mut()
            .load_instances(path.as_ref())
            .map_err(LoadError::from_code)?)
    }

    pub fn load_instances_from_str(&mut self, source: &str) -> Result<usize> {
        Ok(self
            .native_mut()
            .load_instances_from_string(source)
            .map_err(LoadError::from_code)?)
    }

    pub fn save_instances(&mut self, path: impl AsRef<Path>, scope: SaveScope) -> Result<usize> {
        Ok(self
            .native_mut()
            .save_instances(path.as_ref(), scope)
            .map_err(LoadError::from_code)?)
    }

    pub fn load_binary_instances(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        Ok(self
            .native_mut()
            .binary_load_instances(path.as_ref())
            .map_err(LoadError::from_code)?)
    }

    pub fn save_binary_instances(&mut self, path: impl AsRef<Path>, scope: SaveScope) -> Result<usize> {
        Ok(self
            .native_mut()
            .binary_save_instances(path.as_ref(), scope)
            .map_err(LoadError::from_code)?)
    }

    /// Load instances without sending creation messages.
    pub fn restore_instances(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        Ok(self
            .native_mut()
            .restore_instances(path.as_ref())
            .map_err(LoadError::from_code)?)
    }

    pub fn restore_instances_from_str(&mut self, source: &str) -> Result<usize> {
        Ok(self
            .native_mut()
            .restore_instances_from_string(source)
            .map_err(LoadError::from_code)?)
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub fn instance_snapshot(&mut self, instance: Instance) -> Option<InstanceAndSlots> {
        let class = self.class_of(instance)?;
        let class_name = self.class_name(class)?;
        let instance_name = self.instance_name(instance)?;
        let mut slots = BTreeMap::new();
        for slot in self.class_slot_names(class, true) {
            if let Ok(value) = self.direct_get_slot(instance, &slot) {
                slots.insert(slot, value);
            }
        }
        Some(InstanceAndSlots {
            class_name,
            instance_name,
            slots,
        })
    }

    /// Snapshot of every instance
    pub fn all_instances(&mut self) -> Vec<InstanceAndSlots> {
        let instances: Vec<Instance> = self.instances().collect();
        instances
            .into_iter()
            .filter_map(|instance| self.instance_snapshot(instance))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use pretty_assertions::assert_eq;

    fn session_with_classes() -> Session {
        let mut session = Session::new();
        session
            .build("(defclass foo (is-a USER) (slot a) (slot b))")
            .unwrap();
        session
            .build("(defclass bar (is-a foo) (slot c (default 7)))")
            .unwrap();
        session
    }

    mod creation {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_make_and_read() {
            let mut session = session_with_classes();
            let joe = session.make_instance("([joe] of foo (a 1) (b \"x\"))").unwrap();
            assert_eq!(session.instance_name(joe).as_deref(), Some("joe"));
            assert_eq!(session.direct_get_slot(joe, "a").unwrap(), Value::Integer(1));
            assert_eq!(session.direct_get_slot(joe, "b").unwrap(), Value::string("x"));
            assert_eq!(
                session.class_of(joe).and_then(|c| session.class_name(c)).as_deref(),
                Some("foo")
            );
        }

        #[test]
        fn test_unknown_class() {
            let mut session = session_with_classes();
            let err = session.make_instance("([x] of nope)").unwrap_err();
            assert!(matches!(err, BridgeError::MakeInstance(_)));
        }

        #[test]
        fn test_inherited_slots() {
            let mut session = session_with_classes();
            let bar = session.find_class("bar").unwrap();
            assert_eq!(session.class_slot_names(bar, false), vec!["c"]);
            assert_eq!(session.class_slot_names(bar, true), vec!["a", "b", "c"]);

            let inst = session.make_instance("([b1] of bar (a 2))").unwrap();
            assert_eq!(session.direct_get_slot(inst, "c").unwrap(), Value::Integer(7));
            assert_eq!(session.direct_get_slot(inst, "b").unwrap(), Value::symbol("nil"));
        }
    }

    mod slots {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_direct_put() {
            let mut session = session_with_classes();
            let joe = session.make_instance("([joe] of foo (a 1) (b two))").unwrap();
            session.direct_put_slot(joe, "a", 43).unwrap();
            assert_eq!(session.direct_get_slot(joe, "a").unwrap(), Value::Integer(43));
            assert_eq!(session.direct_get_slot(joe, "b").unwrap(), Value::symbol("two"));

            let err = session.direct_put_slot(joe, "zzz", 1).unwrap_err();
            assert!(matches!(err, BridgeError::PutSlot(PutSlotError::SlotNotFound)));
        }
    }

    mod lifecycle {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_delete_invalidates() {
            let mut session = session_with_classes();
            let joe = session.make_instance("([joe] of foo)").unwrap();
            assert!(session.instance_valid(joe));
            session.delete_instance(joe).unwrap();
            assert!(!session.instance_valid(joe));
            let err = session.unmake_instance(joe).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Lifecycle);
        }

        #[test]
        fn test_find_and_iterate() {
            let mut session = session_with_classes();
            let a = session.make_instance("([a] of foo)").unwrap();
            let b = session.make_instance("([b] of bar)").unwrap();
            assert_eq!(session.find_instance("b", None, false), Some(b));
            assert_eq!(session.find_instance("zz", None, true), None);
            assert_eq!(session.instances().collect::<Vec<_>>(), vec![a, b]);

            let foo = session.find_class("foo").unwrap();
            assert_eq!(session.next_instance_in_class(foo, None), Some(a));
            assert_eq!(session.next_instance_in_class(foo, Some(a)), None);
        }

        #[test]
        fn test_pretty_print() {
            let mut session = session_with_classes();
            let joe = session.make_instance("([joe] of foo (a 1) (b 2))").unwrap();
            assert_eq!(
                session.pretty_print_instance(joe).as_deref(),
                Some("[joe] of foo\n(a 1)\n(b 2)")
            );
        }
    }
}
