//! Facts and fact templates
//!
//! Fact handles are plain keys. A fact stays readable until the next
//! collection checkpoint after it is retracted, or for as long as it is
//! retained.

use crate::error::{AssertStringError, GetSlotError, LoadError, Result, RetractError};
use crate::native::{SaveScope, TemplateId};
use crate::session::Session;
use crate::value::{Fact, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A deftemplate, including the implied templates of ordered facts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FactTemplate(pub(crate) TemplateId);

impl FactTemplate {
    pub fn id(&self) -> TemplateId {
        self.0
    }
}

/// Template name and slot values of a fact, independent of any session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactAndSlots {
    pub template_name: String,
    pub slots: BTreeMap<String, Value>,
}

impl Session {
    /// Assert a fact from its text form, e.g. `(point (x 1) (y 2))`.
    pub fn assert_string(&mut self, text: &str) -> Result<Fact> {
        let id = self
            .native_mut()
            .assert_string(text)
            .map_err(AssertStringError::from_code)?;
        tracing::debug!(fact = %id, "Asserted fact");
        Ok(Fact(id))
    }

    pub fn retract(&mut self, fact: Fact) -> Result<()> {
        self.native_mut()
            .retract(fact.0)
            .map_err(RetractError::from_code)?;
        Ok(())
    }

    pub fn retract_all_facts(&mut self) -> Result<()> {
        self.native_mut()
            .retract_all_facts()
            .map_err(RetractError::from_code)?;
        Ok(())
    }

    /// Whether the fact is still in working memory
    pub fn fact_exists(&self, fact: Fact) -> bool {
        self.native().fact_exists(fact.0)
    }

    /// Keep a fact readable after retraction.
    pub fn retain_fact(&mut self, fact: Fact) {
        self.native_mut().retain_fact(fact.0);
    }

    pub fn release_fact(&mut self, fact: Fact) {
        self.native_mut().release_fact(fact.0);
    }

    /// Read a slot. Ordered facts have a single multislot named
    /// [`crate::config::IMPLIED_SLOT_NAME`].
    pub fn fact_slot(&self, fact: Fact, slot: &str) -> Result<Value> {
        let foreign = self
            .native()
            .fact_slot(fact.0, slot)
            .map_err(GetSlotError::from_code)?;
        Ok(self.from_foreign(&foreign))
    }

    pub fn template_of(&self, fact: Fact) -> Option<FactTemplate> {
        self.native().fact_template(fact.0).map(FactTemplate)
    }

    /// Template name of a fact
    pub fn fact_name(&self, fact: Fact) -> Option<String> {
        self.template_of(fact).and_then(|t| self.template_name(t))
    }

    /// The `N` in `f-N`
    pub fn fact_index(&self, fact: Fact) -> Option<u64> {
        self.native().fact_index(fact.0)
    }

    pub fn template_name(&self, template: FactTemplate) -> Option<String> {
        self.native().template_name(template.0)
    }

    /// Name of the module defining the template
    pub fn template_module(&self, template: FactTemplate) -> Option<String> {
        self.native().template_module(template.0)
    }

    pub fn template_slot_names(&mut self, template: FactTemplate) -> Vec<String> {
        let Some(foreign) = self.native_mut().template_slot_names(template.0) else {
            return Vec::new();
        };
        symbol_list(self.from_foreign(&foreign))
    }

    /// Find a template visible from the current module. `Module::name`
    /// qualifies the lookup.
    pub fn find_template(&self, name: &str) -> Option<FactTemplate> {
        self.native().find_template(name).map(FactTemplate)
    }

    /// The fact after `after`, or the first fact when `after` is `None`
    pub fn next_fact(&self, after: Option<Fact>) -> Option<Fact> {
        self.native().next_fact(after.map(|f| f.0)).map(Fact)
    }

    pub fn next_fact_in_template(&self, template: FactTemplate, after: Option<Fact>) -> Option<Fact> {
        self.native()
            .next_fact_in_template(template.0, after.map(|f| f.0))
            .map(Fact)
    }

    /// Iterate over every fact in assertion order.
    pub fn facts(&self) -> impl Iterator<Item = Fact> + '_ {
        std::iter::successors(self.next_fact(None), move |f| self.next_fact(Some(*f)))
    }

    /// Iterate over the facts of one template in assertion order.
    pub fn facts_in_template(&self, template: FactTemplate) -> impl Iterator<Item = Fact> + '_ {
        std::iter::successors(self.next_fact_in_template(template, None), move |f| {
            self.next_fact_in_template(template, Some(*f))
        })
    }

    /// Multi-line rendering of a fact with one slot per line
    pub fn pretty_print_fact(&self, fact: Fact) -> Option<String> {
        self.native().fact_pp_form(fact.0, false)
    }

    pub fn fact_list_changed(&self) -> bool {
        self.native().fact_list_changed()
    }

    pub fn set_fact_list_changed(&mut self, changed: bool) {
        self.native_mut().set_fact_list_changed(changed);
    }

    pub fn duplicate_facts_allowed(&self) -> bool {
        self.native().fact_duplication()
    }

    /// Returns the previous setting.
    pub fn set_duplicate_facts_allowed(&mut self, allowed: bool) -> bool {
        self.native_mut().set_fact_duplication(allowed)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Assert the facts in a file written by [`Session::save_facts`].
    ///
    /// # Returns
    ///
    /// The number of facts asserted.
    pub fn load_facts(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        Ok(self
            .native_mut()
            .load_facts(path.as_ref())
            .map_err(LoadError::from_code)?)
    }

    pub fn load_facts_from_str(&mut self, source: &str) -> Result<usize> {
        Ok(self
            .native_mut()
            .load_facts_from_string(source)
            .map_err(LoadError::from_code)?)
    }

    /// Save facts as text, one per line.
    ///
    /// # Returns
    ///
    /// The number of facts saved.
    pub fn save_facts(&mut self, path: impl AsRef<Path>, scope: SaveScope) -> Result<usize> {
        Ok(self
            .native_mut()
            .save_facts(path.as_ref(), scope)
            .map_err(LoadError::from_code)?)
    }

    pub fn load_binary_facts(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        Ok(self
            .native_mut()
            .binary_load_facts(path.as_ref())
            .map_err(LoadError::from_code)?)
    }

    pub fn save_binary_facts(&mut self, path: impl AsRef<Path>, scope: SaveScope) -> Result<usize> {
        Ok(self
            .native_mut()
            .binary_save_facts(path.as_ref(), scope)
            .map_err(LoadError::from_code)?)
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Template name and slot values of a fact
    pub fn fact_snapshot(&mut self, fact: Fact) -> Option<FactAndSlots> {
        let template = self.template_of(fact)?;
        let template_name = self.template_name(template)?;
        let mut slots = BTreeMap::new();
        for slot in self.template_slot_names(template) {
            if let Ok(value) = self.fact_slot(fact, &slot) {
                slots.insert(slot, value);
            }
        }
        Some(FactAndSlots {
            template_name,
            slots,
        })
    }

    /// Snapshot of every fact in working memory
    pub fn all_facts(&mut self) -> Vec<FactAndSlots> {
        let facts: Vec<Fact> = self.facts().collect();
        facts
            .into_iter()
            .filter_map(|fact| self.fact_snapshot(fact))
            .collect()
    }
}

/// Texts of the symbols in a multifield
pub(crate) fn symbol_list(value: Value) -> Vec<String> {
    match value {
        Value::Multifield(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::Symbol(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IMPLIED_SLOT_NAME;
    use crate::error::BridgeError;
    use pretty_assertions::assert_eq;

    fn session_with_foo() -> Session {
        let mut session = Session::new();
        session
            .build("(deftemplate foo (slot a) (slot b))")
            .unwrap();
        session
    }

    mod slots {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_named_slots() {
            let mut session = session_with_foo();
            let fact = session.assert_string("(foo (a 23) (b apple))").unwrap();
            assert_eq!(session.fact_slot(fact, "a").unwrap(), Value::Integer(23));
            assert_eq!(session.fact_slot(fact, "b").unwrap(), Value::symbol("apple"));

            let err = session.fact_slot(fact, "baz").unwrap_err();
            assert!(matches!(err, BridgeError::GetSlot(GetSlotError::SlotNotFound)));
        }

        #[test]
        fn test_implied_slot() {
            let mut session = Session::new();
            let fact = session.assert_string("(foo bar 23 \"hello\")").unwrap();
            let slot = session.fact_slot(fact, IMPLIED_SLOT_NAME).unwrap();
            assert_eq!(
                slot,
                Value::multifield(vec![
                    Value::symbol("bar"),
                    Value::Integer(23),
                    Value::string("hello"),
                ])
            );
        }

        #[test]
        fn test_slot_names() {
            let mut session = Session::new();
            session
                .build("(deftemplate foo (slot bar) (slot bat))")
                .unwrap();
            let foo = session.find_template("foo").unwrap();
            assert_eq!(session.template_slot_names(foo), vec!["bar", "bat"]);

            let fact = session.assert_string("(hello world again)").unwrap();
            let implied = session.template_of(fact).unwrap();
            assert_eq!(session.template_slot_names(implied), vec![IMPLIED_SLOT_NAME]);
        }
    }

    mod templates {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_template_name() {
            let mut session = Session::new();
            session.build("(deftemplate foo (slot a))").unwrap();
            let fact = session.assert_string("(foo (a 1))").unwrap();
            let template = session.template_of(fact);
            assert_eq!(template, session.find_template("foo"));
            assert_eq!(session.fact_name(fact).as_deref(), Some("foo"));

            let ordered = session.assert_string("(hello world again)").unwrap();
            assert_eq!(session.fact_name(ordered).as_deref(), Some("hello"));
        }

        #[test]
        fn test_find_missing_template() {
            let session = session_with_foo();
            assert!(session.find_template("foo").is_some());
            assert!(session.find_template("bar").is_none());
        }

        #[test]
        fn test_template_module() {
            let session = session_with_foo();
            let foo = session.find_template("foo").unwrap();
            assert_eq!(session.template_module(foo).as_deref(), Some("MAIN"));
        }
    }

    mod listing {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_next_fact_order() {
            let mut session = Session::new();
            session.build("(deftemplate foo (slot a))").unwrap();
            session.build("(deftemplate bar (slot a))").unwrap();
            let foo1 = session.assert_string("(foo (a 1))").unwrap();
            let bar1 = session.assert_string("(bar (a 1))").unwrap();
            let foo2 = session.assert_string("(foo (a 2))").unwrap();
            let bar2 = session.assert_string("(bar (a 2))").unwrap();

            let all: Vec<Fact> = session.facts().collect();
            assert_eq!(all, vec![foo1, bar1, foo2, bar2]);

            let foo = session.find_template("foo").unwrap();
            let bar = session.find_template("bar").unwrap();
            assert_eq!(session.facts_in_template(foo).collect::<Vec<_>>(), vec![foo1, foo2]);
            assert_eq!(session.facts_in_template(bar).collect::<Vec<_>>(), vec![bar1, bar2]);
            assert_eq!(session.next_fact_in_template(bar, Some(bar2)), None);
        }

        #[test]
        fn test_pretty_print() {
            let mut session = session_with_foo();
            let fact = session.assert_string("(foo (a 23) (b apple))").unwrap();
            assert_eq!(
                session.pretty_print_fact(fact).as_deref(),
                Some("(foo \n   (a 23) \n   (b apple))")
            );
        }
    }

    mod lifecycle {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_retract_retained_fact() {
            let mut session = session_with_foo();
            let fact = session.assert_string("(foo (a 23) (b apple))").unwrap();
            session.retain_fact(fact);
            assert!(session.fact_exists(fact));

            session.retract(fact).unwrap();
            assert!(!session.fact_exists(fact));

            session.gc();
            assert_eq!(session.fact_slot(fact, "a").unwrap(), Value::Integer(23));
            session.release_fact(fact);
        }

        #[test]
        fn test_retract_twice_fails() {
            let mut session = session_with_foo();
            let fact = session.assert_string("(foo (a 1))").unwrap();
            session.retract(fact).unwrap();
            assert!(session.retract(fact).is_err());
        }

        #[test]
        fn test_duplicates() {
            let mut session = session_with_foo();
            let a = session.assert_string("(foo (a 1))").unwrap();
            let b = session.assert_string("(foo (a 1))").unwrap();
            assert_eq!(a, b, "Duplicate assert returns the existing fact");

            assert!(!session.set_duplicate_facts_allowed(true));
            let c = session.assert_string("(foo (a 1))").unwrap();
            assert_ne!(a, c);
            assert_eq!(session.facts().count(), 2);
        }

        #[test]
        fn test_fact_list_changed_flag() {
            let mut session = session_with_foo();
            session.set_fact_list_changed(false);
            session.assert_string("(foo (a 1))").unwrap();
            assert!(session.fact_list_changed());
        }

        #[test]
        fn test_all_facts_snapshot() {
            let mut session = session_with_foo();
            session.assert_string("(foo (a 1) (b two))").unwrap();
            let all = session.all_facts();
            assert_eq!(all.len(), 1);
            assert_eq!(all[0].template_name, "foo");
            assert_eq!(all[0].slots.get("a"), Some(&Value::Integer(1)));
            assert_eq!(all[0].slots.get("b"), Some(&Value::symbol("two")));
        }
    }
}
