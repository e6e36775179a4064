//! Defmodules

use crate::error::{BridgeError, Result};
use crate::native::ModuleId;
use crate::session::Session;

/// A defmodule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Module(pub(crate) ModuleId);

impl Module {
    pub fn id(&self) -> ModuleId {
        self.0
    }
}

impl Session {
    pub fn current_module(&self) -> Module {
        Module(self.native().current_module())
    }

    /// Make a module current, returning the previously current one.
    pub fn set_current_module(&mut self, module: Module) -> Module {
        Module(self.native_mut().set_current_module(module.0))
    }

    /// Make the named module current.
    pub fn focus_module(&mut self, name: &str) -> Result<Module> {
        let module = self
            .find_module(name)
            .ok_or_else(|| BridgeError::ModuleNotFound(name.to_string()))?;
        Ok(self.set_current_module(module))
    }

    pub fn find_module(&self, name: &str) -> Option<Module> {
        self.native().find_module(name).map(Module)
    }

    pub fn module_name(&self, module: Module) -> Option<String> {
        self.native().module_name(module.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_starts_in_main() {
        let session = Session::new();
        let main = session.current_module();
        assert_eq!(session.module_name(main).as_deref(), Some("MAIN"));
    }

    #[test]
    fn test_exported_template_visible_in_importer() {
        let mut session = Session::new();
        session.build("(defmodule Apple (export ?ALL))").unwrap();
        session.build("(deftemplate Apple::foo (slot a))").unwrap();
        session.build("(defmodule Banana (export ?ALL))").unwrap();
        session
            .build("(defmodule Cherry (import Apple ?ALL) (import Banana ?ALL))")
            .unwrap();

        let current = session.current_module();
        assert_eq!(session.module_name(current).as_deref(), Some("Cherry"));

        let foo = session.find_template("foo").unwrap();
        assert_eq!(session.template_module(foo).as_deref(), Some("Apple"));
    }

    #[test]
    fn test_focus_module() {
        let mut session = Session::new();
        session.build("(defmodule Apple)").unwrap();
        let previous = session.focus_module("MAIN").unwrap();
        assert_eq!(session.module_name(previous).as_deref(), Some("Apple"));

        let err = session.focus_module("Nope").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TargetNotFound);
    }
}
