//! Native call interface
//!
//! The rule engine is an external collaborator. Everything the bridge needs
//! from it is expressed by the [`NativeEngine`] trait: a C-style surface
//! where objects are referred to by small integer handles into the engine's
//! own arenas, and fallible calls report a numeric [`ErrorCode`] from the
//! families in [`codes`].
//!
//! Handles stay meaningful only while the engine keeps the object. Facts and
//! instances can be retained to outlive retraction or deletion; external
//! addresses carry their own retain count. Anything with a zero count may be
//! discarded at the next collection checkpoint.

pub mod codes;

use crate::watch::Watch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::rc::Rc;

/// Numeric error code returned by a native call
pub type ErrorCode = i32;

/// Result of a fallible native call
pub type NativeResult<T> = std::result::Result<T, ErrorCode>;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

handle!(
    /// Interned symbol, string or instance name
    LexemeId(u32)
);
handle!(
    /// Fact in working memory
    FactId(u64)
);
handle!(
    /// Instance of a user class
    InstanceId(u64)
);
handle!(
    /// External address wrapping a host payload key
    ExternalId(u64)
);
handle!(
    /// Deftemplate
    TemplateId(u32)
);
handle!(
    /// Defclass
    ClassId(u32)
);
handle!(
    /// Defmodule
    ModuleId(u32)
);

/// The three lexeme flavors sharing the engine's symbol table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LexemeKind {
    Symbol,
    String,
    InstanceName,
}

/// Borrowed view of an interned lexeme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LexemeRef<'a> {
    pub kind: LexemeKind,
    pub text: &'a str,
}

/// A value as the engine stores it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForeignValue {
    Float(f64),
    Integer(i64),
    Lexeme(LexemeId),
    Fact(FactId),
    Instance(InstanceId),
    External(ExternalId),
    Multifield(Vec<ForeignValue>),
    /// The engine's void constant
    Void,
    /// A value type the bridge does not model, tagged with its native type code
    Unsupported(u16),
}

/// Which constructs a save operation covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SaveScope {
    /// Only items whose construct is defined in the current module
    #[default]
    LocalToCurrentModule,
    /// Every item whose construct is visible from the current module
    VisibleToCurrentModule,
}

/// Callbacks the engine invokes on a registered I/O router
pub trait NativeRouter {
    /// Whether this router accepts the logical name
    fn query(&self, logical_name: &str) -> bool;

    /// Receive a chunk of output
    fn write(&self, logical_name: &str, chunk: &str);

    /// Read one character, or [`codes::EOF`]
    fn read(&self, logical_name: &str) -> i32;

    /// Push a character back, returning it or [`codes::EOF`]
    fn unread(&self, logical_name: &str, ch: i32) -> i32;

    /// The engine is exiting with the given code
    fn exit(&self, code: i32);
}

/// Discard callback of an external address type, given the payload key.
pub type DiscardFn = Box<dyn FnMut(u64) -> bool>;

/// An external address type installed with the engine
pub struct ExternalAddressType {
    pub name: String,
    pub discard: DiscardFn,
}

impl fmt::Debug for ExternalAddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalAddressType")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Arguments and result slot of a user-defined function invocation
#[derive(Debug, Clone, PartialEq)]
pub struct UdfFrame {
    pub args: Vec<ForeignValue>,
    pub result: ForeignValue,
    pub error_thrown: bool,
}

impl UdfFrame {
    pub fn new(args: Vec<ForeignValue>) -> Self {
        Self {
            args,
            result: ForeignValue::Void,
            error_thrown: false,
        }
    }
}

/// Host implementation of a user-defined function
pub type UdfHandler = Rc<dyn Fn(&mut dyn NativeEngine, &mut UdfFrame)>;

/// Everything the engine needs to register a user-defined function
#[derive(Clone)]
pub struct UdfRegistration {
    pub name: String,
    /// Return type codes, e.g. `"ld"`
    pub return_types: String,
    pub min_args: u16,
    /// `None` means unbounded
    pub max_args: Option<u16>,
    /// Argument type string, `default;pos1;pos2...`
    pub arg_types: String,
    pub handler: UdfHandler,
}

impl fmt::Debug for UdfRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdfRegistration")
            .field("name", &self.name)
            .field("return_types", &self.return_types)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("arg_types", &self.arg_types)
            .finish_non_exhaustive()
    }
}

/// The engine's call interface
///
/// Error codes come from [`codes`]; the comment on each fallible method names
/// the family it uses.
pub trait NativeEngine {
    // ========================================================================
    // Lexemes
    // ========================================================================

    fn create_lexeme(&mut self, kind: LexemeKind, text: &str) -> LexemeId;
    fn lexeme(&self, id: LexemeId) -> Option<LexemeRef<'_>>;
    /// The sentinel lexeme for boolean true
    fn true_symbol(&self) -> LexemeId;
    /// The sentinel lexeme for boolean false
    fn false_symbol(&self) -> LexemeId;

    // ========================================================================
    // Environment lifecycle
    // ========================================================================

    fn reset(&mut self);
    fn clear(&mut self) -> bool;
    /// Collection checkpoint: discard everything with a zero count
    fn collect_garbage(&mut self);
    fn print_banner(&mut self);

    // ========================================================================
    // Routers
    // ========================================================================

    fn add_router(&mut self, name: &str, priority: i32, router: Rc<dyn NativeRouter>) -> bool;
    /// Send text to a logical name through the router chain
    fn write_string(&mut self, logical_name: &str, text: &str);

    // ========================================================================
    // External addresses
    // ========================================================================

    /// Returns the type code assigned to the new type
    fn install_external_address_type(&mut self, ty: ExternalAddressType) -> i32;
    fn create_external_address(&mut self, payload: u64, type_code: i32) -> ExternalId;
    /// `(type code, payload)` of a live external address
    fn external_address(&self, id: ExternalId) -> Option<(i32, u64)>;
    fn retain_external(&mut self, id: ExternalId);
    fn release_external(&mut self, id: ExternalId);
    /// Retain every handle reachable from a value
    fn retain_value(&mut self, value: &ForeignValue);
    /// Release every handle reachable from a value
    fn release_value(&mut self, value: &ForeignValue);

    // ========================================================================
    // Loading (LE codes)
    // ========================================================================

    fn load(&mut self, path: &Path) -> NativeResult<()>;
    fn load_from_string(&mut self, source: &str) -> NativeResult<()>;
    fn bload(&mut self, path: &Path) -> NativeResult<()>;
    fn bsave(&mut self, path: &Path) -> NativeResult<()>;
    fn batch_star(&mut self, path: &Path) -> NativeResult<()>;

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// EE codes
    fn eval(&mut self, expression: &str) -> NativeResult<ForeignValue>;
    /// BE codes
    fn build(&mut self, construct: &str) -> NativeResult<()>;
    /// Fire up to `limit` rules (negative means no limit); returns the count fired
    fn run(&mut self, limit: i64) -> i64;
    fn function_exists(&self, name: &str) -> bool;
    /// FCBE codes
    fn call_function(&mut self, name: &str, args: &[ForeignValue]) -> NativeResult<ForeignValue>;
    /// AUE codes
    fn add_udf(&mut self, registration: UdfRegistration) -> NativeResult<()>;
    /// Value later readable with `(get-error)`
    fn set_error_value(&mut self, value: ForeignValue);

    // ========================================================================
    // Watch
    // ========================================================================

    fn set_watch_state(&mut self, item: Watch, on: bool);
    fn watch_state(&self, item: Watch) -> bool;

    // ========================================================================
    // Modules
    // ========================================================================

    fn current_module(&self) -> ModuleId;
    /// Returns the previously current module
    fn set_current_module(&mut self, module: ModuleId) -> ModuleId;
    fn find_module(&self, name: &str) -> Option<ModuleId>;
    fn module_name(&self, module: ModuleId) -> Option<String>;

    // ========================================================================
    // Templates and facts
    // ========================================================================

    fn find_template(&self, name: &str) -> Option<TemplateId>;
    fn template_name(&self, template: TemplateId) -> Option<String>;
    fn template_module(&self, template: TemplateId) -> Option<String>;
    /// Multifield of slot name symbols
    fn template_slot_names(&mut self, template: TemplateId) -> Option<ForeignValue>;
    fn template_is_implied(&self, template: TemplateId) -> bool;
    /// ASE codes
    fn assert_string(&mut self, text: &str) -> NativeResult<FactId>;
    /// PSE codes; validates a value against a template slot
    fn check_template_slot(
        &self,
        template: TemplateId,
        slot: &str,
        value: &ForeignValue,
    ) -> NativeResult<()>;
    /// FBE codes; asserts atomically, unnamed slots take their defaults
    fn assert_template_fact(
        &mut self,
        template: TemplateId,
        slots: &[(String, ForeignValue)],
    ) -> NativeResult<FactId>;
    /// RE codes
    fn retract(&mut self, fact: FactId) -> NativeResult<()>;
    /// RE codes
    fn retract_all_facts(&mut self) -> NativeResult<()>;
    fn fact_exists(&self, fact: FactId) -> bool;
    fn retain_fact(&mut self, fact: FactId);
    fn release_fact(&mut self, fact: FactId);
    fn fact_template(&self, fact: FactId) -> Option<TemplateId>;
    /// The `f-N` index shown in listings
    fn fact_index(&self, fact: FactId) -> Option<u64>;
    /// GSE codes
    fn fact_slot(&self, fact: FactId, slot: &str) -> NativeResult<ForeignValue>;
    fn next_fact(&self, after: Option<FactId>) -> Option<FactId>;
    fn next_fact_in_template(&self, template: TemplateId, after: Option<FactId>)
        -> Option<FactId>;
    fn fact_pp_form(&self, fact: FactId, ignore_defaults: bool) -> Option<String>;
    fn fact_list_changed(&self) -> bool;
    fn set_fact_list_changed(&mut self, changed: bool);
    fn fact_duplication(&self) -> bool;
    /// Returns the previous setting
    fn set_fact_duplication(&mut self, allowed: bool) -> bool;
    /// LE codes for the fact file family; counts are facts processed
    fn load_facts(&mut self, path: &Path) -> NativeResult<usize>;
    fn load_facts_from_string(&mut self, source: &str) -> NativeResult<usize>;
    fn save_facts(&mut self, path: &Path, scope: SaveScope) -> NativeResult<usize>;
    fn binary_load_facts(&mut self, path: &Path) -> NativeResult<usize>;
    fn binary_save_facts(&mut self, path: &Path, scope: SaveScope) -> NativeResult<usize>;

    // ========================================================================
    // Classes and instances
    // ========================================================================

    fn find_class(&self, name: &str) -> Option<ClassId>;
    fn class_name(&self, class: ClassId) -> Option<String>;
    fn class_module(&self, class: ClassId) -> Option<String>;
    /// Multifield of slot name symbols
    fn class_slots(&mut self, class: ClassId, inherit: bool) -> Option<ForeignValue>;
    /// MIE codes
    fn make_instance(&mut self, text: &str) -> NativeResult<InstanceId>;
    /// PSE codes; validates a value against a class slot
    fn check_class_slot(&self, class: ClassId, slot: &str, value: &ForeignValue)
        -> NativeResult<()>;
    /// IBE codes; creates atomically, a generated name is used when `name` is `None`
    fn create_instance(
        &mut self,
        class: ClassId,
        name: Option<&str>,
        slots: &[(String, ForeignValue)],
    ) -> NativeResult<InstanceId>;
    /// UIE codes; goes through message dispatch
    fn unmake_instance(&mut self, instance: InstanceId) -> NativeResult<()>;
    /// UIE codes; bypasses message dispatch
    fn delete_instance(&mut self, instance: InstanceId) -> NativeResult<()>;
    fn instance_valid(&self, instance: InstanceId) -> bool;
    fn retain_instance(&mut self, instance: InstanceId);
    fn release_instance(&mut self, instance: InstanceId);
    fn instance_name(&self, instance: InstanceId) -> Option<String>;
    fn instance_class(&self, instance: InstanceId) -> Option<ClassId>;
    fn find_instance(
        &self,
        name: &str,
        module: Option<ModuleId>,
        search_imports: bool,
    ) -> Option<InstanceId>;
    fn next_instance(&self, after: Option<InstanceId>) -> Option<InstanceId>;
    fn next_instance_in_class(&self, class: ClassId, after: Option<InstanceId>)
        -> Option<InstanceId>;
    fn instance_pp_form(&self, instance: InstanceId) -> Option<String>;
    /// GSE codes
    fn direct_get_slot(&self, instance: InstanceId, slot: &str) -> NativeResult<ForeignValue>;
    /// PSE codes
    fn direct_put_slot(
        &mut self,
        instance: InstanceId,
        slot: &str,
        value: ForeignValue,
    ) -> NativeResult<()>;
    fn instances_changed(&self) -> bool;
    fn set_instances_changed(&mut self, changed: bool);
    /// LE codes for the instance file family; counts are instances processed
    fn load_instances(&mut self, path: &Path) -> NativeResult<usize>;
    fn load_instances_from_string(&mut self, source: &str) -> NativeResult<usize>;
    fn save_instances(&mut self, path: &Path, scope: SaveScope) -> NativeResult<usize>;
    fn binary_load_instances(&mut self, path: &Path) -> NativeResult<usize>;
    fn binary_save_instances(&mut self, path: &Path, scope: SaveScope) -> NativeResult<usize>;
    /// Like loading, but without sending creation messages
    fn restore_instances(&mut self, path: &Path) -> NativeResult<usize>;
    fn restore_instances_from_string(&mut self, source: &str) -> NativeResult<usize>;
}
