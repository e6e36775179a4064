//! In-process reference engine
//!
//! [`MemoryEngine`] implements [`NativeEngine`] entirely in Rust. It covers
//! the part of the rule language the bridge exercises: the symbol table,
//! deftemplates and ordered facts, defclasses and instances, defmodules with
//! import/export visibility, deffunctions, defglobals, deffacts and
//! definstances, user-defined functions, routers, watch items and the text
//! and binary save formats. It has no rule network, so `run` never fires
//! anything.
//!
//! Retracted facts, deleted instances and unretained external addresses
//! stay addressable until the next collection checkpoint, which happens at
//! the start of every top-level `eval`, `build`, `load`, `run` and
//! `call_function`, and whenever the host asks for one.
//!
//! # Example
//!
//! ```
//! use clipsrules::native::NativeEngine;
//! use clipsrules::MemoryEngine;
//!
//! let mut engine = MemoryEngine::new();
//! engine.build("(deftemplate point (slot x) (slot y))").unwrap();
//! let fact = engine.assert_string("(point (x 1) (y 2))").unwrap();
//! assert_eq!(engine.fact_pp_form(fact, false).as_deref(), Some("(point \n   (x 1) \n   (y 2))"));
//! ```

mod define;
mod eval;
mod persist;
pub mod reader;
mod store;

use crate::config::{MAIN_MODULE, STDOUT};
use crate::native::codes::*;
use crate::native::{
    ClassId, ErrorCode, ExternalAddressType, ExternalId, FactId, ForeignValue, InstanceId, LexemeId, LexemeKind,
    LexemeRef, ModuleId, NativeEngine, NativeResult, NativeRouter, SaveScope, TemplateId, UdfRegistration,
};
use crate::watch::Watch;
use eval::{Frame, InstanceSpec};
use reader::{read_one, Sexp};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use store::{
    Class, Deffacts, Deffunction, Definstances, Defglobal, ExternalRecord, FactRecord, Fault, InstanceRecord,
    Lexemes, ModuleDef, SlotDefault, Template, Udf,
};

/// Type codes accepted in user-defined function signatures
const VALID_TYPE_CODES: &str = "bdefilmnsyv*";

const OBJECT_CLASS: ClassId = ClassId(0);
const USER_CLASS: ClassId = ClassId(1);
const MAIN: ModuleId = ModuleId(0);

struct RouterEntry {
    name: String,
    priority: i32,
    router: Rc<dyn NativeRouter>,
}

/// Source of a successfully built construct, replayed by `bload`
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ConstructRecord {
    module: String,
    source: String,
}

/// Rule engine living entirely in process memory
pub struct MemoryEngine {
    lexemes: Lexemes,
    modules: BTreeMap<ModuleId, ModuleDef>,
    current_module: ModuleId,
    next_module: u32,
    templates: BTreeMap<TemplateId, Template>,
    next_template: u32,
    classes: BTreeMap<ClassId, Class>,
    next_class: u32,
    deffunctions: HashMap<String, Rc<Deffunction>>,
    udfs: HashMap<String, Udf>,
    deffacts: Vec<Deffacts>,
    definstances: Vec<Definstances>,
    globals: BTreeMap<String, Defglobal>,
    global_values: HashMap<String, ForeignValue>,
    facts: BTreeMap<FactId, FactRecord>,
    next_fact: u64,
    next_fact_index: u64,
    instances: BTreeMap<InstanceId, InstanceRecord>,
    next_instance: u64,
    next_gensym: u64,
    externals: BTreeMap<ExternalId, ExternalRecord>,
    next_external: u64,
    external_types: Vec<ExternalAddressType>,
    routers: Vec<RouterEntry>,
    watching: BTreeSet<Watch>,
    error_value: ForeignValue,
    construct_log: Vec<ConstructRecord>,
    fact_duplication: bool,
    fact_list_changed: bool,
    instances_changed: bool,
    depth: usize,
}

impl fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("current_module", &self.current_module)
            .field("templates", &self.templates.len())
            .field("classes", &self.classes.len())
            .field("facts", &self.facts.len())
            .field("instances", &self.instances.len())
            .field("externals", &self.externals.len())
            .field("routers", &self.routers.iter().map(|r| r.name.as_str()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        let lexemes = Lexemes::new();
        let error_value = ForeignValue::Lexeme(lexemes.false_symbol);
        let mut engine = Self {
            lexemes,
            modules: BTreeMap::new(),
            current_module: MAIN,
            next_module: 1,
            templates: BTreeMap::new(),
            next_template: 0,
            classes: BTreeMap::new(),
            next_class: 2,
            deffunctions: HashMap::new(),
            udfs: HashMap::new(),
            deffacts: Vec::new(),
            definstances: Vec::new(),
            globals: BTreeMap::new(),
            global_values: HashMap::new(),
            facts: BTreeMap::new(),
            next_fact: 1,
            next_fact_index: 1,
            instances: BTreeMap::new(),
            next_instance: 1,
            next_gensym: 0,
            externals: BTreeMap::new(),
            next_external: 1,
            external_types: Vec::new(),
            routers: Vec::new(),
            watching: BTreeSet::new(),
            error_value,
            construct_log: Vec::new(),
            fact_duplication: false,
            fact_list_changed: false,
            instances_changed: false,
            depth: 0,
        };
        engine.install_system_constructs();
        engine
    }

    fn install_system_constructs(&mut self) {
        self.modules.insert(MAIN, ModuleDef::new(MAIN_MODULE));
        self.classes.insert(
            OBJECT_CLASS,
            Class {
                name: "OBJECT".into(),
                module: MAIN,
                parents: Vec::new(),
                is_abstract: true,
                system: true,
                slots: Vec::new(),
            },
        );
        self.classes.insert(
            USER_CLASS,
            Class {
                name: "USER".into(),
                module: MAIN,
                parents: vec![OBJECT_CLASS],
                is_abstract: true,
                system: true,
                slots: Vec::new(),
            },
        );
    }

    /// Collection checkpoint, skipped while host code runs inside the engine
    fn checkpoint(&mut self) {
        if self.depth == 0 {
            self.collect();
        }
    }

    fn toggle_watch(&mut self, item: Watch, on: bool) {
        if on {
            self.watching.insert(item);
        } else {
            self.watching.remove(&item);
        }
    }

    fn replace_error_value(&mut self, value: ForeignValue) {
        self.retain_reachable(&value);
        let old = std::mem::replace(&mut self.error_value, value);
        self.release_reachable(&old);
    }

    fn assign_global(&mut self, name: &str, value: ForeignValue) {
        self.retain_reachable(&value);
        if self.watching.contains(&Watch::Globals) {
            let text = self.value_text(&value);
            self.emit(STDOUT, &format!(":== ?{name} ==> {text}\n"));
        }
        if let Some(old) = self.global_values.insert(name.to_string(), value) {
            self.release_reachable(&old);
        }
    }

    /// Retract every fact, delete every instance, then restore defglobals,
    /// deffacts and definstances.
    fn reset_working_memory(&mut self) {
        let live_facts: Vec<FactId> = self
            .facts
            .iter()
            .filter(|(_, f)| !f.retracted)
            .map(|(id, _)| *id)
            .collect();
        for id in live_facts {
            let _ = self.retract_fact(id);
        }
        let live_instances: Vec<InstanceId> = self
            .instances
            .iter()
            .filter(|(_, i)| !i.deleted)
            .map(|(id, _)| *id)
            .collect();
        for id in live_instances {
            let _ = self.remove_instance(id, true);
        }
        self.next_fact_index = 1;
        self.current_module = MAIN;

        let globals: Vec<(String, Rc<[eval::Expr]>)> = self
            .globals
            .iter()
            .map(|(name, g)| (name.clone(), g.init.clone()))
            .collect();
        for (name, init) in globals {
            match self.eval_slot_exprs(&init, &mut Frame::default()) {
                Ok(value) => self.assign_global(&name, value),
                Err(fault) => self.report(&fault),
            }
        }

        let facts: Vec<eval::FactSpec> = self.deffacts.iter().flat_map(|d| d.facts.iter().cloned()).collect();
        for spec in facts {
            if let Err(fault) = self.assert_spec(&spec, &mut Frame::default()) {
                self.report(&fault);
            }
        }

        let instances: Vec<InstanceSpec> = self
            .definstances
            .iter()
            .flat_map(|d| d.instances.iter().cloned())
            .collect();
        for spec in instances {
            if let Err(fault) = self.make_from_spec(&spec, &mut Frame::default(), true) {
                self.report(&fault);
            }
        }
        tracing::debug!(facts = self.facts.len(), instances = self.instances.len(), "Reset");
    }

    fn slot_names(&mut self, names: Vec<String>) -> ForeignValue {
        ForeignValue::Multifield(names.iter().map(|n| self.symbol(n)).collect())
    }

    fn is_live_fact(&self, id: FactId) -> bool {
        self.facts.get(&id).is_some_and(|f| !f.retracted)
    }

    fn is_live_instance(&self, id: InstanceId) -> bool {
        self.instances.get(&id).is_some_and(|i| !i.deleted)
    }

    /// Whether a fact value equals what its slot would get by default
    fn is_default_value(&self, slot: &store::SlotDef, value: &ForeignValue) -> bool {
        match &slot.default {
            SlotDefault::Derive => self.derived_default(slot) == *value,
            SlotDefault::Static(default) => default == value,
            SlotDefault::Required | SlotDefault::Dynamic(_) => false,
        }
    }
}

fn fault_code(fault: &Fault, parse: ErrorCode, processing: ErrorCode) -> ErrorCode {
    match fault {
        Fault::Parse(_) => parse,
        Fault::Processing(_) => processing,
    }
}

impl NativeEngine for MemoryEngine {
    // ========================================================================
    // Lexemes
    // ========================================================================

    fn create_lexeme(&mut self, kind: LexemeKind, text: &str) -> LexemeId {
        self.lexemes.intern(kind, text)
    }

    fn lexeme(&self, id: LexemeId) -> Option<LexemeRef<'_>> {
        self.lexemes.get(id)
    }

    fn true_symbol(&self) -> LexemeId {
        self.lexemes.true_symbol
    }

    fn false_symbol(&self) -> LexemeId {
        self.lexemes.false_symbol
    }

    // ========================================================================
    // Environment lifecycle
    // ========================================================================

    fn reset(&mut self) {
        self.checkpoint();
        self.reset_working_memory();
    }

    fn clear(&mut self) -> bool {
        if self.depth > 0 {
            return false;
        }
        let live_facts: Vec<FactId> = self.facts.keys().copied().collect();
        for id in live_facts {
            let _ = self.retract_fact(id);
        }
        let live_instances: Vec<InstanceId> = self.instances.keys().copied().collect();
        for id in live_instances {
            let _ = self.remove_instance(id, true);
        }
        let globals: Vec<ForeignValue> = self.global_values.drain().map(|(_, v)| v).collect();
        for value in &globals {
            self.release_reachable(value);
        }
        let error_value = self.boolean(false);
        self.replace_error_value(error_value);

        self.templates.clear();
        self.classes.retain(|_, c| c.system);
        self.deffunctions.clear();
        self.deffacts.clear();
        self.definstances.clear();
        self.globals.clear();
        self.construct_log.clear();
        self.modules.retain(|id, _| *id == MAIN);
        self.modules.insert(MAIN, ModuleDef::new(MAIN_MODULE));
        self.current_module = MAIN;
        self.next_fact_index = 1;
        self.collect();
        tracing::debug!("Environment cleared");
        true
    }

    fn collect_garbage(&mut self) {
        self.checkpoint();
    }

    fn print_banner(&mut self) {
        let banner = format!("         clipsrules in-process engine ({})\n", crate::VERSION);
        self.emit(STDOUT, &banner);
    }

    // ========================================================================
    // Routers
    // ========================================================================

    fn add_router(&mut self, name: &str, priority: i32, router: Rc<dyn NativeRouter>) -> bool {
        if self.routers.iter().any(|r| r.name == name) {
            return false;
        }
        self.routers.push(RouterEntry {
            name: name.to_string(),
            priority,
            router,
        });
        self.routers.sort_by(|a, b| b.priority.cmp(&a.priority));
        true
    }

    fn write_string(&mut self, logical_name: &str, text: &str) {
        self.emit(logical_name, text);
    }

    // ========================================================================
    // External addresses
    // ========================================================================

    fn install_external_address_type(&mut self, ty: ExternalAddressType) -> i32 {
        tracing::debug!(name = %ty.name, "Installed external address type");
        self.external_types.push(ty);
        (self.external_types.len() - 1) as i32
    }

    fn create_external_address(&mut self, payload: u64, type_code: i32) -> ExternalId {
        let id = ExternalId(self.next_external);
        self.next_external += 1;
        self.externals.insert(
            id,
            ExternalRecord {
                type_code,
                payload,
                count: 0,
            },
        );
        id
    }

    fn external_address(&self, id: ExternalId) -> Option<(i32, u64)> {
        self.externals.get(&id).map(|e| (e.type_code, e.payload))
    }

    fn retain_external(&mut self, id: ExternalId) {
        self.retain_reachable(&ForeignValue::External(id));
    }

    fn release_external(&mut self, id: ExternalId) {
        self.release_reachable(&ForeignValue::External(id));
    }

    fn retain_value(&mut self, value: &ForeignValue) {
        self.retain_reachable(value);
    }

    fn release_value(&mut self, value: &ForeignValue) {
        self.release_reachable(value);
    }

    // ========================================================================
    // Loading
    // ========================================================================

    fn load(&mut self, path: &Path) -> NativeResult<()> {
        self.checkpoint();
        let source = persist::read_source(path)?;
        self.load_source(&source)
    }

    fn load_from_string(&mut self, source: &str) -> NativeResult<()> {
        self.checkpoint();
        self.load_source(source)
    }

    fn bload(&mut self, path: &Path) -> NativeResult<()> {
        self.checkpoint();
        self.bload_image(path)
    }

    fn bsave(&mut self, path: &Path) -> NativeResult<()> {
        self.bsave_image(path)
    }

    fn batch_star(&mut self, path: &Path) -> NativeResult<()> {
        self.checkpoint();
        let source = persist::read_source(path)?;
        self.batch_source(&source)
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    fn eval(&mut self, expression: &str) -> NativeResult<ForeignValue> {
        self.checkpoint();
        self.eval_text(expression).map_err(|fault| {
            self.report(&fault);
            fault_code(&fault, EE_PARSING_ERROR, EE_PROCESSING_ERROR)
        })
    }

    fn build(&mut self, construct: &str) -> NativeResult<()> {
        self.checkpoint();
        self.build_text(construct)
    }

    fn run(&mut self, limit: i64) -> i64 {
        self.checkpoint();
        tracing::trace!(limit, "Run requested; no rules to fire");
        0
    }

    fn function_exists(&self, name: &str) -> bool {
        self.function_known(name)
    }

    fn call_function(&mut self, name: &str, args: &[ForeignValue]) -> NativeResult<ForeignValue> {
        self.checkpoint();
        self.call_named(name, args.to_vec())
    }

    fn add_udf(&mut self, registration: UdfRegistration) -> NativeResult<()> {
        if let Some(max) = registration.max_args {
            if registration.min_args > max {
                return Err(AUE_MIN_EXCEEDS_MAX_ERROR);
            }
        }
        if self.function_known(&registration.name) {
            return Err(AUE_FUNCTION_NAME_IN_USE_ERROR);
        }
        if !registration.return_types.chars().all(|c| VALID_TYPE_CODES.contains(c)) {
            return Err(AUE_INVALID_RETURN_TYPE_ERROR);
        }
        if !registration
            .arg_types
            .chars()
            .all(|c| c == ';' || VALID_TYPE_CODES.contains(c))
        {
            return Err(AUE_INVALID_ARGUMENT_TYPE_ERROR);
        }
        let mut groups = registration.arg_types.split(';').map(|g| g.chars().collect::<Vec<_>>());
        let default_types = groups.next().unwrap_or_default();
        let positional_types = groups.collect();
        tracing::debug!(name = %registration.name, "Registered user-defined function");
        self.udfs.insert(
            registration.name.clone(),
            Udf {
                registration,
                default_types,
                positional_types,
            },
        );
        Ok(())
    }

    fn set_error_value(&mut self, value: ForeignValue) {
        self.replace_error_value(value);
    }

    // ========================================================================
    // Watch
    // ========================================================================

    fn set_watch_state(&mut self, item: Watch, on: bool) {
        self.toggle_watch(item, on);
    }

    fn watch_state(&self, item: Watch) -> bool {
        self.watching.contains(&item)
    }

    // ========================================================================
    // Modules
    // ========================================================================

    fn current_module(&self) -> ModuleId {
        self.current_module
    }

    fn set_current_module(&mut self, module: ModuleId) -> ModuleId {
        let previous = self.current_module;
        if self.modules.contains_key(&module) {
            self.current_module = module;
        }
        previous
    }

    fn find_module(&self, name: &str) -> Option<ModuleId> {
        self.module_id(name)
    }

    fn module_name(&self, module: ModuleId) -> Option<String> {
        self.modules.get(&module).map(|m| m.name.clone())
    }

    // ========================================================================
    // Templates and facts
    // ========================================================================

    fn find_template(&self, name: &str) -> Option<TemplateId> {
        self.resolve_template(name)
    }

    fn template_name(&self, template: TemplateId) -> Option<String> {
        self.templates.get(&template).map(|t| t.name.clone())
    }

    fn template_module(&self, template: TemplateId) -> Option<String> {
        let module = self.templates.get(&template)?.module;
        self.module_name(module)
    }

    fn template_slot_names(&mut self, template: TemplateId) -> Option<ForeignValue> {
        let names = self
            .templates
            .get(&template)?
            .slots
            .iter()
            .map(|s| s.name.clone())
            .collect();
        Some(self.slot_names(names))
    }

    fn template_is_implied(&self, template: TemplateId) -> bool {
        self.templates.get(&template).is_some_and(|t| t.implied)
    }

    fn assert_string(&mut self, text: &str) -> NativeResult<FactId> {
        let result = read_one(text)
            .map_err(Fault::from)
            .and_then(|sexp| self.compile_fact(&sexp))
            .and_then(|spec| self.assert_spec(&spec, &mut Frame::default()));
        result.map_err(|fault| {
            self.report(&fault);
            fault_code(&fault, ASE_PARSING_ERROR, ASE_COULD_NOT_ASSERT_ERROR)
        })
    }

    fn check_template_slot(&self, template: TemplateId, slot: &str, value: &ForeignValue) -> NativeResult<()> {
        let template = self.templates.get(&template).ok_or(PSE_NULL_POINTER_ERROR)?;
        let def = template
            .slots
            .iter()
            .find(|s| s.name == slot)
            .ok_or(PSE_SLOT_NOT_FOUND_ERROR)?;
        self.check_slot(def, value).map(|_| ())
    }

    fn assert_template_fact(&mut self, template: TemplateId, slots: &[(String, ForeignValue)]) -> NativeResult<FactId> {
        let def = self.templates.get(&template).ok_or(FBE_DEFTEMPLATE_NOT_FOUND_ERROR)?;
        if def.implied {
            return Err(FBE_IMPLIED_DEFTEMPLATE_ERROR);
        }
        self.assert_slots(template, slots.to_vec()).map_err(|fault| {
            self.report(&fault);
            FBE_COULD_NOT_ASSERT_ERROR
        })
    }

    fn retract(&mut self, fact: FactId) -> NativeResult<()> {
        self.retract_fact(fact)
    }

    fn retract_all_facts(&mut self) -> NativeResult<()> {
        let live: Vec<FactId> = self
            .facts
            .iter()
            .filter(|(_, f)| !f.retracted)
            .map(|(id, _)| *id)
            .collect();
        for id in live {
            self.retract_fact(id)?;
        }
        Ok(())
    }

    fn fact_exists(&self, fact: FactId) -> bool {
        self.is_live_fact(fact)
    }

    fn retain_fact(&mut self, fact: FactId) {
        self.retain_reachable(&ForeignValue::Fact(fact));
    }

    fn release_fact(&mut self, fact: FactId) {
        self.release_reachable(&ForeignValue::Fact(fact));
    }

    fn fact_template(&self, fact: FactId) -> Option<TemplateId> {
        self.facts.get(&fact).map(|f| f.template)
    }

    fn fact_index(&self, fact: FactId) -> Option<u64> {
        self.facts.get(&fact).map(|f| f.index)
    }

    fn fact_slot(&self, fact: FactId, slot: &str) -> NativeResult<ForeignValue> {
        let record = self.facts.get(&fact).ok_or(GSE_NULL_POINTER_ERROR)?;
        let template = self.templates.get(&record.template).ok_or(GSE_INVALID_TARGET_ERROR)?;
        template
            .slots
            .iter()
            .zip(&record.values)
            .find(|(def, _)| def.name == slot)
            .map(|(_, value)| value.clone())
            .ok_or(GSE_SLOT_NOT_FOUND_ERROR)
    }

    fn next_fact(&self, after: Option<FactId>) -> Option<FactId> {
        let start = after.map_or(0, |f| f.0 + 1);
        self.facts
            .range(FactId(start)..)
            .find(|(_, f)| !f.retracted)
            .map(|(id, _)| *id)
    }

    fn next_fact_in_template(&self, template: TemplateId, after: Option<FactId>) -> Option<FactId> {
        let start = after.map_or(0, |f| f.0 + 1);
        self.facts
            .range(FactId(start)..)
            .find(|(_, f)| !f.retracted && f.template == template)
            .map(|(id, _)| *id)
    }

    fn fact_pp_form(&self, fact: FactId, ignore_defaults: bool) -> Option<String> {
        let record = self.facts.get(&fact)?;
        let template = self.templates.get(&record.template)?;
        if template.implied {
            return self.fact_text(fact);
        }
        let mut text = format!("({}", template.name);
        for (slot, value) in template.slots.iter().zip(&record.values) {
            if ignore_defaults && self.is_default_value(slot, value) {
                continue;
            }
            text.push_str(" \n   ");
            text.push_str(self.slot_text(&slot.name, value).trim_start());
        }
        text.push(')');
        Some(text)
    }

    fn fact_list_changed(&self) -> bool {
        self.fact_list_changed
    }

    fn set_fact_list_changed(&mut self, changed: bool) {
        self.fact_list_changed = changed;
    }

    fn fact_duplication(&self) -> bool {
        self.fact_duplication
    }

    fn set_fact_duplication(&mut self, allowed: bool) -> bool {
        std::mem::replace(&mut self.fact_duplication, allowed)
    }

    fn load_facts(&mut self, path: &Path) -> NativeResult<usize> {
        let source = persist::read_source(path)?;
        self.load_fact_source(&source)
    }

    fn load_facts_from_string(&mut self, source: &str) -> NativeResult<usize> {
        self.load_fact_source(source)
    }

    fn save_facts(&mut self, path: &Path, scope: SaveScope) -> NativeResult<usize> {
        self.save_fact_file(path, scope)
    }

    fn binary_load_facts(&mut self, path: &Path) -> NativeResult<usize> {
        self.bload_facts(path)
    }

    fn binary_save_facts(&mut self, path: &Path, scope: SaveScope) -> NativeResult<usize> {
        self.bsave_facts(path, scope)
    }

    // ========================================================================
    // Classes and instances
    // ========================================================================

    fn find_class(&self, name: &str) -> Option<ClassId> {
        self.resolve_class(name)
    }

    fn class_name(&self, class: ClassId) -> Option<String> {
        self.classes.get(&class).map(|c| c.name.clone())
    }

    fn class_module(&self, class: ClassId) -> Option<String> {
        let module = self.classes.get(&class)?.module;
        self.module_name(module)
    }

    fn class_slots(&mut self, class: ClassId, inherit: bool) -> Option<ForeignValue> {
        let def = self.classes.get(&class)?;
        let names = if inherit {
            self.effective_slots(class).into_iter().map(|s| s.name).collect()
        } else {
            def.slots.iter().map(|s| s.name.clone()).collect()
        };
        Some(self.slot_names(names))
    }

    fn make_instance(&mut self, text: &str) -> NativeResult<InstanceId> {
        let result = read_one(text).map_err(Fault::from).and_then(|sexp| match sexp {
            Sexp::List(items) => self.compile_instance(&items),
            other => Err(Fault::Parse(format!("Expected an instance specification but found {other}"))),
        });
        let result = result.and_then(|spec| self.make_from_spec(&spec, &mut Frame::default(), true));
        result.map_err(|fault| {
            self.report(&fault);
            fault_code(&fault, MIE_PARSING_ERROR, MIE_COULD_NOT_CREATE_ERROR)
        })
    }

    fn check_class_slot(&self, class: ClassId, slot: &str, value: &ForeignValue) -> NativeResult<()> {
        if !self.classes.contains_key(&class) {
            return Err(PSE_NULL_POINTER_ERROR);
        }
        let slots = self.effective_slots(class);
        let def = slots.iter().find(|s| s.name == slot).ok_or(PSE_SLOT_NOT_FOUND_ERROR)?;
        self.check_slot(def, value).map(|_| ())
    }

    fn create_instance(
        &mut self,
        class: ClassId,
        name: Option<&str>,
        slots: &[(String, ForeignValue)],
    ) -> NativeResult<InstanceId> {
        if !self.classes.contains_key(&class) {
            return Err(IBE_DEFCLASS_NOT_FOUND_ERROR);
        }
        self.insert_instance(class, name.map(str::to_string), slots.to_vec(), true)
            .map_err(|fault| {
                self.report(&fault);
                IBE_COULD_NOT_CREATE_ERROR
            })
    }

    fn unmake_instance(&mut self, instance: InstanceId) -> NativeResult<()> {
        self.remove_instance(instance, true)
    }

    fn delete_instance(&mut self, instance: InstanceId) -> NativeResult<()> {
        self.remove_instance(instance, true)
    }

    fn instance_valid(&self, instance: InstanceId) -> bool {
        self.is_live_instance(instance)
    }

    fn retain_instance(&mut self, instance: InstanceId) {
        self.retain_reachable(&ForeignValue::Instance(instance));
    }

    fn release_instance(&mut self, instance: InstanceId) {
        self.release_reachable(&ForeignValue::Instance(instance));
    }

    fn instance_name(&self, instance: InstanceId) -> Option<String> {
        self.instances.get(&instance).map(|i| i.name.clone())
    }

    fn instance_class(&self, instance: InstanceId) -> Option<ClassId> {
        self.instances.get(&instance).map(|i| i.class)
    }

    fn find_instance(&self, name: &str, module: Option<ModuleId>, search_imports: bool) -> Option<InstanceId> {
        let bare = name.trim_start_matches('[').trim_end_matches(']');
        let (qualifier, bare) = store::split_qualified(bare);
        let module = match qualifier {
            Some(q) => self.module_id(q)?,
            None => module.unwrap_or(self.current_module),
        };
        let id = self.live_instance_named(bare)?;
        let class = self.classes.get(&self.instances.get(&id)?.class)?;
        let reachable = class.module == module
            || (search_imports && self.visible("defclass", &class.name, class.module, module));
        reachable.then_some(id)
    }

    fn next_instance(&self, after: Option<InstanceId>) -> Option<InstanceId> {
        let start = after.map_or(0, |i| i.0 + 1);
        self.instances
            .range(InstanceId(start)..)
            .find(|(_, i)| !i.deleted)
            .map(|(id, _)| *id)
    }

    fn next_instance_in_class(&self, class: ClassId, after: Option<InstanceId>) -> Option<InstanceId> {
        let start = after.map_or(0, |i| i.0 + 1);
        self.instances
            .range(InstanceId(start)..)
            .find(|(_, i)| !i.deleted && i.class == class)
            .map(|(id, _)| *id)
    }

    fn instance_pp_form(&self, instance: InstanceId) -> Option<String> {
        let record = self.instances.get(&instance)?;
        let class = self.classes.get(&record.class)?;
        let mut lines = vec![format!("[{}] of {}", record.name, class.name)];
        for (name, value) in &record.slots {
            lines.push(self.slot_text(name, value).trim_start().to_string());
        }
        Some(lines.join("\n"))
    }

    fn direct_get_slot(&self, instance: InstanceId, slot: &str) -> NativeResult<ForeignValue> {
        let record = self.instances.get(&instance).ok_or(GSE_NULL_POINTER_ERROR)?;
        record
            .slots
            .iter()
            .find(|(name, _)| name == slot)
            .map(|(_, value)| value.clone())
            .ok_or(GSE_SLOT_NOT_FOUND_ERROR)
    }

    fn direct_put_slot(&mut self, instance: InstanceId, slot: &str, value: ForeignValue) -> NativeResult<()> {
        let record = self.instances.get(&instance).ok_or(PSE_NULL_POINTER_ERROR)?;
        if record.deleted {
            return Err(PSE_INVALID_TARGET_ERROR);
        }
        let class = record.class;
        let position = record
            .slots
            .iter()
            .position(|(name, _)| name == slot)
            .ok_or(PSE_SLOT_NOT_FOUND_ERROR)?;
        let slots = self.effective_slots(class);
        let def = slots.iter().find(|s| s.name == slot).ok_or(PSE_SLOT_NOT_FOUND_ERROR)?;
        let stored = self.check_slot(def, &value)?;
        self.retain_reachable(&stored);
        if self.watching.contains(&Watch::Slots) {
            let name = self.instances.get(&instance).map(|i| i.name.clone()).unwrap_or_default();
            let text = self.slot_value_text(&stored);
            self.emit(STDOUT, &format!("::= slot {slot} in [{name}] <- {text}\n"));
        }
        let old = match self.instances.get_mut(&instance) {
            Some(record) => std::mem::replace(&mut record.slots[position].1, stored),
            None => return Err(PSE_NULL_POINTER_ERROR),
        };
        self.release_reachable(&old);
        self.instances_changed = true;
        Ok(())
    }

    fn instances_changed(&self) -> bool {
        self.instances_changed
    }

    fn set_instances_changed(&mut self, changed: bool) {
        self.instances_changed = changed;
    }

    fn load_instances(&mut self, path: &Path) -> NativeResult<usize> {
        let source = persist::read_source(path)?;
        self.load_instance_source(&source, true)
    }

    fn load_instances_from_string(&mut self, source: &str) -> NativeResult<usize> {
        self.load_instance_source(source, true)
    }

    fn save_instances(&mut self, path: &Path, scope: SaveScope) -> NativeResult<usize> {
        self.save_instance_file(path, scope)
    }

    fn binary_load_instances(&mut self, path: &Path) -> NativeResult<usize> {
        self.bload_instances(path)
    }

    fn binary_save_instances(&mut self, path: &Path, scope: SaveScope) -> NativeResult<usize> {
        self.bsave_instances(path, scope)
    }

    fn restore_instances(&mut self, path: &Path) -> NativeResult<usize> {
        let source = persist::read_source(path)?;
        self.load_instance_source(&source, false)
    }

    fn restore_instances_from_string(&mut self, source: &str) -> NativeResult<usize> {
        self.load_instance_source(source, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Capture {
        text: RefCell<String>,
    }

    impl NativeRouter for Capture {
        fn query(&self, logical_name: &str) -> bool {
            logical_name == STDOUT
        }

        fn write(&self, _: &str, chunk: &str) {
            self.text.borrow_mut().push_str(chunk);
        }

        fn read(&self, _: &str) -> i32 {
            EOF
        }

        fn unread(&self, _: &str, _: i32) -> i32 {
            EOF
        }

        fn exit(&self, _: i32) {}
    }

    fn capturing_engine() -> (MemoryEngine, Rc<Capture>) {
        let mut engine = MemoryEngine::new();
        let capture = Rc::new(Capture::default());
        engine.add_router("capture", 10, capture.clone());
        (engine, capture)
    }

    mod lifecycle {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_reset_asserts_deffacts() {
            let mut engine = MemoryEngine::new();
            engine.build("(deftemplate item (slot n))").unwrap();
            engine.build("(deffacts startup (item (n 1)) (item (n 2)))").unwrap();
            engine.reset();
            let first = engine.next_fact(None).unwrap();
            assert_eq!(engine.fact_index(first), Some(1));
            assert_eq!(engine.fact_slot(first, "n"), Ok(ForeignValue::Integer(1)));
            engine.reset();
            let again = engine.next_fact(None).unwrap();
            assert_eq!(engine.fact_index(again), Some(1), "Reset restarts fact numbering");
        }

        #[test]
        fn test_reset_restores_globals() {
            let mut engine = MemoryEngine::new();
            engine.build("(defglobal ?*count* = 10)").unwrap();
            engine.eval("(bind ?*count* 99)").unwrap();
            engine.reset();
            assert_eq!(engine.eval("?*count*"), Ok(ForeignValue::Integer(10)));
        }

        #[test]
        fn test_clear_removes_constructs_but_keeps_udfs() {
            let mut engine = MemoryEngine::new();
            engine.build("(deftemplate foo (slot a))").unwrap();
            engine
                .add_udf(UdfRegistration {
                    name: "host-fn".into(),
                    return_types: "l".into(),
                    min_args: 0,
                    max_args: Some(0),
                    arg_types: String::new(),
                    handler: Rc::new(|_: &mut dyn NativeEngine, frame: &mut crate::native::UdfFrame| {
                        frame.result = ForeignValue::Integer(5)
                    }),
                })
                .unwrap();
            assert!(engine.clear());
            assert_eq!(engine.find_template("foo"), None);
            assert_eq!(engine.eval("(host-fn)"), Ok(ForeignValue::Integer(5)));
            assert_eq!(engine.module_name(engine.current_module()).as_deref(), Some("MAIN"));
        }

        #[test]
        fn test_retracted_fact_survives_until_checkpoint() {
            let mut engine = MemoryEngine::new();
            let fact = engine.assert_string("(numbers 1 2)").unwrap();
            engine.retract(fact).unwrap();
            assert!(engine.fact_slot(fact, "implied").is_ok());
            engine.collect_garbage();
            assert_eq!(engine.fact_slot(fact, "implied"), Err(GSE_NULL_POINTER_ERROR));
        }
    }

    mod routing {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_duplicate_router_name_rejected() {
            let (mut engine, capture) = capturing_engine();
            assert!(!engine.add_router("capture", 5, capture));
        }

        #[test]
        fn test_higher_priority_router_wins() {
            let (mut engine, low) = capturing_engine();
            let high = Rc::new(Capture::default());
            engine.add_router("high", 50, high.clone());
            engine.write_string(STDOUT, "hi");
            assert_eq!(high.text.borrow().as_str(), "hi");
            assert_eq!(low.text.borrow().as_str(), "");
        }

        #[test]
        fn test_watch_facts_trace() {
            let (mut engine, capture) = capturing_engine();
            engine.set_watch_state(Watch::Facts, true);
            let fact = engine.assert_string("(color red)").unwrap();
            engine.retract(fact).unwrap();
            assert_eq!(
                capture.text.borrow().as_str(),
                "==> f-1     (color red)\n<== f-1     (color red)\n"
            );
        }

        #[test]
        fn test_banner_goes_to_stdout() {
            let (mut engine, capture) = capturing_engine();
            engine.print_banner();
            assert!(capture.text.borrow().contains("clipsrules"));
        }
    }

    mod functions {
        use super::*;
        use pretty_assertions::assert_eq;

        fn registration(name: &str, arg_types: &str) -> UdfRegistration {
            UdfRegistration {
                name: name.into(),
                return_types: "*".into(),
                min_args: 0,
                max_args: None,
                arg_types: arg_types.into(),
                handler: Rc::new(|_: &mut dyn NativeEngine, _: &mut crate::native::UdfFrame| {}),
            }
        }

        #[test]
        fn test_udf_name_clashes() {
            let mut engine = MemoryEngine::new();
            assert_eq!(engine.add_udf(registration("+", "")), Err(AUE_FUNCTION_NAME_IN_USE_ERROR));
            assert_eq!(engine.add_udf(registration("if", "")), Err(AUE_FUNCTION_NAME_IN_USE_ERROR));
            assert_eq!(engine.add_udf(registration("ok", "q")), Err(AUE_INVALID_ARGUMENT_TYPE_ERROR));
            assert!(engine.add_udf(registration("ok", "ld;s")).is_ok());
            assert!(engine.function_exists("ok"));
        }

        #[test]
        fn test_call_function_codes() {
            let mut engine = MemoryEngine::new();
            assert_eq!(engine.call_function("nope", &[]), Err(FCBE_FUNCTION_NOT_FOUND_ERROR));
            assert_eq!(engine.call_function("if", &[]), Err(FCBE_INVALID_FUNCTION_ERROR));
            assert_eq!(engine.call_function("not", &[]), Err(FCBE_ARGUMENT_COUNT_ERROR));
            assert_eq!(
                engine.call_function("+", &[ForeignValue::Integer(2), ForeignValue::Integer(3)]),
                Ok(ForeignValue::Integer(5))
            );
        }
    }

    mod instances {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_put_slot_checks_constraints() {
            let mut engine = MemoryEngine::new();
            engine
                .build("(defclass box (is-a USER) (slot size (type INTEGER)))")
                .unwrap();
            let class = engine.find_class("box").unwrap();
            let id = engine.create_instance(class, Some("b1"), &[]).unwrap();
            assert_eq!(engine.direct_get_slot(id, "size"), Ok(ForeignValue::Integer(0)));
            assert_eq!(
                engine.direct_put_slot(id, "size", ForeignValue::Float(1.5)),
                Err(PSE_TYPE_ERROR)
            );
            assert!(engine.direct_put_slot(id, "size", ForeignValue::Integer(3)).is_ok());
            assert!(engine.instances_changed());
        }

        #[test]
        fn test_abstract_class_rejected() {
            let mut engine = MemoryEngine::new();
            let user = engine.find_class("USER").unwrap();
            assert_eq!(engine.create_instance(user, None, &[]), Err(IBE_COULD_NOT_CREATE_ERROR));
        }
    }
}
