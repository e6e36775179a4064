//! Arenas and working memory of the in-process engine
//!
//! Definitions (modules, templates, classes, deffunctions) and the objects
//! built from them (facts, instances, external addresses) all live here,
//! keyed by the integer handles of the call interface. Handles are never
//! reused within one engine, so a stale handle can only miss.

use super::eval::{Expr, FactSpec, InstanceSpec};
use super::MemoryEngine;
use crate::config::{IMPLIED_SLOT_NAME, STDERR, STDOUT};
use crate::native::codes::*;
use crate::native::{
    ClassId, ErrorCode, ExternalId, FactId, ForeignValue, InstanceId, LexemeId, LexemeKind, LexemeRef,
    ModuleId, TemplateId, UdfRegistration,
};
use crate::value::{format_float, quote_string};
use crate::watch::Watch;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

/// Failure inside the engine, reported on `stderr` before it is turned into
/// the error code of the calling family.
#[derive(Error, Debug, Clone, PartialEq)]
pub(super) enum Fault {
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Processing(String),
}

impl From<super::reader::ReadError> for Fault {
    fn from(e: super::reader::ReadError) -> Self {
        Fault::Parse(e.to_string())
    }
}

// ============================================================================
// Lexemes
// ============================================================================

/// Symbol table shared by symbols, strings and instance names
#[derive(Debug)]
pub(super) struct Lexemes {
    entries: Vec<(LexemeKind, String)>,
    index: HashMap<(LexemeKind, String), LexemeId>,
    pub true_symbol: LexemeId,
    pub false_symbol: LexemeId,
    pub nil_symbol: LexemeId,
    pub empty_string: LexemeId,
    pub nil_instance_name: LexemeId,
}

impl Lexemes {
    pub fn new() -> Self {
        let mut lexemes = Self {
            entries: Vec::new(),
            index: HashMap::new(),
            true_symbol: LexemeId(0),
            false_symbol: LexemeId(0),
            nil_symbol: LexemeId(0),
            empty_string: LexemeId(0),
            nil_instance_name: LexemeId(0),
        };
        lexemes.true_symbol = lexemes.intern(LexemeKind::Symbol, crate::config::TRUE_SYMBOL);
        lexemes.false_symbol = lexemes.intern(LexemeKind::Symbol, crate::config::FALSE_SYMBOL);
        lexemes.nil_symbol = lexemes.intern(LexemeKind::Symbol, "nil");
        lexemes.empty_string = lexemes.intern(LexemeKind::String, "");
        lexemes.nil_instance_name = lexemes.intern(LexemeKind::InstanceName, "nil");
        lexemes
    }

    pub fn intern(&mut self, kind: LexemeKind, text: &str) -> LexemeId {
        if let Some(id) = self.index.get(&(kind, text.to_string())) {
            return *id;
        }
        let id = LexemeId(self.entries.len() as u32);
        self.entries.push((kind, text.to_string()));
        self.index.insert((kind, text.to_string()), id);
        id
    }

    pub fn get(&self, id: LexemeId) -> Option<LexemeRef<'_>> {
        self.entries
            .get(id.0 as usize)
            .map(|(kind, text)| LexemeRef { kind: *kind, text })
    }
}

// ============================================================================
// Slot definitions and constraints
// ============================================================================

/// Type names accepted by the `type` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ValueType {
    Symbol,
    String,
    Lexeme,
    Integer,
    Float,
    Number,
    InstanceName,
    InstanceAddress,
    Instance,
    FactAddress,
    ExternalAddress,
}

impl ValueType {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "SYMBOL" => ValueType::Symbol,
            "STRING" => ValueType::String,
            "LEXEME" => ValueType::Lexeme,
            "INTEGER" => ValueType::Integer,
            "FLOAT" => ValueType::Float,
            "NUMBER" => ValueType::Number,
            "INSTANCE-NAME" => ValueType::InstanceName,
            "INSTANCE-ADDRESS" => ValueType::InstanceAddress,
            "INSTANCE" => ValueType::Instance,
            "FACT-ADDRESS" => ValueType::FactAddress,
            "EXTERNAL-ADDRESS" => ValueType::ExternalAddress,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(super) struct Constraints {
    /// `None` allows every type
    pub types: Option<Vec<ValueType>>,
    /// From `allowed-values`; applies to every value
    pub allowed_values: Option<Vec<ForeignValue>>,
    /// From `allowed-symbols`, `allowed-integers` and friends; applies only
    /// to values of the listed type
    pub allowed_by_type: Vec<(ValueType, Vec<ForeignValue>)>,
    pub range: Option<(Option<f64>, Option<f64>)>,
    pub cardinality: Option<(usize, Option<usize>)>,
}

#[derive(Debug, Clone)]
pub(super) enum SlotDefault {
    /// Derived from the constraints
    Derive,
    /// `?NONE`: a value must be supplied
    Required,
    Static(ForeignValue),
    /// Evaluated at each assertion or creation
    Dynamic(Rc<[Expr]>),
}

#[derive(Debug, Clone)]
pub(super) struct SlotDef {
    pub name: String,
    pub multi: bool,
    pub default: SlotDefault,
    pub constraints: Constraints,
}

impl SlotDef {
    pub fn new(name: impl Into<String>, multi: bool) -> Self {
        Self {
            name: name.into(),
            multi,
            default: SlotDefault::Derive,
            constraints: Constraints::default(),
        }
    }
}

// ============================================================================
// Constructs
// ============================================================================

/// An export or import specification: `?ALL`, or a construct type with
/// `?ALL` or a list of names
#[derive(Debug, Clone, PartialEq)]
pub(super) struct PortSpec {
    /// `None` covers every construct type
    pub construct: Option<String>,
    /// `None` covers every name
    pub names: Option<Vec<String>>,
}

impl PortSpec {
    pub fn covers(&self, construct: &str, name: &str) -> bool {
        self.construct.as_deref().map_or(true, |c| c == construct)
            && self
                .names
                .as_ref()
                .map_or(true, |names| names.iter().any(|n| n == name))
    }
}

#[derive(Debug, Clone)]
pub(super) struct ModuleDef {
    pub name: String,
    pub exports: Vec<PortSpec>,
    pub imports: Vec<(ModuleId, PortSpec)>,
}

impl ModuleDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exports: Vec::new(),
            imports: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub(super) struct Template {
    pub name: String,
    pub module: ModuleId,
    pub implied: bool,
    pub slots: Vec<SlotDef>,
}

#[derive(Debug, Clone)]
pub(super) struct Class {
    pub name: String,
    pub module: ModuleId,
    pub parents: Vec<ClassId>,
    pub is_abstract: bool,
    pub system: bool,
    /// Slots defined by this class only
    pub slots: Vec<SlotDef>,
}

#[derive(Debug)]
pub(super) struct Deffunction {
    pub params: Vec<String>,
    pub rest: Option<String>,
    pub body: Rc<[Expr]>,
}

#[derive(Debug)]
pub(super) struct Deffacts {
    pub name: String,
    pub module: ModuleId,
    pub facts: Vec<FactSpec>,
}

#[derive(Debug)]
pub(super) struct Definstances {
    pub name: String,
    pub module: ModuleId,
    pub instances: Vec<InstanceSpec>,
}

#[derive(Debug)]
pub(super) struct Defglobal {
    pub init: Rc<[Expr]>,
}

/// A registered user-defined function with its parsed type string
pub(super) struct Udf {
    pub registration: UdfRegistration,
    pub default_types: Vec<char>,
    pub positional_types: Vec<Vec<char>>,
}

impl Udf {
    pub fn types_for(&self, position: usize) -> &[char] {
        self.positional_types
            .get(position)
            .filter(|types| !types.is_empty())
            .unwrap_or(&self.default_types)
    }
}

// ============================================================================
// Working memory
// ============================================================================

#[derive(Debug, Clone)]
pub(super) struct FactRecord {
    pub template: TemplateId,
    /// One value per template slot
    pub values: Vec<ForeignValue>,
    pub index: u64,
    pub retracted: bool,
    pub retain: u32,
}

#[derive(Debug, Clone)]
pub(super) struct InstanceRecord {
    pub name: String,
    pub class: ClassId,
    pub slots: Vec<(String, ForeignValue)>,
    pub deleted: bool,
    pub retain: u32,
}

#[derive(Debug, Clone)]
pub(super) struct ExternalRecord {
    pub type_code: i32,
    pub payload: u64,
    pub count: u32,
}

/// Split `Module::name` into its parts.
pub(super) fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once("::") {
        Some((module, rest)) => (Some(module), rest),
        None => (None, name),
    }
}

impl MemoryEngine {
    // ========================================================================
    // Values
    // ========================================================================

    pub(super) fn symbol(&mut self, text: &str) -> ForeignValue {
        ForeignValue::Lexeme(self.lexemes.intern(LexemeKind::Symbol, text))
    }

    pub(super) fn string(&mut self, text: &str) -> ForeignValue {
        ForeignValue::Lexeme(self.lexemes.intern(LexemeKind::String, text))
    }

    pub(super) fn boolean(&self, b: bool) -> ForeignValue {
        ForeignValue::Lexeme(if b {
            self.lexemes.true_symbol
        } else {
            self.lexemes.false_symbol
        })
    }

    pub(super) fn is_false(&self, value: &ForeignValue) -> bool {
        *value == ForeignValue::Lexeme(self.lexemes.false_symbol)
    }

    pub(super) fn lexeme_of(&self, value: &ForeignValue) -> Option<LexemeRef<'_>> {
        match value {
            ForeignValue::Lexeme(id) => self.lexemes.get(*id),
            _ => None,
        }
    }

    /// Text of a value as the engine prints it, e.g. `"x"`, `[joe]`, `(1 2)`
    pub(super) fn value_text(&self, value: &ForeignValue) -> String {
        match value {
            ForeignValue::Float(x) => format_float(*x),
            ForeignValue::Integer(i) => i.to_string(),
            ForeignValue::Lexeme(id) => match self.lexemes.get(*id) {
                Some(LexemeRef {
                    kind: LexemeKind::Symbol,
                    text,
                }) => text.to_string(),
                Some(LexemeRef {
                    kind: LexemeKind::String,
                    text,
                }) => quote_string(text),
                Some(LexemeRef {
                    kind: LexemeKind::InstanceName,
                    text,
                }) => format!("[{text}]"),
                None => String::new(),
            },
            ForeignValue::Fact(id) => match self.facts.get(id) {
                Some(fact) => format!("<Fact-{}>", fact.index),
                None => "<Fact-XXX>".to_string(),
            },
            ForeignValue::Instance(id) => match self.instances.get(id) {
                Some(instance) => format!("<Instance-{}>", instance.name),
                None => "<Instance-XXX>".to_string(),
            },
            ForeignValue::External(id) => match self.externals.get(id) {
                Some(ext) => format!("<Pointer-{}-{}>", ext.type_code, ext.payload),
                None => "<Pointer-XXX>".to_string(),
            },
            ForeignValue::Multifield(items) => format!("({})", self.items_text(items)),
            ForeignValue::Void => String::new(),
            ForeignValue::Unsupported(code) => format!("<Unsupported-{code}>"),
        }
    }

    pub(super) fn items_text(&self, items: &[ForeignValue]) -> String {
        items
            .iter()
            .map(|item| self.value_text(item))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Text of a slot value: multifields print without parentheses
    pub(super) fn slot_value_text(&self, value: &ForeignValue) -> String {
        match value {
            ForeignValue::Multifield(items) => self.items_text(items),
            other => self.value_text(other),
        }
    }

    /// Bump the counts of every handle reachable from a value.
    pub(super) fn retain_reachable(&mut self, value: &ForeignValue) {
        match value {
            ForeignValue::Fact(id) => {
                if let Some(fact) = self.facts.get_mut(id) {
                    fact.retain += 1;
                }
            }
            ForeignValue::Instance(id) => {
                if let Some(instance) = self.instances.get_mut(id) {
                    instance.retain += 1;
                }
            }
            ForeignValue::External(id) => {
                if let Some(ext) = self.externals.get_mut(id) {
                    ext.count += 1;
                }
            }
            ForeignValue::Multifield(items) => {
                for item in items {
                    self.retain_reachable(item);
                }
            }
            _ => {}
        }
    }

    pub(super) fn release_reachable(&mut self, value: &ForeignValue) {
        match value {
            ForeignValue::Fact(id) => {
                if let Some(fact) = self.facts.get_mut(id) {
                    fact.retain = fact.retain.saturating_sub(1);
                }
            }
            ForeignValue::Instance(id) => {
                if let Some(instance) = self.instances.get_mut(id) {
                    instance.retain = instance.retain.saturating_sub(1);
                }
            }
            ForeignValue::External(id) => {
                if let Some(ext) = self.externals.get_mut(id) {
                    ext.count = ext.count.saturating_sub(1);
                }
            }
            ForeignValue::Multifield(items) => {
                for item in items {
                    self.release_reachable(item);
                }
            }
            _ => {}
        }
    }

    // ========================================================================
    // Output
    // ========================================================================

    /// Send text to the highest-priority router accepting the logical name.
    pub(super) fn emit(&self, logical_name: &str, text: &str) {
        if let Some(entry) = self.routers.iter().find(|r| r.router.query(logical_name)) {
            entry.router.write(logical_name, text);
            return;
        }
        match logical_name {
            STDOUT => print!("{text}"),
            STDERR | crate::config::STDWRN => eprint!("{text}"),
            other => tracing::debug!(channel = %other, "Output to unrouted logical name dropped"),
        }
    }

    pub(super) fn report(&self, fault: &Fault) {
        tracing::debug!(error = %fault, "Engine error");
        self.emit(STDERR, &format!("{fault}\n"));
    }

    // ========================================================================
    // Modules and visibility
    // ========================================================================

    pub(super) fn module_id(&self, name: &str) -> Option<ModuleId> {
        self.modules
            .iter()
            .find(|(_, m)| m.name == name)
            .map(|(id, _)| *id)
    }

    /// Whether a construct owned by `owner` can be referenced from `from`
    pub(super) fn visible(&self, construct: &str, name: &str, owner: ModuleId, from: ModuleId) -> bool {
        if owner == from {
            return true;
        }
        let (Some(owner_def), Some(from_def)) = (self.modules.get(&owner), self.modules.get(&from)) else {
            return false;
        };
        let exported = owner_def.exports.iter().any(|spec| spec.covers(construct, name));
        exported
            && from_def
                .imports
                .iter()
                .any(|(module, spec)| *module == owner && spec.covers(construct, name))
    }

    /// Resolve a possibly qualified template name from the current module.
    pub(super) fn resolve_template(&self, name: &str) -> Option<TemplateId> {
        let (module, bare) = split_qualified(name);
        if let Some(module) = module {
            let module = self.module_id(module)?;
            return self
                .templates
                .iter()
                .find(|(_, t)| t.module == module && t.name == bare)
                .map(|(id, _)| *id);
        }
        let current = self.current_module;
        self.templates
            .iter()
            .find(|(_, t)| t.module == current && t.name == bare)
            .or_else(|| {
                self.templates.iter().find(|(_, t)| {
                    t.name == bare && self.visible("deftemplate", bare, t.module, current)
                })
            })
            .map(|(id, _)| *id)
    }

    /// Resolve a possibly qualified class name; system classes are visible everywhere.
    pub(super) fn resolve_class(&self, name: &str) -> Option<ClassId> {
        let (module, bare) = split_qualified(name);
        if let Some(module) = module {
            let module = self.module_id(module)?;
            return self
                .classes
                .iter()
                .find(|(_, c)| c.module == module && c.name == bare)
                .map(|(id, _)| *id);
        }
        let current = self.current_module;
        self.classes
            .iter()
            .find(|(_, c)| c.name == bare && (c.system || c.module == current))
            .or_else(|| {
                self.classes.iter().find(|(_, c)| {
                    c.name == bare && self.visible("defclass", bare, c.module, current)
                })
            })
            .map(|(id, _)| *id)
    }

    // ========================================================================
    // Templates and facts
    // ========================================================================

    /// Find or create the implied template for an ordered fact.
    pub(super) fn implied_template(&mut self, relation: &str) -> Result<TemplateId, Fault> {
        if let Some(id) = self.resolve_template(relation) {
            return match self.templates.get(&id) {
                Some(t) if t.implied => Ok(id),
                _ => Err(Fault::Processing(format!(
                    "Deftemplate {relation} requires slot values, not an ordered fact"
                ))),
            };
        }
        let (module, bare) = split_qualified(relation);
        let module = match module {
            Some(name) => self
                .module_id(name)
                .ok_or_else(|| Fault::Parse(format!("Unknown module {name}")))?,
            None => self.current_module,
        };
        let id = TemplateId(self.next_template);
        self.next_template += 1;
        self.templates.insert(
            id,
            Template {
                name: bare.to_string(),
                module,
                implied: true,
                slots: vec![SlotDef::new(IMPLIED_SLOT_NAME, true)],
            },
        );
        Ok(id)
    }

    /// Default of a slot, evaluating dynamic defaults.
    pub(super) fn default_for(&mut self, owner: &str, slot: &SlotDef) -> Result<ForeignValue, Fault> {
        match &slot.default {
            SlotDefault::Derive => Ok(self.derived_default(slot)),
            SlotDefault::Required => Err(Fault::Processing(format!(
                "Slot {} of {owner} requires a value",
                slot.name
            ))),
            SlotDefault::Static(value) => Ok(value.clone()),
            SlotDefault::Dynamic(exprs) => {
                let exprs = exprs.clone();
                let value = self.eval_slot_exprs(&exprs, &mut Default::default())?;
                self.check_slot(slot, &value).map_err(|code| {
                    Fault::Processing(format!("Default of slot {} violates its constraints (code {code})", slot.name))
                })
            }
        }
    }

    /// Derived default: first allowed value, else the default of the first allowed type.
    pub(super) fn derived_default(&self, slot: &SlotDef) -> ForeignValue {
        if slot.multi {
            return ForeignValue::Multifield(Vec::new());
        }
        let c = &slot.constraints;
        if let Some(first) = c.allowed_values.as_ref().and_then(|v| v.first()) {
            return first.clone();
        }
        let low = c.range.and_then(|(low, _)| low);
        let nil = ForeignValue::Lexeme(self.lexemes.nil_symbol);
        match c.types.as_ref().and_then(|t| t.first()) {
            Some(ValueType::Integer) | Some(ValueType::Number) => {
                ForeignValue::Integer(low.map(|l| l as i64).unwrap_or(0))
            }
            Some(ValueType::Float) => ForeignValue::Float(low.unwrap_or(0.0)),
            Some(ValueType::String) => ForeignValue::Lexeme(self.lexemes.empty_string),
            Some(ValueType::InstanceName) => ForeignValue::Lexeme(self.lexemes.nil_instance_name),
            Some(ValueType::Symbol) | Some(ValueType::Lexeme) => c
                .allowed_by_type
                .iter()
                .find(|(t, _)| *t == ValueType::Symbol)
                .and_then(|(_, values)| values.first().cloned())
                .unwrap_or(nil),
            _ => nil,
        }
    }

    fn type_matches(&self, ty: ValueType, value: &ForeignValue) -> bool {
        let kind = self.lexeme_of(value).map(|l| l.kind);
        match ty {
            ValueType::Symbol => kind == Some(LexemeKind::Symbol),
            ValueType::String => kind == Some(LexemeKind::String),
            ValueType::Lexeme => matches!(kind, Some(LexemeKind::Symbol | LexemeKind::String)),
            ValueType::Integer => matches!(value, ForeignValue::Integer(_)),
            ValueType::Float => matches!(value, ForeignValue::Float(_)),
            ValueType::Number => matches!(value, ForeignValue::Integer(_) | ForeignValue::Float(_)),
            ValueType::InstanceName => kind == Some(LexemeKind::InstanceName),
            ValueType::InstanceAddress => matches!(value, ForeignValue::Instance(_)),
            ValueType::Instance => {
                matches!(value, ForeignValue::Instance(_)) || kind == Some(LexemeKind::InstanceName)
            }
            ValueType::FactAddress => matches!(value, ForeignValue::Fact(_)),
            ValueType::ExternalAddress => matches!(value, ForeignValue::External(_)),
        }
    }

    /// Validate a value against a slot, returning the stored form or a PSE code.
    pub(super) fn check_slot(&self, slot: &SlotDef, value: &ForeignValue) -> Result<ForeignValue, ErrorCode> {
        let items: Vec<ForeignValue> = match (slot.multi, value) {
            (true, ForeignValue::Multifield(items)) => items.clone(),
            (true, ForeignValue::Void) => Vec::new(),
            (true, other) => vec![other.clone()],
            (false, ForeignValue::Multifield(_)) => return Err(PSE_CARDINALITY_ERROR),
            (false, ForeignValue::Void) => return Err(PSE_TYPE_ERROR),
            (false, other) => vec![other.clone()],
        };
        let c = &slot.constraints;
        for item in &items {
            if let Some(types) = &c.types {
                if !types.iter().any(|t| self.type_matches(*t, item)) {
                    return Err(PSE_TYPE_ERROR);
                }
            }
            if let Some(allowed) = &c.allowed_values {
                if !allowed.contains(item) {
                    return Err(PSE_ALLOWED_VALUES_ERROR);
                }
            }
            for (ty, allowed) in &c.allowed_by_type {
                if self.type_matches(*ty, item) && !allowed.contains(item) {
                    return Err(PSE_ALLOWED_VALUES_ERROR);
                }
            }
            if let Some((low, high)) = c.range {
                let n = match item {
                    ForeignValue::Integer(i) => Some(*i as f64),
                    ForeignValue::Float(f) => Some(*f),
                    _ => None,
                };
                if let Some(n) = n {
                    if low.is_some_and(|l| n < l) || high.is_some_and(|h| n > h) {
                        return Err(PSE_RANGE_ERROR);
                    }
                }
            }
        }
        if slot.multi {
            if let Some((min, max)) = c.cardinality {
                if items.len() < min || max.is_some_and(|m| items.len() > m) {
                    return Err(PSE_CARDINALITY_ERROR);
                }
            }
            Ok(ForeignValue::Multifield(items))
        } else {
            Ok(value.clone())
        }
    }

    /// Assert a template fact from named slot values; missing slots take defaults.
    pub(super) fn assert_slots(
        &mut self,
        template: TemplateId,
        given: Vec<(String, ForeignValue)>,
    ) -> Result<FactId, Fault> {
        let Some(def) = self.templates.get(&template).cloned() else {
            return Err(Fault::Processing(format!("Deftemplate {template} no longer exists")));
        };
        for (name, _) in &given {
            if !def.slots.iter().any(|s| &s.name == name) {
                return Err(Fault::Processing(format!(
                    "Invalid slot {name} not defined in corresponding deftemplate {}",
                    def.name
                )));
            }
        }
        let mut values = Vec::with_capacity(def.slots.len());
        for slot in &def.slots {
            let value = match given.iter().find(|(name, _)| name == &slot.name) {
                Some((_, value)) => self.check_slot(slot, value).map_err(|code| {
                    Fault::Processing(format!(
                        "Slot {} of deftemplate {} does not accept {} (code {code})",
                        slot.name,
                        def.name,
                        self.value_text(value)
                    ))
                })?,
                None => self.default_for(&def.name, slot)?,
            };
            values.push(value);
        }
        Ok(self.insert_fact(template, values))
    }

    /// Add a fact unless an identical live one exists and duplicates are off.
    pub(super) fn insert_fact(&mut self, template: TemplateId, values: Vec<ForeignValue>) -> FactId {
        if !self.fact_duplication {
            if let Some((id, _)) = self
                .facts
                .iter()
                .find(|(_, f)| !f.retracted && f.template == template && f.values == values)
            {
                return *id;
            }
        }
        let id = FactId(self.next_fact);
        self.next_fact += 1;
        let index = self.next_fact_index;
        self.next_fact_index += 1;
        for value in &values {
            self.retain_reachable(value);
        }
        self.facts.insert(
            id,
            FactRecord {
                template,
                values,
                index,
                retracted: false,
                retain: 0,
            },
        );
        self.fact_list_changed = true;
        if self.watching.contains(&Watch::Facts) {
            if let Some(text) = self.fact_text(id) {
                self.emit(STDOUT, &format!("==> {:<8}{text}\n", format!("f-{index}")));
            }
        }
        tracing::trace!(fact = %id, index, "Asserted fact");
        id
    }

    pub(super) fn retract_fact(&mut self, id: FactId) -> Result<(), ErrorCode> {
        let index = match self.facts.get(&id) {
            None => return Err(RE_NULL_POINTER_ERROR),
            Some(f) if f.retracted => return Err(RE_COULD_NOT_RETRACT_ERROR),
            Some(f) => f.index,
        };
        if self.watching.contains(&Watch::Facts) {
            if let Some(text) = self.fact_text(id) {
                self.emit(STDOUT, &format!("<== {:<8}{text}\n", format!("f-{index}")));
            }
        }
        if let Some(fact) = self.facts.get_mut(&id) {
            fact.retracted = true;
        }
        self.fact_list_changed = true;
        Ok(())
    }

    /// Single-line form, e.g. `(foo (a 1) (b apple))` or `(numbers 1 2 3)`
    pub(super) fn fact_text(&self, id: FactId) -> Option<String> {
        let fact = self.facts.get(&id)?;
        let template = self.templates.get(&fact.template)?;
        let mut text = format!("({}", template.name);
        if template.implied {
            if let Some(ForeignValue::Multifield(items)) = fact.values.first() {
                if !items.is_empty() {
                    text.push(' ');
                    text.push_str(&self.items_text(items));
                }
            }
        } else {
            for (slot, value) in template.slots.iter().zip(&fact.values) {
                text.push_str(&self.slot_text(&slot.name, value));
            }
        }
        text.push(')');
        Some(text)
    }

    /// ` (name value)` with a leading space
    pub(super) fn slot_text(&self, name: &str, value: &ForeignValue) -> String {
        let body = self.slot_value_text(value);
        if body.is_empty() {
            format!(" ({name})")
        } else {
            format!(" ({name} {body})")
        }
    }

    // ========================================================================
    // Classes and instances
    // ========================================================================

    /// Slots of a class including inherited ones, most general first
    pub(super) fn effective_slots(&self, class: ClassId) -> Vec<SlotDef> {
        let mut out: Vec<SlotDef> = Vec::new();
        let Some(def) = self.classes.get(&class) else {
            return out;
        };
        for parent in &def.parents {
            for slot in self.effective_slots(*parent) {
                if !out.iter().any(|s| s.name == slot.name) {
                    out.push(slot);
                }
            }
        }
        for slot in &def.slots {
            match out.iter_mut().find(|s| s.name == slot.name) {
                Some(existing) => *existing = slot.clone(),
                None => out.push(slot.clone()),
            }
        }
        out
    }

    pub(super) fn is_subclass(&self, class: ClassId, ancestor: ClassId) -> bool {
        class == ancestor
            || self
                .classes
                .get(&class)
                .is_some_and(|c| c.parents.iter().any(|p| self.is_subclass(*p, ancestor)))
    }

    fn generate_instance_name(&mut self) -> String {
        loop {
            self.next_gensym += 1;
            let name = format!("gen{}", self.next_gensym);
            if self.live_instance_named(&name).is_none() {
                return name;
            }
        }
    }

    pub(super) fn live_instance_named(&self, name: &str) -> Option<InstanceId> {
        self.instances
            .iter()
            .find(|(_, i)| !i.deleted && i.name == name)
            .map(|(id, _)| *id)
    }

    /// Create an instance; an existing instance with the same name is deleted first.
    pub(super) fn insert_instance(
        &mut self,
        class: ClassId,
        name: Option<String>,
        given: Vec<(String, ForeignValue)>,
        trace: bool,
    ) -> Result<InstanceId, Fault> {
        let Some(def) = self.classes.get(&class).cloned() else {
            return Err(Fault::Processing(format!("Defclass {class} no longer exists")));
        };
        if def.is_abstract {
            return Err(Fault::Processing(format!(
                "Cannot create instances of abstract class {}",
                def.name
            )));
        }
        let slots = self.effective_slots(class);
        for (slot_name, _) in &given {
            if !slots.iter().any(|s| &s.name == slot_name) {
                return Err(Fault::Processing(format!(
                    "Invalid slot {slot_name} not defined in class {}",
                    def.name
                )));
            }
        }
        let mut values = Vec::with_capacity(slots.len());
        for slot in &slots {
            let value = match given.iter().find(|(n, _)| n == &slot.name) {
                Some((_, value)) => self.check_slot(slot, value).map_err(|code| {
                    Fault::Processing(format!(
                        "Slot {} of class {} does not accept {} (code {code})",
                        slot.name,
                        def.name,
                        self.value_text(value)
                    ))
                })?,
                None => self.default_for(&def.name, slot)?,
            };
            values.push((slot.name.clone(), value));
        }
        let name = match name {
            Some(name) => {
                if let Some(existing) = self.live_instance_named(&name) {
                    self.remove_instance(existing, trace)
                        .map_err(|code| Fault::Processing(format!("Could not replace [{name}] (code {code})")))?;
                }
                name
            }
            None => self.generate_instance_name(),
        };
        for (_, value) in &values {
            self.retain_reachable(value);
        }
        let id = InstanceId(self.next_instance);
        self.next_instance += 1;
        self.lexemes.intern(LexemeKind::InstanceName, &name);
        self.instances.insert(
            id,
            InstanceRecord {
                name: name.clone(),
                class,
                slots: values,
                deleted: false,
                retain: 0,
            },
        );
        self.instances_changed = true;
        if trace && self.watching.contains(&Watch::Instances) {
            self.emit(STDOUT, &format!("==> instance [{name}] of {}\n", def.name));
        }
        tracing::trace!(instance = %id, name = %name, "Created instance");
        Ok(id)
    }

    pub(super) fn remove_instance(&mut self, id: InstanceId, trace: bool) -> Result<(), ErrorCode> {
        let (name, class) = match self.instances.get(&id) {
            None => return Err(UIE_NULL_POINTER_ERROR),
            Some(i) if i.deleted => return Err(UIE_DELETED_ERROR),
            Some(i) => (i.name.clone(), i.class),
        };
        if trace && self.watching.contains(&Watch::Instances) {
            let class_name = self.classes.get(&class).map(|c| c.name.clone()).unwrap_or_default();
            self.emit(STDOUT, &format!("<== instance [{name}] of {class_name}\n"));
        }
        if let Some(instance) = self.instances.get_mut(&id) {
            instance.deleted = true;
        }
        self.instances_changed = true;
        Ok(())
    }

    /// `([joe] of foo (a 1) (b 2))`
    pub(super) fn instance_text(&self, id: InstanceId) -> Option<String> {
        let instance = self.instances.get(&id)?;
        let class = self.classes.get(&instance.class)?;
        let mut text = format!("([{}] of {}", instance.name, class.name);
        for (name, value) in &instance.slots {
            text.push_str(&self.slot_text(name, value));
        }
        text.push(')');
        Some(text)
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Remove retracted facts and deleted instances nobody holds, then
    /// discard external addresses whose count reached zero.
    pub(super) fn collect(&mut self) {
        let dead_facts: Vec<FactId> = self
            .facts
            .iter()
            .filter(|(_, f)| f.retracted && f.retain == 0)
            .map(|(id, _)| *id)
            .collect();
        for id in dead_facts {
            if let Some(fact) = self.facts.remove(&id) {
                for value in &fact.values {
                    self.release_reachable(value);
                }
            }
        }

        let dead_instances: Vec<InstanceId> = self
            .instances
            .iter()
            .filter(|(_, i)| i.deleted && i.retain == 0)
            .map(|(id, _)| *id)
            .collect();
        for id in dead_instances {
            if let Some(instance) = self.instances.remove(&id) {
                for (_, value) in &instance.slots {
                    self.release_reachable(value);
                }
            }
        }

        let dead_externals: Vec<ExternalId> = self
            .externals
            .iter()
            .filter(|(_, e)| e.count == 0)
            .map(|(id, _)| *id)
            .collect();
        for id in dead_externals {
            let Some(ext) = self.externals.remove(&id) else {
                continue;
            };
            let Ok(index) = usize::try_from(ext.type_code) else {
                continue;
            };
            if let Some(ty) = self.external_types.get_mut(index) {
                if !(ty.discard)(ext.payload) {
                    tracing::debug!(external = %id, type_name = %ty.name, "Discard callback declined");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeEngine;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lexemes_are_interned() {
        let mut lexemes = Lexemes::new();
        let a = lexemes.intern(LexemeKind::Symbol, "a");
        assert_eq!(lexemes.intern(LexemeKind::Symbol, "a"), a);
        assert_ne!(lexemes.intern(LexemeKind::String, "a"), a);
        assert_eq!(lexemes.get(lexemes.true_symbol).map(|l| l.text), Some("TRUE"));
    }

    #[test]
    fn test_port_spec_covers() {
        let all = PortSpec {
            construct: None,
            names: None,
        };
        assert!(all.covers("deftemplate", "foo"));

        let named = PortSpec {
            construct: Some("deftemplate".into()),
            names: Some(vec!["foo".into()]),
        };
        assert!(named.covers("deftemplate", "foo"));
        assert!(!named.covers("deftemplate", "bar"));
        assert!(!named.covers("defclass", "foo"));
    }

    #[test]
    fn test_split_qualified() {
        assert_eq!(split_qualified("Apple::foo"), (Some("Apple"), "foo"));
        assert_eq!(split_qualified("foo"), (None, "foo"));
    }

    mod constraints {
        use super::*;
        use pretty_assertions::assert_eq;

        fn slot(constraints: Constraints) -> SlotDef {
            SlotDef {
                constraints,
                ..SlotDef::new("x", false)
            }
        }

        #[test]
        fn test_type_and_range() {
            let engine = MemoryEngine::new();
            let s = slot(Constraints {
                types: Some(vec![ValueType::Integer]),
                range: Some((Some(0.0), Some(10.0))),
                ..Default::default()
            });
            assert!(engine.check_slot(&s, &ForeignValue::Integer(3)).is_ok());
            assert_eq!(engine.check_slot(&s, &ForeignValue::Integer(11)), Err(PSE_RANGE_ERROR));
            assert_eq!(engine.check_slot(&s, &ForeignValue::Float(1.0)), Err(PSE_TYPE_ERROR));
            assert_eq!(engine.derived_default(&s), ForeignValue::Integer(0));
        }

        #[test]
        fn test_single_slot_rejects_multifield() {
            let engine = MemoryEngine::new();
            let s = slot(Constraints::default());
            assert_eq!(
                engine.check_slot(&s, &ForeignValue::Multifield(vec![])),
                Err(PSE_CARDINALITY_ERROR)
            );
        }

        #[test]
        fn test_multislot_wraps_single_value() {
            let engine = MemoryEngine::new();
            let s = SlotDef::new("m", true);
            assert_eq!(
                engine.check_slot(&s, &ForeignValue::Integer(1)),
                Ok(ForeignValue::Multifield(vec![ForeignValue::Integer(1)]))
            );
        }

        #[test]
        fn test_allowed_values() {
            let mut engine = MemoryEngine::new();
            let red = engine.symbol("red");
            let blue = engine.symbol("blue");
            let s = slot(Constraints {
                allowed_values: Some(vec![red.clone()]),
                ..Default::default()
            });
            assert!(engine.check_slot(&s, &red).is_ok());
            assert_eq!(engine.check_slot(&s, &blue), Err(PSE_ALLOWED_VALUES_ERROR));
            assert_eq!(engine.derived_default(&s), red);
        }
    }

    #[test]
    fn test_collect_discards_zero_count_externals() {
        let mut engine = MemoryEngine::new();
        let id = engine.create_external_address(7, 0);
        engine.retain_external(id);
        engine.collect();
        assert!(engine.external_address(id).is_some());
        engine.release_external(id);
        engine.collect();
        assert!(engine.external_address(id).is_none());
    }
}
