//! Construct definitions
//!
//! `build` and `load` hand each top-level form to [`MemoryEngine::build_sexp`],
//! which dispatches on the construct keyword. A qualified construct name such
//! as `Apple::foo` makes `Apple` the current module before the construct is
//! defined there.

use super::eval::{is_global_name, is_special_form, qualified_module, shared_body, builtin, Frame};
use super::reader::{read_one, Sexp};
use super::store::{
    Class, Constraints, Deffacts, Deffunction, Definstances, Defglobal, Fault, ModuleDef, PortSpec, SlotDef,
    SlotDefault, Template, ValueType,
};
use super::{ConstructRecord, MemoryEngine};
use crate::config::{MAIN_MODULE, STDOUT};
use crate::native::codes::*;
use crate::native::{ClassId, ErrorCode, ForeignValue, TemplateId};
use crate::watch::Watch;
use std::rc::Rc;

/// Every construct keyword the reader recognizes
const CONSTRUCTS: [&str; 11] = [
    "deftemplate",
    "defclass",
    "defmodule",
    "deffunction",
    "deffacts",
    "definstances",
    "defglobal",
    "defrule",
    "defgeneric",
    "defmethod",
    "defmessage-handler",
];

/// Construct types that may appear in export and import specifications
const PORTABLE: [&str; 5] = ["deftemplate", "defclass", "deffunction", "defglobal", "defgeneric"];

/// Class slot facets accepted and ignored
const IGNORED_FACETS: [&str; 8] = [
    "access",
    "storage",
    "propagation",
    "source",
    "pattern-match",
    "visibility",
    "create-accessor",
    "override-message",
];

pub(super) fn is_construct(keyword: &str) -> bool {
    CONSTRUCTS.contains(&keyword)
}

/// `?NAME` keyword such as `?ALL`, `?NONE` or `?VARIABLE`
fn is_keyword(sexp: &Sexp, keyword: &str) -> bool {
    matches!(sexp, Sexp::Variable(v) if v == keyword)
}

impl MemoryEngine {
    /// Build one construct from text, reporting BE codes.
    pub(super) fn build_text(&mut self, text: &str) -> Result<(), ErrorCode> {
        match read_one(text) {
            Ok(sexp) => self.build_sexp(&sexp),
            Err(e) => {
                self.report(&e.into());
                Err(BE_PARSING_ERROR)
            }
        }
    }

    pub(super) fn build_sexp(&mut self, sexp: &Sexp) -> Result<(), ErrorCode> {
        let Some(keyword) = sexp.head().filter(|h| is_construct(h)) else {
            self.report(&Fault::Parse(format!("Expected the beginning of a construct but found {sexp}")));
            return Err(BE_CONSTRUCT_NOT_FOUND_ERROR);
        };
        let module = self
            .modules
            .get(&self.current_module)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| MAIN_MODULE.to_string());
        let items = sexp.as_list().map(|l| &l[1..]).unwrap_or_default();
        match self.define(keyword, items) {
            Ok(name) => {
                if self.watching.contains(&Watch::Compilations) {
                    self.emit(STDOUT, &format!("Defining {keyword}: {name}\n"));
                }
                tracing::debug!(construct = keyword, name = %name, "Defined construct");
                self.construct_log.push(ConstructRecord {
                    module,
                    source: sexp.to_string(),
                });
                Ok(())
            }
            Err(fault) => {
                self.report(&fault);
                Err(match fault {
                    Fault::Parse(_) => BE_PARSING_ERROR,
                    Fault::Processing(_) => BE_COULD_NOT_BUILD_ERROR,
                })
            }
        }
    }

    fn define(&mut self, keyword: &str, items: &[Sexp]) -> Result<String, Fault> {
        match keyword {
            "deftemplate" => self.define_template(items),
            "defclass" => self.define_class(items),
            "defmodule" => self.define_module(items),
            "deffunction" => self.define_function(items),
            "deffacts" => self.define_deffacts(items),
            "definstances" => self.define_definstances(items),
            "defglobal" => self.define_globals(items),
            other => Err(Fault::Processing(format!(
                "Construct {other} is not supported by the in-process engine"
            ))),
        }
    }

    /// Name and body of a named construct; an optional comment string is skipped.
    fn header<'a>(&mut self, keyword: &str, items: &'a [Sexp]) -> Result<(String, &'a [Sexp]), Fault> {
        let Some((name, rest)) = items.split_first() else {
            return Err(Fault::Parse(format!("Missing name for {keyword}")));
        };
        let Some(name) = name.as_symbol() else {
            return Err(Fault::Parse(format!("Expected a name for {keyword} but found {name}")));
        };
        let (module, bare) = qualified_module(self, name)?;
        if let Some(module) = module {
            self.current_module = module;
        }
        let rest = match rest.first() {
            Some(Sexp::String(_)) => &rest[1..],
            _ => rest,
        };
        Ok((bare.to_string(), rest))
    }

    // ========================================================================
    // deftemplate
    // ========================================================================

    fn define_template(&mut self, items: &[Sexp]) -> Result<String, Fault> {
        let (name, rest) = self.header("deftemplate", items)?;
        let mut slots: Vec<SlotDef> = Vec::new();
        for item in rest {
            let (multi, slot_name, attrs) = match item.as_list() {
                Some([Sexp::Symbol(kind), Sexp::Symbol(slot_name), attrs @ ..]) if kind == "slot" || kind == "field" => {
                    (false, slot_name, attrs)
                }
                Some([Sexp::Symbol(kind), Sexp::Symbol(slot_name), attrs @ ..])
                    if kind == "multislot" || kind == "multifield" =>
                {
                    (true, slot_name, attrs)
                }
                _ => {
                    return Err(Fault::Parse(format!(
                        "Expected a slot or multislot in deftemplate {name} but found {item}"
                    )))
                }
            };
            if slots.iter().any(|s| &s.name == slot_name) {
                return Err(Fault::Parse(format!(
                    "Duplicate slot {slot_name} in deftemplate {name}"
                )));
            }
            slots.push(self.slot_definition(&name, slot_name, multi, attrs, false)?);
        }

        let module = self.current_module;
        let existing = self
            .templates
            .iter()
            .find(|(_, t)| t.module == module && t.name == name)
            .map(|(id, _)| *id);
        let id = match existing {
            Some(id) if self.facts.values().any(|f| f.template == id) => {
                return Err(Fault::Processing(format!(
                    "Cannot redefine deftemplate {name} while facts use it"
                )))
            }
            Some(id) => id,
            None => {
                let id = TemplateId(self.next_template);
                self.next_template += 1;
                id
            }
        };
        self.templates.insert(
            id,
            Template {
                name: name.clone(),
                module,
                implied: false,
                slots,
            },
        );
        Ok(name)
    }

    fn slot_definition(
        &mut self,
        owner: &str,
        name: &str,
        multi: bool,
        attrs: &[Sexp],
        class_facets: bool,
    ) -> Result<SlotDef, Fault> {
        let mut slot = SlotDef::new(name, multi);
        for attr in attrs {
            let Some((Sexp::Symbol(key), values)) = attr.as_list().and_then(<[Sexp]>::split_first) else {
                return Err(Fault::Parse(format!("Expected a slot attribute for slot {name} but found {attr}")));
            };
            match key.as_str() {
                "default" => slot.default = self.static_default(name, multi, values)?,
                "default-dynamic" => {
                    slot.default = SlotDefault::Dynamic(shared_body(self.compile_all(values)?));
                }
                "type" => slot.constraints.types = type_list(values)?,
                "allowed-values" => slot.constraints.allowed_values = self.allowed_list(values)?,
                "allowed-symbols" => self.allowed_of_type(&mut slot.constraints, ValueType::Symbol, values)?,
                "allowed-strings" => self.allowed_of_type(&mut slot.constraints, ValueType::String, values)?,
                "allowed-lexemes" => self.allowed_of_type(&mut slot.constraints, ValueType::Lexeme, values)?,
                "allowed-integers" => self.allowed_of_type(&mut slot.constraints, ValueType::Integer, values)?,
                "allowed-floats" => self.allowed_of_type(&mut slot.constraints, ValueType::Float, values)?,
                "allowed-numbers" => self.allowed_of_type(&mut slot.constraints, ValueType::Number, values)?,
                "allowed-instance-names" => {
                    self.allowed_of_type(&mut slot.constraints, ValueType::InstanceName, values)?
                }
                "range" => slot.constraints.range = Some(range(name, values)?),
                "cardinality" => slot.constraints.cardinality = Some(cardinality(name, values)?),
                "allowed-classes" => {}
                facet if class_facets && IGNORED_FACETS.contains(&facet) => {}
                other => {
                    return Err(Fault::Parse(format!(
                        "Invalid slot attribute {other} for slot {name} of {owner}"
                    )))
                }
            }
        }
        if let SlotDefault::Static(value) = &slot.default {
            let stored = self.check_slot(&slot, value).map_err(|code| {
                Fault::Parse(format!(
                    "Default value of slot {name} violates its constraints (code {code})"
                ))
            })?;
            slot.default = SlotDefault::Static(stored);
        }
        Ok(slot)
    }

    fn static_default(&mut self, slot: &str, multi: bool, values: &[Sexp]) -> Result<SlotDefault, Fault> {
        match values {
            [v] if is_keyword(v, "NONE") => return Ok(SlotDefault::Required),
            [v] if is_keyword(v, "DERIVE") => return Ok(SlotDefault::Derive),
            [] if multi => return Ok(SlotDefault::Static(ForeignValue::Multifield(Vec::new()))),
            [] => return Err(Fault::Parse(format!("Missing default value for slot {slot}"))),
            [_, _, ..] if !multi => {
                return Err(Fault::Parse(format!(
                    "Single-field slot {slot} requires exactly one default value"
                )))
            }
            _ => {}
        }
        let exprs = self.compile_all(values)?;
        let value = self.eval_slot_exprs(&exprs, &mut Frame::default())?;
        self.retain_reachable(&value);
        Ok(SlotDefault::Static(value))
    }

    fn constants(&mut self, values: &[Sexp]) -> Result<Vec<ForeignValue>, Fault> {
        values
            .iter()
            .map(|v| {
                if v.is_atom() {
                    Ok(self.constant(v))
                } else {
                    Err(Fault::Parse(format!("Expected a constant but found {v}")))
                }
            })
            .collect()
    }

    fn allowed_list(&mut self, values: &[Sexp]) -> Result<Option<Vec<ForeignValue>>, Fault> {
        match values {
            [v] if is_keyword(v, "VARIABLE") => Ok(None),
            [] => Err(Fault::Parse("Expected at least one allowed value".into())),
            _ => self.constants(values).map(Some),
        }
    }

    fn allowed_of_type(&mut self, constraints: &mut Constraints, ty: ValueType, values: &[Sexp]) -> Result<(), Fault> {
        if let Some(allowed) = self.allowed_list(values)? {
            constraints.allowed_by_type.push((ty, allowed));
        }
        Ok(())
    }

    // ========================================================================
    // defclass
    // ========================================================================

    fn define_class(&mut self, items: &[Sexp]) -> Result<String, Fault> {
        let (name, rest) = self.header("defclass", items)?;
        if self.classes.values().any(|c| c.system && c.name == name) {
            return Err(Fault::Processing(format!("Cannot redefine system class {name}")));
        }
        let mut parents: Vec<ClassId> = Vec::new();
        let mut is_abstract = false;
        let mut slots: Vec<SlotDef> = Vec::new();
        for item in rest {
            let Some((Sexp::Symbol(key), body)) = item.as_list().and_then(<[Sexp]>::split_first) else {
                return Err(Fault::Parse(format!("Expected a class clause in defclass {name} but found {item}")));
            };
            match key.as_str() {
                "is-a" => {
                    for parent in body {
                        let parent_name = parent
                            .as_symbol()
                            .ok_or_else(|| Fault::Parse(format!("Expected a class name but found {parent}")))?;
                        let id = self
                            .resolve_class(parent_name)
                            .ok_or_else(|| Fault::Parse(format!("Unable to find class {parent_name}")))?;
                        parents.push(id);
                    }
                }
                "role" => match body.first().and_then(Sexp::as_symbol) {
                    Some("abstract") => is_abstract = true,
                    Some("concrete") => is_abstract = false,
                    _ => return Err(Fault::Parse(format!("Invalid role for defclass {name}"))),
                },
                "pattern-match" => {}
                "slot" | "single-slot" | "multislot" => {
                    let Some((Sexp::Symbol(slot_name), facets)) = body.split_first() else {
                        return Err(Fault::Parse(format!("Expected a slot name in defclass {name}")));
                    };
                    if slots.iter().any(|s| &s.name == slot_name) {
                        return Err(Fault::Parse(format!("Duplicate slot {slot_name} in defclass {name}")));
                    }
                    let multi = key == "multislot";
                    slots.push(self.slot_definition(&name, slot_name, multi, facets, true)?);
                }
                "message-handler" => {}
                other => {
                    return Err(Fault::Parse(format!("Invalid clause {other} in defclass {name}")))
                }
            }
        }
        if parents.is_empty() {
            return Err(Fault::Parse(format!("Defclass {name} requires an is-a clause")));
        }

        let module = self.current_module;
        let existing = self
            .classes
            .iter()
            .find(|(_, c)| c.module == module && c.name == name)
            .map(|(id, _)| *id);
        let id = match existing {
            Some(id) if self.instances.values().any(|i| i.class == id) => {
                return Err(Fault::Processing(format!(
                    "Cannot redefine defclass {name} while instances of it exist"
                )))
            }
            Some(id) if parents.iter().any(|p| self.is_subclass(*p, id)) => {
                return Err(Fault::Parse(format!("Defclass {name} cannot inherit from itself")))
            }
            Some(id) => id,
            None => {
                let id = ClassId(self.next_class);
                self.next_class += 1;
                id
            }
        };
        self.classes.insert(
            id,
            Class {
                name: name.clone(),
                module,
                parents,
                is_abstract,
                system: false,
                slots,
            },
        );
        Ok(name)
    }

    // ========================================================================
    // defmodule
    // ========================================================================

    fn define_module(&mut self, items: &[Sexp]) -> Result<String, Fault> {
        let Some((Sexp::Symbol(name), rest)) = items.split_first() else {
            return Err(Fault::Parse("Expected a name for defmodule".into()));
        };
        if name.contains("::") {
            return Err(Fault::Parse(format!("Defmodule name {name} cannot be qualified")));
        }
        let rest = match rest.first() {
            Some(Sexp::String(_)) => &rest[1..],
            _ => rest,
        };
        let mut def = ModuleDef::new(name.clone());
        for item in rest {
            match item.as_list() {
                Some([Sexp::Symbol(kind), spec @ ..]) if kind == "export" => {
                    def.exports.extend(port_spec(spec)?);
                }
                Some([Sexp::Symbol(kind), Sexp::Symbol(from), spec @ ..]) if kind == "import" => {
                    let from_id = self
                        .module_id(from)
                        .ok_or_else(|| Fault::Parse(format!("Unable to find defmodule {from}")))?;
                    if let Some(spec) = port_spec(spec)? {
                        def.imports.push((from_id, spec));
                    }
                }
                _ => {
                    return Err(Fault::Parse(format!(
                        "Expected an export or import specification in defmodule {name} but found {item}"
                    )))
                }
            }
        }
        let id = match self.module_id(name) {
            Some(id) if name == MAIN_MODULE => id,
            Some(_) => return Err(Fault::Processing(format!("Cannot redefine defmodule {name}"))),
            None => {
                let id = crate::native::ModuleId(self.next_module);
                self.next_module += 1;
                id
            }
        };
        self.modules.insert(id, def);
        self.current_module = id;
        Ok(name.clone())
    }

    // ========================================================================
    // deffunction
    // ========================================================================

    fn define_function(&mut self, items: &[Sexp]) -> Result<String, Fault> {
        let (name, rest) = self.header("deffunction", items)?;
        if builtin(&name).is_some() || is_special_form(&name) || self.udfs.contains_key(&name) {
            return Err(Fault::Processing(format!(
                "Deffunction {name} conflicts with an existing function"
            )));
        }
        let Some((Sexp::List(param_list), body)) = rest.split_first() else {
            return Err(Fault::Parse(format!("Expected a parameter list for deffunction {name}")));
        };
        let mut params = Vec::new();
        let mut wildcard = None;
        for (i, param) in param_list.iter().enumerate() {
            match param {
                Sexp::Variable(p) if !p.is_empty() && !is_global_name(p) => params.push(p.clone()),
                Sexp::MultiVariable(p) if !p.is_empty() && i + 1 == param_list.len() => {
                    wildcard = Some(p.clone())
                }
                other => {
                    return Err(Fault::Parse(format!(
                        "Invalid parameter {other} for deffunction {name}"
                    )))
                }
            }
        }

        // Registered first so the body can call itself.
        let placeholder = Rc::new(Deffunction {
            params: params.clone(),
            rest: wildcard.clone(),
            body: shared_body(Vec::new()),
        });
        let previous = self.deffunctions.insert(name.clone(), placeholder);
        match self.compile_all(body) {
            Ok(exprs) => {
                self.deffunctions.insert(
                    name.clone(),
                    Rc::new(Deffunction {
                        params,
                        rest: wildcard,
                        body: shared_body(exprs),
                    }),
                );
                Ok(name)
            }
            Err(fault) => {
                match previous {
                    Some(previous) => self.deffunctions.insert(name, previous),
                    None => self.deffunctions.remove(&name),
                };
                Err(fault)
            }
        }
    }

    // ========================================================================
    // deffacts, definstances, defglobal
    // ========================================================================

    fn define_deffacts(&mut self, items: &[Sexp]) -> Result<String, Fault> {
        let (name, rest) = self.header("deffacts", items)?;
        let facts = rest
            .iter()
            .map(|f| self.compile_fact(f))
            .collect::<Result<Vec<_>, _>>()?;
        let module = self.current_module;
        self.deffacts.retain(|d| !(d.name == name && d.module == module));
        self.deffacts.push(Deffacts {
            name: name.clone(),
            module,
            facts,
        });
        Ok(name)
    }

    fn define_definstances(&mut self, items: &[Sexp]) -> Result<String, Fault> {
        let (name, mut rest) = self.header("definstances", items)?;
        if rest.first().and_then(Sexp::as_symbol) == Some("active") {
            rest = &rest[1..];
            if let Some(Sexp::String(_)) = rest.first() {
                rest = &rest[1..];
            }
        }
        let mut instances = Vec::with_capacity(rest.len());
        for item in rest {
            let Some(parts) = item.as_list() else {
                return Err(Fault::Parse(format!(
                    "Expected an instance specification in definstances {name} but found {item}"
                )));
            };
            instances.push(self.compile_instance(parts)?);
        }
        let module = self.current_module;
        self.definstances.retain(|d| !(d.name == name && d.module == module));
        self.definstances.push(Definstances {
            name: name.clone(),
            module,
            instances,
        });
        Ok(name)
    }

    fn define_globals(&mut self, items: &[Sexp]) -> Result<String, Fault> {
        let mut rest = items;
        if let Some(Sexp::Symbol(module)) = rest.first() {
            self.current_module = self
                .module_id(module)
                .ok_or_else(|| Fault::Parse(format!("Unable to find defmodule {module}")))?;
            rest = &rest[1..];
        }
        let mut names = Vec::new();
        while !rest.is_empty() {
            let [Sexp::Variable(name), Sexp::Symbol(eq), value, tail @ ..] = rest else {
                return Err(Fault::Parse("Expected ?*name* = expression in defglobal".into()));
            };
            if eq != "=" || !is_global_name(name) {
                return Err(Fault::Parse(format!("Invalid defglobal variable ?{name}")));
            }
            let init = shared_body(vec![self.compile(value)?]);
            let initial = self.eval_slot_exprs(&init, &mut Frame::default())?;
            self.globals.insert(name.clone(), Defglobal { init });
            self.assign_global(name, initial);
            names.push(format!("?{name}"));
            rest = tail;
        }
        if names.is_empty() {
            return Err(Fault::Parse("Defglobal requires at least one variable".into()));
        }
        Ok(names.join(" "))
    }
}

/// Parse the `type` attribute; `?VARIABLE` allows every type.
fn type_list(values: &[Sexp]) -> Result<Option<Vec<ValueType>>, Fault> {
    if let [v] = values {
        if is_keyword(v, "VARIABLE") {
            return Ok(None);
        }
    }
    if values.is_empty() {
        return Err(Fault::Parse("Expected at least one type name".into()));
    }
    values
        .iter()
        .map(|v| {
            v.as_symbol()
                .and_then(ValueType::parse)
                .ok_or_else(|| Fault::Parse(format!("Invalid type {v}")))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn range_bound(slot: &str, value: &Sexp) -> Result<Option<f64>, Fault> {
    match value {
        Sexp::Integer(i) => Ok(Some(*i as f64)),
        Sexp::Float(f) => Ok(Some(*f)),
        v if is_keyword(v, "VARIABLE") => Ok(None),
        other => Err(Fault::Parse(format!("Invalid range bound {other} for slot {slot}"))),
    }
}

fn range(slot: &str, values: &[Sexp]) -> Result<(Option<f64>, Option<f64>), Fault> {
    let [low, high] = values else {
        return Err(Fault::Parse(format!("Range of slot {slot} requires two bounds")));
    };
    let low = range_bound(slot, low)?;
    let high = range_bound(slot, high)?;
    if let (Some(l), Some(h)) = (low, high) {
        if l > h {
            return Err(Fault::Parse(format!("Range of slot {slot} has its minimum above its maximum")));
        }
    }
    Ok((low, high))
}

fn cardinality(slot: &str, values: &[Sexp]) -> Result<(usize, Option<usize>), Fault> {
    let bound = |v: &Sexp| -> Result<Option<usize>, Fault> {
        match v {
            Sexp::Integer(i) if *i >= 0 => Ok(Some(*i as usize)),
            v if is_keyword(v, "VARIABLE") => Ok(None),
            other => Err(Fault::Parse(format!("Invalid cardinality {other} for slot {slot}"))),
        }
    };
    let [min, max] = values else {
        return Err(Fault::Parse(format!("Cardinality of slot {slot} requires two bounds")));
    };
    let min = bound(min)?.unwrap_or(0);
    let max = bound(max)?;
    if max.is_some_and(|m| m < min) {
        return Err(Fault::Parse(format!("Cardinality of slot {slot} has its minimum above its maximum")));
    }
    Ok((min, max))
}

/// `?ALL`, `?NONE`, or a construct type followed by `?ALL`, `?NONE` or names.
/// `None` means nothing is covered.
fn port_spec(spec: &[Sexp]) -> Result<Option<PortSpec>, Fault> {
    match spec {
        [v] if is_keyword(v, "ALL") => Ok(Some(PortSpec {
            construct: None,
            names: None,
        })),
        [v] if is_keyword(v, "NONE") => Ok(None),
        [Sexp::Symbol(construct), rest @ ..] if PORTABLE.contains(&construct.as_str()) => match rest {
            [v] if is_keyword(v, "ALL") => Ok(Some(PortSpec {
                construct: Some(construct.clone()),
                names: None,
            })),
            [v] if is_keyword(v, "NONE") => Ok(None),
            [] => Err(Fault::Parse(format!("Expected names after {construct}"))),
            names => names
                .iter()
                .map(|n| {
                    n.as_symbol()
                        .map(str::to_string)
                        .ok_or_else(|| Fault::Parse(format!("Expected a construct name but found {n}")))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(|names| {
                    Some(PortSpec {
                        construct: Some(construct.clone()),
                        names: Some(names),
                    })
                }),
        },
        _ => Err(Fault::Parse("Invalid export or import specification".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeEngine;
    use pretty_assertions::assert_eq;

    mod templates {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_slot_defaults() {
            let mut engine = MemoryEngine::new();
            engine
                .build(
                    "(deftemplate order (slot id (type INTEGER)) (slot state (default open)) \
                     (multislot tags) (slot price (type FLOAT)))",
                )
                .unwrap();
            let fact = engine.assert_string("(order)").unwrap();
            assert_eq!(engine.fact_slot(fact, "id"), Ok(ForeignValue::Integer(0)));
            let open = engine.create_lexeme(crate::native::LexemeKind::Symbol, "open");
            assert_eq!(engine.fact_slot(fact, "state"), Ok(ForeignValue::Lexeme(open)));
            assert_eq!(engine.fact_slot(fact, "tags"), Ok(ForeignValue::Multifield(vec![])));
            assert_eq!(engine.fact_slot(fact, "price"), Ok(ForeignValue::Float(0.0)));
        }

        #[test]
        fn test_required_slot() {
            let mut engine = MemoryEngine::new();
            engine.build("(deftemplate person (slot name (default ?NONE)))").unwrap();
            assert_eq!(engine.assert_string("(person)"), Err(ASE_COULD_NOT_ASSERT_ERROR));
            assert!(engine.assert_string("(person (name bob))").is_ok());
        }

        #[test]
        fn test_dynamic_default_evaluated_per_fact() {
            let mut engine = MemoryEngine::new();
            engine.build("(defglobal ?*next* = 0)").unwrap();
            engine
                .build("(deftemplate ticket (slot id (default-dynamic (bind ?*next* (+ ?*next* 1)))))")
                .unwrap();
            let first = engine.assert_string("(ticket)").unwrap();
            let second = engine.assert_string("(ticket)").unwrap();
            assert_eq!(engine.fact_slot(first, "id"), Ok(ForeignValue::Integer(1)));
            assert_eq!(engine.fact_slot(second, "id"), Ok(ForeignValue::Integer(2)));
        }

        #[test]
        fn test_invalid_definitions() {
            let mut engine = MemoryEngine::new();
            assert_eq!(engine.build("(deftemplate t (slot a) (slot a))"), Err(BE_PARSING_ERROR));
            assert_eq!(engine.build("(deftemplate t (slot a (colour red)))"), Err(BE_PARSING_ERROR));
            assert_eq!(
                engine.build("(deftemplate t (slot a (type INTEGER) (default x)))"),
                Err(BE_PARSING_ERROR)
            );
            assert_eq!(engine.build("(deftemplate t (slot a (range 5 1)))"), Err(BE_PARSING_ERROR));
        }

        #[test]
        fn test_redefinition_blocked_while_in_use() {
            let mut engine = MemoryEngine::new();
            engine.build("(deftemplate t (slot a))").unwrap();
            assert!(engine.build("(deftemplate t (slot a) (slot b))").is_ok());
            engine.assert_string("(t (a 1))").unwrap();
            assert_eq!(engine.build("(deftemplate t (slot c))"), Err(BE_COULD_NOT_BUILD_ERROR));
        }
    }

    mod classes {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_abstract_role() {
            let mut engine = MemoryEngine::new();
            engine.build("(defclass shape (is-a USER) (role abstract) (slot sides))").unwrap();
            engine.build("(defclass square (is-a shape))").unwrap();
            assert_eq!(engine.make_instance("(of shape)"), Err(MIE_COULD_NOT_CREATE_ERROR));
            let sq = engine.make_instance("(of square (sides 4))").unwrap();
            assert_eq!(engine.instance_name(sq).as_deref(), Some("gen1"));
            assert_eq!(engine.direct_get_slot(sq, "sides"), Ok(ForeignValue::Integer(4)));
        }

        #[test]
        fn test_requires_known_parent() {
            let mut engine = MemoryEngine::new();
            assert_eq!(engine.build("(defclass x (is-a NOPE))"), Err(BE_PARSING_ERROR));
            assert_eq!(engine.build("(defclass x (slot a))"), Err(BE_PARSING_ERROR));
            assert_eq!(engine.build("(defclass USER (is-a OBJECT))"), Err(BE_COULD_NOT_BUILD_ERROR));
        }

        #[test]
        fn test_facets_are_accepted() {
            let mut engine = MemoryEngine::new();
            engine
                .build("(defclass acct (is-a USER) (slot balance (type NUMBER) (access read-write) (create-accessor ?NONE)))")
                .unwrap();
        }
    }

    mod modules {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_unknown_import_source() {
            let mut engine = MemoryEngine::new();
            assert_eq!(engine.build("(defmodule B (import A ?ALL))"), Err(BE_PARSING_ERROR));
        }

        #[test]
        fn test_named_exports_limit_visibility() {
            let mut engine = MemoryEngine::new();
            engine.build("(defmodule A (export deftemplate shared))").unwrap();
            engine.build("(deftemplate shared (slot x))").unwrap();
            engine.build("(deftemplate private (slot x))").unwrap();
            engine.build("(defmodule B (import A deftemplate ?ALL))").unwrap();
            assert!(engine.find_template("shared").is_some());
            assert!(engine.find_template("private").is_none());
            assert!(engine.find_template("A::private").is_some());
        }

        #[test]
        fn test_module_cannot_be_redefined() {
            let mut engine = MemoryEngine::new();
            engine.build("(defmodule A)").unwrap();
            assert_eq!(engine.build("(defmodule A)"), Err(BE_COULD_NOT_BUILD_ERROR));
            assert!(engine.build("(defmodule MAIN (export ?ALL))").is_ok());
        }

        #[test]
        fn test_global_defined_in_other_module_resets() {
            let mut engine = MemoryEngine::new();
            engine.build("(defmodule A)").unwrap();
            engine.build("(defglobal ?*limit* = (* 2 21))").unwrap();
            engine.eval("(bind ?*limit* 0)").unwrap();
            engine.reset();
            assert_eq!(engine.eval("?*limit*"), Ok(ForeignValue::Integer(42)));
        }
    }

    mod functions {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_deffunction_cannot_shadow_builtin() {
            let mut engine = MemoryEngine::new();
            assert_eq!(engine.build("(deffunction + (?a) ?a)"), Err(BE_COULD_NOT_BUILD_ERROR));
        }

        #[test]
        fn test_failed_body_leaves_no_function() {
            let mut engine = MemoryEngine::new();
            assert_eq!(engine.build("(deffunction f (?x) (undefined-call ?x))"), Err(BE_PARSING_ERROR));
            assert!(!engine.function_exists("f"));
        }
    }

    mod dispatch {
        use super::*;
        use pretty_assertions::assert_eq;
        use std::cell::RefCell;

        struct Sink(RefCell<String>);

        impl crate::native::NativeRouter for Sink {
            fn query(&self, name: &str) -> bool {
                name == STDOUT
            }
            fn write(&self, _: &str, chunk: &str) {
                self.0.borrow_mut().push_str(chunk);
            }
            fn read(&self, _: &str) -> i32 {
                EOF
            }
            fn unread(&self, _: &str, _: i32) -> i32 {
                EOF
            }
            fn exit(&self, _: i32) {}
        }

        #[test]
        fn test_not_a_construct() {
            let mut engine = MemoryEngine::new();
            assert_eq!(engine.build("(+ 1 2)"), Err(BE_CONSTRUCT_NOT_FOUND_ERROR));
            assert_eq!(engine.build("foo"), Err(BE_CONSTRUCT_NOT_FOUND_ERROR));
        }

        #[test]
        fn test_rules_are_not_supported() {
            let mut engine = MemoryEngine::new();
            assert_eq!(
                engine.build("(defrule r (a) => (assert (b)))"),
                Err(BE_COULD_NOT_BUILD_ERROR)
            );
        }

        #[test]
        fn test_watch_compilations() {
            let mut engine = MemoryEngine::new();
            let sink = Rc::new(Sink(RefCell::new(String::new())));
            engine.add_router("sink", 10, sink.clone());
            engine.set_watch_state(Watch::Compilations, true);
            engine.build("(deftemplate foo (slot a))").unwrap();
            assert_eq!(sink.0.borrow().as_str(), "Defining deftemplate: foo\n");
        }
    }
}
