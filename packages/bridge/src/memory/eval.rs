//! Expression compiler and evaluator
//!
//! Source text is read into [`Sexp`] data, compiled into [`Expr`] trees and
//! then evaluated. Compilation resolves every function name and checks
//! argument counts, plus the declared types of literal arguments to
//! user-defined functions; failures there are parse errors. Everything that
//! goes wrong while evaluating is a processing error.

use super::reader::{read_all, read_one, Sexp};
use super::store::{split_qualified, Fault, Udf};
use super::MemoryEngine;
use crate::config::{MAX_EVAL_DEPTH, STDOUT};
use crate::native::codes::*;
use crate::native::{ClassId, ErrorCode, FactId, ForeignValue, InstanceId, LexemeKind, TemplateId, UdfFrame};
use crate::watch::Watch;
use std::collections::HashMap;
use std::rc::Rc;

/// Local variable bindings of one evaluation
#[derive(Debug, Default)]
pub(super) struct Frame {
    vars: HashMap<String, ForeignValue>,
}

pub(super) type BuiltinFn = fn(&mut MemoryEngine, Vec<ForeignValue>) -> Result<ForeignValue, Fault>;

/// A function implemented by the engine itself
#[derive(Debug)]
pub(super) struct Builtin {
    pub name: &'static str,
    pub min: usize,
    pub max: Option<usize>,
    pub run: BuiltinFn,
}

/// Compiled expression
#[derive(Debug, Clone)]
pub(super) enum Expr {
    Constant(Sexp),
    Local(String),
    /// `$?name`, spliced into function arguments
    LocalMulti(String),
    Global(String),
    Builtin(&'static Builtin, Vec<Expr>),
    Deffunction(String, Vec<Expr>),
    Udf(String, Vec<Expr>),
    If {
        condition: Box<Expr>,
        then: Vec<Expr>,
        otherwise: Vec<Expr>,
    },
    While {
        condition: Box<Expr>,
        body: Vec<Expr>,
    },
    Bind {
        name: String,
        global: bool,
        values: Vec<Expr>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Progn(Vec<Expr>),
    Assert(Vec<FactSpec>),
    MakeInstance(Box<InstanceSpec>),
}

/// A fact to assert, as written in `assert`, `deffacts` or a fact file
#[derive(Debug, Clone)]
pub(super) enum FactSpec {
    Template {
        template: TemplateId,
        slots: Vec<(String, Vec<Expr>)>,
    },
    Ordered {
        relation: String,
        values: Vec<Expr>,
    },
}

/// An instance to create, as written in `make-instance`, `definstances` or an instance file
#[derive(Debug, Clone)]
pub(super) struct InstanceSpec {
    pub name: Option<Expr>,
    pub class: ClassId,
    pub slots: Vec<(String, Vec<Expr>)>,
}

/// Argument problems of a user-defined function call
enum ArgProblem {
    Count(String),
    Type(String),
}

const SPECIAL_FORMS: [&str; 8] = ["if", "while", "bind", "and", "or", "progn", "assert", "make-instance"];

pub(super) fn is_global_name(name: &str) -> bool {
    name.len() > 2 && name.starts_with('*') && name.ends_with('*')
}

pub(super) fn builtin(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

pub(super) fn is_special_form(name: &str) -> bool {
    SPECIAL_FORMS.contains(&name)
}

fn check_arity(name: &str, count: usize, min: usize, max: Option<usize>) -> Result<(), String> {
    if count < min {
        return Err(format!("Function {name} expected at least {min} argument(s)"));
    }
    if let Some(max) = max {
        if count > max {
            return Err(format!("Function {name} expected no more than {max} argument(s)"));
        }
    }
    Ok(())
}

/// Whether a value satisfying `have` is accepted by the type codes `want`
fn accepts(want: &[char], have: &[char]) -> bool {
    want.is_empty() || want.contains(&'*') || have.iter().any(|c| want.contains(c))
}

impl MemoryEngine {
    // ========================================================================
    // Compilation
    // ========================================================================

    pub(super) fn compile(&self, sexp: &Sexp) -> Result<Expr, Fault> {
        match sexp {
            Sexp::Variable(name) if is_global_name(name) => {
                if !self.global_values.contains_key(name) {
                    return Err(Fault::Parse(format!(
                        "Global variable ?{name} was referenced, but is not defined"
                    )));
                }
                Ok(Expr::Global(name.clone()))
            }
            Sexp::Variable(name) if name.is_empty() => {
                Err(Fault::Parse("Wildcards are not allowed in expressions".into()))
            }
            Sexp::Variable(name) => Ok(Expr::Local(name.clone())),
            Sexp::MultiVariable(name) if name.is_empty() => {
                Err(Fault::Parse("Wildcards are not allowed in expressions".into()))
            }
            Sexp::MultiVariable(name) => Ok(Expr::LocalMulti(name.clone())),
            Sexp::List(items) => self.compile_call(items),
            atom => Ok(Expr::Constant(atom.clone())),
        }
    }

    pub(super) fn compile_all(&self, sexps: &[Sexp]) -> Result<Vec<Expr>, Fault> {
        sexps.iter().map(|s| self.compile(s)).collect()
    }

    fn compile_call(&self, items: &[Sexp]) -> Result<Expr, Fault> {
        let Some((head, rest)) = items.split_first() else {
            return Err(Fault::Parse("Expected a function name".into()));
        };
        let Some(name) = head.as_symbol() else {
            return Err(Fault::Parse(format!("Expected a function name but found {head}")));
        };
        match name {
            "if" => return self.compile_if(rest),
            "while" => return self.compile_while(rest),
            "bind" => return self.compile_bind(rest),
            "and" => return Ok(Expr::And(self.compile_all(rest)?)),
            "or" => return Ok(Expr::Or(self.compile_all(rest)?)),
            "progn" => return Ok(Expr::Progn(self.compile_all(rest)?)),
            "assert" => {
                if rest.is_empty() {
                    return Err(Fault::Parse("Function assert expected at least 1 argument(s)".into()));
                }
                let specs = rest.iter().map(|f| self.compile_fact(f)).collect::<Result<_, _>>()?;
                return Ok(Expr::Assert(specs));
            }
            "make-instance" => return Ok(Expr::MakeInstance(Box::new(self.compile_instance(rest)?))),
            _ => {}
        }

        let args = self.compile_all(rest)?;
        let spliced = args.iter().any(|a| matches!(a, Expr::LocalMulti(_)));

        if let Some(udf) = self.udfs.get(name) {
            if !spliced {
                self.check_udf_literals(name, udf, &args)?;
            }
            return Ok(Expr::Udf(name.to_string(), args));
        }
        if let Some(function) = self.deffunctions.get(name) {
            if !spliced {
                let max = function.rest.is_none().then_some(function.params.len());
                check_arity(name, args.len(), function.params.len(), max).map_err(Fault::Parse)?;
            }
            return Ok(Expr::Deffunction(name.to_string(), args));
        }
        if let Some(builtin) = builtin(name) {
            if !spliced {
                check_arity(name, args.len(), builtin.min, builtin.max).map_err(Fault::Parse)?;
            }
            return Ok(Expr::Builtin(builtin, args));
        }
        Err(Fault::Parse(format!("Missing function declaration for {name}")))
    }

    fn check_udf_literals(&self, name: &str, udf: &Udf, args: &[Expr]) -> Result<(), Fault> {
        let reg = &udf.registration;
        check_arity(
            name,
            args.len(),
            reg.min_args as usize,
            reg.max_args.map(|m| m as usize),
        )
        .map_err(Fault::Parse)?;
        for (i, arg) in args.iter().enumerate() {
            if let Expr::Constant(sexp) = arg {
                let want = udf.types_for(i);
                if !accepts(want, &literal_codes(sexp)) {
                    return Err(Fault::Parse(format!(
                        "Function {name} expected argument #{} to be of type {}",
                        i + 1,
                        want.iter().collect::<String>()
                    )));
                }
            }
        }
        Ok(())
    }

    fn compile_if(&self, rest: &[Sexp]) -> Result<Expr, Fault> {
        let Some((condition, rest)) = rest.split_first() else {
            return Err(Fault::Parse("Function if expected a condition".into()));
        };
        match rest.first().and_then(Sexp::as_symbol) {
            Some("then") => {}
            _ => return Err(Fault::Parse("Expected the 'then' keyword in if function".into())),
        }
        let body = &rest[1..];
        let split = body.iter().position(|s| s.as_symbol() == Some("else"));
        let (then, otherwise) = match split {
            Some(at) => (&body[..at], &body[at + 1..]),
            None => (body, &[][..]),
        };
        Ok(Expr::If {
            condition: Box::new(self.compile(condition)?),
            then: self.compile_all(then)?,
            otherwise: self.compile_all(otherwise)?,
        })
    }

    fn compile_while(&self, rest: &[Sexp]) -> Result<Expr, Fault> {
        let Some((condition, mut body)) = rest.split_first() else {
            return Err(Fault::Parse("Function while expected a condition".into()));
        };
        if body.first().and_then(Sexp::as_symbol) == Some("do") {
            body = &body[1..];
        }
        Ok(Expr::While {
            condition: Box::new(self.compile(condition)?),
            body: self.compile_all(body)?,
        })
    }

    fn compile_bind(&self, rest: &[Sexp]) -> Result<Expr, Fault> {
        let Some((Sexp::Variable(name), values)) = rest.split_first() else {
            return Err(Fault::Parse("Function bind expected a variable as its first argument".into()));
        };
        if name.is_empty() {
            return Err(Fault::Parse("Function bind expected a variable as its first argument".into()));
        }
        let global = is_global_name(name);
        if global && !self.global_values.contains_key(name) {
            return Err(Fault::Parse(format!(
                "Global variable ?{name} was referenced, but is not defined"
            )));
        }
        Ok(Expr::Bind {
            name: name.clone(),
            global,
            values: self.compile_all(values)?,
        })
    }

    /// Compile a fact pattern such as `(foo (a 1))` or `(numbers 1 2 3)`.
    pub(super) fn compile_fact(&self, sexp: &Sexp) -> Result<FactSpec, Fault> {
        let Some((relation, rest)) = sexp.as_list().and_then(<[Sexp]>::split_first) else {
            return Err(Fault::Parse(format!("Expected a fact but found {sexp}")));
        };
        let Some(relation) = relation.as_symbol() else {
            return Err(Fault::Parse(format!("Expected a relation name but found {relation}")));
        };
        if let Some(id) = self.resolve_template(relation) {
            if let Some(template) = self.templates.get(&id).filter(|t| !t.implied) {
                let mut slots: Vec<(String, Vec<Expr>)> = Vec::new();
                for item in rest {
                    let Some((Sexp::Symbol(slot_name), values)) = item.as_list().and_then(<[Sexp]>::split_first)
                    else {
                        return Err(Fault::Parse(format!(
                            "Expected a slot name for deftemplate {} but found {item}",
                            template.name
                        )));
                    };
                    let Some(def) = template.slots.iter().find(|s| &s.name == slot_name) else {
                        return Err(Fault::Parse(format!(
                            "Invalid slot {slot_name} not defined in corresponding deftemplate {}",
                            template.name
                        )));
                    };
                    if slots.iter().any(|(n, _)| n == slot_name) {
                        return Err(Fault::Parse(format!("Multiple occurrences of slot {slot_name}")));
                    }
                    if !def.multi && values.len() != 1 {
                        return Err(Fault::Parse(format!(
                            "Single-field slot {slot_name} of deftemplate {} requires exactly one value",
                            template.name
                        )));
                    }
                    slots.push((slot_name.clone(), self.compile_all(values)?));
                }
                return Ok(FactSpec::Template { template: id, slots });
            }
        }
        Ok(FactSpec::Ordered {
            relation: relation.to_string(),
            values: self.compile_all(rest)?,
        })
    }

    /// Compile `[name] of class (slot value...)*`, the arguments of `make-instance`.
    pub(super) fn compile_instance(&self, items: &[Sexp]) -> Result<InstanceSpec, Fault> {
        let (name, rest) = match items {
            [Sexp::Symbol(of), rest @ ..] if of == "of" => (None, rest),
            [name, Sexp::Symbol(of), rest @ ..] if of == "of" => (Some(self.compile(name)?), rest),
            _ => return Err(Fault::Parse("Expected 'of' keyword in instance specification".into())),
        };
        let Some((class_name, slot_items)) = rest.split_first() else {
            return Err(Fault::Parse("Expected a class name in instance specification".into()));
        };
        let Some(class_name) = class_name.as_symbol() else {
            return Err(Fault::Parse(format!("Expected a class name but found {class_name}")));
        };
        let class = self
            .resolve_class(class_name)
            .ok_or_else(|| Fault::Parse(format!("Unable to find class {class_name}")))?;
        let mut slots = Vec::new();
        for item in slot_items {
            let Some((Sexp::Symbol(slot_name), values)) = item.as_list().and_then(<[Sexp]>::split_first) else {
                return Err(Fault::Parse(format!("Expected a slot override but found {item}")));
            };
            slots.push((slot_name.clone(), self.compile_all(values)?));
        }
        Ok(InstanceSpec { name, class, slots })
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Read, compile and evaluate one expression.
    pub(super) fn eval_text(&mut self, text: &str) -> Result<ForeignValue, Fault> {
        let sexp = read_one(text)?;
        let expr = self.compile(&sexp)?;
        self.evaluate(&expr, &mut Frame::default())
    }

    pub(super) fn constant(&mut self, sexp: &Sexp) -> ForeignValue {
        match sexp {
            Sexp::Integer(i) => ForeignValue::Integer(*i),
            Sexp::Float(f) => ForeignValue::Float(*f),
            Sexp::String(s) => self.string(s),
            Sexp::Symbol(s) => self.symbol(s),
            Sexp::InstanceName(s) => ForeignValue::Lexeme(self.lexemes.intern(LexemeKind::InstanceName, s)),
            _ => ForeignValue::Void,
        }
    }

    pub(super) fn evaluate(&mut self, expr: &Expr, frame: &mut Frame) -> Result<ForeignValue, Fault> {
        match expr {
            Expr::Constant(sexp) => Ok(self.constant(sexp)),
            Expr::Local(name) | Expr::LocalMulti(name) => frame
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| Fault::Processing(format!("Variable ?{name} is unbound"))),
            Expr::Global(name) => self
                .global_values
                .get(name)
                .cloned()
                .ok_or_else(|| Fault::Processing(format!("Global variable ?{name} is unbound"))),
            Expr::Builtin(builtin, args) => {
                let values = self.eval_args(args, frame)?;
                check_arity(builtin.name, values.len(), builtin.min, builtin.max).map_err(Fault::Processing)?;
                (builtin.run)(self, values)
            }
            Expr::Deffunction(name, args) => {
                let values = self.eval_args(args, frame)?;
                self.call_deffunction(name, values)
            }
            Expr::Udf(name, args) => {
                let values = self.eval_args(args, frame)?;
                self.call_udf(name, values)
            }
            Expr::If {
                condition,
                then,
                otherwise,
            } => {
                let test = self.evaluate(condition, frame)?;
                if self.is_false(&test) {
                    self.eval_body(otherwise, frame)
                } else {
                    self.eval_body(then, frame)
                }
            }
            Expr::While { condition, body } => {
                loop {
                    let test = self.evaluate(condition, frame)?;
                    if self.is_false(&test) {
                        break;
                    }
                    self.eval_body(body, frame)?;
                }
                Ok(self.boolean(false))
            }
            Expr::Bind { name, global, values } => {
                if values.is_empty() {
                    if !*global {
                        frame.vars.remove(name);
                    }
                    return Ok(self.boolean(false));
                }
                let value = self.eval_slot_exprs(values, frame)?;
                if *global {
                    self.assign_global(name, value.clone());
                } else {
                    frame.vars.insert(name.clone(), value.clone());
                }
                Ok(value)
            }
            Expr::And(args) => {
                for arg in args {
                    let v = self.evaluate(arg, frame)?;
                    if self.is_false(&v) {
                        return Ok(self.boolean(false));
                    }
                }
                Ok(self.boolean(true))
            }
            Expr::Or(args) => {
                for arg in args {
                    let v = self.evaluate(arg, frame)?;
                    if !self.is_false(&v) {
                        return Ok(self.boolean(true));
                    }
                }
                Ok(self.boolean(false))
            }
            Expr::Progn(body) => self.eval_body(body, frame),
            Expr::Assert(specs) => {
                let mut last = self.boolean(false);
                for spec in specs {
                    last = ForeignValue::Fact(self.assert_spec(spec, frame)?);
                }
                Ok(last)
            }
            Expr::MakeInstance(spec) => {
                let id = self.make_from_spec(spec, frame, true)?;
                let name = self.instances.get(&id).map(|i| i.name.clone()).unwrap_or_default();
                Ok(ForeignValue::Lexeme(self.lexemes.intern(LexemeKind::InstanceName, &name)))
            }
        }
    }

    /// Value of the last expression, or `FALSE` for an empty body
    pub(super) fn eval_body(&mut self, body: &[Expr], frame: &mut Frame) -> Result<ForeignValue, Fault> {
        let mut last = self.boolean(false);
        for expr in body {
            last = self.evaluate(expr, frame)?;
        }
        Ok(last)
    }

    /// Evaluate function arguments, splicing `$?` variables.
    fn eval_args(&mut self, args: &[Expr], frame: &mut Frame) -> Result<Vec<ForeignValue>, Fault> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match (arg, self.evaluate(arg, frame)?) {
                (Expr::LocalMulti(_), ForeignValue::Multifield(items)) => values.extend(items),
                (_, value) => values.push(value),
            }
        }
        Ok(values)
    }

    /// A single expression yields its value; several yield one flattened multifield.
    pub(super) fn eval_slot_exprs(&mut self, exprs: &[Expr], frame: &mut Frame) -> Result<ForeignValue, Fault> {
        if let [single] = exprs {
            if !matches!(single, Expr::LocalMulti(_)) {
                return self.evaluate(single, frame);
            }
        }
        let mut items = Vec::new();
        for expr in exprs {
            match self.evaluate(expr, frame)? {
                ForeignValue::Multifield(inner) => items.extend(inner),
                ForeignValue::Void => {}
                value => items.push(value),
            }
        }
        Ok(ForeignValue::Multifield(items))
    }

    pub(super) fn assert_spec(&mut self, spec: &FactSpec, frame: &mut Frame) -> Result<FactId, Fault> {
        match spec {
            FactSpec::Template { template, slots } => {
                let mut given = Vec::with_capacity(slots.len());
                for (name, exprs) in slots {
                    given.push((name.clone(), self.eval_slot_exprs(exprs, frame)?));
                }
                self.assert_slots(*template, given)
            }
            FactSpec::Ordered { relation, values } => {
                let template = self.implied_template(relation)?;
                let mut items = Vec::with_capacity(values.len());
                for expr in values {
                    match self.evaluate(expr, frame)? {
                        ForeignValue::Multifield(inner) => items.extend(inner),
                        ForeignValue::Void => {}
                        value => items.push(value),
                    }
                }
                Ok(self.insert_fact(template, vec![ForeignValue::Multifield(items)]))
            }
        }
    }

    pub(super) fn make_from_spec(
        &mut self,
        spec: &InstanceSpec,
        frame: &mut Frame,
        trace: bool,
    ) -> Result<InstanceId, Fault> {
        let name = match &spec.name {
            Some(expr) => {
                let value = self.evaluate(expr, frame)?;
                match self.lexeme_of(&value) {
                    Some(lexeme) => Some(lexeme.text.to_string()),
                    None => {
                        return Err(Fault::Processing(format!(
                            "Instance name must be a symbol but found {}",
                            self.value_text(&value)
                        )))
                    }
                }
            }
            None => None,
        };
        let mut given = Vec::with_capacity(spec.slots.len());
        for (slot, exprs) in &spec.slots {
            given.push((slot.clone(), self.eval_slot_exprs(exprs, frame)?));
        }
        self.insert_instance(spec.class, name, given, trace)
    }

    fn call_deffunction(&mut self, name: &str, mut values: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
        let Some(function) = self.deffunctions.get(name).cloned() else {
            return Err(Fault::Processing(format!("Deffunction {name} no longer exists")));
        };
        let max = function.rest.is_none().then_some(function.params.len());
        check_arity(name, values.len(), function.params.len(), max).map_err(Fault::Processing)?;
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(Fault::Processing(format!(
                "Maximum evaluation depth of {MAX_EVAL_DEPTH} exceeded in {name}"
            )));
        }
        let rest = values.split_off(function.params.len());
        let mut frame = Frame::default();
        for (param, value) in function.params.iter().zip(values) {
            frame.vars.insert(param.clone(), value);
        }
        if let Some(rest_name) = &function.rest {
            frame.vars.insert(rest_name.clone(), ForeignValue::Multifield(rest));
        }
        if self.watching.contains(&Watch::Deffunctions) {
            self.emit(STDOUT, &format!("DFN >> {name}\n"));
        }
        self.depth += 1;
        let result = self.eval_body(&function.body, &mut frame);
        self.depth -= 1;
        if self.watching.contains(&Watch::Deffunctions) {
            self.emit(STDOUT, &format!("DFN << {name}\n"));
        }
        result
    }

    /// Type codes a value satisfies
    fn value_codes(&self, value: &ForeignValue) -> Vec<char> {
        match value {
            ForeignValue::Float(_) => vec!['d'],
            ForeignValue::Integer(_) => vec!['l'],
            ForeignValue::Lexeme(id) => match self.lexemes.get(*id).map(|l| l.kind) {
                Some(LexemeKind::Symbol)
                    if *id == self.lexemes.true_symbol || *id == self.lexemes.false_symbol =>
                {
                    vec!['y', 'b']
                }
                Some(LexemeKind::Symbol) => vec!['y'],
                Some(LexemeKind::String) => vec!['s'],
                Some(LexemeKind::InstanceName) => vec!['n'],
                None => Vec::new(),
            },
            ForeignValue::Fact(_) => vec!['f'],
            ForeignValue::Instance(_) => vec!['i'],
            ForeignValue::External(_) => vec!['e'],
            ForeignValue::Multifield(_) => vec!['m'],
            ForeignValue::Void => vec!['v'],
            ForeignValue::Unsupported(_) => Vec::new(),
        }
    }

    fn check_udf_args(&self, name: &str, values: &[ForeignValue]) -> Result<(), ArgProblem> {
        let Some(udf) = self.udfs.get(name) else {
            return Err(ArgProblem::Count(format!("Missing function declaration for {name}")));
        };
        let reg = &udf.registration;
        check_arity(
            name,
            values.len(),
            reg.min_args as usize,
            reg.max_args.map(|m| m as usize),
        )
        .map_err(ArgProblem::Count)?;
        for (i, value) in values.iter().enumerate() {
            let want = udf.types_for(i);
            if !accepts(want, &self.value_codes(value)) {
                return Err(ArgProblem::Type(format!(
                    "Function {name} expected argument #{} to be of type {}",
                    i + 1,
                    want.iter().collect::<String>()
                )));
            }
        }
        Ok(())
    }

    fn call_udf(&mut self, name: &str, values: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
        match self.check_udf_args(name, &values) {
            Ok(()) => {}
            Err(ArgProblem::Count(msg) | ArgProblem::Type(msg)) => return Err(Fault::Processing(msg)),
        }
        self.invoke_udf(name, values)
    }

    fn invoke_udf(&mut self, name: &str, values: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
        let Some(handler) = self.udfs.get(name).map(|u| u.registration.handler.clone()) else {
            return Err(Fault::Processing(format!("Missing function declaration for {name}")));
        };
        let mut frame = UdfFrame::new(values);
        self.depth += 1;
        handler(self, &mut frame);
        self.depth -= 1;
        if frame.error_thrown {
            return Err(Fault::Processing(format!("Function {name} signalled an error")));
        }
        Ok(frame.result)
    }

    /// Call any function by name with evaluated arguments, reporting FCBE codes.
    pub(super) fn call_named(&mut self, name: &str, args: Vec<ForeignValue>) -> Result<ForeignValue, ErrorCode> {
        if self.udfs.contains_key(name) {
            match self.check_udf_args(name, &args) {
                Ok(()) => {}
                Err(ArgProblem::Count(msg)) => {
                    self.report(&Fault::Processing(msg));
                    return Err(FCBE_ARGUMENT_COUNT_ERROR);
                }
                Err(ArgProblem::Type(msg)) => {
                    self.report(&Fault::Processing(msg));
                    return Err(FCBE_ARGUMENT_TYPE_ERROR);
                }
            }
            return self.invoke_udf(name, args).map_err(|fault| {
                self.report(&fault);
                FCBE_PROCESSING_ERROR
            });
        }

        let (min, max) = if let Some(function) = self.deffunctions.get(name) {
            let max = function.rest.is_none().then_some(function.params.len());
            (function.params.len(), max)
        } else if let Some(builtin) = builtin(name) {
            (builtin.min, builtin.max)
        } else if is_special_form(name) {
            return Err(FCBE_INVALID_FUNCTION_ERROR);
        } else {
            return Err(FCBE_FUNCTION_NOT_FOUND_ERROR);
        };
        if let Err(msg) = check_arity(name, args.len(), min, max) {
            self.report(&Fault::Processing(msg));
            return Err(FCBE_ARGUMENT_COUNT_ERROR);
        }
        let result = match builtin(name) {
            Some(builtin) if !self.deffunctions.contains_key(name) => (builtin.run)(self, args),
            _ => self.call_deffunction(name, args),
        };
        result.map_err(|fault| {
            self.report(&fault);
            FCBE_PROCESSING_ERROR
        })
    }

    pub(super) fn function_known(&self, name: &str) -> bool {
        is_special_form(name)
            || builtin(name).is_some()
            || self.deffunctions.contains_key(name)
            || self.udfs.contains_key(name)
    }
}

/// Type codes a literal satisfies
fn literal_codes(sexp: &Sexp) -> Vec<char> {
    match sexp {
        Sexp::Integer(_) => vec!['l'],
        Sexp::Float(_) => vec!['d'],
        Sexp::String(_) => vec!['s'],
        Sexp::Symbol(s) if s == crate::config::TRUE_SYMBOL || s == crate::config::FALSE_SYMBOL => {
            vec!['y', 'b']
        }
        Sexp::Symbol(_) => vec!['y'],
        Sexp::InstanceName(_) => vec!['n'],
        _ => vec!['*'],
    }
}

// ============================================================================
// Builtin functions
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    fn into_value(self) -> ForeignValue {
        match self {
            Number::Int(i) => ForeignValue::Integer(i),
            Number::Float(f) => ForeignValue::Float(f),
        }
    }
}

fn number(engine: &MemoryEngine, function: &str, position: usize, value: &ForeignValue) -> Result<Number, Fault> {
    match value {
        ForeignValue::Integer(i) => Ok(Number::Int(*i)),
        ForeignValue::Float(f) => Ok(Number::Float(*f)),
        other => Err(Fault::Processing(format!(
            "Function {function} expected argument #{position} to be of type integer or float but found {}",
            engine.value_text(other)
        ))),
    }
}

fn numbers(engine: &MemoryEngine, function: &str, args: &[ForeignValue]) -> Result<Vec<Number>, Fault> {
    args.iter()
        .enumerate()
        .map(|(i, v)| number(engine, function, i + 1, v))
        .collect()
}

fn integer_arg(engine: &MemoryEngine, function: &str, position: usize, value: &ForeignValue) -> Result<i64, Fault> {
    match value {
        ForeignValue::Integer(i) => Ok(*i),
        other => Err(Fault::Processing(format!(
            "Function {function} expected argument #{position} to be of type integer but found {}",
            engine.value_text(other)
        ))),
    }
}

fn multifield_arg(
    engine: &MemoryEngine,
    function: &str,
    position: usize,
    value: &ForeignValue,
) -> Result<Vec<ForeignValue>, Fault> {
    match value {
        ForeignValue::Multifield(items) => Ok(items.clone()),
        other => Err(Fault::Processing(format!(
            "Function {function} expected argument #{position} to be of type multifield but found {}",
            engine.value_text(other)
        ))),
    }
}

/// Raw text of a lexeme argument
fn lexeme_arg(engine: &MemoryEngine, function: &str, position: usize, value: &ForeignValue) -> Result<String, Fault> {
    engine
        .lexeme_of(value)
        .map(|l| l.text.to_string())
        .ok_or_else(|| {
            Fault::Processing(format!(
                "Function {function} expected argument #{position} to be of type lexeme but found {}",
                engine.value_text(value)
            ))
        })
}

/// Text as concatenated by `str-cat`: strings and symbols without decoration
fn concat_text(engine: &MemoryEngine, function: &str, position: usize, value: &ForeignValue) -> Result<String, Fault> {
    match value {
        ForeignValue::Multifield(_) => Err(Fault::Processing(format!(
            "Function {function} expected argument #{position} to be a single field"
        ))),
        ForeignValue::Lexeme(_) => match engine.lexeme_of(value) {
            Some(l) if l.kind == LexemeKind::InstanceName => Ok(format!("[{}]", l.text)),
            Some(l) => Ok(l.text.to_string()),
            None => Ok(String::new()),
        },
        other => Ok(engine.value_text(other)),
    }
}

fn arithmetic(
    engine: &MemoryEngine,
    function: &str,
    args: &[ForeignValue],
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<ForeignValue, Fault> {
    let nums = numbers(engine, function, args)?;
    let mut acc = nums[0];
    for n in &nums[1..] {
        acc = match (acc, *n) {
            (Number::Int(a), Number::Int(b)) => Number::Int(
                int_op(a, b).ok_or_else(|| Fault::Processing(format!("Integer overflow in {function}")))?,
            ),
            (a, b) => Number::Float(float_op(a.as_f64(), b.as_f64())),
        };
    }
    Ok(acc.into_value())
}

fn bi_add(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    arithmetic(e, "+", &args, i64::checked_add, |a, b| a + b)
}

fn bi_sub(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    arithmetic(e, "-", &args, i64::checked_sub, |a, b| a - b)
}

fn bi_mul(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    arithmetic(e, "*", &args, i64::checked_mul, |a, b| a * b)
}

fn bi_div(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let nums = numbers(e, "/", &args)?;
    let mut acc = nums[0].as_f64();
    for n in &nums[1..] {
        if n.as_f64() == 0.0 {
            return Err(Fault::Processing("Attempt to divide by zero in / function".into()));
        }
        acc /= n.as_f64();
    }
    Ok(ForeignValue::Float(acc))
}

fn bi_int_div(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let nums = numbers(e, "div", &args)?;
    let mut acc = nums[0].as_f64() as i64;
    for n in &nums[1..] {
        let d = n.as_f64() as i64;
        acc = acc
            .checked_div(d)
            .ok_or_else(|| Fault::Processing("Attempt to divide by zero in div function".into()))?;
    }
    Ok(ForeignValue::Integer(acc))
}

fn bi_mod(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let nums = numbers(e, "mod", &args)?;
    match (nums[0], nums[1]) {
        (Number::Int(a), Number::Int(b)) => a
            .checked_rem(b)
            .map(ForeignValue::Integer)
            .ok_or_else(|| Fault::Processing("Attempt to divide by zero in mod function".into())),
        (_, b) if b.as_f64() == 0.0 => Err(Fault::Processing("Attempt to divide by zero in mod function".into())),
        (a, b) => Ok(ForeignValue::Float(a.as_f64() % b.as_f64())),
    }
}

fn bi_abs(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    Ok(match number(e, "abs", 1, &args[0])? {
        Number::Int(i) => ForeignValue::Integer(i.wrapping_abs()),
        Number::Float(f) => ForeignValue::Float(f.abs()),
    })
}

fn bi_integer(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    Ok(ForeignValue::Integer(match number(e, "integer", 1, &args[0])? {
        Number::Int(i) => i,
        Number::Float(f) => f as i64,
    }))
}

fn bi_float(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    Ok(ForeignValue::Float(number(e, "float", 1, &args[0])?.as_f64()))
}

fn extreme(e: &MemoryEngine, function: &str, args: &[ForeignValue], pick_later: fn(f64, f64) -> bool) -> Result<ForeignValue, Fault> {
    let nums = numbers(e, function, args)?;
    let mut best = nums[0];
    for n in &nums[1..] {
        if pick_later(best.as_f64(), n.as_f64()) {
            best = *n;
        }
    }
    Ok(best.into_value())
}

fn bi_min(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    extreme(e, "min", &args, |best, n| n < best)
}

fn bi_max(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    extreme(e, "max", &args, |best, n| n > best)
}

fn compare_chain(e: &MemoryEngine, function: &str, args: &[ForeignValue], ok: fn(f64, f64) -> bool) -> Result<ForeignValue, Fault> {
    let nums = numbers(e, function, args)?;
    let holds = nums.windows(2).all(|w| ok(w[0].as_f64(), w[1].as_f64()));
    Ok(e.boolean(holds))
}

fn bi_num_eq(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    compare_chain(e, "=", &args, |a, b| a == b)
}

fn bi_num_ne(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let nums = numbers(e, "<>", &args)?;
    let first = nums[0].as_f64();
    Ok(e.boolean(nums[1..].iter().all(|n| n.as_f64() != first)))
}

fn bi_lt(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    compare_chain(e, "<", &args, |a, b| a < b)
}

fn bi_gt(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    compare_chain(e, ">", &args, |a, b| a > b)
}

fn bi_le(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    compare_chain(e, "<=", &args, |a, b| a <= b)
}

fn bi_ge(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    compare_chain(e, ">=", &args, |a, b| a >= b)
}

fn bi_eq(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    Ok(e.boolean(args[1..].iter().all(|v| *v == args[0])))
}

fn bi_neq(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    Ok(e.boolean(args[1..].iter().all(|v| *v != args[0])))
}

fn bi_not(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let negated = e.is_false(&args[0]);
    Ok(e.boolean(negated))
}

fn bi_str_cat(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let mut text = String::new();
    for (i, arg) in args.iter().enumerate() {
        text.push_str(&concat_text(e, "str-cat", i + 1, arg)?);
    }
    Ok(e.string(&text))
}

fn bi_sym_cat(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let mut text = String::new();
    for (i, arg) in args.iter().enumerate() {
        text.push_str(&concat_text(e, "sym-cat", i + 1, arg)?);
    }
    Ok(e.symbol(&text))
}

fn bi_str_length(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let text = lexeme_arg(e, "str-length", 1, &args[0])?;
    Ok(ForeignValue::Integer(text.chars().count() as i64))
}

fn recase(e: &mut MemoryEngine, function: &str, value: &ForeignValue, upper: bool) -> Result<ForeignValue, Fault> {
    let Some(lexeme) = e.lexeme_of(value) else {
        return Err(Fault::Processing(format!(
            "Function {function} expected argument #1 to be of type lexeme"
        )));
    };
    let kind = lexeme.kind;
    let text = if upper {
        lexeme.text.to_uppercase()
    } else {
        lexeme.text.to_lowercase()
    };
    Ok(ForeignValue::Lexeme(e.lexemes.intern(kind, &text)))
}

fn bi_upcase(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    recase(e, "upcase", &args[0], true)
}

fn bi_lowcase(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    recase(e, "lowcase", &args[0], false)
}

fn bi_sub_string(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let start = integer_arg(e, "sub-string", 1, &args[0])?;
    let end = integer_arg(e, "sub-string", 2, &args[1])?;
    let text = lexeme_arg(e, "sub-string", 3, &args[2])?;
    let chars: Vec<char> = text.chars().collect();
    let start = start.max(1) as usize;
    let end = (end.max(0) as usize).min(chars.len());
    let sub: String = if start > end {
        String::new()
    } else {
        chars[start - 1..end].iter().collect()
    };
    Ok(e.string(&sub))
}

fn bi_create(_: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let mut items = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            ForeignValue::Multifield(inner) => items.extend(inner),
            ForeignValue::Void => {}
            value => items.push(value),
        }
    }
    Ok(ForeignValue::Multifield(items))
}

fn bi_length(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    match &args[0] {
        ForeignValue::Multifield(items) => Ok(ForeignValue::Integer(items.len() as i64)),
        other => match e.lexeme_of(other) {
            Some(l) => Ok(ForeignValue::Integer(l.text.chars().count() as i64)),
            None => Err(Fault::Processing(
                "Function length$ expected argument #1 to be of type multifield or lexeme".into(),
            )),
        },
    }
}

fn bi_nth(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let index = integer_arg(e, "nth$", 1, &args[0])?;
    let items = multifield_arg(e, "nth$", 2, &args[1])?;
    usize::try_from(index)
        .ok()
        .and_then(|i| i.checked_sub(1))
        .and_then(|i| items.get(i).cloned())
        .ok_or_else(|| Fault::Processing(format!("Index {index} out of range in function nth$")))
}

fn bi_first(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let items = multifield_arg(e, "first$", 1, &args[0])?;
    Ok(ForeignValue::Multifield(items.into_iter().take(1).collect()))
}

fn bi_rest(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let items = multifield_arg(e, "rest$", 1, &args[0])?;
    Ok(ForeignValue::Multifield(items.into_iter().skip(1).collect()))
}

fn bi_member(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let items = multifield_arg(e, "member$", 2, &args[1])?;
    Ok(match items.iter().position(|v| *v == args[0]) {
        Some(i) => ForeignValue::Integer(i as i64 + 1),
        None => e.boolean(false),
    })
}

fn bi_subseq(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let items = multifield_arg(e, "subseq$", 1, &args[0])?;
    let start = integer_arg(e, "subseq$", 2, &args[1])?.max(1) as usize;
    let end = (integer_arg(e, "subseq$", 3, &args[2])?.max(0) as usize).min(items.len());
    if start > end {
        return Ok(ForeignValue::Multifield(Vec::new()));
    }
    Ok(ForeignValue::Multifield(items[start - 1..end].to_vec()))
}

fn bi_implode(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let items = multifield_arg(e, "implode$", 1, &args[0])?;
    let text = e.items_text(&items);
    Ok(e.string(&text))
}

fn bi_explode(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let text = lexeme_arg(e, "explode$", 1, &args[0])?;
    let sexps = read_all(&text)?;
    let items = sexps.iter().map(|s| e.constant(s)).collect();
    Ok(ForeignValue::Multifield(items))
}

fn bi_type(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let name = match &args[0] {
        ForeignValue::Float(_) => "FLOAT",
        ForeignValue::Integer(_) => "INTEGER",
        ForeignValue::Lexeme(_) => match e.lexeme_of(&args[0]).map(|l| l.kind) {
            Some(LexemeKind::String) => "STRING",
            Some(LexemeKind::InstanceName) => "INSTANCE-NAME",
            _ => "SYMBOL",
        },
        ForeignValue::Fact(_) => "FACT-ADDRESS",
        ForeignValue::Instance(_) => "INSTANCE-ADDRESS",
        ForeignValue::External(_) => "EXTERNAL-ADDRESS",
        ForeignValue::Multifield(_) => "MULTIFIELD",
        ForeignValue::Void | ForeignValue::Unsupported(_) => "VOID",
    };
    Ok(e.symbol(name))
}

fn predicate(e: &MemoryEngine, value: &ForeignValue, accept: &[char]) -> ForeignValue {
    let holds = e.value_codes(value).iter().any(|c| accept.contains(c));
    e.boolean(holds)
}

fn bi_numberp(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    Ok(predicate(e, &args[0], &['l', 'd']))
}

fn bi_integerp(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    Ok(predicate(e, &args[0], &['l']))
}

fn bi_floatp(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    Ok(predicate(e, &args[0], &['d']))
}

fn bi_stringp(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    Ok(predicate(e, &args[0], &['s']))
}

fn bi_symbolp(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    Ok(predicate(e, &args[0], &['y']))
}

fn bi_lexemep(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    Ok(predicate(e, &args[0], &['y', 's']))
}

fn bi_multifieldp(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    Ok(predicate(e, &args[0], &['m']))
}

fn logical_name(e: &MemoryEngine, value: &ForeignValue) -> Result<Option<String>, Fault> {
    let name = lexeme_arg(e, "printout", 1, value)?;
    Ok(match name.as_str() {
        "t" => Some(STDOUT.to_string()),
        "nil" => None,
        _ => Some(name),
    })
}

fn print_text(e: &MemoryEngine, args: &[ForeignValue]) -> String {
    let mut text = String::new();
    for arg in args {
        match e.lexeme_of(arg) {
            Some(l) if l.kind == LexemeKind::Symbol && l.text == "crlf" => text.push('\n'),
            Some(l) if l.kind == LexemeKind::Symbol && l.text == "tab" => text.push('\t'),
            Some(l) if l.kind == LexemeKind::Symbol && l.text == "vtab" => text.push('\u{b}'),
            Some(l) if l.kind == LexemeKind::Symbol && l.text == "ff" => text.push('\u{c}'),
            Some(l) if l.kind != LexemeKind::InstanceName => text.push_str(l.text),
            _ => text.push_str(&e.value_text(arg)),
        }
    }
    text
}

fn bi_printout(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    if let Some(name) = logical_name(e, &args[0])? {
        let text = print_text(e, &args[1..]);
        e.emit(&name, &text);
    }
    Ok(ForeignValue::Void)
}

fn bi_print(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let text = print_text(e, &args);
    e.emit(STDOUT, &text);
    Ok(ForeignValue::Void)
}

fn bi_println(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let text = print_text(e, &args);
    e.emit(STDOUT, &format!("{text}\n"));
    Ok(ForeignValue::Void)
}

fn bi_get_error(e: &mut MemoryEngine, _: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    Ok(e.error_value.clone())
}

fn bi_clear_error(e: &mut MemoryEngine, _: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let cleared = e.boolean(false);
    let old = std::mem::replace(&mut e.error_value, cleared);
    e.release_reachable(&old);
    Ok(old)
}

fn bi_set_error(e: &mut MemoryEngine, mut args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let value = args.remove(0);
    e.replace_error_value(value);
    Ok(ForeignValue::Void)
}

fn bi_retract(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    for arg in &args {
        match arg {
            ForeignValue::Fact(id) => {
                e.retract_fact(*id)
                    .map_err(|_| Fault::Processing(format!("Unable to retract fact {id}")))?;
            }
            ForeignValue::Integer(index) => {
                let id = e
                    .facts
                    .iter()
                    .find(|(_, f)| !f.retracted && f.index as i64 == *index)
                    .map(|(id, _)| *id)
                    .ok_or_else(|| Fault::Processing(format!("Unable to find fact f-{index}")))?;
                e.retract_fact(id)
                    .map_err(|_| Fault::Processing(format!("Unable to retract fact f-{index}")))?;
            }
            other if e.lexeme_of(other).is_some_and(|l| l.text == "*") => {
                let live: Vec<FactId> = e.facts.iter().filter(|(_, f)| !f.retracted).map(|(id, _)| *id).collect();
                for id in live {
                    let _ = e.retract_fact(id);
                }
            }
            other => {
                return Err(Fault::Processing(format!(
                    "Function retract expected a fact address or index but found {}",
                    e.value_text(other)
                )))
            }
        }
    }
    Ok(ForeignValue::Void)
}

fn bi_fact_index(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    match &args[0] {
        ForeignValue::Fact(id) => e
            .facts
            .get(id)
            .filter(|f| !f.retracted)
            .map(|f| ForeignValue::Integer(f.index as i64))
            .ok_or_else(|| Fault::Processing("Function fact-index called with a retracted fact".into())),
        other => Err(Fault::Processing(format!(
            "Function fact-index expected a fact address but found {}",
            e.value_text(other)
        ))),
    }
}

fn bi_facts(e: &mut MemoryEngine, _: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let live: Vec<(FactId, u64)> = e
        .facts
        .iter()
        .filter(|(_, f)| !f.retracted)
        .map(|(id, f)| (*id, f.index))
        .collect();
    let mut out = String::new();
    for (id, index) in &live {
        if let Some(text) = e.fact_text(*id) {
            out.push_str(&format!("{:<8}{text}\n", format!("f-{index}")));
        }
    }
    let noun = if live.len() == 1 { "fact" } else { "facts" };
    out.push_str(&format!("For a total of {} {noun}.\n", live.len()));
    e.emit(STDOUT, &out);
    Ok(ForeignValue::Void)
}

fn bi_instances(e: &mut MemoryEngine, _: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let mut out = String::new();
    let mut count = 0;
    for instance in e.instances.values().filter(|i| !i.deleted) {
        let class = e.classes.get(&instance.class).map(|c| c.name.as_str()).unwrap_or("");
        out.push_str(&format!("[{}] of {class}\n", instance.name));
        count += 1;
    }
    let noun = if count == 1 { "instance" } else { "instances" };
    out.push_str(&format!("For a total of {count} {noun}.\n"));
    e.emit(STDOUT, &out);
    Ok(ForeignValue::Void)
}

fn instance_target(e: &MemoryEngine, function: &str, value: &ForeignValue) -> Result<InstanceId, Fault> {
    let found = match value {
        ForeignValue::Instance(id) => e.instances.get(id).filter(|i| !i.deleted).map(|_| *id),
        other => e
            .lexeme_of(other)
            .and_then(|l| e.live_instance_named(l.text)),
    };
    found.ok_or_else(|| {
        Fault::Processing(format!(
            "Function {function} unable to find instance {}",
            e.value_text(value)
        ))
    })
}

fn bi_instance_name(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let id = instance_target(e, "instance-name", &args[0])?;
    let name = e.instances.get(&id).map(|i| i.name.clone()).unwrap_or_default();
    Ok(ForeignValue::Lexeme(e.lexemes.intern(LexemeKind::InstanceName, &name)))
}

fn bi_class(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let id = instance_target(e, "class", &args[0])?;
    let name = e
        .instances
        .get(&id)
        .and_then(|i| e.classes.get(&i.class))
        .map(|c| c.name.clone())
        .unwrap_or_default();
    Ok(e.symbol(&name))
}

fn bi_reset(e: &mut MemoryEngine, _: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    e.reset_working_memory();
    Ok(ForeignValue::Void)
}

fn bi_run(_: &mut MemoryEngine, _: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    Ok(ForeignValue::Integer(0))
}

fn set_watch(e: &mut MemoryEngine, function: &str, args: &[ForeignValue], on: bool) -> Result<ForeignValue, Fault> {
    let item = lexeme_arg(e, function, 1, &args[0])?;
    if item == "all" {
        for w in Watch::ALL {
            e.toggle_watch(w, on);
        }
    } else {
        let w: Watch = item.parse().map_err(Fault::Processing)?;
        e.toggle_watch(w, on);
    }
    Ok(ForeignValue::Void)
}

fn bi_watch(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    set_watch(e, "watch", &args, true)
}

fn bi_unwatch(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    set_watch(e, "unwatch", &args, false)
}

fn bi_build(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let text = lexeme_arg(e, "build", 1, &args[0])?;
    let built = e.build_text(&text).is_ok();
    Ok(e.boolean(built))
}

fn bi_eval(e: &mut MemoryEngine, args: Vec<ForeignValue>) -> Result<ForeignValue, Fault> {
    let text = lexeme_arg(e, "eval", 1, &args[0])?;
    if e.depth >= MAX_EVAL_DEPTH {
        return Err(Fault::Processing(format!("Maximum evaluation depth of {MAX_EVAL_DEPTH} exceeded in eval")));
    }
    e.depth += 1;
    let result = e.eval_text(&text);
    e.depth -= 1;
    result
}

macro_rules! builtins {
    ($($name:literal => $run:ident, $min:literal, $max:expr;)*) => {
        static BUILTINS: &[Builtin] = &[
            $(Builtin { name: $name, min: $min, max: $max, run: $run },)*
        ];
    };
}

builtins! {
    "+" => bi_add, 2, None;
    "-" => bi_sub, 2, None;
    "*" => bi_mul, 2, None;
    "/" => bi_div, 2, None;
    "div" => bi_int_div, 2, None;
    "mod" => bi_mod, 2, Some(2);
    "abs" => bi_abs, 1, Some(1);
    "integer" => bi_integer, 1, Some(1);
    "float" => bi_float, 1, Some(1);
    "min" => bi_min, 1, None;
    "max" => bi_max, 1, None;
    "=" => bi_num_eq, 2, None;
    "<>" => bi_num_ne, 2, None;
    "<" => bi_lt, 2, None;
    ">" => bi_gt, 2, None;
    "<=" => bi_le, 2, None;
    ">=" => bi_ge, 2, None;
    "eq" => bi_eq, 2, None;
    "neq" => bi_neq, 2, None;
    "not" => bi_not, 1, Some(1);
    "str-cat" => bi_str_cat, 1, None;
    "sym-cat" => bi_sym_cat, 1, None;
    "str-length" => bi_str_length, 1, Some(1);
    "upcase" => bi_upcase, 1, Some(1);
    "lowcase" => bi_lowcase, 1, Some(1);
    "sub-string" => bi_sub_string, 3, Some(3);
    "create$" => bi_create, 0, None;
    "length$" => bi_length, 1, Some(1);
    "nth$" => bi_nth, 2, Some(2);
    "first$" => bi_first, 1, Some(1);
    "rest$" => bi_rest, 1, Some(1);
    "member$" => bi_member, 2, Some(2);
    "subseq$" => bi_subseq, 3, Some(3);
    "implode$" => bi_implode, 1, Some(1);
    "explode$" => bi_explode, 1, Some(1);
    "type" => bi_type, 1, Some(1);
    "numberp" => bi_numberp, 1, Some(1);
    "integerp" => bi_integerp, 1, Some(1);
    "floatp" => bi_floatp, 1, Some(1);
    "stringp" => bi_stringp, 1, Some(1);
    "symbolp" => bi_symbolp, 1, Some(1);
    "lexemep" => bi_lexemep, 1, Some(1);
    "multifieldp" => bi_multifieldp, 1, Some(1);
    "printout" => bi_printout, 1, None;
    "print" => bi_print, 0, None;
    "println" => bi_println, 0, None;
    "get-error" => bi_get_error, 0, Some(0);
    "clear-error" => bi_clear_error, 0, Some(0);
    "set-error" => bi_set_error, 1, Some(1);
    "retract" => bi_retract, 1, None;
    "fact-index" => bi_fact_index, 1, Some(1);
    "facts" => bi_facts, 0, Some(0);
    "instances" => bi_instances, 0, Some(0);
    "instance-name" => bi_instance_name, 1, Some(1);
    "class" => bi_class, 1, Some(1);
    "reset" => bi_reset, 0, Some(0);
    "run" => bi_run, 0, Some(1);
    "watch" => bi_watch, 1, Some(1);
    "unwatch" => bi_unwatch, 1, Some(1);
    "build" => bi_build, 1, Some(1);
    "eval" => bi_eval, 1, Some(1);
}

/// Resolve the module part of a qualified construct name, if any.
pub(super) fn qualified_module<'a>(engine: &MemoryEngine, name: &'a str) -> Result<(Option<crate::native::ModuleId>, &'a str), Fault> {
    match split_qualified(name) {
        (Some(module), bare) => engine
            .module_id(module)
            .map(|id| (Some(id), bare))
            .ok_or_else(|| Fault::Parse(format!("Unable to find defmodule {module}"))),
        (None, bare) => Ok((None, bare)),
    }
}

pub(super) fn shared_body(exprs: Vec<Expr>) -> Rc<[Expr]> {
    Rc::from(exprs)
}
