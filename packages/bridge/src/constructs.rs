//! Construct models
//!
//! Serializable descriptions of constructs that render to construct text,
//! so a deftemplate can be kept as data (for example JSON) and built later.
//!
//! # Example
//!
//! ```
//! use clipsrules::constructs::{
//!     ConstraintAttributeModel, FactTemplateModel, SlotAttributeModel, SlotModel, TypeSpecification,
//!     AllowedType,
//! };
//!
//! let model = FactTemplateModel::new("point")
//!     .with_slot(SlotModel::single("x").with(SlotAttributeModel::Constraint(
//!         ConstraintAttributeModel::Types(TypeSpecification::Types(vec![AllowedType::Integer])),
//!     )));
//! assert_eq!(model.to_construct().unwrap(), "(deftemplate point (slot x (type INTEGER)))");
//! ```

use crate::error::{BridgeError, Result};
use crate::facts::FactTemplate;
use crate::session::Session;
use crate::value::{format_float, quote_string};
use serde::{Deserialize, Serialize};

/// Symbols must be non-empty words the reader will not split or reinterpret.
fn check_symbol<'a>(what: &str, text: &'a str) -> Result<&'a str> {
    let invalid = text.is_empty()
        || text.starts_with('?')
        || text.starts_with("$?")
        || text
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';' | '[' | ']'));
    if invalid {
        return Err(BridgeError::InvalidModel(format!("invalid {what} '{text}'")));
    }
    Ok(text)
}

/// `(name e1 e2 ...)`, or `(name)` with no expressions
fn call_form(name: &str, values: &[ExpressionModel]) -> Result<String> {
    if values.is_empty() {
        Ok(format!("({name})"))
    } else {
        Ok(format!("({name} {})", join(values, ExpressionModel::to_construct)?))
    }
}

fn join<T>(items: &[T], render: impl Fn(&T) -> Result<String>) -> Result<String> {
    Ok(items.iter().map(render).collect::<Result<Vec<_>>>()?.join(" "))
}

// ============================================================================
// Constants, variables, expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstantModel {
    Symbol(String),
    String(String),
    Integer(i64),
    Float(f64),
    InstanceName(String),
}

impl ConstantModel {
    pub fn to_construct(&self) -> Result<String> {
        Ok(match self {
            ConstantModel::Symbol(s) => check_symbol("symbol", s)?.to_string(),
            ConstantModel::String(s) => quote_string(s),
            ConstantModel::Integer(i) => i.to_string(),
            ConstantModel::Float(f) => format_float(*f),
            ConstantModel::InstanceName(s) => format!("[{}]", check_symbol("instance name", s)?),
        })
    }
}

/// Integer or float; plain JSON numbers deserialize directly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberModel {
    Integer(i64),
    Float(f64),
}

impl NumberModel {
    fn render(&self) -> String {
        match self {
            NumberModel::Integer(i) => i.to_string(),
            NumberModel::Float(f) => format_float(*f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableModel {
    /// `?name`
    SingleField(String),
    /// `$?name`
    MultiField(String),
    /// `?*name*`
    Global(String),
}

impl VariableModel {
    pub fn to_construct(&self) -> Result<String> {
        Ok(match self {
            VariableModel::SingleField(name) => format!("?{}", check_symbol("variable", name)?),
            VariableModel::MultiField(name) => format!("$?{}", check_symbol("variable", name)?),
            VariableModel::Global(name) => format!("?*{}*", check_symbol("global", name)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionModel {
    Constant(ConstantModel),
    Variable(VariableModel),
    FunctionCall {
        name: String,
        #[serde(default)]
        args: Vec<ExpressionModel>,
    },
}

impl ExpressionModel {
    pub fn to_construct(&self) -> Result<String> {
        match self {
            ExpressionModel::Constant(c) => c.to_construct(),
            ExpressionModel::Variable(v) => v.to_construct(),
            ExpressionModel::FunctionCall { name, args } => {
                call_form(check_symbol("function name", name)?, args)
            }
        }
    }
}

impl From<ConstantModel> for ExpressionModel {
    fn from(c: ConstantModel) -> Self {
        ExpressionModel::Constant(c)
    }
}

// ============================================================================
// Constraint attributes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowedType {
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

impl AllowedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllowedType::Symbol => "SYMBOL",
            AllowedType::String => "STRING",
            AllowedType::Lexeme => "LEXEME",
            AllowedType::Integer => "INTEGER",
            AllowedType::Float => "FLOAT",
            AllowedType::Number => "NUMBER",
            AllowedType::InstanceName => "INSTANCE-NAME",
            AllowedType::InstanceAddress => "INSTANCE-ADDRESS",
            AllowedType::Instance => "INSTANCE",
            AllowedType::FactAddress => "FACT-ADDRESS",
            AllowedType::ExternalAddress => "EXTERNAL-ADDRESS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSpecification {
    Any,
    Types(Vec<AllowedType>),
}

/// Either `?VARIABLE` (anything of the type) or an explicit list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowedList<T> {
    Any,
    Values(Vec<T>),
}

impl<T> AllowedList<T> {
    fn render(&self, item: impl Fn(&T) -> Result<String>) -> Result<String> {
        match self {
            AllowedList::Any => Ok("?VARIABLE".to_string()),
            AllowedList::Values(values) if values.is_empty() => {
                Err(BridgeError::InvalidModel("allowed value list is empty".into()))
            }
            AllowedList::Values(values) => join(values, item),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowedConstants {
    Symbols(AllowedList<String>),
    Strings(AllowedList<String>),
    /// Rendered as symbols
    Lexemes(AllowedList<String>),
    Integers(AllowedList<i64>),
    Floats(AllowedList<f64>),
    Numbers(AllowedList<NumberModel>),
    InstanceNames(AllowedList<String>),
    ClassNames(AllowedList<String>),
    Values(AllowedList<ConstantModel>),
}

impl AllowedConstants {
    pub fn to_construct(&self) -> Result<String> {
        let symbol = |s: &String| check_symbol("symbol", s).map(str::to_string);
        let (attribute, body) = match self {
            AllowedConstants::Symbols(l) => ("allowed-symbols", l.render(symbol)?),
            AllowedConstants::Strings(l) => ("allowed-strings", l.render(|s| Ok(quote_string(s)))?),
            AllowedConstants::Lexemes(l) => ("allowed-lexemes", l.render(symbol)?),
            AllowedConstants::Integers(l) => ("allowed-integers", l.render(|i| Ok(i.to_string()))?),
            AllowedConstants::Floats(l) => ("allowed-floats", l.render(|f| Ok(format_float(*f)))?),
            AllowedConstants::Numbers(l) => ("allowed-numbers", l.render(|n| Ok(n.render()))?),
            AllowedConstants::InstanceNames(l) => (
                "allowed-instance-names",
                l.render(|s| Ok(format!("[{}]", check_symbol("instance name", s)?)))?,
            ),
            AllowedConstants::ClassNames(l) => ("allowed-classes", l.render(symbol)?),
            AllowedConstants::Values(l) => ("allowed-values", l.render(ConstantModel::to_construct)?),
        };
        Ok(format!("({attribute} {body})"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintAttributeModel {
    Types(TypeSpecification),
    AllowedConstants(AllowedConstants),
    /// Unbounded ends are `None`
    Range(Option<NumberModel>, Option<NumberModel>),
    Cardinality(Option<u32>, Option<u32>),
}

impl ConstraintAttributeModel {
    pub fn to_construct(&self) -> Result<String> {
        fn bound<T: ToString>(value: Option<T>) -> String {
            value.map_or_else(|| "?VARIABLE".to_string(), |v| v.to_string())
        }
        match self {
            ConstraintAttributeModel::Types(TypeSpecification::Any) => Ok("(type ?VARIABLE)".to_string()),
            ConstraintAttributeModel::Types(TypeSpecification::Types(types)) => {
                if types.is_empty() {
                    return Err(BridgeError::InvalidModel("type list is empty".into()));
                }
                let names: Vec<&str> = types.iter().map(AllowedType::as_str).collect();
                Ok(format!("(type {})", names.join(" ")))
            }
            ConstraintAttributeModel::AllowedConstants(allowed) => allowed.to_construct(),
            ConstraintAttributeModel::Range(low, high) => Ok(format!(
                "(range {} {})",
                bound(low.map(|n| n.render())),
                bound(high.map(|n| n.render()))
            )),
            ConstraintAttributeModel::Cardinality(min, max) => {
                Ok(format!("(cardinality {} {})", bound(*min), bound(*max)))
            }
        }
    }
}

// ============================================================================
// Deftemplate
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultModel {
    /// `?DERIVE`: derived from the slot's constraints
    Derive,
    /// `?NONE`: the slot must be given a value
    None,
    /// Evaluated once, when the template is built
    Static(Vec<ExpressionModel>),
    /// Evaluated for every new fact
    Dynamic(Vec<ExpressionModel>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotAttributeModel {
    Default(DefaultModel),
    Constraint(ConstraintAttributeModel),
}

impl SlotAttributeModel {
    pub fn to_construct(&self) -> Result<String> {
        match self {
            SlotAttributeModel::Default(DefaultModel::Derive) => Ok("(default ?DERIVE)".to_string()),
            SlotAttributeModel::Default(DefaultModel::None) => Ok("(default ?NONE)".to_string()),
            SlotAttributeModel::Default(DefaultModel::Static(values)) => call_form("default", values),
            SlotAttributeModel::Default(DefaultModel::Dynamic(values)) => call_form("default-dynamic", values),
            SlotAttributeModel::Constraint(c) => c.to_construct(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Single,
    Multi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotModel {
    pub name: String,
    pub kind: SlotKind,
    #[serde(default)]
    pub attributes: Vec<SlotAttributeModel>,
}

impl SlotModel {
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SlotKind::Single,
            attributes: Vec::new(),
        }
    }

    pub fn multi(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SlotKind::Multi,
            attributes: Vec::new(),
        }
    }

    pub fn with(mut self, attribute: SlotAttributeModel) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn to_construct(&self) -> Result<String> {
        let keyword = match self.kind {
            SlotKind::Single => "slot",
            SlotKind::Multi => "multislot",
        };
        let mut text = format!("({keyword} {}", check_symbol("slot name", &self.name)?);
        for attribute in &self.attributes {
            text.push(' ');
            text.push_str(&attribute.to_construct()?);
        }
        text.push(')');
        Ok(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactTemplateModel {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub slots: Vec<SlotModel>,
}

impl FactTemplateModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: None,
            slots: Vec::new(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_slot(mut self, slot: SlotModel) -> Self {
        self.slots.push(slot);
        self
    }

    /// Render as `deftemplate` construct text.
    pub fn to_construct(&self) -> Result<String> {
        let mut text = format!("(deftemplate {}", check_symbol("template name", &self.name)?);
        if let Some(comment) = &self.comment {
            text.push(' ');
            text.push_str(&quote_string(comment));
        }
        let mut seen = std::collections::HashSet::new();
        for slot in &self.slots {
            if !seen.insert(slot.name.as_str()) {
                return Err(BridgeError::InvalidModel(format!("duplicate slot '{}'", slot.name)));
            }
            text.push(' ');
            text.push_str(&slot.to_construct()?);
        }
        text.push(')');
        Ok(text)
    }
}

impl Session {
    /// Build a deftemplate from its model.
    pub fn build_template(&mut self, model: &FactTemplateModel) -> Result<FactTemplate> {
        let text = model.to_construct()?;
        tracing::debug!(template = %model.name, "Building template from model");
        self.build(&text)?;
        self.find_template(&model.name)
            .ok_or_else(|| BridgeError::InvalidModel(format!("template '{}' was not defined", model.name)))
    }
}
