//! Files: constructs, batch commands, facts and instances
//!
//! Text formats are the same forms `build`, `assert-string` and
//! `make-instance` read. Binary images are JSON documents tagged with a
//! format name so an image of one kind is never loaded as another.

use super::eval::Frame;
use super::reader::{read_all, read_one, Sexp};
use super::store::Fault;
use super::{ConstructRecord, MemoryEngine};
use crate::config::MAX_SOURCE_SIZE;
use crate::native::codes::*;
use crate::native::{ErrorCode, ForeignValue, LexemeKind, ModuleId, NativeEngine, NativeResult, SaveScope};
use crate::VERSION;
use serde::{Deserialize, Serialize};
use std::path::Path;

const CONSTRUCT_IMAGE: &str = "clipsrules-constructs";
const FACT_IMAGE: &str = "clipsrules-facts";
const INSTANCE_IMAGE: &str = "clipsrules-instances";

// ============================================================================
// Stored forms
// ============================================================================

/// A value as written to a binary image. Fact and external addresses do not
/// survive a save and are stored as `nil`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
enum StoredValue {
    Integer(i64),
    Float(f64),
    Symbol(String),
    String(String),
    InstanceName(String),
    Multifield(Vec<StoredValue>),
    Void,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConstructImage {
    format: String,
    version: String,
    constructs: Vec<ConstructRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredFact {
    /// `MODULE::name`
    template: String,
    implied: bool,
    slots: Vec<(String, StoredValue)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FactImage {
    format: String,
    version: String,
    facts: Vec<StoredFact>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredInstance {
    name: String,
    /// `MODULE::name`
    class: String,
    slots: Vec<(String, StoredValue)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InstanceImage {
    format: String,
    version: String,
    instances: Vec<StoredInstance>,
}

fn read_file(path: &Path) -> Result<String, ErrorCode> {
    std::fs::read_to_string(path).map_err(|e| {
        tracing::warn!(path = %path.display(), error = %e, "Could not open file");
        LE_OPEN_FILE_ERROR
    })
}

/// Read a text source, rejecting files over [`MAX_SOURCE_SIZE`] like
/// in-memory sources are.
pub(super) fn read_source(path: &Path) -> Result<String, ErrorCode> {
    let size = std::fs::metadata(path)
        .map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Could not open file");
            LE_OPEN_FILE_ERROR
        })?
        .len();
    if size > MAX_SOURCE_SIZE as u64 {
        tracing::warn!(path = %path.display(), size, limit = MAX_SOURCE_SIZE, "Source file too large");
        return Err(LE_PARSING_ERROR);
    }
    read_file(path)
}

fn write_file(path: &Path, contents: &str) -> Result<(), ErrorCode> {
    std::fs::write(path, contents).map_err(|e| {
        tracing::warn!(path = %path.display(), error = %e, "Could not write file");
        LE_OPEN_FILE_ERROR
    })
}

fn write_image<T: Serialize>(path: &Path, image: &T) -> Result<(), ErrorCode> {
    let json = serde_json::to_string_pretty(image).map_err(|e| {
        tracing::warn!(error = %e, "Could not encode image");
        LE_PARSING_ERROR
    })?;
    write_file(path, &json)
}

fn read_image<T: for<'de> Deserialize<'de>>(path: &Path, format: &str, found: impl Fn(&T) -> &str) -> Result<T, ErrorCode> {
    let text = read_file(path)?;
    let image: T = serde_json::from_str(&text).map_err(|e| {
        tracing::warn!(path = %path.display(), error = %e, "Malformed image");
        LE_PARSING_ERROR
    })?;
    if found(&image) != format {
        tracing::warn!(path = %path.display(), expected = format, found = found(&image), "Wrong image format");
        return Err(LE_PARSING_ERROR);
    }
    Ok(image)
}

impl MemoryEngine {
    // ========================================================================
    // Constructs
    // ========================================================================

    /// Build every construct in the source, continuing past failures.
    pub(super) fn load_source(&mut self, source: &str) -> NativeResult<()> {
        let forms = read_all(source).map_err(|e| {
            self.report(&e.into());
            LE_PARSING_ERROR
        })?;
        let failed = forms.iter().filter(|form| self.build_sexp(form).is_err()).count();
        tracing::debug!(constructs = forms.len(), failed, "Loaded source");
        if failed > 0 {
            Err(LE_PARSING_ERROR)
        } else {
            Ok(())
        }
    }

    /// Build constructs and evaluate commands in order.
    pub(super) fn batch_source(&mut self, source: &str) -> NativeResult<()> {
        let forms = read_all(source).map_err(|e| {
            self.report(&e.into());
            LE_PARSING_ERROR
        })?;
        for form in &forms {
            if form.head().is_some_and(super::define::is_construct) {
                let _ = self.build_sexp(form);
                continue;
            }
            let result = self
                .compile(form)
                .and_then(|expr| self.evaluate(&expr, &mut Frame::default()));
            if let Err(fault) = result {
                self.report(&fault);
            }
        }
        Ok(())
    }

    pub(super) fn bsave_image(&self, path: &Path) -> NativeResult<()> {
        let image = ConstructImage {
            format: CONSTRUCT_IMAGE.to_string(),
            version: VERSION.to_string(),
            constructs: self.construct_log.clone(),
        };
        write_image(path, &image)?;
        tracing::debug!(path = %path.display(), constructs = image.constructs.len(), "Saved construct image");
        Ok(())
    }

    /// Clear the environment, then rebuild every construct of the image in
    /// the module it was defined from.
    pub(super) fn bload_image(&mut self, path: &Path) -> NativeResult<()> {
        let image: ConstructImage = read_image(path, CONSTRUCT_IMAGE, |i: &ConstructImage| i.format.as_str())?;
        if !self.clear() {
            return Err(LE_PARSING_ERROR);
        }
        let mut failed = 0;
        for record in &image.constructs {
            if let Some(module) = self.module_id(&record.module) {
                self.current_module = module;
            }
            let built = match read_one(&record.source) {
                Ok(sexp) => self.build_sexp(&sexp).is_ok(),
                Err(e) => {
                    self.report(&e.into());
                    false
                }
            };
            if !built {
                failed += 1;
            }
        }
        tracing::debug!(path = %path.display(), constructs = image.constructs.len(), failed, "Loaded construct image");
        if failed > 0 {
            Err(LE_PARSING_ERROR)
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Scope
    // ========================================================================

    fn in_scope(&self, construct: &str, name: &str, owner: ModuleId, scope: SaveScope) -> bool {
        let current = self.current_module;
        match scope {
            SaveScope::LocalToCurrentModule => owner == current,
            SaveScope::VisibleToCurrentModule => owner == current || self.visible(construct, name, owner, current),
        }
    }

    fn qualified(&self, module: ModuleId, name: &str) -> String {
        let module = self.modules.get(&module).map(|m| m.name.as_str()).unwrap_or_default();
        format!("{module}::{name}")
    }

    // ========================================================================
    // Facts
    // ========================================================================

    /// Live facts to save, in assertion order
    fn facts_in_scope(&self, scope: SaveScope) -> Vec<crate::native::FactId> {
        self.facts
            .iter()
            .filter(|(_, f)| !f.retracted)
            .filter(|(_, f)| {
                self.templates
                    .get(&f.template)
                    .is_some_and(|t| self.in_scope("deftemplate", &t.name, t.module, scope))
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Assert every fact in the source; stops at the first bad fact.
    pub(super) fn load_fact_source(&mut self, source: &str) -> NativeResult<usize> {
        let forms = read_all(source).map_err(|e| {
            self.report(&e.into());
            LE_PARSING_ERROR
        })?;
        let mut count = 0;
        for form in &forms {
            let result = self
                .compile_fact(form)
                .and_then(|spec| self.assert_spec(&spec, &mut Frame::default()));
            if let Err(fault) = result {
                self.report(&fault);
                return Err(LE_PARSING_ERROR);
            }
            count += 1;
        }
        Ok(count)
    }

    pub(super) fn save_fact_file(&self, path: &Path, scope: SaveScope) -> NativeResult<usize> {
        let lines: Vec<String> = self
            .facts_in_scope(scope)
            .into_iter()
            .filter_map(|id| self.fact_text(id))
            .collect();
        let mut text = lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        write_file(path, &text)?;
        tracing::debug!(path = %path.display(), facts = lines.len(), "Saved facts");
        Ok(lines.len())
    }

    pub(super) fn bsave_facts(&self, path: &Path, scope: SaveScope) -> NativeResult<usize> {
        let facts: Vec<StoredFact> = self
            .facts_in_scope(scope)
            .into_iter()
            .filter_map(|id| {
                let fact = self.facts.get(&id)?;
                let template = self.templates.get(&fact.template)?;
                let slots = template
                    .slots
                    .iter()
                    .zip(&fact.values)
                    .map(|(slot, value)| (slot.name.clone(), self.store_value(value)))
                    .collect();
                Some(StoredFact {
                    template: self.qualified(template.module, &template.name),
                    implied: template.implied,
                    slots,
                })
            })
            .collect();
        let count = facts.len();
        write_image(
            path,
            &FactImage {
                format: FACT_IMAGE.to_string(),
                version: VERSION.to_string(),
                facts,
            },
        )?;
        Ok(count)
    }

    pub(super) fn bload_facts(&mut self, path: &Path) -> NativeResult<usize> {
        let image: FactImage = read_image(path, FACT_IMAGE, |i: &FactImage| i.format.as_str())?;
        let mut count = 0;
        for stored in &image.facts {
            let template = match self.resolve_template(&stored.template) {
                Some(id) => Ok(id),
                None if stored.implied => {
                    let (_, bare) = super::store::split_qualified(&stored.template);
                    self.implied_template(bare)
                }
                None => Err(Fault::Processing(format!("Unable to find deftemplate {}", stored.template))),
            };
            let result = template.and_then(|template| {
                let slots = stored
                    .slots
                    .iter()
                    .map(|(name, value)| (name.clone(), self.restore_value(value)))
                    .collect();
                self.assert_slots(template, slots)
            });
            if let Err(fault) = result {
                self.report(&fault);
                return Err(LE_PARSING_ERROR);
            }
            count += 1;
        }
        Ok(count)
    }

    // ========================================================================
    // Instances
    // ========================================================================

    fn instances_in_scope(&self, scope: SaveScope) -> Vec<crate::native::InstanceId> {
        self.instances
            .iter()
            .filter(|(_, i)| !i.deleted)
            .filter(|(_, i)| {
                self.classes
                    .get(&i.class)
                    .is_some_and(|c| self.in_scope("defclass", &c.name, c.module, scope))
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Make every instance in the source. `trace` is false for restores,
    /// which create instances without the watch trace.
    pub(super) fn load_instance_source(&mut self, source: &str, trace: bool) -> NativeResult<usize> {
        let forms = read_all(source).map_err(|e| {
            self.report(&e.into());
            LE_PARSING_ERROR
        })?;
        let mut count = 0;
        for form in &forms {
            let result = match form {
                Sexp::List(items) => self.compile_instance(items),
                other => Err(Fault::Parse(format!("Expected an instance specification but found {other}"))),
            }
            .and_then(|spec| self.make_from_spec(&spec, &mut Frame::default(), trace));
            if let Err(fault) = result {
                self.report(&fault);
                return Err(LE_PARSING_ERROR);
            }
            count += 1;
        }
        Ok(count)
    }

    pub(super) fn save_instance_file(&self, path: &Path, scope: SaveScope) -> NativeResult<usize> {
        let lines: Vec<String> = self
            .instances_in_scope(scope)
            .into_iter()
            .filter_map(|id| self.instance_text(id))
            .collect();
        let mut text = lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        write_file(path, &text)?;
        tracing::debug!(path = %path.display(), instances = lines.len(), "Saved instances");
        Ok(lines.len())
    }

    pub(super) fn bsave_instances(&self, path: &Path, scope: SaveScope) -> NativeResult<usize> {
        let instances: Vec<StoredInstance> = self
            .instances_in_scope(scope)
            .into_iter()
            .filter_map(|id| {
                let instance = self.instances.get(&id)?;
                let class = self.classes.get(&instance.class)?;
                Some(StoredInstance {
                    name: instance.name.clone(),
                    class: self.qualified(class.module, &class.name),
                    slots: instance
                        .slots
                        .iter()
                        .map(|(name, value)| (name.clone(), self.store_value(value)))
                        .collect(),
                })
            })
            .collect();
        let count = instances.len();
        write_image(
            path,
            &InstanceImage {
                format: INSTANCE_IMAGE.to_string(),
                version: VERSION.to_string(),
                instances,
            },
        )?;
        Ok(count)
    }

    pub(super) fn bload_instances(&mut self, path: &Path) -> NativeResult<usize> {
        let image: InstanceImage = read_image(path, INSTANCE_IMAGE, |i: &InstanceImage| i.format.as_str())?;
        let mut count = 0;
        for stored in &image.instances {
            let result = match self.resolve_class(&stored.class) {
                Some(class) => {
                    let slots = stored
                        .slots
                        .iter()
                        .map(|(name, value)| (name.clone(), self.restore_value(value)))
                        .collect();
                    self.insert_instance(class, Some(stored.name.clone()), slots, true)
                }
                None => Err(Fault::Processing(format!("Unable to find defclass {}", stored.class))),
            };
            if let Err(fault) = result {
                self.report(&fault);
                return Err(LE_PARSING_ERROR);
            }
            count += 1;
        }
        Ok(count)
    }

    // ========================================================================
    // Values
    // ========================================================================

    fn store_value(&self, value: &ForeignValue) -> StoredValue {
        match value {
            ForeignValue::Integer(i) => StoredValue::Integer(*i),
            ForeignValue::Float(f) => StoredValue::Float(*f),
            ForeignValue::Lexeme(_) => match self.lexeme_of(value) {
                Some(l) => match l.kind {
                    LexemeKind::Symbol => StoredValue::Symbol(l.text.to_string()),
                    LexemeKind::String => StoredValue::String(l.text.to_string()),
                    LexemeKind::InstanceName => StoredValue::InstanceName(l.text.to_string()),
                },
                None => StoredValue::Symbol("nil".into()),
            },
            ForeignValue::Instance(id) => match self.instances.get(id) {
                Some(i) => StoredValue::InstanceName(i.name.clone()),
                None => StoredValue::Symbol("nil".into()),
            },
            ForeignValue::Multifield(items) => {
                StoredValue::Multifield(items.iter().map(|v| self.store_value(v)).collect())
            }
            ForeignValue::Void => StoredValue::Void,
            ForeignValue::Fact(_) | ForeignValue::External(_) | ForeignValue::Unsupported(_) => {
                StoredValue::Symbol("nil".into())
            }
        }
    }

    fn restore_value(&mut self, value: &StoredValue) -> ForeignValue {
        match value {
            StoredValue::Integer(i) => ForeignValue::Integer(*i),
            StoredValue::Float(f) => ForeignValue::Float(*f),
            StoredValue::Symbol(s) => ForeignValue::Lexeme(self.lexemes.intern(LexemeKind::Symbol, s)),
            StoredValue::String(s) => ForeignValue::Lexeme(self.lexemes.intern(LexemeKind::String, s)),
            StoredValue::InstanceName(s) => {
                ForeignValue::Lexeme(self.lexemes.intern(LexemeKind::InstanceName, s))
            }
            StoredValue::Multifield(items) => {
                ForeignValue::Multifield(items.iter().map(|v| self.restore_value(v)).collect())
            }
            StoredValue::Void => ForeignValue::Void,
        }
    }
}
