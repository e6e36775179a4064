//! Integration tests for working memory
//!
//! These tests populate a session from constructs, move facts and instances
//! between sessions through text and binary files, and check that builders
//! leave working memory untouched when they fail.

use clipsrules::{ErrorKind, FactAndSlots, InstanceAndSlots, SaveScope, Session, Value};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

const CONSTRUCTS: &str = r#"
(deftemplate order
   (slot id (type INTEGER))
   (slot customer (type STRING))
   (multislot items (type SYMBOL))
   (slot total (type FLOAT) (default 0.0)))

(defclass account (is-a USER)
   (slot owner)
   (slot balance (type NUMBER) (default 0)))

(deffacts initial
   (order (id 1) (customer "Ann") (items apple pear) (total 3.5))
   (order (id 2) (customer "Bob")))

(definstances accounts
   ([acct-ann] of account (owner "Ann") (balance 100))
   ([acct-bob] of account (owner "Bob")))
"#;

/// Route bridge logs to the test harness; `RUST_LOG` overrides the level.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A session with the constructs loaded but working memory empty
fn empty_session() -> Session {
    init_tracing();
    let mut session = Session::new();
    session.load_from_str(CONSTRUCTS).expect("constructs should load");
    session
}

/// A session reset into its initial facts and instances
fn populated_session() -> Session {
    let mut session = empty_session();
    session.reset();
    session
}

fn order(slots: &[(&str, Value)]) -> FactAndSlots {
    FactAndSlots {
        template_name: "order".to_string(),
        slots: slots
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect::<BTreeMap<_, _>>(),
    }
}

// ============================================================================
// Initial state
// ============================================================================

#[test]
fn test_reset_asserts_deffacts_with_defaults() {
    let mut session = populated_session();

    assert_eq!(
        session.all_facts(),
        vec![
            order(&[
                ("id", Value::Integer(1)),
                ("customer", Value::string("Ann")),
                (
                    "items",
                    Value::multifield(vec![Value::symbol("apple"), Value::symbol("pear")])
                ),
                ("total", Value::Float(3.5)),
            ]),
            order(&[
                ("id", Value::Integer(2)),
                ("customer", Value::string("Bob")),
                ("items", Value::multifield(Vec::new())),
                ("total", Value::Float(0.0)),
            ]),
        ]
    );
}

#[test]
fn test_reset_creates_definstances() {
    let mut session = populated_session();
    let instances = session.all_instances();

    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0].class_name, "account");
    assert_eq!(instances[0].instance_name, "acct-ann");
    assert_eq!(instances[0].slots.get("balance"), Some(&Value::Integer(100)));
    assert_eq!(instances[1].slots.get("balance"), Some(&Value::Integer(0)));
}

// ============================================================================
// Persistence across sessions
// ============================================================================

#[test]
fn test_text_facts_move_between_sessions() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("orders.clp");

    let mut source = populated_session();
    let saved = source
        .save_facts(&path, SaveScope::VisibleToCurrentModule)
        .unwrap();
    assert_eq!(saved, 2);

    let mut target = empty_session();
    assert_eq!(target.load_facts(&path).unwrap(), 2);
    assert_eq!(target.all_facts(), source.all_facts());
}

#[test]
fn test_binary_facts_move_between_sessions() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("orders.bin");

    let mut source = populated_session();
    source
        .save_binary_facts(&path, SaveScope::VisibleToCurrentModule)
        .unwrap();

    let mut target = empty_session();
    assert_eq!(target.load_binary_facts(&path).unwrap(), 2);
    assert_eq!(target.all_facts(), source.all_facts());
}

#[test]
fn test_instances_move_between_sessions() {
    let dir = TempDir::new().unwrap();
    let text = dir.path().join("accounts.clp");
    let binary = dir.path().join("accounts.bin");

    let mut source = populated_session();
    assert_eq!(
        source
            .save_instances(&text, SaveScope::VisibleToCurrentModule)
            .unwrap(),
        2
    );
    source
        .save_binary_instances(&binary, SaveScope::VisibleToCurrentModule)
        .unwrap();
    let expected: Vec<InstanceAndSlots> = source.all_instances();

    let mut from_text = empty_session();
    assert_eq!(from_text.load_instances(&text).unwrap(), 2);
    assert_eq!(from_text.all_instances(), expected);

    let mut from_binary = empty_session();
    assert_eq!(from_binary.load_binary_instances(&binary).unwrap(), 2);
    assert_eq!(from_binary.all_instances(), expected);
}

#[test]
fn test_missing_fact_file_is_io_failure() {
    let dir = TempDir::new().unwrap();
    let mut session = empty_session();

    let err = session
        .load_facts(dir.path().join("missing.clp"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

// ============================================================================
// Builders
// ============================================================================

#[test]
fn test_builder_with_unknown_template_adds_nothing() {
    let mut session = populated_session();
    let before = session.facts().count();

    let err = session
        .build_facts(|b| {
            b.set_template("invoice")?;
            b.assert()
        })
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TargetNotFound);
    assert_eq!(session.facts().count(), before);
}

#[test]
fn test_builder_slot_type_violation_adds_nothing() {
    let mut session = populated_session();
    let before = session.facts().count();

    let err = session
        .build_facts(|b| {
            b.set_template("order")?.put("id", 3)?;
            b.put("customer", Value::symbol("not-a-string"))?;
            b.assert()
        })
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Constraint);
    assert_eq!(session.facts().count(), before);
}

#[test]
fn test_builder_asserts_several_facts_in_a_row() {
    let mut session = empty_session();

    let (first, second) = session
        .build_facts(|b| {
            b.set_template("order")?.put("id", 10)?;
            let first = b.assert()?;
            b.put("id", 11)?.put("customer", "Cy")?;
            let second = b.assert()?;
            Ok((first, second))
        })
        .unwrap();

    assert_eq!(session.fact_slot(first, "id").unwrap(), Value::Integer(10));
    assert_eq!(session.fact_slot(first, "customer").unwrap(), Value::string(""));
    assert_eq!(session.fact_slot(second, "customer").unwrap(), Value::string("Cy"));
}

#[test]
fn test_instance_builder_names_instance() {
    let mut session = empty_session();

    let instance = session
        .build_instances(|b| {
            b.set_class("account")?.put("owner", "Dee")?;
            b.make(Some("acct-dee"))
        })
        .unwrap();

    assert_eq!(session.instance_name(instance).as_deref(), Some("acct-dee"));
    assert_eq!(
        session.direct_get_slot(instance, "balance").unwrap(),
        Value::Integer(0)
    );
}

// ============================================================================
// Handle lifetime
// ============================================================================

#[test]
fn test_retained_fact_stays_readable_after_retraction() {
    let mut session = populated_session();
    let fact = session.facts().next().unwrap();

    session.retain_fact(fact);
    session.retract(fact).unwrap();
    session.gc();

    assert!(!session.fact_exists(fact));
    assert_eq!(session.fact_slot(fact, "id").unwrap(), Value::Integer(1));
    assert_eq!(session.facts().count(), 1);
    session.release_fact(fact);
}

// ============================================================================
// Text sources and construct images
// ============================================================================

#[test]
fn test_facts_and_instances_from_text() {
    let mut session = empty_session();

    assert_eq!(session.load_facts_from_str("(order (id 7) (customer \"Eve\"))").unwrap(), 1);
    assert_eq!(
        session
            .restore_instances_from_str("([acct-eve] of account (owner \"Eve\"))")
            .unwrap(),
        1
    );

    let fact = session.facts().next().unwrap();
    assert_eq!(session.fact_slot(fact, "id").unwrap(), Value::Integer(7));
    let instance = session.find_instance("acct-eve", None, true).unwrap();
    assert_eq!(
        session.direct_get_slot(instance, "owner").unwrap(),
        Value::string("Eve")
    );
}

#[test]
fn test_construct_image_restores_definitions() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("constructs.bin");
    populated_session().save_binary(&path).unwrap();

    let mut restored = Session::new();
    restored.load_binary(&path).unwrap();
    restored.reset();

    assert_eq!(restored.all_facts(), populated_session().all_facts());
    assert_eq!(restored.all_instances().len(), 2);
}
