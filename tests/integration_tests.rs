//! Integration tests for the complete Typegraph reasoning pipeline
//!
//! These tests verify end-to-end behaviour across crates:
//! - Schema → MemoryStore → Transaction → Resolver
//! - Rule declaration → commit → visibility in later transactions
//! - Concurrent readers, cancellation and configuration files
//!
//! Run with: cargo test --test integration_tests

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

use typegraph_pattern::{
    Atom, Concept, ConceptId, ConceptMap, Conclusion, Conjunction, RuleDefinition, Term, Value,
    ValueType,
};
use typegraph_reasoner::{
    Database, Error, ReasonerConfig, ResolverState, Transaction, TransactionMode,
};
use typegraph_store::Schema;

fn kinship() -> Arc<Database> {
    let mut b = Schema::builder();
    b.entity("person", None).unwrap();
    b.relation("parent", None, &["person", "person"]).unwrap();
    b.relation("ancestor", None, &["person", "person"]).unwrap();
    b.relation("sibling", None, &["person", "person"]).unwrap();
    b.attribute("name", None, ValueType::String).unwrap();
    b.owns("person", "name").unwrap();
    Arc::new(Database::new(b.build()))
}

fn chain(db: &Database, len: usize) -> Vec<ConceptId> {
    let people: Vec<ConceptId> = (0..len).map(|_| db.insert_thing("person").unwrap()).collect();
    for pair in people.windows(2) {
        db.insert_relation("parent", &[pair[0].into(), pair[1].into()])
            .unwrap();
    }
    people
}

fn rel(label: &str, a: &str, b: &str) -> Atom {
    Atom::relation(label, [Term::var(a), Term::var(b)])
}

fn ancestor_rules() -> Vec<RuleDefinition> {
    vec![
        RuleDefinition::new(
            "ancestor-base",
            Conjunction::new([rel("parent", "x", "y")]),
            Conclusion::relation("ancestor", [Term::var("x"), Term::var("y")]),
        ),
        RuleDefinition::new(
            "ancestor-step",
            Conjunction::new([rel("ancestor", "x", "y"), rel("ancestor", "y", "z")]),
            Conclusion::relation("ancestor", [Term::var("x"), Term::var("z")]),
        ),
    ]
}

fn count(txn: &Transaction, query: Conjunction) -> usize {
    txn.resolve(query, ConceptMap::new())
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
        .len()
}

// ============================================================================
// Rules across transactions
// ============================================================================

#[test]
fn test_committed_rules_serve_later_transactions() {
    let db = kinship();
    chain(&db, 5);

    let writer = Transaction::open(&db, TransactionMode::Write, ReasonerConfig::default());
    for rule in ancestor_rules() {
        writer.declare_rule(rule).unwrap();
    }
    let changes = writer.commit().unwrap();
    assert_eq!(changes.upserts.len(), 2);
    writer.close();

    let reader = Transaction::open(&db, TransactionMode::Read, ReasonerConfig::default());
    // 4 + 3 + 2 + 1 pairs along a chain of five
    assert_eq!(count(&reader, Conjunction::new([rel("ancestor", "a", "b")])), 10);
}

#[test]
fn test_deleted_rules_stop_contributing_after_commit() {
    let db = kinship();
    chain(&db, 3);

    let writer = Transaction::open(&db, TransactionMode::Write, ReasonerConfig::default());
    for rule in ancestor_rules() {
        writer.declare_rule(rule).unwrap();
    }
    writer.commit().unwrap();

    let deleter = Transaction::open(&db, TransactionMode::Write, ReasonerConfig::default());
    deleter.delete_rule("ancestor-step").unwrap();
    let changes = deleter.commit().unwrap();
    assert_eq!(changes.deletes, vec!["ancestor-step".to_string()]);
    assert!(deleter
        .rules()
        .rules_concluding_type(&"ancestor".into())
        .unwrap()
        .iter()
        .all(|r| r.label() != "ancestor-step"));

    let reader = Transaction::open(&db, TransactionMode::Read, ReasonerConfig::default());
    assert_eq!(count(&reader, Conjunction::new([rel("ancestor", "a", "b")])), 2);
}

#[test]
fn test_invalid_rules_are_rejected_at_declaration() {
    let db = kinship();
    let txn = Transaction::open(&db, TransactionMode::Write, ReasonerConfig::default());

    let unbound = RuleDefinition::new(
        "dangling",
        Conjunction::new([rel("parent", "x", "y")]),
        Conclusion::relation("ancestor", [Term::var("x"), Term::var("nobody")]),
    );
    assert!(matches!(
        txn.declare_rule(unbound),
        Err(Error::UnboundConclusionVariable { .. })
    ));

    let unknown = RuleDefinition::new(
        "ghost",
        Conjunction::new([rel("haunts", "x", "y")]),
        Conclusion::relation("ancestor", [Term::var("x"), Term::var("y")]),
    );
    assert!(matches!(txn.declare_rule(unknown), Err(Error::UnknownType(_))));

    let wrong_value = RuleDefinition::new(
        "numbered",
        Conjunction::new([Atom::isa("x", "person")]),
        Conclusion::has("x", "name", Term::value(Value::Long(7))),
    );
    assert!(matches!(
        txn.declare_rule(wrong_value),
        Err(Error::InvalidConclusion { .. })
    ));

    let first = ancestor_rules().remove(0);
    txn.declare_rule(first.clone()).unwrap();
    assert_eq!(
        txn.declare_rule(first).err(),
        Some(Error::DuplicateLabel("ancestor-base".into()))
    );
}

#[test]
fn test_negation_cycles_are_rejected() {
    let db = kinship();
    let txn = Transaction::open(&db, TransactionMode::Write, ReasonerConfig::default());
    let declared = txn.declare_rule(RuleDefinition::new(
        "sibling-from-unrelated",
        Conjunction::new([Atom::isa("x", "person"), Atom::isa("y", "person")])
            .with_negation(Conjunction::new([rel("sibling", "x", "y")])),
        Conclusion::relation("sibling", [Term::var("x"), Term::var("y")]),
    ));
    assert!(matches!(declared, Err(Error::NegationCycle(_))));
    assert!(txn.get_rule("sibling-from-unrelated").is_none());
}

// ============================================================================
// Concurrency and cancellation
// ============================================================================

#[test]
fn test_parallel_readers_share_one_transaction() {
    let db = kinship();
    chain(&db, 6);
    let txn = Transaction::open(&db, TransactionMode::Write, ReasonerConfig::default());
    for rule in ancestor_rules() {
        txn.declare_rule(rule).unwrap();
    }

    let results: Vec<usize> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| count(&txn, Conjunction::new([rel("ancestor", "a", "b")]))))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(results.iter().all(|n| *n == 15));
    assert_eq!(db.store().open_cursors(), 0);
}

#[test]
fn test_closing_the_transaction_cancels_open_streams() {
    let db = kinship();
    chain(&db, 4);
    let txn = Transaction::open(&db, TransactionMode::Read, ReasonerConfig::default());
    let mut stream = txn.resolve(Conjunction::new([rel("parent", "a", "b")]), ConceptMap::new());
    assert!(matches!(stream.next(), Some(Ok(_))));

    thread::scope(|s| {
        s.spawn(|| txn.close());
    });
    assert_eq!(stream.next(), Some(Err(Error::Cancelled)));
    assert_eq!(stream.state(), ResolverState::Failed);
    assert!(stream.next().is_none());
}

#[test]
fn test_cancel_handles_work_from_other_threads() {
    let db = kinship();
    chain(&db, 4);
    let txn = Transaction::open(&db, TransactionMode::Read, ReasonerConfig::default());
    let mut stream = txn.resolve(Conjunction::new([Atom::isa("p", "person")]), ConceptMap::new());
    let handle = stream.cancel_handle();
    thread::spawn(move || handle.cancel()).join().unwrap();
    assert_eq!(stream.next(), Some(Err(Error::Cancelled)));
    assert!(txn.is_open());
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_file_controls_inference() -> anyhow::Result<()> {
    let db = kinship();
    let people = chain(&db, 3);
    let writer = Transaction::open(&db, TransactionMode::Write, ReasonerConfig::default());
    for rule in ancestor_rules() {
        writer.declare_rule(rule)?;
    }
    writer.commit()?;

    let dir = tempdir()?;
    let path = dir.path().join("reasoner.json");
    std::fs::write(&path, serde_json::json!({ "inference": false }).to_string())?;
    let config = ReasonerConfig::from_json_file(&path)?;

    let reader = Transaction::open(&db, TransactionMode::Read, config);
    let found: BTreeSet<ConceptMap> = reader
        .resolve(
            Conjunction::new([rel("parent", "a", "b")]),
            ConceptMap::new().with("a", Concept::Thing(people[0])),
        )
        .map(|a| a.map(|a| a.map))
        .collect::<Result<_, _>>()?;
    assert_eq!(found.len(), 1);
    assert_eq!(count(&reader, Conjunction::new([rel("ancestor", "a", "b")])), 0);
    Ok(())
}
