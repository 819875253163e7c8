//! Conjunctive answer resolution.
//!
//! [`Resolver::resolve`] returns a lazy [`AnswerStream`]. Each call to
//! `next` advances a small state machine:
//!
//! - `Init` → `Planning`: the conjunction is planned once up front so an
//!   unplannable query fails before any work is done.
//! - `Resolving`: the first pass over stored facts and rules. Recursive
//!   rule calls are tabled and every cycle is run to its fixed point.
//! - `Draining`: answers found by the last pass are handed out one by one.
//! - `Recursing`: a further pass, run only when some cycle used up its
//!   rounds for the previous pass. It resumes from the tables built so far.
//! - `Done` / `Failed`: terminal.
//!
//! Every answer is yielded at most once, whichever pass or rule path found
//! it. Cancelling the stream, or the transaction it belongs to, stops it at
//! the next step with a single `Cancelled` error.

mod plan;
mod solve;

use ahash::AHashSet;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use typegraph_pattern::{ConceptMap, Conjunction};
use typegraph_store::{FactStore, TypeHierarchy};

use crate::config::ReasonerConfig;
use crate::error::{Error, Result};
use crate::rule::RuleStore;
use crate::type_reasoner::TypeReasoner;
use solve::Context;

/// How one derived fact was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Explanation {
    /// Label of the rule that fired.
    pub rule: String,
    /// Bindings of the rule's conclusion variables.
    pub conclusion: ConceptMap,
    /// The condition answer the conclusion was derived from.
    pub condition: ConceptMap,
    /// Derivations of the facts the condition itself relied on.
    pub children: Vec<Explanation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub map: ConceptMap,
    /// Empty unless explanations are enabled.
    pub explanations: Vec<Explanation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverState {
    Init,
    Planning,
    Resolving,
    Draining,
    Recursing,
    Done,
    Failed,
}

impl ResolverState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ResolverState::Done | ResolverState::Failed)
    }
}

/// Cancels the stream it was taken from.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Resolver
// ============================================================================

#[derive(Clone)]
pub struct Resolver {
    pub(crate) schema: Arc<dyn TypeHierarchy>,
    pub(crate) store: Arc<dyn FactStore>,
    pub(crate) rules: Arc<RuleStore>,
    pub(crate) types: Arc<TypeReasoner>,
    pub(crate) config: ReasonerConfig,
    cancel: Arc<AtomicBool>,
}

impl Resolver {
    /// `cancel` is the owning transaction's token; raising it stops every
    /// stream this resolver has produced.
    pub fn new(
        schema: Arc<dyn TypeHierarchy>,
        store: Arc<dyn FactStore>,
        rules: Arc<RuleStore>,
        types: Arc<TypeReasoner>,
        config: ReasonerConfig,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            schema,
            store,
            rules,
            types,
            config,
            cancel,
        }
    }

    pub fn config(&self) -> &ReasonerConfig {
        &self.config
    }

    /// Lazily resolve `conjunction`, extending `seed`.
    pub fn resolve(&self, conjunction: Conjunction, seed: ConceptMap) -> AnswerStream {
        let own = Arc::new(AtomicBool::new(false));
        let context = Context::new(self.clone(), vec![self.cancel.clone(), own.clone()]);
        AnswerStream {
            context,
            conjunction,
            seed,
            state: ResolverState::Init,
            buffer: VecDeque::new(),
            seen: AHashSet::new(),
            cancel: own,
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Answer stream
// ============================================================================

pub struct AnswerStream {
    context: Context,
    conjunction: Conjunction,
    seed: ConceptMap,
    state: ResolverState,
    buffer: VecDeque<Answer>,
    seen: AHashSet<ConceptMap>,
    cancel: Arc<AtomicBool>,
}

impl AnswerStream {
    pub fn state(&self) -> ResolverState {
        self.state
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    fn fail(&mut self, error: Error) -> Option<Result<Answer>> {
        self.buffer.clear();
        self.state = ResolverState::Failed;
        match &error {
            Error::Cancelled => tracing::warn!(
                pass = self.context.pass(),
                conjunction = %self.conjunction,
                "resolution cancelled"
            ),
            other => tracing::warn!(error = %other, conjunction = %self.conjunction, "resolution failed"),
        }
        Some(Err(error))
    }

    fn run_pass(&mut self) -> Result<()> {
        self.context.begin_pass();
        let partials = self.context.solve(&self.conjunction, &self.seed)?;
        let before = self.buffer.len();
        for (map, explanations) in partials {
            if self.seen.insert(map.clone()) {
                self.buffer.push_back(Answer { map, explanations });
            }
        }
        tracing::trace!(
            pass = self.context.pass(),
            new_answers = self.buffer.len() - before,
            again = self.context.needs_another_pass(),
            "resolution pass finished"
        );
        Ok(())
    }
}

impl Iterator for AnswerStream {
    type Item = Result<Answer>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.state.is_terminal() {
                return None;
            }
            if self.state != ResolverState::Init && self.context.is_cancelled() {
                return self.fail(Error::Cancelled);
            }
            match self.state {
                ResolverState::Init => self.state = ResolverState::Planning,
                ResolverState::Planning => {
                    if let Err(e) = self.context.check_plan(&self.conjunction, &self.seed) {
                        return self.fail(e);
                    }
                    self.state = ResolverState::Resolving;
                }
                ResolverState::Resolving | ResolverState::Recursing => {
                    if let Err(e) = self.run_pass() {
                        return self.fail(e);
                    }
                    self.state = ResolverState::Draining;
                }
                ResolverState::Draining => {
                    if let Some(answer) = self.buffer.pop_front() {
                        return Some(Ok(answer));
                    }
                    self.state = if self.context.needs_another_pass() {
                        ResolverState::Recursing
                    } else {
                        ResolverState::Done
                    };
                }
                ResolverState::Done | ResolverState::Failed => return None,
            }
        }
    }
}

impl std::fmt::Debug for AnswerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerStream")
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("yielded", &(self.seen.len() - self.buffer.len()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockManager;
    use typegraph_pattern::{Atom, Concept, Conclusion, Label, RuleDefinition, Term};
    use typegraph_store::{MemoryStore, Schema};

    fn label(s: &str) -> Label {
        Label::new(s)
    }

    struct Fixture {
        schema: Arc<Schema>,
        store: MemoryStore,
        rules: Arc<RuleStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut builder = Schema::builder();
            builder
                .entity("person", None)
                .unwrap()
                .relation("parent", None, &["person", "person"])
                .unwrap()
                .relation("ancestor", None, &["person", "person"])
                .unwrap();
            let schema = Arc::new(builder.build());
            let rules = Arc::new(RuleStore::new(
                schema.clone(),
                Arc::new(LockManager::new()),
                &Default::default(),
            ));
            Self {
                schema,
                store: MemoryStore::new(),
                rules,
            }
        }

        fn person(&self) -> Concept {
            Concept::Thing(self.store.insert_thing(&label("person")))
        }

        fn parent(&self, a: &Concept, b: &Concept) {
            self.store
                .insert_relation(&label("parent"), &[a.clone(), b.clone()])
                .unwrap();
        }

        fn resolver(&self, config: ReasonerConfig) -> Resolver {
            let store: Arc<dyn FactStore> = Arc::new(self.store.clone());
            let types = Arc::new(TypeReasoner::new(
                self.schema.clone(),
                store.clone(),
                self.rules.clone(),
                &config,
            ));
            Resolver::new(
                self.schema.clone(),
                store,
                self.rules.clone(),
                types,
                config,
                Arc::new(AtomicBool::new(false)),
            )
        }
    }

    fn ancestor_rules(rules: &RuleStore) {
        rules
            .declare(RuleDefinition::new(
                "ancestor-base",
                Conjunction::new([Atom::relation("parent", [Term::var("a"), Term::var("b")])]),
                Conclusion::relation("ancestor", [Term::var("a"), Term::var("b")]),
            ))
            .unwrap();
        rules
            .declare(RuleDefinition::new(
                "ancestor-step",
                Conjunction::new([
                    Atom::relation("ancestor", [Term::var("a"), Term::var("m")]),
                    Atom::relation("parent", [Term::var("m"), Term::var("b")]),
                ]),
                Conclusion::relation("ancestor", [Term::var("a"), Term::var("b")]),
            ))
            .unwrap();
    }

    #[test]
    fn state_moves_through_resolution() {
        let fx = Fixture::new();
        let (a, b) = (fx.person(), fx.person());
        fx.parent(&a, &b);
        let mut stream = fx.resolver(ReasonerConfig::default()).resolve(
            Conjunction::new([Atom::relation("parent", [Term::var("x"), Term::var("y")])]),
            ConceptMap::new(),
        );
        assert_eq!(stream.state(), ResolverState::Init);
        let first = stream.next().unwrap().unwrap();
        assert_eq!(stream.state(), ResolverState::Draining);
        assert_eq!(first.map, ConceptMap::new().with("x", a).with("y", b));
        assert!(stream.next().is_none());
        assert_eq!(stream.state(), ResolverState::Done);
    }

    #[test]
    fn left_recursive_rules_reach_the_closure() {
        let fx = Fixture::new();
        let people: Vec<Concept> = (0..4).map(|_| fx.person()).collect();
        for pair in people.windows(2) {
            fx.parent(&pair[0], &pair[1]);
        }
        ancestor_rules(&fx.rules);

        let answers: Vec<Answer> = fx
            .resolver(ReasonerConfig::default())
            .resolve(
                Conjunction::new([Atom::relation("ancestor", [Term::var("x"), Term::var("y")])]),
                ConceptMap::new(),
            )
            .collect::<Result<_>>()
            .unwrap();
        // 3 + 2 + 1 ordered pairs along the chain
        assert_eq!(answers.len(), 6);
        let unique: AHashSet<&ConceptMap> = answers.iter().map(|a| &a.map).collect();
        assert_eq!(unique.len(), 6);
    }

    #[test]
    fn cycles_out_of_rounds_resume_in_a_later_pass() {
        let fx = Fixture::new();
        let people: Vec<Concept> = (0..10).map(|_| fx.person()).collect();
        for pair in people.windows(2) {
            fx.parent(&pair[0], &pair[1]);
        }
        ancestor_rules(&fx.rules);

        let config = ReasonerConfig {
            cycle_rounds: 2,
            ..ReasonerConfig::default()
        };
        let mut stream = fx.resolver(config).resolve(
            Conjunction::new([Atom::relation("ancestor", [Term::var("x"), Term::var("y")])]),
            ConceptMap::new(),
        );
        let mut states = Vec::new();
        let mut found = AHashSet::new();
        while let Some(answer) = stream.next() {
            states.push(stream.state());
            assert!(found.insert(answer.unwrap().map));
        }
        assert_eq!(found.len(), 45);
        assert!(stream.context.pass() > 1);
        assert_eq!(stream.state(), ResolverState::Done);
        assert!(states.iter().all(|s| *s == ResolverState::Draining));
    }

    #[test]
    fn seeded_resolution_only_extends_the_seed() {
        let fx = Fixture::new();
        let people: Vec<Concept> = (0..3).map(|_| fx.person()).collect();
        fx.parent(&people[0], &people[1]);
        fx.parent(&people[1], &people[2]);
        ancestor_rules(&fx.rules);

        let seed = ConceptMap::new().with("x", people[1].clone());
        let answers: Vec<Answer> = fx
            .resolver(ReasonerConfig::default())
            .resolve(
                Conjunction::new([Atom::relation("ancestor", [Term::var("x"), Term::var("y")])]),
                seed,
            )
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(
            answers[0].map,
            ConceptMap::new()
                .with("x", people[1].clone())
                .with("y", people[2].clone())
        );
    }

    #[test]
    fn disabled_inference_answers_from_storage_only() {
        let fx = Fixture::new();
        let (a, b) = (fx.person(), fx.person());
        fx.parent(&a, &b);
        ancestor_rules(&fx.rules);
        let count = fx
            .resolver(ReasonerConfig::default().with_inference(false))
            .resolve(
                Conjunction::new([Atom::relation("ancestor", [Term::var("x"), Term::var("y")])]),
                ConceptMap::new(),
            )
            .count();
        assert_eq!(count, 0);
    }

    #[test]
    fn explanations_name_the_rules_used() {
        let fx = Fixture::new();
        let people: Vec<Concept> = (0..3).map(|_| fx.person()).collect();
        fx.parent(&people[0], &people[1]);
        fx.parent(&people[1], &people[2]);
        ancestor_rules(&fx.rules);

        let seed = ConceptMap::new()
            .with("x", people[0].clone())
            .with("y", people[2].clone());
        let answers: Vec<Answer> = fx
            .resolver(ReasonerConfig::default().with_explain(true))
            .resolve(
                Conjunction::new([Atom::relation("ancestor", [Term::var("x"), Term::var("y")])]),
                seed,
            )
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(answers.len(), 1);
        let top = &answers[0].explanations[0];
        assert_eq!(top.rule, "ancestor-step");
        assert_eq!(top.children[0].rule, "ancestor-base");
    }

    #[test]
    fn cancelling_yields_one_error_then_ends() {
        let fx = Fixture::new();
        let people: Vec<Concept> = (0..3).map(|_| fx.person()).collect();
        fx.parent(&people[0], &people[1]);
        fx.parent(&people[0], &people[2]);
        let mut stream = fx.resolver(ReasonerConfig::default()).resolve(
            Conjunction::new([Atom::relation("parent", [Term::var("x"), Term::var("y")])]),
            ConceptMap::new(),
        );
        assert!(stream.next().unwrap().is_ok());
        stream.cancel_handle().cancel();
        assert_eq!(stream.next(), Some(Err(Error::Cancelled)));
        assert_eq!(stream.state(), ResolverState::Failed);
        assert!(stream.next().is_none());
    }
}
