//! Set-at-a-time evaluation of one conjunction, with tabled rule calls.
//!
//! Partial substitutions flow through the planned steps. Stored facts are
//! merge-joined: partials are sorted by the encoded concept on the join
//! position and a single cursor per type is seeked forward through them.
//! Derived facts come from rules whose conclusion unifies with the atom.
//!
//! Each (rule, seed) call is tabled. A call already on the active stack is
//! cut: it replays what its table holds so far, and the caller is marked as
//! depending on that stack entry. The lowest entry a cycle depends on is its
//! leader. The leader re-solves its body until no table grows, then every
//! call of the cycle is complete and its table final. A leader that runs
//! out of rounds for the current pass leaves the cycle open and the stream
//! resumes it in a further pass.

use ahash::{AHashMap, AHashSet};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use typegraph_pattern::{Atom, Concept, ConceptMap, Conclusion, Conjunction, Label, Term, Variable};
use typegraph_store::encoding::encode_concept;
use typegraph_store::{BoxSeeker, IntersectSeeker, TypeKind, UnionSeeker, VecSeeker};

use super::plan::{self, Step};
use super::{Explanation, Resolver};
use crate::error::{Error, Result};
use crate::rule::Rule;

/// A partial answer and the derivations it used.
pub(crate) type Partial = (ConceptMap, Vec<Explanation>);

/// No dependency on any stack entry.
const ACYCLIC: usize = usize::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CallKey {
    rule: String,
    seed: ConceptMap,
}

#[derive(Default)]
struct Table {
    answers: Vec<(ConceptMap, Option<Explanation>)>,
    seen: AHashSet<ConceptMap>,
}

pub(crate) struct Context {
    resolver: Resolver,
    cancel: Vec<Arc<AtomicBool>>,
    tables: AHashMap<CallKey, Table>,
    /// Per active call, the lowest stack depth it has been seen to depend on.
    stack: Vec<usize>,
    active: AHashMap<CallKey, usize>,
    /// Solved this round but waiting on the leader at the given depth.
    pending: AHashMap<CallKey, usize>,
    /// Tables that can no longer grow.
    completed: AHashSet<CallKey>,
    /// Bumped whenever any table gains an answer.
    growth: u64,
    /// Bumped whenever a cycle is left open for a later pass.
    opened: u64,
    incomplete: bool,
    pass: usize,
}

impl Context {
    pub(crate) fn new(resolver: Resolver, cancel: Vec<Arc<AtomicBool>>) -> Self {
        Self {
            resolver,
            cancel,
            tables: AHashMap::new(),
            stack: Vec::new(),
            active: AHashMap::new(),
            pending: AHashMap::new(),
            completed: AHashSet::new(),
            growth: 0,
            opened: 0,
            incomplete: false,
            pass: 0,
        }
    }

    pub(crate) fn pass(&self) -> usize {
        self.pass
    }

    pub(crate) fn begin_pass(&mut self) {
        self.pass += 1;
        self.incomplete = false;
    }

    /// Some cycle stopped at its round limit during the last pass.
    pub(crate) fn needs_another_pass(&self) -> bool {
        self.incomplete
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.iter().any(|c| c.load(Ordering::SeqCst))
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Validate that `conjunction` can be planned under `seed`.
    pub(crate) fn check_plan(&self, conjunction: &Conjunction, seed: &ConceptMap) -> Result<()> {
        self.plan(conjunction, seed).map(|_| ())
    }

    fn plan(&self, conjunction: &Conjunction, seed: &ConceptMap) -> Result<Option<Vec<Step>>> {
        let bound: BTreeSet<Variable> = seed.variables().cloned().collect();
        let types = &self.resolver.types;
        plan::plan(conjunction, &bound, |atom| {
            Ok(types.infer_possible_types(atom, seed)?.len())
        })
    }

    /// Every answer to `conjunction` extending `seed` derivable with the
    /// current tables.
    pub(crate) fn solve(&mut self, conjunction: &Conjunction, seed: &ConceptMap) -> Result<Vec<Partial>> {
        self.check_cancelled()?;
        let Some(steps) = self.plan(conjunction, seed)? else {
            return Ok(Vec::new());
        };
        tracing::trace!(plan = ?plan::describe(&steps), seed = %seed, "solving conjunction");

        let mut partials: Vec<Partial> = vec![(seed.clone(), Vec::new())];
        for step in &steps {
            if partials.is_empty() {
                break;
            }
            self.check_cancelled()?;
            partials = match step {
                Step::Isa { var, atoms } => self.extend_isa(var, atoms, partials)?,
                Step::Concludable(atom) => self.extend_concludable(atom, partials)?,
                Step::Filter(atom) => partials
                    .into_iter()
                    .filter(|(map, _)| passes_filter(atom, map))
                    .collect(),
            };
        }

        if conjunction.negations.is_empty() {
            return Ok(partials);
        }
        let mut kept = Vec::with_capacity(partials.len());
        for partial in partials {
            if self.survives_negations(conjunction, &partial.0)? {
                kept.push(partial);
            }
        }
        Ok(kept)
    }

    /// Whether `conjunction` has at least one answer from `seed`, resolved to
    /// its own fixed point.
    fn exists(&mut self, conjunction: &Conjunction, seed: &ConceptMap) -> Result<bool> {
        loop {
            self.begin_pass();
            if !self.solve(conjunction, seed)?.is_empty() {
                return Ok(true);
            }
            if !self.needs_another_pass() {
                return Ok(false);
            }
        }
    }

    fn survives_negations(&mut self, conjunction: &Conjunction, map: &ConceptMap) -> Result<bool> {
        for negated in &conjunction.negations {
            let vars = negated.variables();
            let seed = map.restrict(&vars);
            let mut nested = Context::new(self.resolver.clone(), self.cancel.clone());
            if nested.exists(negated, &seed)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ========================================================================
    // isa
    // ========================================================================

    fn extend_isa(&mut self, var: &Variable, atoms: &[Atom], partials: Vec<Partial>) -> Result<Vec<Partial>> {
        let (bound, unbound): (Vec<Partial>, Vec<Partial>) =
            partials.into_iter().partition(|(map, _)| map.contains(var));
        let mut out = Vec::new();

        // Bound things are checked by one forward pass over the instances.
        let (things, values): (Vec<Partial>, Vec<Partial>) = bound
            .into_iter()
            .partition(|(map, _)| map.get(var).and_then(Concept::as_thing).is_some());
        if !things.is_empty() {
            let seeker = self.instances(atoms, &ConceptMap::new())?;
            out.extend(self.semi_join(var, things, seeker)?);
        }
        // A value is an instance of an attribute type by its value type.
        for partial in values {
            if self.all_satisfiable(atoms, &partial.0)? {
                out.push(partial);
            }
        }

        for (map, explanations) in unbound {
            let mut seeker = self.instances(atoms, &map)?;
            while seeker.has_next() {
                self.check_cancelled()?;
                let concept = seeker.next()?;
                let mut extended = map.clone();
                if extended.bind(var.clone(), concept) {
                    out.push((extended, explanations.clone()));
                }
            }
            seeker.recycle();
        }
        Ok(out)
    }

    fn all_satisfiable(&self, atoms: &[Atom], map: &ConceptMap) -> Result<bool> {
        for atom in atoms {
            if self.resolver.types.infer_possible_types(atom, map)?.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Ascending instances satisfying every `isa` atom: a union over each
    /// atom's possible types, intersected across atoms.
    fn instances(&self, atoms: &[Atom], map: &ConceptMap) -> Result<BoxSeeker<Concept>> {
        let mut per_atom: Vec<BoxSeeker<Concept>> = Vec::with_capacity(atoms.len());
        for atom in atoms {
            let types = self.resolver.types.infer_possible_types(atom, map)?;
            let mut children: Vec<BoxSeeker<Concept>> = Vec::with_capacity(types.len());
            for label in &types {
                match self.resolver.schema.kind(label) {
                    Some(TypeKind::Entity) => children.push(self.resolver.store.things(label)),
                    Some(TypeKind::Attribute) => children.push(self.resolver.store.attribute_values(label)),
                    _ => {}
                }
            }
            per_atom.push(Box::new(UnionSeeker::new(children, encode_concept)));
        }
        Ok(match per_atom.len() {
            0 => Box::new(VecSeeker::new(Vec::new())),
            1 => per_atom.remove(0),
            _ => Box::new(IntersectSeeker::new(per_atom, encode_concept)),
        })
    }

    /// Keep the partials whose binding of `var` the seeker produces. Partials
    /// are visited in ascending concept order so the seeker only moves
    /// forward.
    fn semi_join(
        &self,
        var: &Variable,
        partials: Vec<Partial>,
        mut seeker: BoxSeeker<Concept>,
    ) -> Result<Vec<Partial>> {
        let mut keyed: Vec<(Vec<u8>, Concept, Partial)> = partials
            .into_iter()
            .filter_map(|p| {
                let concept = p.0.get(var)?.clone();
                Some((encode_concept(&concept), concept, p))
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = Vec::new();
        for (key, concept, partial) in keyed {
            self.check_cancelled()?;
            if !seeker.try_seek(&concept, &encode_concept) {
                break;
            }
            if encode_concept(seeker.peek()?) == key {
                out.push(partial);
            }
        }
        seeker.recycle();
        Ok(out)
    }

    // ========================================================================
    // relation / has
    // ========================================================================

    fn extend_concludable(&mut self, atom: &Atom, partials: Vec<Partial>) -> Result<Vec<Partial>> {
        let mut typed: Vec<(Partial, BTreeSet<Label>)> = Vec::with_capacity(partials.len());
        for partial in partials {
            let types = self.resolver.types.infer_possible_types(atom, &partial.0)?;
            if !types.is_empty() {
                typed.push((partial, types));
            }
        }
        if typed.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = match atom {
            Atom::Relation { players, .. } => self.stored_relations(players, &typed)?,
            Atom::Has { owner, value, .. } => self.stored_ownerships(owner, value, &typed)?,
            _ => Vec::new(),
        };

        if self.resolver.config.inference {
            for (partial, types) in &typed {
                self.check_cancelled()?;
                out.extend(self.derived(atom, types, partial)?);
            }
        }
        Ok(dedup(out))
    }

    fn stored_relations(
        &self,
        players: &[Term],
        typed: &[(Partial, BTreeSet<Label>)],
    ) -> Result<Vec<Partial>> {
        let join = players
            .iter()
            .position(|t| typed.iter().all(|((map, _), _)| map.resolve(t).is_some()));
        let labels: BTreeSet<&Label> = typed.iter().flat_map(|(_, types)| types).collect();
        let mut out = Vec::new();

        for label in labels {
            let members: Vec<&Partial> = typed
                .iter()
                .filter(|(_, types)| types.contains(label))
                .map(|(p, _)| p)
                .collect();
            let Some(position) = join else {
                let mut seeker = self.resolver.store.relations(label, 0, None)?;
                let mut tuples = Vec::new();
                while seeker.has_next() {
                    self.check_cancelled()?;
                    tuples.push(seeker.next()?);
                }
                seeker.recycle();
                for (map, explanations) in &members {
                    for tuple in &tuples {
                        if let Some(extended) = unify_tuple(players, tuple, map) {
                            out.push((extended, explanations.clone()));
                        }
                    }
                }
                continue;
            };

            let mut keyed: Vec<(Vec<u8>, Concept, &Partial)> = members
                .into_iter()
                .filter_map(|p| {
                    let concept = p.0.resolve(&players[position])?;
                    Some((encode_concept(&concept), concept, p))
                })
                .collect();
            keyed.sort_by(|a, b| a.0.cmp(&b.0));

            let mut seeker = self.resolver.store.relations(label, position, None)?;
            let mut run: Option<(Vec<u8>, Vec<Vec<Concept>>)> = None;
            for (key, concept, (map, explanations)) in keyed {
                self.check_cancelled()?;
                if run.as_ref().map_or(true, |(k, _)| *k != key) {
                    run = Some((key.clone(), read_run(&mut seeker, players.len(), position, &concept)?));
                }
                let Some((_, tuples)) = &run else {
                    continue;
                };
                for tuple in tuples {
                    if let Some(extended) = unify_tuple(players, tuple, map) {
                        out.push((extended, explanations.clone()));
                    }
                }
            }
            seeker.recycle();
        }
        Ok(out)
    }

    fn stored_ownerships(
        &self,
        owner: &Term,
        value: &Term,
        typed: &[(Partial, BTreeSet<Label>)],
    ) -> Result<Vec<Partial>> {
        let store = &self.resolver.store;
        let mut out = Vec::new();
        for ((map, explanations), types) in typed {
            for attribute in types {
                let mut pairs: Vec<(Concept, Concept)> = Vec::new();
                match (map.resolve(owner), map.resolve(value)) {
                    (Some(Concept::Thing(id)), bound_value) => {
                        let mut seeker = store.attributes(id, attribute);
                        if let Some(v) = bound_value {
                            if seeker.try_seek(&v, &encode_concept) && *seeker.peek()? == v {
                                pairs.push((Concept::Thing(id), v));
                            }
                        } else {
                            while seeker.has_next() {
                                pairs.push((Concept::Thing(id), seeker.next()?));
                            }
                        }
                        seeker.recycle();
                    }
                    (Some(Concept::Value(_)), _) => {}
                    (None, Some(Concept::Value(v))) => {
                        let mut seeker = store.owners(attribute, &v);
                        while seeker.has_next() {
                            pairs.push((seeker.next()?, Concept::Value(v.clone())));
                        }
                        seeker.recycle();
                    }
                    (None, Some(Concept::Thing(_))) => {}
                    (None, None) => {
                        let mut values = store.attribute_values(attribute);
                        while values.has_next() {
                            self.check_cancelled()?;
                            let Concept::Value(v) = values.next()? else {
                                continue;
                            };
                            let mut owners = store.owners(attribute, &v);
                            while owners.has_next() {
                                pairs.push((owners.next()?, Concept::Value(v.clone())));
                            }
                            owners.recycle();
                        }
                        values.recycle();
                    }
                }
                for (o, v) in pairs {
                    let mut extended = map.clone();
                    if bind_term(&mut extended, owner, o) && bind_term(&mut extended, value, v) {
                        out.push((extended, explanations.clone()));
                    }
                }
            }
        }
        Ok(out)
    }

    // ========================================================================
    // rules
    // ========================================================================

    fn derived(&mut self, atom: &Atom, types: &BTreeSet<Label>, partial: &Partial) -> Result<Vec<Partial>> {
        let Some(label) = atom.type_label() else {
            return Ok(Vec::new());
        };
        let rules = self.resolver.rules.rules_concluding_type(label)?;
        let (map, explanations) = partial;
        let mut out = Vec::new();
        for rule in rules {
            if rule.is_deleted() || !types.contains(rule.conclusion_type()) {
                continue;
            }
            let Some(pairs) = term_pairs(atom, rule.then()) else {
                continue;
            };
            let Some(seed) = unify(&pairs, map) else {
                continue;
            };
            for (conclusion, explanation) in self.call_rule(&rule, seed)? {
                let Some(extended) = project(&pairs, &conclusion, map) else {
                    continue;
                };
                let mut used = explanations.clone();
                used.extend(explanation);
                out.push((extended, used));
            }
        }
        Ok(out)
    }

    fn call_rule(&mut self, rule: &Rule, seed: ConceptMap) -> Result<Vec<(ConceptMap, Option<Explanation>)>> {
        let key = CallKey {
            rule: rule.label().to_string(),
            seed,
        };
        if self.completed.contains(&key) {
            return Ok(self.table_answers(&key));
        }
        if let Some(&depth) = self.active.get(&key) {
            tracing::trace!(rule = %key.rule, seed = %key.seed, depth, "recursion cut");
            self.depends_on(depth);
            return Ok(self.table_answers(&key));
        }
        if let Some(&leader) = self.pending.get(&key) {
            self.depends_on(leader);
            return Ok(self.table_answers(&key));
        }
        self.check_cancelled()?;

        let depth = self.stack.len();
        tracing::trace!(rule = %key.rule, seed = %key.seed, depth, "recursing into rule");
        self.stack.push(ACYCLIC);
        self.active.insert(key.clone(), depth);
        let evaluated = self.evaluate(rule, &key, depth);
        self.active.remove(&key);
        let low = self.stack.pop().unwrap_or(ACYCLIC);
        evaluated?;

        if low < depth {
            // Inside a cycle led further up: hand this call, and every call
            // waiting on it, to that leader.
            for waiting in self.pending.values_mut() {
                if *waiting >= depth {
                    *waiting = low;
                }
            }
            self.pending.insert(key.clone(), low);
            self.depends_on(low);
        }
        Ok(self.table_answers(&key))
    }

    /// Solve the body of the call at `depth`, iterating while it leads a
    /// cycle whose tables still grow.
    fn evaluate(&mut self, rule: &Rule, key: &CallKey, depth: usize) -> Result<()> {
        let mut rounds = 0;
        loop {
            let before = self.growth;
            let opened = self.opened;
            let body = self.solve(rule.when(), &key.seed)?;
            self.record(rule, key, body);
            rounds += 1;

            let low = self.stack.get(depth).copied().unwrap_or(ACYCLIC);
            if low == ACYCLIC {
                // Answers read from a cycle left open are not final either.
                if self.opened == opened {
                    self.completed.insert(key.clone());
                }
                return Ok(());
            }
            if low < depth {
                return Ok(());
            }

            // This call leads a cycle; its members wait in `pending`.
            if self.growth == before {
                let members: Vec<CallKey> = self
                    .pending
                    .iter()
                    .filter(|(_, leader)| **leader >= depth)
                    .map(|(k, _)| k.clone())
                    .collect();
                tracing::trace!(rule = %key.rule, rounds, members = members.len(), "cycle complete");
                for member in members {
                    self.pending.remove(&member);
                    self.completed.insert(member);
                }
                self.completed.insert(key.clone());
                return Ok(());
            }
            self.pending.retain(|_, leader| *leader < depth);
            if rounds >= self.resolver.config.cycle_rounds {
                tracing::trace!(rule = %key.rule, rounds, pass = self.pass, "cycle left open for another pass");
                self.incomplete = true;
                self.opened += 1;
                return Ok(());
            }
            self.check_cancelled()?;
            if let Some(low) = self.stack.get_mut(depth) {
                *low = ACYCLIC;
            }
        }
    }

    /// Mark the innermost call as depending on the stack entry at `depth`.
    fn depends_on(&mut self, depth: usize) {
        if let Some(low) = self.stack.last_mut() {
            *low = (*low).min(depth);
        }
    }

    fn record(&mut self, rule: &Rule, key: &CallKey, body: Vec<Partial>) {
        let conclusion_vars: Vec<Variable> = rule.then().variables().into_iter().cloned().collect();
        let explain = self.resolver.config.explain;
        let table = self.tables.entry(key.clone()).or_default();
        let mut added = 0;
        for (answer, children) in body {
            let conclusion = answer.restrict(&conclusion_vars);
            if table.seen.insert(conclusion.clone()) {
                let explanation = explain.then(|| Explanation {
                    rule: rule.label().to_string(),
                    conclusion: conclusion.clone(),
                    condition: answer.clone(),
                    children,
                });
                table.answers.push((conclusion, explanation));
                added += 1;
            }
        }
        self.growth += added;
    }

    fn table_answers(&self, key: &CallKey) -> Vec<(ConceptMap, Option<Explanation>)> {
        self.tables
            .get(key)
            .map(|t| t.answers.clone())
            .unwrap_or_default()
    }
}

// ============================================================================
// Unification helpers
// ============================================================================

fn passes_filter(atom: &Atom, map: &ConceptMap) -> bool {
    let Atom::Compare { var, op, value } = atom else {
        return true;
    };
    match map.get(var).and_then(Concept::as_value) {
        Some(bound) => op.test(bound, value),
        None => false,
    }
}

fn bind_term(map: &mut ConceptMap, term: &Term, concept: Concept) -> bool {
    match term {
        Term::Const(c) => *c == concept,
        Term::Var(v) => map.bind(v.clone(), concept),
    }
}

fn unify_tuple(players: &[Term], tuple: &[Concept], map: &ConceptMap) -> Option<ConceptMap> {
    if players.len() != tuple.len() {
        return None;
    }
    let mut extended = map.clone();
    for (term, concept) in players.iter().zip(tuple) {
        if !bind_term(&mut extended, term, concept.clone()) {
            return None;
        }
    }
    Some(extended)
}

/// Collect the tuples whose player at `position` is `player`, leaving the
/// seeker just past them.
fn read_run(
    seeker: &mut BoxSeeker<Vec<Concept>>,
    arity: usize,
    position: usize,
    player: &Concept,
) -> Result<Vec<Vec<Concept>>> {
    // Thing tags sort first and ids start at one, so this is the smallest
    // tuple with `player` at `position`.
    let mut lowest = vec![Concept::thing(0); arity];
    lowest[position] = player.clone();
    let order = move |t: &Vec<Concept>| relation_order(position, t);
    let mut run = Vec::new();
    if !seeker.try_seek(&lowest, &order) {
        return Ok(run);
    }
    while seeker.has_next() {
        if seeker.peek()?.get(position) != Some(player) {
            break;
        }
        run.push(seeker.next()?);
    }
    Ok(run)
}

/// Order of a relation index on `position`: the player there, then every
/// player in turn.
fn relation_order(position: usize, tuple: &[Concept]) -> Vec<u8> {
    let mut key = tuple.get(position).map(encode_concept).unwrap_or_default();
    for player in tuple {
        key.extend(encode_concept(player));
    }
    key
}

/// Pair the atom's terms with the conclusion's, position by position.
fn term_pairs(atom: &Atom, conclusion: &Conclusion) -> Option<Vec<(Term, Term)>> {
    match (atom, conclusion) {
        (Atom::Relation { players, .. }, Conclusion::Relation { players: heads, .. }) => {
            if players.len() != heads.len() {
                return None;
            }
            Some(players.iter().cloned().zip(heads.iter().cloned()).collect())
        }
        (
            Atom::Has { owner, value, .. },
            Conclusion::Has {
                owner: head_owner,
                value: head_value,
                ..
            },
        ) => Some(vec![
            (owner.clone(), Term::Var(head_owner.clone())),
            (value.clone(), head_value.clone()),
        ]),
        _ => None,
    }
}

/// The seed for a rule call: conclusion variables fixed by what the atom
/// already knows. `None` when the two cannot agree.
fn unify(pairs: &[(Term, Term)], map: &ConceptMap) -> Option<ConceptMap> {
    let mut seed = ConceptMap::new();
    for (ours, head) in pairs {
        let Some(known) = map.resolve(ours) else {
            continue;
        };
        match head {
            Term::Const(c) if *c != known => return None,
            Term::Const(_) => {}
            Term::Var(v) => {
                if !seed.bind(v.clone(), known) {
                    return None;
                }
            }
        }
    }
    Some(seed)
}

/// Map a rule's conclusion answer back onto the atom's variables.
fn project(pairs: &[(Term, Term)], conclusion: &ConceptMap, map: &ConceptMap) -> Option<ConceptMap> {
    let mut extended = map.clone();
    for (ours, head) in pairs {
        let concept = match head {
            Term::Const(c) => c.clone(),
            Term::Var(v) => conclusion.get(v)?.clone(),
        };
        if !bind_term(&mut extended, ours, concept) {
            return None;
        }
    }
    Some(extended)
}

/// Drop repeated substitutions, keeping the first derivation of each.
fn dedup(partials: Vec<Partial>) -> Vec<Partial> {
    let mut seen = AHashSet::with_capacity(partials.len());
    partials
        .into_iter()
        .filter(|(map, _)| seen.insert(map.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unify_rejects_conflicting_repeated_head_variables() {
        let pairs = vec![
            (Term::thing(1), Term::var("x")),
            (Term::thing(2), Term::var("x")),
        ];
        assert_eq!(unify(&pairs, &ConceptMap::new()), None);
    }

    #[test]
    fn unify_and_project_round_through_a_conclusion() {
        let pairs = vec![(Term::thing(1), Term::var("a")), (Term::var("z"), Term::var("b"))];
        let seed = unify(&pairs, &ConceptMap::new()).unwrap();
        assert_eq!(seed, ConceptMap::new().with("a", Concept::thing(1)));

        let conclusion = ConceptMap::new()
            .with("a", Concept::thing(1))
            .with("b", Concept::thing(9));
        let projected = project(&pairs, &conclusion, &ConceptMap::new()).unwrap();
        assert_eq!(projected, ConceptMap::new().with("z", Concept::thing(9)));
    }

    #[test]
    fn runs_are_read_per_player_in_index_order() {
        let tuples: Vec<Vec<Concept>> = vec![
            vec![Concept::thing(3), Concept::thing(1)],
            vec![Concept::thing(1), Concept::thing(2)],
            vec![Concept::thing(2), Concept::thing(2)],
            vec![Concept::thing(4), Concept::thing(5)],
        ];
        let order = |t: &Vec<Concept>| relation_order(1, t);
        let mut seeker: BoxSeeker<Vec<Concept>> = Box::new(VecSeeker::sorted(tuples, &order));

        let run = read_run(&mut seeker, 2, 1, &Concept::thing(1)).unwrap();
        assert_eq!(run, vec![vec![Concept::thing(3), Concept::thing(1)]]);
        let run = read_run(&mut seeker, 2, 1, &Concept::thing(2)).unwrap();
        assert_eq!(run.len(), 2);
        assert_eq!(run[0][0], Concept::thing(1));
        assert!(read_run(&mut seeker, 2, 1, &Concept::thing(3)).unwrap().is_empty());
        let run = read_run(&mut seeker, 2, 1, &Concept::thing(5)).unwrap();
        assert_eq!(run, vec![vec![Concept::thing(4), Concept::thing(5)]]);
    }

    #[test]
    fn constants_in_heads_must_match() {
        let pairs = vec![(Term::thing(4), Term::thing(5))];
        assert_eq!(unify(&pairs, &ConceptMap::new()), None);
        let pairs = vec![(Term::var("y"), Term::thing(5))];
        let projected = project(&pairs, &ConceptMap::new(), &ConceptMap::new()).unwrap();
        assert_eq!(projected.get(&Variable::new("y")), Some(&Concept::thing(5)));
    }
}
