//! Checks run when a rule is declared.

use std::collections::{BTreeMap, BTreeSet};

use typegraph_pattern::{Atom, Concept, Conclusion, Conjunction, Label, RuleDefinition, Term, Variable};
use typegraph_store::{TypeHierarchy, TypeKind};

use crate::error::{Error, Result};

pub(crate) fn validate(definition: &RuleDefinition, schema: &dyn TypeHierarchy) -> Result<()> {
    let rule = definition.label.as_str();
    check_condition(rule, &definition.when, schema)?;
    check_conclusion(rule, definition, schema)?;

    let bound = definition.when.binding_variables();
    for variable in definition.then.variables() {
        if !bound.contains(variable) {
            return Err(Error::UnboundConclusionVariable {
                rule: rule.to_string(),
                variable: variable.clone(),
            });
        }
    }
    Ok(())
}

fn check_condition(rule: &str, when: &Conjunction, schema: &dyn TypeHierarchy) -> Result<()> {
    let invalid = |reason: String| Error::InvalidCondition {
        rule: rule.to_string(),
        reason,
    };
    if when.atoms.is_empty() {
        return Err(invalid("condition has no positive constraints".to_string()));
    }
    for atom in &when.atoms {
        let Some(label) = atom.type_label() else {
            continue;
        };
        let kind = schema
            .kind(label)
            .ok_or_else(|| Error::UnknownType(label.clone()))?;
        match atom {
            Atom::Relation { players, .. } => {
                if kind != TypeKind::Relation {
                    return Err(invalid(format!("`{label}` is not a relation type")));
                }
                let arity = schema.arity(label).unwrap_or(0);
                if arity != players.len() {
                    return Err(invalid(format!(
                        "`{label}` has {arity} players, {} given",
                        players.len()
                    )));
                }
            }
            Atom::Has { .. } if kind != TypeKind::Attribute => {
                return Err(invalid(format!("`{label}` is not an attribute type")));
            }
            _ => {}
        }
    }
    for negated in &when.negations {
        check_condition(rule, negated, schema)?;
    }
    Ok(())
}

fn check_conclusion(rule: &str, definition: &RuleDefinition, schema: &dyn TypeHierarchy) -> Result<()> {
    let invalid = |reason: String| Error::InvalidConclusion {
        rule: rule.to_string(),
        reason,
    };
    let label = definition.then.label();
    let kind = schema
        .kind(label)
        .ok_or_else(|| Error::UnknownType(label.clone()))?;
    let declared = declared_types(&definition.when, schema);

    match &definition.then {
        Conclusion::Relation { players, .. } => {
            if kind != TypeKind::Relation {
                return Err(invalid(format!("`{label}` is not a relation type")));
            }
            let arity = schema.arity(label).unwrap_or(0);
            if arity != players.len() {
                return Err(invalid(format!(
                    "`{label}` has {arity} players, {} concluded",
                    players.len()
                )));
            }
            for (position, player) in players.iter().enumerate() {
                let allowed = schema.player_types(label, position)?;
                let fits = match player {
                    Term::Var(v) => declared.get(v).map_or(true, |types| !types.is_disjoint(&allowed)),
                    Term::Const(Concept::Value(_)) => false,
                    Term::Const(Concept::Thing(_)) => true,
                };
                if !fits {
                    return Err(invalid(format!(
                        "{player} cannot play position {position} of `{label}`"
                    )));
                }
            }
        }
        Conclusion::Has { owner, value, .. } => {
            if kind != TypeKind::Attribute {
                return Err(invalid(format!("`{label}` is not an attribute type")));
            }
            let owners = schema.owner_types(label);
            if let Some(types) = declared.get(owner) {
                if types.is_disjoint(&owners) {
                    return Err(invalid(format!("no type of {owner} may own `{label}`")));
                }
            }
            match value {
                Term::Const(Concept::Value(v)) if Some(v.value_type()) != schema.value_type(label) => {
                    return Err(invalid(format!("{v} does not match the value type of `{label}`")));
                }
                Term::Const(Concept::Thing(_)) => {
                    return Err(invalid("attribute values must be values".to_string()));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Types each variable is explicitly declared with via `isa`, expanded to
/// subtypes.
fn declared_types(when: &Conjunction, schema: &dyn TypeHierarchy) -> BTreeMap<Variable, BTreeSet<Label>> {
    let mut out: BTreeMap<Variable, BTreeSet<Label>> = BTreeMap::new();
    for atom in &when.atoms {
        if let Atom::Isa { var, label } = atom {
            let types = schema.subtypes_transitive(label);
            out.entry(var.clone())
                .and_modify(|existing| existing.retain(|t| types.contains(t)))
                .or_insert(types);
        }
    }
    out
}

// ============================================================================
// Stratification
// ============================================================================

/// Labels of concludable atoms in `when`, positive and under negation.
fn condition_labels(when: &Conjunction) -> (BTreeSet<Label>, BTreeSet<Label>) {
    let positive = when
        .atoms
        .iter()
        .filter(|a| a.is_concludable())
        .filter_map(Atom::type_label)
        .cloned()
        .collect();
    let mut negative = BTreeSet::new();
    for negated in &when.negations {
        let (p, n) = condition_labels(negated);
        negative.extend(p);
        negative.extend(n);
    }
    (positive, negative)
}

/// Reject rule sets in which a rule depends on itself through negation.
///
/// Rule `a` depends on `b` when `b` concludes a subtype of a type in `a`'s
/// condition. A cycle containing a negative dependency is not stratifiable.
pub(crate) fn check_stratified<'a>(
    rules: impl IntoIterator<Item = &'a RuleDefinition>,
    schema: &dyn TypeHierarchy,
) -> Result<()> {
    let rules: Vec<&RuleDefinition> = rules.into_iter().collect();
    let depends = |labels: &BTreeSet<Label>| -> Vec<usize> {
        rules
            .iter()
            .enumerate()
            .filter(|(_, b)| {
                labels
                    .iter()
                    .any(|l| schema.is_subtype_of(b.then.label(), l))
            })
            .map(|(i, _)| i)
            .collect()
    };
    let mut positive_edges = Vec::with_capacity(rules.len());
    let mut negative_edges = Vec::with_capacity(rules.len());
    for rule in &rules {
        let (positive, negative) = condition_labels(&rule.when);
        positive_edges.push(depends(&positive));
        negative_edges.push(depends(&negative));
    }
    let edges: Vec<Vec<usize>> = positive_edges
        .iter()
        .zip(&negative_edges)
        .map(|(p, n)| p.iter().chain(n).copied().collect())
        .collect();

    for (from, negated) in negative_edges.iter().enumerate() {
        for &to in negated {
            if reaches(&edges, to, from) {
                return Err(Error::NegationCycle(vec![
                    rules[from].label.clone(),
                    rules[to].label.clone(),
                ]));
            }
        }
    }
    Ok(())
}

fn reaches(edges: &[Vec<usize>], from: usize, to: usize) -> bool {
    let mut seen = vec![false; edges.len()];
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if std::mem::replace(&mut seen[node], true) {
            continue;
        }
        stack.extend(edges[node].iter().copied());
    }
    false
}
