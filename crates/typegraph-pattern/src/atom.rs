//! Atoms and conjunctions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::concept::{Label, Term, Value, Variable};

/// Comparison operator of a value constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
}

impl Comparator {
    /// Evaluate `lhs <op> rhs`.
    ///
    /// Ordering comparisons between values of different value types are false;
    /// `Contains` only applies to strings.
    pub fn test(self, lhs: &Value, rhs: &Value) -> bool {
        if lhs.value_type() != rhs.value_type() {
            return matches!(self, Comparator::Neq);
        }
        match self {
            Comparator::Eq => lhs == rhs,
            Comparator::Neq => lhs != rhs,
            Comparator::Lt => lhs < rhs,
            Comparator::Lte => lhs <= rhs,
            Comparator::Gt => lhs > rhs,
            Comparator::Gte => lhs >= rhs,
            Comparator::Contains => match (lhs, rhs) {
                (Value::String(l), Value::String(r)) => l.contains(r.as_str()),
                _ => false,
            },
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparator::Eq => "==",
            Comparator::Neq => "!=",
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
            Comparator::Contains => "contains",
        }
    }
}

// ============================================================================
// Atom
// ============================================================================

/// One constraint of a conjunction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Atom {
    /// `$var isa label`: the thing bound to `var` has type `label` or a subtype.
    Isa { var: Variable, label: Label },
    /// `label(p0, p1, ...)`: a relation of type `label` (or a subtype) between
    /// the players, positionally.
    Relation { label: Label, players: Vec<Term> },
    /// `owner has attribute value`.
    Has {
        owner: Term,
        attribute: Label,
        value: Term,
    },
    /// `$var <op> value`: a filter over a value already bound to `var`.
    Compare {
        var: Variable,
        op: Comparator,
        value: Value,
    },
}

impl Atom {
    pub fn isa(var: &str, label: &str) -> Self {
        Atom::Isa {
            var: Variable::new(var),
            label: Label::new(label),
        }
    }

    pub fn relation(label: &str, players: impl IntoIterator<Item = Term>) -> Self {
        Atom::Relation {
            label: Label::new(label),
            players: players.into_iter().collect(),
        }
    }

    pub fn has(owner: Term, attribute: &str, value: Term) -> Self {
        Atom::Has {
            owner,
            attribute: Label::new(attribute),
            value,
        }
    }

    pub fn compare(var: &str, op: Comparator, value: Value) -> Self {
        Atom::Compare {
            var: Variable::new(var),
            op,
            value,
        }
    }

    /// Variables referenced by this atom, in first-occurrence order.
    pub fn variables(&self) -> Vec<&Variable> {
        let seen: Vec<&Variable> = match self {
            Atom::Isa { var, .. } | Atom::Compare { var, .. } => vec![var],
            Atom::Relation { players, .. } => players.iter().filter_map(Term::as_var).collect(),
            Atom::Has { owner, value, .. } => {
                [owner, value].into_iter().filter_map(Term::as_var).collect()
            }
        };
        let mut out: Vec<&Variable> = Vec::with_capacity(seen.len());
        for v in seen {
            if !out.contains(&v) {
                out.push(v);
            }
        }
        out
    }

    /// The schema type this atom is about, if it names one.
    pub fn type_label(&self) -> Option<&Label> {
        match self {
            Atom::Isa { label, .. } | Atom::Relation { label, .. } => Some(label),
            Atom::Has { attribute, .. } => Some(attribute),
            Atom::Compare { .. } => None,
        }
    }

    /// Whether a rule conclusion can produce facts matching this atom.
    pub fn is_concludable(&self) -> bool {
        matches!(self, Atom::Relation { .. } | Atom::Has { .. })
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Isa { var, label } => write!(f, "{var} isa {label}"),
            Atom::Relation { label, players } => {
                write!(f, "{label}(")?;
                for (i, p) in players.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{p}")?;
                }
                f.write_str(")")
            }
            Atom::Has {
                owner,
                attribute,
                value,
            } => write!(f, "{owner} has {attribute} {value}"),
            Atom::Compare { var, op, value } => write!(f, "{var} {} {value}", op.symbol()),
        }
    }
}

// ============================================================================
// Conjunction
// ============================================================================

/// Atoms that must all hold, plus negated sub-patterns that must not.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Conjunction {
    pub atoms: Vec<Atom>,
    #[serde(default)]
    pub negations: Vec<Conjunction>,
}

impl Conjunction {
    pub fn new(atoms: impl IntoIterator<Item = Atom>) -> Self {
        Self {
            atoms: atoms.into_iter().collect(),
            negations: Vec::new(),
        }
    }

    pub fn with_negation(mut self, negated: Conjunction) -> Self {
        self.negations.push(negated);
        self
    }

    /// Variables of the positive atoms.
    pub fn variables(&self) -> BTreeSet<Variable> {
        self.atoms
            .iter()
            .flat_map(|a| a.variables().into_iter().cloned())
            .collect()
    }

    /// Variables a positive atom can bind (value filters bind nothing).
    pub fn binding_variables(&self) -> BTreeSet<Variable> {
        self.atoms
            .iter()
            .filter(|a| !matches!(a, Atom::Compare { .. }))
            .flat_map(|a| a.variables().into_iter().cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty() && self.negations.is_empty()
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{ ")?;
        for atom in &self.atoms {
            write!(f, "{atom}; ")?;
        }
        for negated in &self.negations {
            write!(f, "not {negated}; ")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variables_are_deduplicated_in_order() {
        let atom = Atom::relation("friend", [Term::var("x"), Term::var("y"), Term::var("x")]);
        let names: Vec<&str> = atom.variables().into_iter().map(Variable::name).collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn compare_across_value_types_is_only_unequal() {
        let l = Value::Long(3);
        let s = Value::String("3".to_string());
        assert!(Comparator::Neq.test(&l, &s));
        assert!(!Comparator::Lt.test(&l, &s));
        assert!(!Comparator::Eq.test(&l, &s));
    }

    #[test]
    fn binding_variables_skip_filters() {
        let conj = Conjunction::new([
            Atom::has(Term::var("p"), "age", Term::var("a")),
            Atom::compare("z", Comparator::Gt, Value::Long(1)),
        ]);
        let bound: Vec<String> = conj
            .binding_variables()
            .into_iter()
            .map(|v| v.name().to_string())
            .collect();
        assert_eq!(bound, vec!["a".to_string(), "p".to_string()]);
        assert_eq!(conj.variables().len(), 3);
    }

    #[test]
    fn display_reads_like_a_pattern() {
        let conj = Conjunction::new([
            Atom::isa("x", "person"),
            Atom::relation("parent", [Term::var("x"), Term::thing(7)]),
        ])
        .with_negation(Conjunction::new([Atom::has(
            Term::var("x"),
            "name",
            Term::value(Value::String("bob".into())),
        )]));
        assert_eq!(
            conj.to_string(),
            "{ $x isa person; parent($x, #7); not { $x has name \"bob\"; }; }"
        );
    }
}
