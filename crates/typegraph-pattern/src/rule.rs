//! Rule definitions: `when` a conjunction holds, `then` a conclusion follows.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::atom::{Atom, Conjunction};
use crate::concept::{Label, Term, Variable};

/// The fact-producing head of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conclusion {
    /// Concludes a relation of type `label` between the players.
    Relation { label: Label, players: Vec<Term> },
    /// Concludes an ownership edge from `owner` to an attribute value.
    Has {
        owner: Variable,
        attribute: Label,
        value: Term,
    },
}

impl Conclusion {
    pub fn relation(label: &str, players: impl IntoIterator<Item = Term>) -> Self {
        Conclusion::Relation {
            label: Label::new(label),
            players: players.into_iter().collect(),
        }
    }

    pub fn has(owner: &str, attribute: &str, value: Term) -> Self {
        Conclusion::Has {
            owner: Variable::new(owner),
            attribute: Label::new(attribute),
            value,
        }
    }

    /// The concluded type label.
    pub fn label(&self) -> &Label {
        match self {
            Conclusion::Relation { label, .. } => label,
            Conclusion::Has { attribute, .. } => attribute,
        }
    }

    /// Relations are concluded as vertices; attribute ownerships as edges.
    pub fn concludes_vertex(&self) -> bool {
        matches!(self, Conclusion::Relation { .. })
    }

    /// The conclusion read as a query atom.
    pub fn as_atom(&self) -> Atom {
        match self {
            Conclusion::Relation { label, players } => Atom::Relation {
                label: label.clone(),
                players: players.clone(),
            },
            Conclusion::Has {
                owner,
                attribute,
                value,
            } => Atom::Has {
                owner: Term::Var(owner.clone()),
                attribute: attribute.clone(),
                value: value.clone(),
            },
        }
    }

    /// Variables of the conclusion, in first-occurrence order.
    pub fn variables(&self) -> Vec<&Variable> {
        let terms: Vec<&Variable> = match self {
            Conclusion::Relation { players, .. } => {
                players.iter().filter_map(Term::as_var).collect()
            }
            Conclusion::Has { owner, value, .. } => {
                let mut vars = vec![owner];
                vars.extend(value.as_var());
                vars
            }
        };
        let mut out: Vec<&Variable> = Vec::with_capacity(terms.len());
        for v in terms {
            if !out.contains(&v) {
                out.push(v);
            }
        }
        out
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_atom())
    }
}

/// A schema-level inference rule as declared by the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub label: String,
    pub when: Conjunction,
    pub then: Conclusion,
}

impl RuleDefinition {
    pub fn new(label: impl Into<String>, when: Conjunction, then: Conclusion) -> Self {
        Self {
            label: label.into(),
            when,
            then,
        }
    }
}

impl fmt::Display for RuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule {}: when {} then {{ {}; }}", self.label, self.when, self.then)
    }
}
