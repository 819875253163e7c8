//! Concept maps: bindings from variables to concepts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::concept::{Concept, Term, Variable};

/// A partial or complete substitution.
///
/// Keys are unique and kept sorted, so two maps with the same bindings are
/// structurally equal (and hash equal) regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConceptMap(BTreeMap<Variable, Concept>);

impl ConceptMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, var: &Variable) -> Option<&Concept> {
        self.0.get(var)
    }

    pub fn contains(&self, var: &Variable) -> bool {
        self.0.contains_key(var)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &Concept)> {
        self.0.iter()
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.0.keys()
    }

    /// Bind `var` to `concept`.
    ///
    /// Returns `false` (leaving the map unchanged) when `var` is already bound
    /// to a different concept.
    pub fn bind(&mut self, var: Variable, concept: Concept) -> bool {
        match self.0.get(&var) {
            Some(existing) => *existing == concept,
            None => {
                self.0.insert(var, concept);
                true
            }
        }
    }

    /// Builder-style `bind` that panics on conflict; for literals in tests and
    /// seeds.
    pub fn with(mut self, var: &str, concept: Concept) -> Self {
        let ok = self.bind(Variable::new(var), concept);
        assert!(ok, "conflicting binding for ${var}");
        self
    }

    /// Union of two maps, or `None` if they disagree on a shared variable.
    pub fn merge(&self, other: &ConceptMap) -> Option<ConceptMap> {
        let mut out = self.clone();
        for (var, concept) in &other.0 {
            if !out.bind(var.clone(), concept.clone()) {
                return None;
            }
        }
        Some(out)
    }

    /// Keep only the bindings of `vars`.
    pub fn restrict<'a>(&self, vars: impl IntoIterator<Item = &'a Variable>) -> ConceptMap {
        let mut out = ConceptMap::new();
        for var in vars {
            if let Some(concept) = self.0.get(var) {
                out.0.insert(var.clone(), concept.clone());
            }
        }
        out
    }

    /// The concept a term denotes under this map, if determined.
    pub fn resolve(&self, term: &Term) -> Option<Concept> {
        match term {
            Term::Const(c) => Some(c.clone()),
            Term::Var(v) => self.0.get(v).cloned(),
        }
    }
}

impl FromIterator<(Variable, Concept)> for ConceptMap {
    fn from_iter<I: IntoIterator<Item = (Variable, Concept)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for ConceptMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (var, concept)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, " {var}: {concept}")?;
        }
        f.write_str(" }")
    }
}
