//! Type inference for single atoms.
//!
//! For an atom and a partial substitution, computes the schema types the atom
//! can possibly be about. The candidate set only ever shrinks:
//!
//! 1. the atom's own label, widened to its transitive subtypes;
//! 2. intersected with what the already-bound concepts allow (the type of a
//!    bound thing, which relation positions it may play, which attributes it
//!    may own, the value type of a bound value);
//! 3. intersected with the types that can have any instance at all: stored
//!    instances, or (with inference on) a rule concluding them.
//!
//! An empty result proves the atom unsatisfiable under the substitution.
//! Results are memoized per (atom, bindings of the atom's variables, store
//! generation, rule revision) and come back label-ordered.

use std::collections::BTreeSet;
use std::sync::Arc;

use typegraph_pattern::{Atom, Comparator, Concept, ConceptMap, Label, ValueType};
use typegraph_store::{FactStore, TypeHierarchy, TypeKind};

use crate::cache::CommonCache;
use crate::config::ReasonerConfig;
use crate::error::Result;
use crate::rule::RuleStore;

/// An atom annotated with its possible types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedAtom {
    pub atom: Atom,
    pub types: BTreeSet<Label>,
}

impl TypedAtom {
    pub fn is_satisfiable(&self) -> bool {
        !self.types.is_empty()
    }
}

type InferenceKey = (Atom, ConceptMap, u64, u64);

pub struct TypeReasoner {
    schema: Arc<dyn TypeHierarchy>,
    store: Arc<dyn FactStore>,
    rules: Arc<RuleStore>,
    inference: bool,
    cache: CommonCache<InferenceKey, Arc<BTreeSet<Label>>>,
}

impl TypeReasoner {
    pub fn new(
        schema: Arc<dyn TypeHierarchy>,
        store: Arc<dyn FactStore>,
        rules: Arc<RuleStore>,
        config: &ReasonerConfig,
    ) -> Self {
        Self {
            schema,
            store,
            rules,
            inference: config.inference,
            cache: CommonCache::new(&config.cache),
        }
    }

    pub fn infer_types(&self, atom: &Atom, substitution: &ConceptMap) -> Result<TypedAtom> {
        Ok(TypedAtom {
            atom: atom.clone(),
            types: self.infer_possible_types(atom, substitution)?,
        })
    }

    pub fn infer_possible_types(&self, atom: &Atom, substitution: &ConceptMap) -> Result<BTreeSet<Label>> {
        let relevant = substitution.restrict(atom.variables());
        let key = (
            atom.clone(),
            relevant,
            self.store.generation(),
            self.rules.revision(),
        );
        let types = self
            .cache
            .get(key, |(atom, bound, _, _)| self.compute(atom, bound).map(Arc::new))?;
        Ok(types.as_ref().clone())
    }

    fn compute(&self, atom: &Atom, bound: &ConceptMap) -> Result<BTreeSet<Label>> {
        let candidates = match atom {
            Atom::Isa { var, label } => {
                let mut types = self.subtypes_of_kind(label, None);
                if let Some(concept) = bound.get(var) {
                    let allowed = self.types_of_concept(concept)?;
                    types.retain(|t| allowed.contains(t));
                }
                types
            }
            Atom::Relation { label, players } => {
                let mut types = self.subtypes_of_kind(label, Some(TypeKind::Relation));
                for (position, player) in players.iter().enumerate() {
                    let Some(concept) = bound.resolve(player) else {
                        continue;
                    };
                    let Some(thing) = concept.as_thing() else {
                        return Ok(BTreeSet::new());
                    };
                    let Some(player_type) = self.store.type_of(thing)? else {
                        return Ok(BTreeSet::new());
                    };
                    types.retain(|relation| {
                        self.schema
                            .player_types(relation, position)
                            .map_or(false, |allowed| allowed.contains(&player_type))
                    });
                }
                types.retain(|relation| self.schema.arity(relation) == Some(players.len()));
                types
            }
            Atom::Has {
                owner,
                attribute,
                value,
            } => {
                let mut types = self.subtypes_of_kind(attribute, Some(TypeKind::Attribute));
                if let Some(concept) = bound.resolve(owner) {
                    let Some(thing) = concept.as_thing() else {
                        return Ok(BTreeSet::new());
                    };
                    let Some(owner_type) = self.store.type_of(thing)? else {
                        return Ok(BTreeSet::new());
                    };
                    types.retain(|a| self.schema.owner_types(a).contains(&owner_type));
                }
                if let Some(concept) = bound.resolve(value) {
                    let Some(v) = concept.as_value() else {
                        return Ok(BTreeSet::new());
                    };
                    types.retain(|a| self.schema.value_type(a) == Some(v.value_type()));
                }
                types
            }
            Atom::Compare { op, value, .. } => {
                // Only the compared value is constrained, and any attribute
                // holding a value of a comparable type may supply it.
                return Ok(match op {
                    Comparator::Neq => [ValueType::Long, ValueType::String, ValueType::Boolean]
                        .into_iter()
                        .flat_map(|vt| self.schema.attributes_with_value_type(vt))
                        .collect(),
                    _ => self.schema.attributes_with_value_type(value.value_type()),
                });
            }
        };
        self.retain_fruitful(candidates)
    }

    /// Drop types that can never have an instance.
    fn retain_fruitful(&self, candidates: BTreeSet<Label>) -> Result<BTreeSet<Label>> {
        let mut out = BTreeSet::new();
        for label in candidates {
            let fruitful = self.store.has_instances(&label)?
                || (self.inference && self.rules.concludes(&label)?);
            if fruitful {
                out.insert(label);
            }
        }
        Ok(out)
    }

    fn subtypes_of_kind(&self, label: &Label, kind: Option<TypeKind>) -> BTreeSet<Label> {
        let mut types = self.schema.subtypes_transitive(label);
        if let Some(kind) = kind {
            types.retain(|t| self.schema.kind(t) == Some(kind));
        }
        types
    }

    /// Every type a bound concept could be an instance of.
    fn types_of_concept(&self, concept: &Concept) -> Result<BTreeSet<Label>> {
        Ok(match concept {
            Concept::Thing(id) => self.store.type_of(*id)?.into_iter().collect(),
            Concept::Value(v) => self.schema.attributes_with_value_type(v.value_type()),
        })
    }
}
