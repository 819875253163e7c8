use proptest::prelude::*;
use typegraph_pattern::{Concept, ConceptMap, Variable};

fn concept_map() -> impl Strategy<Value = ConceptMap> {
    prop::collection::btree_map("[a-e]", 0u64..4, 0..5).prop_map(|m| {
        m.into_iter()
            .map(|(name, id)| (Variable::new(name), Concept::thing(id)))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn merge_is_symmetric(a in concept_map(), b in concept_map()) {
        prop_assert_eq!(a.merge(&b), b.merge(&a));
    }

    #[test]
    fn merge_agrees_with_both_sides(a in concept_map(), b in concept_map()) {
        if let Some(merged) = a.merge(&b) {
            for (var, concept) in a.iter().chain(b.iter()) {
                prop_assert_eq!(merged.get(var), Some(concept));
            }
            prop_assert_eq!(merged.restrict(a.variables()), a.clone());
        } else {
            let clash = a.iter().any(|(v, c)| b.get(v).is_some_and(|other| other != c));
            prop_assert!(clash);
        }
    }

    #[test]
    fn restrict_keeps_only_named_variables(a in concept_map(), names in prop::collection::vec("[a-e]", 0..4)) {
        let vars: Vec<Variable> = names.into_iter().map(Variable::new).collect();
        let restricted = a.restrict(&vars);
        prop_assert!(restricted.variables().all(|v| vars.contains(v)));
        for v in &vars {
            prop_assert_eq!(restricted.get(v), a.get(v));
        }
    }
}
