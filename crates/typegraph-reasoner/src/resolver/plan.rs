//! Greedy atom ordering for one conjunction.

use std::collections::BTreeSet;

use typegraph_pattern::{Atom, Conjunction, Label, Variable};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    /// Every `isa` constraint on one variable, joined together.
    Isa { var: Variable, atoms: Vec<Atom> },
    /// A relation or ownership constraint.
    Concludable(Atom),
    /// A value comparison on an already-bound variable.
    Filter(Atom),
}

impl Step {
    #[cfg(test)]
    fn atoms(&self) -> Vec<&Atom> {
        match self {
            Step::Isa { atoms, .. } => atoms.iter().collect(),
            Step::Concludable(atom) | Step::Filter(atom) => vec![atom],
        }
    }
}

struct Unit {
    order: usize,
    step: Step,
    vars: Vec<Variable>,
    cost: usize,
}

/// Order the atoms of `conjunction`.
///
/// Atoms sharing variables with what is already bound go first, then those
/// with fewer candidate types, then declaration order. Comparisons are
/// placed as soon as their variable is bound. `candidates` reports an atom's
/// candidate type count; any atom with none makes the whole conjunction
/// unsatisfiable and the plan is `None`.
pub(crate) fn plan(
    conjunction: &Conjunction,
    bound: &BTreeSet<Variable>,
    mut candidates: impl FnMut(&Atom) -> Result<usize>,
) -> Result<Option<Vec<Step>>> {
    let mut bound = bound.clone();
    let mut units: Vec<Unit> = Vec::new();
    let mut filters: Vec<(Variable, Atom)> = Vec::new();

    for (order, atom) in conjunction.atoms.iter().enumerate() {
        match atom {
            Atom::Compare { var, .. } => {
                filters.push((var.clone(), atom.clone()));
                continue;
            }
            Atom::Isa { var, .. } => {
                let grouped = units.iter_mut().find(|u| matches!(&u.step, Step::Isa { var: v, .. } if v == var));
                if let Some(unit) = grouped {
                    let cost = candidates(atom)?;
                    if cost == 0 {
                        return Ok(None);
                    }
                    unit.cost = unit.cost.min(cost);
                    if let Step::Isa { atoms, .. } = &mut unit.step {
                        atoms.push(atom.clone());
                    }
                    continue;
                }
                let cost = candidates(atom)?;
                if cost == 0 {
                    return Ok(None);
                }
                units.push(Unit {
                    order,
                    step: Step::Isa {
                        var: var.clone(),
                        atoms: vec![atom.clone()],
                    },
                    vars: vec![var.clone()],
                    cost,
                });
            }
            Atom::Relation { .. } | Atom::Has { .. } => {
                let cost = candidates(atom)?;
                if cost == 0 {
                    return Ok(None);
                }
                units.push(Unit {
                    order,
                    step: Step::Concludable(atom.clone()),
                    vars: atom.variables().into_iter().cloned().collect(),
                    cost,
                });
            }
        }
    }

    let mut steps = Vec::with_capacity(units.len() + filters.len());
    place_filters(&mut filters, &bound, &mut steps);
    while !units.is_empty() {
        let best = units
            .iter()
            .enumerate()
            .min_by_key(|(_, u)| (connectivity(&u.vars, &bound), u.cost, u.order))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let unit = units.remove(best);
        bound.extend(unit.vars);
        steps.push(unit.step);
        place_filters(&mut filters, &bound, &mut steps);
    }
    if let Some((var, _)) = filters.into_iter().next() {
        return Err(Error::UnboundVariable(var));
    }
    Ok(Some(steps))
}

/// 0: every variable bound; 1: some bound; 2: none bound.
fn connectivity(vars: &[Variable], bound: &BTreeSet<Variable>) -> u8 {
    let known = vars.iter().filter(|v| bound.contains(*v)).count();
    if known == vars.len() {
        0
    } else if known > 0 {
        1
    } else {
        2
    }
}

fn place_filters(filters: &mut Vec<(Variable, Atom)>, bound: &BTreeSet<Variable>, steps: &mut Vec<Step>) {
    let mut i = 0;
    while i < filters.len() {
        if bound.contains(&filters[i].0) {
            let (_, atom) = filters.remove(i);
            steps.push(Step::Filter(atom));
        } else {
            i += 1;
        }
    }
}

/// Labels used by a plan, for logging.
pub(crate) fn describe(steps: &[Step]) -> Vec<String> {
    steps
        .iter()
        .map(|s| match s {
            Step::Isa { var, atoms } => {
                let labels: Vec<&Label> = atoms.iter().filter_map(Atom::type_label).collect();
                format!("{var} isa {labels:?}")
            }
            Step::Concludable(atom) | Step::Filter(atom) => atom.to_string(),
        })
        .collect()
}
