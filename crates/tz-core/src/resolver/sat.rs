//! A small, complete DPLL SAT solver with unit propagation.
//!
//! The encoding layer controls the search through an explicit decision
//! order: literals are tried in the given order, each first with its given
//! polarity, then negated on backtrack. Variables absent from the order
//! default to false. The solver is deterministic over its inputs.

/// A literal: positive or negative 1-based variable index.
///
/// `3` means variable 3 is true; `-3` means variable 3 is false.
pub type Literal = i32;

/// A CNF formula.
#[derive(Debug, Clone, Default)]
pub struct Cnf {
    num_vars: usize,
    clauses: Vec<Vec<Literal>>,
}

impl Cnf {
    /// Create a formula over `num_vars` variables (indices `1..=num_vars`).
    #[must_use]
    pub fn new(num_vars: usize) -> Self {
        Self {
            num_vars,
            clauses: Vec::new(),
        }
    }

    /// Add a clause (a disjunction of literals).
    ///
    /// An empty clause makes the formula trivially unsatisfiable.
    pub fn add_clause(&mut self, clause: Vec<Literal>) {
        debug_assert!(clause
            .iter()
            .all(|&lit| lit != 0 && lit.unsigned_abs() as usize <= self.num_vars));
        self.clauses.push(clause);
    }

    /// Number of variables.
    #[must_use]
    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    /// Number of clauses.
    #[must_use]
    pub fn num_clauses(&self) -> usize {
        self.clauses.len()
    }
}

/// Truth value of a literal under a partial assignment.
fn literal_value(assignment: &[Option<bool>], lit: Literal) -> Option<bool> {
    let var = lit.unsigned_abs() as usize - 1;
    assignment[var].map(|v| if lit > 0 { v } else { !v })
}

fn assign(assignment: &mut [Option<bool>], lit: Literal) {
    let var = lit.unsigned_abs() as usize - 1;
    assignment[var] = Some(lit > 0);
}

/// Repeatedly propagate unit clauses. Returns `false` on conflict.
fn unit_propagate(cnf: &Cnf, assignment: &mut [Option<bool>]) -> bool {
    loop {
        let mut changed = false;

        for clause in &cnf.clauses {
            let mut satisfied = false;
            let mut unassigned: Option<Literal> = None;
            let mut unassigned_count = 0;

            for &lit in clause {
                match literal_value(assignment, lit) {
                    Some(true) => {
                        satisfied = true;
                        break;
                    }
                    Some(false) => {}
                    None => {
                        unassigned = Some(lit);
                        unassigned_count += 1;
                    }
                }
            }

            if satisfied {
                continue;
            }

            match unassigned_count {
                0 => return false, // every literal false
                1 => {
                    assign(assignment, unassigned.expect("unit literal"));
                    changed = true;
                }
                _ => {}
            }
        }

        if !changed {
            return true;
        }
    }
}

fn all_clauses_satisfied(cnf: &Cnf, assignment: &[Option<bool>]) -> bool {
    cnf.clauses.iter().all(|clause| {
        clause
            .iter()
            .any(|&lit| literal_value(assignment, lit) == Some(true))
    })
}

/// Solve the formula, branching along `decision_order`.
///
/// Returns a total assignment (indexed by variable - 1) or `None` when the
/// formula is unsatisfiable. The search is complete: if any model exists,
/// one is found.
#[must_use]
pub fn solve(cnf: &Cnf, decision_order: &[Literal]) -> Option<Vec<bool>> {
    let mut assignment = vec![None; cnf.num_vars()];
    if !unit_propagate(cnf, &mut assignment) {
        return None;
    }
    dpll(cnf, assignment, decision_order).map(|assignment| {
        assignment
            .into_iter()
            .map(|v| v.unwrap_or(false))
            .collect()
    })
}

fn dpll(
    cnf: &Cnf,
    assignment: Vec<Option<bool>>,
    decision_order: &[Literal],
) -> Option<Vec<Option<bool>>> {
    if all_clauses_satisfied(cnf, &assignment) {
        return Some(assignment);
    }

    // First unassigned decision literal.
    let Some(&decision) = decision_order
        .iter()
        .find(|&&lit| literal_value(&assignment, lit).is_none())
    else {
        // No decisions left, yet some clause is unsatisfied: every literal in
        // it must involve an undecided variable outside the order. Default
        // those to false and check.
        let total: Vec<Option<bool>> = assignment
            .into_iter()
            .map(|v| v.or(Some(false)))
            .collect();
        return all_clauses_satisfied(cnf, &total).then_some(total);
    };

    for lit in [decision, -decision] {
        let mut trial = assignment.clone();
        assign(&mut trial, lit);
        if unit_propagate(cnf, &mut trial) {
            if let Some(model) = dpll(cnf, trial, decision_order) {
                return Some(model);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trivial_sat() {
        let mut cnf = Cnf::new(1);
        cnf.add_clause(vec![1]);

        let model = solve(&cnf, &[1]).unwrap();
        assert!(model[0]);
    }

    #[test]
    fn test_trivial_unsat() {
        let mut cnf = Cnf::new(1);
        cnf.add_clause(vec![1]);
        cnf.add_clause(vec![-1]);

        assert!(solve(&cnf, &[1]).is_none());
    }

    #[test]
    fn test_empty_clause_unsat() {
        let mut cnf = Cnf::new(1);
        cnf.add_clause(vec![]);

        assert!(solve(&cnf, &[1]).is_none());
    }

    #[test]
    fn test_decision_order_controls_preference() {
        // x1 or x2, at most one of them; order decides which.
        let mut cnf = Cnf::new(2);
        cnf.add_clause(vec![1, 2]);
        cnf.add_clause(vec![-1, -2]);

        let model = solve(&cnf, &[1, 2]).unwrap();
        assert!(model[0] && !model[1]);

        let model = solve(&cnf, &[2, 1]).unwrap();
        assert!(!model[0] && model[1]);
    }

    #[test]
    fn test_backtracking_finds_model() {
        // Preferring x1 leads into a dead end; the solver must back off.
        // x1 -> x3, x1 -> -x3 (so x1 impossible), x1 or x2.
        let mut cnf = Cnf::new(3);
        cnf.add_clause(vec![-1, 3]);
        cnf.add_clause(vec![-1, -3]);
        cnf.add_clause(vec![1, 2]);

        let model = solve(&cnf, &[1, 2, 3]).unwrap();
        assert!(!model[0]);
        assert!(model[1]);
    }

    #[test]
    fn test_implication_chain() {
        // x1, x1 -> x2, x2 -> x3.
        let mut cnf = Cnf::new(3);
        cnf.add_clause(vec![1]);
        cnf.add_clause(vec![-1, 2]);
        cnf.add_clause(vec![-2, 3]);

        let model = solve(&cnf, &[1, 2, 3]).unwrap();
        assert!(model.iter().all(|&v| v));
    }

    #[test]
    fn test_unconstrained_variables_default_false() {
        let mut cnf = Cnf::new(3);
        cnf.add_clause(vec![2]);

        let model = solve(&cnf, &[2]).unwrap();
        assert!(!model[0]);
        assert!(model[1]);
        assert!(!model[2]);
    }

    #[test]
    fn test_negative_decision_literal() {
        // Order can prefer a variable false first.
        let mut cnf = Cnf::new(2);
        cnf.add_clause(vec![1, 2]);

        let model = solve(&cnf, &[-1, 2]).unwrap();
        assert!(!model[0]);
        assert!(model[1]);
    }

    #[test]
    fn test_deterministic() {
        let mut cnf = Cnf::new(4);
        cnf.add_clause(vec![1, 2, 3, 4]);
        cnf.add_clause(vec![-1, -2]);
        cnf.add_clause(vec![-3, -4]);

        let order = [2, 4, 1, 3];
        assert_eq!(solve(&cnf, &order), solve(&cnf, &order));
    }
}
