pub mod solver;
pub mod types;

pub use solver::{CancelToken, ConstraintSolver, SolveOutcome, SolveReport, SolverConfig};
pub use types::{Constraint, ConstraintKind, ConstraintSet, ConstraintViolation};

#[cfg(test)]
mod tests_conflicts;
