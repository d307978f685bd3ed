use crate::constraint::solver::{CancelToken, ConstraintSolver, SolveOutcome};
use crate::constraint::types::{Constraint, ConstraintKind, ConstraintSet};
use crate::store::GeometryStore;

fn solve(
    store: &mut GeometryStore,
    constraints: &ConstraintSet,
) -> crate::constraint::solver::SolveReport {
    ConstraintSolver::default().solve(store, constraints, &CancelToken::new())
}

#[test]
fn test_contradictory_distances_name_both_constraints() {
    let mut store = GeometryStore::new();
    let p1 = store.add_point([0.0, 0.0]).unwrap();
    let p2 = store.add_point([10.0, 0.0]).unwrap();

    let mut set = ConstraintSet::new();
    let c5 = set.add(Constraint::new(ConstraintKind::Distance {
        points: [p1, p2],
        value: 5.0,
    }));
    let c10 = set.add(Constraint::new(ConstraintKind::Distance {
        points: [p1, p2],
        value: 10.0,
    }));

    let report = solve(&mut store, &set);
    assert_eq!(report.outcome, SolveOutcome::Conflicted);
    assert!(report.conflicting.contains(&c5), "missing first distance");
    assert!(report.conflicting.contains(&c10), "missing second distance");
    assert_eq!(report.iterations, 100, "conflict is reported at the cap");
}

#[test]
fn test_coincident_vs_distance_conflict() {
    let mut store = GeometryStore::new();
    let p1 = store.add_point([0.0, 0.0]).unwrap();
    let p2 = store.add_point([4.0, 0.0]).unwrap();

    let mut set = ConstraintSet::new();
    let merge = set.add(Constraint::new(ConstraintKind::Coincident { points: [p1, p2] }));
    let apart = set.add(Constraint::new(ConstraintKind::Distance {
        points: [p1, p2],
        value: 5.0,
    }));

    let report = solve(&mut store, &set);
    assert_eq!(report.outcome, SolveOutcome::Conflicted);
    assert!(report.conflicting.contains(&merge));
    assert!(report.conflicting.contains(&apart));
}

#[test]
fn test_conflict_never_worsens_the_layout() {
    let mut store = GeometryStore::new();
    let p1 = store.add_point([0.0, 0.0]).unwrap();
    let p2 = store.add_point([10.0, 0.0]).unwrap();

    let mut set = ConstraintSet::new();
    set.add(Constraint::new(ConstraintKind::Distance {
        points: [p1, p2],
        value: 5.0,
    }));
    set.add(Constraint::new(ConstraintKind::Distance {
        points: [p1, p2],
        value: 10.0,
    }));

    let initial_max = set
        .active()
        .iter()
        .map(|c| crate::constraint::solver::residual(&store, &c.kind))
        .fold(0.0f64, f64::max);

    let report = solve(&mut store, &set);
    assert!(report.max_residual <= initial_max);
}

#[test]
fn test_satisfiable_clusters_converge_next_to_a_conflict() {
    let mut store = GeometryStore::new();
    // cluster A: plain distance, satisfiable
    let a1 = store.add_point([0.0, 0.0]).unwrap();
    let a2 = store.add_point([10.0, 0.0]).unwrap();
    // cluster B: contradictory distances
    let b1 = store.add_point([0.0, 5.0]).unwrap();
    let b2 = store.add_point([10.0, 5.0]).unwrap();

    let mut set = ConstraintSet::new();
    let ok = set.add(Constraint::new(ConstraintKind::Distance {
        points: [a1, a2],
        value: 4.0,
    }));
    let bad5 = set.add(Constraint::new(ConstraintKind::Distance {
        points: [b1, b2],
        value: 5.0,
    }));
    let bad10 = set.add(Constraint::new(ConstraintKind::Distance {
        points: [b1, b2],
        value: 10.0,
    }));

    let report = solve(&mut store, &set);
    assert_eq!(report.outcome, SolveOutcome::Conflicted);

    // the independent cluster converged in the committed layout
    let pa1 = store.point_pos(a1).unwrap();
    let pa2 = store.point_pos(a2).unwrap();
    let dist = ((pa2[0] - pa1[0]).powi(2) + (pa2[1] - pa1[1]).powi(2)).sqrt();
    assert!((dist - 4.0).abs() < 1e-4, "cluster A not converged: {}", dist);

    // only the unsatisfiable cluster is named
    assert!(!report.conflicting.contains(&ok));
    assert!(report.conflicting.contains(&bad5));
    assert!(report.conflicting.contains(&bad10));

    // and the satisfied cluster is not reported as violated
    assert!(report.violations.iter().all(|v| v.constraint != ok));
}

#[test]
fn test_violations_report_residual_magnitudes() {
    let mut store = GeometryStore::new();
    let p1 = store.add_point([0.0, 0.0]).unwrap();
    let p2 = store.add_point([10.0, 0.0]).unwrap();

    let mut set = ConstraintSet::new();
    set.add(Constraint::new(ConstraintKind::Distance {
        points: [p1, p2],
        value: 5.0,
    }));
    set.add(Constraint::new(ConstraintKind::Distance {
        points: [p1, p2],
        value: 10.0,
    }));

    let report = solve(&mut store, &set);
    assert!(!report.violations.is_empty());
    for violation in &report.violations {
        assert!(violation.residual > violation.tolerance);
        assert!(violation.residual <= 5.0 + 1e-9);
    }
}
