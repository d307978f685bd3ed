use super::*;
use crate::constraint::ConstraintKind;
use crate::parametric::{BindingTarget, Parameter};
use crate::precision::PrecisionLevel;
use crate::store::Geometry;

fn point_of(snapshot: &Snapshot, id: EntityId) -> [f64; 2] {
    snapshot
        .entities
        .iter()
        .find(|e| e.id == id)
        .and_then(|e| match e.geometry {
            Geometry::Point { pos } => Some(pos),
            _ => None,
        })
        .expect("point entity in snapshot")
}

fn generation_of(snapshot: &Snapshot, id: EntityId) -> u64 {
    snapshot
        .entities
        .iter()
        .find(|e| e.id == id)
        .map(|e| e.generation)
        .expect("entity in snapshot")
}

#[test]
fn test_add_point_commits_and_notifies_once() {
    let session = Session::new();
    let events = session.subscribe();

    let result = session.apply_edit(EditCommand::AddPoint { pos: [1.0, 2.0] });
    assert_eq!(result.status, EditStatus::Resolved);
    let id = result.created.expect("created id");
    assert!(result.moved.contains(&id));
    assert_eq!(result.generation, 1);

    let event = events.try_recv().expect("one change event");
    assert_eq!(event.moved, result.moved);
    assert_eq!(event.generation, 1);
    assert!(events.try_recv().is_err(), "exactly one event per edit");
}

#[test]
fn test_distance_edit_resolves_symmetrically() {
    let session = Session::new();
    let p1 = session
        .apply_edit(EditCommand::AddPoint { pos: [0.0, 0.0] })
        .created
        .unwrap();
    let p2 = session
        .apply_edit(EditCommand::AddPoint { pos: [10.0, 0.0] })
        .created
        .unwrap();

    let result = session.apply_edit(EditCommand::AddConstraint {
        kind: ConstraintKind::Distance {
            points: [p1, p2],
            value: 5.0,
        },
        tolerance: None,
    });
    assert_eq!(result.status, EditStatus::Resolved);
    assert!(result.violations.is_empty());

    let snapshot = session.query();
    assert_eq!(point_of(&snapshot, p1), [2.5, 0.0]);
    assert_eq!(point_of(&snapshot, p2), [7.5, 0.0]);
}

#[test]
fn test_rejected_edit_mutates_nothing_and_stays_silent() {
    let session = Session::new();
    let p = session
        .apply_edit(EditCommand::AddPoint { pos: [0.0, 0.0] })
        .created
        .unwrap();
    let before = session.query();
    let events = session.subscribe();

    let result = session.apply_edit(EditCommand::AddCircle {
        center: p,
        radius: -1.0,
    });
    assert_eq!(result.status, EditStatus::Rejected);
    assert!(matches!(
        result.rejection,
        Some(CoreError::InvalidValue { .. })
    ));
    assert!(result.moved.is_empty());

    let after = session.query();
    assert_eq!(after.entities, before.entities);
    assert!(events.try_recv().is_err(), "rejection emits no event");
}

#[test]
fn test_non_finite_move_is_rejected() {
    let session = Session::new();
    let p = session
        .apply_edit(EditCommand::AddPoint { pos: [1.0, 1.0] })
        .created
        .unwrap();

    let result = session.apply_edit(EditCommand::MovePoint {
        point: p,
        to: [f64::NAN, 0.0],
    });
    assert_eq!(result.status, EditStatus::Rejected);
    assert_eq!(point_of(&session.query(), p), [1.0, 1.0]);
}

#[test]
fn test_noop_solve_on_converged_state_is_idempotent() {
    let session = Session::new();
    let p1 = session
        .apply_edit(EditCommand::AddPoint { pos: [0.0, 0.0] })
        .created
        .unwrap();
    let p2 = session
        .apply_edit(EditCommand::AddPoint { pos: [10.0, 0.0] })
        .created
        .unwrap();
    session.apply_edit(EditCommand::AddConstraint {
        kind: ConstraintKind::Distance {
            points: [p1, p2],
            value: 5.0,
        },
        tolerance: None,
    });

    let before = session.query();
    let result = session.apply_edit(EditCommand::Solve);
    assert_eq!(result.status, EditStatus::Resolved);
    assert!(result.moved.is_empty());

    let after = session.query();
    assert_eq!(generation_of(&after, p1), generation_of(&before, p1));
    assert_eq!(generation_of(&after, p2), generation_of(&before, p2));
    assert_eq!(point_of(&after, p1), point_of(&before, p1));
}

#[test]
fn test_conflict_commits_best_state_as_partially_resolved() {
    let session = Session::new();
    let p1 = session
        .apply_edit(EditCommand::AddPoint { pos: [0.0, 0.0] })
        .created
        .unwrap();
    let p2 = session
        .apply_edit(EditCommand::AddPoint { pos: [10.0, 0.0] })
        .created
        .unwrap();
    let c5 = session
        .apply_edit(EditCommand::AddConstraint {
            kind: ConstraintKind::Distance {
                points: [p1, p2],
                value: 5.0,
            },
            tolerance: None,
        })
        .created
        .unwrap();

    let result = session.apply_edit(EditCommand::AddConstraint {
        kind: ConstraintKind::Distance {
            points: [p1, p2],
            value: 10.0,
        },
        tolerance: None,
    });
    let c10 = result.created.unwrap();

    assert_eq!(result.status, EditStatus::PartiallyResolved);
    assert!(result.conflicting.contains(&c5));
    assert!(result.conflicting.contains(&c10));
    assert!(!result.violations.is_empty());
}

#[test]
fn test_cancelled_edit_leaves_pre_edit_state() {
    let session = Session::new();
    let p1 = session
        .apply_edit(EditCommand::AddPoint { pos: [0.0, 0.0] })
        .created
        .unwrap();
    let p2 = session
        .apply_edit(EditCommand::AddPoint { pos: [10.0, 0.0] })
        .created
        .unwrap();
    let before = session.query();
    let events = session.subscribe();

    let token = CancelToken::new();
    token.cancel();
    let result = session.apply_edit_cancellable(
        EditCommand::AddConstraint {
            kind: ConstraintKind::Distance {
                points: [p1, p2],
                value: 5.0,
            },
            tolerance: None,
        },
        &token,
    );
    assert_eq!(result.status, EditStatus::Cancelled);
    assert!(result.moved.is_empty());

    let after = session.query();
    assert_eq!(after.entities, before.entities);
    assert_eq!(after.constraints.len(), before.constraints.len());
    assert!(events.try_recv().is_err(), "cancellation emits no event");
}

#[test]
fn test_remove_entity_cascades_constraints_and_bindings() {
    let session = Session::new();
    let p1 = session
        .apply_edit(EditCommand::AddPoint { pos: [0.0, 0.0] })
        .created
        .unwrap();
    let p2 = session
        .apply_edit(EditCommand::AddPoint { pos: [10.0, 0.0] })
        .created
        .unwrap();
    let line = session
        .apply_edit(EditCommand::AddLine { a: p1, b: p2 })
        .created
        .unwrap();
    session.apply_edit(EditCommand::AddConstraint {
        kind: ConstraintKind::Horizontal { line },
        tolerance: None,
    });
    session.apply_edit(EditCommand::DefineParameter {
        parameter: Parameter::fixed("x", 3.0),
    });
    session.apply_edit(EditCommand::BindGeometry {
        entity: p1,
        target: BindingTarget::PointX,
        expression: "@x".to_string(),
    });

    let result = session.apply_edit(EditCommand::RemoveEntity { entity: p1 });
    assert_eq!(result.status, EditStatus::Resolved);

    let snapshot = session.query();
    // p1 and the line are gone, p2 survives
    assert!(snapshot.entities.iter().all(|e| e.id != p1 && e.id != line));
    assert!(snapshot.entities.iter().any(|e| e.id == p2));
    // no dangling constraint or binding is observable
    assert!(snapshot.constraints.is_empty());
    assert!(snapshot.bindings.is_empty());
}

#[test]
fn test_parameter_bound_rejection_keeps_geometry() {
    let session = Session::new();
    let p = session
        .apply_edit(EditCommand::AddPoint { pos: [0.0, 0.0] })
        .created
        .unwrap();
    session.apply_edit(EditCommand::DefineParameter {
        parameter: Parameter::bounded("width", 10.0, 0.0, 100.0),
    });
    session.apply_edit(EditCommand::BindGeometry {
        entity: p,
        target: BindingTarget::PointX,
        expression: "@width".to_string(),
    });
    assert_eq!(point_of(&session.query(), p), [10.0, 0.0]);

    let result = session.apply_edit(EditCommand::SetParameter {
        name: "width".to_string(),
        value: -5.0,
    });
    assert_eq!(result.status, EditStatus::Rejected);
    assert!(matches!(
        result.rejection,
        Some(CoreError::InvalidValue { .. })
    ));
    assert_eq!(point_of(&session.query(), p), [10.0, 0.0]);
}

#[test]
fn test_parameter_change_regenerates_then_solves() {
    let session = Session::new();
    let p1 = session
        .apply_edit(EditCommand::AddPoint { pos: [0.0, 0.0] })
        .created
        .unwrap();
    let p2 = session
        .apply_edit(EditCommand::AddPoint { pos: [10.0, 0.0] })
        .created
        .unwrap();
    session.apply_edit(EditCommand::DefineParameter {
        parameter: Parameter::fixed("span", 10.0),
    });
    session.apply_edit(EditCommand::BindGeometry {
        entity: p2,
        target: BindingTarget::PointX,
        expression: "@span".to_string(),
    });

    let result = session.apply_edit(EditCommand::SetParameter {
        name: "span".to_string(),
        value: 16.0,
    });
    assert_eq!(result.status, EditStatus::Resolved);
    assert!(result.moved.contains(&p2));
    assert!(!result.moved.contains(&p1));
    assert_eq!(point_of(&session.query(), p2), [16.0, 0.0]);
}

#[test]
fn test_precision_level_snaps_committed_coordinates() {
    let session = Session::new();
    session.set_precision_level(PrecisionLevel::Ui);
    let p = session
        .apply_edit(EditCommand::AddPoint { pos: [2.34, 7.77] })
        .created
        .unwrap();
    // Ui level quantizes to 0.1
    assert_eq!(point_of(&session.query(), p), [2.3, 7.8]);
}

#[test]
fn test_moved_includes_lines_whose_endpoints_moved() {
    let session = Session::new();
    let p1 = session
        .apply_edit(EditCommand::AddPoint { pos: [0.0, 0.0] })
        .created
        .unwrap();
    let p2 = session
        .apply_edit(EditCommand::AddPoint { pos: [10.0, 0.0] })
        .created
        .unwrap();
    let line = session
        .apply_edit(EditCommand::AddLine { a: p1, b: p2 })
        .created
        .unwrap();

    let result = session.apply_edit(EditCommand::MovePoint {
        point: p1,
        to: [1.0, 1.0],
    });
    assert!(result.moved.contains(&p1));
    assert!(result.moved.contains(&line), "line redraws with its endpoint");
    assert!(!result.moved.contains(&p2));
}

#[test]
fn test_snapshot_round_trips_through_json() {
    let session = Session::new();
    let p1 = session
        .apply_edit(EditCommand::AddPoint { pos: [0.0, 0.0] })
        .created
        .unwrap();
    let p2 = session
        .apply_edit(EditCommand::AddPoint { pos: [10.0, 0.0] })
        .created
        .unwrap();
    session.apply_edit(EditCommand::AddLine { a: p1, b: p2 });
    session.apply_edit(EditCommand::DefineParameter {
        parameter: Parameter::bounded("width", 10.0, 0.0, 100.0),
    });
    session.apply_edit(EditCommand::BindGeometry {
        entity: p2,
        target: BindingTarget::PointX,
        expression: "@width".to_string(),
    });

    let saved = session.save();
    let json = saved.to_json().unwrap();
    let restored = Snapshot::from_json(&json).unwrap();

    let other = Session::new();
    other.load(restored).unwrap();
    let reloaded = other.query();
    assert_eq!(reloaded.entities.len(), saved.entities.len());
    assert_eq!(reloaded.constraints.len(), saved.constraints.len());
    assert_eq!(reloaded.parameters.len(), saved.parameters.len());
    assert_eq!(reloaded.bindings.len(), saved.bindings.len());

    // the restored document still edits correctly
    let result = other.apply_edit(EditCommand::SetParameter {
        name: "width".to_string(),
        value: 20.0,
    });
    assert_eq!(result.status, EditStatus::Resolved);
    assert_eq!(point_of(&other.query(), p2), [20.0, 0.0]);
}

#[test]
fn test_grid_size_setting_validated() {
    let session = Session::new();
    assert!(session.set_grid_size(0.5).is_ok());
    assert_eq!(session.precision().grid_size, 0.5);
    assert!(session.set_grid_size(0.0).is_err());
    assert!(session.set_grid_size(f64::NAN).is_err());
    assert_eq!(session.precision().grid_size, 0.5);
}
