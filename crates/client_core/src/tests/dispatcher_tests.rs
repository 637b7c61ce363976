use super::*;
use crate::{
    error::BackendError,
    fixtures::{draft, status, two_intersections, vehicle, FakeBackend},
    reconciler::StateReconciler,
    snapshot::Snapshot,
};

fn loaded_reconciler() -> StateReconciler {
    let reconciler = StateReconciler::new();
    reconciler.apply_snapshot(Snapshot {
        intersections: two_intersections(),
        emergency_vehicles: vec![vehicle("emv_001")],
        status: status(2),
    });
    reconciler
}

fn dispatcher_for(reconciler: &StateReconciler) -> (Arc<FakeBackend>, CommandDispatcher) {
    let backend = Arc::new(FakeBackend::with_snapshot(
        two_intersections(),
        Vec::new(),
        status(2),
    ));
    let dispatcher = CommandDispatcher::new(backend.clone(), reconciler.subscribe());
    (backend, dispatcher)
}

#[tokio::test]
async fn zero_priority_fails_locally_without_network_call() {
    let reconciler = loaded_reconciler();
    let (backend, dispatcher) = dispatcher_for(&reconciler);

    let err = dispatcher
        .request_priority_override(
            IntersectionId::new("int_001"),
            VehicleId::new("emv_001"),
            0,
            30,
        )
        .await
        .expect_err("priority 0 is invalid");

    assert!(err.is_invalid_request());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn negative_duration_fails_locally_without_network_call() {
    let reconciler = loaded_reconciler();
    let (backend, dispatcher) = dispatcher_for(&reconciler);

    let err = dispatcher
        .request_priority_override(
            IntersectionId::new("int_001"),
            VehicleId::new("emv_001"),
            5,
            -1,
        )
        .await
        .expect_err("duration -1 is invalid");

    assert!(matches!(err, DispatchError::InvalidRequest(ref e) if e.reason.contains("duration")));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn override_targets_intersections_in_the_view() {
    let reconciler = loaded_reconciler();
    let (backend, dispatcher) = dispatcher_for(&reconciler);

    let err = dispatcher
        .request_priority_override(
            IntersectionId::new("int_404"),
            VehicleId::new("emv_001"),
            5,
            30,
        )
        .await
        .expect_err("unknown intersection");
    assert!(err.is_invalid_request());
    assert_eq!(backend.call_count("POST"), 0);
}

#[tokio::test]
async fn accepted_override_does_not_touch_the_view() {
    let reconciler = loaded_reconciler();
    let (backend, dispatcher) = dispatcher_for(&reconciler);
    let before = reconciler.get_view();

    let ack = dispatcher
        .request_priority_override(
            IntersectionId::new("int_001"),
            VehicleId::new("emv_001"),
            9,
            30,
        )
        .await
        .expect("override ack");

    assert_eq!(ack.intersection_id, IntersectionId::new("int_001"));
    assert_eq!(
        backend.calls(),
        vec!["POST /api/priority-override/int_001".to_string()]
    );
    let after = reconciler.get_view();
    assert_eq!(*before, *after);
    assert!(!after.intersections[0].emergency_priority);
}

#[tokio::test]
async fn backend_rejection_surfaces_as_command_failure() {
    let reconciler = loaded_reconciler();
    let (backend, dispatcher) = dispatcher_for(&reconciler);
    backend.set_override_result(Err(BackendError::Status {
        status: 404,
        detail: "Intersection not found".into(),
    }));

    let err = dispatcher
        .request_priority_override(
            IntersectionId::new("int_002"),
            VehicleId::new("emv_001"),
            9,
            30,
        )
        .await
        .expect_err("rejected");

    assert_eq!(
        err,
        DispatchError::Failed(CommandFailure::Rejected {
            status: 404,
            detail: "Intersection not found".into(),
        })
    );
    assert_eq!(backend.call_count("POST"), 1);
}

#[tokio::test]
async fn dispatch_ack_carries_backend_id_and_inserts_nothing() {
    let reconciler = loaded_reconciler();
    let (backend, dispatcher) = dispatcher_for(&reconciler);
    let before = reconciler.get_view();

    let ack = dispatcher
        .dispatch_emergency_vehicle(draft())
        .await
        .expect("dispatch ack");

    assert_eq!(ack.vehicle_id, VehicleId::new("emv_assigned"));
    assert_eq!(backend.call_count("POST /api/emergency-vehicles"), 1);
    let after = reconciler.get_view();
    assert_eq!(*before, *after);
    assert!(after.vehicle(&ack.vehicle_id).is_none());
}

#[tokio::test]
async fn negative_speed_draft_is_rejected_locally() {
    let reconciler = loaded_reconciler();
    let (backend, dispatcher) = dispatcher_for(&reconciler);
    let mut bad = draft();
    bad.speed = -3.0;

    let err = dispatcher
        .dispatch_emergency_vehicle(bad)
        .await
        .expect_err("negative speed");
    assert!(err.is_invalid_request());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn network_failure_on_dispatch_is_not_retried() {
    let reconciler = loaded_reconciler();
    let (backend, dispatcher) = dispatcher_for(&reconciler);
    backend.set_dispatch_result(Err(BackendError::Network("connection refused".into())));

    let err = dispatcher
        .dispatch_emergency_vehicle(draft())
        .await
        .expect_err("network failure");
    assert!(matches!(
        err,
        DispatchError::Failed(CommandFailure::Network(_))
    ));
    assert_eq!(backend.call_count("POST"), 1);
}

#[test]
fn draft_validation_rejects_non_finite_coordinates() {
    let mut bad = draft();
    bad.destination_lon = f64::NAN;
    let err = validate_draft(&bad).expect_err("nan");
    assert!(err.reason.contains("destination_lon"));
}
