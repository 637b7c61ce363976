use std::sync::Arc;

use shared::{
    domain::{EmergencyVehicleDraft, IntersectionId, VehicleId},
    protocol::{DispatchAck, OverrideAck, PriorityOverrideRequest},
};
use tracing::{info, warn};

use crate::{
    backend::TrafficBackend,
    error::{CommandFailure, DispatchError, InvalidRequest},
    view::{DashboardView, ViewHandle},
};

/// Sends operator commands. It never writes to the reconciled view: effects
/// show up later through the live channel, and a dispatched vehicle only
/// appears once the stream carries it.
#[derive(Clone)]
pub struct CommandDispatcher {
    backend: Arc<dyn TrafficBackend>,
    view: ViewHandle,
}

impl CommandDispatcher {
    pub fn new(backend: Arc<dyn TrafficBackend>, view: ViewHandle) -> Self {
        Self { backend, view }
    }

    /// An Ack means the backend accepted the request, not that the override
    /// is visible yet.
    pub async fn request_priority_override(
        &self,
        intersection_id: IntersectionId,
        vehicle_id: VehicleId,
        priority_level: i32,
        duration_seconds: i64,
    ) -> Result<OverrideAck, DispatchError> {
        let request = PriorityOverrideRequest {
            vehicle_id,
            intersection_id,
            priority_level,
            duration: duration_seconds,
        };
        validate_override(&self.view.current(), &request).map_err(|err| {
            warn!(intersection_id = %request.intersection_id, reason = %err.reason, "dispatcher: override rejected locally");
            err
        })?;

        let ack = self
            .backend
            .post_priority_override(&request)
            .await
            .map_err(|err| {
                let failure = CommandFailure::from(err);
                warn!(intersection_id = %request.intersection_id, error = %failure, "dispatcher: override failed");
                failure
            })?;
        info!(
            intersection_id = %request.intersection_id,
            vehicle_id = %request.vehicle_id,
            priority_level = request.priority_level,
            duration = request.duration,
            "dispatcher: override accepted"
        );
        Ok(ack)
    }

    pub async fn dispatch_emergency_vehicle(
        &self,
        draft: EmergencyVehicleDraft,
    ) -> Result<DispatchAck, DispatchError> {
        validate_draft(&draft).map_err(|err| {
            warn!(reason = %err.reason, "dispatcher: dispatch rejected locally");
            err
        })?;

        let stored = self
            .backend
            .post_emergency_vehicle(&draft)
            .await
            .map_err(|err| {
                let failure = CommandFailure::from(err);
                warn!(error = %failure, "dispatcher: dispatch failed");
                failure
            })?;
        if stored.id.as_str().trim().is_empty() {
            return Err(CommandFailure::Decode("backend returned a vehicle without an id".into()).into());
        }
        info!(vehicle_id = %stored.id, kind = ?draft.kind, "dispatcher: dispatch accepted");
        Ok(DispatchAck {
            vehicle_id: stored.id,
        })
    }
}

pub fn validate_override(
    view: &DashboardView,
    request: &PriorityOverrideRequest,
) -> Result<(), InvalidRequest> {
    if request.priority_level <= 0 {
        return Err(InvalidRequest::new(format!(
            "priority_level must be positive, got {}",
            request.priority_level
        )));
    }
    if request.duration <= 0 {
        return Err(InvalidRequest::new(format!(
            "duration must be positive, got {}",
            request.duration
        )));
    }
    if request.vehicle_id.as_str().trim().is_empty() {
        return Err(InvalidRequest::new("vehicle_id must not be empty"));
    }
    if request.intersection_id.as_str().trim().is_empty() {
        return Err(InvalidRequest::new("intersection_id must not be empty"));
    }
    if view.intersection(&request.intersection_id).is_none() {
        return Err(InvalidRequest::new(format!(
            "unknown intersection {}",
            request.intersection_id
        )));
    }
    Ok(())
}

pub fn validate_draft(draft: &EmergencyVehicleDraft) -> Result<(), InvalidRequest> {
    let coordinates = [
        ("latitude", draft.latitude),
        ("longitude", draft.longitude),
        ("destination_lat", draft.destination_lat),
        ("destination_lon", draft.destination_lon),
    ];
    if let Some((name, _)) = coordinates.iter().find(|(_, value)| !value.is_finite()) {
        return Err(InvalidRequest::new(format!("{name} must be a finite number")));
    }
    if !draft.speed.is_finite() || draft.speed < 0.0 {
        return Err(InvalidRequest::new(format!(
            "speed must be a non-negative number, got {}",
            draft.speed
        )));
    }
    if draft.priority_level <= 0 {
        return Err(InvalidRequest::new(format!(
            "priority_level must be positive, got {}",
            draft.priority_level
        )));
    }
    if draft.route.iter().any(|id| id.as_str().trim().is_empty()) {
        return Err(InvalidRequest::new("route must not contain empty intersection ids"));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
