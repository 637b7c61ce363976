use std::sync::Arc;

use shared::domain::{EmergencyVehicle, Intersection, IntersectionId, TrafficStatus};
use tracing::{info, warn};

use crate::{
    backend::TrafficBackend,
    error::{BackendError, LoadFailure, ReadFailure, SnapshotRead},
};

/// Complete point-in-time read of the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub intersections: Vec<Intersection>,
    pub emergency_vehicles: Vec<EmergencyVehicle>,
    pub status: TrafficStatus,
}

#[derive(Clone)]
pub struct SnapshotLoader {
    backend: Arc<dyn TrafficBackend>,
}

impl SnapshotLoader {
    pub fn new(backend: Arc<dyn TrafficBackend>) -> Self {
        Self { backend }
    }

    /// Issues the three reads concurrently and joins them. Any failed read
    /// fails the whole load; no retries happen here.
    pub async fn load(&self) -> Result<Snapshot, LoadFailure> {
        let (intersections, vehicles, status) = tokio::join!(
            self.backend.fetch_intersections(),
            self.backend.fetch_emergency_vehicles(),
            self.backend.fetch_traffic_status(),
        );

        let mut failures = Vec::new();
        let intersections = record(SnapshotRead::Intersections, intersections, &mut failures);
        let vehicles = record(SnapshotRead::EmergencyVehicles, vehicles, &mut failures);
        let status = record(SnapshotRead::TrafficStatus, status, &mut failures);

        match (intersections, vehicles, status) {
            (Some(intersections), Some(emergency_vehicles), Some(status)) => {
                info!(
                    intersections = intersections.len(),
                    emergency_vehicles = emergency_vehicles.len(),
                    "snapshot: loaded"
                );
                Ok(Snapshot {
                    intersections,
                    emergency_vehicles,
                    status,
                })
            }
            _ => {
                let failure = LoadFailure { failures };
                warn!(error = %failure, "snapshot: load failed");
                Err(failure)
            }
        }
    }

    /// Detail read for a single intersection. The result is not applied to
    /// the reconciled view.
    pub async fn load_intersection(&self, id: &IntersectionId) -> Result<Intersection, BackendError> {
        self.backend.fetch_intersection(id).await
    }
}

fn record<T>(
    read: SnapshotRead,
    result: Result<T, BackendError>,
    failures: &mut Vec<ReadFailure>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            failures.push(ReadFailure { read, error });
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/snapshot_tests.rs"]
mod tests;
