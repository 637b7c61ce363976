use std::{collections::HashSet, sync::Arc};

use shared::{
    domain::{EmergencyVehicle, Intersection},
    protocol::TrafficUpdate,
};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    channel::ConnectionState,
    snapshot::Snapshot,
    view::{DashboardView, ViewHandle},
};

/// Sole owner of the dashboard view.
///
/// Every mutation builds a fresh `DashboardView` and swaps it in under the
/// watch channel's write lock, so writers are serialized and a reader holding
/// an `Arc` from `get_view` always sees one whole generation. Collections are
/// replaced wholesale: payloads are complete sets, so an entity missing from
/// a payload is gone.
pub struct StateReconciler {
    view: watch::Sender<Arc<DashboardView>>,
}

impl Default for StateReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl StateReconciler {
    pub fn new() -> Self {
        let (view, _) = watch::channel(Arc::new(DashboardView::default()));
        Self { view }
    }

    /// Replaces intersections, vehicles and status. Returns whether the view
    /// changed.
    pub fn apply_snapshot(&self, snapshot: Snapshot) -> bool {
        let intersections = normalize_intersections(snapshot.intersections);
        let emergency_vehicles = normalize_vehicles(snapshot.emergency_vehicles);
        self.commit("snapshot", |current| DashboardView {
            intersections,
            emergency_vehicles,
            status: Some(snapshot.status),
            ..current.clone()
        })
    }

    /// Replaces intersections and vehicles; status only when the payload
    /// carries one.
    pub fn apply_update(&self, update: TrafficUpdate) -> bool {
        let intersections = normalize_intersections(update.intersections);
        let emergency_vehicles = normalize_vehicles(update.emergency_vehicles);
        self.commit("update", |current| DashboardView {
            intersections,
            emergency_vehicles,
            status: update.status.or_else(|| current.status.clone()),
            last_update_at: update.timestamp.or(current.last_update_at),
            ..current.clone()
        })
    }

    /// Connection state never touches entity data.
    pub fn set_connection_state(&self, state: ConnectionState) -> bool {
        self.commit("connection", |current| DashboardView {
            connection: state,
            ..current.clone()
        })
    }

    pub fn get_view(&self) -> Arc<DashboardView> {
        Arc::clone(&self.view.borrow())
    }

    pub fn subscribe(&self) -> ViewHandle {
        ViewHandle::new(self.view.subscribe())
    }

    fn commit(&self, source: &'static str, build: impl FnOnce(&DashboardView) -> DashboardView) -> bool {
        self.view.send_if_modified(|current| {
            let next = build(current);
            if next == **current {
                debug!(source, revision = current.revision, "reconciler: no change");
                return false;
            }
            let revision = current.revision + 1;
            debug!(source, revision, "reconciler: applied");
            *current = Arc::new(DashboardView { revision, ..next });
            true
        })
    }
}

fn normalize_intersections(intersections: Vec<Intersection>) -> Vec<Intersection> {
    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(intersections.len());
    for mut intersection in intersections {
        if !seen.insert(intersection.id.clone()) {
            warn!(intersection_id = %intersection.id, "reconciler: dropping duplicate intersection");
            continue;
        }
        let rate = intersection.traffic_flow_rate;
        let clamped = if rate.is_finite() { rate.clamp(0.0, 1.0) } else { 0.0 };
        if clamped != rate {
            warn!(intersection_id = %intersection.id, rate, "reconciler: flow rate out of range");
            intersection.traffic_flow_rate = clamped;
        }
        let mut directions = HashSet::new();
        let id = intersection.id.clone();
        intersection.traffic_lights.retain(|light| {
            let first = directions.insert(light.direction);
            if !first {
                warn!(intersection_id = %id, light_id = %light.id, direction = ?light.direction, "reconciler: dropping second light for direction");
            }
            first
        });
        normalized.push(intersection);
    }
    normalized
}

fn normalize_vehicles(vehicles: Vec<EmergencyVehicle>) -> Vec<EmergencyVehicle> {
    let mut seen = HashSet::new();
    vehicles
        .into_iter()
        .filter(|vehicle| {
            let first = seen.insert(vehicle.id.clone());
            if !first {
                warn!(vehicle_id = %vehicle.id, "reconciler: dropping duplicate vehicle");
            }
            first
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
