//! Read-only projection of the reconciled state for presentation code.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::domain::{
    EmergencyVehicle, Intersection, IntersectionId, SignalStatus, TrafficStatus, VehicleId,
};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::channel::ConnectionState;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardView {
    pub intersections: Vec<Intersection>,
    pub emergency_vehicles: Vec<EmergencyVehicle>,
    /// `None` until the first snapshot lands.
    pub status: Option<TrafficStatus>,
    pub connection: ConnectionState,
    /// Timestamp carried by the most recent stream update, if any.
    pub last_update_at: Option<DateTime<Utc>>,
    /// Bumped only when content changes.
    pub revision: u64,
}

impl DashboardView {
    pub fn intersection(&self, id: &IntersectionId) -> Option<&Intersection> {
        self.intersections.iter().find(|i| &i.id == id)
    }

    pub fn vehicle(&self, id: &VehicleId) -> Option<&EmergencyVehicle> {
        self.emergency_vehicles.iter().find(|v| &v.id == id)
    }

    pub fn has_data(&self) -> bool {
        self.status.is_some() || !self.intersections.is_empty()
    }

    pub fn priority_intersections(&self) -> impl Iterator<Item = &Intersection> {
        self.intersections.iter().filter(|i| i.emergency_priority)
    }
}

pub fn signal_label(status: SignalStatus) -> &'static str {
    match status {
        SignalStatus::Red => "RED",
        SignalStatus::Yellow => "YEL",
        SignalStatus::Green => "GRN",
        SignalStatus::Unknown => "---",
    }
}

/// Cloneable read handle. Never triggers I/O or mutation.
#[derive(Clone)]
pub struct ViewHandle {
    rx: watch::Receiver<Arc<DashboardView>>,
}

impl ViewHandle {
    pub(crate) fn new(rx: watch::Receiver<Arc<DashboardView>>) -> Self {
        Self { rx }
    }

    pub fn current(&self) -> Arc<DashboardView> {
        Arc::clone(&self.rx.borrow())
    }

    /// Waits for the next content change. `None` once the owning reconciler
    /// is gone.
    pub async fn changed(&mut self) -> Option<Arc<DashboardView>> {
        self.rx.changed().await.ok()?;
        Some(Arc::clone(&self.rx.borrow_and_update()))
    }

    pub fn into_stream(self) -> WatchStream<Arc<DashboardView>> {
        WatchStream::new(self.rx)
    }
}
