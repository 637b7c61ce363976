use std::sync::Arc;

use shared::{
    domain::{EmergencyVehicleDraft, Intersection, IntersectionId, VehicleId},
    protocol::{DispatchAck, OverrideAck, ServiceInfo},
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

pub mod backend;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod reconciler;
pub mod snapshot;
pub mod view;

pub use backend::{HttpBackend, TrafficBackend};
pub use channel::{ChannelConfig, ChannelEvent, ConnectionState, LiveUpdateChannel};
pub use config::{load_settings, ClientSettings};
pub use dispatcher::CommandDispatcher;
pub use error::{
    BackendError, ChannelError, CommandFailure, ConfigError, DispatchError, InvalidRequest,
    LoadFailure,
};
pub use reconciler::StateReconciler;
pub use snapshot::{Snapshot, SnapshotLoader};
pub use view::{DashboardView, ViewHandle};

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ConnectionChanged(ConnectionState),
    SnapshotApplied { revision: u64 },
    UpdateApplied { revision: u64, changed: bool },
    LoadFailed(LoadFailure),
    ChannelError(ChannelError),
}

/// Wires loader, live channel, reconciler and dispatcher together.
pub struct DashboardClient {
    settings: ClientSettings,
    backend: Arc<dyn TrafficBackend>,
    reconciler: Arc<StateReconciler>,
    loader: SnapshotLoader,
    dispatcher: CommandDispatcher,
    live: Mutex<Option<LiveSession>>,
    events: broadcast::Sender<ClientEvent>,
}

struct LiveSession {
    channel: LiveUpdateChannel,
    sync_task: JoinHandle<()>,
}

impl DashboardClient {
    pub fn new(settings: ClientSettings) -> Result<Arc<Self>, BackendError> {
        let backend = Arc::new(HttpBackend::new(settings.clone())?);
        Ok(Self::new_with_backend(settings, backend))
    }

    pub fn new_with_backend(
        settings: ClientSettings,
        backend: Arc<dyn TrafficBackend>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        let reconciler = Arc::new(StateReconciler::new());
        let loader = SnapshotLoader::new(Arc::clone(&backend));
        let dispatcher = CommandDispatcher::new(Arc::clone(&backend), reconciler.subscribe());
        Arc::new(Self {
            settings,
            backend,
            reconciler,
            loader,
            dispatcher,
            live: Mutex::new(None),
            events,
        })
    }

    pub fn view(&self) -> Arc<DashboardView> {
        self.reconciler.get_view()
    }

    pub fn view_handle(&self) -> ViewHandle {
        self.reconciler.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// One-off snapshot load. On failure the previous view is kept.
    pub async fn load_snapshot(&self) -> Result<Arc<DashboardView>, LoadFailure> {
        apply_fresh_snapshot(&self.reconciler, &self.loader, &self.events).await?;
        Ok(self.reconciler.get_view())
    }

    /// Starts the live channel and the sync loop. Returns immediately; a
    /// second call while running is a no-op.
    pub async fn start(&self) -> Result<(), ConfigError> {
        let mut live = self.live.lock().await;
        if live.is_some() {
            return Ok(());
        }
        let config = ChannelConfig::from_settings(&self.settings)?;
        info!(url = %config.url, "dashboard: starting live channel");
        let (tx, rx) = mpsc::channel(self.settings.event_buffer.max(1));
        let channel = LiveUpdateChannel::start(config, tx);
        let sync_task = tokio::spawn(run_sync_loop(
            rx,
            Arc::clone(&self.reconciler),
            self.loader.clone(),
            self.events.clone(),
        ));
        *live = Some(LiveSession { channel, sync_task });
        Ok(())
    }

    /// Idempotent. Held data stays in the view.
    pub async fn stop(&self) {
        let session = self.live.lock().await.take();
        let Some(session) = session else {
            return;
        };
        session.channel.stop().await;
        if let Err(err) = session.sync_task.await {
            warn!(error = %err, "dashboard: sync loop ended abnormally");
        }
        info!("dashboard: live channel stopped");
    }

    pub async fn connection_state(&self) -> ConnectionState {
        match self.live.lock().await.as_ref() {
            Some(session) => session.channel.state(),
            None => ConnectionState::Disconnected,
        }
    }

    pub async fn request_priority_override(
        &self,
        intersection_id: IntersectionId,
        vehicle_id: VehicleId,
        priority_level: i32,
        duration_seconds: i64,
    ) -> Result<OverrideAck, DispatchError> {
        self.dispatcher
            .request_priority_override(intersection_id, vehicle_id, priority_level, duration_seconds)
            .await
    }

    pub async fn dispatch_emergency_vehicle(
        &self,
        draft: EmergencyVehicleDraft,
    ) -> Result<DispatchAck, DispatchError> {
        self.dispatcher.dispatch_emergency_vehicle(draft).await
    }

    /// Detail read; does not alter the reconciled view.
    pub async fn fetch_intersection(&self, id: &IntersectionId) -> Result<Intersection, BackendError> {
        self.loader.load_intersection(id).await
    }

    pub async fn service_info(&self) -> Result<ServiceInfo, BackendError> {
        self.backend.service_info().await
    }
}

async fn apply_fresh_snapshot(
    reconciler: &StateReconciler,
    loader: &SnapshotLoader,
    events: &broadcast::Sender<ClientEvent>,
) -> Result<(), LoadFailure> {
    match loader.load().await {
        Ok(snapshot) => {
            reconciler.apply_snapshot(snapshot);
            let revision = reconciler.get_view().revision;
            let _ = events.send(ClientEvent::SnapshotApplied { revision });
            Ok(())
        }
        Err(failure) => {
            let _ = events.send(ClientEvent::LoadFailed(failure.clone()));
            Err(failure)
        }
    }
}

/// Single writer path for live data. Events are handled strictly in arrival
/// order; a Connected event loads a fresh snapshot before anything queued
/// behind it is applied.
pub async fn run_sync_loop(
    mut rx: mpsc::Receiver<ChannelEvent>,
    reconciler: Arc<StateReconciler>,
    loader: SnapshotLoader,
    events: broadcast::Sender<ClientEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            ChannelEvent::StateChanged(state) => {
                reconciler.set_connection_state(state);
                let _ = events.send(ClientEvent::ConnectionChanged(state));
                if state == ConnectionState::Connected {
                    // Stream deltas stay queued in `rx` until this returns.
                    if let Err(failure) = apply_fresh_snapshot(&reconciler, &loader, &events).await
                    {
                        warn!(error = %failure, "dashboard: keeping previous view after failed resync");
                    }
                }
            }
            ChannelEvent::Update(update) => {
                let changed = reconciler.apply_update(update);
                let revision = reconciler.get_view().revision;
                let _ = events.send(ClientEvent::UpdateApplied { revision, changed });
            }
            ChannelEvent::Error(err) => {
                let _ = events.send(ClientEvent::ChannelError(err));
            }
        }
    }
    reconciler.set_connection_state(ConnectionState::Disconnected);
}

#[cfg(test)]
#[path = "tests/fixtures.rs"]
pub(crate) mod fixtures;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
