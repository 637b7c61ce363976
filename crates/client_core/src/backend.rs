use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{EmergencyVehicle, EmergencyVehicleDraft, Intersection, IntersectionId, TrafficStatus},
    error::BackendErrorBody,
    protocol::{DispatchRequest, OverrideAck, PriorityOverrideRequest, ServiceInfo},
};
use tracing::debug;

use crate::{config::ClientSettings, error::BackendError};

/// REST surface of the traffic-control service.
#[async_trait]
pub trait TrafficBackend: Send + Sync {
    async fn fetch_intersections(&self) -> Result<Vec<Intersection>, BackendError>;
    async fn fetch_intersection(&self, id: &IntersectionId) -> Result<Intersection, BackendError>;
    async fn fetch_emergency_vehicles(&self) -> Result<Vec<EmergencyVehicle>, BackendError>;
    async fn fetch_traffic_status(&self) -> Result<TrafficStatus, BackendError>;
    async fn post_priority_override(
        &self,
        request: &PriorityOverrideRequest,
    ) -> Result<OverrideAck, BackendError>;
    /// Returns the vehicle as stored by the backend, carrying its assigned id.
    async fn post_emergency_vehicle(
        &self,
        draft: &EmergencyVehicleDraft,
    ) -> Result<EmergencyVehicle, BackendError>;
    async fn service_info(&self) -> Result<ServiceInfo, BackendError>;
}

pub struct HttpBackend {
    http: Client,
    settings: ClientSettings,
}

impl HttpBackend {
    pub fn new(settings: ClientSettings) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self { http, settings })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let url = self.settings.endpoint(path);
        debug!(%url, "backend: GET");
        let res = self.http.get(&url).send().await?;
        decode(res).await
    }
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T, BackendError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<BackendErrorBody>(&body)
            .map(|parsed| parsed.message())
            .unwrap_or(body);
        return Err(BackendError::Status {
            status: status.as_u16(),
            detail,
        });
    }
    let bytes = res.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| BackendError::Decode(err.to_string()))
}

#[async_trait]
impl TrafficBackend for HttpBackend {
    async fn fetch_intersections(&self) -> Result<Vec<Intersection>, BackendError> {
        self.get_json("/api/intersections").await
    }

    async fn fetch_intersection(&self, id: &IntersectionId) -> Result<Intersection, BackendError> {
        self.get_json(&format!("/api/intersections/{}", id.0)).await
    }

    async fn fetch_emergency_vehicles(&self) -> Result<Vec<EmergencyVehicle>, BackendError> {
        self.get_json("/api/emergency-vehicles").await
    }

    async fn fetch_traffic_status(&self) -> Result<TrafficStatus, BackendError> {
        self.get_json("/api/traffic-status").await
    }

    async fn post_priority_override(
        &self,
        request: &PriorityOverrideRequest,
    ) -> Result<OverrideAck, BackendError> {
        let url = self
            .settings
            .endpoint(&format!("/api/priority-override/{}", request.intersection_id.0));
        debug!(%url, vehicle_id = %request.vehicle_id, "backend: POST priority override");
        let res = self.http.post(&url).json(request).send().await?;
        decode(res).await
    }

    async fn post_emergency_vehicle(
        &self,
        draft: &EmergencyVehicleDraft,
    ) -> Result<EmergencyVehicle, BackendError> {
        let url = self.settings.endpoint("/api/emergency-vehicles");
        debug!(%url, kind = ?draft.kind, "backend: POST emergency vehicle");
        let res = self
            .http
            .post(&url)
            .json(&DispatchRequest::new(draft))
            .send()
            .await?;
        decode(res).await
    }

    async fn service_info(&self) -> Result<ServiceInfo, BackendError> {
        self.get_json("/").await
    }
}
