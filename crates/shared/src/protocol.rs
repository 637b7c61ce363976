use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    domain::{
        EmergencyVehicle, EmergencyVehicleDraft, Intersection, IntersectionId, TrafficStatus,
        VehicleId,
    },
    time::lenient_timestamp,
};

pub const TRAFFIC_UPDATE_KIND: &str = "traffic_update";

/// Body of a `traffic_update` frame. Both collections are complete current
/// sets, never patches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficUpdate {
    pub intersections: Vec<Intersection>,
    pub emergency_vehicles: Vec<EmergencyVehicle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TrafficStatus>,
    #[serde(
        default,
        with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    TrafficUpdate(TrafficUpdate),
    /// A well-formed frame whose `type` is not one the dashboard consumes
    /// (e.g. `priority_override`, `emergency_vehicle_created`).
    Unrecognized { kind: String },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    NotJson(String),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no string `type` discriminator")]
    MissingKind,
    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload { kind: String, reason: String },
}

pub fn decode_stream_frame(text: &str) -> Result<StreamFrame, FrameError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| FrameError::NotJson(err.to_string()))?;
    let Value::Object(mut fields) = value else {
        return Err(FrameError::NotAnObject);
    };
    let kind = match fields.remove("type") {
        Some(Value::String(kind)) => kind,
        _ => return Err(FrameError::MissingKind),
    };
    if kind != TRAFFIC_UPDATE_KIND {
        return Ok(StreamFrame::Unrecognized { kind });
    }
    serde_json::from_value::<TrafficUpdate>(Value::Object(fields))
        .map(StreamFrame::TrafficUpdate)
        .map_err(|err| FrameError::MalformedPayload {
            kind,
            reason: err.to_string(),
        })
}

pub fn encode_traffic_update(update: &TrafficUpdate) -> serde_json::Result<String> {
    let mut value = serde_json::to_value(update)?;
    if let Value::Object(fields) = &mut value {
        fields.insert("type".into(), Value::String(TRAFFIC_UPDATE_KIND.into()));
    }
    serde_json::to_string(&value)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityOverrideRequest {
    pub vehicle_id: VehicleId,
    pub intersection_id: IntersectionId,
    pub priority_level: i32,
    pub duration: i64,
}

/// Body of `POST /api/emergency-vehicles`. The backend validates it as a full
/// vehicle, so an empty `id` travels with the draft and is replaced by the
/// identity the backend assigns.
#[derive(Debug, Serialize)]
pub struct DispatchRequest<'a> {
    pub id: &'static str,
    #[serde(flatten)]
    pub draft: &'a EmergencyVehicleDraft,
}

impl<'a> DispatchRequest<'a> {
    pub fn new(draft: &'a EmergencyVehicleDraft) -> Self {
        Self { id: "", draft }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideAck {
    pub status: String,
    pub intersection_id: IntersectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchAck {
    pub vehicle_id: VehicleId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub message: String,
    pub version: String,
}
