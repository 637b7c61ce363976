use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::time::lenient_timestamp;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(IntersectionId);
id_newtype!(LightId);
id_newtype!(VehicleId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

/// Signal aspect as reported by the backend. Anything the backend sends that
/// is not red/yellow/green (or a missing field) lands on `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Red,
    Yellow,
    Green,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleKind {
    Ambulance,
    FireTruck,
    Police,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Operational,
    Degraded,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficLight {
    pub id: LightId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intersection_id: Option<IntersectionId>,
    pub direction: Direction,
    #[serde(default, deserialize_with = "lenient_signal")]
    pub status: SignalStatus,
    #[serde(default)]
    pub remaining_time: u32,
    #[serde(default)]
    pub priority_override: bool,
}

/// Null, numbers and unknown words all read as `Unknown`; a single odd light
/// must not fail the payload around it.
fn lenient_signal<'de, D>(deserializer: D) -> Result<SignalStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    let status = match raw.as_ref().and_then(Value::as_str) {
        Some(word) if word.eq_ignore_ascii_case("red") => SignalStatus::Red,
        Some(word) if word.eq_ignore_ascii_case("yellow") => SignalStatus::Yellow,
        Some(word) if word.eq_ignore_ascii_case("green") => SignalStatus::Green,
        _ => SignalStatus::Unknown,
    };
    Ok(status)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intersection {
    pub id: IntersectionId,
    pub name: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub traffic_lights: Vec<TrafficLight>,
    #[serde(default)]
    pub emergency_priority: bool,
    #[serde(default)]
    pub traffic_flow_rate: f64,
    #[serde(default, with = "lenient_timestamp")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Intersection {
    pub fn light(&self, direction: Direction) -> Option<&TrafficLight> {
        self.traffic_lights
            .iter()
            .find(|light| light.direction == direction)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyVehicle {
    pub id: VehicleId,
    #[serde(rename = "type")]
    pub kind: VehicleKind,
    pub latitude: f64,
    pub longitude: f64,
    pub destination_lat: f64,
    pub destination_lon: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub route: Vec<IntersectionId>,
    pub priority_level: i32,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, with = "lenient_timestamp")]
    pub estimated_arrival: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficStatus {
    pub total_intersections: u32,
    #[serde(default)]
    pub priority_intersections: u32,
    #[serde(default)]
    pub emergency_vehicles_active: u32,
    #[serde(default)]
    pub average_flow_rate: f64,
    pub system_status: SystemStatus,
}

/// Vehicle dispatch as submitted by an operator. Identity is assigned by the
/// backend, so there is deliberately no `id` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyVehicleDraft {
    #[serde(rename = "type")]
    pub kind: VehicleKind,
    pub latitude: f64,
    pub longitude: f64,
    pub destination_lat: f64,
    pub destination_lon: f64,
    pub speed: f64,
    pub route: Vec<IntersectionId>,
    pub priority_level: i32,
}
