#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Typed identifiers and the records exchanged between the Mother Ship and
//! its rovers. All record shapes are wire shapes: they serialize to exactly
//! the JSON the protocols carry.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Width of the id slot in the MissionLink header. Ids longer than this are
/// rejected at construction, never truncated.
pub const ID_SLOT_MAX: usize = 3;

fn check_id_slot(kind: &str, s: &str) -> Result<()> {
    if s.is_empty() || s.len() > ID_SLOT_MAX {
        return Err(Error::validation(format!(
            "{kind} must be 1..={ID_SLOT_MAX} bytes, got {} (\"{s}\")",
            s.len()
        )));
    }
    if s.bytes().any(|b| b == b'|' || b.is_ascii_control()) {
        return Err(Error::validation(format!(
            "{kind} \"{s}\" contains a separator or control byte"
        )));
    }
    Ok(())
}

/// Logical identifier of a rover, sized to fit the MissionLink header slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoverId(String);

impl RoverId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        check_id_slot("rover id", &id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoverId {
    type Error = Error;
    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<RoverId> for String {
    fn from(id: RoverId) -> Self {
        id.0
    }
}

impl FromStr for RoverId {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for RoverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier of a mission, sized to fit the MissionLink header slot.
///
/// Sessions that carry no mission (registration, requests, textual replies)
/// use the reserved placeholder [`MissionId::none`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MissionId(String);

impl MissionId {
    /// Placeholder id for sessions not bound to a mission.
    pub fn none() -> Self {
        Self("000".to_string())
    }

    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        check_id_slot("mission id", &id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == "000"
    }
}

impl TryFrom<String> for MissionId {
    type Error = Error;
    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<MissionId> for String {
    fn from(id: MissionId) -> Self {
        id.0
    }
}

impl FromStr for MissionId {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for MissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Axis-aligned mission rectangle. Valid when `x1 < x2 && y1 < y2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoArea {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl GeoArea {
    pub fn is_degenerate(&self) -> bool {
        !(self.x1 < self.x2 && self.y1 < self.y2)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.x1 <= x && x <= self.x2 && self.y1 <= y && y <= self.y2
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// Kind of work a mission asks a rover to perform.
///
/// The closed set matches the fleet's known equipment; other values are
/// carried through but flagged by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskKind {
    CaptureImages,
    SampleCollection,
    EnvironmentalAnalysis,
    Other(String),
}

impl TaskKind {
    pub fn is_known(&self) -> bool {
        !matches!(self, TaskKind::Other(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            TaskKind::CaptureImages => "capture_images",
            TaskKind::SampleCollection => "sample_collection",
            TaskKind::EnvironmentalAnalysis => "environmental_analysis",
            TaskKind::Other(s) => s,
        }
    }
}

impl From<String> for TaskKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "capture_images" => TaskKind::CaptureImages,
            "sample_collection" => TaskKind::SampleCollection,
            "environmental_analysis" => TaskKind::EnvironmentalAnalysis,
            _ => TaskKind::Other(s),
        }
    }
}

impl From<TaskKind> for String {
    fn from(t: TaskKind) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mission record as dispatched over MissionLink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub mission_id: MissionId,
    pub rover_id: RoverId,
    pub geographic_area: GeoArea,
    pub task: TaskKind,
    pub duration_minutes: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// A rover position in mission coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Lifecycle state carried in a progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    InProgress,
    Completed,
    Failed,
    Paused,
}

/// Progress of one mission on one rover. Reports are idempotent: the last
/// write wins, intermediate values are not preserved under coalescing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub mission_id: MissionId,
    pub status: ProgressStatus,
    pub progress_percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_position: Option<Position>,
}

/// Operational state of a rover, as reported in telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationalStatus {
    Idle,
    EnRoute,
    OnMission,
    Error,
}

impl fmt::Display for OperationalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationalStatus::Idle => "idle",
            OperationalStatus::EnRoute => "en_route",
            OperationalStatus::OnMission => "on_mission",
            OperationalStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Heading quantised to a compass name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardinalDirection {
    North,
    East,
    South,
    West,
}

impl CardinalDirection {
    /// Map a heading in degrees (0 = North) onto the four compass names:
    /// `[315,360) ∪ [0,45)` North, `[45,135)` East, `[135,225)` South,
    /// `[225,315)` West. Input is normalised modulo 360.
    pub fn from_degrees(degrees: f64) -> Self {
        let d = degrees.rem_euclid(360.0);
        if !(45.0..315.0).contains(&d) {
            CardinalDirection::North
        } else if d < 135.0 {
            CardinalDirection::East
        } else if d < 225.0 {
            CardinalDirection::South
        } else {
            CardinalDirection::West
        }
    }
}

impl fmt::Display for CardinalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CardinalDirection::North => "North",
            CardinalDirection::East => "East",
            CardinalDirection::South => "South",
            CardinalDirection::West => "West",
        };
        f.write_str(s)
    }
}

/// One instantaneous state report from a rover, sent over TelemetryStream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub rover_id: RoverId,
    pub position: Position,
    pub operational_status: OperationalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<CardinalDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_health: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_slot_is_enforced_strictly() {
        assert!(RoverId::new("r1").is_ok());
        assert!(RoverId::new("r01").is_ok());
        assert!(RoverId::new("").is_err());
        // Never truncated: a 4-byte id is an error
        assert!(RoverId::new("mars1").is_err());
        assert!(MissionId::new("M|1").is_err());
        assert!(MissionId::new("M\x001").is_err());
        assert!(MissionId::none().is_none());
    }

    #[test]
    fn task_kind_roundtrip() {
        for s in ["capture_images", "sample_collection", "environmental_analysis"] {
            let t = TaskKind::from(s.to_string());
            assert!(t.is_known());
            assert_eq!(String::from(t), s);
        }
        let other = TaskKind::from("drilling".to_string());
        assert!(!other.is_known());
        assert_eq!(other.as_str(), "drilling");
    }

    #[test]
    fn compass_quantisation() {
        let cases = [
            (0.0, CardinalDirection::North),
            (44.9, CardinalDirection::North),
            (315.0, CardinalDirection::North),
            (359.9, CardinalDirection::North),
            (314.9, CardinalDirection::West),
            (45.0, CardinalDirection::East),
            (134.9, CardinalDirection::East),
            (135.0, CardinalDirection::South),
            (224.9, CardinalDirection::South),
            (225.0, CardinalDirection::West),
            (-10.0, CardinalDirection::North),
            (720.0, CardinalDirection::North),
        ];
        for (deg, want) in cases {
            assert_eq!(CardinalDirection::from_degrees(deg), want, "deg={deg}");
        }
    }

    #[test]
    fn mission_wire_shape() {
        let m = Mission {
            mission_id: MissionId::new("M01").unwrap(),
            rover_id: RoverId::new("r1").unwrap(),
            geographic_area: GeoArea { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 },
            task: TaskKind::CaptureImages,
            duration_minutes: 30.0,
            instructions: None,
        };
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["mission_id"], "M01");
        assert_eq!(json["task"], "capture_images");
        assert_eq!(json["geographic_area"]["x2"], 10.0);
        assert!(json.get("instructions").is_none());
        let back: Mission = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn progress_status_wire_names() {
        let p = ProgressReport {
            mission_id: MissionId::new("M01").unwrap(),
            status: ProgressStatus::InProgress,
            progress_percent: 40,
            current_position: None,
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["status"], "in_progress");
    }
}
