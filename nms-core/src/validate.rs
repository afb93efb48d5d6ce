#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Structural validation of mission and telemetry records.
//!
//! Both ends of MissionLink run the same mission checks: the Mother Ship
//! before dispatching, the rover on delivery. The checks are structural:
//! presence and typing of the mandatory fields, strictly positive
//! duration, non-degenerate rectangle. Diagnostics are plain strings so
//! callers can forward them in a sentinel reply body.

use crate::error::{Error, Result};
use crate::types::{Mission, TelemetrySnapshot};
use serde_json::Value;
use tracing::warn;

fn require<'a>(obj: &'a Value, field: &str) -> Result<&'a Value> {
    obj.get(field)
        .ok_or_else(|| Error::validation(format!("missing required field: {field}")))
}

fn require_str<'a>(obj: &'a Value, field: &str) -> Result<&'a str> {
    require(obj, field)?
        .as_str()
        .ok_or_else(|| Error::validation(format!("field {field} must be a string")))
}

fn require_f64(obj: &Value, field: &str) -> Result<f64> {
    require(obj, field)?
        .as_f64()
        .ok_or_else(|| Error::validation(format!("field {field} must be a number")))
}

/// Validate a mission body and parse it into a typed record.
///
/// Accepts the JSON text as carried on the wire. Unknown task kinds are
/// accepted but logged, matching the dispatch policy for forward
/// compatibility with new rover equipment.
pub fn parse_mission(body: &str) -> Result<Mission> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| Error::validation(format!("invalid JSON: {e}")))?;
    validate_mission_value(&value)?;
    let mission: Mission = serde_json::from_value(value)?;
    if !mission.task.is_known() {
        warn!(
            mission_id = %mission.mission_id,
            task = %mission.task,
            "mission carries an unrecognised task kind"
        );
    }
    Ok(mission)
}

/// Validate an already-parsed mission value without consuming it.
pub fn validate_mission_value(value: &Value) -> Result<()> {
    if !value.is_object() {
        return Err(Error::validation("mission must be a JSON object"));
    }
    require_str(value, "mission_id")?;
    require_str(value, "rover_id")?;
    require_str(value, "task")?;

    let duration = require_f64(value, "duration_minutes")?;
    if duration <= 0.0 {
        return Err(Error::validation("duration_minutes must be greater than 0"));
    }

    let area = require(value, "geographic_area")?;
    if !area.is_object() {
        return Err(Error::validation("geographic_area must be an object"));
    }
    let x1 = require_f64(area, "x1")?;
    let y1 = require_f64(area, "y1")?;
    let x2 = require_f64(area, "x2")?;
    let y2 = require_f64(area, "y2")?;
    if !(x1 < x2 && y1 < y2) {
        return Err(Error::validation(
            "geographic_area is degenerate: x1 < x2 and y1 < y2 are required",
        ));
    }
    Ok(())
}

/// Validate a mission record built in memory (library load, tests).
pub fn validate_mission(mission: &Mission) -> Result<()> {
    if mission.duration_minutes <= 0.0 {
        return Err(Error::validation("duration_minutes must be greater than 0"));
    }
    if mission.geographic_area.is_degenerate() {
        return Err(Error::validation(
            "geographic_area is degenerate: x1 < x2 and y1 < y2 are required",
        ));
    }
    Ok(())
}

/// Validate a telemetry snapshot before it leaves the rover.
///
/// Mandatory keys are `rover_id`, `position` and `operational_status`;
/// coordinates must be finite.
pub fn validate_telemetry(snapshot: &TelemetrySnapshot) -> Result<()> {
    let p = snapshot.position;
    if ![p.x, p.y, p.z].iter().all(|c| c.is_finite()) {
        return Err(Error::validation("position coordinates must be finite"));
    }
    if let Some(battery) = snapshot.battery {
        if !(0.0..=100.0).contains(&battery) {
            return Err(Error::validation("battery must be within 0..=100"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_body() -> String {
        r#"{
            "mission_id": "M01",
            "rover_id": "r1",
            "geographic_area": {"x1": 0.0, "y1": 0.0, "x2": 10.0, "y2": 10.0},
            "task": "capture_images",
            "duration_minutes": 30
        }"#
        .to_string()
    }

    #[test]
    fn accepts_well_formed_mission() {
        let m = parse_mission(&valid_body()).unwrap();
        assert_eq!(m.mission_id.as_str(), "M01");
        assert_eq!(m.duration_minutes, 30.0);
    }

    #[test]
    fn rejects_missing_field() {
        let body = valid_body().replace("\"task\": \"capture_images\",", "");
        let err = parse_mission(&body).unwrap_err();
        assert!(err.to_string().contains("task"));
    }

    #[test]
    fn rejects_non_positive_duration() {
        let body = valid_body().replace("\"duration_minutes\": 30", "\"duration_minutes\": 0");
        assert!(parse_mission(&body).is_err());
        let body = valid_body().replace("\"duration_minutes\": 30", "\"duration_minutes\": -5");
        assert!(parse_mission(&body).is_err());
    }

    #[test]
    fn rejects_degenerate_rectangle() {
        let body = valid_body().replace("\"x2\": 10.0", "\"x2\": 0.0");
        let err = parse_mission(&body).unwrap_err();
        assert!(err.to_string().contains("degenerate"));
    }

    #[test]
    fn rejects_wrong_types() {
        let body = valid_body().replace("\"duration_minutes\": 30", "\"duration_minutes\": \"30\"");
        assert!(parse_mission(&body).is_err());
    }

    #[test]
    fn unknown_task_is_accepted() {
        let body = valid_body().replace("capture_images", "terraforming");
        let m = parse_mission(&body).unwrap();
        assert!(!m.task.is_known());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_mission("not json").is_err());
        assert!(parse_mission("[1,2,3]").is_err());
    }
}
