#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Rover state backing the telemetry snapshots.
//!
//! The executor and the telemetry scheduler share this through a coarse
//! lock; setters clamp to physical ranges so a snapshot is always valid.

use chrono::Utc;
use nms_core::{CardinalDirection, OperationalStatus, Position, RoverId, TelemetrySnapshot};
use parking_lot::RwLock;
use std::sync::Arc;

pub type SharedRover = Arc<RwLock<RoverState>>;

#[derive(Debug, Clone)]
pub struct RoverState {
    rover_id: RoverId,
    position: Position,
    operational_status: OperationalStatus,
    battery: f64,
    velocity: f64,
    direction_degrees: f64,
    temperature: f64,
    system_health: String,
}

impl RoverState {
    pub fn new(rover_id: RoverId) -> Self {
        Self {
            rover_id,
            position: Position::default(),
            operational_status: OperationalStatus::Idle,
            battery: 100.0,
            velocity: 0.0,
            direction_degrees: 0.0,
            temperature: 20.0,
            system_health: "operational".to_string(),
        }
    }

    pub fn shared(rover_id: RoverId) -> SharedRover {
        Arc::new(RwLock::new(Self::new(rover_id)))
    }

    pub fn rover_id(&self) -> &RoverId {
        &self.rover_id
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn status(&self) -> OperationalStatus {
        self.operational_status
    }

    pub fn battery(&self) -> f64 {
        self.battery
    }

    pub fn set_position(&mut self, x: f64, y: f64, z: f64) {
        self.position = Position::new(x, y, z);
    }

    pub fn set_status(&mut self, status: OperationalStatus) {
        self.operational_status = status;
    }

    pub fn set_battery(&mut self, level: f64) {
        self.battery = level.clamp(0.0, 100.0);
    }

    pub fn set_velocity(&mut self, velocity: f64) {
        self.velocity = velocity.max(0.0);
    }

    pub fn set_direction(&mut self, degrees: f64) {
        self.direction_degrees = degrees.rem_euclid(360.0);
    }

    pub fn set_temperature(&mut self, celsius: f64) {
        self.temperature = celsius;
    }

    pub fn set_health(&mut self, health: impl Into<String>) {
        self.system_health = health.into();
    }

    /// Build one telemetry snapshot from the current state, stamped now.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            rover_id: self.rover_id.clone(),
            position: self.position,
            operational_status: self.operational_status,
            battery: Some(self.battery),
            velocity: Some(self.velocity),
            direction: Some(CardinalDirection::from_degrees(self.direction_degrees)),
            temperature: Some(self.temperature),
            system_health: Some(self.system_health.clone()),
            timestamp: Some(Utc::now()),
        }
    }
}
