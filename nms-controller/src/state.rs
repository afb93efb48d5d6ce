#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Mother Ship in-memory state: agent registry, pending-mission queue,
//! active task map, progress map.
//!
//! All mutations happen on the MissionLink dispatch task; the observation
//! view and the telemetry worker only read. A coarse lock is sufficient at
//! this write rate.
//!
//! Invariants:
//! * a mission is in at most one of {pending queue, active map};
//! * a mission reported complete is in neither, and cannot be re-queued;
//! * an agent's registered address is never overwritten by a repeated
//!   registration.

use chrono::{DateTime, Utc};
use nms_core::{Mission, MissionId, ProgressReport, ProgressStatus, RoverId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

/// Registry entry for one rover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRecord {
    pub rover_id: RoverId,
    /// Authoritative address for outbound dispatches.
    pub addr: SocketAddr,
    pub registered_at: DateTime<Utc>,
}

/// Controller state behind one coarse lock.
pub type SharedState = Arc<RwLock<ControllerState>>;

#[derive(Debug, Default)]
pub struct ControllerState {
    agents: BTreeMap<RoverId, AgentRecord>,
    pending: VecDeque<Mission>,
    active: HashMap<MissionId, Mission>,
    completed: HashMap<MissionId, Mission>,
    progress: HashMap<MissionId, HashMap<RoverId, ProgressReport>>,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Register an agent. Returns `false` without rebinding the address
    /// when the id is already known.
    pub fn register(&mut self, rover_id: RoverId, addr: SocketAddr) -> bool {
        if self.agents.contains_key(&rover_id) {
            return false;
        }
        self.agents.insert(
            rover_id.clone(),
            AgentRecord {
                rover_id,
                addr,
                registered_at: Utc::now(),
            },
        );
        true
    }

    pub fn agent(&self, rover_id: &RoverId) -> Option<&AgentRecord> {
        self.agents.get(rover_id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentRecord> {
        self.agents.values()
    }

    /// True when the mission is already queued, active, or completed;
    /// such a mission must not be staged again.
    pub fn knows_mission(&self, mission_id: &MissionId) -> bool {
        self.active.contains_key(mission_id)
            || self.completed.contains_key(mission_id)
            || self.pending.iter().any(|m| &m.mission_id == mission_id)
    }

    /// True when any rover has reported the mission complete.
    pub fn is_completed(&self, mission_id: &MissionId) -> bool {
        self.completed.contains_key(mission_id)
            || self
                .progress
                .get(mission_id)
                .is_some_and(|by_rover| {
                    by_rover
                        .values()
                        .any(|p| p.status == ProgressStatus::Completed)
                })
    }

    /// Append to the pending queue. Duplicates (by mission id) and
    /// completed missions are refused.
    pub fn enqueue_pending(&mut self, mission: Mission) -> bool {
        if self.knows_mission(&mission.mission_id) || self.is_completed(&mission.mission_id) {
            return false;
        }
        self.pending.push_back(mission);
        true
    }

    /// Return a failed dispatch to the head of the queue.
    pub fn requeue_front(&mut self, mission: Mission) {
        self.pending.push_front(mission);
    }

    /// Dequeue the first pending mission addressed to `rover_id`. The queue
    /// order of non-matching entries is preserved; no fairness across
    /// rovers is attempted.
    pub fn take_pending_for(&mut self, rover_id: &RoverId) -> Option<Mission> {
        let idx = self
            .pending
            .iter()
            .position(|m| &m.rover_id == rover_id)?;
        self.pending.remove(idx)
    }

    /// Record a confirmed dispatch.
    pub fn activate(&mut self, mission: Mission) {
        self.pending.retain(|m| m.mission_id != mission.mission_id);
        self.active.insert(mission.mission_id.clone(), mission);
    }

    /// Upsert one progress report. A `completed` status retires the mission
    /// from the active map. Idempotent: replaying a report is a no-op.
    pub fn record_progress(&mut self, rover_id: RoverId, report: ProgressReport) {
        let mission_id = report.mission_id.clone();
        let completed = report.status == ProgressStatus::Completed;
        self.progress
            .entry(mission_id.clone())
            .or_default()
            .insert(rover_id, report);
        if completed {
            if let Some(mission) = self.active.remove(&mission_id) {
                self.completed.insert(mission_id.clone(), mission);
            }
            self.pending.retain(|m| m.mission_id != mission_id);
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = &Mission> {
        self.pending.iter()
    }

    pub fn active(&self) -> impl Iterator<Item = &Mission> {
        self.active.values()
    }

    pub fn completed(&self) -> impl Iterator<Item = &Mission> {
        self.completed.values()
    }

    pub fn active_mission(&self, mission_id: &MissionId) -> Option<&Mission> {
        self.active.get(mission_id)
    }

    pub fn progress_for(&self, mission_id: &MissionId) -> Option<&HashMap<RoverId, ProgressReport>> {
        self.progress.get(mission_id)
    }

    pub fn counts(&self) -> (usize, usize, usize, usize) {
        (
            self.agents.len(),
            self.pending.len(),
            self.active.len(),
            self.completed.len(),
        )
    }
}
