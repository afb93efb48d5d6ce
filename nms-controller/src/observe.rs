#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Read-only view over the controller state for the external observation
//! API. The HTTP layer itself lives outside this workspace; it consumes
//! these snapshots and serializes them verbatim.

use crate::state::SharedState;
use chrono::{DateTime, Utc};
use nms_core::{Mission, MissionId, ProgressReport, Result, RoverId};
use nms_telemetry::TelemetryStore;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Lifecycle bucket of a mission, as exposed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionPhase {
    Pending,
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoverSummary {
    pub rover_id: RoverId,
    pub addr: SocketAddr,
    pub registered_at: DateTime<Utc>,
    pub active_missions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissionSummary {
    #[serde(flatten)]
    pub mission: Mission,
    pub phase: MissionPhase,
    /// Latest report per rover, when any has arrived.
    pub progress: Vec<ProgressReport>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatusSummary {
    pub rovers: usize,
    pub pending_missions: usize,
    pub active_missions: usize,
    pub completed_missions: usize,
}

/// Cheap cloneable handle answering observation queries.
#[derive(Clone)]
pub struct ObservationView {
    state: SharedState,
    store: Arc<TelemetryStore>,
}

impl ObservationView {
    pub fn new(state: SharedState, store: Arc<TelemetryStore>) -> Self {
        Self { state, store }
    }

    pub fn rovers(&self) -> Vec<RoverSummary> {
        let state = self.state.read();
        state
            .agents()
            .map(|a| RoverSummary {
                rover_id: a.rover_id.clone(),
                addr: a.addr,
                registered_at: a.registered_at,
                active_missions: state
                    .active()
                    .filter(|m| m.rover_id == a.rover_id)
                    .count(),
            })
            .collect()
    }

    pub fn rover(&self, rover_id: &RoverId) -> Option<RoverSummary> {
        self.rovers().into_iter().find(|r| &r.rover_id == rover_id)
    }

    pub fn missions(&self, phase: Option<MissionPhase>) -> Vec<MissionSummary> {
        let state = self.state.read();
        let mut out = Vec::new();
        for (bucket, iter) in [
            (MissionPhase::Pending, state.pending().collect::<Vec<_>>()),
            (MissionPhase::Active, state.active().collect()),
            (MissionPhase::Completed, state.completed().collect()),
        ] {
            if phase.is_some_and(|p| p != bucket) {
                continue;
            }
            for mission in iter {
                out.push(MissionSummary {
                    mission: mission.clone(),
                    phase: bucket,
                    progress: state
                        .progress_for(&mission.mission_id)
                        .map(|by_rover| by_rover.values().cloned().collect())
                        .unwrap_or_default(),
                });
            }
        }
        out.sort_by(|a, b| a.mission.mission_id.cmp(&b.mission.mission_id));
        out
    }

    pub fn mission(&self, mission_id: &MissionId) -> Option<MissionSummary> {
        self.missions(None)
            .into_iter()
            .find(|m| &m.mission.mission_id == mission_id)
    }

    /// Stored snapshot paths for one rover, at most `limit` entries.
    pub fn telemetry(&self, rover_id: &RoverId, limit: usize) -> Result<Vec<PathBuf>> {
        self.store.list_snapshots(rover_id.as_str(), limit)
    }

    pub fn status(&self) -> StatusSummary {
        let (rovers, pending, active, completed) = self.state.read().counts();
        StatusSummary {
            rovers,
            pending_missions: pending,
            active_missions: active,
            completed_missions: completed,
        }
    }

    /// Liveness probe body.
    pub fn health(&self) -> &'static str {
        "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ControllerState;
    use nms_core::{GeoArea, ProgressStatus, TaskKind};

    fn mission(id: &str, rover: &str) -> Mission {
        Mission {
            mission_id: MissionId::new(id).unwrap(),
            rover_id: RoverId::new(rover).unwrap(),
            geographic_area: GeoArea { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 },
            task: TaskKind::EnvironmentalAnalysis,
            duration_minutes: 15.0,
            instructions: None,
        }
    }

    async fn view() -> (ObservationView, SharedState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TelemetryStore::open(dir.path(), 1024).await.unwrap());
        let state = ControllerState::shared();
        (ObservationView::new(state.clone(), store), state, dir)
    }

    #[tokio::test]
    async fn phases_and_filters() {
        let (view, state, _dir) = view().await;
        {
            let mut st = state.write();
            st.enqueue_pending(mission("M01", "r1"));
            st.activate(mission("M02", "r1"));
            st.activate(mission("M03", "r2"));
            st.record_progress(
                RoverId::new("r2").unwrap(),
                ProgressReport {
                    mission_id: MissionId::new("M03").unwrap(),
                    status: ProgressStatus::Completed,
                    progress_percent: 100,
                    current_position: None,
                },
            );
        }

        let all = view.missions(None);
        assert_eq!(all.len(), 3);
        assert_eq!(view.missions(Some(MissionPhase::Pending)).len(), 1);
        assert_eq!(view.missions(Some(MissionPhase::Active)).len(), 1);
        let done = view.missions(Some(MissionPhase::Completed));
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].progress.len(), 1);

        let status = view.status();
        assert_eq!(
            (status.pending_missions, status.active_missions, status.completed_missions),
            (1, 1, 1)
        );
    }

    #[tokio::test]
    async fn rover_listing_counts_active_missions() {
        let (view, state, _dir) = view().await;
        {
            let mut st = state.write();
            st.register(RoverId::new("r1").unwrap(), "10.0.3.10:8080".parse().unwrap());
            st.activate(mission("M02", "r1"));
        }
        let rovers = view.rovers();
        assert_eq!(rovers.len(), 1);
        assert_eq!(rovers[0].active_missions, 1);
        assert!(view.rover(&RoverId::new("r9").unwrap()).is_none());
    }

    #[tokio::test]
    async fn mission_summaries_serialize_flat() {
        let (view, state, _dir) = view().await;
        state.write().activate(mission("M02", "r1"));
        let summary = view.mission(&MissionId::new("M02").unwrap()).unwrap();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["mission_id"], "M02");
        assert_eq!(json["phase"], "active");
    }
}
