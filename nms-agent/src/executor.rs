#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Mission execution seam.
//!
//! The real movement/battery simulator is an external collaborator; the
//! session layer only depends on the [`MissionExecutor`] trait. The
//! built-in [`TimedExecutor`] walks progress 0→100 across the mission
//! duration, keeps the rover's position inside the mission rectangle, and
//! reports through the progress sink. The last report it emits is always
//! `completed` at 100%.

use crate::state::SharedRover;
use async_trait::async_trait;
use nms_core::{Mission, OperationalStatus, ProgressReport, ProgressStatus, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Where executors deliver their progress reports; the session layer
/// forwards each one to the Mother Ship.
pub type ProgressSink = mpsc::Sender<ProgressReport>;

/// One mission run to completion.
#[async_trait]
pub trait MissionExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        mission: &Mission,
        rover: &SharedRover,
        progress: &ProgressSink,
    ) -> Result<()>;
}

/// Built-in executor: a timed sweep of the mission area.
#[derive(Debug, Clone)]
pub struct TimedExecutor {
    /// Wall-clock seconds per mission minute; 60.0 is real time, tests run
    /// much faster.
    pub secs_per_minute: f64,
}

impl Default for TimedExecutor {
    fn default() -> Self {
        Self { secs_per_minute: 60.0 }
    }
}

impl TimedExecutor {
    pub fn scaled(secs_per_minute: f64) -> Self {
        Self { secs_per_minute }
    }
}

const GRID_STEPS: u32 = 5;
const PROGRESS_TICKS: u32 = 20;

#[async_trait]
impl MissionExecutor for TimedExecutor {
    async fn execute(
        &self,
        mission: &Mission,
        rover: &SharedRover,
        progress: &ProgressSink,
    ) -> Result<()> {
        let area = mission.geographic_area;
        let (cx, cy) = area.center();
        let total = Duration::from_secs_f64(
            (mission.duration_minutes * self.secs_per_minute).max(0.1),
        );
        let tick = total / PROGRESS_TICKS;

        // Drive to the area first.
        {
            let mut st = rover.write();
            let pos = st.position();
            if !area.contains(pos.x, pos.y) {
                st.set_status(OperationalStatus::EnRoute);
                st.set_velocity(5.0);
                let heading = (cx - pos.x).atan2(cy - pos.y).to_degrees();
                st.set_direction(heading);
            }
        }
        tokio::time::sleep(tick).await;
        {
            let mut st = rover.write();
            st.set_position(cx, cy, 0.0);
            st.set_status(OperationalStatus::OnMission);
            st.set_velocity(2.0);
        }

        // Sweep the rectangle on a coarse grid while progress advances.
        let step_x = (area.x2 - area.x1) / GRID_STEPS as f64;
        let step_y = (area.y2 - area.y1) / GRID_STEPS as f64;
        for i in 1..PROGRESS_TICKS {
            let gx = i % GRID_STEPS;
            let gy = (i / GRID_STEPS) % GRID_STEPS;
            let percent = (i * 100 / PROGRESS_TICKS) as u8;
            let position = {
                let mut st = rover.write();
                st.set_position(
                    area.x1 + gx as f64 * step_x,
                    area.y1 + gy as f64 * step_y,
                    0.0,
                );
                let battery = st.battery();
                st.set_battery(battery - 0.2);
                st.position()
            };
            let _ = progress
                .send(ProgressReport {
                    mission_id: mission.mission_id.clone(),
                    status: ProgressStatus::InProgress,
                    progress_percent: percent,
                    current_position: Some(position),
                })
                .await;
            tokio::time::sleep(tick).await;
        }

        let final_position = {
            let mut st = rover.write();
            st.set_status(OperationalStatus::Idle);
            st.set_velocity(0.0);
            st.position()
        };
        debug!(mission = %mission.mission_id, "execution finished");
        let _ = progress
            .send(ProgressReport {
                mission_id: mission.mission_id.clone(),
                status: ProgressStatus::Completed,
                progress_percent: 100,
                current_position: Some(final_position),
            })
            .await;
        Ok(())
    }
}
