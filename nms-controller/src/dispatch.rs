//! MissionLink dispatch loop of the Mother Ship.
//!
//! One task owns the responder endpoint and performs every state mutation:
//! registrations, mission requests, progress reports. Outbound sends (the
//! textual replies and mission dispatches) run as fresh initiator sessions
//! addressed to the rover's registered address.

use crate::library::MissionLibrary;
use crate::state::{ControllerState, SharedState};
use nms_core::{validate, Error, Mission, MissionId, NmsConfig, ProgressReport, Result, RoverId};
use nms_missionlink::{Delivery, MlConfig, MlEndpoint, MlSender, OpType, Payload};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Textual reply bodies, also part of the wire contract.
pub mod reply {
    pub const REGISTERED: &str = "Registered";
    pub const ALREADY_REGISTERED: &str = "Already registered";
    pub const NO_MISSION: &str = "no_mission";
    pub const PROGRESS_RECEIVED: &str = "progress_received";
    pub const PARSE_ERROR: &str = "parse_error";
    pub const INVALID: &str = "invalid";
}

/// The Mother Ship's MissionLink side.
pub struct Controller {
    endpoint: MlEndpoint,
    sender: MlSender,
    state: SharedState,
    library: MissionLibrary,
    /// Rovers answer on the well-known MissionLink port.
    ml_port: u16,
    /// Whole-mission retries at the dispatch layer.
    retry_limit: u32,
    retry_pause: Duration,
}

impl Controller {
    /// Bind the responder endpoint and assemble the dispatch layer.
    pub async fn bind(
        bind_addr: SocketAddr,
        store_root: impl Into<std::path::PathBuf>,
        cfg: &NmsConfig,
        library: MissionLibrary,
    ) -> Result<Self> {
        let ml_cfg = MlConfig::from_nms(cfg);
        let endpoint = MlEndpoint::bind(bind_addr, store_root, ml_cfg.clone()).await?;
        Ok(Self {
            endpoint,
            sender: MlSender::new(ml_cfg),
            state: ControllerState::shared(),
            library,
            ml_port: cfg.missionlink_port,
            retry_limit: cfg.retry_limit,
            retry_pause: Duration::from_millis(500),
        })
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Receive-and-dispatch loop. Runs until the task is aborted; no
    /// failure of a single session escapes it.
    pub async fn run(&self) -> Result<()> {
        info!(addr = %self.local_addr()?, "missionlink dispatch loop running");
        loop {
            let delivery = match self.endpoint.recv().await {
                Ok(d) => d,
                Err(Error::Timeout) => continue,
                Err(e) => {
                    warn!(error = %e, "inbound session failed");
                    continue;
                }
            };
            if let Err(e) = self.handle(delivery).await {
                warn!(error = %e, "dispatch handler failed");
            }
        }
    }

    /// Route one completed inbound session.
    pub async fn handle(&self, delivery: Delivery) -> Result<()> {
        match delivery.op {
            OpType::Register => self.handle_register(delivery).await,
            OpType::Request => self.handle_request(delivery).await,
            OpType::Progress => self.handle_progress(delivery).await,
            OpType::None => {
                // Application-level confirmations from rovers ("M01" after a
                // dispatch) arrive here; they carry no state change.
                debug!(
                    agent = %delivery.agent_id,
                    mission = %delivery.mission_id,
                    "reply session absorbed"
                );
                Ok(())
            }
            OpType::Task => Err(Error::protocol(
                "rovers do not dispatch missions to the Mother Ship",
            )),
        }
    }

    async fn handle_register(&self, delivery: Delivery) -> Result<()> {
        let rover_id = RoverId::new(delivery.agent_id.clone())?;
        let addr = self.dispatch_addr(&delivery);

        let already = self.state.read().agent(&rover_id).is_some();
        if already {
            // Inert by design: acknowledged, address untouched.
            info!(rover = %rover_id, "duplicate registration");
            return self
                .send_text(addr, &rover_id, &MissionId::none(), reply::ALREADY_REGISTERED)
                .await;
        }

        // Confirm first: a registration whose confirmation never arrived
        // must not linger in the registry.
        self.send_text(addr, &rover_id, &MissionId::none(), reply::REGISTERED)
            .await?;
        self.state.write().register(rover_id.clone(), addr);
        info!(rover = %rover_id, %addr, "rover registered");

        self.stage_library_missions(&rover_id, addr).await;
        Ok(())
    }

    async fn handle_request(&self, delivery: Delivery) -> Result<()> {
        let rover_id = RoverId::new(delivery.agent_id.clone())?;
        let addr = self
            .state
            .read()
            .agent(&rover_id)
            .map(|a| a.addr)
            .unwrap_or_else(|| self.dispatch_addr(&delivery));

        let mut mission = self.state.write().take_pending_for(&rover_id);
        if mission.is_none() {
            // Nothing queued: give the library a chance to have grown.
            self.refill_pending(&rover_id);
            mission = self.state.write().take_pending_for(&rover_id);
        }

        match mission {
            Some(mission) => {
                let id = mission.mission_id.clone();
                if let Err(e) = self.send_mission(addr, &rover_id, mission.clone()).await {
                    warn!(mission = %id, rover = %rover_id, error = %e, "dispatch failed, requeueing");
                    self.state.write().requeue_front(mission);
                }
                Ok(())
            }
            None => {
                self.send_text(addr, &rover_id, &MissionId::none(), reply::NO_MISSION)
                    .await
            }
        }
    }

    async fn handle_progress(&self, delivery: Delivery) -> Result<()> {
        let rover_id = RoverId::new(delivery.agent_id.clone())?;
        let addr = self
            .state
            .read()
            .agent(&rover_id)
            .map(|a| a.addr)
            .unwrap_or_else(|| self.dispatch_addr(&delivery));
        let mission_id = MissionId::new(delivery.mission_id.clone())?;

        let Payload::Message(body) = &delivery.payload else {
            return self
                .send_text(addr, &rover_id, &mission_id, reply::PARSE_ERROR)
                .await;
        };

        let report: ProgressReport = match serde_json::from_str(body) {
            Ok(report) => report,
            Err(e) => {
                warn!(rover = %rover_id, mission = %mission_id, error = %e, "unparseable progress report");
                return self
                    .send_text(addr, &rover_id, &mission_id, reply::PARSE_ERROR)
                    .await;
            }
        };
        if report.progress_percent > 100 {
            return self
                .send_text(addr, &rover_id, &mission_id, reply::INVALID)
                .await;
        }

        info!(
            rover = %rover_id,
            mission = %report.mission_id,
            status = ?report.status,
            percent = report.progress_percent,
            "progress report"
        );
        self.state.write().record_progress(rover_id.clone(), report);
        self.send_text(addr, &rover_id, &mission_id, reply::PROGRESS_RECEIVED)
            .await
    }

    /// Validate, serialize and deliver one mission, retrying the whole send
    /// (handshake included) a bounded number of times. The active task map
    /// is only touched once delivery is acknowledged.
    pub async fn send_mission(
        &self,
        addr: SocketAddr,
        rover_id: &RoverId,
        mission: Mission,
    ) -> Result<()> {
        validate::validate_mission(&mission)?;
        let body = serde_json::to_string(&mission)?;

        let mut last_err = Error::Timeout;
        for attempt in 1..=self.retry_limit {
            match self
                .sender
                .send_message(
                    addr,
                    OpType::Task,
                    rover_id.as_str(),
                    mission.mission_id.as_str(),
                    &body,
                )
                .await
            {
                Ok(()) => {
                    info!(mission = %mission.mission_id, rover = %rover_id, "mission dispatched");
                    self.state.write().activate(mission);
                    return Ok(());
                }
                Err(e) => {
                    debug!(
                        mission = %mission.mission_id,
                        attempt,
                        limit = self.retry_limit,
                        error = %e,
                        "mission dispatch attempt failed"
                    );
                    last_err = e;
                    tokio::time::sleep(self.retry_pause).await;
                }
            }
        }
        Err(last_err)
    }

    /// Load the library for a newly seen rover: dispatch the first staged
    /// mission immediately, queue the rest.
    async fn stage_library_missions(&self, rover_id: &RoverId, addr: SocketAddr) {
        let missions = self.fresh_library_missions(rover_id);
        let mut dispatched = false;
        for mission in missions {
            if !dispatched {
                match self.send_mission(addr, rover_id, mission.clone()).await {
                    Ok(()) => {
                        dispatched = true;
                        continue;
                    }
                    Err(e) => {
                        warn!(mission = %mission.mission_id, error = %e, "staged dispatch failed, queueing");
                    }
                }
            }
            self.state.write().enqueue_pending(mission);
        }
    }

    /// Queue any library missions for this rover that the controller does
    /// not already track.
    fn refill_pending(&self, rover_id: &RoverId) {
        for mission in self.fresh_library_missions(rover_id) {
            self.state.write().enqueue_pending(mission);
        }
    }

    fn fresh_library_missions(&self, rover_id: &RoverId) -> Vec<Mission> {
        let state = self.state.read();
        self.library
            .load_for(rover_id)
            .into_iter()
            .filter(|m| !state.knows_mission(&m.mission_id) && !state.is_completed(&m.mission_id))
            .collect()
    }

    /// Replies and dispatches go to the rover's MissionLink port at the
    /// address observed during the session handshake.
    fn dispatch_addr(&self, delivery: &Delivery) -> SocketAddr {
        SocketAddr::new(delivery.peer.ip(), self.ml_port)
    }

    async fn send_text(
        &self,
        addr: SocketAddr,
        rover_id: &RoverId,
        mission_id: &MissionId,
        text: &str,
    ) -> Result<()> {
        self.sender
            .send_message(addr, OpType::None, rover_id.as_str(), mission_id.as_str(), text)
            .await
    }
}
