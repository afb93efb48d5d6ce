//! Rover session layer.
//!
//! A dedicated task runs the MissionLink receive loop. Dispatched missions
//! are validated, confirmed with a reply whose body is the mission id, and
//! either started immediately or parked in a FIFO queue behind the one
//! mission allowed in execution. When an execution finishes the queue is
//! popped; an empty queue turns into a mission request to the Mother Ship.

use crate::executor::{MissionExecutor, ProgressSink};
use crate::state::SharedRover;
use crate::telemetry_task::TelemetryReporter;
use nms_core::{validate, Error, Mission, MissionId, ProgressReport, Result, RoverId};
use nms_missionlink::{Delivery, MlEndpoint, MlSender, OpType, Payload};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Reply bodies the rover sends for a rejected dispatch.
mod reply {
    pub const INVALID: &str = "invalid";
    pub const PARSE_ERROR: &str = "parse_error";
}

#[derive(Default)]
struct MissionSlots {
    current: Option<Mission>,
    queue: VecDeque<Mission>,
}

/// The rover's MissionLink side.
pub struct Agent {
    rover_id: RoverId,
    /// Mother Ship MissionLink address.
    controller: SocketAddr,
    endpoint: MlEndpoint,
    sender: MlSender,
    rover: SharedRover,
    executor: Arc<dyn MissionExecutor>,
    telemetry: Arc<TelemetryReporter>,
    slots: Mutex<MissionSlots>,
    retry_limit: u32,
    retry_pause: Duration,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rover_id: RoverId,
        controller: SocketAddr,
        endpoint: MlEndpoint,
        sender: MlSender,
        rover: SharedRover,
        executor: Arc<dyn MissionExecutor>,
        telemetry: Arc<TelemetryReporter>,
        retry_limit: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            rover_id,
            controller,
            endpoint,
            sender,
            rover,
            executor,
            telemetry,
            slots: Mutex::new(MissionSlots::default()),
            retry_limit,
            retry_pause: Duration::from_secs(2),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// The mission currently in execution, if any.
    pub fn current_mission(&self) -> Option<MissionId> {
        self.slots.lock().current.as_ref().map(|m| m.mission_id.clone())
    }

    pub fn queued_missions(&self) -> Vec<MissionId> {
        self.slots.lock().queue.iter().map(|m| m.mission_id.clone()).collect()
    }

    /// Register with the Mother Ship, retrying the whole exchange a bounded
    /// number of times. The textual confirmation arrives on the receive
    /// loop.
    pub async fn register(&self) -> Result<()> {
        let mut last_err = Error::Timeout;
        for attempt in 1..=self.retry_limit {
            match self
                .sender
                .send_message(
                    self.controller,
                    OpType::Register,
                    self.rover_id.as_str(),
                    MissionId::none().as_str(),
                    "\0",
                )
                .await
            {
                Ok(()) => {
                    info!(rover = %self.rover_id, controller = %self.controller, "registered");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, limit = self.retry_limit, error = %e, "registration attempt failed");
                    last_err = e;
                    tokio::time::sleep(self.retry_pause).await;
                }
            }
        }
        Err(last_err)
    }

    /// Ask the Mother Ship for a mission; the answer (a dispatch or a
    /// "no_mission" text) arrives on the receive loop.
    pub async fn request_mission(&self) -> Result<()> {
        self.sender
            .send_message(
                self.controller,
                OpType::Request,
                self.rover_id.as_str(),
                MissionId::none().as_str(),
                "request",
            )
            .await
    }

    /// MissionLink receive loop. Runs until the task is aborted.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(addr = %self.local_addr()?, "rover missionlink loop running");
        loop {
            let delivery = match self.endpoint.recv().await {
                Ok(d) => d,
                Err(Error::Timeout) => continue,
                Err(e) => {
                    warn!(error = %e, "inbound session failed");
                    continue;
                }
            };
            if let Err(e) = self.clone().handle(delivery).await {
                warn!(error = %e, "rover handler failed");
            }
        }
    }

    async fn handle(self: Arc<Self>, delivery: Delivery) -> Result<()> {
        match delivery.op {
            OpType::Task => self.handle_dispatch(delivery).await,
            OpType::None => {
                // Textual controller replies: Registered, no_mission,
                // progress_received, ...
                if let Payload::Message(text) = &delivery.payload {
                    debug!(reply = %text, "controller reply");
                }
                Ok(())
            }
            other => Err(Error::protocol(format!(
                "unexpected inbound operation {other} on a rover"
            ))),
        }
    }

    async fn handle_dispatch(self: Arc<Self>, delivery: Delivery) -> Result<()> {
        // Replies go back to the Mother Ship's well-known port at the
        // address the session came from.
        let reply_addr = SocketAddr::new(delivery.peer.ip(), self.controller.port());
        let mission_id = delivery.mission_id.clone();

        let Payload::Message(body) = &delivery.payload else {
            return self.send_text(reply_addr, &mission_id, reply::PARSE_ERROR).await;
        };

        // Sentinel replies keep the Mother Ship from retransmitting a
        // mission this rover will never accept.
        if serde_json::from_str::<serde_json::Value>(body).is_err() {
            warn!(mission = %mission_id, "dispatch body is not JSON");
            return self.send_text(reply_addr, &mission_id, reply::PARSE_ERROR).await;
        }
        let mission = match validate::parse_mission(body) {
            Ok(m) => m,
            Err(e) => {
                warn!(mission = %mission_id, error = %e, "invalid mission rejected");
                return self.send_text(reply_addr, &mission_id, reply::INVALID).await;
            }
        };

        // Confirm acceptance with the mission id as the body.
        self.send_text(reply_addr, &mission_id, mission.mission_id.as_str())
            .await?;

        // Telemetry must be flowing whenever a mission is on board.
        self.telemetry.ensure_running();

        let start_now = {
            let mut slots = self.slots.lock();
            if slots.current.is_none() {
                slots.current = Some(mission.clone());
                true
            } else {
                info!(mission = %mission.mission_id, "mission queued behind the current one");
                slots.queue.push_back(mission.clone());
                false
            }
        };
        if start_now {
            self.spawn_execution(mission);
        }
        Ok(())
    }

    /// Run one mission on its own task: forward its progress reports, then
    /// do the completion bookkeeping.
    fn spawn_execution(self: Arc<Self>, mission: Mission) {
        info!(mission = %mission.mission_id, task = %mission.task, "starting execution");
        let agent = self.clone();
        tokio::spawn(async move {
            let (tx, rx) = mpsc::channel::<ProgressReport>(16);
            let forwarder = tokio::spawn({
                let agent = agent.clone();
                async move { agent.forward_progress(rx).await }
            });

            let sink: ProgressSink = tx;
            if let Err(e) = agent.executor.execute(&mission, &agent.rover, &sink).await {
                warn!(mission = %mission.mission_id, error = %e, "execution failed");
            }
            drop(sink);
            let _ = forwarder.await;

            agent.on_execution_finished(&mission).await;
        });
    }

    async fn forward_progress(&self, mut rx: mpsc::Receiver<ProgressReport>) {
        while let Some(report) = rx.recv().await {
            let body = match serde_json::to_string(&report) {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "progress report not serializable");
                    continue;
                }
            };
            if let Err(e) = self
                .sender
                .send_message(
                    self.controller,
                    OpType::Progress,
                    self.rover_id.as_str(),
                    report.mission_id.as_str(),
                    &body,
                )
                .await
            {
                warn!(mission = %report.mission_id, error = %e, "progress report lost");
            }
        }
    }

    async fn on_execution_finished(self: &Arc<Self>, finished: &Mission) {
        info!(mission = %finished.mission_id, "mission complete");
        let next = {
            let mut slots = self.slots.lock();
            slots.current = None;
            if let Some(next) = slots.queue.pop_front() {
                slots.current = Some(next.clone());
                Some(next)
            } else {
                None
            }
        };
        match next {
            Some(next) => self.clone().spawn_execution(next),
            None => {
                // Nothing local: ask the Mother Ship for more work.
                if let Err(e) = self.request_mission().await {
                    warn!(error = %e, "mission request failed, staying idle");
                }
            }
        }
    }

    async fn send_text(&self, addr: SocketAddr, mission_id: &str, text: &str) -> Result<()> {
        self.sender
            .send_message(addr, OpType::None, self.rover_id.as_str(), mission_id, text)
            .await
    }
}
