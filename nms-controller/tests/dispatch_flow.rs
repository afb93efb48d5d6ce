//! Controller control-plane flow against a scripted rover on loopback.

#![allow(clippy::unwrap_used)]

use nms_controller::{reply, Controller, MissionLibrary};
use nms_core::{MissionId, NmsConfig, RoverId};
use nms_missionlink::{Delivery, MlConfig, MlEndpoint, MlSender, OpType, Payload};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    controller: Arc<Controller>,
    controller_addr: std::net::SocketAddr,
    rover_endpoint: Arc<MlEndpoint>,
    sender: MlSender,
    _dirs: Vec<tempfile::TempDir>,
}

fn fast(cfg: &mut NmsConfig) {
    cfg.handshake_timeout_ms = 200;
    cfg.data_timeout_ms = 200;
    cfg.retry_limit = 3;
    cfg.accept_budget_ms = 3_000;
}

/// Bind a rover-side responder first so the controller's replies (which go
/// to the well-known MissionLink port) land on it.
async fn harness(library: MissionLibrary) -> Harness {
    let rover_store = tempfile::tempdir().unwrap();
    let controller_store = tempfile::tempdir().unwrap();

    let mut cfg = NmsConfig::default();
    fast(&mut cfg);
    let ml_cfg = {
        let mut c = cfg.clone();
        fast(&mut c);
        MlConfig::from_nms(&c)
    };

    let rover_endpoint = Arc::new(
        MlEndpoint::bind("127.0.0.1:0".parse().unwrap(), rover_store.path(), ml_cfg.clone())
            .await
            .unwrap(),
    );
    cfg.missionlink_port = rover_endpoint.local_addr().unwrap().port();

    let controller = Arc::new(
        Controller::bind(
            "127.0.0.1:0".parse().unwrap(),
            controller_store.path(),
            &cfg,
            library,
        )
        .await
        .unwrap(),
    );
    let controller_addr = controller.local_addr().unwrap();
    {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await });
    }

    Harness {
        controller,
        controller_addr,
        rover_endpoint,
        sender: MlSender::new(ml_cfg),
        _dirs: vec![rover_store, controller_store],
    }
}

async fn next_delivery(h: &Harness) -> Delivery {
    let ep = h.rover_endpoint.clone();
    tokio::time::timeout(Duration::from_secs(10), async move {
        loop {
            match ep.recv().await {
                Ok(d) => return d,
                Err(_) => continue,
            }
        }
    })
    .await
    .unwrap()
}

fn message(d: &Delivery) -> String {
    match &d.payload {
        Payload::Message(m) => m.clone(),
        other => panic!("expected message payload, got {other:?}"),
    }
}

fn library_with(missions: &[(&str, &str)]) -> (MissionLibrary, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    for (mission_id, rover_id) in missions {
        let body = format!(
            r#"{{"mission_id":"{mission_id}","rover_id":"{rover_id}","geographic_area":{{"x1":0,"y1":0,"x2":10,"y2":10}},"task":"capture_images","duration_minutes":30}}"#
        );
        std::fs::write(dir.path().join(format!("mission_{mission_id}.json")), body).unwrap();
    }
    (MissionLibrary::at(dir.path()), dir)
}

#[tokio::test]
async fn registration_confirms_then_dispatches_staged_missions() {
    let (library, _lib_dir) = library_with(&[("M01", "r1"), ("M02", "r1")]);
    let h = harness(library).await;

    h.sender
        .send_message(h.controller_addr, OpType::Register, "r1", "000", "\0")
        .await
        .unwrap();

    let first = next_delivery(&h).await;
    assert_eq!(first.op, OpType::None);
    assert_eq!(message(&first), reply::REGISTERED);

    // The first staged mission is dispatched immediately.
    let dispatch = next_delivery(&h).await;
    assert_eq!(dispatch.op, OpType::Task);
    assert_eq!(dispatch.mission_id, "M01");
    assert!(message(&dispatch).contains("\"mission_id\":\"M01\""));

    let state = h.controller.state();
    let st = state.read();
    let r1 = RoverId::new("r1").unwrap();
    assert!(st.agent(&r1).is_some());
    assert!(st.active_mission(&MissionId::new("M01").unwrap()).is_some());
    // The second stays queued for a later request.
    assert_eq!(st.pending().count(), 1);
}

#[tokio::test]
async fn duplicate_registration_is_acknowledged_and_inert() {
    let (library, _lib_dir) = library_with(&[]);
    let h = harness(library).await;

    h.sender
        .send_message(h.controller_addr, OpType::Register, "r1", "000", "\0")
        .await
        .unwrap();
    assert_eq!(message(&next_delivery(&h).await), reply::REGISTERED);

    let state = h.controller.state();
    let r1 = RoverId::new("r1").unwrap();
    let first_addr = state.read().agent(&r1).unwrap().addr;

    h.sender
        .send_message(h.controller_addr, OpType::Register, "r1", "000", "\0")
        .await
        .unwrap();
    assert_eq!(message(&next_delivery(&h).await), reply::ALREADY_REGISTERED);
    assert_eq!(state.read().agent(&r1).unwrap().addr, first_addr);
}

#[tokio::test]
async fn request_with_nothing_staged_yields_no_mission() {
    let (library, _lib_dir) = library_with(&[("M09", "r9")]);
    let h = harness(library).await;

    h.sender
        .send_message(h.controller_addr, OpType::Request, "r1", "000", "request")
        .await
        .unwrap();

    let replyd = next_delivery(&h).await;
    assert_eq!(replyd.op, OpType::None);
    assert_eq!(message(&replyd), reply::NO_MISSION);
}

#[tokio::test]
async fn request_drains_the_queue_then_reloads_the_library() {
    let (library, lib_dir) = library_with(&[("M01", "r1")]);
    let h = harness(library).await;

    // Register: M01 is dispatched straight away.
    h.sender
        .send_message(h.controller_addr, OpType::Register, "r1", "000", "\0")
        .await
        .unwrap();
    assert_eq!(message(&next_delivery(&h).await), reply::REGISTERED);
    assert_eq!(next_delivery(&h).await.mission_id, "M01");

    // A new mission lands in the library afterwards; a request must find it.
    std::fs::write(
        lib_dir.path().join("mission_M07.json"),
        r#"{"mission_id":"M07","rover_id":"r1","geographic_area":{"x1":0,"y1":0,"x2":4,"y2":4},"task":"sample_collection","duration_minutes":5}"#,
    )
    .unwrap();

    h.sender
        .send_message(h.controller_addr, OpType::Request, "r1", "000", "request")
        .await
        .unwrap();
    let dispatch = next_delivery(&h).await;
    assert_eq!(dispatch.op, OpType::Task);
    assert_eq!(dispatch.mission_id, "M07");
}

#[tokio::test]
async fn progress_report_retires_completed_missions() {
    let (library, _lib_dir) = library_with(&[("M01", "r1")]);
    let h = harness(library).await;

    h.sender
        .send_message(h.controller_addr, OpType::Register, "r1", "000", "\0")
        .await
        .unwrap();
    assert_eq!(message(&next_delivery(&h).await), reply::REGISTERED);
    assert_eq!(next_delivery(&h).await.mission_id, "M01");

    let progress = r#"{"mission_id":"M01","status":"in_progress","progress_percent":40}"#;
    h.sender
        .send_message(h.controller_addr, OpType::Progress, "r1", "M01", progress)
        .await
        .unwrap();
    assert_eq!(message(&next_delivery(&h).await), reply::PROGRESS_RECEIVED);

    let state = h.controller.state();
    assert!(state
        .read()
        .active_mission(&MissionId::new("M01").unwrap())
        .is_some());

    let done = r#"{"mission_id":"M01","status":"completed","progress_percent":100}"#;
    h.sender
        .send_message(h.controller_addr, OpType::Progress, "r1", "M01", done)
        .await
        .unwrap();
    assert_eq!(message(&next_delivery(&h).await), reply::PROGRESS_RECEIVED);

    let st = state.read();
    assert!(st.active_mission(&MissionId::new("M01").unwrap()).is_none());
    assert_eq!(st.completed().count(), 1);
    assert_eq!(st.pending().count(), 0);
}

#[tokio::test]
async fn unparseable_progress_is_answered_with_parse_error() {
    let (library, _lib_dir) = library_with(&[]);
    let h = harness(library).await;

    h.sender
        .send_message(h.controller_addr, OpType::Progress, "r1", "M01", "не JSON")
        .await
        .unwrap();
    assert_eq!(message(&next_delivery(&h).await), reply::PARSE_ERROR);
}
