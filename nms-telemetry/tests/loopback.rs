//! End-to-end TelemetryStream transfers over loopback TCP.

#![allow(clippy::unwrap_used)]

use nms_telemetry::{TelemetryStore, TsClient, TsServer};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

async fn spawn_server() -> (std::net::SocketAddr, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(TelemetryStore::open(dir.path(), 1024).await.unwrap());
    let server = TsServer::bind("127.0.0.1:0".parse().unwrap(), store)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move { server.run().await });
    (addr, dir)
}

async fn wait_for<F: Fn() -> bool>(pred: F) {
    for _ in 0..100 {
        if pred() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within budget");
}

#[tokio::test]
async fn snapshot_is_filed_under_its_rover() {
    let (addr, store_dir) = spawn_server().await;

    let src = tempfile::tempdir().unwrap();
    let path = src.path().join("telemetry_r1_1712345678_123456.json");
    let body = br#"{"rover_id":"r1","position":{"x":1.0,"y":2.0,"z":0.0},"operational_status":"on_mission"}"#;
    std::fs::write(&path, body).unwrap();

    TsClient::new(1024).send(addr, &path).await.unwrap();

    let stored = store_dir
        .path()
        .join("r1/telemetry_r1_1712345678_123456.json");
    wait_for(|| stored.exists()).await;
    assert_eq!(std::fs::read(&stored).unwrap(), body);
}

#[tokio::test]
async fn bytes_survive_verbatim_across_chunks() {
    let (addr, store_dir) = spawn_server().await;

    // Larger than one 1024-byte slice, not valid JSON: stays at the root.
    let payload: Vec<u8> = (0u32..5000).map(|i| (i % 251) as u8).collect();
    let src = tempfile::tempdir().unwrap();
    let path = src.path().join("bulk.json");
    std::fs::write(&path, &payload).unwrap();

    TsClient::new(1024).send(addr, &path).await.unwrap();

    let stored = store_dir.path().join("bulk.json");
    wait_for(|| stored.exists()).await;
    assert_eq!(std::fs::read(&stored).unwrap(), payload);
}

#[tokio::test]
async fn zero_length_filename_is_rejected() {
    let (addr, store_dir) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"0000{}").await.unwrap();
    stream.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(std::fs::read_dir(store_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn overlong_filename_is_rejected() {
    let (addr, store_dir) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"0256").await.unwrap();
    stream.write_all(&vec![b'a'; 256]).await.unwrap();
    stream.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(std::fs::read_dir(store_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn boundary_filename_lengths_succeed() {
    let (addr, store_dir) = spawn_server().await;
    let src = tempfile::tempdir().unwrap();

    // Length 1
    let short = src.path().join("a");
    std::fs::write(&short, b"one").unwrap();
    TsClient::new(1024).send(addr, &short).await.unwrap();

    // Length 255
    let long_name = format!("{}.json", "b".repeat(250));
    assert_eq!(long_name.len(), 255);
    let long = src.path().join(&long_name);
    std::fs::write(&long, b"two").unwrap();
    TsClient::new(1024).send(addr, &long).await.unwrap();

    let short_stored = store_dir.path().join("a");
    let long_stored = store_dir.path().join(&long_name);
    wait_for(|| short_stored.exists() && long_stored.exists()).await;
}

#[tokio::test]
async fn traversal_filename_never_escapes_store() {
    let (addr, store_dir) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let name = b"../escape.json";
    stream
        .write_all(format!("{:04}", name.len()).as_bytes())
        .await
        .unwrap();
    stream.write_all(name).await.unwrap();
    stream.write_all(b"{}").await.unwrap();
    stream.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!store_dir.path().parent().unwrap().join("escape.json").exists());
    assert_eq!(std::fs::read_dir(store_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn concurrent_snapshots_from_two_rovers() {
    let (addr, store_dir) = spawn_server().await;
    let src = tempfile::tempdir().unwrap();

    let mut tasks = Vec::new();
    for rover in ["r1", "r2"] {
        let path = src.path().join(format!("telemetry_{rover}_9_000009.json"));
        std::fs::write(
            &path,
            format!(r#"{{"rover_id":"{rover}","position":{{"x":0,"y":0,"z":0}},"operational_status":"idle"}}"#),
        )
        .unwrap();
        tasks.push(tokio::spawn(async move {
            TsClient::new(1024).send(addr, &path).await
        }));
    }
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    let r1 = store_dir.path().join("r1/telemetry_r1_9_000009.json");
    let r2 = store_dir.path().join("r2/telemetry_r2_9_000009.json");
    wait_for(|| r1.exists() && r2.exists()).await;
}
