use gatherd::config::Fragment;
use gatherd::core::record::{Content, ParsedRecord};
use gatherd::core::resolver::Resolver;
use gatherd::core::stats::StatsRegistry;
use gatherd::core::storage::{StoreOutcome, build_storage, marshal_lines};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::{broadcast, mpsc};

fn record(id: u64, host: &str, pairs: &[(&str, f64)], ts: u64) -> ParsedRecord {
    let mut content = Content::new();
    for (k, v) in pairs {
        content.insert((*k).to_string(), *v);
    }
    ParsedRecord {
        id,
        driver: "static".to_string(),
        url: "static://".to_string(),
        host: host.to_string(),
        port: 0,
        storages: vec!["g".to_string()],
        start_micros: ts * 1_000_000,
        finished_unix: ts,
        content,
    }
}

#[test]
fn test_marshal_line_format() {
    let rec = record(
        1,
        "host.example.org",
        &[("cpu.user", 1.5), ("cpu.sys", 0.5)],
        1_700_000_000,
    );
    let lines = marshal_lines(&rec);
    let text = String::from_utf8(lines).unwrap();
    let mut lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), rec.content.len());
    lines.sort();
    assert_eq!(
        lines,
        vec![
            "host_example_org.cpu.sys 0.5 1700000000",
            "host_example_org.cpu.user 1.5 1700000000",
        ]
    );
}

#[test]
fn test_marshal_is_deterministic_for_fixed_ordering() {
    let rec = record(1, "h", &[("a", 1.0), ("b", 2.0)], 100);
    assert_eq!(marshal_lines(&rec), marshal_lines(&rec));
}

/// Builds a graphite sink pointed at `port` on localhost, plus its plumbing.
fn build_sink(
    port: u16,
) -> (
    gatherd::core::storage::StorageHandle,
    gatherd::core::storage::StorageTask,
    mpsc::Receiver<gatherd::core::storage::StorageResult>,
    broadcast::Sender<()>,
    tokio::sync::broadcast::Receiver<()>,
) {
    let (resolver, handle) = Resolver::new(Duration::from_secs(60), false);
    drop(resolver); // literal addresses never reach the resolver queue
    let (results_tx, results_rx) = mpsc::channel(64);
    let stats = StatsRegistry::new();
    let mut frag = Fragment::from_text(
        "g",
        &format!("driver = graphite\nhost = 127.0.0.1\nport = {port}\n"),
    )
    .unwrap();
    let (store_handle, task) = build_storage(&mut frag, handle, results_tx, &stats).unwrap();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    (store_handle, task, results_rx, shutdown_tx, shutdown_rx)
}

#[tokio::test]
async fn test_successful_stores_ack_in_fifo_order() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // A peer that accepts once and reads everything it is sent.
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut sink = Vec::new();
        let _ = socket.read_to_end(&mut sink).await;
        sink
    });

    let (handle, task, mut results_rx, shutdown_tx, shutdown_rx) = build_sink(port);
    let sink = tokio::spawn(task.run(shutdown_rx));

    for i in 1..=3u64 {
        handle
            .try_store(record(i, "h", &[("v", i as f64)], 100 + i))
            .unwrap();
    }
    // Cancelling a store id that is not queued is a harmless no-op.
    handle.cancel(9999);

    // STORE_OK ids must come back as a prefix of the enqueued order.
    let mut seen = Vec::new();
    for _ in 0..3 {
        let res = results_rx.recv().await.unwrap();
        assert_eq!(res.outcome, StoreOutcome::Ok);
        seen.push(res.store_id);
    }
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted);

    shutdown_tx.send(()).unwrap();
    sink.await.unwrap();
    let received = server.await.unwrap();
    let text = String::from_utf8(received).unwrap();
    assert_eq!(text.lines().count(), 3);
    assert!(text.contains("h.v 1 101\n") || text.contains("h.v 1.0 101\n"));
}

#[tokio::test]
async fn test_vanished_peer_fails_pending_records_within_grace() {
    // Bind then drop, so the port is known-closed.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (handle, task, mut results_rx, shutdown_tx, shutdown_rx) = build_sink(port);
    let sink = tokio::spawn(task.run(shutdown_rx));

    handle.try_store(record(1, "h", &[("v", 1.0)], 100)).unwrap();
    handle.try_store(record(2, "h", &[("v", 2.0)], 101)).unwrap();

    // Both must fail: the in-flight element on the connect error, the
    // queued one when the queue is dropped.
    for _ in 0..2 {
        let res = tokio::time::timeout(Duration::from_secs(15), results_rx.recv())
            .await
            .expect("result within grace")
            .unwrap();
        assert!(matches!(res.outcome, StoreOutcome::Err(_)));
    }

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(15), sink)
        .await
        .expect("sink exits within grace")
        .unwrap();
}
