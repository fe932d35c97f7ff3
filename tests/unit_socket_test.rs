use gatherd::GatherError;
use gatherd::core::net::{ConnState, ConnectOpts, TcpClient};
use gatherd::core::resolver::Resolver;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::broadcast;

fn opts() -> ConnectOpts {
    ConnectOpts {
        timeout: Duration::from_secs(5),
        failover: true,
        shuffle: false,
        tls: None,
    }
}

#[tokio::test]
async fn test_literal_address_skips_resolving() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (resolver, handle) = Resolver::new(Duration::from_secs(60), false);
    drop(resolver); // a resolver query would fail; the literal must not need one

    let mut client = TcpClient::new("127.0.0.1", port);
    let _stream = client.connect(&handle, &opts()).await.unwrap();
    assert_eq!(client.state(), ConnState::Connected);
    assert_eq!(client.attempts(), 1);
}

#[tokio::test]
async fn test_failover_reaches_the_third_address() {
    // 127.0.0.2/127.0.0.3 refuse (nothing listens there on this port);
    // 127.0.0.1 accepts. The cache stands in for DNS.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (resolver, handle) = Resolver::new(Duration::from_secs(60), false);
    drop(resolver);
    handle.cache().insert(
        "multi.test",
        vec![
            "127.0.0.2".parse::<IpAddr>().unwrap(),
            "127.0.0.3".parse::<IpAddr>().unwrap(),
            "127.0.0.1".parse::<IpAddr>().unwrap(),
        ],
    );

    let mut client = TcpClient::new("multi.test", port);
    let _stream = client.connect(&handle, &opts()).await.unwrap();
    assert_eq!(client.state(), ConnState::Connected);
    assert_eq!(client.attempts(), 3);
}

#[tokio::test]
async fn test_no_failover_stops_after_first_refusal() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (resolver, handle) = Resolver::new(Duration::from_secs(60), false);
    drop(resolver);
    handle.cache().insert(
        "multi.test",
        vec![
            "127.0.0.2".parse::<IpAddr>().unwrap(),
            "127.0.0.1".parse::<IpAddr>().unwrap(),
        ],
    );

    let mut client = TcpClient::new("multi.test", port);
    let mut opts = opts();
    opts.failover = false;
    let err = client.connect(&handle, &opts).await.unwrap_err();
    assert!(matches!(err, GatherError::ConnectFailed(..)));
    assert_eq!(client.state(), ConnState::Error);
}

#[tokio::test]
async fn test_cached_negative_entry_fails_fast() {
    let (resolver, handle) = Resolver::new(Duration::from_secs(60), false);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(resolver.run(shutdown_rx));

    handle.cache().insert("dead.test", Vec::new());
    let err = handle
        .resolve("dead.test", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, GatherError::DnsFailed(_)));
    shutdown_tx.send(()).unwrap();
}

#[tokio::test]
async fn test_host_cache_entries_expire() {
    let (resolver, handle) = Resolver::new(Duration::from_millis(50), false);
    drop(resolver);
    handle
        .cache()
        .insert("x.test", vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
    assert!(handle.cache().get("x.test").is_some());
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(handle.cache().get("x.test").is_none());
}
