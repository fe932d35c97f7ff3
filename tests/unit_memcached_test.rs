use gatherd::config::Fragment;
use gatherd::core::resolver::Resolver;
use gatherd::core::source::{FetchContext, MemcachedSource, SourceDriver};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

fn ctx() -> FetchContext {
    let (resolver, handle) = Resolver::new(Duration::from_secs(60), false);
    drop(resolver);
    FetchContext {
        resolver: handle,
        timeout: Duration::from_secs(5),
    }
}

fn source(port: u16) -> MemcachedSource {
    let mut frag = Fragment::from_text(
        "m",
        &format!("driver = memcached\nhost = 127.0.0.1\nport = {port}\n"),
    )
    .unwrap();
    let source = MemcachedSource::from_fragment(&mut frag).unwrap();
    frag.finish().unwrap();
    source
}

/// Accepts one connection, expects the `stats` command, answers `lines`.
async fn fake_memcached(listener: TcpListener, lines: &'static str) {
    let (socket, _) = listener.accept().await.unwrap();
    let mut reader = BufReader::new(socket);
    let mut command = String::new();
    reader.read_line(&mut command).await.unwrap();
    assert_eq!(command, "stats\r\n");
    let socket = reader.get_mut();
    socket.write_all(lines.as_bytes()).await.unwrap();
    socket.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stats_dialog_accumulates_until_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(fake_memcached(
        listener,
        "STAT curr_connections 10\r\nSTAT cmd_get 42\r\nEND\r\n",
    ));

    let body = source(port).fetch(&ctx()).await.unwrap();
    assert_eq!(&body[..], b"curr_connections 10\ncmd_get 42\n");
    server.await.unwrap();
}

#[tokio::test]
async fn test_unexpected_line_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(fake_memcached(listener, "ERROR\r\n"));

    assert!(source(port).fetch(&ctx()).await.is_err());
    server.await.unwrap();
}

#[tokio::test]
async fn test_connection_close_before_end_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(fake_memcached(listener, "STAT curr_connections 10\r\n"));

    assert!(source(port).fetch(&ctx()).await.is_err());
    server.await.unwrap();
}
