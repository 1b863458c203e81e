#![cfg(feature = "server")]

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use bytes::Bytes;
use echoradio::{Broadcaster, NowPlaying, RadioStreamingExt, Track};
use echoserver::ServerBuilder;
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

async fn wait_for_listeners(broadcaster: &Broadcaster, count: usize) {
    for _ in 0..100 {
        if broadcaster.listener_count().await == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} listener(s), found {}",
        count,
        broadcaster.listener_count().await
    );
}

#[tokio::test]
async fn test_echo_streams_broadcast_chunks() {
    let broadcaster = Arc::new(Broadcaster::default());
    let (_tx, rx) = watch::channel(None);

    let mut server = ServerBuilder::new("Test", "127.0.0.1", 0).build();
    server
        .init_radio_streaming(broadcaster.clone(), rx)
        .await
        .unwrap();

    let response = server
        .router()
        .await
        .oneshot(Request::get("/echo").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(response.headers()[header::CONNECTION], "keep-alive");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    assert_eq!(broadcaster.listener_count().await, 1);

    broadcaster.broadcast(Bytes::from_static(b"b1")).await;
    broadcaster.broadcast(Bytes::from_static(b"b2")).await;

    let mut body = response.into_body();
    let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
    let second = body.frame().await.unwrap().unwrap().into_data().unwrap();
    assert_eq!(first, Bytes::from_static(b"b1"));
    assert_eq!(second, Bytes::from_static(b"b2"));

    // le client se déconnecte
    drop(body);
    wait_for_listeners(&broadcaster, 0).await;
}

#[tokio::test]
async fn test_now_playing_reports_track_and_listeners() {
    let broadcaster = Arc::new(Broadcaster::default());
    let track = Track::album("/music/Album/01 - Opening.mp3");
    let (_tx, rx) = watch::channel(Some(NowPlaying::new(&track, false)));

    let mut server = ServerBuilder::new("Test", "127.0.0.1", 0).build();
    server
        .init_radio_streaming(broadcaster.clone(), rx)
        .await
        .unwrap();
    let router = server.router().await;

    let _listener = broadcaster.subscribe().await;

    let response = router
        .oneshot(
            Request::get("/echo/now-playing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["listeners"], 1);
    assert_eq!(json["track"]["title"], "01 - Opening");
    assert_eq!(json["track"]["album_track"], true);
    assert_eq!(json["track"]["interlude"], false);
}

#[tokio::test]
async fn test_now_playing_when_idle() {
    let broadcaster = Arc::new(Broadcaster::default());
    let (_tx, rx) = watch::channel(None);
    let router = echoradio::radio_router(echoradio::RadioStreamingState {
        broadcaster,
        now_playing: rx,
        shutdown: CancellationToken::new(),
    });

    let response = router
        .oneshot(
            Request::get("/echo/now-playing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["track"].is_null());
    assert_eq!(json["listeners"], 0);
}

/// Reads from `client` until `needle` shows up in what was received
async fn read_until(client: &mut TcpStream, needle: &[u8]) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    while !received.windows(needle.len()).any(|w| w == needle) {
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "connection closed early");
        received.extend_from_slice(&buf[..n]);
    }
    received
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_shutdown_ends_open_streams() {
    let broadcaster = Arc::new(Broadcaster::default());
    let (_tx, rx) = watch::channel(None);

    let mut server = ServerBuilder::new("Test", "127.0.0.1", 0).build();
    server
        .init_radio_streaming(broadcaster.clone(), rx)
        .await
        .unwrap();
    server.start().await.unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", server.info().http_port))
        .await
        .unwrap();
    client
        .write_all(b"GET /echo HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    wait_for_listeners(&broadcaster, 1).await;

    broadcaster.broadcast(Bytes::from_static(b"b1")).await;
    let received = read_until(&mut client, b"b1").await;
    assert!(received.starts_with(b"HTTP/1.1 200"));

    // le client reste connecté ; l'arrêt ne doit pas l'attendre
    server.shutdown();
    let finished = tokio::time::timeout(Duration::from_secs(3), server.wait())
        .await
        .is_ok();
    assert!(finished, "server still waiting for the /echo body");
}
