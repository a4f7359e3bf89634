use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use taptop_core::TaptopConfig;
use taptop_observability::MetricsCollector;
use taptop_stream::{StreamState, TapStatus, spawn_tap};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

// =============================================================================
// Helpers
// =============================================================================

const EVENTS: [&str; 3] = [
    r#"{"proxyDirection": "OUTBOUND", "source": "10.0.0.1:4000", "destination": "10.0.0.2:8080",
        "http": {"requestInit": {"id": {"base": 7}, "method": {"registered": "GET"}, "path": "/books"}}}"#,
    r#"{"proxyDirection": "OUTBOUND", "source": "10.0.0.1:4000", "destination": "10.0.0.2:8080",
        "http": {"responseInit": {"id": {"base": 7}, "sinceRequestInit": "0.002s", "httpStatus": 200}}}"#,
    r#"{"proxyDirection": "OUTBOUND", "source": "10.0.0.1:4000", "destination": "10.0.0.2:8080",
        "http": {"responseEnd": {"id": {"base": 7}, "sinceRequestInit": "0.015s", "sinceResponseInit": "0.013s"}}}"#,
];

fn config_for(url: String) -> TaptopConfig {
    let mut config = TaptopConfig::default();
    config.tap.url = url;
    config.tap.connect_timeout_ms = 2000;
    config
}

async fn wait_for(
    status: &mut watch::Receiver<TapStatus>,
    predicate: impl Fn(&TapStatus) -> bool,
) -> TapStatus {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let current = status.borrow_and_update();
                if predicate(&current) {
                    return current.clone();
                }
            }
            status.changed().await.unwrap();
        }
    })
    .await;
    result.expect("status did not reach the expected state")
}

/// Accepts one connection, checks the subscription, sends the events and
/// then closes with `close` once `release` fires.
async fn tap_server(close: Option<CloseFrame<'static>>) -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (release_tx, release_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();

        let subscription = ws.next().await.unwrap().unwrap();
        let text = subscription.into_text().unwrap();
        assert!(text.contains(r#""id":"top-web""#));
        assert!(text.contains(r#""resource":"deployment/web""#));

        for event in EVENTS {
            ws.send(Message::Text(event.to_string())).await.unwrap();
        }
        let _ = release_rx.await;
        let _ = ws.close(close).await;
        while let Some(Ok(_)) = ws.next().await {}
    });

    (url, release_tx)
}

/// Accepts TCP connections but never answers the websocket handshake.
async fn silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((tcp, _)) = listener.accept().await {
            held.push(tcp);
        }
    });
    url
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_events_are_published_as_top_rows() {
    let (url, release) = tap_server(None).await;
    let (handle, task) = spawn_tap(&config_for(url), Arc::new(MetricsCollector::disabled()));
    let mut status = handle.subscribe();

    handle.start().await.unwrap();
    let published = wait_for(&mut status, |s| s.snapshot.is_some()).await;
    assert_eq!(published.state, StreamState::Open);
    let snapshot = published.snapshot.unwrap();
    assert_eq!(snapshot.rows.len(), 1);
    assert_eq!(snapshot.rows[0].path, "/books");
    assert_eq!(snapshot.rows[0].count, 1);
    assert_eq!(published.stats.completed, 1);

    handle.stop().await.unwrap();
    let stopped = wait_for(&mut status, |s| s.state == StreamState::Closed).await;
    assert!(stopped.error.is_none());

    let _ = release.send(());
    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_unclean_close_surfaces_error() {
    let frame = CloseFrame {
        code: CloseCode::Error,
        reason: "tap backend failed".into(),
    };
    let (url, release) = tap_server(Some(frame)).await;
    let (handle, task) = spawn_tap(&config_for(url), Arc::new(MetricsCollector::disabled()));
    let mut status = handle.subscribe();

    handle.start().await.unwrap();
    wait_for(&mut status, |s| s.state == StreamState::Open).await;
    let _ = release.send(());

    let closed = wait_for(&mut status, |s| s.state == StreamState::Closed).await;
    let error = closed.error.unwrap();
    assert_eq!(error.kind, "unclean_close");
    assert_eq!(
        error.message,
        "Websocket close error [1011: Internal Error] : tap backend failed"
    );

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_refused_connection_reports_websocket_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let (handle, task) = spawn_tap(&config_for(url), Arc::new(MetricsCollector::disabled()));
    let mut status = handle.subscribe();
    handle.start().await.unwrap();

    let closed = wait_for(&mut status, |s| s.state == StreamState::Closed).await;
    let error = closed.error.unwrap();
    assert_eq!(error.kind, "connection");
    assert!(error.message.starts_with("Websocket error: "));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_close_without_status_is_not_an_error() {
    let (url, release) = tap_server(None).await;
    let (handle, task) = spawn_tap(&config_for(url), Arc::new(MetricsCollector::disabled()));
    let mut status = handle.subscribe();

    handle.start().await.unwrap();
    wait_for(&mut status, |s| s.state == StreamState::Open).await;
    let _ = release.send(());

    let closed = wait_for(&mut status, |s| s.state == StreamState::Closed).await;
    assert!(closed.error.is_none());

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_stop_abandons_pending_handshake() {
    let mut config = config_for(silent_server().await);
    config.tap.connect_timeout_ms = 10_000;
    let (handle, task) = spawn_tap(&config, Arc::new(MetricsCollector::disabled()));
    let mut status = handle.subscribe();

    handle.start().await.unwrap();
    wait_for(&mut status, |s| s.state == StreamState::Connecting).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stopped_at = Instant::now();
    handle.stop().await.unwrap();
    let stopped = wait_for(&mut status, |s| s.state == StreamState::Closed).await;
    assert!(stopped_at.elapsed() < Duration::from_secs(2));
    assert!(stopped.error.is_none());

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_does_not_wait_for_handshake() {
    let mut config = config_for(silent_server().await);
    config.tap.connect_timeout_ms = 10_000;
    let (handle, task) = spawn_tap(&config, Arc::new(MetricsCollector::disabled()));
    let mut status = handle.subscribe();

    handle.start().await.unwrap();
    wait_for(&mut status, |s| s.state == StreamState::Connecting).await;

    handle.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("driver kept waiting on the handshake")
        .unwrap();
    let last = status.borrow().clone();
    assert_eq!(last.state, StreamState::Closed);
    assert!(last.error.is_none());
}
