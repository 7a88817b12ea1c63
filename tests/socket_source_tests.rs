#![cfg(feature = "socket")]

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::routing::get;
use axum::Router;
use std::time::Duration;
use term_tracker::session::{CommandStatus, OutputKind};
use term_tracker::transport::{SocketEventSource, TransportEvent};
use term_tracker::Config;
use tokio::sync::mpsc;

/// Minimal Socket.IO v4 server: open, wait for the namespace connect, answer it,
/// ping once, then push two events and keep the socket open.
async fn socketio_session(mut socket: WebSocket) {
    let open = r#"0{"sid":"test","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;
    if socket.send(Message::Text(open.to_string())).await.is_err() {
        return;
    }
    match socket.recv().await {
        Some(Ok(Message::Text(text))) if text == "40" => {}
        _ => return,
    }
    let _ = socket.send(Message::Text(r#"40{"sid":"ns"}"#.to_string())).await;
    let _ = socket.send(Message::Text("2".to_string())).await;
    match socket.recv().await {
        Some(Ok(Message::Text(text))) if text == "3" => {}
        _ => return,
    }
    let frames = [
        r#"42["command_output",{"command_id":"c1","output":"--- Process Started ---","type":"system"}]"#,
        r#"42["command_status",{"command_id":"c1","status":"running","is_server":true}]"#,
    ];
    for frame in frames {
        if socket.send(Message::Text(frame.to_string())).await.is_err() {
            return;
        }
    }
    while let Some(Ok(_)) = socket.recv().await {}
}

async fn spawn_server() -> String {
    let app = Router::new().route(
        "/socket.io/",
        get(|ws: WebSocketUpgrade| async move { ws.on_upgrade(socketio_session) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn next_event(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event should arrive")
        .expect("channel open")
}

#[tokio::test]
async fn performs_handshake_and_forwards_events_in_order() {
    let backend_url = spawn_server().await;
    let config = Config::from_lookup(move |key| match key {
        "BACKEND_URL" => Some(backend_url.clone()),
        _ => None,
    })
    .unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let handle = SocketEventSource::new(&config).spawn(tx);

    assert_eq!(next_event(&mut rx).await, TransportEvent::Connected);
    match next_event(&mut rx).await {
        TransportEvent::Output(event) => {
            assert_eq!(event.command_id, "c1");
            assert_eq!(event.kind, OutputKind::System);
        }
        other => panic!("expected output event, got {:?}", other),
    }
    match next_event(&mut rx).await {
        TransportEvent::Status(event) => {
            assert_eq!(event.status, CommandStatus::Running);
            assert_eq!(event.is_server, Some(true));
        }
        other => panic!("expected status event, got {:?}", other),
    }

    drop(rx);
    handle.abort();
}

#[tokio::test]
async fn reports_connection_errors() {
    let config = Config::from_lookup(|key| match key {
        "EVENTS_URL" => Some("ws://127.0.0.1:9/socket.io/".to_string()),
        "RECONNECT_MAX_BACKOFF_SECS" => Some("1".to_string()),
        _ => None,
    })
    .unwrap();
    let (tx, mut rx) = mpsc::channel(16);
    let handle = SocketEventSource::new(&config).spawn(tx);

    assert!(matches!(next_event(&mut rx).await, TransportEvent::ConnectError(_)));
    handle.abort();
}
