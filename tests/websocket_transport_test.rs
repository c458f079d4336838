// End-to-end tests over a real WebSocket
//
// A minimal STOMP broker runs on 127.0.0.1 with tokio-tungstenite. The server
// echoes a sub-protocol during the upgrade because the client offers
// `v12.stomp, v11.stomp, v10.stomp` and tungstenite refuses a response that
// selects none.

use futures::{SinkExt, StreamExt};
use prism_live::stomp::{decode_frames, Command, Frame};
use prism_live::{
    ConnectionConfig, ConnectionError, ConnectionManager, ConnectionState, RetryPolicy,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, Response as HttpResponse, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

type ServerSocket = WebSocketStream<TcpStream>;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    (listener, url)
}

fn client_config(url: String) -> ConnectionConfig {
    ConnectionConfig {
        heartbeat_outgoing_ms: 0,
        heartbeat_incoming_ms: 0,
        connect_timeout_ms: 3_000,
        disconnect_timeout_ms: 500,
        ..ConnectionConfig::for_endpoint(url)
    }
}

fn collect_errors(manager: &ConnectionManager) -> mpsc::UnboundedReceiver<ConnectionError> {
    let (tx, rx) = mpsc::unbounded_channel();
    manager.on_error(move |e| {
        let _ = tx.send(e.clone());
    });
    rx
}

/// Accept one upgrade, returning the socket and the offered sub-protocols.
async fn accept_stomp(listener: &TcpListener) -> (ServerSocket, Option<String>) {
    let (stream, _) = listener.accept().await.unwrap();
    let offered = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&offered);

    let ws = accept_hdr_async(
        stream,
        move |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
            let protocols = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            *seen.lock().unwrap() = protocols;
            resp.headers_mut()
                .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("v12.stomp"));
            Ok(resp)
        },
    )
    .await
    .unwrap();

    let offered = offered.lock().unwrap().clone();
    (ws, offered)
}

async fn read_frame(ws: &mut ServerSocket) -> Frame {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Some(frame) = decode_frames(&text).unwrap().into_iter().next() {
                    return frame;
                }
            }
            Some(Ok(_)) => continue,
            other => panic!("client went away: {:?}", other),
        }
    }
}

async fn write_frame(ws: &mut ServerSocket, frame: Frame) {
    ws.send(Message::Text(frame.encode())).await.unwrap();
}

#[tokio::test]
async fn test_subscribe_and_receive_over_websocket() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, offered) = accept_stomp(&listener).await;

        let connect = read_frame(&mut ws).await;
        assert_eq!(connect.command, Command::Connect);
        assert_eq!(connect.header("accept-version"), Some("1.2,1.1,1.0"));
        write_frame(
            &mut ws,
            Frame::new(Command::Connected)
                .with_header("version", "1.2")
                .with_header("heart-beat", "0,0"),
        )
        .await;

        let subscribe = read_frame(&mut ws).await;
        assert_eq!(subscribe.command, Command::Subscribe);
        let id = subscribe.header("id").unwrap().to_string();
        let destination = subscribe.header("destination").unwrap().to_string();
        write_frame(
            &mut ws,
            Frame::new(Command::Message)
                .with_header("destination", destination)
                .with_header("subscription", id)
                .with_header("message-id", "1")
                .with_header("content-type", "application/json")
                .with_body(r#"{"id":"t1","status":"done"}"#),
        )
        .await;

        let disconnect = read_frame(&mut ws).await;
        assert_eq!(disconnect.command, Command::Disconnect);
        let receipt = disconnect.header("receipt").unwrap().to_string();
        write_frame(
            &mut ws,
            Frame::new(Command::Receipt).with_header("receipt-id", receipt),
        )
        .await;

        offered
    });

    let manager = ConnectionManager::new(client_config(url), RetryPolicy::disabled());
    let mut errors = collect_errors(&manager);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = manager
        .subscribe("/topic/tasks", move |payload| {
            let _ = tx.send(payload.clone());
        })
        .unwrap();

    manager.connect();

    let payload = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(payload, json!({"id": "t1", "status": "done"}));

    manager.disconnect();
    assert!(!handle.is_active());
    timeout(WAIT, manager.wait_for_state(ConnectionState::Idle))
        .await
        .unwrap();

    let offered = timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(offered.as_deref(), Some("v12.stomp, v11.stomp, v10.stomp"));
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn test_unreachable_endpoint_reported() {
    let (listener, url) = bind().await;
    drop(listener);

    let manager = ConnectionManager::new(client_config(url), RetryPolicy::disabled());
    let mut errors = collect_errors(&manager);
    manager.connect();

    let error = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(matches!(error, ConnectionError::Unreachable(_)), "got {:?}", error);
    timeout(WAIT, manager.wait_for_state(ConnectionState::Idle))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rejected_upgrade_reported() {
    let (listener, url) = bind().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ = accept_hdr_async(
            stream,
            |_req: &Request, _resp: Response| -> Result<Response, ErrorResponse> {
                let mut rejection = HttpResponse::new(Some("stomp disabled".to_string()));
                *rejection.status_mut() = StatusCode::FORBIDDEN;
                Err(rejection)
            },
        )
        .await;
    });

    let manager = ConnectionManager::new(client_config(url), RetryPolicy::disabled());
    let mut errors = collect_errors(&manager);
    manager.connect();

    match timeout(WAIT, errors.recv()).await.unwrap().unwrap() {
        ConnectionError::HandshakeRejected(reason) => {
            assert!(reason.contains("403"), "reason: {}", reason)
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(manager.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_server_close_is_connection_lost() {
    let (listener, url) = bind().await;

    tokio::spawn(async move {
        let (mut ws, _) = accept_stomp(&listener).await;
        read_frame(&mut ws).await;
        write_frame(&mut ws, Frame::new(Command::Connected).with_header("version", "1.2")).await;
        let _ = ws.close(None).await;
    });

    let manager = ConnectionManager::new(client_config(url), RetryPolicy::disabled());
    let mut errors = collect_errors(&manager);
    manager.connect();

    let error = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(matches!(error, ConnectionError::ConnectionLost(_)), "got {:?}", error);
}
