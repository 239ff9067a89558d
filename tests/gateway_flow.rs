//! End-to-end exercises against an in-process mock gateway server: a
//! request/response round trip, and a reconnect-then-resubscribe sequence
//! driven entirely through [`GatewayClient`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use osaurus_gateway::{ConnectionState, GatewayClient};

async fn send_event(ws: &mut WebSocketStream<TcpStream>, event: &Value) {
    ws.send(Message::Text(event.to_string())).await.unwrap();
}

async fn recv_request(ws: &mut WebSocketStream<TcpStream>) -> Value {
    let Some(Ok(Message::Text(text))) = ws.next().await else {
        panic!("expected a request frame");
    };
    serde_json::from_str(&text).unwrap()
}

async fn bind_mock_server() -> (String, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (format!("ws://{addr}/gateway"), listener)
}

async fn accept_one(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

#[tokio::test]
async fn test_request_response_round_trip_via_facade() {
    let (url, listener) = bind_mock_server().await;

    let server = tokio::spawn(async move {
        let mut ws = accept_one(&listener).await;
        let Some(Ok(Message::Text(text))) = ws.next().await else {
            panic!("expected a request frame");
        };
        let req: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(req["method"], "sessions.list");
        let id = req["id"].as_str().unwrap().to_string();

        let response = json!({ "id": id, "result": { "sessions": [] } });
        ws.send(Message::Text(response.to_string())).await.unwrap();

        // Keep the socket open until the client is done with it.
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let client = GatewayClient::new(url, Arc::new(|| String::new()));
    let mut state_rx = client.watch_state();
    let run_handle = {
        let client = client.clone();
        tokio::spawn(async move { client.run().await })
    };

    while !matches!(*state_rx.borrow(), ConnectionState::Connected) {
        state_rx.changed().await.unwrap();
    }

    let facade = client.facade().await.expect("connected");
    let result = facade.sessions_list(20, true, true, false, false).await.unwrap();
    assert_eq!(result["sessions"], json!([]));

    client.shutdown();
    let _ = run_handle.await;
    let _ = server.await;
}

#[tokio::test]
async fn test_chat_error_without_message_falls_back_to_history_lookup() {
    let (url, listener) = bind_mock_server().await;

    let server = tokio::spawn(async move {
        let mut ws = accept_one(&listener).await;

        let req = recv_request(&mut ws).await;
        assert_eq!(req["method"], "chat.send");
        let send_id = req["id"].as_str().unwrap().to_string();
        let response = json!({ "id": send_id, "result": { "runId": "run-1" } });
        ws.send(Message::Text(response.to_string())).await.unwrap();

        let error_event = json!({
            "event": "chat",
            "seq": 1,
            "payload": { "runId": "run-1", "state": "error" },
        });
        send_event(&mut ws, &error_event).await;

        let req = recv_request(&mut ws).await;
        assert_eq!(req["method"], "chat.history");
        assert_eq!(req["params"]["sessionKey"], "abc123");
        let history_id = req["id"].as_str().unwrap().to_string();
        let history = json!({
            "id": history_id,
            "result": {
                "messages": [
                    {
                        "role": "assistant",
                        "stopReason": "error",
                        "errorMessage": "HTTP 401 unauthorized",
                        "modelId": "gpt-4",
                        "providerId": "openai",
                    },
                ],
            },
        });
        ws.send(Message::Text(history.to_string())).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let client = GatewayClient::new(url, Arc::new(|| String::new()));
    let mut state_rx = client.watch_state();
    let run_handle = {
        let client = client.clone();
        tokio::spawn(async move { client.run().await })
    };

    while !matches!(*state_rx.borrow(), ConnectionState::Connected) {
        state_rx.changed().await.unwrap();
    }

    let runner = client.chat_runner().await.expect("connected");
    let mut stream = runner
        .stream_chat(json!([{"role": "user", "content": "hi"}]), "openclaw:abc123")
        .await
        .unwrap();

    let result = stream.next().await.expect("one terminal event");
    let err = result.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("HTTP 401 unauthorized"), "got: {message}");
    assert!(message.contains("model=gpt-4"), "got: {message}");
    assert!(message.contains("provider=openai"), "got: {message}");

    client.shutdown();
    let _ = run_handle.await;
    let _ = server.await;
}

#[tokio::test]
async fn test_reconnect_after_unexpected_close_resumes_request_flow() {
    let (url, listener) = bind_mock_server().await;

    let server = tokio::spawn(async move {
        // First connection: drop without a close frame (unexpected close).
        {
            let mut ws = accept_one(&listener).await;
            let _ = ws.next().await;
            drop(ws);
        }

        // Second connection: answer one request to prove the client
        // rebuilt its router and resumed normal operation.
        let mut ws = accept_one(&listener).await;
        let Some(Ok(Message::Text(text))) = ws.next().await else {
            panic!("expected a request frame on reconnect");
        };
        let req: Value = serde_json::from_str(&text).unwrap();
        let id = req["id"].as_str().unwrap().to_string();
        let response = json!({ "id": id, "result": { "ok": true } });
        ws.send(Message::Text(response.to_string())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let client = GatewayClient::new(url, Arc::new(|| String::new()));
    let mut state_rx = client.watch_state();
    let run_handle = {
        let client = client.clone();
        tokio::spawn(async move { client.run().await })
    };

    while !matches!(*state_rx.borrow(), ConnectionState::Connected) {
        state_rx.changed().await.unwrap();
    }

    // Wait for the reconnect cycle to complete (state cycles through
    // Reconnecting then back to Connected).
    let mut saw_reconnecting = false;
    loop {
        state_rx.changed().await.unwrap();
        match &*state_rx.borrow() {
            ConnectionState::Reconnecting(_) => saw_reconnecting = true,
            ConnectionState::Connected if saw_reconnecting => break,
            _ => {}
        }
    }

    let facade = client.facade().await.expect("reconnected");
    let result = facade.config_get().await.unwrap();
    assert_eq!(result["ok"], true);

    client.shutdown();
    let _ = run_handle.await;
    let _ = server.await;
}
