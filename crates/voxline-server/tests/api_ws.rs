mod common;

use common::{eventually, spawn_server, test_state, MockRecognizer, FINAL, PARTIAL};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use voxline_types::ClientId;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr, client_id: ClientId) -> Client {
    let url = format!("ws://{}/ws/{}", addr, client_id);
    let (ws, _) = connect_async(url).await.expect("failed to connect");
    ws
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next data frame, skipping control frames.
async fn next_frame(ws: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(msg)) => return msg,
                other => panic!("connection ended unexpectedly: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

async fn next_json(ws: &mut Client) -> Value {
    match next_frame(ws).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected a text frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_response_text_is_spoken_back() {
    let addr = spawn_server(test_state(MockRecognizer::default())).await;
    let mut ws = connect(addr, ClientId::new()).await;

    send_json(&mut ws, json!({"text": "Tere! Kuidas saan aidata?"})).await;

    match next_frame(&mut ws).await {
        Message::Binary(audio) => assert_eq!(&audio[..], b"<Tere! Kuidas saan aidata?>"),
        other => panic!("expected audio, got {:?}", other),
    }
    assert_eq!(next_json(&mut ws).await, json!({"isFinal": true}));
}

#[tokio::test]
async fn test_recognition_round_trip_over_the_socket() {
    let recognizer = MockRecognizer::default();
    let addr = spawn_server(test_state(recognizer.clone())).await;
    let mut ws = connect(addr, ClientId::new()).await;

    send_json(&mut ws, json!({"type": "stt_init", "language": "en-US"})).await;
    ws.send(Message::Binary(vec![0u8; 3200].into())).await.unwrap();

    assert_eq!(
        next_json(&mut ws).await,
        json!({"type": "transcript", "text": PARTIAL, "isFinal": false})
    );

    send_json(&mut ws, json!({"type": "stt_stop"})).await;
    assert_eq!(
        next_json(&mut ws).await,
        json!({"type": "transcript", "text": FINAL, "isFinal": true})
    );
    assert_eq!(recognizer.log(), vec!["connect:en-US", "finish"]);
}

#[tokio::test]
async fn test_stt_init_twice_keeps_one_session() {
    let recognizer = MockRecognizer::default();
    let state = test_state(recognizer.clone());
    let addr = spawn_server(state.clone()).await;
    let client = ClientId::new();
    let mut ws = connect(addr, client).await;

    send_json(&mut ws, json!({"type": "stt_init"})).await;
    send_json(&mut ws, json!({"type": "stt_init"})).await;
    // Frames are handled in order, so the text round trip proves both
    // stt_init frames were processed.
    send_json(&mut ws, json!({"text": "Jah."})).await;
    assert!(matches!(next_frame(&mut ws).await, Message::Binary(_)));
    assert_eq!(next_json(&mut ws).await, json!({"isFinal": true}));

    assert_eq!(
        recognizer.log(),
        vec!["connect:et-EE", "finish", "connect:et-EE"]
    );
    assert!(state.registry.recognition(client).await.is_some());
}

#[tokio::test]
async fn test_recognition_start_failure_is_reported() {
    let addr = spawn_server(test_state(MockRecognizer::failing())).await;
    let mut ws = connect(addr, ClientId::new()).await;

    send_json(&mut ws, json!({"type": "stt_init"})).await;

    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    let message = reply["message"].as_str().unwrap();
    assert!(message.contains("connection refused"), "{}", message);
}

#[tokio::test]
async fn test_malformed_frames_are_ignored() {
    let addr = spawn_server(test_state(MockRecognizer::default())).await;
    let mut ws = connect(addr, ClientId::new()).await;

    ws.send(Message::Text("{not json".into())).await.unwrap();
    send_json(&mut ws, json!({"type": "dance"})).await;
    send_json(&mut ws, json!({"text": "Aitäh."})).await;

    match next_frame(&mut ws).await {
        Message::Binary(audio) => assert_eq!(&audio[..], "<Aitäh.>".as_bytes()),
        other => panic!("expected audio, got {:?}", other),
    }
}

#[tokio::test]
async fn test_oversized_text_is_rejected() {
    let addr = spawn_server(test_state(MockRecognizer::default())).await;
    let mut ws = connect(addr, ClientId::new()).await;

    send_json(&mut ws, json!({"text": "a".repeat(5_000)})).await;

    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
}

#[tokio::test]
async fn test_audio_before_stt_init_is_dropped() {
    let recognizer = MockRecognizer::default();
    let addr = spawn_server(test_state(recognizer.clone())).await;
    let mut ws = connect(addr, ClientId::new()).await;

    ws.send(Message::Binary(vec![0u8; 320].into())).await.unwrap();
    send_json(&mut ws, json!({"text": "Jah."})).await;

    // The first thing back is the synthesized audio, not a transcript.
    assert!(matches!(next_frame(&mut ws).await, Message::Binary(_)));
    assert!(recognizer.log().is_empty());
}

#[tokio::test]
async fn test_disconnect_tears_down_the_client_pipeline() {
    let recognizer = MockRecognizer::default();
    let state = test_state(recognizer.clone());
    let addr = spawn_server(state.clone()).await;
    let client = ClientId::new();
    let mut ws = connect(addr, client).await;

    send_json(&mut ws, json!({"type": "stt_init"})).await;
    ws.send(Message::Binary(vec![0u8; 3200].into())).await.unwrap();
    next_json(&mut ws).await;
    assert!(state.registry.is_connected(client).await);

    ws.close(None).await.unwrap();

    eventually(|| {
        let registry = state.registry.clone();
        async move { !registry.is_connected(client).await }
    })
    .await;
    assert_eq!(recognizer.log(), vec!["connect:et-EE", "finish"]);
    assert!(!state.synthesizer.is_active(client).await);
}

#[tokio::test]
async fn test_invalid_client_id_is_rejected() {
    let addr = spawn_server(test_state(MockRecognizer::default())).await;

    let result = connect_async(format!("ws://{}/ws/not-a-uuid", addr)).await;
    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 400);
        }
        other => panic!("expected HTTP 400, got {:?}", other.map(|_| ())),
    }
}
