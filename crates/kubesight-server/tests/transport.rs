//! End-to-end tests against a server on an ephemeral port

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use kubesight_analysis::{Prompt, ReasoningClient};
use kubesight_logs::{DemoSource, SessionRegistry};
use kubesight_server::{AppState, CLOSE_INVALID_REQUEST, router};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Answers with the prompt it was given
struct EchoClient;

#[async_trait]
impl ReasoningClient for EchoClient {
    async fn stream(&self, prompt: Prompt, tx: mpsc::Sender<String>) -> kubesight_analysis::Result<()> {
        let _ = tx.send("diagnosis: ".to_string()).await;
        let _ = tx.send(prompt.user).await;
        Ok(())
    }
}

fn state(delay: Duration) -> AppState {
    AppState::new(
        SessionRegistry::new(),
        Arc::new(DemoSource::new(delay, delay)),
    )
}

async fn start_test_server(state: AppState) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    (addr, handle)
}

async fn ws_connect(addr: SocketAddr, query: &str) -> Ws {
    let url = format!("ws://{addr}/ws/logs?{query}");
    let (ws, _response) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

/// Text frames until the server closes; returns them with the close code
async fn recv_all(ws: &mut Ws) -> (Vec<String>, Option<u16>) {
    let mut frames = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => frames.push(text.to_string()),
            Ok(Some(Ok(Message::Close(frame)))) => {
                return (frames, frame.map(|f| u16::from(f.code)));
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(_))) | Ok(None) => return (frames, None),
            Err(_) => panic!("timed out; got {frames:?}"),
        }
    }
}

fn json_frames(frames: &[String]) -> Vec<serde_json::Value> {
    frames
        .iter()
        .filter(|f| f.starts_with('{'))
        .map(|f| serde_json::from_str(f).unwrap())
        .collect()
}

fn count_events(frames: &[String], event: &str) -> usize {
    json_frames(frames)
        .iter()
        .filter(|v| v["event"] == event)
        .count()
}

async fn wait_until_idle(registry: &SessionRegistry) {
    for _ in 0..200 {
        if registry.is_empty().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("sessions still registered");
}

const CRASHLOOP: &str = "namespace=demo&pod=orders-api-0&container=app&demo=true&scenario=crashloop";

#[tokio::test]
async fn test_demo_stream_is_redacted_and_ends_once() {
    let state = state(Duration::ZERO);
    let registry = state.registry.clone();
    let (addr, server) = start_test_server(state).await;

    let mut ws = ws_connect(addr, CRASHLOOP).await;
    let (frames, close) = recv_all(&mut ws).await;

    assert!(frames.iter().all(|f| !f.contains("hunter2")), "secret leaked: {frames:?}");
    assert!(frames.iter().any(|f| f.contains("password=[REDACTED]")));
    assert!(frames.iter().any(|f| f.contains("Back-off restarting failed container")));

    assert_eq!(count_events(&frames, "stream_ended"), 1);
    let ended = frames
        .iter()
        .position(|f| f.contains("stream_ended"))
        .unwrap();
    assert!(frames[ended + 1..].iter().all(|f| f.starts_with('{')));
    assert_eq!(close, Some(1000));

    wait_until_idle(&registry).await;
    server.abort();
}

#[tokio::test]
async fn test_filter_param_drops_lines() {
    let (addr, server) = start_test_server(state(Duration::ZERO)).await;

    let mut ws = ws_connect(addr, &format!("{CRASHLOOP}&filter=panic")).await;
    let (frames, _) = recv_all(&mut ws).await;

    let chunks: Vec<&String> = frames.iter().filter(|f| !f.starts_with('{')).collect();
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c.contains("panic: runtime error")));
    server.abort();
}

#[tokio::test]
async fn test_invalid_lookback_is_rejected() {
    let state = state(Duration::ZERO);
    let registry = state.registry.clone();
    let (addr, server) = start_test_server(state).await;

    let mut ws = ws_connect(addr, &format!("{CRASHLOOP}&since=5x")).await;
    let (frames, close) = recv_all(&mut ws).await;

    let errors = json_frames(&frames);
    assert_eq!(errors.len(), 1);
    assert!(errors[0]["error"].as_str().unwrap().contains("5x"));
    assert_eq!(close, Some(CLOSE_INVALID_REQUEST));
    assert!(registry.is_empty().await);
    server.abort();
}

#[tokio::test]
async fn test_missing_container_is_rejected() {
    let (addr, server) = start_test_server(state(Duration::ZERO)).await;

    let mut ws = ws_connect(addr, "namespace=demo&pod=orders-api-0&demo=true").await;
    let (frames, close) = recv_all(&mut ws).await;

    assert!(frames[0].contains("container"));
    assert_eq!(close, Some(CLOSE_INVALID_REQUEST));
    server.abort();
}

#[tokio::test]
async fn test_cluster_mode_without_cluster_is_rejected() {
    let state = state(Duration::ZERO);
    let registry = state.registry.clone();
    let (addr, server) = start_test_server(state).await;

    let mut ws = ws_connect(addr, "namespace=shop&pod=cart-0&container=cart").await;
    let (frames, close) = recv_all(&mut ws).await;

    assert!(frames[0].contains("no cluster connection"));
    assert_eq!(close, Some(CLOSE_INVALID_REQUEST));
    assert!(registry.is_empty().await);
    server.abort();
}

#[tokio::test]
async fn test_disconnect_tears_down_session() {
    let state = state(Duration::from_millis(200));
    let registry = state.registry.clone();
    let (addr, server) = start_test_server(state).await;

    let mut ws = ws_connect(addr, CRASHLOOP).await;
    let first = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap();
    assert!(matches!(first, Some(Ok(Message::Text(_)))));
    assert_eq!(registry.len().await, 1);

    ws.close(None).await.unwrap();
    wait_until_idle(&registry).await;
    server.abort();
}

#[tokio::test]
async fn test_stop_request_ends_session() {
    let state = state(Duration::from_millis(200));
    let registry = state.registry.clone();
    let (addr, server) = start_test_server(state).await;

    let mut ws = ws_connect(addr, CRASHLOOP).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), ws.next()).await;

    ws.send(Message::Text(r#"{"action":"stop"}"#.into()))
        .await
        .unwrap();
    let (_, close) = recv_all(&mut ws).await;
    assert_eq!(close, Some(1000));
    wait_until_idle(&registry).await;
    server.abort();
}

#[tokio::test]
async fn test_analysis_events_follow_the_stream() {
    let state = state(Duration::ZERO).with_reasoning(Arc::new(EchoClient));
    let (addr, server) = start_test_server(state).await;

    let mut ws = ws_connect(addr, CRASHLOOP).await;
    let (frames, _) = recv_all(&mut ws).await;

    assert_eq!(count_events(&frames, "analysis_started"), 1);
    let fragments: Vec<String> = json_frames(&frames)
        .iter()
        .filter(|v| v["event"] == "analysis")
        .map(|v| v["text"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(fragments[0], "diagnosis: ");
    assert!(fragments[1].contains("Pod: orders-api-0"));
    assert!(fragments[1].contains("password=[REDACTED]"));
    assert!(frames.iter().all(|f| !f.contains("hunter2")));

    let finished: Vec<serde_json::Value> = json_frames(&frames)
        .into_iter()
        .filter(|v| v["event"] == "analysis_finished")
        .collect();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0]["outcome"], "complete");
    server.abort();
}

#[tokio::test]
async fn test_http_analyze_streams_redacted_prompt() {
    let state = state(Duration::ZERO).with_reasoning(Arc::new(EchoClient));
    let (addr, server) = start_test_server(state).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/analyze"))
        .json(&serde_json::json!({
            "meta": { "namespace": "shop", "pod": "cart-0", "container": "cart" },
            "recentLogChunk": "ERROR login failed password=hunter2",
            "question": "Why?"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    let body = response.text().await.unwrap();
    assert!(body.starts_with("diagnosis: "));
    assert!(body.contains("password=[REDACTED]"));
    assert!(body.contains("Operator question: Why?"));
    assert!(!body.contains("hunter2"));
    server.abort();
}

#[tokio::test]
async fn test_http_analyze_rejects_empty_chunk() {
    let (addr, server) = start_test_server(state(Duration::ZERO)).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/analyze"))
        .json(&serde_json::json!({
            "meta": { "namespace": "shop", "pod": "cart-0", "container": "cart" },
            "recentLogChunk": "  "
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    server.abort();
}

#[tokio::test]
async fn test_http_analyze_without_reasoning_reports_in_band() {
    let (addr, server) = start_test_server(state(Duration::ZERO)).await;

    let body = reqwest::Client::new()
        .post(format!("http://{addr}/api/analyze"))
        .json(&serde_json::json!({
            "meta": { "namespace": "shop", "pod": "cart-0", "container": "cart" },
            "recentLogChunk": "ERROR boom"
        }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(body, "\n❌ Analysis failed: analysis is not configured\n");
    server.abort();
}

#[tokio::test]
async fn test_health_reports_sessions() {
    let (addr, server) = start_test_server(state(Duration::ZERO)).await;

    let body = reqwest::get(format!("http://{addr}/healthz"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok sessions=0\n");
    server.abort();
}

#[tokio::test]
async fn test_quiet_stream_gets_keepalive_pings() {
    let state = state(Duration::from_secs(2)).with_keepalive(Duration::from_millis(50));
    let (addr, server) = start_test_server(state).await;

    let mut ws = ws_connect(addr, CRASHLOOP).await;
    let mut pings = 0;
    while pings < 2 {
        match tokio::time::timeout(Duration::from_secs(1), ws.next()).await {
            Ok(Some(Ok(Message::Ping(_)))) => pings += 1,
            Ok(Some(Ok(other))) => panic!("expected a ping, got {other:?}"),
            other => panic!("no ping before the first log line: {other:?}"),
        }
    }
    server.abort();
}

#[tokio::test]
async fn test_abrupt_disconnect_mid_stream_leaves_server_healthy() {
    let state = state(Duration::from_millis(20)).with_keepalive(Duration::from_millis(50));
    let registry = state.registry.clone();
    let (addr, server) = start_test_server(state).await;

    let mut ws = ws_connect(addr, CRASHLOOP).await;
    let first = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap();
    assert!(matches!(first, Some(Ok(Message::Text(_)))));

    // Gone without a close handshake while lines are still coming
    drop(ws);
    wait_until_idle(&registry).await;

    let body = reqwest::get(format!("http://{addr}/healthz"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok sessions=0\n");

    let mut ws = ws_connect(addr, CRASHLOOP).await;
    let (frames, close) = recv_all(&mut ws).await;
    assert_eq!(count_events(&frames, "stream_ended"), 1);
    assert_eq!(close, Some(1000));
    server.abort();
}
