use agentdesk::bridge::{BridgeError, HttpPredictionClient, PredictionClient, PredictionRequest};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Seen {
    requests: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
}

const STREAM_BODY: &str = "event: start\ndata: {\"event\":\"start\",\"data\":\"\"}\n\n\
data: {\"event\":\"token\",\"data\":\"Hello\"}\n\n\
data: {\"event\":\"token\",\"data\":\", world\"}\n\n\
data: {\"event\":\"metadata\",\"data\":{\"chatId\":\"c-1\"}}\n\n\
data: {\"event\":\"end\",\"data\":\"[DONE]\"}\n\n\
data: {\"event\":\"token\",\"data\":\"after end\"}\n\n";

const ERROR_BODY: &str = "data: {\"event\":\"token\",\"data\":\"Par\"}\n\n\
data: {\"event\":\"error\",\"data\":\"flow crashed\"}\n\n";

async fn predict(
    State(seen): State<Seen>,
    Path(flow): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    seen.requests.lock().unwrap().push((flow.clone(), auth, body));

    match flow.as_str() {
        "streaming" => ([(header::CONTENT_TYPE, "text/event-stream")], STREAM_BODY).into_response(),
        "failing" => ([(header::CONTENT_TYPE, "text/event-stream")], ERROR_BODY).into_response(),
        "multibyte" => {
            // Two body chunks, cut inside the UTF-8 encoding of 'é'
            let body = "data: {\"event\":\"token\",\"data\":\"café 日本\"}\n\n".as_bytes();
            let cut = body.iter().position(|b| *b == 0xC3).unwrap() + 1;
            let chunks = vec![
                Ok::<_, std::convert::Infallible>(body[..cut].to_vec()),
                Ok(body[cut..].to_vec()),
            ];
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(futures::stream::iter(chunks)),
            )
                .into_response()
        }
        "plain" => Json(json!({"text": "single answer", "chatId": "c-2"})).into_response(),
        _ => (StatusCode::NOT_FOUND, "no such chatflow").into_response(),
    }
}

async fn spawn_server() -> (String, Seen) {
    let seen = Seen::default();
    let app = Router::new()
        .route("/api/v1/prediction/:flow", post(predict))
        .with_state(seen.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/", addr), seen)
}

fn request(question: &str) -> PredictionRequest {
    PredictionRequest {
        question: question.to_string(),
        streaming: true,
        override_config: Some(json!({"vars": {"api_key": "k-1"}})),
        chat_id: Some("session-1".to_string()),
    }
}

#[tokio::test]
async fn test_streams_tokens_until_end() {
    let (base, seen) = spawn_server().await;
    let client = HttpPredictionClient::new(base, Some("secret".to_string()), 5).unwrap();

    let text = client.predict("streaming", request("hi")).collect_text().await.unwrap();
    assert_eq!(text, "Hello, world");

    let requests = seen.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let (flow, auth, body) = &requests[0];
    assert_eq!(flow, "streaming");
    assert_eq!(auth.as_deref(), Some("Bearer secret"));
    assert_eq!(body["question"], "hi");
    assert_eq!(body["streaming"], true);
    assert_eq!(body["chatId"], "session-1");
    assert_eq!(body["overrideConfig"]["vars"]["api_key"], "k-1");
}

#[tokio::test]
async fn test_multibyte_text_survives_chunking() {
    let (base, _) = spawn_server().await;
    let client = HttpPredictionClient::new(base, None, 5).unwrap();

    let text = client.predict("multibyte", request("hi")).collect_text().await.unwrap();
    assert_eq!(text, "café 日本");
}

#[tokio::test]
async fn test_error_event_fails_the_stream() {
    let (base, _) = spawn_server().await;
    let client = HttpPredictionClient::new(base, None, 5).unwrap();

    let err = client.predict("failing", request("hi")).collect_text().await.unwrap_err();
    assert!(matches!(err, BridgeError::Streaming(ref m) if m == "flow crashed"));
}

#[tokio::test]
async fn test_json_answer_becomes_one_token() {
    let (base, seen) = spawn_server().await;
    let client = HttpPredictionClient::new(base, None, 5).unwrap();

    let text = client.predict("plain", request("hi")).collect_text().await.unwrap();
    assert_eq!(text, "single answer");

    let requests = seen.requests.lock().unwrap();
    assert_eq!(requests[0].1, None);
}

#[tokio::test]
async fn test_http_status_is_reported() {
    let (base, _) = spawn_server().await;
    let client = HttpPredictionClient::new(base, None, 5).unwrap();

    match client.predict("missing", request("hi")).collect_text().await {
        Err(BridgeError::Api { status, message }) => {
            assert_eq!(status, 404);
            assert_eq!(message, "no such chatflow");
        }
        other => panic!("expected Api error, got {:?}", other),
    }
}
