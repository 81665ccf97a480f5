//! Client for the managed streaming prediction service
//!
//! A prediction is requested with `POST {base}/api/v1/prediction/{chatflow}`.
//! Streaming responses are server-sent events whose `data:` lines carry
//! `{"event": ..., "data": ...}` envelopes; only `token` events become text.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::{BridgeError, BridgeResult};
use super::response::{normalize, DEFAULT_FALLBACK};
use super::stream::{BridgeStream, BridgeStreamSender};
use crate::domain::ResponseAdapter;

/// Body sent to the prediction endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRequest {
    pub question: String,
    pub streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

/// Something that can stream a prediction for a chatflow
pub trait PredictionClient: Send + Sync {
    fn predict(&self, chatflow_id: &str, request: PredictionRequest) -> BridgeStream;
}

/// reqwest implementation of [`PredictionClient`]
pub struct HttpPredictionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPredictionClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout_secs: u64) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BridgeError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn endpoint(&self, chatflow_id: &str) -> String {
        format!("{}/api/v1/prediction/{}", self.base_url, chatflow_id)
    }

    async fn stream_prediction(
        client: reqwest::Client,
        url: String,
        api_key: Option<String>,
        body: PredictionRequest,
        sender: BridgeStreamSender,
    ) -> BridgeResult<()> {
        let mut request = client.post(&url).json(&body);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(BridgeError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));

        if !is_event_stream {
            // Non-streaming flows answer with one JSON document
            let value: Value = response
                .json()
                .await
                .map_err(|e| BridgeError::Parse(format!("Failed to parse prediction: {}", e)))?;
            let text = normalize(&value, &ResponseAdapter::Probe, DEFAULT_FALLBACK);
            sender.send_token(text).await?;
            return Ok(());
        }

        let mut stream = response.bytes_stream();
        let mut parser = SseParser::default();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| BridgeError::Streaming(e.to_string()))?;
            for event in parser.push(&chunk) {
                if !Self::dispatch(event, &sender).await? {
                    return Ok(());
                }
            }
        }

        for event in parser.finish() {
            if !Self::dispatch(event, &sender).await? {
                break;
            }
        }

        Ok(())
    }

    /// Forward one event; `false` means the stream is over
    async fn dispatch(event: PredictionEvent, sender: &BridgeStreamSender) -> BridgeResult<bool> {
        match event {
            PredictionEvent::Token(text) => {
                sender.send_token(text).await?;
                Ok(true)
            }
            PredictionEvent::Error(message) => Err(BridgeError::Streaming(message)),
            PredictionEvent::End => Ok(false),
            PredictionEvent::Other(name) => {
                debug!(event = %name, "Ignoring prediction event");
                Ok(true)
            }
        }
    }
}

impl PredictionClient for HttpPredictionClient {
    fn predict(&self, chatflow_id: &str, request: PredictionRequest) -> BridgeStream {
        let (sender, stream) = BridgeStream::channel(64);

        let client = self.client.clone();
        let url = self.endpoint(chatflow_id);
        let api_key = self.api_key.clone();

        tokio::spawn(async move {
            let result = Self::stream_prediction(client, url, api_key, request, sender.clone()).await;
            if let Err(e) = result {
                warn!(error = %e, "Prediction stream failed");
                sender.send_error(e).await;
            }
        });

        stream
    }
}

/// A decoded prediction event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictionEvent {
    Token(String),
    Error(String),
    End,
    Other(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Incremental decoder for the prediction SSE body
///
/// Bytes are buffered until a full line arrives, so UTF-8 sequences split
/// across network chunks decode intact.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
}

impl SseParser {
    /// Feed raw bytes; returns events for every complete line
    pub fn push(&mut self, chunk: impl AsRef<[u8]>) -> Vec<PredictionEvent> {
        self.buffer.extend_from_slice(chunk.as_ref());

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.parse_line(line.trim_end_matches(['\n', '\r'])) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line without newline
    pub fn finish(&mut self) -> Vec<PredictionEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest);
        self.parse_line(rest.trim_end_matches('\r')).into_iter().collect()
    }

    fn parse_line(&mut self, line: &str) -> Option<PredictionEvent> {
        if line.is_empty() {
            self.event = None;
            return None;
        }

        if let Some(name) = line.strip_prefix("event:") {
            self.event = Some(name.trim().to_string());
            return None;
        }

        let data = line.strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            return Some(PredictionEvent::End);
        }

        match serde_json::from_str::<Envelope>(data) {
            Ok(envelope) => {
                let name = envelope.event.or_else(|| self.event.clone()).unwrap_or_default();
                Some(Self::classify(&name, envelope.data))
            }
            // Bare text under an `event: token` header
            Err(_) if self.event.as_deref() == Some("token") => Some(PredictionEvent::Token(data.to_string())),
            Err(_) => {
                debug!(line = %data, "Skipping unparseable SSE data line");
                None
            }
        }
    }

    fn classify(name: &str, data: Value) -> PredictionEvent {
        match (name, data) {
            ("token", Value::String(text)) => PredictionEvent::Token(text),
            ("error", Value::String(message)) => PredictionEvent::Error(message),
            ("error", other) => PredictionEvent::Error(other.to_string()),
            ("end", _) => PredictionEvent::End,
            (other, _) => PredictionEvent::Other(other.to_string()),
        }
    }
}
