// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! OpenAI-compatible chat and completion calls to LLM NIMs.
//!
//! Non-streaming calls return the NIM's JSON verbatim. Streaming calls are
//! relayed line by line as Server-Sent Events by a detached task that owns the
//! ledger record, so the record settles even when the client goes away.

use std::convert::Infallible;
use std::marker::PhantomData;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{GatewayError, GatewayResult};
use crate::http::service::metrics::{Endpoint as MetricsEndpoint, InflightGuard};
use crate::ledger::{InferenceRecord, Ledger, RecordKind, RequestType};
use crate::upstream::{self, Endpoint, UpstreamFailure};

pub const LLM_TIMEOUT: Duration = Duration::from_secs(30);

/// First bytes of every relayed stream, so proxies open the pipe right away
pub const SSE_PING: &[u8] = b": ping\n\n";

const SSE_BUFFER: usize = 64;

/// The OpenAI route a request body belongs to
pub trait LlmRoute: Send + Sync + 'static {
    const PATH: &'static str;
    const REQUEST_TYPE: RequestType;
    const METRICS_ENDPOINT: MetricsEndpoint;

    /// Rewrites `logprobs`/`top_logprobs` into the shape the NIM route expects
    fn fix_logprobs(payload: &mut Map<String, Value>, logprobs: bool, top_logprobs: Option<i64>);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Chat {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Completion {}

impl LlmRoute for Chat {
    const PATH: &'static str = "/v1/chat/completions";
    const REQUEST_TYPE: RequestType = RequestType::Chat;
    const METRICS_ENDPOINT: MetricsEndpoint = MetricsEndpoint::ChatCompletions;

    fn fix_logprobs(payload: &mut Map<String, Value>, logprobs: bool, top_logprobs: Option<i64>) {
        if logprobs {
            payload.insert("top_logprobs".into(), json!(top_logprobs.unwrap_or(1)));
        } else {
            payload.remove("logprobs");
            payload.remove("top_logprobs");
        }
    }
}

impl LlmRoute for Completion {
    const PATH: &'static str = "/v1/completions";
    const REQUEST_TYPE: RequestType = RequestType::Completion;
    const METRICS_ENDPOINT: MetricsEndpoint = MetricsEndpoint::Completions;

    // completions take the count in `logprobs` itself
    fn fix_logprobs(payload: &mut Map<String, Value>, logprobs: bool, top_logprobs: Option<i64>) {
        if logprobs {
            payload.insert("logprobs".into(), json!(top_logprobs.unwrap_or(1)));
        } else {
            payload.remove("logprobs");
        }
        payload.remove("top_logprobs");
    }
}

/// Chat body: `messages`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatBody {
    pub messages: Vec<Value>,
}

/// Completion body: `prompt`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionBody {
    pub prompt: String,
}

/// Request body of the LLM endpoints. `B` carries the route-specific field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "B: Deserialize<'de>", serialize = "B: Serialize"))]
pub struct LlmRequest<B, R> {
    pub model: String,
    #[serde(flatten)]
    pub body: B,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<i64>,
    #[serde(skip)]
    route: PhantomData<R>,
}

pub type ChatRequest = LlmRequest<ChatBody, Chat>;
pub type CompletionRequest = LlmRequest<CompletionBody, Completion>;

impl<B: Serialize, R: LlmRoute> LlmRequest<B, R> {
    pub fn new(model: impl Into<String>, body: B) -> Self {
        LlmRequest {
            model: model.into(),
            body,
            temperature: None,
            max_tokens: None,
            stream: None,
            logprobs: None,
            top_logprobs: None,
            route: PhantomData,
        }
    }

    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub fn wants_logprobs(&self) -> bool {
        self.logprobs.unwrap_or(false)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if let Some(top) = self.top_logprobs {
            if !(1..=10).contains(&top) {
                return Err(GatewayError::validation(
                    "top_logprobs must be between 1 and 10",
                ));
            }
            if !self.wants_logprobs() {
                return Err(GatewayError::validation(
                    "top_logprobs can only be set when logprobs is True",
                ));
            }
        }
        Ok(())
    }

    /// The body as received, for the ledger
    pub fn to_input(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }

    /// The body sent to the NIM
    pub fn upstream_payload(&self) -> Value {
        let mut payload = match self.to_input() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        R::fix_logprobs(&mut payload, self.wants_logprobs(), self.top_logprobs);
        if self.is_stream() {
            payload.insert("stream".into(), json!(true));
        }
        Value::Object(payload)
    }

    pub fn new_record(&self, nim_id: &str) -> InferenceRecord {
        let mut record = InferenceRecord::new(
            RecordKind::Llm,
            R::REQUEST_TYPE,
            nim_id,
            self.model.clone(),
            self.is_stream(),
        );
        record.set_input(&self.to_input());
        record
    }
}

/// `{error, type}` for a failed non-streaming call, and what the caller sees
pub fn failure_outcome(nim_id: &str, failure: &UpstreamFailure) -> (Value, GatewayError) {
    match failure {
        UpstreamFailure::Decode(err) => (
            json!({"error": format!("JSON decode error: {err}"), "type": "json_error"}),
            GatewayError::Upstream(format!("JSON decode error: {err}")),
        ),
        UpstreamFailure::Timeout => (
            json!({"error": "Request timeout", "type": "http_error"}),
            GatewayError::UpstreamTimeout(format!("NIM request timed out for {nim_id}")),
        ),
        other => (
            json!({"error": other.to_string(), "type": "http_error"}),
            GatewayError::Upstream(format!("NIM request failed: {other}")),
        ),
    }
}

/// Non-streaming call. The record is settled before returning.
pub async fn complete(
    client: &reqwest::Client,
    ledger: &Ledger,
    url: String,
    payload: &Value,
    record: &mut InferenceRecord,
) -> GatewayResult<Value> {
    let endpoint = Endpoint { url, api_key: None };
    match upstream::post_json(client, &endpoint, payload, LLM_TIMEOUT).await {
        Ok(output) => {
            ledger.complete(record, &output).await?;
            Ok(output)
        }
        Err(failure) => {
            tracing::error!(request_id = %record.request_id, nim_id = %record.nim_id, %failure, "LLM request failed");
            let (error, err) = failure_outcome(&record.nim_id, &failure);
            ledger.fail(record, &error).await?;
            Err(err)
        }
    }
}

/// Splits upstream bytes into SSE lines, producing the relayed frames and
/// collecting the parsed `data:` chunks.
#[derive(Debug, Default)]
pub struct SseRelay {
    pending: Vec<u8>,
    chunks: Vec<Value>,
}

impl SseRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames for every complete line in `bytes`
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            frames.push(self.line(&line[..line.len() - 1]));
        }
        frames
    }

    /// Frame for an unterminated last line, if any
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Some(self.line(&line))
    }

    fn line(&mut self, raw: &[u8]) -> Bytes {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            return Bytes::from_static(b"\n");
        }
        let line = String::from_utf8_lossy(raw);
        if let Some(data) = line.strip_prefix("data: ")
            && data.trim() != "[DONE]"
        {
            match serde_json::from_str::<Value>(data) {
                Ok(chunk) => self.chunks.push(chunk),
                Err(err) => tracing::warn!(%err, chunk = %data, "failed to parse stream chunk"),
            }
        }
        Bytes::from(format!("{line}\n"))
    }

    pub fn chunks(&self) -> &[Value] {
        &self.chunks
    }

    /// Output written for a finished stream
    pub fn into_output(self) -> Value {
        let total = self.chunks.len();
        json!({"chunks": self.chunks, "total_chunks": total, "streaming": true})
    }
}

/// Opens the upstream stream in a detached task and returns the client side.
///
/// Send errors after a client disconnect are ignored; the task drains the
/// upstream to completion and settles the record either way.
pub fn spawn_relay(
    client: reqwest::Client,
    ledger: Ledger,
    url: String,
    payload: Value,
    mut record: InferenceRecord,
    mut guard: InflightGuard,
) -> ReceiverStream<Result<Bytes, Infallible>> {
    let (tx, rx) = mpsc::channel(SSE_BUFFER);
    tokio::spawn(async move {
        let _ = tx.send(Ok(Bytes::from_static(SSE_PING))).await;
        let outcome = pump(&client, &url, &payload, &tx).await;
        let saved = match outcome {
            Ok(relay) => {
                tracing::info!(request_id = %record.request_id, chunks = relay.chunks().len(), "stream completed");
                guard.mark_ok();
                ledger.complete(&mut record, &relay.into_output()).await
            }
            Err(err) => {
                tracing::error!(request_id = %record.request_id, %err, "stream failed");
                let error = json!({"error": err, "type": "streaming_error"});
                ledger.fail(&mut record, &error).await
            }
        };
        if let Err(err) = saved {
            tracing::error!(request_id = %record.request_id, %err, "failed to save streaming result");
        }
    });
    ReceiverStream::new(rx)
}

async fn pump(
    client: &reqwest::Client,
    url: &str,
    payload: &Value,
    tx: &mpsc::Sender<Result<Bytes, Infallible>>,
) -> Result<SseRelay, String> {
    let response = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "text/event-stream")
        .json(payload)
        .send()
        .await
        .map_err(|err| err.to_string())?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!("NIM responded with status {status}: {body}"));
    }

    let mut relay = SseRelay::new();
    let mut body = response.bytes_stream();
    while let Some(bytes) = body.next().await {
        let bytes = bytes.map_err(|err| err.to_string())?;
        for frame in relay.push(&bytes) {
            let _ = tx.send(Ok(frame)).await;
        }
    }
    if let Some(frame) = relay.finish() {
        let _ = tx.send(Ok(frame)).await;
    }
    Ok(relay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn chat(logprobs: Option<bool>, top_logprobs: Option<i64>) -> ChatRequest {
        let mut request = ChatRequest::new(
            "meta/llama-3.1-8b-instruct",
            ChatBody {
                messages: vec![json!({"role": "user", "content": "hi"})],
            },
        );
        request.logprobs = logprobs;
        request.top_logprobs = top_logprobs;
        request
    }

    fn completion(logprobs: Option<bool>, top_logprobs: Option<i64>) -> CompletionRequest {
        let mut request = CompletionRequest::new(
            "meta/llama-3.1-8b-instruct",
            CompletionBody {
                prompt: "Once upon".into(),
            },
        );
        request.logprobs = logprobs;
        request.top_logprobs = top_logprobs;
        request
    }

    #[test]
    fn test_deserialize_chat() -> anyhow::Result<()> {
        let request: ChatRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hello"}],
            "temperature": 0.2,
            "stream": true,
        }))?;
        assert!(request.is_stream());
        assert_eq!(request.body.messages.len(), 1);
        assert_eq!(request.temperature, Some(0.2));
        assert!(serde_json::from_value::<ChatRequest>(json!({"model": "m"})).is_err());
        Ok(())
    }

    #[rstest]
    #[case(Some(true), Some(0), "top_logprobs must be between 1 and 10")]
    #[case(Some(true), Some(11), "top_logprobs must be between 1 and 10")]
    #[case(None, Some(3), "top_logprobs can only be set when logprobs is True")]
    #[case(Some(false), Some(3), "top_logprobs can only be set when logprobs is True")]
    fn test_validation_errors(#[case] logprobs: Option<bool>, #[case] top: Option<i64>, #[case] detail: &str) {
        let err = chat(logprobs, top).validate().unwrap_err();
        assert_eq!(err.status_code().as_u16(), 400);
        assert_eq!(err.to_string(), detail);
        assert!(completion(logprobs, top).validate().is_err());
    }

    #[test]
    fn test_chat_logprobs_fixup() {
        let payload = chat(Some(true), None).upstream_payload();
        assert_eq!(payload["logprobs"], true);
        assert_eq!(payload["top_logprobs"], 1);

        let payload = chat(Some(true), Some(5)).upstream_payload();
        assert_eq!(payload["top_logprobs"], 5);

        let payload = chat(Some(false), None).upstream_payload();
        assert!(payload.get("logprobs").is_none());
        assert!(payload.get("top_logprobs").is_none());
        assert!(payload.get("stream").is_none());
    }

    #[test]
    fn test_completion_logprobs_fixup() {
        let payload = completion(Some(true), Some(4)).upstream_payload();
        assert_eq!(payload["logprobs"], 4);
        assert!(payload.get("top_logprobs").is_none());

        let payload = completion(Some(true), None).upstream_payload();
        assert_eq!(payload["logprobs"], 1);

        let payload = completion(None, None).upstream_payload();
        assert!(payload.get("logprobs").is_none());
        assert_eq!(payload["prompt"], "Once upon");
    }

    #[test]
    fn test_stream_flag_forwarded() {
        let mut request = chat(None, None);
        request.stream = Some(true);
        assert_eq!(request.upstream_payload()["stream"], true);
        let record = request.new_record("meta/llama");
        assert!(record.stream);
        assert_eq!(record.request_type, RequestType::Chat);
        assert_eq!(record.get_input()["messages"][0]["content"], "hi");
    }

    #[test]
    fn test_relay_frames_and_chunks() {
        let mut relay = SseRelay::new();
        let mut frames = relay.push(b"data: {\"id\":1}\n\nda");
        frames.extend(relay.push(b"ta: {\"id\":2}\r\n\ndata: not json\n: keepalive\n"));
        frames.extend(relay.push(b"data: [DONE]\n\n"));
        assert!(relay.finish().is_none());

        let text: Vec<String> = frames
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect();
        assert_eq!(
            text,
            vec![
                "data: {\"id\":1}\n",
                "\n",
                "data: {\"id\":2}\n",
                "\n",
                "data: not json\n",
                ": keepalive\n",
                "data: [DONE]\n",
                "\n",
            ]
        );
        let output = relay.into_output();
        assert_eq!(output["total_chunks"], 2);
        assert_eq!(output["chunks"], json!([{"id": 1}, {"id": 2}]));
        assert_eq!(output["streaming"], true);
    }

    #[test]
    fn test_relay_unterminated_tail() {
        let mut relay = SseRelay::new();
        assert!(relay.push(b"data: {\"id\":9}").is_empty());
        assert_eq!(relay.finish().unwrap(), Bytes::from_static(b"data: {\"id\":9}\n"));
        assert_eq!(relay.chunks().len(), 1);
    }

    #[test]
    fn test_failure_outcomes() {
        let (error, err) = failure_outcome("m", &UpstreamFailure::Decode("eof".into()));
        assert_eq!(error["type"], "json_error");
        assert_eq!(err.status_code().as_u16(), 502);

        let (error, err) = failure_outcome("m", &UpstreamFailure::Timeout);
        assert_eq!(error["type"], "http_error");
        assert_eq!(err.status_code().as_u16(), 504);

        let failure = UpstreamFailure::Status {
            status: 500,
            body: "boom".into(),
        };
        let (error, err) = failure_outcome("m", &failure);
        assert_eq!(error["type"], "http_error");
        assert_eq!(err.to_string(), "NIM request failed: NIM responded with status 500: boom");
    }
}
