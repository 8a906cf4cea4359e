//! Chat model client.
//!
//! All three providers expose an OpenAI-compatible `/chat/completions`
//! endpoint, so one HTTP client covers them. Streaming answers arrive as
//! server-sent events:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"SEL"}}]}
//! data: {"choices":[{"delta":{"content":"ECT 1"}}]}
//! data: [DONE]
//! ```

use crate::error::{AppError, AppResult};
use crate::llm::provider::ResolvedProvider;
use crate::llm::stream::TokenStream;
use crate::llm::types::{ChatCompletion, ChatRequest, WireErrorBody, WireResponse};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout of a non-streaming completion.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// A chat-completion capable model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model name sent with every request.
    fn model(&self) -> &str;

    async fn complete(&self, request: ChatRequest) -> AppResult<ChatCompletion>;

    async fn stream(&self, request: ChatRequest) -> AppResult<TokenStream>;
}

/// HTTP client for OpenAI-compatible providers.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    provider: ResolvedProvider,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(provider: ResolvedProvider) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            provider,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.provider.base_url.trim_end_matches('/')
        )
    }

    async fn send(&self, request: &ChatRequest) -> AppResult<reqwest::Response> {
        debug!(
            provider = %self.provider.kind,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            stream = request.stream,
            "Sending chat request"
        );

        let mut builder = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.provider.api_key)
            .json(request);
        if !request.stream {
            builder = builder.timeout(self.timeout);
        }
        let response = builder.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body).unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body
            }
        });
        warn!(
            provider = %self.provider.kind,
            status = status.as_u16(),
            error = %message,
            "Chat request failed"
        );
        Err(AppError::model(Some(status.as_u16()), message))
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    fn model(&self) -> &str {
        &self.provider.model
    }

    async fn complete(&self, mut request: ChatRequest) -> AppResult<ChatCompletion> {
        request.stream = false;
        let response = self.send(&request).await?;
        let wire: WireResponse = response.json().await?;
        let completion = wire
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .map(ChatCompletion::from)
            .unwrap_or_default();
        debug!(
            content_len = completion.content.len(),
            tool_calls = completion.tool_calls.len(),
            "Chat completion received"
        );
        Ok(completion)
    }

    async fn stream(&self, mut request: ChatRequest) -> AppResult<TokenStream> {
        request.stream = true;
        let response = self.send(&request).await?;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(AppError::from))
            .boxed();
        Ok(TokenStream::new(sse_tokens(body)))
    }
}

/// Provider error message from an error body, in either the object or the
/// single-element array shape.
fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<WireErrorBody>(body)
        .ok()?
        .into_message()
}

/// One parsed server-sent event line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseLine {
    Token(String),
    Done,
    Ignore,
}

pub(crate) fn parse_sse_line(line: &str) -> AppResult<SseLine> {
    let Some(payload) = line.trim().strip_prefix("data:") else {
        return Ok(SseLine::Ignore);
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if let Some(message) = error_message(payload) {
        return Err(AppError::model(None, message));
    }
    let event: WireResponse = serde_json::from_str(payload)?;
    let token = event
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.or(c.message))
        .and_then(|m| m.content)
        .unwrap_or_default();
    if token.is_empty() {
        Ok(SseLine::Ignore)
    } else {
        Ok(SseLine::Token(token))
    }
}

struct SseState {
    body: BoxStream<'static, AppResult<Vec<u8>>>,
    buffer: Vec<u8>,
    ready: VecDeque<AppResult<String>>,
    done: bool,
}

impl SseState {
    /// Parse a complete line, queueing its token. Returns false once the
    /// stream has ended.
    fn feed_line(&mut self, raw: &[u8]) -> bool {
        let line = String::from_utf8_lossy(raw);
        match parse_sse_line(&line) {
            Ok(SseLine::Token(token)) => self.ready.push_back(Ok(token)),
            Ok(SseLine::Ignore) => {}
            Ok(SseLine::Done) => return false,
            Err(e) => {
                self.ready.push_back(Err(e));
                return false;
            }
        }
        true
    }

    fn feed_buffered_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if !self.feed_line(&line) {
                self.done = true;
                return;
            }
        }
    }
}

fn sse_tokens(body: BoxStream<'static, AppResult<Vec<u8>>>) -> BoxStream<'static, AppResult<String>> {
    let state = SseState {
        body,
        buffer: Vec::new(),
        ready: VecDeque::new(),
        done: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    state.feed_buffered_lines();
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.done = true;
                    let rest = std::mem::take(&mut state.buffer);
                    state.feed_line(&rest);
                }
            }
        }
    })
    .boxed()
}
