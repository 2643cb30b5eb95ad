use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{CancelToken, ChatMessage};
use super::ChatError;

const TEMPERATURE: f32 = 0.5;
const MAX_COMPLETION_TOKENS: u32 = 250;
const TOP_P: f32 = 1.0;

/// A chat-completion backend.
pub trait ChatModel: Send + Sync {
    /// Full reply in one piece.
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError>;

    /// Reply streamed as chunks over `token_tx`; returns the assembled text.
    ///
    /// Returns `ChatError::Cancelled` once `cancel` is set. Backends without
    /// streaming send the full reply as a single chunk.
    fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        token_tx: Sender<String>,
        cancel: &CancelToken,
    ) -> Result<String, ChatError> {
        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }
        let reply = self.complete(messages)?;
        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }
        let _ = token_tx.send(reply.clone());
        Ok(reply)
    }

    fn name(&self) -> &str;
}

// ═══════════════════════════════════════════════════════════
// ChatCompletionsClient: OpenAI-compatible HTTP API
// ═══════════════════════════════════════════════════════════

/// Blocking client for `/chat/completions` (Groq, Ollama `/v1`, OpenAI).
pub struct ChatCompletionsClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl ChatCompletionsClient {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, ChatError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ChatError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            client,
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::blocking::Response, ChatError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: TEMPERATURE,
            max_completion_tokens: MAX_COMPLETION_TOKENS,
            top_p: TOP_P,
            stream,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(|e| {
            if e.is_connect() {
                ChatError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                ChatError::HttpClient(format!("Request timed out after {}s", self.timeout_secs))
            } else {
                ChatError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ChatError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_completion_tokens: u32,
    top_p: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One server-sent-events line of a streamed completion.
#[derive(Debug, PartialEq, Eq)]
pub enum SseEvent {
    /// Content delta.
    Token(String),
    /// `data: [DONE]`.
    Done,
    /// Blank lines, comments, role-only deltas.
    Skip,
}

/// Parse one SSE line. Non-`data:` lines are skipped.
pub fn parse_sse_line(line: &str) -> Result<SseEvent, ChatError> {
    let Some(payload) = line.trim().strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    if payload.is_empty() {
        return Ok(SseEvent::Skip);
    }

    let chunk: StreamChunk = serde_json::from_str(payload)?;
    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
    {
        Some(content) if !content.is_empty() => Ok(SseEvent::Token(content)),
        _ => Ok(SseEvent::Skip),
    }
}

impl ChatModel for ChatCompletionsClient {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        let response = self.send(messages, false)?;
        let parsed: CompletionResponse = response
            .json()
            .map_err(|e| ChatError::ResponseParsing(e.to_string()))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        token_tx: Sender<String>,
        cancel: &CancelToken,
    ) -> Result<String, ChatError> {
        let response = self.send(messages, true)?;
        let reader = BufReader::new(response);

        let mut reply = String::new();
        let mut chunks = 0usize;
        for line in reader.lines() {
            if cancel.is_cancelled() {
                debug!(chunks, "Chat stream cancelled");
                return Err(ChatError::Cancelled);
            }
            let line = line.map_err(|e| ChatError::ResponseParsing(e.to_string()))?;
            match parse_sse_line(&line)? {
                SseEvent::Token(token) => {
                    reply.push_str(&token);
                    chunks += 1;
                    // Receiver may be gone; the assembled reply is still returned.
                    let _ = token_tx.send(token);
                }
                SseEvent::Done => break,
                SseEvent::Skip => {}
            }
        }

        debug!(model = %self.model, chunks, chars = reply.len(), "Chat stream finished");
        Ok(reply)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ═══════════════════════════════════════════════════════════
// MockChatModel
// ═══════════════════════════════════════════════════════════

/// Mock chat model for testing. Returns a fixed reply (or failure) and
/// records the messages of the last call.
pub struct MockChatModel {
    outcome: Result<String, String>,
    calls: AtomicUsize,
    last_messages: Mutex<Vec<ChatMessage>>,
}

impl MockChatModel {
    pub fn new(reply: &str) -> Self {
        Self {
            outcome: Ok(reply.to_string()),
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_messages(&self) -> Vec<ChatMessage> {
        self.last_messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl ChatModel for MockChatModel {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_messages.lock() {
            *last = messages.to_vec();
        }
        self.outcome.clone().map_err(ChatError::HttpClient)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_token_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"Copper"}}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            SseEvent::Token("Copper".into())
        );
    }

    #[test]
    fn sse_done_and_skips() {
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseEvent::Done);
        assert_eq!(parse_sse_line("").unwrap(), SseEvent::Skip);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseEvent::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseEvent::Skip
        );
    }

    #[test]
    fn sse_malformed_payload_is_error() {
        assert!(matches!(
            parse_sse_line("data: {not json"),
            Err(ChatError::Json(_))
        ));
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client =
            ChatCompletionsClient::new("https://api.groq.com/openai/v1/", "qwen", None, 30).unwrap();
        assert_eq!(client.base_url(), "https://api.groq.com/openai/v1");
        assert_eq!(client.name(), "qwen");
    }

    #[test]
    fn request_body_carries_sampling_settings() {
        let messages = [ChatMessage::user("hi")];
        let body = CompletionRequest {
            model: "qwen",
            messages: &messages,
            temperature: TEMPERATURE,
            max_completion_tokens: MAX_COMPLETION_TOKENS,
            top_p: TOP_P,
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["temperature"], 0.5);
        assert_eq!(json["max_completion_tokens"], 250);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn unreachable_server_is_connection_error() {
        let client = ChatCompletionsClient::new("http://127.0.0.1:1", "qwen", None, 2).unwrap();
        let err = client.complete(&[ChatMessage::user("hi")]).unwrap_err();
        assert!(matches!(err, ChatError::Connection(_) | ChatError::HttpClient(_)));
    }

    #[test]
    fn default_streaming_sends_single_chunk() {
        let mock = MockChatModel::new("Use neem oil.");
        let (tx, rx) = std::sync::mpsc::channel();
        let reply = mock
            .complete_streaming(&[ChatMessage::user("aphids?")], tx, &CancelToken::new())
            .unwrap();
        assert_eq!(reply, "Use neem oil.");
        assert_eq!(rx.recv().unwrap(), "Use neem oil.");
    }

    #[test]
    fn default_streaming_honours_cancel() {
        let mock = MockChatModel::new("never sent");
        let cancel = CancelToken::new();
        cancel.cancel();
        let (tx, _rx) = std::sync::mpsc::channel();
        let err = mock
            .complete_streaming(&[ChatMessage::user("q")], tx, &cancel)
            .unwrap_err();
        assert!(matches!(err, ChatError::Cancelled));
        assert_eq!(mock.calls(), 0);
    }
}
