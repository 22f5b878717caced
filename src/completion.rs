//! Streaming chat-completion client for the OpenAI API.
//!
//! [`ChatClient::stream`] opens an SSE response and forwards events over a
//! channel: text deltas as they arrive, accumulated tool calls when the model
//! finishes a tool-calling turn, and a terminal `Done` or `Error`. A
//! non-streaming [`ChatClient::complete`] covers summarization, where the
//! output is consumed whole.
//!
//! Retries apply only to opening the request (429/5xx/network, same backoff
//! schedule as the embedding client). A stream that dies mid-body is
//! surfaced as an `Error` event, not retried.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::ChatMessage;
use crate::reducer::Summarizer;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const MAX_OPEN_RETRIES: u32 = 3;

/// One complete tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments, exactly as streamed.
    pub arguments: String,
}

#[derive(Debug)]
pub enum StreamEvent {
    /// A fragment of assistant text.
    Delta(String),
    /// The model finished the turn by requesting tool calls.
    ToolCalls(Vec<ToolInvocation>),
    /// The stream ended normally.
    Done,
    /// The stream ended abnormally.
    Error(String),
}

pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatClient {
    pub fn new(model: &str) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            client,
            base_url: OPENAI_BASE_URL.to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    /// Open a streaming completion and forward its events.
    ///
    /// `messages` are wire-format chat messages (see [`wire_message`]);
    /// `tools` is an optional list of function specs. The receiver always
    /// terminates with `Done`, `ToolCalls`, or `Error`.
    pub async fn stream(
        &self,
        messages: Vec<serde_json::Value>,
        tools: Option<Vec<serde_json::Value>>,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        if let Some(tools) = tools {
            if !tools.is_empty() {
                body["tools"] = serde_json::Value::Array(tools);
            }
        }

        let response = self.open_with_retry(&body).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut accumulator = ToolCallAccumulator::default();
            let mut finished = false;

            'outer: while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=pos);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        break 'outer;
                    }

                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(parsed) => {
                            for event in interpret_chunk(&parsed, &mut accumulator) {
                                match event {
                                    StreamEvent::ToolCalls(_) | StreamEvent::Done => {
                                        finished = true;
                                        if tx.send(event).await.is_err() {
                                            return;
                                        }
                                    }
                                    other => {
                                        if tx.send(other).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            debug!("Skipping unparseable stream chunk: {}", e);
                        }
                    }
                }
            }

            if !finished {
                let _ = tx.send(StreamEvent::Done).await;
            }
        });

        Ok(rx)
    }

    /// Non-streaming completion; returns the assistant text in one piece.
    pub async fn complete(&self, messages: Vec<serde_json::Value>) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });

        let response = self.open_with_retry(&body).await?;
        let json: serde_json::Value = response.json().await?;

        json.get("choices")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing content"))
    }

    async fn open_with_retry(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut last_err = None;

        for attempt in 0..=MAX_OPEN_RETRIES {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!("OpenAI API error {}: {}", status, text));
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Completion request failed after retries")))
    }
}

#[async_trait]
impl Summarizer for ChatClient {
    async fn summarize(&self, messages: &[ChatMessage], instruction: &str) -> Result<String> {
        let mut wire: Vec<serde_json::Value> = messages.iter().map(wire_message).collect();
        wire.push(serde_json::json!({ "role": "system", "content": instruction }));
        self.complete(wire)
            .await
            .context("Summarization request failed")
    }
}

/// Convert a stored message to the chat API wire shape.
pub fn wire_message(msg: &ChatMessage) -> serde_json::Value {
    serde_json::json!({ "role": msg.role.as_str(), "content": msg.content })
}

// ---- SSE chunk shapes --------------------------------------------------

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Reassembles tool calls streamed as indexed fragments.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    calls: Vec<ToolInvocation>,
}

impl ToolCallAccumulator {
    fn apply(&mut self, delta: &ToolCallDelta) {
        while self.calls.len() <= delta.index {
            self.calls.push(ToolInvocation {
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
            });
        }
        let call = &mut self.calls[delta.index];
        if let Some(id) = &delta.id {
            call.id.push_str(id);
        }
        if let Some(func) = &delta.function {
            if let Some(name) = &func.name {
                call.name.push_str(name);
            }
            if let Some(args) = &func.arguments {
                call.arguments.push_str(args);
            }
        }
    }

    fn take(&mut self) -> Vec<ToolInvocation> {
        std::mem::take(&mut self.calls)
    }
}

fn interpret_chunk(
    chunk: &StreamChunk,
    accumulator: &mut ToolCallAccumulator,
) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    for choice in &chunk.choices {
        if let Some(content) = &choice.delta.content {
            if !content.is_empty() {
                events.push(StreamEvent::Delta(content.clone()));
            }
        }
        if let Some(deltas) = &choice.delta.tool_calls {
            for delta in deltas {
                accumulator.apply(delta);
            }
        }
        match choice.finish_reason.as_deref() {
            Some("tool_calls") => events.push(StreamEvent::ToolCalls(accumulator.take())),
            Some(_) => events.push(StreamEvent::Done),
            None => {}
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn chunk(data: &str) -> StreamChunk {
        serde_json::from_str(data).unwrap()
    }

    #[test]
    fn content_delta_becomes_event() {
        let mut acc = ToolCallAccumulator::default();
        let c = chunk(r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#);
        let events = interpret_chunk(&c, &mut acc);
        assert!(matches!(&events[0], StreamEvent::Delta(s) if s == "Hel"));
    }

    #[test]
    fn tool_call_fragments_accumulate_by_index() {
        let mut acc = ToolCallAccumulator::default();

        let first = chunk(
            r#"{"choices":[{"delta":{"tool_calls":[
                {"index":0,"id":"call_1","function":{"name":"search_documents","arguments":""}}
            ]},"finish_reason":null}]}"#,
        );
        let second = chunk(
            r#"{"choices":[{"delta":{"tool_calls":[
                {"index":0,"function":{"arguments":"{\"query\":"}}
            ]},"finish_reason":null}]}"#,
        );
        let third = chunk(
            r#"{"choices":[{"delta":{"tool_calls":[
                {"index":0,"function":{"arguments":"\"rust\"}"}}
            ]},"finish_reason":"tool_calls"}]}"#,
        );

        assert!(interpret_chunk(&first, &mut acc).is_empty());
        assert!(interpret_chunk(&second, &mut acc).is_empty());
        let events = interpret_chunk(&third, &mut acc);

        let StreamEvent::ToolCalls(calls) = &events[0] else {
            panic!("expected tool calls");
        };
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "search_documents");
        assert_eq!(calls[0].arguments, r#"{"query":"rust"}"#);
    }

    #[test]
    fn parallel_tool_calls_keep_separate_slots() {
        let mut acc = ToolCallAccumulator::default();
        let c = chunk(
            r#"{"choices":[{"delta":{"tool_calls":[
                {"index":0,"id":"a","function":{"name":"sql_query","arguments":"{}"}},
                {"index":1,"id":"b","function":{"name":"run_script","arguments":"{}"}}
            ]},"finish_reason":"tool_calls"}]}"#,
        );
        let events = interpret_chunk(&c, &mut acc);
        let StreamEvent::ToolCalls(calls) = &events[0] else {
            panic!("expected tool calls");
        };
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "sql_query");
        assert_eq!(calls[1].name, "run_script");
    }

    #[test]
    fn stop_finish_reason_yields_done() {
        let mut acc = ToolCallAccumulator::default();
        let c = chunk(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        let events = interpret_chunk(&c, &mut acc);
        assert!(matches!(events[0], StreamEvent::Done));
    }

    #[test]
    fn wire_message_carries_role_and_content() {
        let msg = ChatMessage::new(Role::Assistant, "sure");
        let wire = wire_message(&msg);
        assert_eq!(wire["role"], "assistant");
        assert_eq!(wire["content"], "sure");
    }
}
