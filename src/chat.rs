//! Interactive chat REPL.
//!
//! Each turn: load the persisted transcript, append the new user message,
//! reduce to the token budget, then stream a completion with the tool specs
//! attached. Tool-call rounds loop until the model produces text (bounded by
//! [`MAX_TOOL_ROUNDS`]). The turn is persisted only after the reply finished;
//! Ctrl-C mid-turn abandons it and nothing is written.

use anyhow::{bail, Result};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::completion::{wire_message, ChatClient, StreamEvent, ToolInvocation};
use crate::config::Config;
use crate::models::ChatMessage;
use crate::reducer::HistoryReducer;
use crate::store;
use crate::tools::ToolRegistry;

const MAX_TOOL_ROUNDS: usize = 8;

pub struct ChatSession {
    pool: SqlitePool,
    client: ChatClient,
    summary_client: ChatClient,
    reducer: HistoryReducer,
    registry: ToolRegistry,
    system_prompt: String,
}

impl ChatSession {
    pub fn new(config: &Config, pool: SqlitePool, registry: ToolRegistry) -> Result<Self> {
        let client = ChatClient::new(&config.chat.model)?;
        let summary_client = ChatClient::new(&config.chat.summary_model)?;
        let reducer = HistoryReducer::new(
            config.chat.max_tokens,
            config.chat.max_tokens_summary_model,
            config.chat.buffer,
            config.chat.summarization_prompt.clone(),
        );

        Ok(Self {
            pool,
            client,
            summary_client,
            reducer,
            registry,
            system_prompt: config.chat.system_prompt.clone(),
        })
    }

    /// Read-eval loop. `exit` or EOF ends the session; Ctrl-C cancels the
    /// in-flight turn without ending the session.
    pub async fn run(&self) -> Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        loop {
            print!("You: ");
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let input = line.trim();
            if input.is_empty() {
                continue;
            }
            if input.eq_ignore_ascii_case("exit") {
                break;
            }

            tokio::select! {
                result = self.run_turn(input) => {
                    if let Err(e) = result {
                        eprintln!("Error: {e:#}");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    // Turn abandoned; the transcript is untouched.
                    println!();
                    println!("(interrupted)");
                }
            }
        }

        Ok(())
    }

    async fn run_turn(&self, input: &str) -> Result<()> {
        let transcript = store::load_transcript(&self.pool).await?;
        let user_msg = ChatMessage::user(input);

        let mut working = transcript;
        working.push(user_msg.clone());
        let reduced = self.reducer.reduce(working, &self.summary_client).await?;

        let mut conversation: Vec<Value> =
            vec![json!({ "role": "system", "content": self.system_prompt })];
        conversation.extend(reduced.iter().map(wire_message));

        print!("AI: ");
        std::io::stdout().flush()?;
        let reply = self.stream_reply(&mut conversation).await?;
        println!();

        store::append_turn(&self.pool, &user_msg, &ChatMessage::assistant(reply)).await?;
        Ok(())
    }

    /// Stream completions, executing tool rounds until the model answers in
    /// text. Returns the full assistant reply.
    async fn stream_reply(&self, conversation: &mut Vec<Value>) -> Result<String> {
        let specs = if self.registry.is_empty() {
            None
        } else {
            Some(self.registry.specs())
        };

        for round in 0..MAX_TOOL_ROUNDS {
            // Past the budget, withhold the specs so the model must answer.
            let tools = if round + 1 < MAX_TOOL_ROUNDS {
                specs.clone()
            } else {
                if specs.is_some() {
                    warn!("Tool round budget exhausted, forcing a text answer");
                }
                None
            };

            let mut rx = self.client.stream(conversation.clone(), tools).await?;
            let mut text = String::new();
            let mut pending_calls: Option<Vec<ToolInvocation>> = None;

            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::Delta(chunk) => {
                        print!("{chunk}");
                        std::io::stdout().flush()?;
                        text.push_str(&chunk);
                    }
                    StreamEvent::ToolCalls(calls) => {
                        pending_calls = Some(calls);
                        break;
                    }
                    StreamEvent::Done => break,
                    StreamEvent::Error(e) => bail!("completion stream failed: {e}"),
                }
            }

            let Some(calls) = pending_calls else {
                return Ok(text);
            };

            conversation.push(assistant_tool_call_message(&text, &calls));
            for call in &calls {
                debug!("Tool call: {}({})", call.name, call.arguments);
                let output = self.registry.dispatch(&call.name, &call.arguments).await;
                conversation.push(tool_result_message(&call.id, &output));
            }
        }

        bail!("model did not produce a reply within {MAX_TOOL_ROUNDS} tool rounds")
    }
}

/// Assistant turn that requested tool calls, echoed back to the API.
fn assistant_tool_call_message(text: &str, calls: &[ToolInvocation]) -> Value {
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "type": "function",
                "function": { "name": c.name, "arguments": c.arguments },
            })
        })
        .collect();

    json!({
        "role": "assistant",
        "content": if text.is_empty() { Value::Null } else { Value::String(text.to_string()) },
        "tool_calls": tool_calls,
    })
}

fn tool_result_message(call_id: &str, output: &str) -> Value {
    json!({ "role": "tool", "tool_call_id": call_id, "content": output })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_message_shape() {
        let calls = vec![ToolInvocation {
            id: "call_7".to_string(),
            name: "sql_query".to_string(),
            arguments: r#"{"query":"select 1"}"#.to_string(),
        }];
        let msg = assistant_tool_call_message("", &calls);
        assert_eq!(msg["role"], "assistant");
        assert!(msg["content"].is_null());
        assert_eq!(msg["tool_calls"][0]["id"], "call_7");
        assert_eq!(msg["tool_calls"][0]["function"]["name"], "sql_query");
    }

    #[test]
    fn tool_result_message_shape() {
        let msg = tool_result_message("call_7", "(no rows)");
        assert_eq!(msg["role"], "tool");
        assert_eq!(msg["tool_call_id"], "call_7");
        assert_eq!(msg["content"], "(no rows)");
    }
}
