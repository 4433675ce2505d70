//! Anthropic-shaped wire adapter: system prompt is a top-level field, tool
//! results collapse into one user message of `tool_result` blocks, and
//! streaming tracks content blocks by index per spec.md's Messages API
//! event sequence (`content_block_start` / `_delta` / `_stop`, `message_stop`).

use std::collections::HashMap;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use weave_model_registry::Provider;
use weave_stream::{StreamEvent, ToolCall, Usage};

use crate::error::LlmError;
use crate::message::{ChatMessage, ChatRole, CompletionRequest};
use crate::sse::SseFrameSplitter;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct NonStreamingResult {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

/// Collapses the uniform message list into Anthropic's (system, messages)
/// split. Consecutive `Tool` messages merge into a single user message
/// carrying multiple `tool_result` content blocks, matching how a prior
/// assistant turn's tool calls are answered in one round-trip.
fn split_system_and_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<serde_json::Value>) {
    let mut system = None;
    let mut out: Vec<serde_json::Value> = Vec::new();
    let mut pending_tool_results: Vec<serde_json::Value> = Vec::new();

    let flush_tool_results = |out: &mut Vec<serde_json::Value>, pending: &mut Vec<serde_json::Value>| {
        if !pending.is_empty() {
            out.push(serde_json::json!({
                "role": "user",
                "content": std::mem::take(pending),
            }));
        }
    };

    for message in messages {
        match message.role {
            ChatRole::System => {
                system = Some(message.content.clone());
            }
            ChatRole::Tool => {
                pending_tool_results.push(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.content,
                }));
            }
            ChatRole::User => {
                flush_tool_results(&mut out, &mut pending_tool_results);
                out.push(serde_json::json!({"role": "user", "content": message.content}));
            }
            ChatRole::Assistant => {
                flush_tool_results(&mut out, &mut pending_tool_results);
                out.push(serde_json::json!({"role": "assistant", "content": message.content}));
            }
        }
    }
    flush_tool_results(&mut out, &mut pending_tool_results);

    (system, out)
}

fn build_request_body(model: &str, req: &CompletionRequest, stream: bool, tools_supported: bool) -> serde_json::Value {
    let (system, messages) = split_system_and_messages(&req.messages);
    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
        "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "stream": stream,
    });
    if let Some(system) = system {
        body["system"] = serde_json::Value::String(system);
    }
    if let Some(temperature) = req.temperature {
        body["temperature"] = serde_json::json!(temperature);
    }
    if tools_supported && !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }
    body
}

fn build_request(http: &reqwest::Client, provider: &Provider, api_key: &str, body: &serde_json::Value) -> reqwest::RequestBuilder {
    let url = format!("{}/messages", provider.base_url.trim_end_matches('/'));
    let mut request = http
        .post(url)
        .header("x-api-key", api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(body);
    for (key, value) in &provider.extra_headers {
        request = request.header(key, value);
    }
    request
}

pub async fn complete(
    http: &reqwest::Client,
    provider: &Provider,
    api_key: &str,
    model: &str,
    req: &CompletionRequest,
) -> Result<NonStreamingResult, LlmError> {
    let body = build_request_body(model, req, false, provider.supports_tools);
    let response = build_request(http, provider, api_key, &body).send().await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        return Err(LlmError::UpstreamStatus(provider.name.clone(), status, text));
    }

    let payload: serde_json::Value = response.json().await?;
    let blocks = payload["content"].as_array().cloned().unwrap_or_default();

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for block in &blocks {
        match block["type"].as_str() {
            Some("text") => content.push_str(block["text"].as_str().unwrap_or("")),
            Some("tool_use") => tool_calls.push(ToolCall {
                id: block["id"].as_str().unwrap_or_default().to_string(),
                name: block["name"].as_str().unwrap_or_default().to_string(),
                arguments: serde_json::to_string(&block["input"]).unwrap_or_default(),
            }),
            _ => {}
        }
    }

    let usage = payload.get("usage").map(|u| {
        let prompt_tokens = u["input_tokens"].as_u64().unwrap_or(0) as u32;
        let completion_tokens = u["output_tokens"].as_u64().unwrap_or(0) as u32;
        Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    });

    Ok(NonStreamingResult { content, tool_calls, usage })
}

#[derive(Default)]
struct PendingToolUse {
    id: String,
    name: String,
    arguments: String,
}

enum BlockKind {
    Text,
    Thinking,
    ToolUse(PendingToolUse),
}

pub fn stream(
    http: reqwest::Client,
    provider: Provider,
    api_key: String,
    model: String,
    req: CompletionRequest,
    tx: mpsc::Sender<StreamEvent>,
) {
    tokio::spawn(async move {
        let body = build_request_body(&model, &req, true, provider.supports_tools);
        let result = run_stream(&http, &provider, &api_key, &body, &tx).await;
        if let Err(e) = result {
            let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
        }
        let _ = tx.send(StreamEvent::Done).await;
    });
}

async fn run_stream(
    http: &reqwest::Client,
    provider: &Provider,
    api_key: &str,
    body: &serde_json::Value,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), LlmError> {
    let response = build_request(http, provider, api_key, body).send().await?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        return Err(LlmError::UpstreamStatus(provider.name.clone(), status, text));
    }

    let mut splitter = SseFrameSplitter::new();
    let mut byte_stream = response.bytes_stream();
    let mut blocks: HashMap<u32, BlockKind> = HashMap::new();
    let mut committed_tool_calls = Vec::new();
    let mut usage: Option<Usage> = None;

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk?;
        let text = String::from_utf8_lossy(&chunk);
        for frame in splitter.push(&text) {
            let payload: serde_json::Value = match serde_json::from_str(&frame.data) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let event_type = frame.event.as_deref().or_else(|| payload["type"].as_str());

            match event_type {
                Some("content_block_start") => {
                    let index = payload["index"].as_u64().unwrap_or(0) as u32;
                    let block = &payload["content_block"];
                    let kind = match block["type"].as_str() {
                        Some("tool_use") => BlockKind::ToolUse(PendingToolUse {
                            id: block["id"].as_str().unwrap_or_default().to_string(),
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                            arguments: String::new(),
                        }),
                        Some("thinking") => BlockKind::Thinking,
                        _ => BlockKind::Text,
                    };
                    blocks.insert(index, kind);
                }
                Some("content_block_delta") => {
                    let index = payload["index"].as_u64().unwrap_or(0) as u32;
                    let delta = &payload["delta"];
                    match delta["type"].as_str() {
                        Some("text_delta") => {
                            let text = delta["text"].as_str().unwrap_or("").to_string();
                            if !text.is_empty() {
                                let _ = tx.send(StreamEvent::Content { delta: text }).await;
                            }
                        }
                        Some("thinking_delta") => {
                            let text = delta["thinking"].as_str().unwrap_or("").to_string();
                            if !text.is_empty() {
                                let _ = tx.send(StreamEvent::Reasoning { delta: text }).await;
                            }
                        }
                        Some("input_json_delta") => {
                            if let Some(BlockKind::ToolUse(pending)) = blocks.get_mut(&index) {
                                pending.arguments.push_str(delta["partial_json"].as_str().unwrap_or(""));
                            }
                        }
                        _ => {}
                    }
                }
                Some("content_block_stop") => {
                    let index = payload["index"].as_u64().unwrap_or(0) as u32;
                    if let Some(BlockKind::ToolUse(pending)) = blocks.remove(&index) {
                        committed_tool_calls.push(ToolCall {
                            id: pending.id,
                            name: pending.name,
                            arguments: pending.arguments,
                        });
                    }
                }
                Some("message_delta") => {
                    if let Some(u) = payload.get("usage") {
                        let output_tokens = u["output_tokens"].as_u64().unwrap_or(0) as u32;
                        let prompt_tokens = usage.map(|u| u.prompt_tokens).unwrap_or(0);
                        usage = Some(Usage {
                            prompt_tokens,
                            completion_tokens: output_tokens,
                            total_tokens: prompt_tokens + output_tokens,
                        });
                    }
                }
                Some("message_start") => {
                    if let Some(u) = payload["message"].get("usage") {
                        let prompt_tokens = u["input_tokens"].as_u64().unwrap_or(0) as u32;
                        usage = Some(Usage {
                            prompt_tokens,
                            completion_tokens: 0,
                            total_tokens: prompt_tokens,
                        });
                    }
                }
                Some("message_stop") => {
                    if !committed_tool_calls.is_empty() {
                        let _ = tx
                            .send(StreamEvent::ToolCall {
                                calls: std::mem::take(&mut committed_tool_calls),
                            })
                            .await;
                    }
                }
                _ => {}
            }
        }
    }

    if let Some(usage) = usage {
        let _ = tx.send(StreamEvent::Usage(usage)).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_system_from_messages() {
        let messages = vec![ChatMessage::system("be terse"), ChatMessage::user("hi")];
        let (system, out) = split_system_and_messages(&messages);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["role"], "user");
    }

    #[test]
    fn merges_consecutive_tool_results_into_one_user_message() {
        let messages = vec![
            ChatMessage::assistant("calling tools"),
            ChatMessage::tool_result("call-1", "result-1"),
            ChatMessage::tool_result("call-2", "result-2"),
        ];
        let (_, out) = split_system_and_messages(&messages);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1]["role"], "user");
        assert_eq!(out[1]["content"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn build_request_body_defaults_max_tokens() {
        let req = CompletionRequest::new(vec![ChatMessage::user("hi")]);
        let body = build_request_body("claude-3-5-sonnet", &req, false, false);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }
}
