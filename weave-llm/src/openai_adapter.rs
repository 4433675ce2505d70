//! OpenAI-shaped wire adapter: request construction, non-streaming
//! completion, and SSE streaming with by-index tool-call delta
//! reassembly.

use std::collections::HashMap;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use weave_model_registry::{AuthStyle, Provider};
use weave_stream::{StreamEvent, ToolCall, Usage};

use crate::error::LlmError;
use crate::message::{ChatMessage, ChatRole, CompletionRequest, ToolChoice};
use crate::sse::{SseFrameSplitter, DONE_SENTINEL};

pub struct NonStreamingResult {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

fn auth_header(provider: &Provider, api_key: &str) -> (&'static str, String) {
    match provider.effective_auth_style() {
        AuthStyle::BearerHeader => ("Authorization", format!("Bearer {api_key}")),
        AuthStyle::ApiKeyHeader => ("x-api-key", api_key.to_string()),
    }
}

fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

fn messages_json(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| {
            let mut obj = serde_json::json!({
                "role": role_str(m.role),
                "content": m.content,
            });
            if let Some(id) = &m.tool_call_id {
                obj["tool_call_id"] = serde_json::Value::String(id.clone());
            }
            obj
        })
        .collect()
}

fn build_request_body(model: &str, req: &CompletionRequest, stream: bool, tools_supported: bool) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "messages": messages_json(&req.messages),
        "stream": stream,
    });

    if tools_supported && !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
        body["tool_choice"] = match req.tool_choice {
            ToolChoice::Auto => serde_json::Value::String("auto".to_string()),
            ToolChoice::None => serde_json::Value::String("none".to_string()),
            ToolChoice::Required => serde_json::Value::String("required".to_string()),
        };
    }
    if let Some(max_tokens) = req.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(temperature) = req.temperature {
        body["temperature"] = serde_json::json!(temperature);
    }
    body
}

fn build_request(http: &reqwest::Client, provider: &Provider, api_key: &str, body: &serde_json::Value) -> reqwest::RequestBuilder {
    let url = format!("{}/chat/completions", provider.base_url.trim_end_matches('/'));
    let (header_name, header_value) = auth_header(provider, api_key);
    let mut request = http.post(url).header(header_name, header_value).json(body);
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
    let choice = payload["choices"]
        .get(0)
        .ok_or_else(|| LlmError::NoChoices(provider.name.clone()))?;
    let message = &choice["message"];
    let content = message["content"].as_str().unwrap_or_default().to_string();

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| {
                    let id = tc["id"].as_str()?.to_string();
                    let name = tc["function"]["name"].as_str()?.to_string();
                    let arguments = tc["function"]["arguments"].as_str().unwrap_or("").to_string();
                    Some(ToolCall { id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = payload.get("usage").map(|u| Usage {
        prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
        total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as u32,
    });

    Ok(NonStreamingResult { content, tool_calls, usage })
}

#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

/// Spawns one task owning the streaming HTTP call; emits `StreamEvent`s onto
/// `tx` as SSE frames arrive, aggregating `tool_calls` deltas by index into
/// a map, and terminates on the `[DONE]` sentinel with one `ToolCall` batch,
/// `Usage`, then `Done`.
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
    let mut tool_calls: HashMap<u32, ToolCallAccumulator> = HashMap::new();
    let mut usage_seen: Option<Usage> = None;

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk?;
        let text = String::from_utf8_lossy(&chunk);
        for frame in splitter.push(&text) {
            if frame.data == DONE_SENTINEL {
                continue;
            }
            let payload: serde_json::Value = match serde_json::from_str(&frame.data) {
                Ok(v) => v,
                Err(_) => continue,
            };

            if let Some(u) = payload.get("usage") {
                if !u.is_null() {
                    usage_seen = Some(Usage {
                        prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                        completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
                        total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as u32,
                    });
                }
            }

            let Some(choice) = payload["choices"].get(0) else {
                continue;
            };
            let delta = &choice["delta"];

            if let Some(content) = delta["content"].as_str() {
                if !content.is_empty() {
                    let _ = tx.send(StreamEvent::Content { delta: content.to_string() }).await;
                }
            }

            if let Some(deltas) = delta["tool_calls"].as_array() {
                for tc in deltas {
                    let index = tc["index"].as_u64().unwrap_or(0) as u32;
                    let entry = tool_calls.entry(index).or_default();
                    if let Some(id) = tc["id"].as_str() {
                        if !id.is_empty() {
                            entry.id = id.to_string();
                        }
                    }
                    if let Some(name) = tc["function"]["name"].as_str() {
                        entry.name.push_str(name);
                    }
                    if let Some(args) = tc["function"]["arguments"].as_str() {
                        entry.arguments.push_str(args);
                    }
                }
            }
        }
    }

    if !tool_calls.is_empty() {
        let mut calls: Vec<(u32, ToolCallAccumulator)> = tool_calls.into_iter().collect();
        calls.sort_by_key(|(index, _)| *index);
        let calls = calls
            .into_iter()
            .map(|(_, acc)| ToolCall {
                id: acc.id,
                name: acc.name,
                arguments: acc.arguments,
            })
            .collect();
        let _ = tx.send(StreamEvent::ToolCall { calls }).await;
    }

    if let Some(usage) = usage_seen {
        let _ = tx.send(StreamEvent::Usage(usage)).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolSpec;
    use weave_model_registry::WireFormat;

    fn provider() -> Provider {
        Provider::new("openai", WireFormat::OpenAiShaped, "https://api.openai.com/v1", "OPENAI_API_KEY").with_tools(true)
    }

    #[test]
    fn build_request_body_omits_tools_when_empty() {
        let req = CompletionRequest::new(vec![ChatMessage::user("hi")]);
        let body = build_request_body("gpt-4o-mini", &req, false, true);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn build_request_body_includes_tools_when_supported() {
        let req = CompletionRequest::new(vec![ChatMessage::user("hi")]).with_tools(vec![ToolSpec {
            name: "search".to_string(),
            description: None,
            input_schema: serde_json::json!({}),
        }]);
        let body = build_request_body("gpt-4o-mini", &req, false, true);
        assert_eq!(body["tools"][0]["function"]["name"], "search");
    }

    #[test]
    fn build_request_body_strips_tools_when_provider_lacks_support() {
        let req = CompletionRequest::new(vec![ChatMessage::user("hi")]).with_tools(vec![ToolSpec {
            name: "search".to_string(),
            description: None,
            input_schema: serde_json::json!({}),
        }]);
        let body = build_request_body("gpt-4o-mini", &req, false, false);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn bearer_auth_header_for_openai_shaped() {
        let (name, value) = auth_header(&provider(), "sk-test");
        assert_eq!(name, "Authorization");
        assert_eq!(value, "Bearer sk-test");
    }
}
