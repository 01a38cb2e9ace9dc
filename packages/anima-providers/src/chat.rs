//! Chat completions over an OpenAI-style endpoint: tool-calling requests
//! for the agent loop and SSE token streaming for persona chat.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use crate::{Error, Result};
use anima_config::LlmProviderConfig;

#[derive(Clone, Debug, Default)]
pub struct ChatOutcome {
	pub content: Option<String>,
	pub tool_calls: Vec<ToolCall>,
}

#[derive(Clone, Debug)]
pub struct ToolCall {
	pub id: String,
	pub name: String,
	pub arguments: Value,
}

/// One non-streaming completion. `tools` is empty to withhold the tool
/// surface; `json_mode` asks the provider for a JSON object response.
pub async fn complete(
	cfg: &LlmProviderConfig,
	model: &str,
	messages: &[Value],
	tools: &[Value],
	json_mode: bool,
) -> Result<ChatOutcome> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let mut body = serde_json::json!({
		"model": model,
		"temperature": cfg.temperature,
		"messages": messages,
	});

	if !tools.is_empty() {
		body["tools"] = Value::from(tools.to_vec());
	}
	if json_mode {
		body["response_format"] = serde_json::json!({ "type": "json_object" });
	}

	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_chat_response(json)
}

/// Streams a completion, forwarding content deltas into `tokens` as they
/// arrive. Returns the accumulated text. A closed channel stops the
/// forwarding but the accumulated text is still returned.
pub async fn stream_text(
	cfg: &LlmProviderConfig,
	model: &str,
	messages: &[Value],
	tokens: mpsc::Sender<String>,
) -> Result<String> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": model,
		"temperature": cfg.temperature,
		"messages": messages,
		"stream": true,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?
		.error_for_status()?;

	let mut stream = res.bytes_stream();
	let mut buffer = String::new();
	let mut full = String::new();
	let mut channel_open = true;

	while let Some(bytes) = stream.next().await {
		let bytes = bytes?;

		buffer.push_str(&String::from_utf8_lossy(&bytes));

		while let Some(newline) = buffer.find('\n') {
			let line = buffer[..newline].trim().to_string();

			buffer.drain(..=newline);

			let Some(delta) = parse_stream_line(&line) else {
				continue;
			};

			if delta == STREAM_DONE {
				return Ok(full);
			}

			full.push_str(&delta);

			if channel_open && tokens.send(delta).await.is_err() {
				channel_open = false;
			}
		}
	}

	Ok(full)
}

const STREAM_DONE: &str = "\u{0}done";

/// Extracts the content delta from one SSE line; `[DONE]` maps to the
/// internal sentinel, anything else uninteresting to `None`.
fn parse_stream_line(line: &str) -> Option<String> {
	let payload = line.strip_prefix("data:")?.trim();

	if payload == "[DONE]" {
		return Some(STREAM_DONE.to_string());
	}

	let json: Value = serde_json::from_str(payload).ok()?;
	let delta = json.get("choices")?.get(0)?.get("delta")?.get("content")?.as_str()?;

	if delta.is_empty() { None } else { Some(delta.to_string()) }
}

fn parse_chat_response(json: Value) -> Result<ChatOutcome> {
	let message = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.ok_or_else(|| Error::invalid_response("Chat response is missing choices."))?;
	let content = message
		.get("content")
		.and_then(|v| v.as_str())
		.map(str::to_string)
		.filter(|text| !text.trim().is_empty());
	let mut tool_calls = Vec::new();

	if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
		for call in calls {
			let id = call.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
			let function = call
				.get("function")
				.ok_or_else(|| Error::invalid_response("Tool call is missing function."))?;
			let name = function
				.get("name")
				.and_then(|v| v.as_str())
				.ok_or_else(|| Error::invalid_response("Tool call is missing a name."))?
				.to_string();
			let arguments = match function.get("arguments") {
				// Arguments arrive JSON-encoded; a bad payload is kept raw so
				// the dispatcher can hand the model a synthetic error.
				Some(Value::String(raw)) =>
					serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())),
				Some(value) => value.clone(),
				None => Value::Null,
			};

			tool_calls.push(ToolCall { id, name, arguments });
		}
	}

	Ok(ChatOutcome { content, tool_calls })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_final_text_response() {
		let json = serde_json::json!({
			"choices": [
				{ "message": { "content": "[]", "tool_calls": null }, "finish_reason": "stop" }
			]
		});
		let outcome = parse_chat_response(json).expect("parse failed");

		assert_eq!(outcome.content.as_deref(), Some("[]"));
		assert!(outcome.tool_calls.is_empty());
	}

	#[test]
	fn parses_tool_calls_with_encoded_arguments() {
		let json = serde_json::json!({
			"choices": [{
				"message": {
					"content": null,
					"tool_calls": [{
						"id": "call_1",
						"type": "function",
						"function": {
							"name": "search_corpus",
							"arguments": "{\"query\": \"voice\", \"k\": 5}"
						}
					}]
				},
				"finish_reason": "tool_calls"
			}]
		});
		let outcome = parse_chat_response(json).expect("parse failed");

		assert!(outcome.content.is_none());
		assert_eq!(outcome.tool_calls.len(), 1);
		assert_eq!(outcome.tool_calls[0].name, "search_corpus");
		assert_eq!(outcome.tool_calls[0].arguments["query"], "voice");
	}

	#[test]
	fn keeps_malformed_arguments_as_raw_string() {
		let json = serde_json::json!({
			"choices": [{
				"message": {
					"tool_calls": [{
						"id": "call_1",
						"function": { "name": "search_corpus", "arguments": "{broken" }
					}]
				}
			}]
		});
		let outcome = parse_chat_response(json).expect("parse failed");

		assert_eq!(outcome.tool_calls[0].arguments, Value::String("{broken".to_string()));
	}

	#[test]
	fn rejects_empty_choices() {
		let json = serde_json::json!({ "choices": [] });

		assert!(parse_chat_response(json).is_err());
	}

	#[test]
	fn stream_line_extracts_deltas() {
		let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;

		assert_eq!(parse_stream_line(line).as_deref(), Some("Hel"));
		assert_eq!(parse_stream_line("data: [DONE]").as_deref(), Some(STREAM_DONE));
		assert!(parse_stream_line(": keep-alive").is_none());
		assert!(parse_stream_line(r#"data: {"choices":[{"delta":{}}]}"#).is_none());
	}
}
