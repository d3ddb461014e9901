//! OpenAI-compatible chat completions, one-shot and streamed over server-sent events.

use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::{Error, Result};
use crag_domain::conversation::ChatMessage;

pub async fn generate(
	cfg: &crag_config::LlmProviderConfig,
	messages: &[ChatMessage],
) -> Result<String> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let res = client
		.post(crate::endpoint(&cfg.api_base, &cfg.path))
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&request_body(cfg, messages, false))
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_completion(&json)
}

/// Streams content deltas into `sink` and returns the concatenated reply.
///
/// A closed sink does not stop the request; the full reply is still collected.
pub async fn stream(
	cfg: &crag_config::LlmProviderConfig,
	messages: &[ChatMessage],
	sink: &UnboundedSender<String>,
) -> Result<String> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let res = client
		.post(crate::endpoint(&cfg.api_base, &cfg.path))
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&request_body(cfg, messages, true))
		.send()
		.await?
		.error_for_status()?;
	let mut bytes = res.bytes_stream();
	let mut decoder = SseDecoder::default();
	let mut reply = String::new();

	'outer: while let Some(chunk) = bytes.next().await {
		let chunk = chunk?;

		for event in decoder.push(&chunk) {
			match event {
				SseEvent::Done => break 'outer,
				SseEvent::Data(payload) => match parse_delta(&payload) {
					Ok(Some(delta)) => {
						reply.push_str(&delta);

						let _ = sink.send(delta);
					},
					Ok(None) => {},
					Err(err) => {
						tracing::warn!(
							error = %err,
							payload = %crag_domain::model_output::preview(&payload),
							"Skipping unreadable stream chunk."
						);
					},
				},
			}
		}
	}

	for event in decoder.finish() {
		if let SseEvent::Data(payload) = event
			&& let Ok(Some(delta)) = parse_delta(&payload)
		{
			reply.push_str(&delta);

			let _ = sink.send(delta);
		}
	}

	Ok(reply)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SseEvent {
	Data(String),
	Done,
}

/// Line-oriented decoder for `data:` frames split across arbitrary chunk boundaries.
///
/// Bytes are buffered until a full line arrives, so a multi-byte character split between chunks
/// decodes intact.
#[derive(Debug, Default)]
struct SseDecoder {
	buffer: Vec<u8>,
}
impl SseDecoder {
	fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
		self.buffer.extend_from_slice(chunk);

		let mut events = Vec::new();

		while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
			let line: Vec<u8> = self.buffer.drain(..=newline).collect();

			if let Some(event) = decode_bytes(&line) {
				events.push(event);
			}
		}

		events
	}

	fn finish(&mut self) -> Vec<SseEvent> {
		let rest = std::mem::take(&mut self.buffer);

		decode_bytes(&rest).into_iter().collect()
	}
}

fn decode_bytes(line: &[u8]) -> Option<SseEvent> {
	match std::str::from_utf8(line) {
		Ok(line) => decode_line(line),
		Err(err) => {
			tracing::warn!(error = %err, "Skipping stream line that is not UTF-8.");

			None
		},
	}
}

fn decode_line(line: &str) -> Option<SseEvent> {
	let payload = line.trim().strip_prefix("data:")?.trim();

	if payload.is_empty() {
		return None;
	}
	if payload == "[DONE]" {
		return Some(SseEvent::Done);
	}

	Some(SseEvent::Data(payload.to_string()))
}

fn request_body(
	cfg: &crag_config::LlmProviderConfig,
	messages: &[ChatMessage],
	stream: bool,
) -> Value {
	serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages,
		"stream": stream,
	})
}

fn parse_completion(json: &Value) -> Result<String> {
	json.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.map(str::to_string)
		.ok_or_else(|| Error::InvalidResponse {
			message: "Chat response is missing message content.".to_string(),
		})
}

fn parse_delta(payload: &str) -> Result<Option<String>> {
	let json: Value = serde_json::from_str(payload)?;
	let delta = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("delta"))
		.and_then(|delta| delta.get("content"))
		.and_then(|c| c.as_str())
		.filter(|c| !c.is_empty())
		.map(str::to_string);

	Ok(delta)
}
