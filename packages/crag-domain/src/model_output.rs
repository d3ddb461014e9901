//! Parsers for free-form language model replies.
//!
//! Models wrap JSON in code fences, prepend reasoning blocks, or answer with a bare token. Every
//! parser here first runs [`sanitize`] and then tries its accepted shapes in a fixed order.

use serde::Deserialize;
use serde_json::Value;

const PREVIEW_CHARS: usize = 160;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
	/// The payload does not start like JSON.
	#[error("Model output is not JSON: {preview}")]
	NotJson { preview: String },
	/// The payload looks like JSON but does not match the expected shape.
	#[error("Model output is malformed ({message}): {preview}")]
	Malformed { preview: String, message: String },
	/// No accepted shape matched.
	#[error("Model output has no recognized shape: {preview}")]
	Unrecognized { preview: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewriteEntry {
	pub question: String,
	pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
	Object,
	Array,
	Token,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingVerdict {
	pub requires_retrieval: bool,
	pub source: VerdictSource,
}

#[derive(Debug, Deserialize)]
struct RawRewriteEntry {
	#[serde(alias = "StandaloneQuestion", alias = "standalone_question", alias = "question")]
	#[serde(rename = "standaloneQuestion", default)]
	question: Option<String>,
	#[serde(alias = "Score", default)]
	score: Option<f64>,
}

/// Strips code fences and the first `<think>` block, then trims.
pub fn sanitize(raw: &str) -> String {
	let mut text = raw.to_string();

	if let Some(start) = text.find("<think>") {
		match text[start..].find("</think>") {
			Some(end) => text.replace_range(start..start + end + "</think>".len(), ""),
			None => text.truncate(start),
		}
	}

	text.replace("```json", "").replace("```JSON", "").replace("```", "").trim().to_string()
}

pub fn looks_like_json(text: &str) -> bool {
	text.starts_with('[') || text.starts_with('{')
}

/// First characters of `text` on a single line, for log messages.
pub fn preview(text: &str) -> String {
	let flattened: String =
		text.chars().map(|ch| if ch.is_control() { ' ' } else { ch }).collect();

	if flattened.chars().count() <= PREVIEW_CHARS {
		return flattened;
	}

	let mut out: String = flattened.chars().take(PREVIEW_CHARS).collect();

	out.push_str("...");

	out
}

/// Rewriter output: a JSON array of entries, or a single entry object.
///
/// Entries without question text are skipped; a missing or non-finite score counts as zero.
pub fn parse_rewrite_entries(raw: &str) -> Result<Vec<RewriteEntry>, ParseError> {
	let text = sanitize(raw);

	if !looks_like_json(&text) {
		return Err(ParseError::NotJson { preview: preview(&text) });
	}

	let value: Value = serde_json::from_str(&text)
		.map_err(|err| ParseError::Malformed { preview: preview(&text), message: err.to_string() })?;
	let items = match value {
		Value::Array(items) => items,
		object @ Value::Object(_) => vec![object],
		_ => return Err(ParseError::Unrecognized { preview: preview(&text) }),
	};
	let mut entries = Vec::with_capacity(items.len());

	for item in items {
		let Ok(raw_entry) = serde_json::from_value::<RawRewriteEntry>(item) else {
			continue;
		};
		let Some(question) = raw_entry.question.map(|question| question.trim().to_string()) else {
			continue;
		};

		if question.is_empty() {
			continue;
		}

		let score = raw_entry.score.map(|score| score as f32).filter(|score| score.is_finite());

		entries.push(RewriteEntry { question, score: score.unwrap_or(0.0) });
	}

	Ok(entries)
}

/// Router output, tried as `{"requiresRAG": bool}`, then an array of such objects, then a bare
/// `true`/`false` first word.
pub fn parse_routing_verdict(raw: &str) -> Result<RoutingVerdict, ParseError> {
	let text = sanitize(raw);

	if looks_like_json(&text)
		&& let Ok(value) = serde_json::from_str::<Value>(&text)
	{
		match &value {
			Value::Object(_) => {
				if let Some(flag) = verdict_flag(&value) {
					return Ok(RoutingVerdict {
						requires_retrieval: flag,
						source: VerdictSource::Object,
					});
				}
			},
			Value::Array(items) => {
				if let Some(flag) = items.first().and_then(verdict_flag) {
					return Ok(RoutingVerdict {
						requires_retrieval: flag,
						source: VerdictSource::Array,
					});
				}
			},
			_ => {},
		}
	}

	let first_word = text
		.split(|ch: char| ch.is_whitespace() || matches!(ch, '.' | ',' | ':' | ';' | '!'))
		.find(|word| !word.is_empty())
		.map(str::to_lowercase);

	match first_word.as_deref() {
		Some("true") => {
			Ok(RoutingVerdict { requires_retrieval: true, source: VerdictSource::Token })
		},
		Some("false") => {
			Ok(RoutingVerdict { requires_retrieval: false, source: VerdictSource::Token })
		},
		_ => Err(ParseError::Unrecognized { preview: preview(&text) }),
	}
}

/// Fact-check marker: `Some(true)` for `Score: YES`, `Some(false)` for `Score: NO`.
pub fn parse_fact_check(raw: &str) -> Option<bool> {
	let text = sanitize(raw).to_uppercase();
	let compact: String = text.split_whitespace().collect::<Vec<_>>().join(" ");

	if compact.contains("SCORE: YES") {
		Some(true)
	} else if compact.contains("SCORE: NO") {
		Some(false)
	} else {
		None
	}
}

/// Text of a fact-check reply with the score marker removed.
pub fn fact_check_explanation(raw: &str) -> Option<String> {
	let text = sanitize(raw);
	let explanation: Vec<&str> = text
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty() && !line.to_uppercase().starts_with("SCORE:"))
		.collect();

	if explanation.is_empty() { None } else { Some(explanation.join(" ")) }
}

fn verdict_flag(value: &Value) -> Option<bool> {
	let object = value.as_object()?;
	let flag = ["requiresRAG", "requiresRag", "requires_rag", "rag"]
		.iter()
		.find_map(|key| object.get(*key))?;

	match flag {
		Value::Bool(flag) => Some(*flag),
		Value::String(text) => match text.trim().to_lowercase().as_str() {
			"true" | "yes" => Some(true),
			"false" | "no" => Some(false),
			_ => None,
		},
		_ => None,
	}
}
