//! Structured feedback items and the tolerant decoder for model output.
//!
//! Models are asked for a JSON array, but real responses arrive as a bare
//! array, an object wrapping one, or an array buried in prose. Extraction
//! tries those shapes in that order; salvage never runs when the direct
//! parse succeeds.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

const MAX_TITLE_CHARS: usize = 100;

/// Wrapper keys checked when the payload is an object instead of an array.
const WRAPPER_KEYS: [&str; 4] = ["feedback", "items", "analysis", "response"];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
	Issue,
	Suggestion,
	Praise,
	Question,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackCategory {
	Clarity,
	Style,
	Logic,
	Evidence,
	Structure,
	Voice,
	Craft,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSeverity {
	Low,
	Medium,
	High,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextPosition {
	pub start: usize,
	pub end: usize,
	pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorpusSource {
	pub text: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub source_file: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub relevance: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedbackItem {
	pub id: Uuid,
	pub r#type: FeedbackType,
	pub category: FeedbackCategory,
	pub title: String,
	pub content: String,
	pub severity: FeedbackSeverity,
	pub confidence: f32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub suggested_revision: Option<String>,
	/// Corpus chunk ids the model cited; resolved into `corpus_sources`
	/// when they match hits seen during the run.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub sources: Vec<String>,
	#[serde(default)]
	pub corpus_sources: Vec<CorpusSource>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub positions: Vec<TextPosition>,
}

/// Pulls candidate feedback objects out of a raw model response.
///
/// Returns an empty list when no array can be located at all.
pub fn extract_feedback_values(text: &str) -> Vec<Value> {
	if let Ok(value) = serde_json::from_str::<Value>(text) {
		if let Some(values) = as_item_array(&value) {
			return values;
		}
	}

	if let Some(candidate) = balanced_array(text)
		&& let Ok(value) = serde_json::from_str::<Value>(candidate)
		&& let Some(values) = as_item_array(&value)
	{
		return values;
	}

	Vec::new()
}

fn as_item_array(value: &Value) -> Option<Vec<Value>> {
	if let Some(items) = value.as_array() {
		return Some(items.clone());
	}
	if let Some(object) = value.as_object() {
		for key in WRAPPER_KEYS {
			if let Some(items) = object.get(key).and_then(Value::as_array) {
				return Some(items.clone());
			}
		}
	}

	None
}

/// Finds the first balanced top-level JSON array in free text, honoring
/// string literals and escapes so brackets inside quotes do not count.
fn balanced_array(text: &str) -> Option<&str> {
	let bytes = text.as_bytes();
	let start = text.find('[')?;
	let mut depth = 0_usize;
	let mut in_string = false;
	let mut escaped = false;

	for (offset, byte) in bytes[start..].iter().enumerate() {
		if escaped {
			escaped = false;

			continue;
		}

		match byte {
			b'\\' if in_string => escaped = true,
			b'"' => in_string = !in_string,
			b'[' if !in_string => depth += 1,
			b']' if !in_string => {
				depth -= 1;

				if depth == 0 {
					return Some(&text[start..start + offset + 1]);
				}
			},
			_ => {},
		}
	}

	None
}

/// Decodes one feedback object leniently, mirroring the field aliases
/// models actually emit. Returns the reason when the item is unusable.
pub fn decode_feedback_item(value: &Value) -> Result<FeedbackItem, String> {
	let object = value.as_object().ok_or_else(|| "item is not an object".to_string())?;
	let content = first_string(object, &[
		"content",
		"feedback",
		"recommendation",
		"action",
		"suggestion",
		"rationale",
	])
	.ok_or_else(|| "item has no content".to_string())?;

	if content.trim().is_empty() {
		return Err("item content is empty".to_string());
	}

	let title = first_string(object, &["title", "item", "issue", "area", "location"])
		.unwrap_or_else(|| "Feedback".to_string());
	let title = truncate_chars(&title, MAX_TITLE_CHARS);
	let r#type = object
		.get("type")
		.and_then(Value::as_str)
		.and_then(parse_type)
		.unwrap_or(FeedbackType::Suggestion);
	let category = object
		.get("category")
		.and_then(Value::as_str)
		.and_then(parse_category)
		.unwrap_or(FeedbackCategory::Style);
	let severity = object
		.get("severity")
		.and_then(Value::as_str)
		.and_then(parse_severity)
		.unwrap_or(FeedbackSeverity::Medium);
	let confidence =
		object.get("confidence").and_then(Value::as_f64).unwrap_or(0.7).clamp(0.0, 1.0) as f32;
	let suggested_revision = first_string(object, &["suggested_revision", "revision"]);
	let sources = string_list(object, &["sources", "corpus_chunk_ids"]);
	let corpus_sources = decode_corpus_sources(object);
	let positions = decode_positions(object);

	Ok(FeedbackItem {
		id: Uuid::new_v4(),
		r#type,
		category,
		title,
		content,
		severity,
		confidence,
		suggested_revision,
		sources,
		corpus_sources,
		positions,
	})
}

fn parse_type(raw: &str) -> Option<FeedbackType> {
	match raw.to_ascii_lowercase().as_str() {
		"issue" => Some(FeedbackType::Issue),
		"suggestion" => Some(FeedbackType::Suggestion),
		"praise" => Some(FeedbackType::Praise),
		"question" => Some(FeedbackType::Question),
		_ => None,
	}
}

fn parse_category(raw: &str) -> Option<FeedbackCategory> {
	match raw.to_ascii_lowercase().as_str() {
		"clarity" => Some(FeedbackCategory::Clarity),
		"style" => Some(FeedbackCategory::Style),
		"logic" => Some(FeedbackCategory::Logic),
		"evidence" => Some(FeedbackCategory::Evidence),
		"structure" => Some(FeedbackCategory::Structure),
		"voice" => Some(FeedbackCategory::Voice),
		"craft" => Some(FeedbackCategory::Craft),
		_ => None,
	}
}

fn parse_severity(raw: &str) -> Option<FeedbackSeverity> {
	match raw.to_ascii_lowercase().as_str() {
		"low" => Some(FeedbackSeverity::Low),
		"medium" => Some(FeedbackSeverity::Medium),
		"high" => Some(FeedbackSeverity::High),
		_ => None,
	}
}

fn first_string(object: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
	keys.iter().find_map(|key| {
		object.get(*key).and_then(Value::as_str).map(str::to_string).filter(|s| !s.is_empty())
	})
}

fn string_list(object: &serde_json::Map<String, Value>, keys: &[&str]) -> Vec<String> {
	for key in keys {
		if let Some(items) = object.get(*key).and_then(Value::as_array) {
			return items.iter().filter_map(Value::as_str).map(str::to_string).collect();
		}
	}

	Vec::new()
}

fn decode_corpus_sources(object: &serde_json::Map<String, Value>) -> Vec<CorpusSource> {
	for key in ["corpus_sources", "corpus_references", "grounding"] {
		let Some(items) = object.get(key).and_then(Value::as_array) else {
			continue;
		};

		return items
			.iter()
			.filter_map(|item| match item {
				Value::String(text) if !text.trim().is_empty() =>
					Some(CorpusSource { text: text.clone(), source_file: None, relevance: None }),
				Value::Object(fields) => {
					let text = fields.get("text").and_then(Value::as_str)?.to_string();

					if text.trim().is_empty() {
						return None;
					}

					Some(CorpusSource {
						text,
						source_file: fields
							.get("source_file")
							.and_then(Value::as_str)
							.map(str::to_string),
						relevance: fields
							.get("relevance")
							.and_then(Value::as_str)
							.map(str::to_string),
					})
				},
				_ => None,
			})
			.collect();
	}

	Vec::new()
}

fn decode_positions(object: &serde_json::Map<String, Value>) -> Vec<TextPosition> {
	for key in ["positions", "text_positions"] {
		let Some(items) = object.get(key).and_then(Value::as_array) else {
			continue;
		};

		return items
			.iter()
			.filter_map(|item| {
				let fields = item.as_object()?;
				let start = fields.get("start").and_then(Value::as_u64)? as usize;
				let end = fields.get("end").and_then(Value::as_u64)? as usize;
				let text = fields.get("text").and_then(Value::as_str)?.to_string();

				if end < start {
					return None;
				}

				Some(TextPosition { start, end, text })
			})
			.collect();
	}

	Vec::new()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
	if text.chars().count() <= max_chars {
		return text.to_string();
	}

	text.chars().take(max_chars).collect()
}
