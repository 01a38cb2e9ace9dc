//! Frames carried on the streaming transport.
//!
//! A stream is an interleaving of `status`, `feedback`, and `token` frames
//! followed by exactly one terminal `complete` or `error` frame.

use serde::Serialize;

use crate::feedback::FeedbackItem;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
	Status {
		message: String,
		#[serde(skip_serializing_if = "Option::is_none")]
		tool: Option<String>,
		#[serde(skip_serializing_if = "Option::is_none")]
		stage: Option<String>,
	},
	Feedback {
		item: FeedbackItem,
	},
	Token {
		content: String,
	},
	Complete {
		#[serde(skip_serializing_if = "Option::is_none")]
		total_items: Option<usize>,
		processing_time_seconds: f64,
		#[serde(skip_serializing_if = "Option::is_none")]
		partial: Option<bool>,
		#[serde(skip_serializing_if = "Option::is_none")]
		response: Option<String>,
	},
	Error {
		message: String,
		kind: String,
	},
}

impl Frame {
	pub fn status(message: impl Into<String>) -> Self {
		Self::Status { message: message.into(), tool: None, stage: None }
	}

	pub fn tool_status(message: impl Into<String>, tool: impl Into<String>) -> Self {
		Self::Status { message: message.into(), tool: Some(tool.into()), stage: None }
	}

	pub fn stage_status(message: impl Into<String>, stage: impl Into<String>) -> Self {
		Self::Status { message: message.into(), tool: None, stage: Some(stage.into()) }
	}

	pub fn feedback(item: FeedbackItem) -> Self {
		Self::Feedback { item }
	}

	pub fn token(content: impl Into<String>) -> Self {
		Self::Token { content: content.into() }
	}

	pub fn analysis_complete(total_items: usize, processing_time_seconds: f64, partial: bool) -> Self {
		Self::Complete {
			total_items: Some(total_items),
			processing_time_seconds,
			partial: partial.then_some(true),
			response: None,
		}
	}

	pub fn chat_complete(response: impl Into<String>, processing_time_seconds: f64) -> Self {
		Self::Complete {
			total_items: None,
			processing_time_seconds,
			partial: None,
			response: Some(response.into()),
		}
	}

	pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
		Self::Error { message: message.into(), kind: kind.into() }
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Complete { .. } | Self::Error { .. })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn serializes_with_type_tag() {
		let frame = Frame::status("working");
		let json = serde_json::to_value(&frame).expect("serialize failed");

		assert_eq!(json["type"], "status");
		assert_eq!(json["message"], "working");
		assert!(json.get("tool").is_none());
	}

	#[test]
	fn complete_omits_absent_fields() {
		let frame = Frame::analysis_complete(3, 1.25, false);
		let json = serde_json::to_value(&frame).expect("serialize failed");

		assert_eq!(json["total_items"], 3);
		assert!(json.get("partial").is_none());
		assert!(json.get("response").is_none());

		let partial = Frame::analysis_complete(1, 0.5, true);
		let json = serde_json::to_value(&partial).expect("serialize failed");

		assert_eq!(json["partial"], true);
	}

	#[test]
	fn terminal_detection() {
		assert!(Frame::error("ValidationError", "empty draft").is_terminal());
		assert!(Frame::chat_complete("hi", 0.1).is_terminal());
		assert!(!Frame::token("hi").is_terminal());
		assert!(!Frame::status("x").is_terminal());
	}
}
