//! "Speak as the persona" chat over the same retrieval tools.
//!
//! The model gets one self-orchestrated tool round: its first completion
//! either answers directly or issues searches. When it searched, the final
//! answer is produced by a streaming call over the accumulated messages so
//! tokens reach the client as they arrive.

use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
	AnimaService, Error, Result, prompt,
	tools::{CorpusSearch, RetrievalTools, SEARCH_CORPUS_TOOL, SearchMode, tool_definitions},
};
use anima_domain::Frame;

#[derive(Clone, Debug, Deserialize)]
pub struct ChatTurn {
	pub role: String,
	pub content: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChatRequest {
	pub message: String,
	pub persona_id: Uuid,
	pub user_id: String,
	#[serde(default)]
	pub conversation_history: Vec<ChatTurn>,
	#[serde(default)]
	pub model: Option<String>,
}

impl AnimaService {
	/// Streaming chat; the stream always ends with exactly one terminal
	/// frame unless the client has already gone away.
	pub async fn chat_stream(self: Arc<Self>, request: ChatRequest, tx: mpsc::Sender<Frame>) {
		match self.chat_stream_inner(&request, &tx).await {
			Ok(()) => {},
			Err(Error::Canceled) => {
				tracing::info!("Client closed the chat stream; run canceled.");
			},
			Err(err) => {
				tracing::warn!(error = %err, "Chat run failed.");

				let _ = tx.send(Frame::error(err.kind(), err.to_string())).await;
			},
		}
	}

	async fn chat_stream_inner(
		&self,
		request: &ChatRequest,
		tx: &mpsc::Sender<Frame>,
	) -> Result<()> {
		let started = Instant::now();

		if request.message.trim().is_empty() {
			return Err(Error::validation("empty message"));
		}

		let persona = self.authorize(&request.user_id, request.persona_id).await?;
		let model = self.resolve_model(&persona, request.model.as_deref())?;

		send(tx, Frame::stage_status(format!("Speaking as {}.", persona.name), "init")).await?;

		let corpus_ready = persona.chunk_count > 0
			&& self.index.collection_exists(&persona.collection_id).await.unwrap_or(false);
		let system = prompt::persona_voice(&persona.name, persona.description.as_deref());
		let mut messages = vec![serde_json::json!({ "role": "system", "content": system })];

		for turn in &request.conversation_history {
			if turn.role == "user" || turn.role == "assistant" {
				messages
					.push(serde_json::json!({ "role": turn.role, "content": turn.content }));
			}
		}

		messages.push(serde_json::json!({ "role": "user", "content": request.message }));

		if corpus_ready {
			let searcher = RetrievalTools::new(self, persona.collection_id.clone());

			self.chat_tool_round(&searcher, &model, &mut messages, tx).await?;
		}

		let (token_tx, mut token_rx) = mpsc::channel::<String>(64);
		let llm = self.cfg.providers.llm.clone();
		let chat = self.providers.chat.clone();
		let stream_model = model.clone();
		let stream_messages = messages.clone();
		let producer = tokio::spawn(async move {
			chat.stream_text(&llm, &stream_model, &stream_messages, token_tx).await
		});

		while let Some(token) = token_rx.recv().await {
			send(tx, Frame::token(token)).await?;
		}

		let response = producer
			.await
			.map_err(|err| Error::Provider { message: err.to_string() })??;

		send(tx, Frame::chat_complete(response, started.elapsed().as_secs_f64())).await?;

		Ok(())
	}

	/// One tool round: if the model's first move is to search, run the
	/// searches and append their results. A direct answer is discarded in
	/// favor of the streaming call that follows.
	async fn chat_tool_round(
		&self,
		searcher: &RetrievalTools,
		model: &str,
		messages: &mut Vec<Value>,
		tx: &mpsc::Sender<Frame>,
	) -> Result<()> {
		let definitions =
			tool_definitions(self.cfg.retrieval.default_k, self.cfg.retrieval.max_k);
		let outcome = self
			.providers
			.chat
			.complete(&self.cfg.providers.llm, model, messages, &definitions)
			.await?;

		if outcome.tool_calls.is_empty() {
			return Ok(());
		}

		messages.push(serde_json::json!({
			"role": "assistant",
			"content": outcome.content,
			"tool_calls": outcome
				.tool_calls
				.iter()
				.map(|call| {
					serde_json::json!({
						"id": call.id,
						"type": "function",
						"function": {
							"name": call.name,
							"arguments": call.arguments.to_string(),
						},
					})
				})
				.collect::<Vec<_>>(),
		}));

		let timeout = Duration::from_millis(self.cfg.agent.tool_timeout_ms);

		for call in &outcome.tool_calls {
			let result = if call.name == SEARCH_CORPUS_TOOL {
				let query =
					call.arguments.get("query").and_then(Value::as_str).unwrap_or_default();
				let mode = call
					.arguments
					.get("mode")
					.and_then(Value::as_str)
					.and_then(SearchMode::parse)
					.unwrap_or(SearchMode::Hybrid);
				let k = call
					.arguments
					.get("k")
					.and_then(Value::as_u64)
					.unwrap_or(self.cfg.retrieval.default_k as u64) as usize;

				send(
					tx,
					Frame::tool_status(
						format!("Searching corpus (query={query:?}, mode={}).", mode.as_str()),
						SEARCH_CORPUS_TOOL,
					),
				)
				.await?;

				match tokio::time::timeout(timeout, searcher.search(query, mode, k)).await {
					Err(_) => serde_json::json!({ "error": "timeout" }),
					Ok(Err(err)) =>
						serde_json::json!({ "error": format!("{}: {err}", err.kind()) }),
					Ok(Ok(result)) => Value::from(
						result
							.hits
							.iter()
							.map(|hit| {
								serde_json::json!({
									"chunk_id": hit.chunk_id,
									"text": hit.text,
									"source_filename": hit.source_filename,
									"score": hit.score,
								})
							})
							.collect::<Vec<_>>(),
					),
				}
			} else {
				serde_json::json!({ "error": format!("unknown tool: {}", call.name) })
			};

			messages.push(serde_json::json!({
				"role": "tool",
				"tool_call_id": call.id,
				"content": result.to_string(),
			}));
		}

		Ok(())
	}
}

async fn send(tx: &mpsc::Sender<Frame>, frame: Frame) -> Result<()> {
	tx.send(frame).await.map_err(|_| Error::Canceled)
}
