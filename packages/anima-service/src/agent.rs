//! The bounded tool-calling loop that turns a draft into structured,
//! corpus-grounded feedback while streaming telemetry frames.
//!
//! The model self-orchestrates retrieval: it decides when and how often to
//! search. The loop enforces a hard iteration cap, a soft tool-call cap
//! (after which the tool schemas are withheld so the model finalizes), a
//! per-tool timeout, and a request deadline.

use std::{
	collections::HashMap,
	sync::Arc,
	time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
	AnimaService, ChatProvider, Error, Result, prompt,
	tools::{self, CITE_TOOL, CorpusSearch, RetrievalTools, SEARCH_CORPUS_TOOL, SearchMode},
};
use anima_domain::{CorpusSource, FeedbackItem, Frame, feedback};
use anima_index::RetrievalHit;
use anima_providers::chat::{ChatOutcome, ToolCall};

/// Ceiling applied to items emitted for a persona without a corpus.
pub const NO_CORPUS_CONFIDENCE_CAP: f32 = 0.3;
/// Per-request cap on `max_feedback_items`.
pub const MAX_FEEDBACK_ITEMS_LIMIT: usize = 50;

const MAX_CONSECUTIVE_TOOL_FAILURES: u32 = 3;
const FEEDBACK_HISTORY_TURNS: usize = 3;
const FRAME_BUFFER: usize = 256;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AnalysisContext {
	#[serde(default)]
	pub purpose: Option<String>,
	#[serde(default)]
	pub criteria: Vec<String>,
	/// Prior exchanges as `{role, content}` objects; the last few are
	/// replayed ahead of the draft.
	#[serde(default)]
	pub feedback_history: Vec<Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AnalysisRequest {
	pub content: String,
	pub persona_id: Uuid,
	pub user_id: String,
	#[serde(default)]
	pub context: Option<AnalysisContext>,
	#[serde(default = "default_max_feedback_items")]
	pub max_feedback_items: usize,
	#[serde(default)]
	pub model: Option<String>,
}

fn default_max_feedback_items() -> usize {
	10
}

#[derive(Clone, Debug, Serialize)]
pub struct AnalysisResponse {
	pub persona_id: Uuid,
	pub persona_name: String,
	pub items: Vec<FeedbackItem>,
	pub total_items: usize,
	pub processing_time_seconds: f64,
}

#[derive(Clone, Debug, Default)]
pub struct RunSummary {
	pub items: Vec<FeedbackItem>,
	pub partial: bool,
	pub iterations: u32,
	pub tool_calls: u32,
}

pub struct AgentLoop {
	pub agent: anima_config::Agent,
	pub llm: anima_config::LlmProviderConfig,
	pub model: String,
	pub chat: Arc<dyn ChatProvider>,
	/// `None` when the persona has no searchable corpus; the loop then
	/// withholds tools and caps item confidence.
	pub searcher: Option<Arc<dyn CorpusSearch>>,
	pub persona_name: String,
	pub default_k: u32,
	pub max_k: u32,
	pub max_feedback_items: usize,
}

impl AgentLoop {
	/// Drives one analysis to a terminal frame. Exactly one `complete` or
	/// `error` frame is emitted unless the client goes away, in which case
	/// nothing further is sent and `Canceled` is returned.
	pub async fn run(
		&self,
		draft: &str,
		context: &AnalysisContext,
		tx: &mpsc::Sender<Frame>,
	) -> Result<RunSummary> {
		let started = Instant::now();

		if draft.trim().is_empty() {
			let message = "empty draft";

			send(tx, Frame::error("ValidationError", message)).await?;

			return Err(Error::validation(message));
		}

		send(tx, Frame::stage_status(format!("Initializing {}.", self.persona_name), "init"))
			.await?;

		if self.searcher.is_none() {
			send(tx, Frame::status("no corpus indexed")).await?;
		}

		let deadline = Duration::from_millis(self.agent.request_timeout_ms);

		match tokio::time::timeout(deadline, self.drive(draft, context, started, tx)).await {
			Ok(result) => result,
			Err(_) => {
				let message = format!("analysis timed out after {} seconds", deadline.as_secs());

				send(tx, Frame::error("ModelTimeout", &message)).await?;

				Err(Error::ModelTimeout { message })
			},
		}
	}

	async fn drive(
		&self,
		draft: &str,
		context: &AnalysisContext,
		started: Instant,
		tx: &mpsc::Sender<Frame>,
	) -> Result<RunSummary> {
		let system =
			prompt::writing_critic(&self.persona_name, self.max_feedback_items, self.searcher.is_some());
		let mut messages = vec![serde_json::json!({ "role": "system", "content": system })];

		for turn in history_turns(context) {
			messages.push(turn);
		}

		messages.push(
			serde_json::json!({ "role": "user", "content": prompt::analysis_query(draft, context) }),
		);

		let definitions = tools::tool_definitions(self.default_k, self.max_k);
		let mut seen_hits: HashMap<Uuid, RetrievalHit> = HashMap::new();
		let mut tool_calls_used = 0_u32;
		let mut consecutive_failures = 0_u32;
		let mut last_text: Option<String> = None;

		for iteration in 1..=self.agent.max_iterations {
			let offered: &[Value] = match &self.searcher {
				Some(_) if tool_calls_used < self.agent.max_tool_calls => &definitions,
				_ => &[],
			};
			let outcome =
				match self.chat.complete(&self.llm, &self.model, &messages, offered).await {
					Ok(outcome) => outcome,
					Err(err) => {
						send(tx, Frame::error(err.kind(), err.to_string())).await?;

						return Err(err);
					},
				};

			if let Some(content) = &outcome.content {
				last_text = Some(content.clone());
			}

			// Tool calls made while the schemas were withheld (soft cap
			// reached) are not executed; the model is steered to finalize.
			if !outcome.tool_calls.is_empty()
				&& !offered.is_empty()
				&& let Some(searcher) = &self.searcher
			{
				messages.push(assistant_tool_message(&outcome));

				for call in &outcome.tool_calls {
					let (result, failed) =
						self.dispatch_tool(searcher.as_ref(), call, &mut seen_hits, tx).await?;

					if failed {
						consecutive_failures += 1;

						if consecutive_failures >= MAX_CONSECUTIVE_TOOL_FAILURES {
							let message = format!(
								"{consecutive_failures} consecutive tool failures; aborting"
							);

							send(tx, Frame::error("ToolExhaustion", &message)).await?;

							return Err(Error::ToolExhaustion { message });
						}
					} else {
						consecutive_failures = 0;
					}

					messages.push(serde_json::json!({
						"role": "tool",
						"tool_call_id": call.id,
						"content": result.to_string(),
					}));

					tool_calls_used += 1;
				}

				continue;
			}

			if let Some(content) = outcome.content {
				let items = self.collect_items(&content, &seen_hits);

				if items.is_empty() {
					let message = "no feedback items could be parsed from the model response";

					send(tx, Frame::error("ValidationError", message)).await?;

					return Err(Error::validation(message));
				}

				return self
					.finish(items, false, iteration, tool_calls_used, started, tx)
					.await;
			}

			// Neither tool calls nor content; let the next iteration ask
			// again.
			tracing::warn!(iteration, "Model returned an empty response.");
		}

		// Iteration cap: salvage whatever the last assistant text parses to.
		let salvaged = last_text
			.as_deref()
			.map(|text| self.collect_items(text, &seen_hits))
			.unwrap_or_default();

		if salvaged.is_empty() {
			let message =
				format!("agent did not finalize within {} iterations", self.agent.max_iterations);

			send(tx, Frame::error("IterationCap", &message)).await?;

			return Err(Error::IterationCap { message });
		}

		self.finish(salvaged, true, self.agent.max_iterations, tool_calls_used, started, tx).await
	}

	async fn finish(
		&self,
		items: Vec<FeedbackItem>,
		partial: bool,
		iterations: u32,
		tool_calls: u32,
		started: Instant,
		tx: &mpsc::Sender<Frame>,
	) -> Result<RunSummary> {
		for item in &items {
			send(tx, Frame::feedback(item.clone())).await?;
		}

		send(tx, Frame::analysis_complete(items.len(), started.elapsed().as_secs_f64(), partial))
			.await?;

		tracing::info!(
			iterations,
			tool_calls,
			items = items.len(),
			partial,
			"Analysis run finished."
		);

		Ok(RunSummary { items, partial, iterations, tool_calls })
	}

	/// Executes one tool call under the per-tool timeout. Failures come
	/// back as a synthetic `{"error": ...}` result for the model; the
	/// boolean reports whether this dispatch counts toward the
	/// consecutive-failure abort.
	async fn dispatch_tool(
		&self,
		searcher: &dyn CorpusSearch,
		call: &ToolCall,
		seen_hits: &mut HashMap<Uuid, RetrievalHit>,
		tx: &mpsc::Sender<Frame>,
	) -> Result<(Value, bool)> {
		let timeout = Duration::from_millis(self.agent.tool_timeout_ms);

		match call.name.as_str() {
			SEARCH_CORPUS_TOOL => {
				let Some(query) = call.arguments.get("query").and_then(Value::as_str) else {
					send(
						tx,
						Frame::tool_status(
							"search_corpus called without a query.",
							SEARCH_CORPUS_TOOL,
						),
					)
					.await?;

					return Ok((
						serde_json::json!({ "error": "ValidationError: query is required" }),
						true,
					));
				};
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
					.unwrap_or(self.default_k as u64) as usize;

				match tokio::time::timeout(timeout, searcher.search(query, mode, k)).await {
					Err(_) => {
						send(
							tx,
							search_status(query, mode, k, None, Some(timeout.as_secs())),
						)
						.await?;

						Ok((serde_json::json!({ "error": "timeout" }), true))
					},
					Ok(Err(err)) => {
						send(
							tx,
							Frame::tool_status(
								format!("search_corpus failed: {err}"),
								SEARCH_CORPUS_TOOL,
							),
						)
						.await?;

						Ok((
							serde_json::json!({
								"error": format!("{}: {err}", err.kind()),
							}),
							true,
						))
					},
					Ok(Ok(outcome)) => {
						for hit in &outcome.hits {
							seen_hits.insert(hit.chunk_id, hit.clone());
						}

						send(
							tx,
							search_status(query, mode, k, Some(outcome.hits.len()), None),
						)
						.await?;

						let results: Vec<Value> = outcome
							.hits
							.iter()
							.map(|hit| {
								serde_json::json!({
									"chunk_id": hit.chunk_id,
									"text": hit.text,
									"source_filename": hit.source_filename,
									"score": hit.score,
									"mode": mode.as_str(),
								})
							})
							.collect();

						Ok((Value::from(results), false))
					},
				}
			},
			CITE_TOOL => {
				let chunk_id = call
					.arguments
					.get("chunk_id")
					.and_then(Value::as_str)
					.and_then(|raw| Uuid::parse_str(raw).ok());
				let Some(chunk_id) = chunk_id else {
					return Ok((
						serde_json::json!({ "error": "ValidationError: chunk_id must be a uuid" }),
						true,
					));
				};

				send(tx, Frame::tool_status(format!("Citing chunk {chunk_id}."), CITE_TOOL))
					.await?;

				match tokio::time::timeout(timeout, searcher.cite(chunk_id)).await {
					Err(_) => Ok((serde_json::json!({ "error": "timeout" }), true)),
					Ok(Err(err)) => Ok((
						serde_json::json!({ "error": format!("{}: {err}", err.kind()) }),
						true,
					)),
					Ok(Ok(None)) =>
						Ok((serde_json::json!({ "error": "unknown chunk_id" }), false)),
					Ok(Ok(Some(chunk))) => Ok((
						serde_json::json!({
							"chunk_id": chunk.chunk_id,
							"text": chunk.text,
							"source_filename": chunk.source_filename,
						}),
						false,
					)),
				}
			},
			other => {
				send(tx, Frame::tool_status(format!("Unknown tool {other} requested."), other))
					.await?;

				Ok((serde_json::json!({ "error": format!("unknown tool: {other}") }), true))
			},
		}
	}

	/// Parses, validates, enriches, and caps the model's feedback payload.
	fn collect_items(
		&self,
		content: &str,
		seen_hits: &HashMap<Uuid, RetrievalHit>,
	) -> Vec<FeedbackItem> {
		let values = feedback::extract_feedback_values(content);
		let mut items = Vec::with_capacity(values.len());

		for value in &values {
			match feedback::decode_feedback_item(value) {
				Ok(mut item) => {
					enrich_corpus_sources(&mut item, seen_hits);

					if self.searcher.is_none() {
						item.confidence = item.confidence.min(NO_CORPUS_CONFIDENCE_CAP);
						item.corpus_sources.clear();
					}

					items.push(item);
				},
				Err(reason) => {
					tracing::warn!(reason = %reason, "Skipped invalid feedback item.");
				},
			}
		}

		items.truncate(self.max_feedback_items);

		items
	}
}

impl AnimaService {
	pub async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisResponse> {
		let started = Instant::now();
		let (agent, persona) = self.prepare_agent(&request).await?;
		let context = request.context.clone().unwrap_or_default();
		// The receiver stays alive for the whole run; unary callers only
		// need the summary, the buffered frames are dropped with it.
		let (tx, _rx) = mpsc::channel(FRAME_BUFFER);
		let summary = agent.run(&request.content, &context, &tx).await?;

		Ok(AnalysisResponse {
			persona_id: persona.persona_id,
			persona_name: persona.name,
			total_items: summary.items.len(),
			items: summary.items,
			processing_time_seconds: started.elapsed().as_secs_f64(),
		})
	}

	/// Streaming analysis; every outcome ends the stream with exactly one
	/// terminal frame, so this never returns an error to the transport.
	pub async fn analyze_stream(self: Arc<Self>, request: AnalysisRequest, tx: mpsc::Sender<Frame>) {
		let prepared = self.prepare_agent(&request).await;

		match prepared {
			Ok((agent, _persona)) => {
				let context = request.context.clone().unwrap_or_default();

				match agent.run(&request.content, &context, &tx).await {
					Ok(_) => {},
					Err(Error::Canceled) => {
						tracing::info!("Client closed the analysis stream; run canceled.");
					},
					Err(err) => {
						tracing::warn!(error = %err, "Analysis run failed.");
					},
				}
			},
			Err(err) => {
				let _ = tx.send(Frame::error(err.kind(), err.to_string())).await;
			},
		}
	}

	async fn prepare_agent(
		&self,
		request: &AnalysisRequest,
	) -> Result<(AgentLoop, anima_storage::models::PersonaRecord)> {
		let persona = self.authorize(&request.user_id, request.persona_id).await?;
		let model = self.resolve_model(&persona, request.model.as_deref())?;
		let corpus_ready = persona.chunk_count > 0
			&& self.index.collection_exists(&persona.collection_id).await.unwrap_or(false);
		let searcher: Option<Arc<dyn CorpusSearch>> = if corpus_ready {
			Some(Arc::new(RetrievalTools::new(self, persona.collection_id.clone())))
		} else {
			None
		};
		let agent = AgentLoop {
			agent: self.cfg.agent.clone(),
			llm: self.cfg.providers.llm.clone(),
			model,
			chat: self.providers.chat.clone(),
			searcher,
			persona_name: persona.name.clone(),
			default_k: self.cfg.retrieval.default_k,
			max_k: self.cfg.retrieval.max_k,
			max_feedback_items: request.max_feedback_items.clamp(1, MAX_FEEDBACK_ITEMS_LIMIT),
		};

		Ok((agent, persona))
	}
}

async fn send(tx: &mpsc::Sender<Frame>, frame: Frame) -> Result<()> {
	tx.send(frame).await.map_err(|_| Error::Canceled)
}

fn search_status(
	query: &str,
	mode: SearchMode,
	k: usize,
	returned: Option<usize>,
	timed_out_secs: Option<u64>,
) -> Frame {
	let message = match (returned, timed_out_secs) {
		(_, Some(secs)) => format!(
			"search_corpus timed out after {secs} seconds (query={query:?}, mode={}, k={k}).",
			mode.as_str()
		),
		(Some(returned), None) => format!(
			"Searched corpus (query={query:?}, mode={}, k={k}, returned={returned}).",
			mode.as_str()
		),
		(None, None) => format!(
			"Searched corpus (query={query:?}, mode={}, k={k}).",
			mode.as_str()
		),
	};

	Frame::Status {
		message,
		tool: Some(SEARCH_CORPUS_TOOL.to_string()),
		stage: Some("search".to_string()),
	}
}

fn assistant_tool_message(outcome: &ChatOutcome) -> Value {
	let calls: Vec<Value> = outcome
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
		.collect();

	serde_json::json!({
		"role": "assistant",
		"content": outcome.content,
		"tool_calls": calls,
	})
}

/// The last few prior exchanges, normalized to plain user/assistant turns.
fn history_turns(context: &AnalysisContext) -> Vec<Value> {
	context
		.feedback_history
		.iter()
		.filter_map(|entry| {
			let role = entry.get("role").and_then(Value::as_str)?;
			let content = entry.get("content").and_then(Value::as_str)?;

			if role != "user" && role != "assistant" {
				return None;
			}

			Some(serde_json::json!({ "role": role, "content": content }))
		})
		.collect::<Vec<_>>()
		.into_iter()
		.rev()
		.take(FEEDBACK_HISTORY_TURNS * 2)
		.rev()
		.collect()
}

fn enrich_corpus_sources(item: &mut FeedbackItem, seen_hits: &HashMap<Uuid, RetrievalHit>) {
	for source in &item.sources {
		let Ok(chunk_id) = Uuid::parse_str(source) else {
			continue;
		};
		let Some(hit) = seen_hits.get(&chunk_id) else {
			// Unknown id: the model's plain-text citation stands as-is.
			continue;
		};

		if item.corpus_sources.iter().any(|existing| existing.text == hit.text) {
			continue;
		}

		item.corpus_sources.push(CorpusSource {
			text: hit.text.clone(),
			source_file: Some(hit.source_filename.clone()),
			relevance: None,
		});
	}
}
