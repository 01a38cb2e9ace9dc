//! The retrieval tool surface the agent may call.
//!
//! `search_corpus` runs hybrid retrieval by default; `style` mode embeds
//! the query behind a steering prefix and searches dense-only so the
//! neighborhood reflects phrasing rather than topic. `cite` returns a
//! chunk verbatim for quoting.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{AnimaService, BoxFuture, EmbeddingProvider, Result};
use anima_config::EmbeddingProviderConfig;
use anima_index::{IndexStore, SearchOutcome, StoredChunk};

pub const SEARCH_CORPUS_TOOL: &str = "search_corpus";
pub const CITE_TOOL: &str = "cite";
pub const STYLE_PREFIX: &str = "focus on stylistic features: ";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
	Content,
	Style,
	Hybrid,
}

impl SearchMode {
	pub fn parse(raw: &str) -> Option<Self> {
		match raw.to_ascii_lowercase().as_str() {
			"content" => Some(Self::Content),
			"style" => Some(Self::Style),
			"hybrid" => Some(Self::Hybrid),
			_ => None,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Content => "content",
			Self::Style => "style",
			Self::Hybrid => "hybrid",
		}
	}
}

pub trait CorpusSearch
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		query: &'a str,
		mode: SearchMode,
		k: usize,
	) -> BoxFuture<'a, Result<SearchOutcome>>;

	fn cite<'a>(&'a self, chunk_id: Uuid) -> BoxFuture<'a, Result<Option<StoredChunk>>>;
}

pub struct RetrievalTools {
	embedding_cfg: EmbeddingProviderConfig,
	embedding: Arc<dyn EmbeddingProvider>,
	index: Arc<IndexStore>,
	collection: String,
	max_k: usize,
}

impl RetrievalTools {
	pub fn new(service: &AnimaService, collection: String) -> Self {
		Self {
			embedding_cfg: service.cfg.providers.embedding.clone(),
			embedding: service.providers.embedding.clone(),
			index: service.index.clone(),
			collection,
			max_k: service.cfg.retrieval.max_k as usize,
		}
	}

	async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
		let vectors = self.embedding.embed(&self.embedding_cfg, &[text.to_string()]).await?;

		vectors.into_iter().next().ok_or_else(|| crate::Error::EmbeddingFailure {
			message: "Embedding provider returned no vectors.".to_string(),
		})
	}
}

impl CorpusSearch for RetrievalTools {
	fn search<'a>(
		&'a self,
		query: &'a str,
		mode: SearchMode,
		k: usize,
	) -> BoxFuture<'a, Result<SearchOutcome>> {
		Box::pin(async move {
			let k = k.clamp(1, self.max_k);

			let outcome = match mode {
				SearchMode::Style => {
					let steered = format!("{STYLE_PREFIX}{query}");
					let vector = self.embed_query(&steered).await?;

					self.index.search_dense(&self.collection, vector, k).await?
				},
				SearchMode::Content | SearchMode::Hybrid => {
					let vector = self.embed_query(query).await?;

					self.index.search_hybrid(&self.collection, query, vector, k).await?
				},
			};

			Ok(outcome)
		})
	}

	fn cite<'a>(&'a self, chunk_id: Uuid) -> BoxFuture<'a, Result<Option<StoredChunk>>> {
		Box::pin(async move {
			Ok(self.index.fetch_chunk(&self.collection, chunk_id).await?)
		})
	}
}

/// OpenAI-style function definitions for the tool surface.
pub fn tool_definitions(default_k: u32, max_k: u32) -> Vec<Value> {
	vec![
		serde_json::json!({
			"type": "function",
			"function": {
				"name": SEARCH_CORPUS_TOOL,
				"description": format!(
					"Search your writing corpus for passages relevant to a query. Returns \
					 excerpts showing what you have written and how you write. Use mode \
					 \"content\" for claims and ideas, \"style\" for voice and phrasing, \
					 \"hybrid\" for both. Try different phrasings if the first search comes back \
					 thin. Max k: {max_k}."
				),
				"parameters": {
					"type": "object",
					"properties": {
						"query": {
							"type": "string",
							"description": "Search query; be specific about what you are looking for.",
						},
						"mode": {
							"type": "string",
							"enum": ["content", "style", "hybrid"],
							"description": "Retrieval mode; defaults to hybrid.",
						},
						"k": {
							"type": "integer",
							"description": format!("Number of results to return. Default: {default_k}. Max: {max_k}."),
						},
					},
					"required": ["query"],
				},
			},
		}),
		serde_json::json!({
			"type": "function",
			"function": {
				"name": CITE_TOOL,
				"description": "Fetch the verbatim text and source filename of a chunk id seen in \
					earlier search results, for quoting in a citation.",
				"parameters": {
					"type": "object",
					"properties": {
						"chunk_id": {
							"type": "string",
							"description": "Chunk id from a previous search_corpus result.",
						},
					},
					"required": ["chunk_id"],
				},
			},
		}),
	]
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn mode_parsing_is_case_insensitive() {
		assert_eq!(SearchMode::parse("Style"), Some(SearchMode::Style));
		assert_eq!(SearchMode::parse("HYBRID"), Some(SearchMode::Hybrid));
		assert_eq!(SearchMode::parse("lexical"), None);
	}

	#[test]
	fn definitions_cover_both_tools() {
		let defs = tool_definitions(5, 80);

		assert_eq!(defs.len(), 2);
		assert_eq!(defs[0]["function"]["name"], SEARCH_CORPUS_TOOL);
		assert_eq!(defs[1]["function"]["name"], CITE_TOOL);
		assert!(defs[0]["function"]["description"].as_str().unwrap().contains("Max k: 80"));
	}
}
