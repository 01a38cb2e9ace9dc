//! The persona critique engine: registry, ingestion, retrieval tools, the
//! agent loop, and persona chat, wired over the metadata store and the
//! vector index. External model clients sit behind provider traits so the
//! loop is testable with scripted implementations.

pub mod agent;
pub mod chat;
pub mod ingest;
pub mod prompt;
pub mod registry;
pub mod tools;

mod error;

pub use self::{
	agent::{AgentLoop, AnalysisContext, AnalysisRequest, AnalysisResponse, RunSummary},
	chat::{ChatRequest, ChatTurn},
	error::{Error, Result},
	ingest::{CorpusUploadResponse, FileOutcome, UploadFile},
	registry::{
		ChunkView, DocumentGroup, DocumentView, DocumentsResponse, IngestionStatusResponse,
		ModelsResponse, PersonaCreateRequest, PersonaListResponse, PersonaUpdateRequest,
		PersonaView,
	},
	tools::{CorpusSearch, RetrievalTools, SearchMode},
};
pub use anima_providers::chat::{ChatOutcome, ToolCall};

use std::{
	collections::HashMap,
	future::Future,
	pin::Pin,
	sync::{Arc, Mutex},
};

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use anima_config::{Config, EmbeddingProviderConfig, LlmProviderConfig};
use anima_index::IndexStore;
use anima_providers::{chat as chat_provider, embedding};
use anima_storage::db::Db;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

pub trait ChatProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		model: &'a str,
		messages: &'a [Value],
		tools: &'a [Value],
	) -> BoxFuture<'a, Result<ChatOutcome>>;

	fn stream_text<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		model: &'a str,
		messages: &'a [Value],
		tokens: mpsc::Sender<String>,
	) -> BoxFuture<'a, Result<String>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub chat: Arc<dyn ChatProvider>,
}

impl Providers {
	pub fn new(embedding: Arc<dyn EmbeddingProvider>, chat: Arc<dyn ChatProvider>) -> Self {
		Self { embedding, chat }
	}
}

impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), chat: provider }
	}
}

pub struct AnimaService {
	pub cfg: Config,
	pub db: Db,
	pub index: Arc<IndexStore>,
	pub providers: Providers,
	write_leases: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AnimaService {
	pub fn new(cfg: Config, db: Db, index: Arc<IndexStore>) -> Self {
		Self::with_providers(cfg, db, index, Providers::default())
	}

	pub fn with_providers(
		cfg: Config,
		db: Db,
		index: Arc<IndexStore>,
		providers: Providers,
	) -> Self {
		Self { cfg, db, index, providers, write_leases: Mutex::new(HashMap::new()) }
	}

	/// Writes into one collection are serialized through a per-collection
	/// lease so chunk upserts and persona counters stay consistent.
	pub(crate) fn write_lease(&self, collection: &str) -> Arc<tokio::sync::Mutex<()>> {
		let mut leases = self.write_leases.lock().unwrap_or_else(|err| err.into_inner());

		leases.entry(collection.to_string()).or_default().clone()
	}
}

/// Collection partition name bound 1:1 to a persona.
pub fn collection_id(owner_id: &str, persona_id: Uuid) -> String {
	let owner: String = owner_id
		.chars()
		.filter(|ch| ch.is_ascii_alphanumeric())
		.take(8)
		.collect::<String>()
		.to_ascii_lowercase();
	let persona = persona_id.simple().to_string();

	format!("user_{owner}_persona_{}", &persona[..8])
}

struct DefaultProviders;

impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			embedding::embed(cfg, texts)
				.await
				.map_err(|err| Error::EmbeddingFailure { message: err.to_string() })
		})
	}
}

impl ChatProvider for DefaultProviders {
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		model: &'a str,
		messages: &'a [Value],
		tools: &'a [Value],
	) -> BoxFuture<'a, Result<ChatOutcome>> {
		Box::pin(async move {
			chat_provider::complete(cfg, model, messages, tools, cfg.json_mode)
				.await
				.map_err(Into::into)
		})
	}

	fn stream_text<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		model: &'a str,
		messages: &'a [Value],
		tokens: mpsc::Sender<String>,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move {
			chat_provider::stream_text(cfg, model, messages, tokens).await.map_err(Into::into)
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn collection_ids_are_scoped_and_sanitized() {
		let persona_id = Uuid::from_u128(0xABCD_EF01_2345_6789_ABCD_EF01_2345_6789);
		let id = collection_id("User-42!xyz", persona_id);

		assert!(id.starts_with("user_user42xy_persona_"));
		assert_eq!(id.len(), "user_user42xy_persona_".len() + 8);
	}

	#[test]
	fn collection_ids_differ_per_persona() {
		let a = collection_id("owner", Uuid::from_u128(0x1111_1111_1111_1111_1111_1111_1111_1111));
		let b = collection_id("owner", Uuid::from_u128(0x2222_2222_2222_2222_2222_2222_2222_2222));

		assert_ne!(a, b);
	}
}
