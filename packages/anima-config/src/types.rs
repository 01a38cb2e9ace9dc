use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	pub corpus: Corpus,
	pub retrieval: Retrieval,
	pub agent: Agent,
	pub default_model: String,
	pub models: Vec<ModelEntry>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub qdrant: Qdrant,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub vector_dim: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub llm: LlmProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	#[serde(default = "default_embed_batch_size")]
	pub batch_size: u32,
	#[serde(default = "default_embed_attempts")]
	pub max_attempts: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	#[serde(default = "default_json_mode")]
	pub json_mode: bool,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Corpus {
	#[serde(default = "default_window_chars")]
	pub window_chars: u32,
	#[serde(default = "default_overlap_chars")]
	pub overlap_chars: u32,
	#[serde(default = "default_ingest_workers")]
	pub ingest_workers: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Retrieval {
	#[serde(default = "default_retrieval_k")]
	pub default_k: u32,
	#[serde(default = "default_retrieval_max_k")]
	pub max_k: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Agent {
	#[serde(default = "default_max_iterations")]
	pub max_iterations: u32,
	#[serde(default = "default_max_tool_calls")]
	pub max_tool_calls: u32,
	#[serde(default = "default_tool_timeout_ms")]
	pub tool_timeout_ms: u64,
	#[serde(default = "default_request_timeout_ms")]
	pub request_timeout_ms: u64,
	#[serde(default = "default_max_feedback_items")]
	pub max_feedback_items: u32,
}

#[derive(Clone, Debug, Deserialize, serde::Serialize)]
pub struct ModelEntry {
	pub id: String,
	pub name: String,
	pub provider: String,
	pub description: String,
}

fn default_embed_batch_size() -> u32 {
	100
}

fn default_embed_attempts() -> u32 {
	3
}

fn default_json_mode() -> bool {
	true
}

fn default_window_chars() -> u32 {
	800
}

fn default_overlap_chars() -> u32 {
	100
}

fn default_ingest_workers() -> u32 {
	4
}

fn default_retrieval_k() -> u32 {
	5
}

fn default_retrieval_max_k() -> u32 {
	80
}

fn default_max_iterations() -> u32 {
	20
}

fn default_max_tool_calls() -> u32 {
	10
}

fn default_tool_timeout_ms() -> u64 {
	30_000
}

fn default_request_timeout_ms() -> u64 {
	180_000
}

fn default_max_feedback_items() -> u32 {
	10
}
