mod types;

use std::{fs, path::Path};

use color_eyre::eyre;

pub use types::{
	Agent, Config, Corpus, EmbeddingProviderConfig, LlmProviderConfig, ModelEntry, Postgres,
	Providers, Qdrant, Retrieval, Service, Storage,
};

pub fn load(path: &Path) -> color_eyre::Result<Config> {
	let raw = fs::read_to_string(path)?;

	let mut cfg: Config = toml::from_str(&raw)?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

fn normalize(cfg: &mut Config) {
	if cfg.default_model.trim().is_empty()
		&& let Some(first) = cfg.models.first()
	{
		cfg.default_model = first.id.clone();
	}
}

pub fn validate(cfg: &Config) -> color_eyre::Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(eyre::eyre!("service.http_bind must be non-empty."));
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(eyre::eyre!("storage.postgres.pool_max_conns must be greater than zero."));
	}
	if cfg.storage.qdrant.vector_dim == 0 {
		return Err(eyre::eyre!("storage.qdrant.vector_dim must be greater than zero."));
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(eyre::eyre!(
			"providers.embedding.dimensions must match storage.qdrant.vector_dim."
		));
	}
	if cfg.providers.embedding.batch_size == 0 {
		return Err(eyre::eyre!("providers.embedding.batch_size must be greater than zero."));
	}
	if cfg.providers.embedding.max_attempts == 0 {
		return Err(eyre::eyre!("providers.embedding.max_attempts must be greater than zero."));
	}

	for (label, key) in [
		("embedding", &cfg.providers.embedding.api_key),
		("llm", &cfg.providers.llm.api_key),
	] {
		if key.trim().is_empty() {
			return Err(eyre::eyre!("Provider {label} api_key must be non-empty."));
		}
	}

	if cfg.corpus.window_chars == 0 {
		return Err(eyre::eyre!("corpus.window_chars must be greater than zero."));
	}
	if cfg.corpus.overlap_chars >= cfg.corpus.window_chars {
		return Err(eyre::eyre!("corpus.overlap_chars must be less than corpus.window_chars."));
	}
	if cfg.corpus.ingest_workers == 0 {
		return Err(eyre::eyre!("corpus.ingest_workers must be greater than zero."));
	}
	if cfg.retrieval.default_k == 0 {
		return Err(eyre::eyre!("retrieval.default_k must be greater than zero."));
	}
	if cfg.retrieval.max_k < cfg.retrieval.default_k {
		return Err(eyre::eyre!("retrieval.max_k must be at least retrieval.default_k."));
	}
	if cfg.agent.max_iterations == 0 {
		return Err(eyre::eyre!("agent.max_iterations must be greater than zero."));
	}
	if cfg.agent.tool_timeout_ms == 0 {
		return Err(eyre::eyre!("agent.tool_timeout_ms must be greater than zero."));
	}
	if cfg.agent.request_timeout_ms == 0 {
		return Err(eyre::eyre!("agent.request_timeout_ms must be greater than zero."));
	}
	if cfg.agent.max_feedback_items == 0 {
		return Err(eyre::eyre!("agent.max_feedback_items must be greater than zero."));
	}
	if cfg.models.is_empty() {
		return Err(eyre::eyre!("models must list at least one entry."));
	}
	if !cfg.models.iter().any(|model| model.id == cfg.default_model) {
		return Err(eyre::eyre!("default_model must name an entry in models."));
	}

	Ok(())
}
