//! Batch embedding over an OpenAI-style `/embeddings` endpoint.
//!
//! Oversized inputs are split at the provider's batch size; a failure in
//! any sub-batch fails the whole call so the caller never sees holes.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};
use anima_config::EmbeddingProviderConfig;

const BASE_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 5_000;

pub async fn embed(cfg: &EmbeddingProviderConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
	if texts.is_empty() {
		return Ok(Vec::new());
	}

	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let mut all = Vec::with_capacity(texts.len());

	for batch in texts.chunks(cfg.batch_size.max(1) as usize) {
		let vectors = embed_batch_with_retry(&client, cfg, batch).await?;

		all.extend(vectors);
	}

	if all.len() != texts.len() {
		return Err(Error::invalid_response(format!(
			"Embedding provider returned {} vectors for {} inputs.",
			all.len(),
			texts.len()
		)));
	}

	for vector in &all {
		if vector.len() != cfg.dimensions as usize {
			return Err(Error::invalid_response(format!(
				"Embedding dimension {} does not match configured dimensions {}.",
				vector.len(),
				cfg.dimensions
			)));
		}
	}

	Ok(all)
}

async fn embed_batch_with_retry(
	client: &Client,
	cfg: &EmbeddingProviderConfig,
	batch: &[String],
) -> Result<Vec<Vec<f32>>> {
	let mut backoff = Duration::from_millis(BASE_BACKOFF_MS);
	let mut last_err = None;

	for attempt in 1..=cfg.max_attempts {
		match embed_batch(client, cfg, batch).await {
			Ok(vectors) => return Ok(vectors),
			Err(err) if err.is_transient() && attempt < cfg.max_attempts => {
				tracing::warn!(
					error = %err,
					attempt,
					max_attempts = cfg.max_attempts,
					"Embedding batch failed; retrying."
				);

				tokio::time::sleep(backoff).await;

				backoff = backoff.saturating_mul(2).min(Duration::from_millis(MAX_BACKOFF_MS));
				last_err = Some(err);
			},
			Err(err) => return Err(err),
		}
	}

	Err(last_err
		.unwrap_or_else(|| Error::invalid_response("Embedding retries exhausted without error.")))
}

async fn embed_batch(
	client: &Client,
	cfg: &EmbeddingProviderConfig,
	batch: &[String],
) -> Result<Vec<Vec<f32>>> {
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"input": batch,
		"dimensions": cfg.dimensions,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_embedding_response(json)
}

/// One row of the provider's `data` array. Providers are allowed to
/// return rows out of order as long as each carries its `index`.
#[derive(Debug, Deserialize)]
struct EmbeddingRow {
	index: Option<usize>,
	embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
	data: Vec<EmbeddingRow>,
}

fn parse_embedding_response(json: Value) -> Result<Vec<Vec<f32>>> {
	let response: EmbeddingResponse = serde_json::from_value(json)
		.map_err(|err| Error::invalid_response(format!("Bad embeddings payload: {err}.")))?;
	let mut rows: Vec<(usize, Vec<f32>)> = response
		.data
		.into_iter()
		.enumerate()
		.map(|(position, row)| (row.index.unwrap_or(position), row.embedding))
		.collect();

	rows.sort_by_key(|(index, _)| *index);

	Ok(rows.into_iter().map(|(_, embedding)| embedding).collect())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reorders_rows_by_provider_index() {
		let json = serde_json::json!({
			"object": "list",
			"data": [
				{ "index": 2, "embedding": [3.0] },
				{ "index": 0, "embedding": [1.0] },
				{ "index": 1, "embedding": [2.0] }
			]
		});
		let vectors = parse_embedding_response(json).expect("parse failed");

		assert_eq!(vectors, vec![vec![1.0], vec![2.0], vec![3.0]]);
	}

	#[test]
	fn falls_back_to_positional_order_without_indices() {
		let json = serde_json::json!({
			"data": [
				{ "embedding": [1.0, 2.0] },
				{ "embedding": [3.0, 4.0] }
			]
		});
		let vectors = parse_embedding_response(json).expect("parse failed");

		assert_eq!(vectors[0], vec![1.0, 2.0]);
		assert_eq!(vectors[1], vec![3.0, 4.0]);
	}

	#[test]
	fn rejects_payloads_that_do_not_match_the_schema() {
		for json in [
			serde_json::json!({ "error": { "message": "quota exceeded" } }),
			serde_json::json!({ "data": [{ "index": 0, "embedding": ["x"] }] }),
			serde_json::json!({ "data": [{ "index": 0 }] }),
		] {
			let err = parse_embedding_response(json).expect_err("expected a parse failure");

			assert!(err.to_string().contains("Bad embeddings payload"));
		}
	}
}
