//! End-to-end ingestion and retrieval against live Postgres and qdrant.
//! Set `ANIMA_PG_DSN` and `ANIMA_QDRANT_URL` to run.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use anima_config::{
	Agent, Config, Corpus, EmbeddingProviderConfig, LlmProviderConfig, ModelEntry, Postgres,
	Providers as ProviderConfigs, Qdrant, Retrieval, Service, Storage,
};
use anima_index::{IndexStore, fusion::RRF_K};
use anima_providers::chat::ChatOutcome;
use anima_service::{
	AnimaService, BoxFuture, ChatProvider, CorpusSearch, EmbeddingProvider, Error,
	PersonaCreateRequest, Providers, Result, RetrievalTools, SearchMode, UploadFile,
};
use anima_storage::db::Db;
use anima_testkit::TestDatabase;

const VECTOR_DIM: u32 = 8;

/// Deterministic bag-of-words embedding: each word hashes into one of the
/// vector's buckets. Enough structure for relevance ordering in tests.
struct BucketEmbedding;

impl EmbeddingProvider for BucketEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		let vectors = texts.iter().map(|text| bucket_vector(text)).collect();

		Box::pin(async move { Ok(vectors) })
	}
}

fn bucket_vector(text: &str) -> Vec<f32> {
	let mut vector = vec![0.0_f32; VECTOR_DIM as usize];

	for word in text.split_whitespace() {
		let normalized: String =
			word.chars().filter(|ch| ch.is_alphanumeric()).collect::<String>().to_lowercase();

		if normalized.is_empty() {
			continue;
		}

		let bucket = normalized.bytes().fold(7_u64, |acc, byte| {
			acc.wrapping_mul(31).wrapping_add(byte as u64)
		}) as usize % VECTOR_DIM as usize;

		vector[bucket] += 1.0;
	}

	let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();

	if norm > 0.0 {
		for value in &mut vector {
			*value /= norm;
		}
	}

	vector
}

struct SilentChat;

impl ChatProvider for SilentChat {
	fn complete<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_model: &'a str,
		_messages: &'a [Value],
		_tools: &'a [Value],
	) -> BoxFuture<'a, Result<ChatOutcome>> {
		Box::pin(async move {
			Ok(ChatOutcome { content: Some("{\"feedback\": []}".to_string()), tool_calls: vec![] })
		})
	}

	fn stream_text<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_model: &'a str,
		_messages: &'a [Value],
		_tokens: mpsc::Sender<String>,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move { Ok(String::new()) })
	}
}

fn test_config(dsn: String, qdrant_url: String) -> Config {
	Config {
		service: Service { http_bind: "127.0.0.1:0".to_string(), log_level: "info".to_string() },
		storage: Storage {
			postgres: Postgres { dsn, pool_max_conns: 2 },
			qdrant: Qdrant { url: qdrant_url, vector_dim: VECTOR_DIM },
		},
		providers: ProviderConfigs {
			embedding: EmbeddingProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/".to_string(),
				model: "test".to_string(),
				dimensions: VECTOR_DIM,
				batch_size: 100,
				max_attempts: 1,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			llm: LlmProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/".to_string(),
				model: "test".to_string(),
				temperature: 0.0,
				json_mode: true,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
		},
		corpus: Corpus { window_chars: 80, overlap_chars: 10, ingest_workers: 2 },
		retrieval: Retrieval { default_k: 5, max_k: 80 },
		agent: Agent {
			max_iterations: 5,
			max_tool_calls: 10,
			tool_timeout_ms: 2_000,
			request_timeout_ms: 30_000,
			max_feedback_items: 10,
		},
		default_model: "test".to_string(),
		models: vec![ModelEntry {
			id: "test".to_string(),
			name: "Test".to_string(),
			provider: "test".to_string(),
			description: "Scripted model.".to_string(),
		}],
	}
}

async fn test_service(db: &TestDatabase) -> Option<Arc<AnimaService>> {
	let qdrant_url = anima_testkit::env_qdrant_url()?;
	let cfg = test_config(db.dsn().to_string(), qdrant_url);
	let storage = Db::connect(&cfg.storage.postgres).await.expect("Failed to connect.");

	storage.ensure_schema().await.expect("Failed to ensure schema.");

	let index = Arc::new(IndexStore::new(&cfg.storage.qdrant).expect("Failed to build index."));
	let providers = Providers::new(Arc::new(BucketEmbedding), Arc::new(SilentChat));

	Some(Arc::new(AnimaService::with_providers(cfg, storage, index, providers)))
}

async fn test_env() -> Option<TestDatabase> {
	let base_dsn = match anima_testkit::env_dsn() {
		Some(value) => value,
		None => {
			eprintln!("Skipping acceptance tests; set ANIMA_PG_DSN to run.");

			return None;
		},
	};

	if anima_testkit::env_qdrant_url().is_none() {
		eprintln!("Skipping acceptance tests; set ANIMA_QDRANT_URL to run.");

		return None;
	}

	Some(TestDatabase::new(&base_dsn).await.expect("Failed to create test database."))
}

fn upload(filename: &str, text: &str) -> UploadFile {
	UploadFile { filename: filename.to_string(), bytes: text.as_bytes().to_vec() }
}

#[tokio::test]
#[ignore = "Requires external Postgres and qdrant. Set ANIMA_PG_DSN and ANIMA_QDRANT_URL to run."]
async fn ingestion_updates_documents_and_counters() {
	let Some(test_db) = test_env().await else {
		return;
	};
	let Some(service) = test_service(&test_db).await else {
		return;
	};
	let persona = service
		.create_persona(PersonaCreateRequest {
			user_id: "u1".to_string(),
			name: "Jules".to_string(),
			description: None,
			model: None,
		})
		.await
		.expect("Failed to create persona.");

	test_db.track_collection(&persona.collection_id);

	let report = service
		.upload_corpus("u1", persona.persona_id, vec![
			upload("a.txt", "the cat sat"),
			upload("b.txt", "the dog ran"),
			upload("c.xyz", "unsupported"),
		])
		.await
		.expect("Upload failed.");

	assert_eq!(report.files_uploaded, 3);
	assert_eq!(report.files.iter().filter(|f| f.status == "indexed").count(), 2);

	let failed = report.files.iter().find(|f| f.filename == "c.xyz").expect("missing outcome");

	assert_eq!(failed.status, "failed");
	assert!(failed.failure_reason.is_some());

	let view =
		service.get_persona("u1", persona.persona_id).await.expect("Failed to fetch persona.");

	assert_eq!(view.document_count, 2);
	assert!(view.chunk_count >= 2);
	assert!(view.corpus_available);

	let status = service
		.ingestion_status("u1", persona.persona_id)
		.await
		.expect("Failed to fetch status.");

	assert_eq!(status.status, "completed");
	assert_eq!(status.documents.len(), 3);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres and qdrant. Set ANIMA_PG_DSN and ANIMA_QDRANT_URL to run."]
async fn hybrid_search_is_deterministic_and_bonused() {
	let Some(test_db) = test_env().await else {
		return;
	};
	let Some(service) = test_service(&test_db).await else {
		return;
	};
	let persona = service
		.create_persona(PersonaCreateRequest {
			user_id: "u1".to_string(),
			name: "Jules".to_string(),
			description: None,
			model: None,
		})
		.await
		.expect("Failed to create persona.");

	test_db.track_collection(&persona.collection_id);

	service
		.upload_corpus("u1", persona.persona_id, vec![
			upload("a.txt", "the cat sat"),
			upload("b.txt", "the dog ran"),
		])
		.await
		.expect("Upload failed.");

	let tools = RetrievalTools::new(&service, persona.collection_id.clone());
	let first = tools.search("cat", SearchMode::Hybrid, 2).await.expect("Search failed.");
	let second = tools.search("cat", SearchMode::Hybrid, 2).await.expect("Search failed.");

	assert!(!first.hits.is_empty());
	assert_eq!(first.hits[0].source_filename, "a.txt");

	// Present in both sub-rankings, so the fused score must strictly
	// exceed the pure lexical RRF term.
	let top = &first.hits[0];

	assert!(top.dense_rank.is_some() && top.lexical_rank.is_some());
	assert!(top.score > 1.0 / (RRF_K + top.lexical_rank.unwrap() as f32));

	let first_ids: Vec<_> = first.hits.iter().map(|hit| hit.chunk_id).collect();
	let second_ids: Vec<_> = second.hits.iter().map(|hit| hit.chunk_id).collect();

	assert_eq!(first_ids, second_ids);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres and qdrant. Set ANIMA_PG_DSN and ANIMA_QDRANT_URL to run."]
async fn cross_persona_access_and_search_are_isolated() {
	let Some(test_db) = test_env().await else {
		return;
	};
	let Some(service) = test_service(&test_db).await else {
		return;
	};
	let p1 = service
		.create_persona(PersonaCreateRequest {
			user_id: "u1".to_string(),
			name: "One".to_string(),
			description: None,
			model: None,
		})
		.await
		.expect("Failed to create persona.");
	let p2 = service
		.create_persona(PersonaCreateRequest {
			user_id: "u2".to_string(),
			name: "Two".to_string(),
			description: None,
			model: None,
		})
		.await
		.expect("Failed to create persona.");

	test_db.track_collection(&p1.collection_id);
	test_db.track_collection(&p2.collection_id);

	service
		.upload_corpus("u1", p1.persona_id, vec![upload("one.txt", "alpha bravo charlie")])
		.await
		.expect("Upload failed.");
	service
		.upload_corpus("u2", p2.persona_id, vec![upload("two.txt", "delta echo foxtrot")])
		.await
		.expect("Upload failed.");

	// U1 cannot reach P2.
	let err = service.get_persona("u1", p2.persona_id).await.expect_err("expected denial");

	assert!(matches!(err, Error::NotAuthorized { .. }));

	// U2's searches over P2 never see P1 chunks.
	let tools = RetrievalTools::new(&service, p2.collection_id.clone());
	let outcome = tools.search("alpha delta", SearchMode::Hybrid, 10).await.expect("Search failed.");

	assert!(!outcome.hits.is_empty());

	for hit in &outcome.hits {
		assert_eq!(hit.source_filename, "two.txt");
	}

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
