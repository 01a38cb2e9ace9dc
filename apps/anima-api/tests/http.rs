//! HTTP surface tests against live Postgres and qdrant. Set
//! `ANIMA_PG_DSN` and `ANIMA_QDRANT_URL` to run.

use std::sync::Arc;

use axum::{
	body::{self, Body},
	http::{Request, StatusCode},
};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tower::util::ServiceExt;

use anima_api::{routes, state::AppState};
use anima_config::{
	Agent, Config, Corpus, EmbeddingProviderConfig, LlmProviderConfig, ModelEntry, Postgres,
	Providers as ProviderConfigs, Qdrant, Retrieval, Service, Storage,
};
use anima_providers::chat::ChatOutcome;
use anima_service::{BoxFuture, ChatProvider, EmbeddingProvider, Providers, Result};
use anima_testkit::TestDatabase;

const VECTOR_DIM: u32 = 4;

struct StubEmbedding;

impl EmbeddingProvider for StubEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		let vectors = texts.iter().map(|_| vec![0.5; VECTOR_DIM as usize]).collect();

		Box::pin(async move { Ok(vectors) })
	}
}

struct StubChat;

impl ChatProvider for StubChat {
	fn complete<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_model: &'a str,
		_messages: &'a [Value],
		_tools: &'a [Value],
	) -> BoxFuture<'a, Result<ChatOutcome>> {
		Box::pin(async move {
			Ok(ChatOutcome {
				content: Some(
					serde_json::json!({
						"feedback": [{
							"type": "suggestion",
							"category": "clarity",
							"title": "Tighten the opening",
							"content": "State the claim in the first sentence.",
							"severity": "medium",
							"confidence": 0.8,
						}]
					})
					.to_string(),
				),
				tool_calls: vec![],
			})
		})
	}

	fn stream_text<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_model: &'a str,
		_messages: &'a [Value],
		_tokens: mpsc::Sender<String>,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move { Ok("Hello.".to_string()) })
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
		corpus: Corpus { window_chars: 800, overlap_chars: 100, ingest_workers: 2 },
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

async fn test_state(test_db: &TestDatabase) -> Option<AppState> {
	let qdrant_url = anima_testkit::env_qdrant_url()?;
	let config = test_config(test_db.dsn().to_string(), qdrant_url);
	let providers = Providers::new(Arc::new(StubEmbedding), Arc::new(StubChat));
	let state =
		AppState::with_providers(config, providers).await.expect("Failed to build app state.");

	Some(state)
}

async fn test_env() -> Option<TestDatabase> {
	let base_dsn = match anima_testkit::env_dsn() {
		Some(value) => value,
		None => {
			eprintln!("Skipping HTTP tests; set ANIMA_PG_DSN to run.");

			return None;
		},
	};

	if anima_testkit::env_qdrant_url().is_none() {
		eprintln!("Skipping HTTP tests; set ANIMA_QDRANT_URL to run.");

		return None;
	}

	Some(TestDatabase::new(&base_dsn).await.expect("Failed to create test database."))
}

async fn response_json(response: axum::response::Response) -> Value {
	let bytes = body::to_bytes(response.into_body(), usize::MAX)
		.await
		.expect("Failed to read response body.");

	serde_json::from_slice(&bytes).expect("Failed to parse response body.")
}

#[tokio::test]
#[ignore = "Requires external Postgres and qdrant. Set ANIMA_PG_DSN and ANIMA_QDRANT_URL to run."]
async fn health_ok() {
	let Some(test_db) = test_env().await else {
		return;
	};
	let Some(state) = test_state(&test_db).await else {
		return;
	};
	let app = routes::router(state);
	let response = app
		.oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
		.await
		.expect("Failed to call /health.");

	assert_eq!(response.status(), StatusCode::OK);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres and qdrant. Set ANIMA_PG_DSN and ANIMA_QDRANT_URL to run."]
async fn persona_crud_rejects_cross_owner_access() {
	let Some(test_db) = test_env().await else {
		return;
	};
	let Some(state) = test_state(&test_db).await else {
		return;
	};
	let app = routes::router(state);
	let payload = serde_json::json!({
		"user_id": "owner-1",
		"name": "Jules",
		"description": "Essayist.",
	});
	let response = app
		.clone()
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/api/personas")
				.header("content-type", "application/json")
				.body(Body::from(payload.to_string()))
				.expect("request"),
		)
		.await
		.expect("Failed to create persona.");

	assert_eq!(response.status(), StatusCode::CREATED);

	let persona = response_json(response).await;
	let persona_id = persona["persona_id"].as_str().expect("missing persona_id").to_string();

	test_db.track_collection(persona["collection_id"].as_str().expect("missing collection"));

	// The owner reads it back.
	let response = app
		.clone()
		.oneshot(
			Request::builder()
				.uri(format!("/api/personas/{persona_id}?user_id=owner-1"))
				.body(Body::empty())
				.expect("request"),
		)
		.await
		.expect("Failed to get persona.");

	assert_eq!(response.status(), StatusCode::OK);

	// Anyone else is rejected.
	let response = app
		.clone()
		.oneshot(
			Request::builder()
				.uri(format!("/api/personas/{persona_id}?user_id=intruder"))
				.body(Body::empty())
				.expect("request"),
		)
		.await
		.expect("Failed to call get persona.");

	assert_eq!(response.status(), StatusCode::FORBIDDEN);

	let error = response_json(response).await;

	assert_eq!(error["kind"], "NotAuthorized");

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres and qdrant. Set ANIMA_PG_DSN and ANIMA_QDRANT_URL to run."]
async fn empty_draft_is_rejected_before_any_model_call() {
	let Some(test_db) = test_env().await else {
		return;
	};
	let Some(state) = test_state(&test_db).await else {
		return;
	};
	let app = routes::router(state);
	let create = serde_json::json!({ "user_id": "owner-1", "name": "Jules" });
	let response = app
		.clone()
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/api/personas")
				.header("content-type", "application/json")
				.body(Body::from(create.to_string()))
				.expect("request"),
		)
		.await
		.expect("Failed to create persona.");
	let persona = response_json(response).await;
	let persona_id = persona["persona_id"].as_str().expect("missing persona_id").to_string();

	test_db.track_collection(persona["collection_id"].as_str().expect("missing collection"));

	let analyze = serde_json::json!({
		"content": "",
		"persona_id": persona_id,
		"user_id": "owner-1",
	});
	let response = app
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/api/analyze")
				.header("content-type", "application/json")
				.body(Body::from(analyze.to_string()))
				.expect("request"),
		)
		.await
		.expect("Failed to call analyze.");

	assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

	let error = response_json(response).await;

	assert_eq!(error["kind"], "ValidationError");
	assert_eq!(error["message"].as_str().expect("missing message"), "Validation error: empty draft");

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
