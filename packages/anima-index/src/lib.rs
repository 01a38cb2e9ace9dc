//! Per-persona vector + lexical index over qdrant.
//!
//! Each persona owns one collection with a named dense vector (cosine)
//! and a named server-side BM25 sparse vector, so dense, lexical, and
//! hybrid retrieval all run against the same points.

pub mod fusion;

mod error;

pub use error::{Error, Result};

use std::collections::HashMap;

use qdrant_client::{
	Payload, Qdrant,
	qdrant::{
		Condition, CountPointsBuilder, CreateCollectionBuilder, Distance, Document, Filter,
		GetPointsBuilder, Modifier, PointId, PointStruct, Query, QueryPointsBuilder, ScoredPoint,
		ScrollPointsBuilder, SparseVectorParamsBuilder, SparseVectorsConfigBuilder,
		UpsertPointsBuilder, Value, Vector, VectorParamsBuilder, VectorsConfigBuilder,
	},
};
use serde::Serialize;
use uuid::Uuid;

pub const DENSE_VECTOR_NAME: &str = "dense";
pub const BM25_VECTOR_NAME: &str = "bm25";
pub const BM25_MODEL: &str = "qdrant/bm25";

/// Ceiling on chunks returned when scrolling one document for display.
const SCROLL_LIMIT: u32 = 1_024;

/// One chunk as stored in a collection.
#[derive(Clone, Debug)]
pub struct ChunkRecord {
	pub chunk_id: Uuid,
	pub document_id: Uuid,
	pub persona_id: Uuid,
	pub ordinal: u32,
	pub text: String,
	pub source_filename: String,
	pub char_start: u64,
	pub char_end: u64,
	pub vector: Vec<f32>,
}

/// A chunk read back without search scoring.
#[derive(Clone, Debug, Serialize)]
pub struct StoredChunk {
	pub chunk_id: Uuid,
	pub document_id: Uuid,
	pub ordinal: u32,
	pub text: String,
	pub source_filename: String,
	pub char_start: u64,
	pub char_end: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct RetrievalHit {
	pub chunk_id: Uuid,
	pub document_id: Uuid,
	pub ordinal: u32,
	pub text: String,
	pub source_filename: String,
	pub score: f32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub dense_rank: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub lexical_rank: Option<u32>,
}

/// Search result plus the missing-partition signal: a vanished collection
/// reads as empty rather than failing, and the caller downgrades the
/// persona's `corpus_available` flag.
#[derive(Clone, Debug, Default)]
pub struct SearchOutcome {
	pub hits: Vec<RetrievalHit>,
	pub index_missing: bool,
}

pub struct IndexStore {
	pub client: Qdrant,
	pub vector_dim: u32,
}

impl IndexStore {
	pub fn new(cfg: &anima_config::Qdrant) -> Result<Self> {
		let client = Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client, vector_dim: cfg.vector_dim })
	}

	/// Creates the collection if it does not exist. Safe to call again.
	pub async fn create_collection(&self, collection: &str) -> Result<()> {
		if self.client.collection_exists(collection).await? {
			return Ok(());
		}

		let mut vectors_config = VectorsConfigBuilder::default();

		vectors_config.add_named_vector_params(
			DENSE_VECTOR_NAME,
			VectorParamsBuilder::new(self.vector_dim.into(), Distance::Cosine),
		);

		let mut sparse_vectors_config = SparseVectorsConfigBuilder::default();

		sparse_vectors_config.add_named_vector_params(
			BM25_VECTOR_NAME,
			SparseVectorParamsBuilder::default().modifier(Modifier::Idf as i32),
		);

		let builder = CreateCollectionBuilder::new(collection.to_string())
			.vectors_config(vectors_config)
			.sparse_vectors_config(sparse_vectors_config);

		self.client.create_collection(builder).await?;

		tracing::info!(collection, "Created index collection.");

		Ok(())
	}

	pub async fn delete_collection(&self, collection: &str) -> Result<()> {
		match self.client.delete_collection(collection.to_string()).await {
			Ok(_) => Ok(()),
			Err(err) if is_missing_collection(&err) => {
				tracing::info!(collection, "Collection already absent during delete.");

				Ok(())
			},
			Err(err) => Err(err.into()),
		}
	}

	pub async fn collection_exists(&self, collection: &str) -> Result<bool> {
		Ok(self.client.collection_exists(collection).await?)
	}

	pub async fn count(&self, collection: &str) -> Result<u64> {
		match self.client.count(CountPointsBuilder::new(collection).exact(true)).await {
			Ok(response) => Ok(response.result.map(|result| result.count).unwrap_or(0)),
			Err(err) if is_missing_collection(&err) => Ok(0),
			Err(err) => Err(err.into()),
		}
	}

	/// Upserts chunks; an existing chunk id is overwritten. Fails loudly.
	pub async fn upsert_chunks(&self, collection: &str, chunks: Vec<ChunkRecord>) -> Result<()> {
		if chunks.is_empty() {
			return Ok(());
		}

		let points: Vec<PointStruct> = chunks.into_iter().map(chunk_point).collect();
		let upsert = UpsertPointsBuilder::new(collection.to_string(), points).wait(true);

		self.client.upsert_points(upsert).await?;

		Ok(())
	}

	pub async fn fetch_chunk(&self, collection: &str, chunk_id: Uuid) -> Result<Option<StoredChunk>> {
		let ids = vec![PointId::from(chunk_id.to_string())];
		let request = GetPointsBuilder::new(collection.to_string(), ids).with_payload(true);
		let response = match self.client.get_points(request).await {
			Ok(response) => response,
			Err(err) if is_missing_collection(&err) => return Ok(None),
			Err(err) => return Err(err.into()),
		};

		let Some(point) = response.result.into_iter().next() else {
			return Ok(None);
		};

		Ok(Some(stored_chunk(&point.payload)?))
	}

	/// All chunks of one document, ordered by ordinal, for display.
	pub async fn list_document_chunks(
		&self,
		collection: &str,
		document_id: Uuid,
	) -> Result<Vec<StoredChunk>> {
		let filter = Filter::must([Condition::matches("document_id", document_id.to_string())]);
		let request = ScrollPointsBuilder::new(collection.to_string())
			.filter(filter)
			.limit(SCROLL_LIMIT)
			.with_payload(true);
		let response = match self.client.scroll(request).await {
			Ok(response) => response,
			Err(err) if is_missing_collection(&err) => return Ok(Vec::new()),
			Err(err) => return Err(err.into()),
		};
		let mut chunks = Vec::with_capacity(response.result.len());

		for point in response.result {
			chunks.push(stored_chunk(&point.payload)?);
		}

		chunks.sort_by_key(|chunk| chunk.ordinal);

		Ok(chunks)
	}

	pub async fn search_dense(
		&self,
		collection: &str,
		query_vector: Vec<f32>,
		k: usize,
	) -> Result<SearchOutcome> {
		let points = match self.query_dense(collection, query_vector, k).await {
			Ok(points) => points,
			Err(Error::Qdrant(err)) if is_missing_collection(&err) =>
				return Ok(SearchOutcome { hits: Vec::new(), index_missing: true }),
			Err(err) => return Err(err),
		};

		Ok(SearchOutcome { hits: ranked_hits(points, true)?, index_missing: false })
	}

	pub async fn search_lexical(
		&self,
		collection: &str,
		query_text: &str,
		k: usize,
	) -> Result<SearchOutcome> {
		let points = match self.query_lexical(collection, query_text, k).await {
			Ok(points) => points,
			Err(Error::Qdrant(err)) if is_missing_collection(&err) =>
				return Ok(SearchOutcome { hits: Vec::new(), index_missing: true }),
			Err(err) => return Err(err),
		};

		Ok(SearchOutcome { hits: ranked_hits(points, false)?, index_missing: false })
	}

	/// Runs both sub-searches with `k_sub = 2k` and fuses them with RRF
	/// plus the overlap bonus.
	pub async fn search_hybrid(
		&self,
		collection: &str,
		query_text: &str,
		query_vector: Vec<f32>,
		k: usize,
	) -> Result<SearchOutcome> {
		let k_sub = k * 2;
		let dense = self.search_dense(collection, query_vector, k_sub).await?;
		let lexical = self.search_lexical(collection, query_text, k_sub).await?;

		if dense.index_missing || lexical.index_missing {
			return Ok(SearchOutcome { hits: Vec::new(), index_missing: true });
		}

		Ok(SearchOutcome { hits: fusion::fuse(&dense.hits, &lexical.hits, k), index_missing: false })
	}

	async fn query_dense(
		&self,
		collection: &str,
		query_vector: Vec<f32>,
		k: usize,
	) -> Result<Vec<ScoredPoint>> {
		let request = QueryPointsBuilder::new(collection.to_string())
			.query(Query::new_nearest(query_vector))
			.using(DENSE_VECTOR_NAME)
			.limit(k as u64)
			.with_payload(true);
		let response = self.client.query(request).await?;

		Ok(response.result)
	}

	async fn query_lexical(
		&self,
		collection: &str,
		query_text: &str,
		k: usize,
	) -> Result<Vec<ScoredPoint>> {
		let request = QueryPointsBuilder::new(collection.to_string())
			.query(Query::new_nearest(Document::new(query_text, BM25_MODEL)))
			.using(BM25_VECTOR_NAME)
			.limit(k as u64)
			.with_payload(true);
		let response = self.client.query(request).await?;

		Ok(response.result)
	}
}

fn chunk_point(chunk: ChunkRecord) -> PointStruct {
	let mut payload_map = HashMap::new();

	payload_map.insert("chunk_id".to_string(), Value::from(chunk.chunk_id.to_string()));
	payload_map.insert("document_id".to_string(), Value::from(chunk.document_id.to_string()));
	payload_map.insert("persona_id".to_string(), Value::from(chunk.persona_id.to_string()));
	payload_map.insert("ordinal".to_string(), Value::from(chunk.ordinal as i64));
	payload_map.insert("text".to_string(), Value::from(chunk.text.clone()));
	payload_map.insert("source_filename".to_string(), Value::from(chunk.source_filename.clone()));
	payload_map.insert("char_start".to_string(), Value::from(chunk.char_start as i64));
	payload_map.insert("char_end".to_string(), Value::from(chunk.char_end as i64));

	let payload = Payload::from(payload_map);
	let mut vectors = HashMap::new();

	vectors.insert(DENSE_VECTOR_NAME.to_string(), Vector::from(chunk.vector));
	vectors
		.insert(BM25_VECTOR_NAME.to_string(), Vector::from(Document::new(chunk.text, BM25_MODEL)));

	PointStruct::new(chunk.chunk_id.to_string(), vectors, payload)
}

fn ranked_hits(points: Vec<ScoredPoint>, dense: bool) -> Result<Vec<RetrievalHit>> {
	let mut hits = Vec::with_capacity(points.len());

	for (index, point) in points.into_iter().enumerate() {
		let stored = stored_chunk(&point.payload)?;
		let rank = index as u32 + 1;

		hits.push(RetrievalHit {
			chunk_id: stored.chunk_id,
			document_id: stored.document_id,
			ordinal: stored.ordinal,
			text: stored.text,
			source_filename: stored.source_filename,
			score: point.score,
			dense_rank: dense.then_some(rank),
			lexical_rank: (!dense).then_some(rank),
		});
	}

	Ok(hits)
}

fn stored_chunk(payload: &HashMap<String, Value>) -> Result<StoredChunk> {
	Ok(StoredChunk {
		chunk_id: payload_uuid(payload, "chunk_id")?,
		document_id: payload_uuid(payload, "document_id")?,
		ordinal: payload_u64(payload, "ordinal")? as u32,
		text: payload_str(payload, "text")?,
		source_filename: payload_str(payload, "source_filename")?,
		char_start: payload_u64(payload, "char_start")?,
		char_end: payload_u64(payload, "char_end")?,
	})
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Result<String> {
	payload
		.get(key)
		.and_then(|value| value.as_str())
		.cloned()
		.ok_or_else(|| Error::InvalidPayload(format!("missing string field {key}")))
}

fn payload_u64(payload: &HashMap<String, Value>, key: &str) -> Result<u64> {
	payload
		.get(key)
		.and_then(|value| value.as_integer())
		.and_then(|value| u64::try_from(value).ok())
		.ok_or_else(|| Error::InvalidPayload(format!("missing integer field {key}")))
}

fn payload_uuid(payload: &HashMap<String, Value>, key: &str) -> Result<Uuid> {
	let raw = payload_str(payload, key)?;

	Uuid::parse_str(&raw).map_err(|_| Error::InvalidPayload(format!("field {key} is not a uuid")))
}

/// Matches the error shape qdrant returns for an absent collection.
fn is_missing_collection(err: &qdrant_client::QdrantError) -> bool {
	let message = err.to_string().to_lowercase();

	(message.contains("not found") || message.contains("doesn't exist") || message.contains("404"))
		&& message.contains("collection")
}
