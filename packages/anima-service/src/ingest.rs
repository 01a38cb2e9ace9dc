//! Corpus ingestion: parse → chunk → embed → upsert, per file.
//!
//! Files in one batch run concurrently under a bounded worker count; a
//! file's failure is recorded on its document row and does not abort the
//! rest of the batch. Upserts and counter updates for a collection are
//! serialized through the per-collection write lease.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::{sync::Semaphore, task::JoinSet};
use uuid::Uuid;

use crate::{AnimaService, Error, Result};
use anima_chunking::{ChunkingConfig, chunks};
use anima_index::ChunkRecord;
use anima_storage::{docs, models::DocumentRecord, personas};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DocumentStatus {
	Pending,
	Parsed,
	Indexed,
	Failed,
}

impl DocumentStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Parsed => "parsed",
			Self::Indexed => "indexed",
			Self::Failed => "failed",
		}
	}
}

#[derive(Clone, Debug)]
pub struct UploadFile {
	pub filename: String,
	pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FileOutcome {
	pub filename: String,
	pub status: String,
	pub chunk_count: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub failure_reason: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CorpusUploadResponse {
	pub persona_id: Uuid,
	pub files_uploaded: usize,
	pub total_size: u64,
	pub chunks_added: u64,
	pub files: Vec<FileOutcome>,
	pub message: String,
}

impl AnimaService {
	/// Ingests one upload batch for a persona. Per-file outcomes are
	/// reported rather than raised; only batch-level problems (missing
	/// persona, cross-owner access, empty batch) fail the call.
	pub async fn upload_corpus(
		self: &Arc<Self>,
		user_id: &str,
		persona_id: Uuid,
		files: Vec<UploadFile>,
	) -> Result<CorpusUploadResponse> {
		let persona = self.authorize(user_id, persona_id).await?;

		if files.is_empty() {
			return Err(Error::validation("no files in upload"));
		}

		// Re-create idempotently in case the partition vanished.
		self.index.create_collection(&persona.collection_id).await?;

		let total_size: u64 = files.iter().map(|file| file.bytes.len() as u64).sum();
		let workers = self.cfg.corpus.ingest_workers.max(1) as usize;
		let semaphore = Arc::new(Semaphore::new(workers));
		let mut tasks = JoinSet::new();

		for (index, file) in files.into_iter().enumerate() {
			let service = self.clone();
			let collection = persona.collection_id.clone();
			let semaphore = semaphore.clone();

			tasks.spawn(async move {
				let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
				let outcome = service.ingest_file(persona_id, &collection, file).await;

				(index, outcome)
			});
		}

		let mut outcomes: Vec<(usize, FileOutcome)> = Vec::new();

		while let Some(joined) = tasks.join_next().await {
			match joined {
				Ok((index, outcome)) => outcomes.push((index, outcome)),
				Err(err) => {
					tracing::error!(error = %err, "Ingestion worker panicked.");
				},
			}
		}

		outcomes.sort_by_key(|(index, _)| *index);

		let files: Vec<FileOutcome> = outcomes.into_iter().map(|(_, outcome)| outcome).collect();
		let indexed = files
			.iter()
			.filter(|outcome| outcome.status == DocumentStatus::Indexed.as_str())
			.count() as i64;
		let chunks_added: u64 = files.iter().map(|outcome| outcome.chunk_count).sum();

		if indexed > 0 || chunks_added > 0 {
			let lease = self.write_lease(&persona.collection_id);
			let _guard = lease.lock().await;

			personas::bump_counters(
				&self.db.pool,
				persona_id,
				indexed,
				chunks_added as i64,
				OffsetDateTime::now_utc(),
			)
			.await?;
		}

		tracing::info!(
			%persona_id,
			files = files.len(),
			indexed,
			chunks_added,
			"Corpus upload processed."
		);

		Ok(CorpusUploadResponse {
			persona_id,
			files_uploaded: files.len(),
			total_size,
			chunks_added,
			message: format!("Processed {} files ({indexed} indexed).", files.len()),
			files,
		})
	}

	/// One file through the whole pipeline. Never returns an error; the
	/// outcome records success or the failure reason.
	async fn ingest_file(
		self: &Arc<Self>,
		persona_id: Uuid,
		collection: &str,
		file: UploadFile,
	) -> FileOutcome {
		let document_id = Uuid::new_v4();
		let record = DocumentRecord {
			document_id,
			persona_id,
			filename: file.filename.clone(),
			byte_length: file.bytes.len() as i64,
			chunk_count: 0,
			status: DocumentStatus::Pending.as_str().to_string(),
			failure_reason: None,
			created_at: OffsetDateTime::now_utc(),
		};

		if let Err(err) = docs::insert(&self.db.pool, &record).await {
			return failed_outcome(&file.filename, &Error::from(err));
		}

		match self.index_document(document_id, persona_id, collection, &file).await {
			Ok(chunk_count) => {
				if let Err(err) = docs::update_status(
					&self.db.pool,
					document_id,
					DocumentStatus::Indexed.as_str(),
					chunk_count as i64,
					None,
				)
				.await
				{
					tracing::error!(error = %err, %document_id, "Failed to mark document indexed.");
				}

				FileOutcome {
					filename: file.filename,
					status: DocumentStatus::Indexed.as_str().to_string(),
					chunk_count,
					failure_reason: None,
				}
			},
			Err(err) => {
				tracing::warn!(error = %err, filename = %file.filename, "File ingestion failed.");

				if let Err(update_err) = docs::update_status(
					&self.db.pool,
					document_id,
					DocumentStatus::Failed.as_str(),
					0,
					Some(&err.to_string()),
				)
				.await
				{
					tracing::error!(
						error = %update_err,
						%document_id,
						"Failed to record document failure."
					);
				}

				failed_outcome(&file.filename, &err)
			},
		}
	}

	async fn index_document(
		self: &Arc<Self>,
		document_id: Uuid,
		persona_id: Uuid,
		collection: &str,
		file: &UploadFile,
	) -> Result<u64> {
		let text = anima_extract::extract_text(&file.bytes, &file.filename)?;

		if text.trim().is_empty() {
			return Err(Error::ParseFailure { message: "document produced no text".to_string() });
		}

		docs::update_status(
			&self.db.pool,
			document_id,
			DocumentStatus::Parsed.as_str(),
			0,
			None,
		)
		.await?;

		let cfg = ChunkingConfig {
			window_chars: self.cfg.corpus.window_chars,
			overlap_chars: self.cfg.corpus.overlap_chars,
		};
		let pieces: Vec<_> = chunks(&text, cfg).collect();

		if pieces.is_empty() {
			return Err(Error::ParseFailure { message: "document produced no chunks".to_string() });
		}

		let texts: Vec<String> = pieces.iter().map(|chunk| chunk.text.clone()).collect();
		let vectors =
			self.providers.embedding.embed(&self.cfg.providers.embedding, &texts).await?;

		if vectors.len() != pieces.len() {
			return Err(Error::EmbeddingFailure {
				message: format!(
					"expected {} vectors, provider returned {}",
					pieces.len(),
					vectors.len()
				),
			});
		}

		let records: Vec<ChunkRecord> = pieces
			.into_iter()
			.zip(vectors)
			.map(|(chunk, vector)| ChunkRecord {
				// Stable across re-indexing of the same document version.
				chunk_id: Uuid::new_v5(&document_id, &chunk.ordinal.to_be_bytes()),
				document_id,
				persona_id,
				ordinal: chunk.ordinal,
				text: chunk.text,
				source_filename: file.filename.clone(),
				char_start: chunk.char_start as u64,
				char_end: chunk.char_end as u64,
				vector,
			})
			.collect();
		let chunk_count = records.len() as u64;
		let lease = self.write_lease(collection);
		let _guard = lease.lock().await;

		self.index.upsert_chunks(collection, records).await?;

		Ok(chunk_count)
	}
}

fn failed_outcome(filename: &str, err: &Error) -> FileOutcome {
	FileOutcome {
		filename: filename.to_string(),
		status: DocumentStatus::Failed.as_str().to_string(),
		chunk_count: 0,
		failure_reason: Some(err.to_string()),
	}
}
