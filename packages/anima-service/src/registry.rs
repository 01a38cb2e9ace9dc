//! Persona lifecycle: creation, listing, restricted updates, deletion with
//! collection cascade, document/status views, and the model catalogue.
//! Every operation authorizes the caller against the persona's owner.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{AnimaService, Error, Result, collection_id, ingest::DocumentStatus};
use anima_config::ModelEntry;
use anima_storage::{
	docs,
	models::{DocumentRecord, PersonaRecord},
	personas,
};

const MAX_NAME_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 500;

#[derive(Clone, Debug, Deserialize)]
pub struct PersonaCreateRequest {
	pub user_id: String,
	pub name: String,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub model: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PersonaUpdateRequest {
	pub user_id: String,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub model: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PersonaView {
	pub persona_id: Uuid,
	pub name: String,
	pub description: Option<String>,
	pub model_id: String,
	pub collection_id: String,
	pub document_count: i64,
	pub chunk_count: i64,
	pub corpus_available: bool,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	pub updated_at: OffsetDateTime,
}

impl PersonaView {
	fn from_record(record: PersonaRecord, corpus_available: bool) -> Self {
		Self {
			persona_id: record.persona_id,
			name: record.name,
			description: record.description,
			model_id: record.model_id,
			collection_id: record.collection_id,
			document_count: record.document_count,
			chunk_count: record.chunk_count,
			corpus_available,
			created_at: record.created_at,
			updated_at: record.updated_at,
		}
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct PersonaListResponse {
	pub personas: Vec<PersonaView>,
	pub total: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct DocumentView {
	pub document_id: Uuid,
	pub filename: String,
	pub byte_length: i64,
	pub chunk_count: i64,
	pub status: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub failure_reason: Option<String>,
}

impl DocumentView {
	fn from_record(record: DocumentRecord) -> Self {
		Self {
			document_id: record.document_id,
			filename: record.filename,
			byte_length: record.byte_length,
			chunk_count: record.chunk_count,
			status: record.status,
			failure_reason: record.failure_reason,
		}
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct ChunkView {
	pub text: String,
	pub ordinal: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct DocumentGroup {
	pub filename: String,
	pub chunk_count: usize,
	pub chunks: Vec<ChunkView>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DocumentsResponse {
	pub files: Vec<DocumentGroup>,
}

#[derive(Clone, Debug, Serialize)]
pub struct IngestionStatusResponse {
	pub persona_id: Uuid,
	pub status: String,
	pub documents: Vec<DocumentView>,
	pub chunk_count: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ModelsResponse {
	pub models: Vec<ModelEntry>,
}

impl AnimaService {
	pub async fn create_persona(&self, request: PersonaCreateRequest) -> Result<PersonaView> {
		let name = request.name.trim();

		if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
			return Err(Error::validation(format!(
				"name must be between 1 and {MAX_NAME_CHARS} characters"
			)));
		}
		if let Some(description) = &request.description
			&& description.chars().count() > MAX_DESCRIPTION_CHARS
		{
			return Err(Error::validation(format!(
				"description must be at most {MAX_DESCRIPTION_CHARS} characters"
			)));
		}

		let model_id = self.validate_model(request.model.as_deref())?;
		let persona_id = Uuid::new_v4();
		let collection = collection_id(&request.user_id, persona_id);
		let now = OffsetDateTime::now_utc();
		let record = PersonaRecord {
			persona_id,
			owner_id: request.user_id.clone(),
			name: name.to_string(),
			description: request.description.clone(),
			model_id,
			collection_id: collection.clone(),
			document_count: 0,
			chunk_count: 0,
			created_at: now,
			updated_at: now,
		};

		// The collection must exist before the metadata becomes visible;
		// a persona without its partition would read as corpus-missing.
		self.index.create_collection(&collection).await?;

		personas::insert(&self.db.pool, &record).await?;

		tracing::info!(%persona_id, owner_id = %record.owner_id, "Created persona.");

		Ok(PersonaView::from_record(record, true))
	}

	pub async fn list_personas(&self, user_id: &str) -> Result<PersonaListResponse> {
		let records = personas::list_by_owner(&self.db.pool, user_id).await?;
		let mut views = Vec::with_capacity(records.len());

		for record in records {
			let corpus_available =
				self.index.collection_exists(&record.collection_id).await.unwrap_or(false);

			views.push(PersonaView::from_record(record, corpus_available));
		}

		Ok(PersonaListResponse { total: views.len(), personas: views })
	}

	pub async fn get_persona(&self, user_id: &str, persona_id: Uuid) -> Result<PersonaView> {
		let record = self.authorize(user_id, persona_id).await?;
		let corpus_available =
			self.index.collection_exists(&record.collection_id).await.unwrap_or(false);

		Ok(PersonaView::from_record(record, corpus_available))
	}

	pub async fn update_persona(
		&self,
		persona_id: Uuid,
		request: PersonaUpdateRequest,
	) -> Result<PersonaView> {
		self.authorize(&request.user_id, persona_id).await?;

		if let Some(name) = &request.name {
			let trimmed = name.trim();

			if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_CHARS {
				return Err(Error::validation(format!(
					"name must be between 1 and {MAX_NAME_CHARS} characters"
				)));
			}
		}
		if let Some(description) = &request.description
			&& description.chars().count() > MAX_DESCRIPTION_CHARS
		{
			return Err(Error::validation(format!(
				"description must be at most {MAX_DESCRIPTION_CHARS} characters"
			)));
		}

		let model_id = match request.model.as_deref() {
			Some(model) => Some(self.validate_model(Some(model))?),
			None => None,
		};
		let record = personas::update(
			&self.db.pool,
			persona_id,
			request.name.as_deref().map(str::trim),
			request.description.as_deref(),
			model_id.as_deref(),
			OffsetDateTime::now_utc(),
		)
		.await?
		.ok_or_else(|| Error::NotFound { message: format!("persona {persona_id}") })?;
		let corpus_available =
			self.index.collection_exists(&record.collection_id).await.unwrap_or(false);

		Ok(PersonaView::from_record(record, corpus_available))
	}

	/// Deletes a persona. The collection goes first; metadata is only
	/// forgotten once the index partition is gone.
	pub async fn delete_persona(&self, user_id: &str, persona_id: Uuid) -> Result<()> {
		let record = self.authorize(user_id, persona_id).await?;

		self.index.delete_collection(&record.collection_id).await?;

		personas::delete(&self.db.pool, persona_id).await?;

		tracing::info!(%persona_id, "Deleted persona and its collection.");

		Ok(())
	}

	/// Grouped per-file chunk listing for display.
	pub async fn list_documents(
		&self,
		user_id: &str,
		persona_id: Uuid,
	) -> Result<DocumentsResponse> {
		let record = self.authorize(user_id, persona_id).await?;
		let documents = docs::list_by_persona(&self.db.pool, persona_id).await?;
		let mut files = Vec::with_capacity(documents.len());

		for document in documents {
			let chunks = if document.status == DocumentStatus::Indexed.as_str() {
				self.index
					.list_document_chunks(&record.collection_id, document.document_id)
					.await?
					.into_iter()
					.map(|chunk| ChunkView { text: chunk.text, ordinal: chunk.ordinal })
					.collect()
			} else {
				Vec::new()
			};

			files.push(DocumentGroup {
				filename: document.filename,
				chunk_count: chunks.len(),
				chunks,
			});
		}

		Ok(DocumentsResponse { files })
	}

	pub async fn ingestion_status(
		&self,
		user_id: &str,
		persona_id: Uuid,
	) -> Result<IngestionStatusResponse> {
		let record = self.authorize(user_id, persona_id).await?;
		let documents = docs::list_by_persona(&self.db.pool, persona_id).await?;
		let status = if documents.is_empty() {
			"pending"
		} else if documents.iter().any(|doc| doc.status == DocumentStatus::Indexed.as_str()) {
			"completed"
		} else {
			"failed"
		};

		Ok(IngestionStatusResponse {
			persona_id,
			status: status.to_string(),
			documents: documents.into_iter().map(DocumentView::from_record).collect(),
			chunk_count: record.chunk_count,
		})
	}

	pub fn list_models(&self) -> ModelsResponse {
		ModelsResponse { models: self.cfg.models.clone() }
	}

	/// Fetches the persona and rejects cross-owner access.
	pub(crate) async fn authorize(&self, user_id: &str, persona_id: Uuid) -> Result<PersonaRecord> {
		let record = personas::fetch(&self.db.pool, persona_id)
			.await?
			.ok_or_else(|| Error::NotFound { message: format!("persona {persona_id}") })?;

		if record.owner_id != user_id {
			return Err(Error::NotAuthorized {
				message: "caller does not own this persona".to_string(),
			});
		}

		Ok(record)
	}

	/// A persona's model, with an optional per-request override, checked
	/// against the configured catalogue.
	pub(crate) fn resolve_model(
		&self,
		persona: &PersonaRecord,
		requested: Option<&str>,
	) -> Result<String> {
		match requested {
			Some(model) => self.validate_model(Some(model)),
			None => Ok(persona.model_id.clone()),
		}
	}

	fn validate_model(&self, requested: Option<&str>) -> Result<String> {
		let model = requested.unwrap_or(&self.cfg.default_model);

		if !self.cfg.models.iter().any(|entry| entry.id == model) {
			return Err(Error::validation(format!("unknown model: {model}")));
		}

		Ok(model.to_string())
	}
}
