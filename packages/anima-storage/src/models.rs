use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct PersonaRecord {
	pub persona_id: Uuid,
	pub owner_id: String,
	pub name: String,
	pub description: Option<String>,
	pub model_id: String,
	pub collection_id: String,
	pub document_count: i64,
	pub chunk_count: i64,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct DocumentRecord {
	pub document_id: Uuid,
	pub persona_id: Uuid,
	pub filename: String,
	pub byte_length: i64,
	pub chunk_count: i64,
	pub status: String,
	pub failure_reason: Option<String>,
	pub created_at: OffsetDateTime,
}
