use sqlx::PgExecutor;
use uuid::Uuid;

use crate::{Result, models::DocumentRecord};

const DOCUMENT_COLUMNS: &str = "\
document_id, persona_id, filename, byte_length, chunk_count, status, failure_reason, created_at";

pub async fn insert<'e, E>(executor: E, document: &DocumentRecord) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO documents (
	document_id,
	persona_id,
	filename,
	byte_length,
	chunk_count,
	status,
	failure_reason,
	created_at
)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
	)
	.bind(document.document_id)
	.bind(document.persona_id)
	.bind(&document.filename)
	.bind(document.byte_length)
	.bind(document.chunk_count)
	.bind(&document.status)
	.bind(&document.failure_reason)
	.bind(document.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn update_status<'e, E>(
	executor: E,
	document_id: Uuid,
	status: &str,
	chunk_count: i64,
	failure_reason: Option<&str>,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
UPDATE documents
SET status = $2,
	chunk_count = $3,
	failure_reason = $4
WHERE document_id = $1",
	)
	.bind(document_id)
	.bind(status)
	.bind(chunk_count)
	.bind(failure_reason)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn list_by_persona<'e, E>(executor: E, persona_id: Uuid) -> Result<Vec<DocumentRecord>>
where
	E: PgExecutor<'e>,
{
	let documents = sqlx::query_as::<_, DocumentRecord>(&format!(
		"SELECT {DOCUMENT_COLUMNS} FROM documents WHERE persona_id = $1 ORDER BY created_at ASC"
	))
	.bind(persona_id)
	.fetch_all(executor)
	.await?;

	Ok(documents)
}
