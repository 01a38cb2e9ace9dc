use sqlx::PgExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Result, models::PersonaRecord};

const PERSONA_COLUMNS: &str = "\
persona_id, owner_id, name, description, model_id, collection_id, document_count, chunk_count, \
created_at, updated_at";

pub async fn insert<'e, E>(executor: E, persona: &PersonaRecord) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO personas (
	persona_id,
	owner_id,
	name,
	description,
	model_id,
	collection_id,
	document_count,
	chunk_count,
	created_at,
	updated_at
)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
	)
	.bind(persona.persona_id)
	.bind(&persona.owner_id)
	.bind(&persona.name)
	.bind(&persona.description)
	.bind(&persona.model_id)
	.bind(&persona.collection_id)
	.bind(persona.document_count)
	.bind(persona.chunk_count)
	.bind(persona.created_at)
	.bind(persona.updated_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn fetch<'e, E>(executor: E, persona_id: Uuid) -> Result<Option<PersonaRecord>>
where
	E: PgExecutor<'e>,
{
	let persona = sqlx::query_as::<_, PersonaRecord>(&format!(
		"SELECT {PERSONA_COLUMNS} FROM personas WHERE persona_id = $1"
	))
	.bind(persona_id)
	.fetch_optional(executor)
	.await?;

	Ok(persona)
}

pub async fn list_by_owner<'e, E>(executor: E, owner_id: &str) -> Result<Vec<PersonaRecord>>
where
	E: PgExecutor<'e>,
{
	let personas = sqlx::query_as::<_, PersonaRecord>(&format!(
		"SELECT {PERSONA_COLUMNS} FROM personas WHERE owner_id = $1 ORDER BY created_at ASC"
	))
	.bind(owner_id)
	.fetch_all(executor)
	.await?;

	Ok(personas)
}

/// Applies a restricted patch; absent fields keep their current value.
pub async fn update<'e, E>(
	executor: E,
	persona_id: Uuid,
	name: Option<&str>,
	description: Option<&str>,
	model_id: Option<&str>,
	now: OffsetDateTime,
) -> Result<Option<PersonaRecord>>
where
	E: PgExecutor<'e>,
{
	let persona = sqlx::query_as::<_, PersonaRecord>(&format!(
		"\
UPDATE personas
SET name = COALESCE($2, name),
	description = COALESCE($3, description),
	model_id = COALESCE($4, model_id),
	updated_at = $5
WHERE persona_id = $1
RETURNING {PERSONA_COLUMNS}"
	))
	.bind(persona_id)
	.bind(name)
	.bind(description)
	.bind(model_id)
	.bind(now)
	.fetch_optional(executor)
	.await?;

	Ok(persona)
}

pub async fn delete<'e, E>(executor: E, persona_id: Uuid) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query("DELETE FROM personas WHERE persona_id = $1")
		.bind(persona_id)
		.execute(executor)
		.await?;

	Ok(result.rows_affected() > 0)
}

pub async fn bump_counters<'e, E>(
	executor: E,
	persona_id: Uuid,
	document_delta: i64,
	chunk_delta: i64,
	now: OffsetDateTime,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
UPDATE personas
SET document_count = document_count + $2,
	chunk_count = chunk_count + $3,
	updated_at = $4
WHERE persona_id = $1",
	)
	.bind(persona_id)
	.bind(document_delta)
	.bind(chunk_delta)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(())
}
