use std::convert::Infallible;

use axum::{
	Json, Router,
	extract::{Multipart, Path, Query, State},
	http::StatusCode,
	response::{
		IntoResponse, Response,
		sse::{Event, KeepAlive, Sse},
	},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};
use uuid::Uuid;

use crate::state::AppState;
use anima_domain::Frame;
use anima_service::{
	AnalysisRequest, AnalysisResponse, ChatRequest, CorpusUploadResponse, DocumentsResponse,
	Error as ServiceError, IngestionStatusResponse, ModelsResponse, PersonaCreateRequest,
	PersonaListResponse, PersonaUpdateRequest, PersonaView, UploadFile,
};

const STREAM_BUFFER: usize = 64;

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/api/models", get(models))
		.route("/api/personas", post(create_persona).get(list_personas))
		.route(
			"/api/personas/{persona_id}",
			get(get_persona).patch(update_persona).delete(delete_persona),
		)
		.route("/api/personas/{persona_id}/corpus", post(upload_corpus))
		.route("/api/personas/{persona_id}/corpus/status", get(ingestion_status))
		.route("/api/personas/{persona_id}/documents", get(list_documents))
		.route("/api/analyze", post(analyze))
		.route("/api/analyze/stream", post(analyze_stream))
		.route("/api/chat/stream", post(chat_stream))
		.with_state(state)
}

#[derive(Debug, Deserialize)]
struct OwnerQuery {
	user_id: String,
}

async fn health() -> Json<Value> {
	Json(serde_json::json!({ "status": "healthy" }))
}

async fn models(State(state): State<AppState>) -> Json<ModelsResponse> {
	Json(state.service.list_models())
}

async fn create_persona(
	State(state): State<AppState>,
	Json(payload): Json<PersonaCreateRequest>,
) -> Result<(StatusCode, Json<PersonaView>), ApiError> {
	let persona = state.service.create_persona(payload).await?;

	Ok((StatusCode::CREATED, Json(persona)))
}

async fn list_personas(
	State(state): State<AppState>,
	Query(query): Query<OwnerQuery>,
) -> Result<Json<PersonaListResponse>, ApiError> {
	let personas = state.service.list_personas(&query.user_id).await?;

	Ok(Json(personas))
}

async fn get_persona(
	State(state): State<AppState>,
	Path(persona_id): Path<Uuid>,
	Query(query): Query<OwnerQuery>,
) -> Result<Json<PersonaView>, ApiError> {
	let persona = state.service.get_persona(&query.user_id, persona_id).await?;

	Ok(Json(persona))
}

async fn update_persona(
	State(state): State<AppState>,
	Path(persona_id): Path<Uuid>,
	Json(payload): Json<PersonaUpdateRequest>,
) -> Result<Json<PersonaView>, ApiError> {
	let persona = state.service.update_persona(persona_id, payload).await?;

	Ok(Json(persona))
}

async fn delete_persona(
	State(state): State<AppState>,
	Path(persona_id): Path<Uuid>,
	Query(query): Query<OwnerQuery>,
) -> Result<StatusCode, ApiError> {
	state.service.delete_persona(&query.user_id, persona_id).await?;

	Ok(StatusCode::NO_CONTENT)
}

/// Multipart corpus upload: one `user_id` text part plus the files.
async fn upload_corpus(
	State(state): State<AppState>,
	Path(persona_id): Path<Uuid>,
	mut multipart: Multipart,
) -> Result<Json<CorpusUploadResponse>, ApiError> {
	let mut user_id: Option<String> = None;
	let mut files: Vec<UploadFile> = Vec::new();

	while let Some(field) =
		multipart.next_field().await.map_err(|err| validation_error(err.to_string()))?
	{
		let name = field.name().map(str::to_string);

		if name.as_deref() == Some("user_id") {
			user_id =
				Some(field.text().await.map_err(|err| validation_error(err.to_string()))?);

			continue;
		}

		let Some(filename) = field.file_name().map(str::to_string) else {
			continue;
		};
		let bytes = field.bytes().await.map_err(|err| validation_error(err.to_string()))?;

		files.push(UploadFile { filename, bytes: bytes.to_vec() });
	}

	let user_id = user_id.ok_or_else(|| validation_error("user_id part is required"))?;
	let response = state.service.upload_corpus(&user_id, persona_id, files).await?;

	Ok(Json(response))
}

async fn ingestion_status(
	State(state): State<AppState>,
	Path(persona_id): Path<Uuid>,
	Query(query): Query<OwnerQuery>,
) -> Result<Json<IngestionStatusResponse>, ApiError> {
	let status = state.service.ingestion_status(&query.user_id, persona_id).await?;

	Ok(Json(status))
}

async fn list_documents(
	State(state): State<AppState>,
	Path(persona_id): Path<Uuid>,
	Query(query): Query<OwnerQuery>,
) -> Result<Json<DocumentsResponse>, ApiError> {
	let documents = state.service.list_documents(&query.user_id, persona_id).await?;

	Ok(Json(documents))
}

async fn analyze(
	State(state): State<AppState>,
	Json(payload): Json<AnalysisRequest>,
) -> Result<Json<AnalysisResponse>, ApiError> {
	let response = state.service.analyze(payload).await?;

	Ok(Json(response))
}

async fn analyze_stream(
	State(state): State<AppState>,
	Json(payload): Json<AnalysisRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
	let (tx, rx) = mpsc::channel(STREAM_BUFFER);

	tokio::spawn(state.service.clone().analyze_stream(payload, tx));

	frame_stream(rx)
}

async fn chat_stream(
	State(state): State<AppState>,
	Json(payload): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
	let (tx, rx) = mpsc::channel(STREAM_BUFFER);

	tokio::spawn(state.service.clone().chat_stream(payload, tx));

	frame_stream(rx)
}

/// Adapts the engine's frame channel to SSE. Dropping the response body
/// drops the receiver, which the producer observes as cancellation.
fn frame_stream(
	rx: mpsc::Receiver<Frame>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
	let stream = ReceiverStream::new(rx).map(|frame| {
		let data = serde_json::to_string(&frame).unwrap_or_else(|err| {
			tracing::error!(error = %err, "Failed to serialize frame.");

			r#"{"type":"error","message":"frame serialization failed","kind":"Internal"}"#
				.to_string()
		});

		Ok(Event::default().data(data))
	});

	Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	kind: String,
	message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	details: Option<Value>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	kind: String,
	message: String,
	details: Option<Value>,
}

fn validation_error(message: impl Into<String>) -> ApiError {
	ApiError {
		status: StatusCode::UNPROCESSABLE_ENTITY,
		kind: "ValidationError".to_string(),
		message: message.into(),
		details: None,
	}
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		let status = match &err {
			ServiceError::NotAuthorized { .. } => StatusCode::FORBIDDEN,
			ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
			ServiceError::ValidationError { .. } | ServiceError::ParseFailure { .. } =>
				StatusCode::UNPROCESSABLE_ENTITY,
			ServiceError::UnsupportedFormat { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
			ServiceError::EmbeddingFailure { .. }
			| ServiceError::ToolExhaustion { .. }
			| ServiceError::IterationCap { .. }
			| ServiceError::Provider { .. } => StatusCode::BAD_GATEWAY,
			ServiceError::IndexUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
			ServiceError::ToolTimeout { .. } | ServiceError::ModelTimeout { .. } =>
				StatusCode::GATEWAY_TIMEOUT,
			ServiceError::Canceled => StatusCode::REQUEST_TIMEOUT,
			ServiceError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
		};

		Self { status, kind: err.kind().to_string(), message: err.to_string(), details: None }
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body =
			ErrorBody { kind: self.kind, message: self.message, details: self.details };

		(self.status, Json(body)).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn service_errors_map_to_api_kinds() {
		let err = ApiError::from(ServiceError::NotAuthorized {
			message: "caller does not own this persona".to_string(),
		});

		assert_eq!(err.status, StatusCode::FORBIDDEN);
		assert_eq!(err.kind, "NotAuthorized");

		let err = ApiError::from(ServiceError::Storage { message: "pool closed".to_string() });

		assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
		assert_eq!(err.kind, "Internal");
	}

	#[test]
	fn error_body_omits_absent_details() {
		let err = validation_error("empty draft");
		let body = ErrorBody { kind: err.kind, message: err.message, details: None };
		let json = serde_json::to_value(&body).expect("serialize failed");

		assert_eq!(json["kind"], "ValidationError");
		assert!(json.get("details").is_none());
	}
}
