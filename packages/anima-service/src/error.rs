pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Not authorized: {message}")]
	NotAuthorized { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Unsupported format: {message}")]
	UnsupportedFormat { message: String },
	#[error("Parse failure: {message}")]
	ParseFailure { message: String },
	#[error("Embedding failure: {message}")]
	EmbeddingFailure { message: String },
	#[error("Index unavailable: {message}")]
	IndexUnavailable { message: String },
	#[error("Tool timeout: {message}")]
	ToolTimeout { message: String },
	#[error("Model timeout: {message}")]
	ModelTimeout { message: String },
	#[error("Tool exhaustion: {message}")]
	ToolExhaustion { message: String },
	#[error("Iteration cap reached: {message}")]
	IterationCap { message: String },
	#[error("Validation error: {message}")]
	ValidationError { message: String },
	#[error("Canceled")]
	Canceled,
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
}

impl Error {
	pub fn validation(message: impl Into<String>) -> Self {
		Self::ValidationError { message: message.into() }
	}

	/// Stable kind tag carried on API error bodies and `error` frames.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::NotAuthorized { .. } => "NotAuthorized",
			Self::NotFound { .. } => "NotFound",
			Self::UnsupportedFormat { .. } => "UnsupportedFormat",
			Self::ParseFailure { .. } => "ParseFailure",
			Self::EmbeddingFailure { .. } => "EmbeddingFailure",
			Self::IndexUnavailable { .. } => "IndexUnavailable",
			Self::ToolTimeout { .. } => "ToolTimeout",
			Self::ModelTimeout { .. } => "ModelTimeout",
			Self::ToolExhaustion { .. } => "ToolExhaustion",
			Self::IterationCap { .. } => "IterationCap",
			Self::ValidationError { .. } => "ValidationError",
			Self::Canceled => "Canceled",
			Self::Storage { .. } | Self::Provider { .. } => "Internal",
		}
	}
}

impl From<anima_storage::Error> for Error {
	fn from(err: anima_storage::Error) -> Self {
		match err {
			anima_storage::Error::NotFound(message) => Self::NotFound { message },
			anima_storage::Error::InvalidArgument(message) => Self::ValidationError { message },
			anima_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
		}
	}
}

impl From<anima_index::Error> for Error {
	fn from(err: anima_index::Error) -> Self {
		Self::IndexUnavailable { message: err.to_string() }
	}
}

impl From<anima_extract::Error> for Error {
	fn from(err: anima_extract::Error) -> Self {
		match err {
			anima_extract::Error::UnsupportedFormat { extension } =>
				Self::UnsupportedFormat { message: extension },
			anima_extract::Error::ParseFailure { message } => Self::ParseFailure { message },
		}
	}
}

impl From<anima_providers::Error> for Error {
	fn from(err: anima_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
