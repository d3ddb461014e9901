use crate::pipeline::TurnState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Qdrant error: {message}")]
	Qdrant { message: String },
	#[error("Maintenance error: {message}")]
	Maintenance { message: String },
	#[error(transparent)]
	Similarity(#[from] crag_domain::similarity::DimensionMismatch),
	#[error("Turn was cancelled.")]
	Cancelled,
	#[error("No transition from {state:?} on {event}.")]
	Transition { state: TurnState, event: &'static str },
}
impl From<crag_providers::Error> for Error {
	fn from(err: crag_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

impl From<crag_storage::Error> for Error {
	fn from(err: crag_storage::Error) -> Self {
		match err {
			crag_storage::Error::InvalidPayload(message) => Self::Storage { message },
			crag_storage::Error::Qdrant(inner) => Self::Qdrant { message: inner.to_string() },
		}
	}
}
