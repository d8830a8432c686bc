use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use thiserror::Error;

/// Failures of a single store or retrieve operation.
///
/// These are per-request conditions: they are reported to the peer and never terminate the
/// process. Startup failures are [`crate::config::ConfigurationError`]s.
#[derive(Debug, Error)]
pub enum TransferError {
	#[error("No valid original file name: {name:?}")]
	InvalidAddress { name: String },
	#[error("Unsupported media type: {0:?}")]
	UnsupportedMediaType(String),
	#[error("{} does not exist", path.display())]
	NotFound { path: PathBuf },
	#[error("Failed to create {}: {source}", path.display())]
	Create {
		path: PathBuf,
		source: std::io::Error,
	},
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error("Malformed multipart body: {0}")]
	Multipart(#[from] multer::Error),
	#[error(transparent)]
	Request(#[from] http::Error),
	#[error(transparent)]
	Http(#[from] reqwest::Error),
	#[error(transparent)]
	Transport {
		source: Box<dyn std::error::Error + Send + Sync>,
	},
	#[error("Peer responded with status {0}")]
	Status(StatusCode),
}

impl TransferError {
	pub fn transport(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
		Self::Transport {
			source: source.into(),
		}
	}

	/// The status code reported to an HTTP peer for this failure.
	pub const fn status(&self) -> StatusCode {
		match self {
			Self::InvalidAddress { .. } => StatusCode::NO_CONTENT,
			Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
			Self::NotFound { .. } | Self::Create { .. } => StatusCode::NOT_FOUND,
			Self::Io(_) => StatusCode::CONFLICT,
			Self::Multipart(_) => StatusCode::BAD_REQUEST,
			Self::Request(_) | Self::Http(_) | Self::Transport { .. } | Self::Status(_) => {
				StatusCode::INTERNAL_SERVER_ERROR
			}
		}
	}
}

impl IntoResponse for TransferError {
	fn into_response(self) -> Response {
		match self.status() {
			// 204 must not carry a body
			StatusCode::NO_CONTENT => StatusCode::NO_CONTENT.into_response(),
			status => (status, self.to_string()).into_response(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_mapping() {
		let invalid = TransferError::InvalidAddress {
			name: String::from("C.dcm"),
		};
		assert_eq!(invalid.status(), StatusCode::NO_CONTENT);
		assert_eq!(
			TransferError::UnsupportedMediaType(String::from("text/plain")).status(),
			StatusCode::UNSUPPORTED_MEDIA_TYPE
		);
		assert_eq!(
			TransferError::NotFound {
				path: PathBuf::from("x")
			}
			.status(),
			StatusCode::NOT_FOUND
		);
		assert_eq!(
			TransferError::from(std::io::Error::other("disk full")).status(),
			StatusCode::CONFLICT
		);
	}

	#[test]
	fn no_content_has_empty_body() {
		let response = TransferError::InvalidAddress {
			name: String::new(),
		}
		.into_response();
		assert_eq!(response.status(), StatusCode::NO_CONTENT);
	}
}
