use super::AppState;
use crate::error::TransferError;
use crate::transfer;
use crate::types::UI;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{RequestExt, Router};
use http_body_util::LengthLimitError;
use std::error::Error;
use tracing::{instrument, warn};

/// HTTP Router for the Store Transaction
pub fn routes() -> Router<AppState> {
	Router::new().route("/studies/{study}", post(study))
}

/// The study in the path is informational. Objects are stored under the name each part carries.
#[instrument(skip_all, fields(study = %study))]
async fn study(State(state): State<AppState>, Path(study): Path<UI>, request: Request) -> Response {
	let (parts, body) = request.with_limited_body().into_parts();

	match transfer::store(&parts.headers, body.into_data_stream(), &state.root).await {
		Ok(_) => StatusCode::OK.into_response(),
		Err(err) if is_limit_exceeded(&err) => {
			warn!("Upload limit exceeded.");
			StatusCode::PAYLOAD_TOO_LARGE.into_response()
		}
		Err(err) => {
			warn!("Store failed: {err}");
			err.into_response()
		}
	}
}

/// Body errors reach the store operation wrapped in I/O errors of the file copy or in read errors
/// of the multipart parser, depending on the encoding.
fn is_limit_exceeded(err: &TransferError) -> bool {
	let mut next: Option<&(dyn Error + 'static)> = match err {
		TransferError::Io(err) => Some(err),
		TransferError::Multipart(err) => Some(err),
		_ => None,
	};

	while let Some(current) = next {
		if current.is::<LengthLimitError>() {
			return true;
		}
		next = if let Some(err) = current.downcast_ref::<std::io::Error>() {
			err.get_ref().map(|inner| inner as &(dyn Error + 'static))
		} else if let Some(multer::Error::StreamReadFailed(inner)) =
			current.downcast_ref::<multer::Error>()
		{
			Some(inner.as_ref() as &(dyn Error + 'static))
		} else {
			current.source()
		};
	}
	false
}
