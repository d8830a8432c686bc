use super::AppState;
use crate::transfer::{self, ResourceQuery, RetrieveResponse};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::{info, instrument, warn, Instrument};

/// HTTP Router for the Retrieve Transaction
#[rustfmt::skip]
pub fn routes() -> Router<AppState> {
	Router::new()
		.route("/studies/{study}", get(retrieve_resource))
		.route("/studies/{study}/series/{series}", get(retrieve_resource))
		.route("/studies/{study}/series/{series}/instances/{instance}", get(retrieve_resource))
}

#[instrument(skip_all, fields(level = %query.level()))]
async fn retrieve_resource(
	State(state): State<AppState>,
	Path(query): Path<ResourceQuery>,
) -> Response {
	match transfer::retrieve(&query, &state.root).await {
		Ok(RetrieveResponse {
			headers,
			body,
			completion,
		}) => {
			tokio::spawn(
				async move {
					match completion.await {
						Ok(result) => info!("Retrieved {result}"),
						Err(err) => warn!("Retrieve aborted: {err}"),
					}
				}
				.in_current_span(),
			);
			(headers, Body::from_stream(body)).into_response()
		}
		Err(err) => {
			warn!("Retrieve failed: {err}");
			err.into_response()
		}
	}
}
