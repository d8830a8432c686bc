use super::AppState;
use axum::body::Body;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

pub fn routes() -> Router<AppState> {
	Router::new()
		.route("/", get(index))
		.route("/echo", get(echo).post(echo))
}

async fn index() -> impl IntoResponse {
	format!(
		"This server is running dicom-httpx (v{})",
		env!("CARGO_PKG_VERSION")
	)
}

/// Sends the request body back unchanged. Useful to check a listener without touching storage.
async fn echo(request: Request) -> Response<Body> {
	Response::new(request.into_body())
}
