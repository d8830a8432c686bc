use axum::extract::{DefaultBodyLimit, Request};
use axum::http::HeaderValue;
use axum::response::Response;
use axum::Router;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::trace::{self, TraceLayer};
use tracing::Level;

mod home;
mod stow;
mod wado;

/// Shared by every request handler.
#[derive(Debug, Clone)]
pub struct AppState {
	/// Root of the storage layout
	pub root: Arc<Path>,
}

impl AppState {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self {
			root: Arc::from(root.into()),
		}
	}
}

/// The complete route set. Every listener serves this router, regardless of the HTTP version.
pub fn app(state: AppState, max_upload_size: usize) -> Router {
	Router::new()
		.merge(home::routes())
		.merge(stow::routes())
		.merge(wado::routes())
		.layer(axum::middleware::from_fn(add_common_headers))
		.layer(
			TraceLayer::new_for_http()
				.make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
				.on_request(trace::DefaultOnRequest::new().level(Level::INFO))
				.on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
		)
		.layer(DefaultBodyLimit::max(max_upload_size))
		.with_state(state)
}

async fn add_common_headers(req: Request, next: axum::middleware::Next) -> Response {
	let mut response = next.run(req).await;
	let server_name = concat!("dicom-httpx/", env!("CARGO_PKG_VERSION"));
	response
		.headers_mut()
		.insert("Server", HeaderValue::from_static(server_name));
	response
}
