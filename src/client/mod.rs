//! Client side of the store and retrieve operations.
//!
//! [`get`] and [`post`] are shared by all HTTP versions. They only depend on a [`RoundTrip`], which
//! the [`http1`], [`http2`] and `http3` adapters implement.

pub mod http1;
pub mod http2;
#[cfg(feature = "http3")]
pub mod http3;

use crate::codec::multipart;
use crate::codec::single::SinglePart;
use crate::config::ConfigurationError;
use crate::error::TransferError;
use crate::transfer;
use crate::types::TransferResult;
use crate::upload::{async_upload, sync_upload, ObjectSink};
use async_trait::async_trait;
use bytes::Bytes;
use clap::ValueEnum;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, Request, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};
use url::Url;

/// How a directory is sent.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, ValueEnum)]
pub enum ChunkingMode {
	/// One `application/dicom` request per object
	#[default]
	Single,
	/// One `multipart/related` request for all objects
	Multi,
}

/// How the requests of [`ChunkingMode::Single`] are issued.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, ValueEnum)]
pub enum UploadMode {
	/// One request after the other
	#[default]
	Sync,
	/// Concurrent requests from a pool of workers
	Async,
}

/// Trust settings of a client.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
	/// Additional PEM root certificate, e.g. the server's self-signed certificate
	pub root_certificate: Option<PathBuf>,
	/// Skips certificate verification entirely
	pub insecure: bool,
}

impl Credentials {
	pub(crate) fn reqwest_builder(&self) -> Result<reqwest::ClientBuilder, ConfigurationError> {
		let mut builder = reqwest::Client::builder()
			.use_rustls_tls()
			.danger_accept_invalid_certs(self.insecure);

		if let Some(path) = &self.root_certificate {
			let pem = std::fs::read(path).map_err(|source| ConfigurationError::Read {
				path: path.clone(),
				source,
			})?;
			builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
		}

		Ok(builder)
	}
}

/// The response to a [`RoundTrip`]. The body has not been read yet.
pub struct Reply {
	pub status: StatusCode,
	pub headers: HeaderMap,
	pub body: BoxStream<'static, std::io::Result<Bytes>>,
}

/// Sends one request and waits for the response head.
#[async_trait]
pub trait RoundTrip: Send + Sync {
	async fn round_trip(&self, request: Request<Bytes>) -> Result<Reply, TransferError>;
}

/// [`RoundTrip`] on top of a configured reqwest client.
pub(crate) async fn execute(
	client: &reqwest::Client,
	request: Request<Bytes>,
) -> Result<Reply, TransferError> {
	let request = reqwest::Request::try_from(request.map(reqwest::Body::from))?;
	let response = client.execute(request).await?;
	Ok(Reply {
		status: response.status(),
		headers: response.headers().clone(),
		body: response
			.bytes_stream()
			.map_err(std::io::Error::other)
			.boxed(),
	})
}

fn ensure_success(status: StatusCode) -> Result<(), TransferError> {
	if status.is_success() {
		Ok(())
	} else {
		Err(TransferError::Status(status))
	}
}

/// The study UID of a `.../studies/{study}/...` URL.
pub fn study_from_url(url: &Url) -> Option<&str> {
	let mut segments = url.path_segments()?;
	segments.find(|segment| *segment == "studies")?;
	segments.next().filter(|study| !study.is_empty())
}

/// Retrieves `url` and stores the response body below `root`.
///
/// # Errors
/// Fails with [`TransferError::Status`] if the server does not answer with a success status and
/// with the store error if the body cannot be stored.
#[instrument(skip_all, fields(%url, study = study_from_url(url)))]
pub async fn get(
	transport: &dyn RoundTrip,
	url: &Url,
	root: &Path,
) -> Result<TransferResult, TransferError> {
	let start = Instant::now();
	let request = Request::get(url.as_str()).body(Bytes::new())?;
	let reply = transport.round_trip(request).await?;
	ensure_success(reply.status)?;

	let stored = transfer::store(&reply.headers, reply.body, root).await?;
	Ok(TransferResult::new(stored.bytes, start.elapsed()))
}

/// Sends every object below `root` to `url`.
///
/// # Errors
/// With [`ChunkingMode::Multi`] or [`UploadMode::Sync`], the first failure is returned. With
/// [`UploadMode::Async`] failing objects are logged and only a failing directory walk is returned.
#[instrument(skip_all, fields(%url, ?chunking, ?mode))]
pub async fn post(
	transport: Arc<dyn RoundTrip>,
	url: &Url,
	root: &Path,
	chunking: ChunkingMode,
	mode: UploadMode,
) -> Result<TransferResult, TransferError> {
	match chunking {
		ChunkingMode::Multi => post_multipart(transport.as_ref(), url, root).await,
		ChunkingMode::Single => post_single_parts(transport, url, root, mode).await,
	}
}

async fn post_multipart(
	transport: &dyn RoundTrip,
	url: &Url,
	root: &Path,
) -> Result<TransferResult, TransferError> {
	let start = Instant::now();
	let mut body = Vec::new();
	let encoded = multipart::encode_directory(root, &mut body).await?;

	let request = Request::post(url.as_str())
		.header(CONTENT_TYPE, multipart::content_type())
		.header(CONTENT_LENGTH, body.len())
		.body(Bytes::from(body))?;

	let sent = Instant::now();
	let reply = transport.round_trip(request).await?;
	ensure_success(reply.status)?;

	info!(
		io_time = ?encoded.duration,
		network_time = ?sent.elapsed(),
		"Sent multipart body with {}",
		encoded
	);
	Ok(TransferResult::new(encoded.bytes, start.elapsed()))
}

/// Sends each object as its own `application/dicom` request to the same URL.
struct RequestSink {
	transport: Arc<dyn RoundTrip>,
	url: Url,
}

#[async_trait]
impl ObjectSink for RequestSink {
	async fn send(&self, part: SinglePart) -> Result<(), TransferError> {
		let headers = part.headers()?;
		let mut request = Request::post(self.url.as_str()).body(part.data)?;
		request.headers_mut().extend(headers);

		let reply = self.transport.round_trip(request).await?;
		ensure_success(reply.status)
	}
}

async fn post_single_parts(
	transport: Arc<dyn RoundTrip>,
	url: &Url,
	root: &Path,
	mode: UploadMode,
) -> Result<TransferResult, TransferError> {
	let sink = RequestSink {
		transport,
		url: url.clone(),
	};

	let uploaded = match mode {
		UploadMode::Sync => sync_upload(root, &sink).await,
		UploadMode::Async => async_upload(root, Arc::new(sink)).await,
	};

	match uploaded {
		Ok(report) => {
			for failure in &report.failures {
				error!("Failed to send {}: {}", failure.path.display(), failure.error);
			}
			info!(
				objects = report.objects,
				failures = report.failures.len(),
				io_time = ?report.io_time,
				network_time = ?report.network_time,
				"Sent {}",
				report.result
			);
			Ok(report.result)
		}
		Err(aborted) => {
			error!(
				objects = aborted.progress.objects,
				bytes = aborted.progress.result.bytes,
				"Upload aborted at {}",
				aborted.path.display()
			);
			Err(aborted.source)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transfer::{retrieve, ResourceQuery};
	use tempfile::TempDir;
	use tokio::sync::Mutex;

	/// Serves requests from a storage root the way the server does, without a network.
	struct Loopback {
		root: PathBuf,
		requests: Mutex<Vec<(http::Method, String)>>,
	}

	impl Loopback {
		fn new(root: &Path) -> Self {
			Self {
				root: root.to_owned(),
				requests: Mutex::new(Vec::new()),
			}
		}
	}

	#[async_trait]
	impl RoundTrip for Loopback {
		async fn round_trip(&self, request: Request<Bytes>) -> Result<Reply, TransferError> {
			let (parts, body) = request.into_parts();
			self.requests
				.lock()
				.await
				.push((parts.method.clone(), parts.uri.path().to_owned()));

			if parts.method == http::Method::POST {
				let stored = transfer::store(
					&parts.headers,
					futures::stream::iter([Ok::<_, std::io::Error>(body)]),
					&self.root,
				)
				.await;
				let status = stored.map_or_else(|err| err.status(), |_| StatusCode::OK);
				return Ok(Reply {
					status,
					headers: HeaderMap::new(),
					body: futures::stream::empty().boxed(),
				});
			}

			let study = parts.uri.path().trim_start_matches("/studies/").to_owned();
			match retrieve(&ResourceQuery::study(study), &self.root).await {
				Ok(response) => Ok(Reply {
					status: StatusCode::OK,
					headers: response.headers,
					body: response.body,
				}),
				Err(err) => Ok(Reply {
					status: err.status(),
					headers: HeaderMap::new(),
					body: futures::stream::empty().boxed(),
				}),
			}
		}
	}

	fn populated() -> TempDir {
		let root = TempDir::new().unwrap();
		std::fs::create_dir_all(root.path().join("A/B")).unwrap();
		std::fs::write(root.path().join("A/B/C.dcm"), b"1234").unwrap();
		std::fs::write(root.path().join("A/B/D.dcm"), b"123456").unwrap();
		root
	}

	#[test]
	fn study_in_url() {
		let url = Url::parse("https://127.0.0.1:8082/studies/1.2.3").unwrap();
		assert_eq!(study_from_url(&url), Some("1.2.3"));
		let url = Url::parse("https://127.0.0.1:8082/studies/1.2.3/series/4").unwrap();
		assert_eq!(study_from_url(&url), Some("1.2.3"));
		let url = Url::parse("https://127.0.0.1:8082/echo").unwrap();
		assert_eq!(study_from_url(&url), None);
	}

	#[tokio::test]
	async fn get_stores_study() {
		let server = populated();
		let client = TempDir::new().unwrap();
		let transport = Loopback::new(server.path());
		let url = Url::parse("http://localhost/studies/A").unwrap();

		let result = get(&transport, &url, client.path()).await.unwrap();
		assert_eq!(result.bytes, 10);
		assert_eq!(std::fs::read(client.path().join("A/B/D.dcm")).unwrap(), b"123456");
	}

	#[tokio::test]
	async fn get_reports_missing_study() {
		let server = TempDir::new().unwrap();
		let client = TempDir::new().unwrap();
		let transport = Loopback::new(server.path());
		let url = Url::parse("http://localhost/studies/A").unwrap();

		let err = get(&transport, &url, client.path()).await.unwrap_err();
		assert!(matches!(err, TransferError::Status(StatusCode::NOT_FOUND)));
	}

	#[tokio::test]
	async fn post_in_all_modes() {
		let url = Url::parse("http://localhost/studies/A").unwrap();
		for (chunking, mode, requests) in [
			(ChunkingMode::Multi, UploadMode::Sync, 1),
			(ChunkingMode::Single, UploadMode::Sync, 2),
			(ChunkingMode::Single, UploadMode::Async, 2),
		] {
			let client = populated();
			let server = TempDir::new().unwrap();
			let transport = Arc::new(Loopback::new(server.path()));

			let result = post(transport.clone(), &url, client.path(), chunking, mode)
				.await
				.unwrap();
			assert_eq!(result.bytes, 10, "{chunking:?} {mode:?}");
			assert_eq!(std::fs::read(server.path().join("A/B/C.dcm")).unwrap(), b"1234");
			assert_eq!(transport.requests.lock().await.len(), requests);
		}
	}

	#[tokio::test]
	async fn sync_post_fails_on_rejected_object() {
		let client = TempDir::new().unwrap();
		std::fs::create_dir_all(client.path().join("A/B")).unwrap();
		std::fs::write(client.path().join("A/B/C.dcm"), b"1234").unwrap();

		struct Rejecting;
		#[async_trait]
		impl RoundTrip for Rejecting {
			async fn round_trip(&self, _: Request<Bytes>) -> Result<Reply, TransferError> {
				Ok(Reply {
					status: StatusCode::CONFLICT,
					headers: HeaderMap::new(),
					body: futures::stream::empty().boxed(),
				})
			}
		}

		let url = Url::parse("http://localhost/studies/A").unwrap();
		let err = post(
			Arc::new(Rejecting),
			&url,
			client.path(),
			ChunkingMode::Single,
			UploadMode::Sync,
		)
		.await
		.unwrap_err();
		assert!(matches!(err, TransferError::Status(StatusCode::CONFLICT)));

		let result = post(
			Arc::new(Rejecting),
			&url,
			client.path(),
			ChunkingMode::Single,
			UploadMode::Async,
		)
		.await
		.unwrap();
		assert_eq!(result.bytes, 0);
	}
}
