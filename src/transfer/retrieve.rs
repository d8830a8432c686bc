use super::ResourceQuery;
use crate::codec::{multipart, single};
use crate::error::TransferError;
use crate::storage;
use crate::types::{is_valid_token, ObjectId, RetrieveLevel, TransferResult};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::DuplexStream;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Size of the in-memory pipe between the producing task and the response body.
const PIPE_CAPACITY: usize = 64 * 1024;

/// A retrieve in progress.
///
/// The body is produced by a background task while it is consumed. `completion` resolves once the
/// task has written everything (or failed), so it should be awaited after the body is drained.
pub struct RetrieveResponse {
	pub headers: HeaderMap,
	pub body: BoxStream<'static, io::Result<Bytes>>,
	pub completion: BoxFuture<'static, Result<TransferResult, TransferError>>,
}

impl std::fmt::Debug for RetrieveResponse {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RetrieveResponse")
			.field("headers", &self.headers)
			.finish_non_exhaustive()
	}
}

/// Retrieves a study or series as a multipart body, or a single instance as an
/// `application/dicom` body.
///
/// # Errors
/// Fails with [`TransferError::NotFound`] if the addressed directory or file does not exist and
/// with [`TransferError::InvalidAddress`] if a UID is not a valid path token.
#[instrument(skip_all, fields(level = %query.level()))]
pub async fn retrieve(query: &ResourceQuery, root: &Path) -> Result<RetrieveResponse, TransferError> {
	match (&query.series_instance_uid, &query.sop_instance_uid) {
		(Some(series), Some(instance)) => {
			let id = ObjectId::new(query.study_instance_uid.as_str(), series.as_str(), instance.as_str())?;
			retrieve_instance(id, root).await
		}
		_ => retrieve_collection(query, root).await,
	}
}

async fn retrieve_collection(
	query: &ResourceQuery,
	root: &Path,
) -> Result<RetrieveResponse, TransferError> {
	let mut directory = root.to_owned();
	let mut tokens = vec![query.study_instance_uid.as_str()];
	if query.level() == RetrieveLevel::Series {
		tokens.extend(query.series_instance_uid.as_deref());
	}
	for token in tokens {
		if !is_valid_token(token) {
			return Err(TransferError::InvalidAddress {
				name: token.to_owned(),
			});
		}
		directory.push(token);
	}

	if !is_directory(&directory).await {
		return Err(TransferError::NotFound { path: directory });
	}

	let mut headers = HeaderMap::with_capacity(1);
	headers.insert(CONTENT_TYPE, multipart::content_type());

	let (body, completion) =
		pipe(move |writer| async move { multipart::encode_directory(&directory, writer).await });
	Ok(RetrieveResponse {
		headers,
		body,
		completion,
	})
}

async fn retrieve_instance(id: ObjectId, root: &Path) -> Result<RetrieveResponse, TransferError> {
	let path = storage::object_path(root, &id);
	let mut file = File::open(&path).await.map_err(|err| match err.kind() {
		io::ErrorKind::NotFound => TransferError::NotFound { path: path.clone() },
		_ => TransferError::Io(err),
	})?;
	let len = file.metadata().await?.len();
	let headers = single::headers(&id, len)?;

	let (body, completion) = pipe(move |mut writer| async move {
		let start = Instant::now();
		let bytes = tokio::io::copy(&mut file, &mut writer).await?;
		Ok::<_, TransferError>(TransferResult::new(bytes, start.elapsed()))
	});
	Ok(RetrieveResponse {
		headers,
		body,
		completion,
	})
}

async fn is_directory(path: &Path) -> bool {
	tokio::fs::metadata(path)
		.await
		.is_ok_and(|metadata| metadata.is_dir())
}

/// Runs `produce` on its own task, writing into a pipe whose read half becomes the body.
fn pipe<P, F>(
	produce: P,
) -> (
	BoxStream<'static, io::Result<Bytes>>,
	BoxFuture<'static, Result<TransferResult, TransferError>>,
)
where
	P: FnOnce(DuplexStream) -> F,
	F: Future<Output = Result<TransferResult, TransferError>> + Send + 'static,
{
	let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
	let task = tokio::spawn(produce(writer));
	let completion = async move { task.await.map_err(TransferError::transport)? }.boxed();
	(ReaderStream::new(reader).boxed(), completion)
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::TryStreamExt;
	use http::header::CONTENT_DISPOSITION;
	use tempfile::TempDir;

	fn populated() -> TempDir {
		let root = TempDir::new().unwrap();
		std::fs::create_dir_all(root.path().join("A/B")).unwrap();
		std::fs::create_dir_all(root.path().join("A/E")).unwrap();
		std::fs::write(root.path().join("A/B/C.dcm"), b"1234").unwrap();
		std::fs::write(root.path().join("A/E/F.dcm"), b"123456").unwrap();
		root
	}

	async fn drain(response: RetrieveResponse) -> (Vec<u8>, TransferResult) {
		let chunks: Vec<Bytes> = response.body.try_collect().await.unwrap();
		let result = response.completion.await.unwrap();
		(chunks.concat(), result)
	}

	#[tokio::test]
	async fn study_is_multipart() {
		let root = populated();
		let response = retrieve(&ResourceQuery::study("A"), root.path()).await.unwrap();
		assert_eq!(response.headers[CONTENT_TYPE], multipart::content_type());

		let headers = response.headers.clone();
		let (body, result) = drain(response).await;
		assert_eq!(result.bytes, 10);

		let target = TempDir::new().unwrap();
		let stored = crate::transfer::store(
			&headers,
			futures::stream::iter([Ok::<_, io::Error>(Bytes::from(body))]),
			target.path(),
		)
		.await
		.unwrap();
		assert_eq!(stored.bytes, 10);
		assert_eq!(std::fs::read(target.path().join("A/E/F.dcm")).unwrap(), b"123456");
	}

	#[tokio::test]
	async fn series_only_contains_its_instances() {
		let root = populated();
		let response = retrieve(&ResourceQuery::series("A", "E"), root.path())
			.await
			.unwrap();
		let (body, result) = drain(response).await;
		assert_eq!(result.bytes, 6);
		let text = String::from_utf8(body).unwrap();
		assert!(text.contains(r#"filename="A/E/F""#));
		assert!(!text.contains(r#"filename="A/B/C""#));
	}

	#[tokio::test]
	async fn instance_is_single_part() {
		let root = populated();
		let response = retrieve(&ResourceQuery::instance("A", "B", "C"), root.path())
			.await
			.unwrap();
		assert_eq!(response.headers[CONTENT_TYPE], "application/dicom");
		assert_eq!(
			response.headers[CONTENT_DISPOSITION],
			r#"attachment; filename="A/B/C""#
		);

		let (body, result) = drain(response).await;
		assert_eq!(body, b"1234");
		assert_eq!(result.bytes, 4);
	}

	#[tokio::test]
	async fn missing_resources() {
		let root = populated();
		for query in [
			ResourceQuery::study("X"),
			ResourceQuery::series("A", "X"),
			ResourceQuery::instance("A", "B", "X"),
		] {
			let err = retrieve(&query, root.path()).await.unwrap_err();
			assert!(matches!(err, TransferError::NotFound { .. }), "{query:?}");
		}
	}

	#[tokio::test]
	async fn dot_segments_are_rejected() {
		let root = populated();
		let err = retrieve(&ResourceQuery::study(".."), root.path())
			.await
			.unwrap_err();
		assert!(matches!(err, TransferError::InvalidAddress { .. }));
	}
}
