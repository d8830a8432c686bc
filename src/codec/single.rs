use super::{content_disposition, copy_to_file, filename, APPLICATION_DICOM};
use crate::error::TransferError;
use crate::storage;
use crate::types::{ObjectId, TransferResult};
use bytes::Bytes;
use futures::Stream;
use http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, instrument};

/// Headers of an `application/dicom` body carrying `id`.
///
/// # Errors
/// Returns [`TransferError::InvalidAddress`] if the identifier cannot be carried in a header value.
pub fn headers(id: &ObjectId, len: u64) -> Result<HeaderMap, TransferError> {
	let disposition =
		HeaderValue::from_str(&content_disposition(id)).map_err(|_| TransferError::InvalidAddress {
			name: id.to_string(),
		})?;

	let mut headers = HeaderMap::with_capacity(3);
	headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_DICOM));
	headers.insert(CONTENT_DISPOSITION, disposition);
	headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
	Ok(headers)
}

/// One object read fully into memory, ready to be sent as an `application/dicom` body.
#[derive(Debug, Clone)]
pub struct SinglePart {
	pub id: ObjectId,
	pub data: Bytes,
}

impl SinglePart {
	/// Reads the object stored at `path`. The identifier is derived from the path.
	///
	/// # Errors
	/// Fails with [`TransferError::InvalidAddress`] if the path does not resolve to an identifier
	/// and with [`TransferError::Io`] if the file cannot be read.
	pub async fn read(path: &Path) -> Result<Self, TransferError> {
		let id = storage::resolve_path(path)?;
		let data = tokio::fs::read(path).await?;
		Ok(Self {
			id,
			data: Bytes::from(data),
		})
	}

	pub fn len(&self) -> u64 {
		self.data.len() as u64
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}

	/// See [`headers`].
	///
	/// # Errors
	/// See [`headers`].
	pub fn headers(&self) -> Result<HeaderMap, TransferError> {
		headers(&self.id, self.len())
	}
}

/// Stores an `application/dicom` body below `root`.
///
/// The object identity is taken from the `Content-Disposition` filename. The body is written to the
/// target file as it arrives.
///
/// # Errors
/// Fails with [`TransferError::InvalidAddress`] if no identifier can be derived from the headers.
/// Nothing is written in that case.
#[instrument(skip_all)]
pub async fn decode<S, E>(
	headers: &HeaderMap,
	body: S,
	root: &Path,
) -> Result<(PathBuf, TransferResult), TransferError>
where
	S: Stream<Item = Result<Bytes, E>>,
	E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
	let start = Instant::now();
	let id = storage::resolve(&filename(headers))?;
	let path = storage::build_path(root, &id).await?;

	let bytes = copy_to_file(body, &path).await?;
	debug!(%id, bytes, "Stored object at {}", path.display());
	Ok((path, TransferResult::new(bytes, start.elapsed())))
}
