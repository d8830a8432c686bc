use super::MediaKind;
use crate::codec::{multipart, single};
use crate::error::TransferError;
use crate::types::TransferResult;
use bytes::Bytes;
use futures::Stream;
use http::HeaderMap;
use std::path::Path;
use tracing::{info, instrument};

/// Stores the objects of one body below `root`. The decoder is chosen by `Content-Type`.
///
/// # Errors
/// Fails with [`TransferError::UnsupportedMediaType`] for anything but `multipart/related` and
/// `application/dicom`, and with the decoder's error otherwise.
#[instrument(skip_all, fields(root = %root.display()))]
pub async fn store<S, E>(
	headers: &HeaderMap,
	body: S,
	root: &Path,
) -> Result<TransferResult, TransferError>
where
	S: Stream<Item = Result<Bytes, E>> + Send + 'static,
	E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
	let result = match MediaKind::from_headers(headers) {
		MediaKind::MultipartRelated => multipart::decode(headers, body, root).await?,
		MediaKind::SinglePartDicom => single::decode(headers, body, root).await?.1,
		MediaKind::Unsupported(content_type) => {
			return Err(TransferError::UnsupportedMediaType(content_type));
		}
	};

	info!("Stored {result}");
	Ok(result)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::ObjectId;
	use futures::stream;
	use http::header::CONTENT_TYPE;
	use http::HeaderValue;
	use tempfile::TempDir;

	fn body(data: &'static [u8]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send {
		stream::iter([Ok(Bytes::from_static(data))])
	}

	#[tokio::test]
	async fn unsupported_media_type_writes_nothing() {
		let root = TempDir::new().unwrap();
		let mut headers = HeaderMap::new();
		headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

		let err = store(&headers, body(b"hello"), root.path())
			.await
			.unwrap_err();
		assert!(matches!(err, TransferError::UnsupportedMediaType(ref ct) if ct == "text/plain"));
		assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
	}

	#[tokio::test]
	async fn single_part_body() {
		let root = TempDir::new().unwrap();
		let id = ObjectId::new("A", "B", "C").unwrap();
		let headers = single::headers(&id, 4).unwrap();

		let result = store(&headers, body(b"DICM"), root.path()).await.unwrap();
		assert_eq!(result.bytes, 4);
		assert_eq!(std::fs::read(root.path().join("A/B/C.dcm")).unwrap(), b"DICM");
	}

	#[tokio::test]
	async fn multipart_body() {
		let root = TempDir::new().unwrap();
		let mut headers = HeaderMap::new();
		headers.insert(CONTENT_TYPE, multipart::content_type());

		let result = store(
			&headers,
			body(b"--DICOMDATABOUNDARY\r\nContent-Disposition: attachment; filename=\"A/B/C\"\r\n\r\nDICM\r\n--DICOMDATABOUNDARY--\r\n"),
			root.path(),
		)
		.await
		.unwrap();
		assert_eq!(result.bytes, 4);
		assert_eq!(std::fs::read(root.path().join("A/B/C.dcm")).unwrap(), b"DICM");
	}
}
