//! `multipart/related` bodies carrying many objects under the fixed [`BOUNDARY`].
//!
//! Each part is framed as
//! ```text
//! --DICOMDATABOUNDARY\r\n
//! Content-Type: application/dicom\r\n
//! Content-Disposition: attachment; filename="<study>/<series>/<instance>"\r\n
//! Content-Length: <size>\r\n
//! \r\n
//! <data>\r\n
//! ```
//! and the body is closed by `--DICOMDATABOUNDARY--\r\n`.

use super::{content_disposition, copy_to_file, APPLICATION_DICOM};
use crate::error::TransferError;
use crate::storage;
use crate::types::TransferResult;
use bytes::Bytes;
use futures::Stream;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue};
use std::path::Path;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument, warn};

/// Boundary shared by both peers. It is never negotiated.
pub const BOUNDARY: &str = "DICOMDATABOUNDARY";

/// `multipart/related; boundary=DICOMDATABOUNDARY; type="application/dicom"`
pub fn content_type() -> HeaderValue {
	HeaderValue::from_static(
		"multipart/related; boundary=DICOMDATABOUNDARY; type=\"application/dicom\"",
	)
}

/// This is based on [`multer::parse_boundary`], but with multipart/related instead of
/// multipart/form-data.
pub fn parse_boundary(content_type: &str) -> multer::Result<String> {
	let mime = content_type
		.parse::<mime::Mime>()
		.map_err(multer::Error::DecodeContentType)?;

	if !(mime.type_() == mime::MULTIPART && mime.subtype().as_str() == "related") {
		return Err(multer::Error::NoMultipart);
	}

	mime.get_param(mime::BOUNDARY)
		.map(|name| name.as_str().to_owned())
		.ok_or(multer::Error::NoBoundary)
}

/// Writes every regular file below `root` as one part of a multipart body and closes the body.
///
/// Files whose path does not resolve to an identifier are skipped. A failing directory walk or
/// file read aborts the body without the closing boundary.
///
/// # Errors
/// Returns [`TransferError::Io`] if walking, reading or writing fails.
#[instrument(skip_all, fields(root = %root.display()))]
pub async fn encode_directory<W>(root: &Path, mut writer: W) -> Result<TransferResult, TransferError>
where
	W: AsyncWrite + Unpin,
{
	let start = Instant::now();
	let mut bytes = 0;

	for entry in storage::list_files(root).await? {
		let path = entry.map_err(std::io::Error::from)?;
		let id = match storage::resolve_path(&path) {
			Ok(id) => id,
			Err(err) => {
				warn!("Skipping {}: {err}", path.display());
				continue;
			}
		};

		let mut file = File::open(&path).await?;
		let len = file.metadata().await?.len();
		let head = format!(
			"--{BOUNDARY}\r\nContent-Type: {APPLICATION_DICOM}\r\nContent-Disposition: {}\r\nContent-Length: {len}\r\n\r\n",
			content_disposition(&id)
		);
		writer.write_all(head.as_bytes()).await?;
		bytes += tokio::io::copy(&mut file, &mut writer).await?;
		writer.write_all(b"\r\n").await?;
		debug!(%id, len, "Encoded part");
	}

	writer
		.write_all(format!("--{BOUNDARY}--\r\n").as_bytes())
		.await?;
	writer.flush().await?;

	Ok(TransferResult::new(bytes, start.elapsed()))
}

/// Stores every part of a `multipart/related` body below `root`, each streamed into its own file.
///
/// # Errors
/// Fails with [`TransferError::Multipart`] if the body is not a `multipart/related` body or a part
/// is malformed, and with [`TransferError::InvalidAddress`] as soon as one part carries no valid
/// filename. Parts stored before the failure are kept.
#[instrument(skip_all)]
pub async fn decode<S, E>(
	headers: &HeaderMap,
	body: S,
	root: &Path,
) -> Result<TransferResult, TransferError>
where
	S: Stream<Item = Result<Bytes, E>> + Send + 'static,
	E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
	let start = Instant::now();
	let boundary = headers
		.get(CONTENT_TYPE)
		.map(HeaderValue::to_str)
		.and_then(Result::ok)
		.map_or(Err(multer::Error::NoMultipart), parse_boundary)?;

	let mut multipart = multer::Multipart::new(body, boundary);
	let mut bytes = 0;
	let mut parts = 0usize;
	while let Some(field) = multipart.next_field().await? {
		let id = storage::resolve(field.file_name().unwrap_or_default())?;
		let path = storage::build_path(root, &id).await?;
		let size = copy_to_file(field, &path).await?;
		debug!(%id, size, "Stored part at {}", path.display());
		bytes += size;
		parts += 1;
	}

	debug!(parts, bytes, "Finished multipart body");
	Ok(TransferResult::new(bytes, start.elapsed()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::stream;
	use tempfile::TempDir;

	fn multipart_headers() -> HeaderMap {
		let mut headers = HeaderMap::new();
		headers.insert(CONTENT_TYPE, content_type());
		headers
	}

	fn body(data: Vec<u8>) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
		stream::once(async move { Ok(Bytes::from(data)) })
	}

	#[test]
	fn boundary_from_content_type() {
		assert_eq!(
			parse_boundary(content_type().to_str().unwrap()).unwrap(),
			BOUNDARY
		);
		assert!(matches!(
			parse_boundary("multipart/form-data; boundary=x"),
			Err(multer::Error::NoMultipart)
		));
		assert!(matches!(
			parse_boundary("multipart/related"),
			Err(multer::Error::NoBoundary)
		));
	}

	#[tokio::test]
	async fn directory_round_trip() {
		let source = TempDir::new().unwrap();
		std::fs::create_dir_all(source.path().join("A/B")).unwrap();
		std::fs::create_dir_all(source.path().join("D/E")).unwrap();
		std::fs::write(source.path().join("A/B/C.dcm"), b"1234").unwrap();
		std::fs::write(source.path().join("D/E/F.dcm"), b"123456").unwrap();

		let mut encoded = Vec::new();
		let sent = encode_directory(source.path(), &mut encoded).await.unwrap();
		assert_eq!(sent.bytes, 10);
		assert!(encoded.ends_with(b"--DICOMDATABOUNDARY--\r\n"));

		let target = TempDir::new().unwrap();
		let received = decode(&multipart_headers(), body(encoded), target.path())
			.await
			.unwrap();
		assert_eq!(received.bytes, 10);
		assert_eq!(std::fs::read(target.path().join("A/B/C.dcm")).unwrap(), b"1234");
		assert_eq!(std::fs::read(target.path().join("D/E/F.dcm")).unwrap(), b"123456");

		let stored: Vec<_> = storage::walk_files(target.path()).collect();
		assert_eq!(stored.len(), 2);
	}

	#[tokio::test]
	async fn unresolvable_files_are_skipped() {
		let source = TempDir::new().unwrap();
		std::fs::create_dir_all(source.path().join("A/B")).unwrap();
		std::fs::write(source.path().join("A/B/C.dcm"), b"1234").unwrap();
		// empty instance UID
		std::fs::write(source.path().join("A/B/.dcm"), b"xx").unwrap();

		let mut encoded = Vec::new();
		let sent = encode_directory(source.path(), &mut encoded).await.unwrap();
		assert_eq!(sent.bytes, 4);

		let text = String::from_utf8(encoded).unwrap();
		assert_eq!(text.matches("Content-Disposition").count(), 1);
	}

	#[tokio::test]
	async fn invalid_part_name_fails_the_whole_body() {
		let body_text = format!(
			"--{BOUNDARY}\r\nContent-Type: application/dicom\r\nContent-Disposition: attachment; filename=\"C.dcm\"\r\n\r\nDICM\r\n--{BOUNDARY}--\r\n"
		);

		let target = TempDir::new().unwrap();
		let err = decode(
			&multipart_headers(),
			body(body_text.into_bytes()),
			target.path(),
		)
		.await
		.unwrap_err();
		assert!(matches!(err, TransferError::InvalidAddress { .. }));
		assert_eq!(std::fs::read_dir(target.path()).unwrap().count(), 0);
	}

	#[tokio::test]
	async fn quoted_separator_in_part_name() {
		let body_text = format!(
			"--{BOUNDARY}\r\nContent-Type: application/dicom\r\nContent-Disposition: attachment; filename=\"1;2/B/C\"\r\n\r\nDICM\r\n--{BOUNDARY}--\r\n"
		);

		let target = TempDir::new().unwrap();
		let received = decode(
			&multipart_headers(),
			body(body_text.into_bytes()),
			target.path(),
		)
		.await
		.unwrap();
		assert_eq!(received.bytes, 4);
		assert_eq!(std::fs::read(target.path().join("1;2/B/C.dcm")).unwrap(), b"DICM");
	}

	#[tokio::test]
	async fn wrong_content_type_is_rejected() {
		let mut headers = HeaderMap::new();
		headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_DICOM));

		let target = TempDir::new().unwrap();
		let err = decode(&headers, body(Vec::new()), target.path())
			.await
			.unwrap_err();
		assert!(matches!(err, TransferError::Multipart(_)));
	}
}
