//! Wire encodings of objects: a single `application/dicom` body ([`single`]) or a
//! `multipart/related` body carrying many objects ([`multipart`]).
//!
//! In both encodings the object identity travels in the `filename` parameter of
//! `Content-Disposition`, as `<study>/<series>/<instance>`.

pub mod multipart;
pub mod single;

use crate::error::TransferError;
use crate::types::ObjectId;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::header::CONTENT_DISPOSITION;
use http::HeaderMap;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

pub const APPLICATION_DICOM: &str = "application/dicom";

/// `attachment; filename="<study>/<series>/<instance>"`
pub fn content_disposition(id: &ObjectId) -> String {
	let filename = id.to_string().replace('\\', "\\\\").replace('"', "\\\"");
	format!(r#"attachment; filename="{filename}""#)
}

/// Extracts the `filename` parameter of a `Content-Disposition` value.
pub fn disposition_filename(value: &str) -> Option<String> {
	split_parameters(value).into_iter().skip(1).find_map(|param| {
		let (key, value) = param.split_once('=')?;
		if !key.trim().eq_ignore_ascii_case("filename") {
			return None;
		}
		Some(unquote(value.trim()))
	})
}

/// Splits a header value on `;` outside of quoted strings.
fn split_parameters(value: &str) -> Vec<&str> {
	let mut params = Vec::new();
	let mut start = 0;
	let mut quoted = false;
	let mut escaped = false;
	for (i, c) in value.char_indices() {
		match c {
			_ if escaped => escaped = false,
			'\\' if quoted => escaped = true,
			'"' => quoted = !quoted,
			';' if !quoted => {
				params.push(&value[start..i]);
				start = i + 1;
			}
			_ => {}
		}
	}
	params.push(&value[start..]);
	params
}

fn unquote(value: &str) -> String {
	let Some(quoted) = value
		.strip_prefix('"')
		.and_then(|quoted| quoted.strip_suffix('"'))
	else {
		return value.to_owned();
	};

	let mut unquoted = String::with_capacity(quoted.len());
	let mut chars = quoted.chars();
	while let Some(c) = chars.next() {
		match c {
			'\\' => unquoted.extend(chars.next()),
			c => unquoted.push(c),
		}
	}
	unquoted
}

/// The original file name announced in a header block, or an empty string.
pub(crate) fn filename(headers: &HeaderMap) -> String {
	headers
		.get(CONTENT_DISPOSITION)
		.and_then(|value| value.to_str().ok())
		.and_then(disposition_filename)
		.unwrap_or_default()
}

/// Creates `path` and writes every chunk of `body` to it as it arrives.
/// Returns the number of bytes written.
pub(crate) async fn copy_to_file<S, E>(body: S, path: &Path) -> Result<u64, TransferError>
where
	S: Stream<Item = Result<Bytes, E>>,
	E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
	let mut file = File::create(path)
		.await
		.map_err(|source| TransferError::Create {
			path: path.to_owned(),
			source,
		})?;

	tokio::pin!(body);
	let mut size = 0;
	while let Some(chunk) = body.next().await {
		let chunk = chunk.map_err(std::io::Error::other)?;
		file.write_all(&chunk).await?;
		size += chunk.len() as u64;
	}
	file.flush().await?;

	Ok(size)
}
