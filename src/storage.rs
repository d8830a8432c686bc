//! The storage layout `<root>/<study>/<series>/<instance>.dcm`.
//!
//! This module is the only place where object identifiers are mapped to paths and back.

use crate::error::TransferError;
use crate::types::ObjectId;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

/// File extension of stored objects.
pub const DICOM_EXTENSION: &str = "dcm";

const DICOM_SUFFIX: &str = ".dcm";

/// Derives an identifier from a `/`-separated name such as a `Content-Disposition` filename or a
/// file path. Only the trailing three segments are used; deeper ancestry is ignored. A `.dcm`
/// suffix on the last segment is stripped.
///
/// # Errors
/// Returns [`TransferError::InvalidAddress`] if fewer than three segments are present or any of
/// the trailing three is empty.
pub fn resolve(name: &str) -> Result<ObjectId, TransferError> {
	let invalid = || TransferError::InvalidAddress {
		name: name.to_owned(),
	};

	let segments: Vec<&str> = name
		.split(|c: char| c == '/' || c == std::path::MAIN_SEPARATOR)
		.collect();
	let [.., study, series, instance] = segments.as_slice() else {
		return Err(invalid());
	};
	let instance = instance.strip_suffix(DICOM_SUFFIX).unwrap_or(*instance);

	let id = ObjectId::new(*study, *series, instance).map_err(|_| invalid())?;
	trace!(%id, "Resolved object identifier from {name}");
	Ok(id)
}

/// Like [`resolve`], for a filesystem path.
///
/// # Errors
/// Returns [`TransferError::InvalidAddress`] if the path is not valid UTF-8 or does not resolve.
pub fn resolve_path(path: &Path) -> Result<ObjectId, TransferError> {
	let name = path.to_str().ok_or_else(|| TransferError::InvalidAddress {
		name: path.to_string_lossy().into_owned(),
	})?;
	resolve(name)
}

/// The location of an object below `root`. Nothing is created.
pub fn object_path(root: &Path, id: &ObjectId) -> PathBuf {
	root.join(id.relative_path())
}

/// Creates the study and series directories of `id` below `root` and returns the path of the
/// object file. Existing directories are not an error. The object file itself is not created.
///
/// # Errors
/// Returns [`TransferError::Create`] if a directory cannot be created.
pub async fn build_path(root: &Path, id: &ObjectId) -> Result<PathBuf, TransferError> {
	let directory = root
		.join(id.study_instance_uid())
		.join(id.series_instance_uid());
	tokio::fs::create_dir_all(&directory)
		.await
		.map_err(|source| TransferError::Create {
			path: directory.clone(),
			source,
		})?;

	let path = object_path(root, id);
	trace!("Target file name: {}", path.display());
	Ok(path)
}

/// All regular files below `root` in depth-first, name-sorted order.
/// Walk errors are yielded in place, so a consumer can stop at the first one.
pub fn walk_files(root: &Path) -> impl Iterator<Item = Result<PathBuf, walkdir::Error>> {
	WalkDir::new(root)
		.sort_by_file_name()
		.into_iter()
		.filter_map(|entry| match entry {
			Ok(entry) if entry.file_type().is_file() => Some(Ok(entry.into_path())),
			Ok(_) => None,
			Err(err) => Some(Err(err)),
		})
}

/// [`walk_files`] on the blocking thread pool.
///
/// # Errors
/// Fails if the walk task does not finish. Errors of individual entries are returned in place.
pub async fn list_files(root: &Path) -> io::Result<Vec<Result<PathBuf, walkdir::Error>>> {
	let root = root.to_owned();
	run_blocking(move || walk_files(&root).collect()).await
}

async fn run_blocking<T, F>(f: F) -> io::Result<T>
where
	T: Send + 'static,
	F: FnOnce() -> T + Send + 'static,
{
	tokio::task::spawn_blocking(f)
		.await
		.map_err(io::Error::other)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn resolve_trailing_three_segments() {
		let id = resolve("x/A/B/C.dcm").unwrap();
		assert_eq!(id.study_instance_uid(), "A");
		assert_eq!(id.series_instance_uid(), "B");
		assert_eq!(id.sop_instance_uid(), "C");

		// deeper ancestry is ignored
		let id = resolve("/var/lib/store/1.2/1.2.3/1.2.3.4.dcm").unwrap();
		assert_eq!(id.to_string(), "1.2/1.2.3/1.2.3.4");

		// the suffix is optional on the wire
		let id = resolve("1.2/1.2.3/1.2.3.4").unwrap();
		assert_eq!(id.sop_instance_uid(), "1.2.3.4");
	}

	#[test]
	fn resolve_rejects_short_or_empty() {
		for name in ["C.dcm", "B/C.dcm", "", "A//C.dcm", "A/B/", "A/B/.dcm", "../B/C.dcm"] {
			assert!(
				matches!(resolve(name), Err(TransferError::InvalidAddress { .. })),
				"{name:?} should not resolve"
			);
		}
	}

	#[tokio::test]
	async fn build_path_round_trip() {
		let root = TempDir::new().unwrap();
		let id = resolve("somewhere/else/A/B/C.dcm").unwrap();

		let path = build_path(root.path(), &id).await.unwrap();
		assert_eq!(path, root.path().join("A").join("B").join("C.dcm"));
		assert!(root.path().join("A").join("B").is_dir());
		assert!(!path.exists());

		// idempotent
		let again = build_path(root.path(), &id).await.unwrap();
		assert_eq!(path, again);

		assert_eq!(resolve_path(&path).unwrap(), id);
	}

	#[test]
	fn walk_is_sorted_and_skips_directories() {
		let root = TempDir::new().unwrap();
		std::fs::create_dir_all(root.path().join("A/B")).unwrap();
		std::fs::create_dir_all(root.path().join("D/E")).unwrap();
		std::fs::write(root.path().join("D/E/F.dcm"), b"123456").unwrap();
		std::fs::write(root.path().join("A/B/C.dcm"), b"1234").unwrap();

		let files: Vec<PathBuf> = walk_files(root.path()).map(Result::unwrap).collect();
		assert_eq!(
			files,
			vec![root.path().join("A/B/C.dcm"), root.path().join("D/E/F.dcm")]
		);
	}

	#[tokio::test]
	async fn failed_walk_task_is_an_error() {
		let failed = run_blocking(|| -> Vec<PathBuf> { panic!("walk task died") }).await;
		assert!(failed.is_err());

		let root = TempDir::new().unwrap();
		std::fs::write(root.path().join("x.dcm"), b"1").unwrap();
		assert_eq!(list_files(root.path()).await.unwrap().len(), 1);
	}

	#[test]
	fn walk_reports_missing_root() {
		let root = TempDir::new().unwrap();
		let mut files = walk_files(&root.path().join("missing"));
		assert!(matches!(files.next(), Some(Err(_))));
	}
}
