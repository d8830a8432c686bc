//! Sends every object below a directory as its own `application/dicom` request, one after the
//! other ([`sync_upload`]) or from a pool of workers ([`async_upload`]).

use crate::codec::single::SinglePart;
use crate::error::TransferError;
use crate::storage;
use crate::types::TransferResult;
use async_trait::async_trait;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Delivers one object to a peer.
#[async_trait]
pub trait ObjectSink: Send + Sync {
	async fn send(&self, part: SinglePart) -> Result<(), TransferError>;
}

/// An object that could not be sent by [`async_upload`].
#[derive(Debug)]
pub struct UploadFailure {
	pub path: PathBuf,
	pub error: TransferError,
}

#[derive(Debug, Default)]
pub struct UploadReport {
	/// Bytes of all objects sent and the wall time of the whole upload.
	pub result: TransferResult,
	pub objects: usize,
	/// Time spent reading files, summed over all objects.
	pub io_time: Duration,
	/// Time spent sending requests, summed over all objects.
	pub network_time: Duration,
	pub failures: Vec<UploadFailure>,
}

impl UploadReport {
	fn record(&mut self, sent: Sent) {
		self.result.bytes += sent.bytes;
		self.objects += 1;
		self.io_time += sent.io_time;
		self.network_time += sent.network_time;
	}
}

/// A synchronous upload stopped at its first failure.
#[derive(Debug, Error)]
#[error("Upload aborted at {}: {source}", path.display())]
pub struct UploadAborted {
	pub path: PathBuf,
	pub source: TransferError,
	/// Everything sent before the failure.
	pub progress: UploadReport,
}

struct Sent {
	bytes: u64,
	io_time: Duration,
	network_time: Duration,
}

async fn upload_one(path: &Path, sink: &dyn ObjectSink) -> Result<Sent, TransferError> {
	let start = Instant::now();
	let part = SinglePart::read(path).await?;
	let io_time = start.elapsed();
	let bytes = part.len();

	let start = Instant::now();
	sink.send(part).await?;
	let network_time = start.elapsed();

	debug!(bytes, "Sent {}", path.display());
	Ok(Sent {
		bytes,
		io_time,
		network_time,
	})
}

fn walk_aborted(root: &Path, err: walkdir::Error) -> (PathBuf, TransferError) {
	let path = err.path().unwrap_or(root).to_owned();
	(path, TransferError::Io(err.into()))
}

/// Sends the objects below `root` one at a time, in walk order.
///
/// # Errors
/// The first failing walk step, file read or send stops the upload. The returned
/// [`UploadAborted`] carries what was sent before.
#[instrument(skip_all, fields(root = %root.display()))]
pub async fn sync_upload(root: &Path, sink: &dyn ObjectSink) -> Result<UploadReport, UploadAborted> {
	let start = Instant::now();
	let mut report = UploadReport::default();

	let entries = match storage::list_files(root).await {
		Ok(entries) => entries,
		Err(err) => {
			return Err(UploadAborted {
				path: root.to_owned(),
				source: TransferError::Io(err),
				progress: report,
			});
		}
	};

	for entry in entries {
		let sent = match entry {
			Ok(path) => upload_one(&path, sink)
				.await
				.map_err(|source| (path, source)),
			Err(err) => Err(walk_aborted(root, err)),
		};

		match sent {
			Ok(sent) => report.record(sent),
			Err((path, source)) => {
				report.result.duration = start.elapsed();
				return Err(UploadAborted {
					path,
					source,
					progress: report,
				});
			}
		}
	}

	report.result.duration = start.elapsed();
	info!(objects = report.objects, "Uploaded {}", report.result);
	Ok(report)
}

/// Sends the objects below `root` from one worker per available CPU.
///
/// # Errors
/// See [`async_upload_with`].
pub async fn async_upload(
	root: &Path,
	sink: Arc<dyn ObjectSink>,
) -> Result<UploadReport, UploadAborted> {
	let workers = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
	async_upload_with(root, sink, workers).await
}

/// Sends the objects below `root` from `workers` concurrent workers.
///
/// A failing object is recorded in [`UploadReport::failures`] and its worker moves on to the next
/// one. Objects are sent in no particular order.
///
/// # Errors
/// Only a failing directory walk aborts the upload. Objects already queued are still sent.
#[instrument(skip_all, fields(root = %root.display(), workers = workers))]
pub async fn async_upload_with(
	root: &Path,
	sink: Arc<dyn ObjectSink>,
	workers: usize,
) -> Result<UploadReport, UploadAborted> {
	let start = Instant::now();
	let workers = workers.max(1);
	let (sender, receiver) = mpsc::channel::<PathBuf>(workers);
	let receiver = Arc::new(Mutex::new(receiver));
	let report = Arc::new(Mutex::new(UploadReport::default()));

	let mut tasks = JoinSet::new();
	for worker in 0..workers {
		let receiver = Arc::clone(&receiver);
		let report = Arc::clone(&report);
		let sink = Arc::clone(&sink);
		tasks.spawn(async move {
			loop {
				let next = receiver.lock().await.recv().await;
				let Some(path) = next else {
					break;
				};

				match upload_one(&path, sink.as_ref()).await {
					Ok(sent) => report.lock().await.record(sent),
					Err(error) => {
						warn!(worker, "Failed to upload {}: {error}", path.display());
						report.lock().await.failures.push(UploadFailure { path, error });
					}
				}
			}
			debug!(worker, "Worker finished");
		});
	}

	let walk_root = root.to_owned();
	let producer = tokio::task::spawn_blocking(move || {
		for entry in storage::walk_files(&walk_root) {
			let path = entry?;
			if sender.blocking_send(path).is_err() {
				break;
			}
		}
		Ok::<_, walkdir::Error>(())
	});
	let walked = producer.await;

	while let Some(joined) = tasks.join_next().await {
		if let Err(err) = joined {
			error!("Upload worker failed: {err}");
		}
	}

	let mut report = std::mem::take(&mut *report.lock().await);
	report.result.duration = start.elapsed();

	let aborted = match walked {
		Ok(Ok(())) => None,
		Ok(Err(err)) => Some(walk_aborted(root, err)),
		Err(err) => Some((root.to_owned(), TransferError::transport(err))),
	};
	if let Some((path, source)) = aborted {
		return Err(UploadAborted {
			path,
			source,
			progress: report,
		});
	}

	info!(
		objects = report.objects,
		failures = report.failures.len(),
		"Uploaded {}",
		report.result
	);
	Ok(report)
}
