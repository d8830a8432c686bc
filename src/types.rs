use crate::error::TransferError;
use std::fmt::{Display, Formatter};
use std::ops::AddAssign;
use std::path::PathBuf;
use std::time::Duration;

/// UI (Unique Identifier) value representation.
pub type UI = String;

/// Identifies a stored object by its Study, Series and SOP Instance UID.
///
/// All three components are non-empty. The UIDs are treated as opaque tokens, they are never
/// parsed as dot-separated numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId {
	study_instance_uid: UI,
	series_instance_uid: UI,
	sop_instance_uid: UI,
}

impl ObjectId {
	/// Creates a new identifier.
	///
	/// # Errors
	/// Returns [`TransferError::InvalidAddress`] if any component is not a valid path token.
	pub fn new(
		study_instance_uid: impl Into<UI>,
		series_instance_uid: impl Into<UI>,
		sop_instance_uid: impl Into<UI>,
	) -> Result<Self, TransferError> {
		let id = Self {
			study_instance_uid: study_instance_uid.into(),
			series_instance_uid: series_instance_uid.into(),
			sop_instance_uid: sop_instance_uid.into(),
		};

		if [
			&id.study_instance_uid,
			&id.series_instance_uid,
			&id.sop_instance_uid,
		]
		.into_iter()
		.all(|token| is_valid_token(token))
		{
			Ok(id)
		} else {
			Err(TransferError::InvalidAddress {
				name: id.to_string(),
			})
		}
	}

	pub fn study_instance_uid(&self) -> &str {
		&self.study_instance_uid
	}

	pub fn series_instance_uid(&self) -> &str {
		&self.series_instance_uid
	}

	pub fn sop_instance_uid(&self) -> &str {
		&self.sop_instance_uid
	}

	/// The path of the object relative to a storage root, including the file extension.
	pub fn relative_path(&self) -> PathBuf {
		PathBuf::from(&self.study_instance_uid)
			.join(&self.series_instance_uid)
			.join(format!(
				"{}.{}",
				self.sop_instance_uid,
				crate::storage::DICOM_EXTENSION
			))
	}
}

/// Formats the identifier the way it is carried on the wire: `<study>/<series>/<instance>`.
impl Display for ObjectId {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"{}/{}/{}",
			self.study_instance_uid, self.series_instance_uid, self.sop_instance_uid
		)
	}
}

/// A UID can be used as a single path segment below the storage root.
/// Dot segments and separators would address something other than the object itself.
pub(crate) fn is_valid_token(token: &str) -> bool {
	!token.is_empty()
		&& token != "."
		&& token != ".."
		&& !token.contains(['/', '\\', '\0'])
}

/// The granularity of a retrieve request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RetrieveLevel {
	Study,
	Series,
	Instance,
}

impl Display for RetrieveLevel {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Study => write!(f, "STUDY"),
			Self::Series => write!(f, "SERIES"),
			Self::Instance => write!(f, "INSTANCE"),
		}
	}
}

/// Number of payload bytes moved by an operation and the wall time it took.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TransferResult {
	pub bytes: u64,
	pub duration: Duration,
}

impl TransferResult {
	pub const fn new(bytes: u64, duration: Duration) -> Self {
		Self { bytes, duration }
	}

	/// Bytes per second over the measured duration.
	#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
	pub fn throughput(&self) -> u64 {
		let seconds = self.duration.as_secs_f64();
		if seconds > 0.0 {
			(self.bytes as f64 / seconds) as u64
		} else {
			0
		}
	}
}

impl AddAssign for TransferResult {
	fn add_assign(&mut self, rhs: Self) {
		self.bytes += rhs.bytes;
		self.duration += rhs.duration;
	}
}

impl Display for TransferResult {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"time taken: {:?} size: {} speed: {}/s",
			self.duration,
			format_bytes_si(self.bytes),
			format_bytes_si(self.throughput())
		)
	}
}

/// Formats a byte count with SI (power of 1000) prefixes, e.g. `1.5 MB`.
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes_si(bytes: u64) -> String {
	const UNIT: u64 = 1000;
	if bytes < UNIT {
		return format!("{bytes} B");
	}
	let mut div = UNIT;
	let mut exp = 0;
	let mut n = bytes / UNIT;
	while n >= UNIT {
		div *= UNIT;
		exp += 1;
		n /= UNIT;
	}
	format!(
		"{:.1} {}B",
		bytes as f64 / div as f64,
		['k', 'M', 'G', 'T', 'P', 'E'][exp]
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn object_id_rejects_incomplete_triples() {
		assert!(ObjectId::new("1.2", "1.2.3", "1.2.3.4").is_ok());
		assert!(ObjectId::new("", "1.2.3", "1.2.3.4").is_err());
		assert!(ObjectId::new("1.2", "", "1.2.3.4").is_err());
		assert!(ObjectId::new("1.2", "1.2.3", "").is_err());
		assert!(ObjectId::new("..", "1.2.3", "1.2.3.4").is_err());
		assert!(ObjectId::new("1.2", "a/b", "1.2.3.4").is_err());
	}

	#[test]
	fn object_id_wire_form() {
		let id = ObjectId::new("A", "B", "C").unwrap();
		assert_eq!(id.to_string(), "A/B/C");
		assert_eq!(id.relative_path(), PathBuf::from("A/B/C.dcm"));
	}

	#[test]
	fn si_formatting() {
		assert_eq!(format_bytes_si(999), "999 B");
		assert_eq!(format_bytes_si(1000), "1.0 kB");
		assert_eq!(format_bytes_si(1_500_000), "1.5 MB");
		assert_eq!(format_bytes_si(2_000_000_000), "2.0 GB");
	}

	#[test]
	fn results_add_up() {
		let mut total = TransferResult::default();
		total += TransferResult::new(4, Duration::from_millis(10));
		total += TransferResult::new(6, Duration::from_millis(5));
		assert_eq!(total, TransferResult::new(10, Duration::from_millis(15)));
	}
}
