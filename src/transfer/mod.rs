//! The transport-independent store and retrieve operations.
//!
//! Neither operation knows which HTTP version carries the request. Both only see headers, a body
//! stream and the storage root.

mod retrieve;
mod store;

pub use retrieve::{retrieve, RetrieveResponse};
pub use store::store;

use crate::types::{RetrieveLevel, UI};
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use serde::Deserialize;

/// The encodings a store operation accepts, decided once per request from `Content-Type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
	MultipartRelated,
	SinglePartDicom,
	Unsupported(String),
}

impl MediaKind {
	pub fn from_headers(headers: &HeaderMap) -> Self {
		let content_type = headers
			.get(CONTENT_TYPE)
			.and_then(|value| value.to_str().ok())
			.unwrap_or_default();

		match content_type.parse::<mime::Mime>() {
			Ok(mime) if mime.type_() == mime::MULTIPART && mime.subtype().as_str() == "related" => {
				Self::MultipartRelated
			}
			Ok(mime) if mime.type_() == mime::APPLICATION && mime.subtype().as_str() == "dicom" => {
				Self::SinglePartDicom
			}
			_ => Self::Unsupported(content_type.to_owned()),
		}
	}
}

/// Addresses a study, a series or a single instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceQuery {
	#[serde(rename = "study")]
	pub study_instance_uid: UI,
	#[serde(rename = "series")]
	pub series_instance_uid: Option<UI>,
	#[serde(rename = "instance")]
	pub sop_instance_uid: Option<UI>,
}

impl ResourceQuery {
	pub fn study(study_instance_uid: impl Into<UI>) -> Self {
		Self {
			study_instance_uid: study_instance_uid.into(),
			series_instance_uid: None,
			sop_instance_uid: None,
		}
	}

	pub fn series(study_instance_uid: impl Into<UI>, series_instance_uid: impl Into<UI>) -> Self {
		Self {
			series_instance_uid: Some(series_instance_uid.into()),
			..Self::study(study_instance_uid)
		}
	}

	pub fn instance(
		study_instance_uid: impl Into<UI>,
		series_instance_uid: impl Into<UI>,
		sop_instance_uid: impl Into<UI>,
	) -> Self {
		Self {
			sop_instance_uid: Some(sop_instance_uid.into()),
			..Self::series(study_instance_uid, series_instance_uid)
		}
	}

	pub const fn level(&self) -> RetrieveLevel {
		match (&self.series_instance_uid, &self.sop_instance_uid) {
			(Some(_), Some(_)) => RetrieveLevel::Instance,
			(Some(_), None) => RetrieveLevel::Series,
			(None, _) => RetrieveLevel::Study,
		}
	}
}
