use super::{execute, Credentials, Reply, RoundTrip};
use crate::config::ConfigurationError;
use crate::error::TransferError;
use async_trait::async_trait;
use bytes::Bytes;
use http::Request;

/// HTTP/1.1, with or without TLS depending on the URL scheme.
#[derive(Debug, Clone)]
pub struct Http1Transport {
	client: reqwest::Client,
}

impl Http1Transport {
	/// # Errors
	/// Fails if the root certificate cannot be loaded.
	pub fn new(credentials: &Credentials) -> Result<Self, ConfigurationError> {
		let client = credentials.reqwest_builder()?.http1_only().build()?;
		Ok(Self { client })
	}
}

#[async_trait]
impl RoundTrip for Http1Transport {
	async fn round_trip(&self, request: Request<Bytes>) -> Result<Reply, TransferError> {
		execute(&self.client, request).await
	}
}
