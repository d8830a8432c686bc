use super::{execute, Credentials, Reply, RoundTrip};
use crate::config::ConfigurationError;
use crate::error::TransferError;
use async_trait::async_trait;
use bytes::Bytes;
use http::Request;

/// Largest frame size HTTP/2 permits (2^24 - 1).
pub const MAX_FRAME_SIZE: u32 = (1 << 24) - 1;

/// Flow-control window of a single stream.
pub const STREAM_WINDOW_SIZE: u32 = 4 * 1024 * 1024;

/// Flow-control window of a whole connection, shared by its streams.
pub const CONNECTION_WINDOW_SIZE: u32 = 16 * 1024 * 1024;

/// Streams a server accepts at once on one connection.
pub const MAX_CONCURRENT_STREAMS: u32 = 250;

// Windows are capped at 2^31 - 1.
const _: () =
	assert!(STREAM_WINDOW_SIZE <= CONNECTION_WINDOW_SIZE && CONNECTION_WINDOW_SIZE < 1 << 31);

/// HTTP/2 without upgrade negotiation. The server is expected to speak HTTP/2 right away
/// (ALPN `h2` over TLS).
#[derive(Debug, Clone)]
pub struct Http2Transport {
	client: reqwest::Client,
}

impl Http2Transport {
	/// # Errors
	/// Fails if the root certificate cannot be loaded.
	pub fn new(credentials: &Credentials) -> Result<Self, ConfigurationError> {
		let client = credentials
			.reqwest_builder()?
			.http2_prior_knowledge()
			.http2_max_frame_size(MAX_FRAME_SIZE)
			.http2_adaptive_window(false)
			.http2_initial_stream_window_size(STREAM_WINDOW_SIZE)
			.http2_initial_connection_window_size(CONNECTION_WINDOW_SIZE)
			.build()?;
		Ok(Self { client })
	}
}

#[async_trait]
impl RoundTrip for Http2Transport {
	async fn round_trip(&self, request: Request<Bytes>) -> Result<Reply, TransferError> {
		execute(&self.client, request).await
	}
}
