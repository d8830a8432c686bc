use crate::config::ConfigurationError;
use axum::body::Body;
use axum::Router;
use bytes::{Buf, Bytes};
use futures::StreamExt;
use h3::server::RequestResolver;
use http::{Request, Response};
use quinn::crypto::rustls::QuicServerConfig;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, info, warn, Instrument};

type BoxError = Box<dyn Error + Send + Sync>;

/// Serves HTTP/3 over QUIC until `shutdown` is cancelled. `tls` must allow TLS 1.3 and offer the
/// `h3` ALPN protocol.
///
/// # Errors
/// Fails if `tls` cannot be used for QUIC or the UDP socket cannot be bound.
pub async fn serve_quic(
	addr: SocketAddr,
	app: Router,
	tls: rustls::ServerConfig,
	shutdown: CancellationToken,
) -> Result<(), ConfigurationError> {
	let quic = QuicServerConfig::try_from(tls).map_err(ConfigurationError::transport)?;
	let endpoint = quinn::Endpoint::server(quinn::ServerConfig::with_crypto(Arc::new(quic)), addr)
		.map_err(ConfigurationError::transport)?;
	info!("Started HTTP/3 server on https://{addr} (QUIC)");

	loop {
		let incoming = tokio::select! {
			() = shutdown.cancelled() => break,
			incoming = endpoint.accept() => match incoming {
				Some(incoming) => incoming,
				None => break,
			},
		};

		let span = tracing::debug_span!("connection", peer = %incoming.remote_address(), protocol = "HTTP/3");
		let app = app.clone();
		tokio::spawn(
			async move {
				if let Err(err) = serve_connection(incoming, app).await {
					debug!("Connection closed with error: {err}");
				}
			}
			.instrument(span),
		);
	}

	endpoint.close(quinn::VarInt::from_u32(0), b"shutdown");
	endpoint.wait_idle().await;
	Ok(())
}

async fn serve_connection(incoming: quinn::Incoming, app: Router) -> Result<(), BoxError> {
	let connection = incoming.await?;
	let mut connection: h3::server::Connection<_, Bytes> =
		h3::server::Connection::new(h3_quinn::Connection::new(connection)).await?;

	loop {
		match connection.accept().await {
			Ok(Some(resolver)) => {
				let app = app.clone();
				tokio::spawn(
					async move {
						if let Err(err) = serve_request(resolver, app).await {
							warn!("HTTP/3 request failed: {err}");
						}
					}
					.in_current_span(),
				);
			}
			Ok(None) => return Ok(()),
			Err(err) => {
				debug!("HTTP/3 connection closed: {err}");
				return Ok(());
			}
		}
	}
}

/// Bridges one request stream to the router. The request body is streamed into the handler and
/// the response body is sent chunk by chunk.
async fn serve_request(
	resolver: RequestResolver<h3_quinn::Connection, Bytes>,
	app: Router,
) -> Result<(), BoxError> {
	let (request, stream) = resolver.resolve_request().await?;
	let (mut sender, mut receiver) = stream.split();

	let body = async_stream::stream! {
		loop {
			match receiver.recv_data().await {
				Ok(Some(mut chunk)) => {
					yield Ok::<_, io::Error>(chunk.copy_to_bytes(chunk.remaining()));
				}
				Ok(None) => break,
				Err(err) => {
					yield Err(io::Error::other(err));
					break;
				}
			}
		}
	};

	let (parts, ()) = request.into_parts();
	let request = Request::from_parts(parts, Body::from_stream(body));
	let response = app
		.oneshot(request)
		.await
		.unwrap_or_else(|never| match never {});

	let (parts, body) = response.into_parts();
	sender.send_response(Response::from_parts(parts, ())).await?;
	let mut body = body.into_data_stream();
	while let Some(chunk) = body.next().await {
		sender.send_data(chunk?).await?;
	}
	sender.finish().await?;
	Ok(())
}
