//! Listeners. Every listener serves the same [`axum::Router`]; they only differ in how connections
//! are accepted and which HTTP version is spoken on them.

#[cfg(feature = "http3")]
mod quic;

#[cfg(feature = "http3")]
pub use quic::serve_quic;

use crate::client::http2::{
	CONNECTION_WINDOW_SIZE, MAX_CONCURRENT_STREAMS, MAX_FRAME_SIZE, STREAM_WINDOW_SIZE,
};
use axum::Router;
use hyper::server::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use std::fmt::{Display, Formatter};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(err) = signal::ctrl_c().await {
			error!("Failed to listen for Ctrl+C: {err}");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut terminate) => {
				terminate.recv().await;
			}
			Err(err) => {
				error!("Failed to listen for SIGTERM: {err}");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {},
		() = terminate => {},
	}
}

/// Serves HTTP/1.1 without TLS until `shutdown` is cancelled.
///
/// # Errors
/// Fails if the address cannot be bound.
pub async fn serve_plain(
	addr: SocketAddr,
	app: Router,
	shutdown: CancellationToken,
) -> io::Result<()> {
	let listener = TcpListener::bind(addr).await?;
	info!("Started HTTP/1.1 server on http://{addr}");
	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown.cancelled_owned())
		.await
}

/// The HTTP version spoken on a TLS listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsProtocol {
	Http1,
	Http2,
}

impl Display for TlsProtocol {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Http1 => write!(f, "HTTP/1.1"),
			Self::Http2 => write!(f, "HTTP/2"),
		}
	}
}

/// Serves `protocol` over TLS until `shutdown` is cancelled. Open connections are closed
/// gracefully before this returns.
///
/// # Errors
/// Fails if the address cannot be bound.
pub async fn serve_tls(
	addr: SocketAddr,
	app: Router,
	tls: rustls::ServerConfig,
	protocol: TlsProtocol,
	shutdown: CancellationToken,
) -> io::Result<()> {
	let listener = TcpListener::bind(addr).await?;
	let acceptor = TlsAcceptor::from(Arc::new(tls));
	info!("Started {protocol} server on https://{addr}");

	let mut connections = JoinSet::new();
	loop {
		let (stream, peer) = tokio::select! {
			() = shutdown.cancelled() => break,
			Some(_) = connections.join_next(), if !connections.is_empty() => continue,
			accepted = listener.accept() => match accepted {
				Ok(accepted) => accepted,
				Err(err) => {
					warn!("Failed to accept connection: {err}");
					continue;
				}
			},
		};

		let span = tracing::debug_span!("connection", %peer, %protocol);
		connections.spawn(
			serve_connection(stream, acceptor.clone(), app.clone(), protocol, shutdown.clone())
				.instrument(span),
		);
	}

	while connections.join_next().await.is_some() {}
	Ok(())
}

async fn serve_connection(
	stream: TcpStream,
	acceptor: TlsAcceptor,
	app: Router,
	protocol: TlsProtocol,
	shutdown: CancellationToken,
) {
	let stream = match acceptor.accept(stream).await {
		Ok(stream) => TokioIo::new(stream),
		Err(err) => {
			debug!("TLS handshake failed: {err}");
			return;
		}
	};
	let service = TowerToHyperService::new(app);

	let result = match protocol {
		TlsProtocol::Http1 => {
			let connection = http1::Builder::new().serve_connection(stream, service);
			tokio::pin!(connection);
			tokio::select! {
				result = connection.as_mut() => result,
				() = shutdown.cancelled() => {
					connection.as_mut().graceful_shutdown();
					connection.await
				}
			}
		}
		TlsProtocol::Http2 => {
			let mut builder = http2::Builder::new(TokioExecutor::new());
			builder
				.max_frame_size(MAX_FRAME_SIZE)
				.max_concurrent_streams(MAX_CONCURRENT_STREAMS)
				.initial_stream_window_size(STREAM_WINDOW_SIZE)
				.initial_connection_window_size(CONNECTION_WINDOW_SIZE);
			let connection = builder.serve_connection(stream, service);
			tokio::pin!(connection);
			tokio::select! {
				result = connection.as_mut() => result,
				() = shutdown.cancelled() => {
					connection.as_mut().graceful_shutdown();
					connection.await
				}
			}
		}
	};

	if let Err(err) = result {
		debug!("Connection closed with error: {err}");
	}
}
