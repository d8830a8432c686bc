use anyhow::Context;
use dicom_httpx::api::{self, AppState};
use dicom_httpx::config::{check_directory, AppConfig};
use dicom_httpx::server::{self, TlsProtocol};
use dicom_httpx::tls::{self, ALPN_H2, ALPN_HTTP1};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_logger(level: tracing::Level) {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::fmt::layer()
				.compact()
				.with_ansi(true)
				.with_file(false)
				.with_line_number(false)
				.with_target(false),
		)
		.with(
			EnvFilter::builder()
				.with_default_directive(LevelFilter::from_level(level).into())
				.from_env_lossy(),
		)
		.with(sentry::integrations::tracing::layer())
		.init();
}

fn init_sentry(config: &AppConfig) -> sentry::ClientInitGuard {
	let guard = sentry::init((
		// An empty string will disable Sentry
		config.telemetry.sentry.as_deref().unwrap_or_default(),
		sentry::ClientOptions {
			release: sentry::release_name!(),
			traces_sample_rate: 1.0,
			..Default::default()
		},
	));

	if let Some(dsn) = &config.telemetry.sentry {
		info!(dsn, "Enabled Sentry for tracing and error tracking");
	}

	guard
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let config = AppConfig::new()?;
	init_logger(config.telemetry.level);

	// The Sentry client must exist before the Tokio runtime, so #[tokio::main] cannot be used.
	// See https://docs.sentry.io/platforms/rust/#async-main-function
	let _sentry = init_sentry(&config);

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(async move {
			run(config).await.map_err(|error| {
				error!("Failed to start application due to error: {error:#}");
				error.into()
			})
		})
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
	let root = check_directory(Some(config.storage.root.as_path()))?;
	info!("Serving objects from {}", root.display());

	let server = &config.server;
	let app = api::app(AppState::new(root), server.max_upload_size);

	let shutdown = CancellationToken::new();
	if server.graceful_shutdown {
		let shutdown = shutdown.clone();
		tokio::spawn(async move {
			server::shutdown_signal().await;
			info!("Shutting down");
			shutdown.cancel();
		});
	}

	let mut listeners: JoinSet<anyhow::Result<()>> = JoinSet::new();

	if server.http.enabled {
		let addr = server.address(&server.http);
		let listener = server::serve_plain(addr, app.clone(), shutdown.clone());
		listeners.spawn(async move {
			listener
				.await
				.with_context(|| format!("HTTP/1.1 listener on {addr} failed"))
		});
	}

	for (listener, protocol, alpn) in [
		(&server.https, TlsProtocol::Http1, ALPN_HTTP1),
		(&server.http2, TlsProtocol::Http2, ALPN_H2),
	] {
		if !listener.enabled {
			continue;
		}
		let addr = server.address(listener);
		let tls = tls::server_config(&server.tls, &[alpn], rustls::DEFAULT_VERSIONS)
			.with_context(|| format!("Invalid TLS configuration for the {protocol} listener"))?;
		let listener = server::serve_tls(addr, app.clone(), tls, protocol, shutdown.clone());
		listeners.spawn(async move {
			listener
				.await
				.with_context(|| format!("{protocol} listener on {addr} failed"))
		});
	}

	if server.http3.enabled {
		#[cfg(feature = "http3")]
		{
			let addr = server.address(&server.http3);
			let tls = tls::server_config(
				&server.tls,
				&[tls::ALPN_H3],
				&[&rustls::version::TLS13],
			)
			.context("Invalid TLS configuration for the HTTP/3 listener")?;
			let listener = server::serve_quic(addr, app.clone(), tls, shutdown.clone());
			listeners.spawn(async move {
				listener
					.await
					.with_context(|| format!("HTTP/3 listener on {addr} failed"))
			});
		}
		#[cfg(not(feature = "http3"))]
		tracing::warn!("HTTP/3 is enabled but this build does not include the http3 feature");
	}

	if listeners.is_empty() {
		anyhow::bail!("No listener is enabled");
	}

	while let Some(joined) = listeners.join_next().await {
		match joined {
			Ok(Ok(())) => {}
			Ok(Err(err)) => error!("{err:#}"),
			Err(err) => error!("Listener task failed: {err}"),
		}
	}

	Ok(())
}
