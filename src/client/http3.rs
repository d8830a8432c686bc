use super::{Credentials, Reply, RoundTrip};
use crate::config::ConfigurationError;
use crate::error::TransferError;
use crate::tls::{crypto_provider, ALPN_H3};
use async_trait::async_trait;
use bytes::{Buf, Bytes};
use futures::StreamExt;
use http::Request;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

type Sender = h3::client::SendRequest<h3_quinn::OpenStreams, Bytes>;

/// HTTP/3 over QUIC. All requests share one connection, which is opened by the first request
/// and reopened by the next request after it closed.
pub struct Http3Transport {
	endpoint: quinn::Endpoint,
	connection: Arc<Mutex<ConnectionCache<Sender>>>,
}

/// The open connection, keyed by its QUIC stable id so a stale close does not evict a newer one.
#[derive(Debug)]
struct ConnectionCache<T> {
	current: Option<(usize, T)>,
}

impl<T: Clone> ConnectionCache<T> {
	const fn new() -> Self {
		Self { current: None }
	}

	fn get(&self) -> Option<(usize, T)> {
		self.current.clone()
	}

	fn insert(&mut self, id: usize, value: T) {
		self.current = Some((id, value));
	}

	fn invalidate(&mut self, id: usize) {
		if self.current.as_ref().is_some_and(|(current, _)| *current == id) {
			self.current = None;
		}
	}
}

impl Http3Transport {
	/// With `key_log`, TLS secrets are appended to the file named by `SSLKEYLOGFILE`, so the QUIC
	/// traffic can be decrypted for diagnostics.
	///
	/// # Errors
	/// Fails if the root certificate cannot be loaded or the UDP socket cannot be bound.
	pub fn new(credentials: &Credentials, key_log: bool) -> Result<Self, ConfigurationError> {
		let provider = crypto_provider();
		let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
			.with_protocol_versions(&[&rustls::version::TLS13])?;

		let mut tls = if credentials.insecure {
			builder
				.dangerous()
				.with_custom_certificate_verifier(Arc::new(SkipVerification(provider)))
				.with_no_client_auth()
		} else {
			let mut roots: rustls::RootCertStore =
				webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
			if let Some(path) = &credentials.root_certificate {
				for certificate in crate::tls::load_certificates(path)? {
					roots.add(certificate)?;
				}
			}
			builder.with_root_certificates(roots).with_no_client_auth()
		};
		tls.alpn_protocols = vec![ALPN_H3.to_vec()];
		if key_log {
			info!("Writing TLS key log to $SSLKEYLOGFILE");
			tls.key_log = Arc::new(rustls::KeyLogFile::new());
		}

		let quic = quinn::crypto::rustls::QuicClientConfig::try_from(tls)
			.map_err(ConfigurationError::transport)?;
		let mut endpoint = quinn::Endpoint::client(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
			.map_err(ConfigurationError::transport)?;
		endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(quic)));

		Ok(Self {
			endpoint,
			connection: Arc::new(Mutex::new(ConnectionCache::new())),
		})
	}

	async fn sender(&self, url: &Url) -> Result<(usize, Sender), TransferError> {
		let mut cache = self.connection.lock().await;
		if let Some(cached) = cache.get() {
			return Ok(cached);
		}

		let (id, sender) = self.connect(url).await?;
		cache.insert(id, sender.clone());
		Ok((id, sender))
	}

	async fn connect(&self, url: &Url) -> Result<(usize, Sender), TransferError> {
		let invalid = || TransferError::transport(format!("No host in {url}"));
		let host = url.host_str().ok_or_else(invalid)?;
		let port = url.port_or_known_default().ok_or_else(invalid)?;
		let address = tokio::net::lookup_host((host, port))
			.await?
			.next()
			.ok_or_else(invalid)?;

		let connection = self
			.endpoint
			.connect(address, host)
			.map_err(TransferError::transport)?
			.await
			.map_err(TransferError::transport)?;
		let id = connection.stable_id();
		debug!(%address, id, "QUIC connection established");

		let (mut driver, sender) = h3::client::new(h3_quinn::Connection::new(connection))
			.await
			.map_err(TransferError::transport)?;
		let cache = Arc::clone(&self.connection);
		tokio::spawn(async move {
			let closed = futures::future::poll_fn(|cx| driver.poll_close(cx)).await;
			debug!(id, "HTTP/3 connection closed: {closed:?}");
			cache.lock().await.invalidate(id);
		});

		Ok((id, sender))
	}
}

#[async_trait]
impl RoundTrip for Http3Transport {
	async fn round_trip(&self, request: Request<Bytes>) -> Result<Reply, TransferError> {
		let url = Url::parse(&request.uri().to_string()).map_err(TransferError::transport)?;
		let (id, mut sender) = self.sender(&url).await?;

		let (parts, body) = request.into_parts();
		let mut stream = match sender.send_request(Request::from_parts(parts, ())).await {
			Ok(stream) => stream,
			Err(err) => {
				self.connection.lock().await.invalidate(id);
				return Err(TransferError::transport(err));
			}
		};
		if !body.is_empty() {
			stream
				.send_data(body)
				.await
				.map_err(TransferError::transport)?;
		}
		stream.finish().await.map_err(TransferError::transport)?;

		let response = stream
			.recv_response()
			.await
			.map_err(TransferError::transport)?;
		let body = async_stream::stream! {
			// keeps the connection open until the body is read
			let _sender = sender;
			loop {
				match stream.recv_data().await {
					Ok(Some(mut chunk)) => {
						yield Ok::<_, std::io::Error>(chunk.copy_to_bytes(chunk.remaining()));
					}
					Ok(None) => break,
					Err(err) => {
						yield Err(std::io::Error::other(err));
						break;
					}
				}
			}
		};

		Ok(Reply {
			status: response.status(),
			headers: response.headers().clone(),
			body: body.boxed(),
		})
	}
}

/// Accepts any server certificate. Signatures are still checked.
#[derive(Debug)]
struct SkipVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipVerification {
	fn verify_server_cert(
		&self,
		_end_entity: &CertificateDer<'_>,
		_intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp_response: &[u8],
		_now: UnixTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		Ok(ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		rustls::crypto::verify_tls12_signature(
			message,
			cert,
			dss,
			&self.0.signature_verification_algorithms,
		)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		rustls::crypto::verify_tls13_signature(
			message,
			cert,
			dss,
			&self.0.signature_verification_algorithms,
		)
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		self.0.signature_verification_algorithms.supported_schemes()
	}
}
