use crate::config::{ConfigurationError, TlsConfig};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::SupportedProtocolVersion;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

pub const ALPN_HTTP1: &[u8] = b"http/1.1";
pub const ALPN_H2: &[u8] = b"h2";
pub const ALPN_H3: &[u8] = b"h3";

/// Every TLS configuration uses ring, so no process-wide default provider needs to be installed.
pub fn crypto_provider() -> Arc<CryptoProvider> {
	Arc::new(rustls::crypto::ring::default_provider())
}

fn open(path: &Path) -> Result<BufReader<std::fs::File>, ConfigurationError> {
	std::fs::File::open(path)
		.map(BufReader::new)
		.map_err(|source| ConfigurationError::Read {
			path: path.to_owned(),
			source,
		})
}

/// Reads all certificates of a PEM file.
///
/// # Errors
/// Returns [`ConfigurationError::Read`] if the file cannot be read or contains malformed PEM.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigurationError> {
	rustls_pemfile::certs(&mut open(path)?)
		.collect::<Result<Vec<_>, _>>()
		.map_err(|source| ConfigurationError::Read {
			path: path.to_owned(),
			source,
		})
}

/// Reads the first private key of a PEM file.
///
/// # Errors
/// Returns [`ConfigurationError::MissingPrivateKey`] if the file holds no key.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigurationError> {
	rustls_pemfile::private_key(&mut open(path)?)
		.map_err(|source| ConfigurationError::Read {
			path: path.to_owned(),
			source,
		})?
		.ok_or_else(|| ConfigurationError::MissingPrivateKey {
			path: path.to_owned(),
		})
}

/// Builds the server side of a TLS listener that negotiates one of `alpn`.
///
/// # Errors
/// Fails if the certificate or key cannot be loaded or do not match.
pub fn server_config(
	tls: &TlsConfig,
	alpn: &[&[u8]],
	versions: &[&'static SupportedProtocolVersion],
) -> Result<rustls::ServerConfig, ConfigurationError> {
	let certificates = load_certificates(&tls.certificate)?;
	let key = load_private_key(&tls.private_key)?;

	let mut config = rustls::ServerConfig::builder_with_provider(crypto_provider())
		.with_protocol_versions(versions)?
		.with_no_client_auth()
		.with_single_cert(certificates, key)?;
	config.alpn_protocols = alpn.iter().map(|protocol| protocol.to_vec()).collect();
	Ok(config)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::PathBuf;

	#[test]
	fn missing_files() {
		let tls = TlsConfig {
			certificate: PathBuf::from("does/not/exist.pem"),
			private_key: PathBuf::from("does/not/exist.pem"),
		};
		assert!(matches!(
			server_config(&tls, &[ALPN_H2], rustls::DEFAULT_VERSIONS),
			Err(ConfigurationError::Read { .. })
		));
	}

	#[test]
	fn pem_without_key() {
		let root = tempfile::TempDir::new().unwrap();
		let path = root.path().join("empty.pem");
		std::fs::write(&path, "not a pem file\n").unwrap();

		assert!(load_certificates(&path).unwrap().is_empty());
		assert!(matches!(
			load_private_key(&path),
			Err(ConfigurationError::MissingPrivateKey { .. })
		));
	}
}
