use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Deserializer};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULTS: &str = include_str!("defaults.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
	pub telemetry: TelemetryConfig,
	pub storage: StorageConfig,
	pub server: ServerConfig,
}

impl AppConfig {
	/// Loads the configuration from the built-in defaults, an optional `config.toml` in the working
	/// directory and `DICOM_HTTPX_*` environment variables, in increasing order of precedence.
	///
	/// # Errors
	/// Returns a [`config::ConfigError`] if a source is malformed or a value has the wrong type.
	pub fn new() -> Result<Self, config::ConfigError> {
		Self::from_environment(environment())
	}

	fn from_environment(environment: Environment) -> Result<Self, config::ConfigError> {
		Config::builder()
			.add_source(File::from_str(DEFAULTS, FileFormat::Toml))
			.add_source(File::with_name("config.toml").required(false))
			.add_source(environment)
			.build()?
			.try_deserialize()
	}
}

/// e.g. `DICOM_HTTPX_SERVER__HTTP__PORT=9000`
fn environment() -> Environment {
	Environment::with_prefix("DICOM_HTTPX")
		.prefix_separator("_")
		.separator("__")
		.try_parsing(true)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
	/// Default log level. `RUST_LOG` takes precedence.
	#[serde(deserialize_with = "deserialize_level")]
	pub level: tracing::Level,
	/// Sentry DSN. Sentry is disabled if this is not set.
	pub sentry: Option<String>,
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<tracing::Level, D::Error>
where
	D: Deserializer<'de>,
{
	let level = String::deserialize(deserializer)?;
	level.parse().map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
	/// Root of the `<study>/<series>/<instance>.dcm` layout. Must exist.
	pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
	pub interface: IpAddr,
	/// Maximum request body size in bytes.
	pub max_upload_size: usize,
	pub graceful_shutdown: bool,
	/// HTTP/1.1 without TLS
	pub http: ListenerConfig,
	/// HTTP/1.1 over TLS
	pub https: ListenerConfig,
	/// HTTP/2 over TLS
	pub http2: ListenerConfig,
	/// HTTP/3 over QUIC
	pub http3: ListenerConfig,
	pub tls: TlsConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ListenerConfig {
	pub enabled: bool,
	pub port: u16,
}

impl ServerConfig {
	pub const fn address(&self, listener: &ListenerConfig) -> SocketAddr {
		SocketAddr::new(self.interface, listener.port)
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
	/// PEM file with the certificate chain
	pub certificate: PathBuf,
	/// PEM file with the private key
	pub private_key: PathBuf,
}

/// Failures while setting up the server or a client. These are never per-request conditions.
#[derive(Debug, Error)]
pub enum ConfigurationError {
	#[error(transparent)]
	Config(#[from] config::ConfigError),
	#[error("Directory {} does not exist", path.display())]
	MissingDirectory { path: PathBuf },
	#[error("Failed to read {}: {source}", path.display())]
	Read {
		path: PathBuf,
		source: std::io::Error,
	},
	#[error("No private key found in {}", path.display())]
	MissingPrivateKey { path: PathBuf },
	#[error(transparent)]
	Tls(#[from] rustls::Error),
	#[error(transparent)]
	Client(#[from] reqwest::Error),
	#[error(transparent)]
	Transport {
		source: Box<dyn std::error::Error + Send + Sync>,
	},
}

impl ConfigurationError {
	pub fn transport(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
		Self::Transport {
			source: source.into(),
		}
	}
}

/// Resolves the working directory of an operation. No directory means the current directory.
///
/// # Errors
/// Returns [`ConfigurationError::MissingDirectory`] if the directory does not exist.
pub fn check_directory(directory: Option<&Path>) -> Result<PathBuf, ConfigurationError> {
	let directory = match directory {
		Some(directory) if !directory.as_os_str().is_empty() => directory.to_owned(),
		_ => std::env::current_dir().map_err(|source| ConfigurationError::Read {
			path: PathBuf::from("."),
			source,
		})?,
	};

	if directory.is_dir() {
		Ok(directory)
	} else {
		Err(ConfigurationError::MissingDirectory { path: directory })
	}
}
