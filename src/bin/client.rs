use anyhow::Context;
use clap::{Parser, ValueEnum};
use dicom_httpx::client::http1::Http1Transport;
use dicom_httpx::client::http2::Http2Transport;
use dicom_httpx::client::{self, ChunkingMode, Credentials, RoundTrip, UploadMode};
use dicom_httpx::config::check_directory;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
	/// HTTP version to use
	#[arg(value_enum)]
	#[clap(long = "http", default_value = "1.1")]
	http: HttpVersion,
	/// Retrieve objects from the URL or send objects to it
	#[arg(value_enum)]
	#[clap(short, long, default_value = "retrieve")]
	operation: Operation,
	/// Directory to store retrieved objects in or to send objects from. Defaults to the current
	/// directory.
	#[clap(short, long)]
	dir: Option<PathBuf>,
	/// Send one request per object or a single multipart request
	#[arg(value_enum)]
	#[clap(short, long, default_value = "single")]
	chunking: ChunkingMode,
	/// Send single-part requests one after another or concurrently
	#[arg(value_enum)]
	#[clap(short, long, default_value = "sync")]
	mode: UploadMode,
	/// PEM file with an additional root certificate to trust
	#[clap(long)]
	cert: Option<PathBuf>,
	/// Accept any server certificate
	#[clap(long)]
	insecure: bool,
	/// Write TLS secrets of the HTTP/3 connection to $SSLKEYLOGFILE
	#[clap(long)]
	qlog: bool,
	/// Set the log level
	#[arg(value_enum)]
	#[clap(short = 'L', long, default_value = "info")]
	log_level: LogLevel,
	/// e.g. https://localhost:8081/studies/1.2.3
	url: Url,
}

#[derive(Copy, Clone, ValueEnum, Debug)]
enum HttpVersion {
	#[value(name = "1.1")]
	Http1,
	#[value(name = "2", alias = "2.0")]
	Http2,
	#[value(name = "3", alias = "3.0")]
	Http3,
}

#[derive(Copy, Clone, ValueEnum, Debug)]
enum Operation {
	Retrieve,
	Send,
}

#[derive(Copy, Clone, ValueEnum, Debug)]
enum LogLevel {
	Debug,
	Info,
	Warn,
	Error,
	Quiet,
}

#[tokio::main]
async fn main() -> ExitCode {
	let args = Args::parse();
	tracing_subscriber_handler(args.log_level);

	match run(args).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			error!("{err:#}");
			ExitCode::FAILURE
		}
	}
}

async fn run(args: Args) -> anyhow::Result<()> {
	let root = check_directory(args.dir.as_deref())?;
	let transport = transport(&args)?;

	match args.operation {
		Operation::Retrieve => {
			info!("Retrieve using HTTP GET with {:?} on {}", args.http, args.url);
			let result = client::get(transport.as_ref(), &args.url, &root)
				.await
				.with_context(|| format!("GET {} failed", args.url))?;
			println!("RETRIEVE {result}");
		}
		Operation::Send => {
			info!("Send using HTTP POST with {:?} on {}", args.http, args.url);
			let result = client::post(transport, &args.url, &root, args.chunking, args.mode)
				.await
				.with_context(|| format!("POST {} failed", args.url))?;
			println!("SEND {result}");
		}
	}

	Ok(())
}

fn transport(args: &Args) -> anyhow::Result<Arc<dyn RoundTrip>> {
	let credentials = Credentials {
		root_certificate: args.cert.clone(),
		insecure: args.insecure,
	};

	if args.qlog && !matches!(args.http, HttpVersion::Http3) {
		warn!("--qlog only applies to HTTP/3 and is ignored");
	}

	let transport: Arc<dyn RoundTrip> = match args.http {
		HttpVersion::Http1 => Arc::new(Http1Transport::new(&credentials)?),
		HttpVersion::Http2 => Arc::new(Http2Transport::new(&credentials)?),
		#[cfg(feature = "http3")]
		HttpVersion::Http3 => Arc::new(client::http3::Http3Transport::new(
			&credentials,
			args.qlog,
		)?),
		#[cfg(not(feature = "http3"))]
		HttpVersion::Http3 => anyhow::bail!("This build does not include the http3 feature"),
	};
	Ok(transport)
}

fn tracing_subscriber_handler(level: LogLevel) {
	let env_filter = match level {
		LogLevel::Debug => "debug",
		LogLevel::Info => "info",
		LogLevel::Warn => "warn",
		LogLevel::Error => "error",
		LogLevel::Quiet => "off",
	};

	tracing_subscriber::fmt()
		.compact()
		.with_target(false)
		.with_env_filter(env_filter)
		.init();
}
