//! Upstream connection helpers shared by the HTTP Proxy Path and the MITM
//! Session: plain TCP for `http://` origins, a standard-trust (not the local
//! CA) TLS client for `https://` origins re-originated out of a MITM tunnel.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rustls::ClientConfig;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::error::ProxyError;

fn client_config() -> Arc<ClientConfig> {
	static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();
	CONFIG
		.get_or_init(|| {
			let mut roots = rustls::RootCertStore::empty();
			let native = rustls_native_certs::load_native_certs();
			for err in &native.errors {
				tracing::warn!(error = %err, "error loading a native root certificate");
			}
			for cert in native.certs {
				let _ = roots.add(cert);
			}
			let config = ClientConfig::builder()
				.with_root_certificates(roots)
				.with_no_client_auth();
			Arc::new(config)
		})
		.clone()
}

async fn connect_tcp(
	addr: impl ToSocketAddrs,
	timeout: Duration,
) -> Result<TcpStream, std::io::Error> {
	match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
		Ok(result) => result,
		Err(_) => Err(std::io::Error::new(
			std::io::ErrorKind::TimedOut,
			"connect timed out",
		)),
	}
}

/// Open a plain TCP connection to `host:port`, for plaintext `http://` origins.
pub async fn connect_plain(
	host: &str,
	port: u16,
	timeout: Duration,
) -> Result<TcpStream, ProxyError> {
	connect_tcp((host, port), timeout)
		.await
		.map_err(|source| to_connect_error(host, port, source))
}

/// Open a TCP connection and perform a TLS client handshake against
/// `host:port`, trusting the platform's standard root store — never the
/// proxy's own CA, which would be circular (this is the connection the MITM
/// session re-originates toward the real origin).
pub async fn connect_tls(
	host: &str,
	port: u16,
	connect_timeout: Duration,
	handshake_timeout: Duration,
) -> Result<TlsStream<TcpStream>, ProxyError> {
	let tcp = connect_tcp((host, port), connect_timeout)
		.await
		.map_err(|source| to_connect_error(host, port, source))?;

	let connector = TlsConnector::from(client_config());
	let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
		.map_err(|_| ProxyError::MalformedUri)?;

	match tokio::time::timeout(handshake_timeout, connector.connect(server_name, tcp)).await {
		Ok(Ok(stream)) => Ok(stream),
		Ok(Err(source)) => Err(ProxyError::UpstreamTlsFailed {
			host: host.to_string(),
			source: source.to_string(),
		}),
		Err(_) => Err(ProxyError::UpstreamTlsFailed {
			host: host.to_string(),
			source: "TLS handshake timed out".to_string(),
		}),
	}
}

fn to_connect_error(host: &str, port: u16, source: std::io::Error) -> ProxyError {
	match format!("{host}:{port}").parse::<SocketAddr>() {
		Ok(addr) => ProxyError::UpstreamConnectFailed { addr, source },
		Err(_) => ProxyError::UpstreamResolveFailed {
			host: host.to_string(),
			source,
		},
	}
}

/// Split `host[:port]` (a CONNECT target or an absolute-URI authority),
/// defaulting to `default_port` when no port is given.
pub fn split_host_port(authority: &str, default_port: u16) -> (String, u16) {
	match authority.rsplit_once(':') {
		Some((host, port)) => match port.parse::<u16>() {
			Ok(port) => (host.to_string(), port),
			Err(_) => (authority.to_string(), default_port),
		},
		None => (authority.to_string(), default_port),
	}
}
