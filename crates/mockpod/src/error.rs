//! Error kinds, per spec §7 ERROR HANDLING DESIGN.
//!
//! Propagation policy: errors recoverable by substituting a well-formed HTTP
//! response are recovered *and* still produce a `TrafficEntry` that reflects
//! what the client actually saw. Errors that force connection teardown never
//! produce an entry.

use std::net::SocketAddr;

/// Fatal at startup only; the proxy refuses to start.
#[derive(thiserror::Error, Debug)]
pub enum CaError {
	#[error("CA storage directory {0:?} is not writable: {1}")]
	StorageUnwritable(std::path::PathBuf, std::io::Error),
	#[error("existing CA material at {0:?} is corrupt: {1}")]
	CorruptRoot(std::path::PathBuf, String),
	#[error("failed to generate root CA: {0}")]
	RootGeneration(String),
	#[error("failed to issue leaf certificate for {host}: {source}")]
	LeafIssueFailed { host: String, source: String },
	#[error("failed to build TLS server config for {host}: {source}")]
	TlsConfig { host: String, source: String },
}

/// Connection- or request-scoped failures. None of these should ever panic the process.
#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
	#[error("malformed request line from client")]
	ClientProtocolError,

	#[error("request line exceeded maximum size without a terminator")]
	RequestLineTooLong,

	#[error("malformed request URI")]
	MalformedUri,

	#[error("could not connect to upstream {addr}: {source}")]
	UpstreamConnectFailed {
		addr: SocketAddr,
		source: std::io::Error,
	},

	#[error("could not resolve upstream host {host}: {source}")]
	UpstreamResolveFailed {
		host: String,
		source: std::io::Error,
	},

	#[error("upstream TLS handshake with {host} failed: {source}")]
	UpstreamTlsFailed { host: String, source: String },

	#[error("upstream returned a malformed HTTP/1.1 message: {0}")]
	UpstreamProtocolError(String),

	#[error("inbound TLS handshake failed: {0}")]
	TlsHandshakeFailed(String),

	#[error("failed to issue leaf certificate: {0}")]
	LeafIssueFailed(#[from] CaError),

	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),
}

/// Fatal at `ProxyCore::start` only; covers both `CAInitFailed` (spec §7)
/// and the listener bind itself, which the spec doesn't name as a distinct
/// error kind but which must surface the same way — refuse to start rather
/// than panic.
#[derive(thiserror::Error, Debug)]
pub enum ProxyStartError {
	#[error(transparent)]
	Ca(#[from] CaError),

	#[error("failed to bind listener on {addr}: {source}")]
	Bind {
		addr: SocketAddr,
		source: std::io::Error,
	},
}

impl ProxyError {
	/// Whether this error can be turned into a well-formed client-visible
	/// response (and therefore a published `TrafficEntry`), or whether it
	/// forces a silent connection teardown (no entry published).
	pub fn is_recoverable_as_response(&self) -> bool {
		matches!(
			self,
			ProxyError::UpstreamConnectFailed { .. }
				| ProxyError::UpstreamResolveFailed { .. }
				| ProxyError::UpstreamTlsFailed { .. }
				| ProxyError::UpstreamProtocolError(_)
		)
	}
}
