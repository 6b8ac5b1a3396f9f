//! Process configuration. Owned by the embedder; `mockpod-app` layers a CLI on top.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Reserved hostname that routes to the local certificate-download endpoint (§4.8).
pub const CERT_HOST: &str = "mockpod.local";
/// Reserved path that routes to the local certificate-download endpoint (§4.8).
pub const CERT_PATH: &str = "/mockpod/cert";

#[derive(Debug, Clone)]
pub struct ProxyConfig {
	/// Address the proxy front-end listens on. Default `0.0.0.0:8080` (§6).
	pub listen_addr: SocketAddr,
	/// Directory holding `rootCA.key.pem` / `rootCA.cert.pem` (§4.1, §6).
	pub ca_storage_dir: PathBuf,
	/// Upstream TCP connect timeout (§5, implementer's choice).
	pub upstream_connect_timeout: Duration,
	/// Upstream TLS handshake timeout (§5, implementer's choice).
	pub upstream_handshake_timeout: Duration,
	/// A MITM session idle beyond this window may be closed (§5).
	pub mitm_idle_timeout: Duration,
	/// Capacity of the live-inspection ring buffer subscriber (§4.3).
	pub live_ring_capacity: usize,
}

impl ProxyConfig {
	pub fn default_ca_storage_dir() -> PathBuf {
		directories::ProjectDirs::from("", "", "Mockpod")
			.map(|dirs| dirs.data_dir().join("Certificates"))
			.unwrap_or_else(|| PathBuf::from("./Mockpod/Certificates"))
	}
}

impl Default for ProxyConfig {
	fn default() -> Self {
		Self {
			listen_addr: "0.0.0.0:8080".parse().expect("valid default address"),
			ca_storage_dir: Self::default_ca_storage_dir(),
			upstream_connect_timeout: Duration::from_secs(5),
			upstream_handshake_timeout: Duration::from_secs(5),
			mitm_idle_timeout: Duration::from_secs(60),
			live_ring_capacity: 1000,
		}
	}
}
