//! Headless CLI entry point for `mockpod`: wires a `clap`-derived CLI over
//! [`mockpod::config::ProxyConfig`], installs the shared `tracing` formatter,
//! and drives [`mockpod::ProxyCore`] until Ctrl-C or SIGTERM. Contains no
//! logic the core doesn't already expose as a public API — this binary is a
//! thin, headless-test-harness-compatible wrapper (spec §9).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use mockpod::ProxyCore;
use mockpod::config::ProxyConfig;
use tracing::info;

/// Run the mockpod intercepting proxy.
#[derive(Parser, Debug)]
#[command(name = "mockpod", version, about)]
struct Cli {
	/// Address the proxy listens on.
	#[arg(long, default_value = "0.0.0.0:8080")]
	listen: SocketAddr,

	/// Directory holding the root CA's key and certificate PEM files.
	#[arg(long)]
	storage_dir: Option<PathBuf>,

	/// Upstream TCP connect timeout, in milliseconds.
	#[arg(long, default_value_t = 5000)]
	connect_timeout_ms: u64,

	/// Upstream TLS handshake timeout, in milliseconds.
	#[arg(long, default_value_t = 5000)]
	handshake_timeout_ms: u64,

	/// MITM session idle timeout, in seconds.
	#[arg(long, default_value_t = 60)]
	idle_timeout_secs: u64,

	/// Capacity of the live-inspection ring buffer.
	#[arg(long, default_value_t = 1000)]
	live_ring_capacity: usize,
}

impl Cli {
	fn into_config(self) -> ProxyConfig {
		let mut config = ProxyConfig {
			listen_addr: self.listen,
			upstream_connect_timeout: Duration::from_millis(self.connect_timeout_ms),
			upstream_handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
			mitm_idle_timeout: Duration::from_secs(self.idle_timeout_secs),
			live_ring_capacity: self.live_ring_capacity,
			..ProxyConfig::default()
		};
		if let Some(dir) = self.storage_dir {
			config.ca_storage_dir = dir;
		}
		config
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	mockpod::telemetry::init_logging();

	let cli = Cli::parse();
	let config = cli.into_config();

	let live_ring = mockpod::traffic::LiveRing::new(config.live_ring_capacity);
	let observers: Vec<std::sync::Arc<dyn mockpod::traffic::TrafficObserver>> =
		vec![live_ring.clone() as std::sync::Arc<dyn mockpod::traffic::TrafficObserver>];

	let core = ProxyCore::start(config, observers)
		.await
		.map_err(|err| anyhow::anyhow!("failed to start mockpod proxy: {err}"))?;

	info!(addr = %core.local_addr(), "mockpod ready, press Ctrl-C to stop");

	tokio::signal::ctrl_c().await?;
	info!("shutdown signal received");
	core.shutdown();
	core.wait_stopped().await;

	Ok(())
}
