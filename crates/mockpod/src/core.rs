//! `ProxyCore` — the explicit handle an embedder constructs and drives
//! (spec §9 design note (a)): owns the Certificate Authority, the Rule
//! Engine, the Traffic Bus and the listening socket for the process
//! lifetime. Accepting and serving connections happens on background tasks;
//! the embedder only ever touches this handle and the subscribers it
//! registered at construction.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ca::Ca;
use crate::config::ProxyConfig;
use crate::error::ProxyStartError;
use crate::proxy::Dispatcher;
use crate::rules::RuleEngine;
use crate::traffic::{TrafficBus, TrafficObserver};

/// Read-only counters for an embedder UI to poll (spec `SPEC_FULL.md` §B.6
/// "Metrics-free health snapshot"). Not gated by any spec Non-goal — it is
/// read-only state, not a new feature.
#[derive(Debug, Clone, Copy)]
pub struct ProxyStats {
	pub active_connections: usize,
	pub rule_count: usize,
	pub leaf_cache_size: usize,
}

/// Owns the CA, Rule Engine, Traffic Bus and listening socket (spec §9).
/// A MITM session or HTTP Proxy Path connection only ever sees cloned
/// `Arc`s of the collaborators below, never this struct itself.
pub struct ProxyCore {
	config: ProxyConfig,
	ca: Arc<Ca>,
	rules: Arc<RuleEngine>,
	traffic: Arc<TrafficBus>,
	local_addr: SocketAddr,
	shutdown: CancellationToken,
	active_connections: Arc<AtomicUsize>,
	accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyCore {
	/// Load or create the root CA, bind the listening socket, and start
	/// accepting connections in the background. Fails only at startup
	/// (spec §7 `CAInitFailed`, plus a bind failure the spec doesn't name
	/// separately but which must behave the same way).
	pub async fn start(
		config: ProxyConfig,
		observers: Vec<Arc<dyn TrafficObserver>>,
	) -> Result<Arc<Self>, ProxyStartError> {
		let ca = Ca::load_or_create(&config.ca_storage_dir)?;
		let rules = Arc::new(RuleEngine::new());
		let traffic = Arc::new(TrafficBus::new(observers));

		let listener =
			TcpListener::bind(config.listen_addr)
				.await
				.map_err(|source| ProxyStartError::Bind {
					addr: config.listen_addr,
					source,
				})?;
		let local_addr = listener.local_addr().unwrap_or(config.listen_addr);

		let shutdown = CancellationToken::new();
		let active_connections = Arc::new(AtomicUsize::new(0));
		let dispatcher = Arc::new(Dispatcher::new(
			ca.clone(),
			rules.clone(),
			traffic.clone(),
			config.clone(),
		));

		let accept_task = spawn_accept_loop(
			listener,
			dispatcher,
			shutdown.clone(),
			active_connections.clone(),
		);

		info!(addr = %local_addr, "mockpod proxy listening");

		Ok(Arc::new(Self {
			config,
			ca,
			rules,
			traffic,
			local_addr,
			shutdown,
			active_connections,
			accept_task: Mutex::new(Some(accept_task)),
		}))
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	pub fn config(&self) -> &ProxyConfig {
		&self.config
	}

	pub fn ca(&self) -> &Arc<Ca> {
		&self.ca
	}

	pub fn rules(&self) -> &Arc<RuleEngine> {
		&self.rules
	}

	pub fn traffic(&self) -> &Arc<TrafficBus> {
		&self.traffic
	}

	pub fn stats(&self) -> ProxyStats {
		ProxyStats {
			active_connections: self.active_connections.load(Ordering::SeqCst),
			rule_count: self.rules.len(),
			leaf_cache_size: self.ca.leaf_cache_size(),
		}
	}

	/// Close the listening socket and tear down every in-flight connection
	/// (spec §5 "Cancellation"): no traffic entry is published for a
	/// request that was in flight when shutdown fired, since its
	/// `TrafficEntry::complete` never flips to `true`. Returns immediately
	/// — the actual teardown runs on the background tasks already spawned
	/// by `start`, so this never blocks the caller's thread (spec §5
	/// "Shutdown of the event-loop group must not block the caller's main
	/// thread").
	pub fn shutdown(&self) {
		self.shutdown.cancel();
	}

	/// Wait for the listener and every in-flight connection spawned by it
	/// to actually finish unwinding after `shutdown()`. Not required by the
	/// spec's non-blocking guarantee (which only binds `shutdown()` itself)
	/// but useful for tests and for an embedder that wants to know the
	/// socket is truly gone before e.g. exiting the process.
	pub async fn wait_stopped(&self) {
		let task = self.accept_task.lock().take();
		if let Some(task) = task {
			let _ = task.await;
		}
	}
}

fn spawn_accept_loop(
	listener: TcpListener,
	dispatcher: Arc<Dispatcher>,
	shutdown: CancellationToken,
	active_connections: Arc<AtomicUsize>,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				accepted = listener.accept() => {
					let (stream, peer) = match accepted {
						Ok(pair) => pair,
						Err(err) => {
							warn!(error = %err, "failed to accept a connection");
							continue;
						},
					};
					spawn_connection(stream, peer, dispatcher.clone(), shutdown.clone(), active_connections.clone());
				}
			}
		}
		info!("listener closed");
	})
}

fn spawn_connection(
	stream: tokio::net::TcpStream,
	peer: SocketAddr,
	dispatcher: Arc<Dispatcher>,
	shutdown: CancellationToken,
	active_connections: Arc<AtomicUsize>,
) {
	active_connections.fetch_add(1, Ordering::SeqCst);
	tokio::spawn(async move {
		tokio::select! {
			_ = shutdown.cancelled() => {},
			_ = dispatcher.handle_connection(stream, peer) => {},
		}
		active_connections.fetch_sub(1, Ordering::SeqCst);
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn start_binds_an_ephemeral_port_and_reports_it() {
		let dir = tempfile::tempdir().unwrap();
		let mut config = ProxyConfig::default();
		config.listen_addr = "127.0.0.1:0".parse().unwrap();
		config.ca_storage_dir = dir.path().to_path_buf();

		let core = ProxyCore::start(config, vec![]).await.unwrap();
		assert_ne!(core.local_addr().port(), 0);
		assert_eq!(core.stats().active_connections, 0);

		core.shutdown();
		core.wait_stopped().await;
	}

	#[tokio::test]
	async fn shutdown_closes_the_listener() {
		let dir = tempfile::tempdir().unwrap();
		let mut config = ProxyConfig::default();
		config.listen_addr = "127.0.0.1:0".parse().unwrap();
		config.ca_storage_dir = dir.path().to_path_buf();

		let core = ProxyCore::start(config, vec![]).await.unwrap();
		let addr = core.local_addr();
		core.shutdown();
		core.wait_stopped().await;

		assert!(tokio::net::TcpStream::connect(addr).await.is_err());
	}
}
