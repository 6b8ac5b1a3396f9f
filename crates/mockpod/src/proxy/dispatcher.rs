//! Connection Dispatcher: the first thing that touches an accepted TCP
//! connection. Reads exactly one request off the wire and decides, from its
//! method alone, whether this connection is a `CONNECT` tunnel request (and
//! therefore becomes a MITM Session) or a plaintext absolute-form proxy
//! request (and therefore becomes an HTTP Proxy Path connection). Every
//! other request on the same connection is read later, by whichever session
//! kind took over.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use crate::ca::Ca;
use crate::config::ProxyConfig;
use crate::rules::RuleEngine;
use crate::traffic::TrafficBus;

use super::io::split_host_port;
use super::wire;
use super::{httpproxy, mitm};

pub struct Dispatcher {
	ca: Arc<Ca>,
	rules: Arc<RuleEngine>,
	traffic: Arc<TrafficBus>,
	config: ProxyConfig,
}

impl Dispatcher {
	pub fn new(ca: Arc<Ca>, rules: Arc<RuleEngine>, traffic: Arc<TrafficBus>, config: ProxyConfig) -> Self {
		Self { ca, rules, traffic, config }
	}

	/// Handle one accepted connection end to end. Never panics; any failure
	/// to even parse the first request line just closes the socket, with no
	/// traffic entry published (nothing resembling an HTTP exchange happened
	/// yet).
	pub async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
		let mut stream = stream;
		let (head, body) = match wire::read_request(&mut stream).await {
			Ok(req) => req,
			Err(err) => {
				debug!(%peer, error = %err, "failed to read an initial request");
				return;
			},
		};

		if head.method.eq_ignore_ascii_case("CONNECT") {
			self.handle_connect(stream, peer, head.target).await;
			return;
		}

		httpproxy::serve(
			stream,
			peer,
			(head, body),
			self.ca.clone(),
			self.rules.clone(),
			self.traffic.clone(),
			self.config.clone(),
		)
		.await;
	}

	async fn handle_connect(&self, mut stream: TcpStream, peer: SocketAddr, target: String) {
		let (host, port) = split_host_port(&target, 443);

		if let Err(err) = wire::write_response(&mut stream, 200, "Connection Established", &[], &[]).await
		{
			debug!(%peer, %host, error = %err, "failed writing CONNECT 200 response");
			return;
		}

		let server_config = match self.ca.leaf_tls_server_config(&host) {
			Ok(cfg) => cfg,
			Err(err) => {
				warn!(%peer, %host, error = %err, "failed to issue a leaf certificate");
				return;
			},
		};

		let acceptor = TlsAcceptor::from(server_config);
		let tls = match acceptor.accept(stream).await {
			Ok(tls) => tls,
			Err(err) => {
				debug!(%peer, %host, error = %err, "inbound TLS handshake failed");
				return;
			},
		};

		mitm::serve(
			tls,
			peer,
			host,
			port,
			self.ca.clone(),
			self.rules.clone(),
			self.traffic.clone(),
			self.config.clone(),
		)
		.await;
	}
}
