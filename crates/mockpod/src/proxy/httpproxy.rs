//! HTTP Proxy Path: plaintext `http://` requests sent directly to the proxy
//! in absolute-form (`GET http://host/path HTTP/1.1`), the way a browser or
//! `curl -x` issues them when it has not been told to tunnel. No TLS is ever
//! involved on the client-facing side of this path.
//!
//! A matched rule always synthesizes a response without contacting the real
//! origin; an unmatched request is forwarded and the real response relayed
//! back unmodified. Unlike the MITM Session, there is no "offline fallback"
//! here — an unreachable origin simply produces a normal upstream-connect
//! failure response, since the client already knows it's talking to a proxy.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::ca::Ca;
use crate::config::ProxyConfig;
use crate::headers::HeaderListExt;
use crate::rules::RuleEngine;
use crate::traffic::{RequestRecord, ResponseRecord, TrafficBus, TrafficEntry};

use super::compose::{self, Composed, CompositionStrategy};
use super::io as upstream_io;
use super::wire::{self, RequestHead, ResponseHead};
use crate::error::ProxyError;

/// Drive an entire plaintext HTTP-proxy connection: `first` is the request
/// the Connection Dispatcher already parsed off the wire to decide this
/// wasn't a CONNECT; subsequent pipelined/keep-alive requests are read from
/// the same socket until the client closes it or asks for `Connection: close`.
pub async fn serve(
	mut stream: TcpStream,
	peer: SocketAddr,
	first: (RequestHead, Bytes),
	ca: Arc<Ca>,
	rules: Arc<RuleEngine>,
	traffic: Arc<TrafficBus>,
	config: ProxyConfig,
) {
	let mut pending = Some(first);
	loop {
		let (head, body) = match pending.take() {
			Some(req) => req,
			None => match wire::read_request(&mut stream).await {
				Ok(req) => req,
				Err(_) => return,
			},
		};

		let keep_alive = !head
			.headers
			.find("connection")
			.is_some_and(|h| h.value.eq_ignore_ascii_case("close"));

		if handle_one(&mut stream, peer, head, body, &ca, &rules, &traffic, &config)
			.await
			.is_err() || !keep_alive
		{
			return;
		}
	}
}

async fn handle_one(
	stream: &mut TcpStream,
	peer: SocketAddr,
	head: RequestHead,
	body: Bytes,
	ca: &Arc<Ca>,
	rules: &Arc<RuleEngine>,
	traffic: &Arc<TrafficBus>,
	config: &ProxyConfig,
) -> Result<(), ()> {
	let started = Instant::now();

	let Ok(parsed) = ParsedTarget::parse(&head.target) else {
		warn!(%peer, target = %head.target, "malformed absolute-form request target");
		return Err(());
	};

	if parsed.host == crate::config::CERT_HOST || parsed.path == crate::config::CERT_PATH {
		let composed = cert_download_response(ca);
		return write_and_record(stream, &head, &parsed, body, composed, started, traffic).await;
	}

	let record = RequestRecord {
		method: head.method.clone(),
		url: head.target.clone(),
		host: parsed.host.clone(),
		path: parsed.path.clone(),
		scheme: "http".into(),
		headers: head.headers.clone(),
		body: Some(body.clone()),
	};

	if let Some(rule) = rules.match_request(&head.method, &head.target) {
		let composed = compose::synthesize(&rule).await;
		return finish(stream, record, composed, started, traffic).await;
	}

	match forward(&head, &body, &parsed, config).await {
		Ok((resp_head, resp_body)) => {
			let composed = compose::from_upstream(resp_head, resp_body);
			finish(stream, record, composed, started, traffic).await
		},
		Err(err) => {
			debug!(%peer, host = %parsed.host, error = %err, "upstream request failed");
			let composed = error_response(&err);
			finish(stream, record, composed, started, traffic).await
		},
	}
}

async fn forward(
	head: &RequestHead,
	body: &Bytes,
	target: &ParsedTarget,
	config: &ProxyConfig,
) -> Result<(ResponseHead, Bytes), ProxyError> {
	let mut upstream =
		upstream_io::connect_plain(&target.host, target.port, config.upstream_connect_timeout)
			.await?;

	let mut forwarded_headers = head.headers.clone();
	forwarded_headers.strip("proxy-connection");
	forwarded_headers.strip("accept-encoding");
	forwarded_headers.set("host", &target.host);

	wire::write_request(
		&mut upstream,
		&head.method,
		&target.origin_form(),
		&forwarded_headers,
		body,
	)
	.await?;

	wire::read_response(&mut upstream).await
}

async fn write_and_record(
	stream: &mut TcpStream,
	head: &RequestHead,
	parsed: &ParsedTarget,
	body: Bytes,
	composed: Composed,
	started: Instant,
	traffic: &Arc<TrafficBus>,
) -> Result<(), ()> {
	let record = RequestRecord {
		method: head.method.clone(),
		url: format!("http://{}{}", parsed.host, parsed.path),
		host: parsed.host.clone(),
		path: parsed.path.clone(),
		scheme: "http".into(),
		headers: head.headers.clone(),
		body: Some(body),
	};
	finish(stream, record, composed, started, traffic).await
}

async fn finish(
	stream: &mut TcpStream,
	request: RequestRecord,
	composed: Composed,
	started: Instant,
	traffic: &Arc<TrafficBus>,
) -> Result<(), ()> {
	let write_result = wire::write_response(
		stream,
		composed.head.status,
		&composed.head.reason,
		&composed.head.headers,
		&composed.body,
	)
	.await;

	let entry = TrafficEntry::provisional(request).complete(
		ResponseRecord {
			status: Some(composed.head.status),
			headers: Some(composed.head.headers),
			body: Some(composed.body),
		},
		started.elapsed(),
	);
	traffic.publish(entry);

	write_result.map_err(|_| ())
}

fn error_response(err: &ProxyError) -> Composed {
	compose::upstream_unreachable(&err.to_string())
}

fn cert_download_response(ca: &Arc<Ca>) -> Composed {
	let der = ca.root_ca_der();
	let mut headers = Vec::new();
	headers.set("content-type", "application/x-x509-ca-cert");
	headers.set(
		"content-disposition",
		r#"attachment; filename="MockpodCA.der""#,
	);
	headers.set("content-length", der.len().to_string());
	Composed {
		head: ResponseHead {
			status: 200,
			reason: wire::reason_phrase(200).to_string(),
			headers,
		},
		body: Bytes::from(der),
		strategy: CompositionStrategy::PassThrough,
	}
}

struct ParsedTarget {
	host: String,
	port: u16,
	path: String,
}

impl ParsedTarget {
	/// Parse an absolute-form request target (`http://host[:port]/path`).
	fn parse(target: &str) -> Result<Self, ProxyError> {
		let rest = target
			.strip_prefix("http://")
			.ok_or(ProxyError::MalformedUri)?;
		let (authority, path) = match rest.find('/') {
			Some(idx) => (&rest[..idx], &rest[idx..]),
			None => (rest, "/"),
		};
		if authority.is_empty() {
			return Err(ProxyError::MalformedUri);
		}
		let (host, port) = upstream_io::split_host_port(authority, 80);
		Ok(Self {
			host,
			port,
			path: if path.is_empty() { "/".to_string() } else { path.to_string() },
		})
	}

	fn origin_form(&self) -> String {
		self.path.clone()
	}
}
