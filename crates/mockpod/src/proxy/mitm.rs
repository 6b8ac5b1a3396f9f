//! MITM Session: runs after the Connection Dispatcher has completed a
//! `CONNECT` tunnel and terminated TLS using a leaf certificate minted by
//! [`Ca`] for the tunneled host. From here on the client believes it holds a
//! normal, trusted connection to the real origin; every request arrives in
//! origin-form (`GET /path HTTP/1.1`, `Host: <host>`) rather than the
//! absolute-form the HTTP Proxy Path sees.
//!
//! Unlike the HTTP Proxy Path, an unmatched request whose real origin can't
//! be reached degrades to a synthetic placeholder rather than tearing the
//! TLS session down — the client already trusts this connection and a sudden
//! close reads as a network fault, not a clean "no mock, no site" answer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tracing::debug;

use crate::ca::Ca;
use crate::config::{CERT_HOST, CERT_PATH, ProxyConfig};
use crate::headers::HeaderListExt;
use crate::rules::RuleEngine;
use crate::traffic::{RequestRecord, ResponseRecord, TrafficBus, TrafficEntry};

use super::compose::{self, Composed, CompositionStrategy};
use super::io as upstream_io;
use super::wire::{self, RequestHead, ResponseHead};
use crate::error::ProxyError;

/// Drive a whole decrypted MITM connection: one `host` for its lifetime
/// (the one named in the `CONNECT` request), a loop of origin-form requests
/// until the client disconnects, asks for `Connection: close`, or the
/// connection sits idle past `config.mitm_idle_timeout`.
pub async fn serve(
	mut tls: TlsStream<TcpStream>,
	peer: SocketAddr,
	host: String,
	port: u16,
	ca: Arc<Ca>,
	rules: Arc<RuleEngine>,
	traffic: Arc<TrafficBus>,
	config: ProxyConfig,
) {
	loop {
		let next = tokio::time::timeout(config.mitm_idle_timeout, wire::read_request(&mut tls)).await;
		let (head, body) = match next {
			Ok(Ok(req)) => req,
			Ok(Err(_)) | Err(_) => return,
		};

		let client_wants_close = head
			.headers
			.find("connection")
			.is_some_and(|h| h.value.eq_ignore_ascii_case("close"));

		match handle_one(&mut tls, peer, &host, port, head, body, &ca, &rules, &traffic, &config).await {
			Ok(keep_alive) if keep_alive && !client_wants_close => continue,
			_ => return,
		}
	}
}

/// Returns `Ok(keep_alive)` on a successfully written response (`keep_alive`
/// is false only for the certificate-download route, spec §4.6.b/.h), or
/// `Err(())` if the write itself failed (in which case the session ends
/// regardless).
async fn handle_one(
	tls: &mut TlsStream<TcpStream>,
	peer: SocketAddr,
	tunnel_host: &str,
	tunnel_port: u16,
	head: RequestHead,
	body: Bytes,
	ca: &Arc<Ca>,
	rules: &Arc<RuleEngine>,
	traffic: &Arc<TrafficBus>,
	config: &ProxyConfig,
) -> Result<bool, ()> {
	let started = Instant::now();
	let host = head
		.headers
		.find("host")
		.map(|h| h.value.clone())
		.unwrap_or_else(|| tunnel_host.to_string());
	let path = origin_path(&head.target);
	let url = format!("https://{host}{path}");

	if tunnel_host == CERT_HOST || path == CERT_PATH {
		let composed = cert_download_response(ca);
		let record = request_record(&head, &url, &host, &path, body);
		finish(tls, record, composed, started, traffic).await?;
		return Ok(false);
	}

	let record = request_record(&head, &url, &host, &path, body.clone());
	let rule = rules.match_request(&head.method, &url);

	let composed = match forward(&head, &body, tunnel_host, tunnel_port, config).await {
		Ok((resp_head, resp_body)) => match rule {
			Some(rule) => compose::overlay(&rule, resp_head, resp_body).await,
			None => compose::from_upstream(resp_head, resp_body),
		},
		Err(err) => {
			debug!(%peer, host = %tunnel_host, error = %err, "MITM upstream request failed");
			match rule {
				Some(rule) => compose::offline_synth(&rule).await,
				None => compose::upstream_unreachable(&err.to_string()),
			}
		},
	};

	finish(tls, record, composed, started, traffic).await?;
	Ok(true)
}

fn request_record(
	head: &RequestHead,
	url: &str,
	host: &str,
	path: &str,
	body: Bytes,
) -> RequestRecord {
	RequestRecord {
		method: head.method.clone(),
		url: url.to_string(),
		host: host.to_string(),
		path: path.to_string(),
		scheme: "https".into(),
		headers: head.headers.clone(),
		body: Some(body),
	}
}

async fn forward(
	head: &RequestHead,
	body: &Bytes,
	host: &str,
	port: u16,
	config: &ProxyConfig,
) -> Result<(ResponseHead, Bytes), ProxyError> {
	let mut upstream = upstream_io::connect_tls(
		host,
		port,
		config.upstream_connect_timeout,
		config.upstream_handshake_timeout,
	)
	.await?;

	let mut forwarded_headers = head.headers.clone();
	forwarded_headers.strip("proxy-connection");
	forwarded_headers.strip("accept-encoding");

	wire::write_request(&mut upstream, &head.method, &head.target, &forwarded_headers, body).await?;

	wire::read_response(&mut upstream).await
}

/// Write the composed response and publish its traffic entry. Defaults
/// `Connection` to `keep-alive` (spec §4.6.h); `cert_download_response`
/// already set it to `close`, so that default never overrides it.
async fn finish(
	tls: &mut TlsStream<TcpStream>,
	request: RequestRecord,
	mut composed: Composed,
	started: Instant,
	traffic: &Arc<TrafficBus>,
) -> Result<(), ()> {
	if composed.head.headers.find("connection").is_none() {
		composed.head.headers.set("connection", "keep-alive");
	}

	let write_result = wire::write_response(
		tls,
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

fn cert_download_response(ca: &Arc<Ca>) -> Composed {
	let der = ca.root_ca_der();
	let mut headers = Vec::new();
	headers.set("content-type", "application/x-x509-ca-cert");
	headers.set(
		"content-disposition",
		r#"attachment; filename="MockpodCA.der""#,
	);
	headers.set("connection", "close");
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

fn origin_path(target: &str) -> String {
	if target.starts_with('/') {
		target.to_string()
	} else {
		format!("/{target}")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn origin_path_normalizes_missing_leading_slash() {
		assert_eq!(origin_path("a/b"), "/a/b");
		assert_eq!(origin_path("/a/b"), "/a/b");
	}
}
