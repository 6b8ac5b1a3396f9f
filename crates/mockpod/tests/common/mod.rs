//! Shared scaffolding for the scenario tests in spec §8: a loopback stub
//! "upstream" server, a `ProxyCore` started against a throwaway CA storage
//! directory, and a `TrafficObserver` a test can poll for published entries.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use mockpod::ProxyCore;
use mockpod::config::ProxyConfig;
use mockpod::traffic::{TrafficEntry, TrafficObserver};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Collects every entry a `ProxyCore` publishes, for assertions.
pub struct RecordingObserver {
	entries: Mutex<Vec<Arc<TrafficEntry>>>,
}

impl RecordingObserver {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			entries: Mutex::new(Vec::new()),
		})
	}

	pub fn snapshot(&self) -> Vec<Arc<TrafficEntry>> {
		self.entries.lock().unwrap().clone()
	}

	/// Poll until at least `count` entries have been published, or give up
	/// after a couple of seconds (publication races the response write, but
	/// only by the time it takes to deliver one queued item).
	pub async fn wait_for(&self, count: usize) -> Vec<Arc<TrafficEntry>> {
		for _ in 0..100 {
			let snapshot = self.snapshot();
			if snapshot.len() >= count {
				return snapshot;
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
		self.snapshot()
	}
}

impl TrafficObserver for RecordingObserver {
	fn on_entry(&self, entry: Arc<TrafficEntry>) {
		self.entries.lock().unwrap().push(entry);
	}
}

/// Start a `ProxyCore` bound to an ephemeral loopback port, with its CA
/// material under a throwaway directory that is cleaned up when the
/// returned `TempDir` is dropped.
pub async fn start_proxy() -> (Arc<ProxyCore>, Arc<RecordingObserver>, tempfile::TempDir) {
	let storage = tempfile::tempdir().unwrap();
	let config = ProxyConfig {
		listen_addr: "127.0.0.1:0".parse().unwrap(),
		ca_storage_dir: storage.path().to_path_buf(),
		..ProxyConfig::default()
	};
	let observer = RecordingObserver::new();
	let core = ProxyCore::start(config, vec![observer.clone() as Arc<dyn TrafficObserver>])
		.await
		.expect("proxy core should start against a throwaway CA dir");
	(core, observer, storage)
}

/// Spawn a one-shot-per-connection plaintext stub server that replies with
/// each of `responses`, in order, to successive client connections (the
/// HTTP Proxy Path opens a fresh upstream connection per request — spec §9
/// "no upstream pooling").
pub async fn spawn_stub_http_server(responses: Vec<Vec<u8>>) -> SocketAddr {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		for response in responses {
			let Ok((mut stream, _)) = listener.accept().await else {
				break;
			};
			let mut buf = [0u8; 4096];
			// Best-effort: read whatever the client already sent so far,
			// just enough to let the request head clear the socket buffer.
			let _ = stream.read(&mut buf).await;
			let _ = stream.write_all(&response).await;
			let _ = stream.flush().await;
		}
	});
	addr
}

/// Send `request` to `addr` over a plain TCP connection and read back
/// everything the peer writes before closing.
pub async fn send_and_read(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
	let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
	stream.write_all(request).await.unwrap();
	stream.flush().await.unwrap();
	let mut response = Vec::new();
	let _ = stream.read_to_end(&mut response).await;
	response
}

/// Reserve a loopback port, then immediately free it: good enough to stand
/// in for "a host:port nothing is listening on" in the offline-fallback
/// scenarios, without hard-coding a port that might collide with something
/// else on the test machine.
pub async fn unused_loopback_port() -> u16 {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	listener.local_addr().unwrap().port()
}

/// Establish a CONNECT tunnel to `target` (e.g. `"mockpod.local:443"`) through
/// the proxy at `proxy_addr`, then complete a client-side TLS handshake over
/// it trusting `ca_der` as the sole root — exactly what a device that has
/// installed the mockpod root CA would do.
pub async fn connect_mitm_tunnel(
	proxy_addr: SocketAddr,
	target: &str,
	sni: &str,
	ca_der: &[u8],
) -> tokio_rustls::client::TlsStream<tokio::net::TcpStream> {
	let mut stream = tokio::net::TcpStream::connect(proxy_addr).await.unwrap();
	let connect_req = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
	stream.write_all(connect_req.as_bytes()).await.unwrap();
	stream.flush().await.unwrap();

	let mut buf = [0u8; 256];
	let n = stream.read(&mut buf).await.unwrap();
	let head = String::from_utf8_lossy(&buf[..n]);
	assert!(
		head.starts_with("HTTP/1.1 200"),
		"expected 200 Connection Established, got: {head}"
	);

	let client_config = client_config_trusting(ca_der);
	let connector = tokio_rustls::TlsConnector::from(client_config);
	let server_name = rustls_pki_types::ServerName::try_from(sni.to_string()).unwrap();
	connector.connect(server_name, stream).await.unwrap()
}

/// Read exactly one HTTP/1.1 response off `stream` without consuming bytes
/// belonging to whatever the peer sends next on the same (possibly
/// kept-alive) connection.
pub async fn read_one_response(
	stream: &mut (impl tokio::io::AsyncRead + Unpin),
) -> (mockpod::proxy::wire::ResponseHead, Vec<u8>) {
	let (head, body) = mockpod::proxy::wire::read_response(stream)
		.await
		.expect("a well-formed response");
	(head, body.to_vec())
}

/// Split a raw HTTP/1.1 message into its head (as text, for easy header
/// assertions) and its body (kept as bytes, since cert downloads are binary).
pub fn split_head_body(raw: &[u8]) -> (String, Vec<u8>) {
	let marker = b"\r\n\r\n";
	let pos = raw
		.windows(marker.len())
		.position(|w| w == marker)
		.expect("response should contain a head/body separator");
	let head = String::from_utf8_lossy(&raw[..pos]).into_owned();
	let body = raw[pos + marker.len()..].to_vec();
	(head, body)
}

fn client_config_trusting(ca_der: &[u8]) -> Arc<rustls::ClientConfig> {
	let mut roots = rustls::RootCertStore::empty();
	roots
		.add(rustls_pki_types::CertificateDer::from(ca_der.to_vec()))
		.unwrap();
	Arc::new(
		rustls::ClientConfig::builder()
			.with_root_certificates(roots)
			.with_no_client_auth(),
	)
}
