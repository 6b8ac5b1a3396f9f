//! HTTP Proxy Path scenarios (spec §8): plaintext `http://` requests sent to
//! the proxy in absolute-form, the way `curl -x` or a browser configured with
//! a plain HTTP proxy issues them.

mod common;

use mockpod::rules::matcher::{MatchType, RequestMatcher};
use mockpod::rules::{MockResponse, MockRule};

use common::{send_and_read, spawn_stub_http_server, split_head_body, start_proxy};

#[tokio::test]
async fn pass_through_relays_the_real_upstream_response_unmodified() {
	let (core, observer, _storage) = start_proxy().await;

	let upstream_response =
		b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 11\r\n\r\n{\"ok\":true}"
			.to_vec();
	let stub = spawn_stub_http_server(vec![upstream_response]).await;

	let request = format!(
		"GET http://{stub}/items HTTP/1.1\r\nHost: example.test\r\nConnection: close\r\n\r\n"
	);
	let response = send_and_read(core.local_addr(), request.as_bytes()).await;
	let (head, body) = split_head_body(&response);

	assert!(head.starts_with("HTTP/1.1 200 OK"), "head was: {head}");
	assert!(!head.to_ascii_lowercase().contains("x-mockpod-rule"));
	assert_eq!(body, b"{\"ok\":true}");

	let entries = observer.wait_for(1).await;
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].response.status, Some(200));
}

#[tokio::test]
async fn synthesize_returns_the_mock_without_ever_contacting_upstream() {
	let (core, observer, _storage) = start_proxy().await;

	let rule = MockRule::new(
		"teapot",
		RequestMatcher::new("http://example.test/mocked", MatchType::Exact),
		MockResponse {
			status_code: 418,
			headers: vec![mockpod::headers::HTTPHeader::new("x-custom", "hi")],
			body: "teapot".to_string(),
			delay: None,
		},
	);
	core.rules().replace(vec![rule]);

	// `example.test` resolves nowhere reachable from this host; if the proxy
	// ever tried to contact it before checking for a rule match, this would
	// time out or come back as a 502 instead of the mocked 418.
	let request =
		"GET http://example.test/mocked HTTP/1.1\r\nHost: example.test\r\nConnection: close\r\n\r\n";
	let response = send_and_read(core.local_addr(), request.as_bytes()).await;
	let (head, body) = split_head_body(&response);

	assert!(head.starts_with("HTTP/1.1 418"), "head was: {head}");
	assert!(head.to_ascii_lowercase().contains("x-mockpod-rule: teapot"));
	assert_eq!(body, b"teapot");

	let entries = observer.wait_for(1).await;
	assert_eq!(entries[0].response.status, Some(418));
}

#[tokio::test]
async fn certificate_can_be_downloaded_over_plain_http() {
	let (core, _observer, _storage) = start_proxy().await;

	let request =
		"GET http://mockpod.local/mockpod/cert HTTP/1.1\r\nHost: mockpod.local\r\nConnection: close\r\n\r\n";
	let response = send_and_read(core.local_addr(), request.as_bytes()).await;
	let (head, body) = split_head_body(&response);

	assert!(head.starts_with("HTTP/1.1 200 OK"), "head was: {head}");
	assert!(
		head
			.to_ascii_lowercase()
			.contains("content-type: application/x-x509-ca-cert")
	);
	assert!(head.to_ascii_lowercase().contains("mockpodca.der"));
	assert_eq!(body, core.ca().root_ca_der());

	let (_, parsed) = x509_parser::parse_x509_certificate(&body).expect("valid DER certificate");
	assert!(parsed.tbs_certificate.subject.to_string().contains("Mockpod"));
}

#[tokio::test]
async fn a_request_with_no_matching_rule_and_an_unreachable_upstream_gets_a_bad_gateway() {
	let (core, _observer, _storage) = start_proxy().await;

	let port = common::unused_loopback_port().await;
	let request = format!(
		"GET http://127.0.0.1:{port}/nothing HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n"
	);
	let response = send_and_read(core.local_addr(), request.as_bytes()).await;
	let (head, _body) = split_head_body(&response);

	assert!(head.starts_with("HTTP/1.1 502"), "head was: {head}");
}
