//! Response Composition Policy (spec §4.7): decides what the client actually
//! receives — a rule's canned response, the real upstream's response
//! re-framed, the real upstream's response with a rule laid over it, or a
//! synthetic stand-in when the real origin can't be reached — and marks
//! which of those happened for the traffic entry.

use bytes::Bytes;
use tokio::time::sleep;

use crate::headers::{HeaderListExt, strip_hop_by_hop};
use crate::proxy::wire::{ResponseHead, reason_phrase};
use crate::rules::MockRule;

/// Name of the header mockpod adds to every response composed by Overlay or
/// Synthesize; never present on a pass-through or offline-fallback response
/// (spec §6, §8 "`X-Mockpod-Rule` is present if and only if composition
/// strategy is Overlay or Synthesize").
pub const RULE_MARKER_HEADER: &str = "X-Mockpod-Rule";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionStrategy {
	/// A matched rule, composed in the plaintext HTTP Proxy Path: the
	/// upstream is never contacted at all.
	Synthesize,
	/// A matched rule, composed inside a MITM Session on top of a real,
	/// reachable upstream response: upstream is the base, the rule replaces
	/// status/body/headers selectively.
	Overlay,
	/// No rule matched; the real upstream's response, re-framed but
	/// otherwise untouched.
	PassThrough,
	/// A matched rule, but the real origin could not be reached (MITM only;
	/// the HTTP Proxy Path never contacts upstream before checking for a
	/// rule, so it never needs this case): the mock entirely replaces the
	/// missing upstream response.
	OfflineSynth,
}

pub struct Composed {
	pub head: ResponseHead,
	pub body: Bytes,
	pub strategy: CompositionStrategy,
}

async fn wait_out_delay(rule: &MockRule) {
	if let Some(delay) = rule.mock_response.delay_duration() {
		sleep(delay).await;
	}
}

fn mark_with_rule(headers: &mut Vec<crate::headers::HTTPHeader>, rule: &MockRule) {
	headers.strip(RULE_MARKER_HEADER);
	headers.set(RULE_MARKER_HEADER, rule.name.clone());
}

/// Build a response purely from a matched rule's `MockResponse`, waiting out
/// its configured delay first if one is set. Used by the HTTP Proxy Path,
/// which never contacts upstream once a rule has matched (spec §4.5 step 2,
/// §4.7 "HTTP-proxy, rule matches: Synthesize").
pub async fn synthesize(rule: &MockRule) -> Composed {
	wait_out_delay(rule).await;

	let mut headers = rule.mock_response.headers.clone();
	mark_with_rule(&mut headers, rule);
	headers.set("content-length", rule.mock_response.body.len().to_string());

	Composed {
		head: ResponseHead {
			status: rule.mock_response.status_code,
			reason: reason_phrase(rule.mock_response.status_code).to_string(),
			headers,
		},
		body: Bytes::from(rule.mock_response.body.clone().into_bytes()),
		strategy: CompositionStrategy::Synthesize,
	}
}

/// Lay a matched rule over a real, reachable upstream response (spec §4.7
/// "MITM, rule matches, upstream reachable: Overlay"): upstream is the base —
/// status is replaced by the mock's, body is replaced by the mock's only if
/// the mock body is non-empty, and each mock header replaces-or-adds over
/// the (hop-by-hop-filtered) upstream headers. This is the one place a real
/// origin's cookies, CORS and rate-limit headers survive a rule match.
pub async fn overlay(rule: &MockRule, mut upstream_head: ResponseHead, upstream_body: Bytes) -> Composed {
	wait_out_delay(rule).await;

	strip_hop_by_hop(&mut upstream_head.headers);
	for header in &rule.mock_response.headers {
		upstream_head.headers.set(&header.name, header.value.clone());
	}
	mark_with_rule(&mut upstream_head.headers, rule);

	let body = if rule.mock_response.body.is_empty() {
		upstream_body
	} else {
		Bytes::from(rule.mock_response.body.clone().into_bytes())
	};
	upstream_head.headers.set("content-length", body.len().to_string());

	Composed {
		head: ResponseHead {
			status: rule.mock_response.status_code,
			reason: reason_phrase(rule.mock_response.status_code).to_string(),
			headers: upstream_head.headers,
		},
		body,
		strategy: CompositionStrategy::Overlay,
	}
}

/// Build a response entirely from a matched rule when the real origin could
/// not be reached (spec §4.7 "MITM, rule matches, upstream unreachable:
/// Offline-synth"): `Content-Type: application/json` is defaulted in if the
/// mock didn't set one of its own.
pub async fn offline_synth(rule: &MockRule) -> Composed {
	wait_out_delay(rule).await;

	let mut headers = rule.mock_response.headers.clone();
	if headers.find("content-type").is_none() {
		headers.set("content-type", "application/json");
	}
	mark_with_rule(&mut headers, rule);
	headers.set("content-length", rule.mock_response.body.len().to_string());

	Composed {
		head: ResponseHead {
			status: rule.mock_response.status_code,
			reason: reason_phrase(rule.mock_response.status_code).to_string(),
			headers,
		},
		body: Bytes::from(rule.mock_response.body.clone().into_bytes()),
		strategy: CompositionStrategy::OfflineSynth,
	}
}

/// Re-frame a real upstream response for the client: strip transport-layer
/// headers that described the *upstream* connection's framing (they no
/// longer apply once the body has been fully buffered) and recompute
/// `Content-Length` for the buffered body actually being sent.
pub fn from_upstream(mut head: ResponseHead, body: Bytes) -> Composed {
	strip_hop_by_hop(&mut head.headers);
	head.headers.set("content-length", body.len().to_string());
	Composed {
		head,
		body,
		strategy: CompositionStrategy::PassThrough,
	}
}

/// A 502 with a small, clearly-synthetic body, for when no rule matched and
/// the real origin could not be reached (spec §4.5 step 3, §7
/// `UpstreamConnectFailed` "else return 502 Bad Gateway").
pub fn upstream_unreachable(detail: &str) -> Composed {
	let body = format!("mockpod: upstream unreachable ({detail})\n");
	let mut headers = Vec::new();
	headers.set("content-type", "text/plain; charset=utf-8");
	headers.set("content-length", body.len().to_string());
	Composed {
		head: ResponseHead {
			status: 502,
			reason: reason_phrase(502).to_string(),
			headers,
		},
		body: Bytes::from(body),
		strategy: CompositionStrategy::PassThrough,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::headers::HTTPHeader;
	use crate::rules::MockResponse;
	use crate::rules::matcher::{MatchType, RequestMatcher};

	fn rule(status: u16, body: &str) -> MockRule {
		MockRule::new(
			"demo",
			RequestMatcher::new("http://a.test/x", MatchType::Exact),
			MockResponse {
				status_code: status,
				headers: vec![],
				body: body.to_string(),
				delay: None,
			},
		)
	}

	#[tokio::test]
	async fn synthesize_marks_the_response_with_the_rule_name() {
		let composed = synthesize(&rule(200, "hi")).await;
		let marker = composed.head.headers.find(RULE_MARKER_HEADER).unwrap();
		assert_eq!(marker.value, "demo");
		assert_eq!(composed.body.as_ref(), b"hi");
	}

	#[tokio::test]
	async fn overlay_preserves_upstream_headers_not_named_by_the_mock() {
		let mut upstream_headers = Vec::new();
		upstream_headers.set("set-cookie", "s=1");
		upstream_headers.set("content-length", "999");
		let upstream_head = ResponseHead {
			status: 200,
			reason: "OK".into(),
			headers: upstream_headers,
		};

		let composed = overlay(
			&rule(500, r#"{"mocked":true}"#),
			upstream_head,
			Bytes::from_static(br#"{"real":true}"#),
		)
		.await;

		assert_eq!(composed.head.status, 500);
		assert_eq!(composed.body.as_ref(), br#"{"mocked":true}"#);
		assert_eq!(
			composed.head.headers.find("set-cookie").unwrap().value,
			"s=1"
		);
		assert_eq!(
			composed.head.headers.find("content-length").unwrap().value,
			"15"
		);
		assert_eq!(
			composed.head.headers.find(RULE_MARKER_HEADER).unwrap().value,
			"demo"
		);
	}

	#[tokio::test]
	async fn overlay_keeps_upstream_body_when_mock_body_is_empty() {
		let upstream_head = ResponseHead {
			status: 200,
			reason: "OK".into(),
			headers: vec![],
		};
		let composed = overlay(&rule(500, ""), upstream_head, Bytes::from_static(b"real body")).await;
		assert_eq!(composed.body.as_ref(), b"real body");
	}

	#[tokio::test]
	async fn offline_synth_defaults_content_type_to_json() {
		let composed = offline_synth(&rule(500, r#"{"mocked":true}"#)).await;
		assert_eq!(
			composed.head.headers.find("content-type").unwrap().value,
			"application/json"
		);
	}

	#[tokio::test]
	async fn offline_synth_keeps_mock_content_type_if_set() {
		let mut r = rule(500, "plain");
		r.mock_response.headers = vec![HTTPHeader::new("content-type", "text/plain")];
		let composed = offline_synth(&r).await;
		assert_eq!(
			composed.head.headers.find("content-type").unwrap().value,
			"text/plain"
		);
	}

	#[test]
	fn from_upstream_strips_transport_headers_and_recomputes_length() {
		let mut head = ResponseHead {
			status: 200,
			reason: "OK".into(),
			headers: vec![],
		};
		head.headers.set("transfer-encoding", "chunked");
		head.headers.set("content-length", "999");
		let composed = from_upstream(head, Bytes::from_static(b"abcd"));
		assert!(composed.head.headers.find("transfer-encoding").is_none());
		assert_eq!(
			composed.head.headers.find("content-length").unwrap().value,
			"4"
		);
	}

	#[test]
	fn upstream_unreachable_is_a_502_without_a_rule_marker() {
		let composed = upstream_unreachable("connection refused");
		assert_eq!(composed.head.status, 502);
		assert!(composed.head.headers.find(RULE_MARKER_HEADER).is_none());
	}
}
