//! Hand-rolled RFC 7230 HTTP/1.1 framing over a raw (plaintext or
//! TLS-terminated) byte stream.
//!
//! Spec §4.4-§4.6 describe the dispatcher and sessions in terms of raw wire
//! operations ("read into a growing buffer until `\r\n` appears", "Write
//! literal `HTTP/1.1 200 Connection Established\r\n\r\n`", "Write the
//! composed response as a raw HTTP/1.1 message") rather than in terms of a
//! request/response framework, so this module parses with `httparse`
//! (the same crate the `oisp-sensor` member of this retrieval pack depends on
//! for exactly this purpose) and serializes by hand, instead of reaching for
//! a higher-level HTTP/1 client/server implementation.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProxyError;
use crate::headers::HTTPHeader;

/// Request line ≥ 8 KiB without a delimiter ⇒ close (spec §4.4).
pub const MAX_HEAD_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct RequestHead {
	pub method: String,
	/// The raw request-target as it appeared on the wire (absolute-form URI
	/// for HTTP-proxy requests, `host:port` for CONNECT, origin-form path
	/// once re-originated to a MITM upstream).
	pub target: String,
	pub headers: Vec<HTTPHeader>,
}

#[derive(Debug, Clone)]
pub struct ResponseHead {
	pub status: u16,
	pub reason: String,
	pub headers: Vec<HTTPHeader>,
}

/// Read bytes until the end of the header block (`\r\n\r\n`) is seen, capped
/// at `MAX_HEAD_SIZE`. Returns the raw header-block bytes and any extra bytes
/// already read past it (the start of the body, if the client/server wrote
/// head and body in the same flight).
async fn read_head_block(
	stream: &mut (impl AsyncRead + Unpin),
) -> Result<(Vec<u8>, Vec<u8>), ProxyError> {
	let mut buf = Vec::with_capacity(512);
	let mut chunk = [0u8; 512];
	loop {
		if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
			let body_start = pos + 4;
			let leftover = buf.split_off(body_start);
			return Ok((buf, leftover));
		}
		if buf.len() >= MAX_HEAD_SIZE {
			return Err(ProxyError::RequestLineTooLong);
		}
		let n = stream.read(&mut chunk).await?;
		if n == 0 {
			return Err(ProxyError::ClientProtocolError);
		}
		buf.extend_from_slice(&chunk[..n]);
	}
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
	haystack
		.windows(needle.len())
		.position(|window| window == needle)
}

/// Parse just the request line (method, target, version), per spec §4.4.
/// Used by the Connection Dispatcher before it even knows whether headers
/// are worth reading further.
pub fn parse_request_line(line: &str) -> Result<(String, String), ProxyError> {
	let mut parts = line.trim_end_matches(['\r', '\n']).splitn(3, ' ');
	let method = parts.next().filter(|s| !s.is_empty());
	let target = parts.next().filter(|s| !s.is_empty());
	let version = parts.next().filter(|s| !s.is_empty());
	match (method, target, version) {
		(Some(m), Some(t), Some(_)) => Ok((m.to_string(), t.to_string())),
		_ => Err(ProxyError::ClientProtocolError),
	}
}

/// Read a full request head (request line + headers) and any body, honoring
/// `Content-Length` / `Transfer-Encoding: chunked` (spec §4.4-§4.5: "buffer
/// then forward").
pub async fn read_request(
	stream: &mut (impl AsyncRead + Unpin),
) -> Result<(RequestHead, Bytes), ProxyError> {
	let (head_bytes, leftover) = read_head_block(stream).await?;
	let mut header_storage = [httparse::EMPTY_HEADER; 64];
	let mut req = httparse::Request::new(&mut header_storage);
	let status = req
		.parse(&head_bytes)
		.map_err(|_| ProxyError::ClientProtocolError)?;
	if status.is_partial() {
		return Err(ProxyError::ClientProtocolError);
	}
	let method = req
		.method
		.ok_or(ProxyError::ClientProtocolError)?
		.to_string();
	let target = req.path.ok_or(ProxyError::ClientProtocolError)?.to_string();
	let headers = to_header_list(req.headers);

	let body = read_body(stream, &headers, leftover).await?;
	Ok((RequestHead { method, target, headers }, body))
}

/// Read a full response head and body the same way, for upstream responses
/// (spec §4.5 step 5, §4.6 step f: "collect the upstream response fully").
pub async fn read_response(
	stream: &mut (impl AsyncRead + Unpin),
) -> Result<(ResponseHead, Bytes), ProxyError> {
	let (head_bytes, leftover) = read_head_block(stream).await?;
	let mut header_storage = [httparse::EMPTY_HEADER; 64];
	let mut resp = httparse::Response::new(&mut header_storage);
	let status_parse = resp
		.parse(&head_bytes)
		.map_err(|e| ProxyError::UpstreamProtocolError(e.to_string()))?;
	if status_parse.is_partial() {
		return Err(ProxyError::UpstreamProtocolError(
			"incomplete response head".into(),
		));
	}
	let status = resp
		.code
		.ok_or_else(|| ProxyError::UpstreamProtocolError("missing status code".into()))?;
	let reason = resp.reason.unwrap_or("").to_string();
	let headers = to_header_list(resp.headers);

	let body = read_body(stream, &headers, leftover).await?;
	Ok((ResponseHead { status, reason, headers }, body))
}

fn to_header_list(raw: &[httparse::Header<'_>]) -> Vec<HTTPHeader> {
	raw
		.iter()
		.map(|h| HTTPHeader::new(h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
		.collect()
}

async fn read_body(
	stream: &mut (impl AsyncRead + Unpin),
	headers: &[HTTPHeader],
	leftover: Vec<u8>,
) -> Result<Bytes, ProxyError> {
	let chunked = headers
		.iter()
		.find(|h| h.name_eq("transfer-encoding"))
		.is_some_and(|h| h.value.to_ascii_lowercase().contains("chunked"));

	if chunked {
		return read_chunked_body(stream, leftover).await;
	}

	let content_length = headers
		.iter()
		.find(|h| h.name_eq("content-length"))
		.and_then(|h| h.value.trim().parse::<usize>().ok());

	let Some(len) = content_length else {
		return Ok(Bytes::from(leftover));
	};

	let mut body = leftover;
	if body.len() >= len {
		body.truncate(len);
		return Ok(Bytes::from(body));
	}
	body.reserve(len - body.len());
	let mut remaining = len - body.len();
	let mut chunk = [0u8; 4096];
	while remaining > 0 {
		let to_read = remaining.min(chunk.len());
		let n = stream.read(&mut chunk[..to_read]).await?;
		if n == 0 {
			return Err(ProxyError::ClientProtocolError);
		}
		body.extend_from_slice(&chunk[..n]);
		remaining -= n;
	}
	Ok(Bytes::from(body))
}

async fn read_chunked_body(
	stream: &mut (impl AsyncRead + Unpin),
	mut leftover: Vec<u8>,
) -> Result<Bytes, ProxyError> {
	let mut body = Vec::new();
	loop {
		let size_line = read_line_from(stream, &mut leftover).await?;
		let size_str = size_line.split(';').next().unwrap_or("").trim();
		let size = usize::from_str_radix(size_str, 16)
			.map_err(|_| ProxyError::UpstreamProtocolError("bad chunk size".into()))?;
		if size == 0 {
			// Trailers (if any) followed by the terminating blank line.
			loop {
				let trailer = read_line_from(stream, &mut leftover).await?;
				if trailer.is_empty() {
					break;
				}
			}
			break;
		}
		let chunk = read_exact_from(stream, &mut leftover, size).await?;
		body.extend_from_slice(&chunk);
		// Consume the trailing CRLF after the chunk data.
		let crlf = read_exact_from(stream, &mut leftover, 2).await?;
		if crlf != b"\r\n" {
			return Err(ProxyError::UpstreamProtocolError(
				"malformed chunk terminator".into(),
			));
		}
	}
	Ok(Bytes::from(body))
}

async fn read_line_from(
	stream: &mut (impl AsyncRead + Unpin),
	leftover: &mut Vec<u8>,
) -> Result<String, ProxyError> {
	loop {
		if let Some(pos) = find_subslice(leftover, b"\r\n") {
			let line: Vec<u8> = leftover.drain(..pos).collect();
			leftover.drain(..2); // the CRLF itself
			return Ok(String::from_utf8_lossy(&line).into_owned());
		}
		let mut chunk = [0u8; 256];
		let n = stream.read(&mut chunk).await?;
		if n == 0 {
			return Err(ProxyError::ClientProtocolError);
		}
		leftover.extend_from_slice(&chunk[..n]);
	}
}

async fn read_exact_from(
	stream: &mut (impl AsyncRead + Unpin),
	leftover: &mut Vec<u8>,
	len: usize,
) -> Result<Vec<u8>, ProxyError> {
	while leftover.len() < len {
		let mut chunk = [0u8; 4096];
		let n = stream.read(&mut chunk).await?;
		if n == 0 {
			return Err(ProxyError::ClientProtocolError);
		}
		leftover.extend_from_slice(&chunk[..n]);
	}
	Ok(leftover.drain(..len).collect())
}

/// Serialize and write a request head + body (spec §4.5 step 4, §4.6 step d).
pub async fn write_request(
	stream: &mut (impl AsyncWrite + Unpin),
	method: &str,
	target: &str,
	headers: &[HTTPHeader],
	body: &[u8],
) -> std::io::Result<()> {
	let mut out = format!("{method} {target} HTTP/1.1\r\n");
	for h in headers {
		out.push_str(&h.name);
		out.push_str(": ");
		out.push_str(&h.value);
		out.push_str("\r\n");
	}
	out.push_str("\r\n");
	stream.write_all(out.as_bytes()).await?;
	if !body.is_empty() {
		stream.write_all(body).await?;
	}
	stream.flush().await
}

/// Serialize and write a response head + body (spec §4.5 step 7, §4.6 step h).
pub async fn write_response(
	stream: &mut (impl AsyncWrite + Unpin),
	status: u16,
	reason: &str,
	headers: &[HTTPHeader],
	body: &[u8],
) -> std::io::Result<()> {
	let mut out = format!("HTTP/1.1 {status} {reason}\r\n");
	for h in headers {
		out.push_str(&h.name);
		out.push_str(": ");
		out.push_str(&h.value);
		out.push_str("\r\n");
	}
	out.push_str("\r\n");
	stream.write_all(out.as_bytes()).await?;
	if !body.is_empty() {
		stream.write_all(body).await?;
	}
	stream.flush().await
}

pub fn reason_phrase(status: u16) -> &'static str {
	match status {
		200 => "OK",
		201 => "Created",
		204 => "No Content",
		301 => "Moved Permanently",
		302 => "Found",
		304 => "Not Modified",
		400 => "Bad Request",
		401 => "Unauthorized",
		403 => "Forbidden",
		404 => "Not Found",
		418 => "I'm a teapot",
		500 => "Internal Server Error",
		502 => "Bad Gateway",
		503 => "Service Unavailable",
		504 => "Gateway Timeout",
		_ => "",
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_request_line_accepts_well_formed_line() {
		let (method, target) = parse_request_line("GET http://a.test/x HTTP/1.1\r\n").unwrap();
		assert_eq!(method, "GET");
		assert_eq!(target, "http://a.test/x");
	}

	#[test]
	fn parse_request_line_rejects_missing_parts() {
		assert!(parse_request_line("GET\r\n").is_err());
	}

	#[tokio::test]
	async fn read_request_parses_headers_and_fixed_length_body() {
		let raw = b"POST /x HTTP/1.1\r\nHost: a.test\r\nContent-Length: 5\r\n\r\nhello";
		let mut cursor = std::io::Cursor::new(raw.to_vec());
		let (head, body) = read_request(&mut cursor).await.unwrap();
		assert_eq!(head.method, "POST");
		assert_eq!(head.target, "/x");
		assert_eq!(body.as_ref(), b"hello");
	}

	#[tokio::test]
	async fn read_response_parses_chunked_body() {
		let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
		let mut cursor = std::io::Cursor::new(raw.to_vec());
		let (head, body) = read_response(&mut cursor).await.unwrap();
		assert_eq!(head.status, 200);
		assert_eq!(body.as_ref(), b"hello");
	}
}
