//! `HTTPHeader` — spec §3 DATA MODEL.
//!
//! A `(name, value)` pair. Comparisons are case-insensitive by name; wire
//! order is preserved by keeping headers in a `Vec` rather than a map.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HTTPHeader {
	pub name: String,
	pub value: String,
}

impl HTTPHeader {
	pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			value: value.into(),
		}
	}

	pub fn name_eq(&self, other: &str) -> bool {
		self.name.eq_ignore_ascii_case(other)
	}
}

impl fmt::Display for HTTPHeader {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.name, self.value)
	}
}

/// An ordered header list with the case-insensitive lookup/strip helpers the
/// proxy paths and the composer repeatedly need.
pub trait HeaderListExt {
	fn find(&self, name: &str) -> Option<&HTTPHeader>;
	fn strip(&mut self, name: &str);
	fn set(&mut self, name: &str, value: impl Into<String>);
}

impl HeaderListExt for Vec<HTTPHeader> {
	fn find(&self, name: &str) -> Option<&HTTPHeader> {
		self.iter().find(|h| h.name_eq(name))
	}

	fn strip(&mut self, name: &str) {
		self.retain(|h| !h.name_eq(name));
	}

	fn set(&mut self, name: &str, value: impl Into<String>) {
		let value = value.into();
		if let Some(existing) = self.iter_mut().find(|h| h.name_eq(name)) {
			existing.value = value;
		} else {
			self.push(HTTPHeader::new(name, value));
		}
	}
}

/// Headers that a compliant composer always strips before recomposing a
/// response, per spec §4.7: "Header filtering before composition always
/// strips: Transfer-Encoding, Content-Encoding, Content-Length, Connection."
pub const HOP_BY_HOP_RESPONSE_HEADERS: &[&str] =
	&["transfer-encoding", "content-encoding", "content-length", "connection"];

pub fn strip_hop_by_hop(headers: &mut Vec<HTTPHeader>) {
	for name in HOP_BY_HOP_RESPONSE_HEADERS {
		headers.strip(name);
	}
}
