//! `RequestMatcher` — spec §3 DATA MODEL.
//!
//! Matching is a pure function of `(requestMethod, requestURL) -> bool`.
//! Grounded in the teacher's `http::csrf::StringMatcher` (`Exact` / `Prefix` /
//! `Suffix` / `Contains` / `SafeRegex`, a malformed regex never matching
//! rather than panicking).

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchType {
	Exact,
	Contains,
	Regex,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMatcher {
	pub url_pattern: String,
	/// Absent means "any method". Stored uppercase.
	pub method: Option<String>,
	pub match_type: MatchType,
}

impl RequestMatcher {
	pub fn new(url_pattern: impl Into<String>, match_type: MatchType) -> Self {
		Self {
			url_pattern: url_pattern.into(),
			method: None,
			match_type,
		}
	}

	pub fn with_method(mut self, method: impl Into<String>) -> Self {
		self.method = Some(method.into().to_ascii_uppercase());
		self
	}

	/// `(requestMethod, requestURL) -> bool`. A regex compilation failure
	/// yields "no match", never a panic or an error (spec §3, §4.2, §7
	/// `RuleRegexInvalid`).
	pub fn matches(&self, request_method: &str, request_url: &str) -> bool {
		if let Some(method) = &self.method {
			if !method.eq_ignore_ascii_case(request_method) {
				return false;
			}
		}

		match self.match_type {
			MatchType::Exact => self.url_pattern == request_url,
			MatchType::Contains => request_url.contains(&self.url_pattern),
			MatchType::Regex => Regex::new(&self.url_pattern)
				.map(|re| re.is_match(request_url))
				.unwrap_or(false),
		}
	}
}
