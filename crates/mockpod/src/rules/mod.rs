//! Rule Engine — spec §4.2.
//!
//! A single reader-writer protected slot (`ArcSwap`, mirroring the teacher's
//! own heavy use of `arc_swap` for its route/config snapshots): readers get a
//! self-consistent snapshot of the whole list with no locking on the hot
//! path, writers atomically swap the entire list (copy-on-write, per spec §3
//! "Ownership/lifecycle").

pub mod matcher;

use chrono::{DateTime, Utc};
use mockpod_core::arc::Atomic;
use uuid::Uuid;

pub use matcher::{MatchType, RequestMatcher};

use crate::headers::HTTPHeader;

/// spec §3 DATA MODEL — `MockResponse`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockResponse {
	pub status_code: u16,
	pub headers: Vec<HTTPHeader>,
	pub body: String,
	/// Non-negative, fractional seconds.
	pub delay: Option<f64>,
}

impl Default for MockResponse {
	fn default() -> Self {
		Self {
			status_code: 200,
			headers: Vec::new(),
			body: String::new(),
			delay: None,
		}
	}
}

impl MockResponse {
	pub fn delay_duration(&self) -> Option<std::time::Duration> {
		self
			.delay
			.filter(|d| *d > 0.0)
			.map(std::time::Duration::from_secs_f64)
	}
}

/// spec §3 DATA MODEL — `MockRule`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockRule {
	pub id: Uuid,
	pub name: String,
	pub enabled: bool,
	pub matcher: RequestMatcher,
	pub mock_response: MockResponse,
	pub created_at: DateTime<Utc>,
	pub updated_at: Option<DateTime<Utc>>,
}

impl MockRule {
	pub fn new(name: impl Into<String>, matcher: RequestMatcher, mock_response: MockResponse) -> Self {
		Self {
			id: Uuid::new_v4(),
			name: name.into(),
			enabled: true,
			matcher,
			mock_response,
			created_at: Utc::now(),
			updated_at: None,
		}
	}
}

/// spec §3 DATA MODEL — `RuleSet`, as exported/imported per spec §6.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
	pub id: Uuid,
	pub name: String,
	pub rules: Vec<MockRule>,
	pub is_active: bool,
	pub created_at: DateTime<Utc>,
	pub description: Option<String>,
}

impl RuleSet {
	/// Per spec §6: "On import, `id` is regenerated and `isActive` is forced
	/// to false."
	pub fn import(mut self) -> Self {
		self.id = Uuid::new_v4();
		self.is_active = false;
		self
	}
}

/// The flat, ordered list the engine actually evaluates — spec §3 "Active-rule
/// view". Producing this view (flattening standalone + set-scoped rules,
/// honoring each `RuleSet::is_active`) is the caller's job; the engine only
/// ever sees the resulting `Vec<MockRule>`.
#[derive(Default)]
pub struct RuleEngine {
	active: Atomic<Vec<MockRule>>,
}

impl RuleEngine {
	pub fn new() -> Self {
		Self {
			active: std::sync::Arc::new(arc_swap::ArcSwap::from_pointee(Vec::new())),
		}
	}

	/// Atomically swap the active set (spec §4.2).
	pub fn replace(&self, new_rules: Vec<MockRule>) {
		self.active.store(std::sync::Arc::new(new_rules));
	}

	/// First enabled rule (by list order) whose matcher matches, or `None`.
	/// The snapshot loaded here cannot change mid-evaluation: `ArcSwap::load`
	/// hands back a guard over one `Arc` allocation, so a concurrent
	/// `replace` can never interleave within a single `match` call (spec
	/// §4.2 "mid-evaluation swaps must not interleave").
	pub fn match_request(&self, method: &str, url: &str) -> Option<MockRule> {
		let snapshot = self.active.load();
		snapshot
			.iter()
			.find(|rule| rule.enabled && rule.matcher.matches(method, url))
			.cloned()
	}

	pub fn len(&self) -> usize {
		self.active.load().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn rule(name: &str, pattern: &str, status: u16) -> MockRule {
		MockRule::new(
			name,
			RequestMatcher::new(pattern, MatchType::Exact),
			MockResponse {
				status_code: status,
				..Default::default()
			},
		)
	}

	#[test]
	fn match_returns_first_matching_rule_in_list_order() {
		let engine = RuleEngine::new();
		engine.replace(vec![
			rule("first", "http://a.test/x", 200),
			rule("second", "http://a.test/x", 500),
		]);
		let matched = engine.match_request("GET", "http://a.test/x").unwrap();
		assert_eq!(matched.name, "first");
	}

	#[test]
	fn disabling_a_rule_takes_effect_on_next_match() {
		let engine = RuleEngine::new();
		let mut r = rule("only", "http://a.test/x", 200);
		engine.replace(vec![r.clone()]);
		assert!(engine.match_request("GET", "http://a.test/x").is_some());

		r.enabled = false;
		engine.replace(vec![r]);
		assert!(engine.match_request("GET", "http://a.test/x").is_none());
	}

	#[test]
	fn no_match_when_empty() {
		let engine = RuleEngine::new();
		assert!(engine.match_request("GET", "http://a.test/x").is_none());
	}

	#[test]
	fn import_regenerates_id_and_forces_inactive() {
		let set = RuleSet {
			id: Uuid::new_v4(),
			name: "set".into(),
			rules: vec![],
			is_active: true,
			created_at: Utc::now(),
			description: None,
		};
		let original_id = set.id;
		let imported = set.import();
		assert_ne!(imported.id, original_id);
		assert!(!imported.is_active);
	}
}
