//! `RuleStore` collaborator (spec §9): an external source of "active rule
//! list" snapshots. Deliberately outside the core's critical path — a caller
//! can always drive `RuleEngine::replace` directly without touching the
//! filesystem at all.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tracing::{error, warn};

use crate::rules::{MockRule, RuleSet};
use crate::rules::RuleEngine;

/// A pure source of "what the active rule list currently is". The core
/// treats this purely as an external collaborator, per spec §9 note (c).
pub trait RuleSnapshotSource: Send + Sync {
	/// The flattened, ordered active-rule view (spec §3 "Active-rule view").
	fn snapshot(&self) -> Vec<MockRule>;
}

/// Reads rule-set export files (spec §6) from a directory and exposes their
/// union as the active view: `rule.enabled AND (rule is standalone OR
/// rule.parentSet.active)`, flattened across every `*.json` file present.
pub struct JsonRuleStore {
	dir: PathBuf,
}

impl JsonRuleStore {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	fn load_one(path: &Path) -> Option<RuleSet> {
		let contents = std::fs::read_to_string(path)
			.inspect_err(|e| warn!(?path, error = %e, "failed to read rule-set file"))
			.ok()?;
		serde_json::from_str(&contents)
			.inspect_err(|e| warn!(?path, error = %e, "failed to parse rule-set file"))
			.ok()
	}

	/// Install a file-watcher that re-reads this directory on change and
	/// drives `engine.replace(...)`. Mirrors the teacher's use of
	/// `notify`/`notify-debouncer-full` for config hot-reload.
	pub fn watch(dir: impl Into<PathBuf>, engine: Arc<RuleEngine>) -> notify::Result<WatchHandle> {
		let store = JsonRuleStore::new(dir);
		engine.replace(store.snapshot());

		let engine_for_events = engine.clone();
		let store_dir = store.dir.clone();
		let mut debouncer = new_debouncer(
			Duration::from_millis(300),
			None,
			move |result: DebounceEventResult| match result {
				Ok(_events) => {
					let store = JsonRuleStore::new(store_dir.clone());
					engine_for_events.replace(store.snapshot());
				},
				Err(errors) => {
					for e in errors {
						error!(error = %e, "rule-store watch error");
					}
				},
			},
		)?;
		debouncer.watch(&store.dir, notify::RecursiveMode::NonRecursive)?;

		Ok(WatchHandle {
			_debouncer: debouncer,
		})
	}
}

impl RuleSnapshotSource for JsonRuleStore {
	fn snapshot(&self) -> Vec<MockRule> {
		let Ok(read_dir) = std::fs::read_dir(&self.dir) else {
			return Vec::new();
		};
		read_dir
			.filter_map(Result::ok)
			.map(|entry| entry.path())
			.filter(|p| p.extension().is_some_and(|ext| ext == "json"))
			.filter_map(|p| Self::load_one(&p))
			.filter(|set| set.is_active)
			.flat_map(|set| set.rules.into_iter())
			.filter(|rule| rule.enabled)
			.collect()
	}
}

/// Keeps the debouncer (and its background watch thread) alive; dropping
/// this stops the watch.
pub struct WatchHandle {
	_debouncer: notify_debouncer_full::Debouncer<
		notify::RecommendedWatcher,
		notify_debouncer_full::RecommendedCache,
	>,
}
