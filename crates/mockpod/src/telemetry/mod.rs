//! Structured logging setup (spec `SPEC_FULL.md` §B.2).
//!
//! `mockpod` itself only emits `tracing` events; `mockpod-app` is responsible
//! for installing a subscriber. `init_logging` is provided here (rather than
//! solely in the binary crate) so headless test harnesses embedding the
//! library can opt into the same formatting the CLI uses, in the same
//! `EnvFilter::try_from_default_env()`-with-fallback shape as
//! `openai-codex/cocode-rs/app/cli/src/main.rs`'s `init_tracing`.

use tracing_subscriber::EnvFilter;

/// Install a env-filtered `tracing_subscriber` formatter. Safe to call more
/// than once per process (subsequent calls are ignored).
pub fn init_logging() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(true)
		.try_init();
}
