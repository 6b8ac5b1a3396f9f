use arc_swap::{ArcSwap, ArcSwapOption};
use std::sync::Arc;

/// A copy-on-write handle that is always present.
pub type Atomic<T> = Arc<ArcSwap<T>>;

/// A copy-on-write handle that may be empty.
pub type AtomicOption<T> = Arc<ArcSwapOption<T>>;
