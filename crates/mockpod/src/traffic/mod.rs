//! Traffic capture bus — spec §4.3, §3 `TrafficEntry`.
//!
//! Fans immutable traffic records out to subscribers. Two subscriber kinds
//! exist in practice (spec §4.3): a bounded live-inspection ring of the most
//! recent `N` entries, and a recording subscriber that only accumulates while
//! recording is on. Both are built on the same drop-oldest bounded queue so
//! a slow or absent observer never blocks the publisher.

mod queue;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::headers::HTTPHeader;
use queue::DroppingQueue;

/// spec §3 — request half of a `TrafficEntry`.
#[derive(Debug, Clone)]
pub struct RequestRecord {
	pub method: String,
	/// Absolute URL: scheme, host, path+query combined.
	pub url: String,
	pub host: String,
	pub path: String,
	pub scheme: String,
	pub headers: Vec<HTTPHeader>,
	pub body: Option<bytes::Bytes>,
}

/// spec §3 — response half of a `TrafficEntry`, optional until the exchange completes.
#[derive(Debug, Clone, Default)]
pub struct ResponseRecord {
	pub status: Option<u16>,
	pub headers: Option<Vec<HTTPHeader>>,
	pub body: Option<bytes::Bytes>,
}

/// spec §3 `TrafficEntry`. Immutable once `complete == true`; a producer may
/// still mutate it in place before publication, never after (enforced by
/// `TrafficBus::publish` taking the entry by value).
#[derive(Debug, Clone)]
pub struct TrafficEntry {
	pub id: Uuid,
	pub timestamp: DateTime<Utc>,
	pub request: RequestRecord,
	pub response: ResponseRecord,
	pub duration: Option<Duration>,
	pub complete: bool,
}

impl TrafficEntry {
	/// A fresh, incomplete entry captured at the moment the request's first
	/// byte arrived (spec §4.5 step 1, §4.6 step 1).
	pub fn provisional(request: RequestRecord) -> Self {
		Self {
			id: Uuid::new_v4(),
			timestamp: Utc::now(),
			request,
			response: ResponseRecord::default(),
			duration: None,
			complete: false,
		}
	}

	/// Finalize the entry. After this call the entry must not be mutated.
	pub fn complete(mut self, response: ResponseRecord, duration: Duration) -> Self {
		self.response = response;
		self.duration = Some(duration);
		self.complete = true;
		self
	}
}

/// A callback invoked for every delivered entry. The core makes no assumption
/// about the thread it runs on beyond "serial per subscriber" (spec §5).
pub trait TrafficObserver: Send + Sync + 'static {
	fn on_entry(&self, entry: Arc<TrafficEntry>);
}

impl<F> TrafficObserver for F
where
	F: Fn(Arc<TrafficEntry>) + Send + Sync + 'static,
{
	fn on_entry(&self, entry: Arc<TrafficEntry>) {
		self(entry)
	}
}

/// Fans entries out to a bounded, drop-oldest queue drained by a single task
/// per subscriber — this is what gives "non-blocking publish" and
/// "per-subscriber FIFO" (spec §4.3) without the publisher ever awaiting a
/// slow observer.
struct Subscription {
	queue: Arc<DroppingQueue<Arc<TrafficEntry>>>,
}

impl Subscription {
	fn new(capacity: usize, observer: Arc<dyn TrafficObserver>) -> Self {
		let queue = DroppingQueue::spawn(capacity, move |entry| observer.on_entry(entry));
		Self { queue }
	}

	fn publish(&self, entry: Arc<TrafficEntry>) {
		self.queue.push(entry);
	}
}

/// The live-inspection subscriber (spec §4.3): a bounded ring of the most
/// recent `N = live_ring_capacity` entries for a UI to poll directly, kept
/// newest-first.
pub struct LiveRing {
	capacity: usize,
	entries: parking_lot::Mutex<std::collections::VecDeque<Arc<TrafficEntry>>>,
}

impl LiveRing {
	pub fn new(capacity: usize) -> Arc<Self> {
		Arc::new(Self {
			capacity,
			entries: parking_lot::Mutex::new(std::collections::VecDeque::with_capacity(capacity)),
		})
	}

	pub fn snapshot(&self) -> Vec<Arc<TrafficEntry>> {
		self.entries.lock().iter().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl TrafficObserver for LiveRing {
	fn on_entry(&self, entry: Arc<TrafficEntry>) {
		let mut entries = self.entries.lock();
		entries.push_front(entry);
		entries.truncate(self.capacity);
	}
}

/// The recording subscriber (spec §4.3): append-only, active only while
/// recording is toggled on.
pub struct Recorder {
	recording: AtomicBool,
	entries: parking_lot::Mutex<Vec<Arc<TrafficEntry>>>,
}

impl Recorder {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			recording: AtomicBool::new(false),
			entries: parking_lot::Mutex::new(Vec::new()),
		})
	}

	pub fn set_recording(&self, on: bool) {
		self.recording.store(on, Ordering::SeqCst);
	}

	pub fn is_recording(&self) -> bool {
		self.recording.load(Ordering::SeqCst)
	}

	pub fn drain(&self) -> Vec<Arc<TrafficEntry>> {
		std::mem::take(&mut self.entries.lock())
	}
}

impl TrafficObserver for Recorder {
	fn on_entry(&self, entry: Arc<TrafficEntry>) {
		if self.is_recording() {
			self.entries.lock().push(entry);
		}
	}
}

/// Per-subscriber queue capacity. Not user-visible; sized generously so a
/// momentary stall in one subscriber doesn't lose entries under normal load.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

pub struct TrafficBus {
	subscriptions: Vec<Subscription>,
}

impl TrafficBus {
	/// Subscribers are registered at construction (spec §4.3) and never
	/// change afterwards.
	pub fn new(observers: Vec<Arc<dyn TrafficObserver>>) -> Self {
		let subscriptions = observers
			.into_iter()
			.map(|o| Subscription::new(SUBSCRIBER_QUEUE_CAPACITY, o))
			.collect();
		Self { subscriptions }
	}

	/// Publish a completed entry. Delivery is best-effort and unordered
	/// across subscribers, but FIFO per subscriber (spec §4.3). Only ever
	/// called with `entry.complete == true` (spec §3 invariant).
	pub fn publish(&self, entry: TrafficEntry) {
		debug_assert!(entry.complete, "only complete entries are published");
		tracing::debug!(
			id = %entry.id,
			method = %entry.request.method,
			host = %entry.request.host,
			path = %entry.request.path,
			status = entry.response.status,
			"traffic entry published"
		);
		let entry = Arc::new(entry);
		for sub in &self.subscriptions {
			sub.publish(entry.clone());
		}
	}
}
