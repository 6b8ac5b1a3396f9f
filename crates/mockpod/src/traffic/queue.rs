//! A bounded, drop-oldest work queue drained by a single background task.
//!
//! `tokio::sync::mpsc` rejects a send once full rather than evicting the
//! oldest pending item, so it can't express spec §4.3's "if a subscriber
//! cannot keep up, oldest entries for that subscriber are dropped". This is
//! a small `VecDeque` + `Notify` instead.
//!
//! The drain task must never hold a strong `Arc<DroppingQueue<T>>` across an
//! await point: it only ever upgrades a `Weak` transiently to peek at
//! `items`, and waits on its own cloned `Arc<Notify>` (a separate allocation,
//! not reached through `Self`) the rest of the time. A strong self-reference
//! here would be a retain cycle — `Drop` can only run once the last strong
//! `Arc` goes away, but the task itself would be one of the holders — so the
//! queue, and every entry still queued in it, would never be freed and the
//! task would spin (or park) forever. Mirrors the teacher's own preference
//! for weak back-references over NIO-handler-style strong cycles (spec §9
//! "Strong-reference cycles between NIO handlers and the manager").

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;

pub struct DroppingQueue<T> {
	capacity: usize,
	items: Mutex<VecDeque<T>>,
	notify: Arc<Notify>,
}

impl<T: Send + 'static> DroppingQueue<T> {
	/// Spawn the queue's drain task, which calls `handle` once per item in
	/// FIFO order, until the last `Arc<Self>` (the one returned here) is
	/// dropped.
	pub fn spawn(capacity: usize, handle: impl Fn(T) + Send + 'static) -> Arc<Self> {
		let notify = Arc::new(Notify::new());
		let queue = Arc::new(Self {
			capacity,
			items: Mutex::new(VecDeque::with_capacity(capacity)),
			notify: notify.clone(),
		});

		let weak_queue = Arc::downgrade(&queue);
		tokio::spawn(async move {
			loop {
				let item = match weak_queue.upgrade() {
					Some(queue) => queue.items.lock().pop_front(),
					None => break,
				};
				match item {
					Some(item) => handle(item),
					None => notify.notified().await,
				}
			}
		});

		queue
	}

	/// Non-blocking enqueue. Drops the oldest pending item if the queue is
	/// already at capacity.
	pub fn push(&self, item: T) {
		let mut items = self.items.lock();
		if items.len() >= self.capacity {
			items.pop_front();
		}
		items.push_back(item);
		drop(items);
		self.notify.notify_one();
	}
}

impl<T> Drop for DroppingQueue<T> {
	fn drop(&mut self) {
		// Wake the drain task (parked on this same `Arc<Notify>`, not on
		// `Self`) so it re-checks its `Weak`, finds this was the last strong
		// reference, and exits instead of waiting forever.
		self.notify.notify_one();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	#[tokio::test]
	async fn drain_task_stops_once_the_queue_is_dropped() {
		let seen = Arc::new(AtomicUsize::new(0));
		let handler_seen = seen.clone();
		let queue = DroppingQueue::spawn(4, move |n: u32| {
			handler_seen.fetch_add(n as usize, Ordering::SeqCst);
		});

		queue.push(1);
		queue.push(2);
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(seen.load(Ordering::SeqCst), 3);

		let weak = Arc::downgrade(&queue);
		drop(queue);
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(weak.upgrade().is_none(), "queue should be fully dropped");
	}
}
