//! Multi-client fan-out with a shared replay buffer and per-client bounded
//! queues.
//!
//! Mirrors the ring-buffer-plus-fan-out shape of a live audio stream
//! registry: a bounded [`VecDeque`] holds recently published chunks for
//! late-joining clients, and each subscriber gets its own bounded queue so a
//! stalled client can never block the producer or other subscribers.
//!
//! The critical invariant lives in [`Broadcaster::subscribe`]: the replay
//! snapshot and the registration into the active set happen under one lock
//! acquisition, so a publish racing with a subscribe can never land between
//! "snapshot taken" and "registered" and be silently lost or duplicated.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

struct SubscriptionState {
    queue: VecDeque<Bytes>,
    closed: bool,
    dropped_count: u64,
}

struct SubscriptionInner {
    state: Mutex<SubscriptionState>,
    notify: Notify,
    capacity: usize,
}

impl SubscriptionInner {
    /// Pushes a chunk, applying the drop-oldest policy when at capacity.
    /// Returns `false` if the subscription is already closed (caller should
    /// treat this subscription as inert).
    fn push(&self, chunk: Bytes) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        if state.queue.len() >= self.capacity {
            state.queue.pop_front();
            state.dropped_count += 1;
        }
        state.queue.push_back(chunk);
        drop(state);
        self.notify.notify_one();
        true
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.notify.notify_waiters();
    }
}

/// A single consumer's view of the broadcast.
///
/// Dropping the handle automatically unsubscribes it from the broadcaster,
/// mirroring the RAII connection-guard pattern used elsewhere for per-client
/// resources.
pub struct Subscription {
    id: u64,
    inner: Arc<SubscriptionInner>,
    broadcaster: Weak<BroadcasterInner>,
}

impl Subscription {
    /// Returns the next chunk, in publish order, or `None` once the
    /// subscription has been closed (by `unsubscribe`, broadcaster `close`,
    /// or drop) and its queue is drained.
    pub async fn next(&mut self) -> Option<Bytes> {
        loop {
            {
                let mut state = self.inner.state.lock();
                if let Some(chunk) = state.queue.pop_front() {
                    return Some(chunk);
                }
                if state.closed {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Number of chunks dropped from this subscription's queue by the
    /// slow-consumer policy since it was created.
    pub fn dropped_count(&self) -> u64 {
        self.inner.state.lock().dropped_count
    }

    /// Whether this subscription has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Stable identity for this subscription, for logging/metrics.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.close();
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.subscriptions.remove(&self.id);
        }
    }
}

struct BroadcasterInner {
    replay_buffer: Mutex<VecDeque<Bytes>>,
    replay_capacity: usize,
    subscription_capacity: usize,
    subscriptions: DashMap<u64, Arc<SubscriptionInner>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// Fans out an ordered byte stream from one producer to N dynamic
/// consumers, each with instant-replay startup from a shared ring buffer.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<BroadcasterInner>,
}

impl Broadcaster {
    /// Creates a broadcaster with the given replay-buffer and per-subscriber
    /// queue capacities (in chunks).
    pub fn new(replay_capacity: usize, subscription_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                replay_buffer: Mutex::new(VecDeque::with_capacity(replay_capacity)),
                replay_capacity,
                subscription_capacity,
                subscriptions: DashMap::new(),
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Appends `chunk` to the replay buffer (evicting the oldest entry if
    /// full) and attempts a non-blocking enqueue into every active
    /// subscription. A full subscription queue drops its oldest chunk first
    /// (the slow-consumer policy), so publish never blocks. A no-op once the
    /// broadcaster is closed.
    ///
    /// The buffer append and the subscription fan-out happen under one
    /// `replay_buffer` lock acquisition — the same lock `subscribe` takes
    /// across its snapshot-and-register step — so the two can never
    /// interleave. Without that, a `subscribe` racing between this method's
    /// buffer append and its fan-out loop could snapshot a buffer that
    /// already contains this chunk and then also receive it live, delivering
    /// it twice.
    pub fn publish(&self, chunk: Bytes) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }

        let mut buffer = self.inner.replay_buffer.lock();
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }

        if buffer.len() >= self.inner.replay_capacity {
            buffer.pop_front();
        }
        buffer.push_back(chunk.clone());

        for entry in self.inner.subscriptions.iter() {
            entry.value().push(chunk.clone());
        }
        drop(buffer);
    }

    /// Snapshots the replay buffer and registers a new subscription in a
    /// single critical section, then returns a handle over it. If the
    /// broadcaster is already closed, returns an already-closed handle.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::new(SubscriptionInner {
            state: Mutex::new(SubscriptionState {
                queue: VecDeque::new(),
                closed: false,
                dropped_count: 0,
            }),
            notify: Notify::new(),
            capacity: self.inner.subscription_capacity,
        });

        // Hold the replay-buffer lock across the snapshot-and-register step:
        // a publish that arrives while we hold it either lands in the
        // snapshot (if it completed first) or is delivered live after we
        // register (if it's still waiting on the lock) — never both, never
        // neither.
        let buffer = self.inner.replay_buffer.lock();
        if self.inner.closed.load(Ordering::SeqCst) {
            inner.close();
        } else {
            {
                let mut state = inner.state.lock();
                state.queue.extend(buffer.iter().cloned());
            }
            self.inner.subscriptions.insert(id, Arc::clone(&inner));
        }
        drop(buffer);

        Subscription {
            id,
            inner,
            broadcaster: Arc::downgrade(&self.inner),
        }
    }

    /// Removes a subscription from the active set and marks it closed,
    /// causing any in-flight or future `next()` call to return `None` once
    /// its queue drains.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        if let Some((_, inner)) = self.inner.subscriptions.remove(&subscription.id) {
            inner.close();
        }
    }

    /// Marks the broadcaster closed and closes every active subscription.
    /// Idempotent.
    pub fn close(&self) {
        if self
            .inner
            .closed
            .swap(true, Ordering::SeqCst)
        {
            return;
        }
        for entry in self.inner.subscriptions.iter() {
            entry.value().close();
        }
        self.inner.subscriptions.clear();
    }

    /// Number of currently active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Whether the broadcaster has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(n: u8) -> Bytes {
        Bytes::from(vec![n])
    }

    #[tokio::test]
    async fn fan_out_delivers_chunks_in_order_to_every_subscriber() {
        let broadcaster = Broadcaster::new(10, 10);
        let mut subs: Vec<Subscription> = (0..3).map(|_| broadcaster.subscribe()).collect();

        broadcaster.publish(chunk(1));
        broadcaster.publish(chunk(2));
        broadcaster.publish(chunk(3));

        for sub in subs.iter_mut() {
            assert_eq!(sub.next().await, Some(chunk(1)));
            assert_eq!(sub.next().await, Some(chunk(2)));
            assert_eq!(sub.next().await, Some(chunk(3)));
        }
    }

    #[tokio::test]
    async fn late_subscriber_receives_replay_then_live_chunks() {
        let broadcaster = Broadcaster::new(10, 10);
        broadcaster.publish(chunk(1));
        broadcaster.publish(chunk(2));
        broadcaster.publish(chunk(3));

        let mut late = broadcaster.subscribe();
        assert_eq!(late.next().await, Some(chunk(1)));
        assert_eq!(late.next().await, Some(chunk(2)));
        assert_eq!(late.next().await, Some(chunk(3)));

        broadcaster.publish(chunk(4));
        assert_eq!(late.next().await, Some(chunk(4)));
    }

    #[tokio::test]
    async fn slow_consumer_drops_oldest_and_tracks_count() {
        let broadcaster = Broadcaster::new(100, 2);
        let mut slow = broadcaster.subscribe();
        let mut fast = broadcaster.subscribe();

        for n in 1..=100u8 {
            broadcaster.publish(chunk(n));
        }

        for n in 1..=100u8 {
            assert_eq!(fast.next().await, Some(chunk(n)));
        }

        // Slow consumer's queue only holds the last 2 chunks.
        assert_eq!(slow.next().await, Some(chunk(99)));
        assert_eq!(slow.next().await, Some(chunk(100)));
        assert_eq!(slow.dropped_count(), 98);
    }

    #[tokio::test]
    async fn replay_buffer_eviction_is_fifo() {
        let broadcaster = Broadcaster::new(2, 10);
        broadcaster.publish(chunk(1));
        broadcaster.publish(chunk(2));
        broadcaster.publish(chunk(3));

        let mut late = broadcaster.subscribe();
        assert_eq!(late.next().await, Some(chunk(2)));
        assert_eq!(late.next().await, Some(chunk(3)));
    }

    #[tokio::test]
    async fn unsubscribe_closes_in_flight_next() {
        let broadcaster = Broadcaster::new(10, 10);
        let mut sub = broadcaster.subscribe();
        broadcaster.unsubscribe(&sub);
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_closes_subscriptions() {
        let broadcaster = Broadcaster::new(10, 10);
        let mut sub = broadcaster.subscribe();
        broadcaster.close();
        broadcaster.close();
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn publish_after_close_is_a_no_op() {
        let broadcaster = Broadcaster::new(10, 10);
        let mut sub = broadcaster.subscribe();
        broadcaster.close();
        broadcaster.publish(chunk(1));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn subscribing_after_close_returns_already_closed_handle() {
        let broadcaster = Broadcaster::new(10, 10);
        broadcaster.close();
        let mut sub = broadcaster.subscribe();
        assert!(sub.is_closed());
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn dropping_subscription_removes_it_from_active_set() {
        let broadcaster = Broadcaster::new(10, 10);
        let sub = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);
        drop(sub);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn fresh_start_delivers_no_bytes_from_previous_session() {
        // start_stream(x); stop_stream(); start_stream(x) — a fresh
        // Broadcaster (as ingest supervisor creates per session) never
        // carries over state from a prior one.
        let first = Broadcaster::new(10, 10);
        first.publish(chunk(1));
        first.close();

        let second = Broadcaster::new(10, 10);
        let mut sub = second.subscribe();
        second.publish(chunk(9));
        assert_eq!(sub.next().await, Some(chunk(9)));
    }
}
