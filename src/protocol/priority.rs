//! # Dispatch Priority
//!
//! Frames are not handled strictly in arrival order: the transport pump
//! classifies each frame and the dispatcher drains the highest class first,
//! FIFO within a class.
//!
//! Classification runs through a chain of pluggable providers over a
//! default table. The default table assigns every identifier
//! [`Priority::Normal`]; registered providers are consulted
//! most-recently-registered-first and the first defined answer wins.
//! Providers can be registered and unregistered at runtime without pausing
//! the pipeline.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, RwLock};

use tracing::warn;

use crate::core::frame::Frame;

/// Dispatch priority, ordered `High > Normal > Low` for dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// One link in the priority-override chain.
pub trait PriorityProvider: Send + Sync {
    /// The priority this provider assigns to `identifier`, or `None` to
    /// defer to the next provider in the chain.
    fn priority_for(&self, identifier: u8) -> Option<Priority>;
}

/// Maps packet identifiers to dispatch priorities.
///
/// Cloning shares the provider chain; the transport pump and external
/// collaborators see the same registrations.
#[derive(Clone, Default)]
pub struct PriorityResolver {
    providers: Arc<RwLock<Vec<Arc<dyn PriorityProvider>>>>,
}

impl PriorityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an override provider. The newest registration is consulted
    /// first.
    pub fn register(&self, provider: Arc<dyn PriorityProvider>) {
        if let Ok(mut providers) = self.providers.write() {
            providers.push(provider);
        }
    }

    /// Remove a previously registered provider (pointer identity).
    pub fn unregister(&self, provider: &Arc<dyn PriorityProvider>) {
        if let Ok(mut providers) = self.providers.write() {
            providers.retain(|p| !Arc::ptr_eq(p, provider));
        }
    }

    /// Resolve the dispatch priority for one identifier.
    pub fn resolve(&self, identifier: u8) -> Priority {
        if let Ok(providers) = self.providers.read() {
            for provider in providers.iter().rev() {
                if let Some(priority) = provider.priority_for(identifier) {
                    return priority;
                }
            }
        }
        // Default table: every known identifier dispatches as Normal.
        Priority::Normal
    }
}

struct QueueEntry {
    priority: Priority,
    seq: u64,
    frame: Frame,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; earlier sequence first within a tier.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority-ordered frame queue, stable FIFO within each tier.
#[derive(Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// O(log n) insert.
    pub fn push(&mut self, priority: Priority, frame: Frame) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueEntry {
            priority,
            seq,
            frame,
        });
    }

    /// Highest-priority frame, FIFO among equals.
    pub fn pop(&mut self) -> Option<Frame> {
        self.heap.pop().map(|entry| entry.frame)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

struct QueueState {
    queue: PriorityQueue,
    closed: bool,
}

/// The shared queue between the transport pump and the dispatcher.
///
/// The condition variable is evaluated under the same lock that guards the
/// queue, so a push between the dispatcher's emptiness check and its wait
/// cannot lose its wakeup.
pub struct FrameQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: PriorityQueue::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue a frame and signal the dispatcher.
    pub fn push(&self, priority: Priority, frame: Frame) {
        match self.state.lock() {
            Ok(mut state) => {
                if state.closed {
                    // Late frame racing shutdown; the pool lease drop
                    // reclaims the buffer.
                    return;
                }
                state.queue.push(priority, frame);
                self.available.notify_one();
            }
            Err(_) => warn!("frame queue lock poisoned; dropping frame"),
        }
    }

    /// Block until a frame is available or the queue is closed.
    ///
    /// Returns `None` only at shutdown, after the queue has drained.
    pub fn pop_wait(&self) -> Option<Frame> {
        let mut state = self.state.lock().ok()?;
        loop {
            if let Some(frame) = state.queue.pop() {
                return Some(frame);
            }
            if state.closed {
                return None;
            }
            state = self.available.wait(state).ok()?;
        }
    }

    /// Close the queue and wake the dispatcher. Frames still queued are
    /// drained before `pop_wait` returns `None`.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.queue.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::buffer_pool::BufferPool;

    fn frame(pool: &BufferPool, id: u8, tag: u8) -> Frame {
        let mut buf = pool.acquire();
        buf.push(tag);
        Frame::new(id, buf)
    }

    #[test]
    fn priority_ordering_is_stable_fifo() {
        let pool = BufferPool::new(8, 32);
        let mut queue = PriorityQueue::new();

        // Interleaved pushes across all three tiers.
        queue.push(Priority::Low, frame(&pool, 0x01, 0));
        queue.push(Priority::High, frame(&pool, 0x02, 1));
        queue.push(Priority::Normal, frame(&pool, 0x03, 2));
        queue.push(Priority::High, frame(&pool, 0x04, 3));
        queue.push(Priority::Low, frame(&pool, 0x05, 4));
        queue.push(Priority::Normal, frame(&pool, 0x06, 5));

        let order: Vec<u8> = std::iter::from_fn(|| queue.pop())
            .map(|f| f.identifier())
            .collect();
        assert_eq!(order, vec![0x02, 0x04, 0x03, 0x06, 0x01, 0x05]);
    }

    #[test]
    fn resolver_default_is_normal() {
        let resolver = PriorityResolver::new();
        assert_eq!(resolver.resolve(0x50), Priority::Normal);
    }

    #[test]
    fn most_recent_provider_wins() {
        struct Fixed(u8, Priority);
        impl PriorityProvider for Fixed {
            fn priority_for(&self, identifier: u8) -> Option<Priority> {
                (identifier == self.0).then_some(self.1)
            }
        }

        let resolver = PriorityResolver::new();
        let older: Arc<dyn PriorityProvider> = Arc::new(Fixed(0x25, Priority::Low));
        let newer: Arc<dyn PriorityProvider> = Arc::new(Fixed(0x25, Priority::High));
        resolver.register(older.clone());
        resolver.register(newer.clone());

        assert_eq!(resolver.resolve(0x25), Priority::High);
        // Undefined identifiers fall through the chain to the default.
        assert_eq!(resolver.resolve(0x26), Priority::Normal);

        resolver.unregister(&newer);
        assert_eq!(resolver.resolve(0x25), Priority::Low);
        resolver.unregister(&older);
        assert_eq!(resolver.resolve(0x25), Priority::Normal);
    }

    #[test]
    fn frame_queue_wakes_waiting_consumer() {
        let pool = BufferPool::new(2, 32);
        let queue = Arc::new(FrameQueue::new());

        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.pop_wait().map(|f| f.identifier()))
        };

        // Give the consumer a moment to reach its wait.
        std::thread::sleep(std::time::Duration::from_millis(20));
        queue.push(Priority::Normal, frame(&pool, 0x42, 0));

        assert_eq!(consumer.join().unwrap(), Some(0x42));
    }

    #[test]
    fn closed_queue_drains_then_ends() {
        let pool = BufferPool::new(2, 32);
        let queue = FrameQueue::new();
        queue.push(Priority::Normal, frame(&pool, 0x10, 0));
        queue.close();

        assert_eq!(queue.pop_wait().map(|f| f.identifier()), Some(0x10));
        assert!(queue.pop_wait().is_none());
    }
}
