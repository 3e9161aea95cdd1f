use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Fixed-capacity FIFO that overwrites its oldest slot when full.
#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Appends `value`, returning the evicted oldest element when full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let capacity = self.capacity();
        if self.len == capacity {
            let evicted = self.slots[self.head].replace(value);
            self.head = (self.head + 1) % capacity;
            evicted
        } else {
            let tail = (self.head + self.len) % capacity;
            self.slots[tail] = Some(value);
            self.len += 1;
            None
        }
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        value
    }
}

/// What happened to an item handed to [`DropOldestQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest item.
    Evicted,
    /// Lock was busy; the item was dropped.
    Contended,
    Closed,
}

/// Result of waiting on [`DropOldestQueue::pop_wait_timeout`].
#[derive(Debug)]
pub enum Pop<T> {
    Item(T),
    Timeout,
    Closed,
}

struct QueueState<T> {
    ring: RingBuffer<T>,
    closed: bool,
}

/// Bounded single-consumer queue. Producers never wait: a full queue evicts
/// its oldest item and a busy lock drops the new item in `try_push`.
pub struct DropOldestQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
    dropped: AtomicU64,
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                ring: RingBuffer::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().ring.capacity()
    }

    pub fn len(&self) -> usize {
        self.state.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items evicted or rejected since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Enqueues `item`, taking the lock even if the consumer holds it.
    pub fn push(&self, item: T) -> PushOutcome {
        let mut guard = self.state.lock();
        self.push_locked(&mut guard, item)
    }

    /// Enqueues `item` only if the lock is free right now.
    pub fn try_push(&self, item: T) -> PushOutcome {
        match self.state.try_lock() {
            Some(mut guard) => self.push_locked(&mut guard, item),
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Contended
            }
        }
    }

    fn push_locked(&self, state: &mut QueueState<T>, item: T) -> PushOutcome {
        if state.closed {
            return PushOutcome::Closed;
        }
        let outcome = match state.ring.push(item) {
            Some(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Evicted
            }
            None => PushOutcome::Queued,
        };
        self.available.notify_one();
        outcome
    }

    pub fn pop(&self) -> Option<T> {
        self.state.lock().ring.pop()
    }

    /// Waits up to `timeout` for the next item.
    pub fn pop_wait_timeout(&self, timeout: Duration) -> Pop<T> {
        let mut guard = self.state.lock();

        loop {
            if let Some(item) = guard.ring.pop() {
                return Pop::Item(item);
            }
            if guard.closed {
                return Pop::Closed;
            }
            if self.available.wait_for(&mut guard, timeout).timed_out() {
                return match guard.ring.pop() {
                    Some(item) => Pop::Item(item),
                    None if guard.closed => Pop::Closed,
                    None => Pop::Timeout,
                };
            }
        }
    }

    /// Drops queued items and wakes the consumer. Pushes are rejected after this.
    pub fn close(&self) {
        let mut guard = self.state.lock();
        guard.closed = true;
        while guard.ring.pop().is_some() {}
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn ring_buffer_is_fifo_and_evicts_oldest() {
        let mut ring = RingBuffer::with_capacity(3);
        assert_eq!(ring.push(1), None);
        assert_eq!(ring.push(2), None);
        assert_eq!(ring.push(3), None);
        assert_eq!(ring.push(4), Some(1));
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), Some(4));
        assert_eq!(ring.pop(), None);
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn paused_consumer_keeps_newest_capacity_items() {
        let capacity = 10;
        let queue = DropOldestQueue::new(capacity);
        for frame in 0..capacity + 5 {
            queue.push(frame);
        }

        let mut processed = Vec::new();
        while let Some(frame) = queue.pop() {
            processed.push(frame);
        }

        assert_eq!(processed.len(), capacity);
        assert_eq!(processed, (5..capacity + 5).collect::<Vec<_>>());
        assert_eq!(queue.dropped(), 5);
    }

    #[test]
    fn reports_eviction() {
        let queue = DropOldestQueue::new(1);
        assert_eq!(queue.push('a'), PushOutcome::Queued);
        assert_eq!(queue.push('b'), PushOutcome::Evicted);
        assert_eq!(queue.pop(), Some('b'));
    }

    #[test]
    fn wait_times_out_when_empty() {
        let queue: DropOldestQueue<u8> = DropOldestQueue::new(4);
        assert!(matches!(
            queue.pop_wait_timeout(Duration::from_millis(5)),
            Pop::Timeout
        ));
    }

    #[test]
    fn close_wakes_waiting_consumer() {
        let queue: Arc<DropOldestQueue<u8>> = Arc::new(DropOldestQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_wait_timeout(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();

        assert!(matches!(consumer.join().unwrap(), Pop::Closed));
        assert_eq!(queue.push(1), PushOutcome::Closed);
        assert!(queue.is_closed());
    }

    #[test]
    fn consumer_receives_item_pushed_while_waiting() {
        let queue = Arc::new(DropOldestQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_wait_timeout(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.push(42u32);

        assert!(matches!(consumer.join().unwrap(), Pop::Item(42)));
    }

    #[test]
    fn try_push_on_free_lock_queues() {
        let queue = DropOldestQueue::new(2);
        assert_eq!(queue.try_push(1), PushOutcome::Queued);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop(), Some(1));
        assert!(queue.is_empty());
    }
}
