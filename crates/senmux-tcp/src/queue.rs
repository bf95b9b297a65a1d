//! Sentence queue (§3, §4.L): the `init_q`/`next_senblk`/`senblk_free`/
//! `flush_queue` contract, realized as a plain `Mutex`+`Condvar` FIFO.
//!
//! `senblk_free` has no method here: a dequeued [`Senblk`] is an owned
//! value, and dropping it *is* `senblk_free`. The contract is kept in the
//! API surface (`next_senblk`/`flush`/`close`) rather than reproduced as a
//! pool-return call.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::host::Filter;
use crate::senblk::Senblk;

struct State {
    items: VecDeque<Senblk>,
    closed: bool,
}

/// FIFO of [`Senblk`] records shared between a producer (the reader thread
/// of one interface, or the multiplexer's distribution fan-out) and a
/// consumer (the writer thread of an outbound interface).
pub struct SenblkQueue {
    state: Mutex<State>,
    not_empty: Condvar,
    capacity: usize,
    filter: Option<Arc<dyn Filter>>,
    name: String,
}

impl SenblkQueue {
    /// `init_q(size, filter, name)`.
    #[must_use]
    pub fn new(capacity: usize, filter: Option<Arc<dyn Filter>>, name: impl Into<String>) -> Self {
        SenblkQueue {
            state: Mutex::new(State { items: VecDeque::with_capacity(capacity.max(1)), closed: false }),
            not_empty: Condvar::new(),
            capacity,
            filter,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues `senblk` unless the queue is closed or a filter rejects it.
    /// Drops the oldest record when the queue is at capacity, since this
    /// core never blocks a producer on a full outbound queue (backpressure
    /// is an external collaborator's concern; see spec.md §1 scope).
    pub fn push(&self, senblk: Senblk) {
        if let Some(filter) = &self.filter
            && !filter.permits(&senblk)
        {
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.closed {
            return;
        }
        if self.capacity > 0 && state.items.len() >= self.capacity {
            state.items.pop_front();
        }
        state.items.push_back(senblk);
        drop(state);
        self.not_empty.notify_one();
    }

    /// Blocks until a record is available or the queue is closed, in which
    /// case it returns `None` ("returns NULL").
    pub fn next_senblk(&self) -> Option<Senblk> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if let Some(senblk) = state.items.pop_front() {
                return Some(senblk);
            }
            if state.closed {
                return None;
            }
            state = self.not_empty.wait(state).unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// `flush_queue`: discards everything currently buffered. Used
    /// immediately after a successful writer-side reconnect so records
    /// enqueued during the outage are dropped rather than resent.
    pub fn flush(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.items.clear();
    }

    /// Marks the queue closed and wakes every waiter; subsequent
    /// `next_senblk` calls drain what remains, then return `None`.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).closed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn fifo_order_within_one_direction() {
        let q = SenblkQueue::new(8, None, "test");
        q.push(Senblk::new(b"A".to_vec(), 1));
        q.push(Senblk::new(b"B".to_vec(), 1));
        assert_eq!(q.next_senblk().unwrap().data, b"A");
        assert_eq!(q.next_senblk().unwrap().data, b"B");
    }

    #[test]
    fn next_senblk_blocks_then_wakes() {
        let q = Arc::new(SenblkQueue::new(8, None, "test"));
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.next_senblk());
        thread::sleep(Duration::from_millis(20));
        q.push(Senblk::new(b"late".to_vec(), 1));
        let got = handle.join().unwrap().unwrap();
        assert_eq!(got.data, b"late");
    }

    #[test]
    fn closed_queue_drains_then_returns_none() {
        let q = SenblkQueue::new(8, None, "test");
        q.push(Senblk::new(b"x".to_vec(), 1));
        q.close();
        assert_eq!(q.next_senblk().unwrap().data, b"x");
        assert!(q.next_senblk().is_none());
    }

    #[test]
    fn flush_drops_buffered_records() {
        let q = SenblkQueue::new(8, None, "test");
        q.push(Senblk::new(b"stale".to_vec(), 1));
        q.flush();
        assert!(q.is_empty());
        q.push(Senblk::new(b"fresh".to_vec(), 1));
        assert_eq!(q.next_senblk().unwrap().data, b"fresh");
    }
}
