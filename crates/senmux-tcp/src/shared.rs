//! Shared reconnect coordinator (§4.E): the mutex+condvar+counters object a
//! paired reader/writer thread use to serialize recovery of one TCP
//! connection, exists iff `PERSIST` is set (spec.md §3 invariant 6 / §9
//! Design Notes).
//!
//! `if_tcp_shared`'s `donewith` two-phase teardown counter has no field
//! here: `SharedBlock` is always held behind an `Arc`, and the pair's
//! second cleanup is simply the point where the `Arc`'s strong count drops
//! to zero and `Drop` runs -- exactly the "reference count... as the
//! natural replacement" the Design Notes call for.

use std::net::{Shutdown, TcpStream};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::tuning::TuningConfig;

/// What a thread that just hit an I/O failure should do next.
#[derive(Debug, PartialEq, Eq)]
pub enum RepairRole {
    /// This thread performed (or attempted) the repair; the stream it reads
    /// from `SharedBlock` next reflects the outcome.
    Repair,
    /// The other thread repaired the connection; this thread should just
    /// retry its operation.
    WaitForPeer,
    /// The connection cannot be recovered (`fd == -1` now); exit.
    GiveUp,
}

struct Coordinator {
    /// `None` is the `fd == -1` sentinel (spec.md §3 invariant 2).
    stream: Option<TcpStream>,
    /// Threads currently between `enter_io` and `leave_io_*` (0, 1, or 2).
    critical: u8,
    /// Set by whichever thread has taken ownership of the repair.
    fixing: bool,
    /// One-shot rendezvous flag: set by the forced-out peer right before it
    /// signals and waits, so the repairer's wake-up isn't ambiguous with a
    /// spurious wakeup (spec.md §9 Design Notes' warning about re-checking
    /// `fixing`, generalized to this wait too).
    peer_ready: bool,
    /// Set while a thread is running the deferred-connect callback outside
    /// the lock (see [`SharedBlock::ensure_connected`]); lets the other half
    /// of a BOTH pair wait for that attempt instead of starting its own.
    connecting: bool,
}

/// Connection-recovery configuration plus the coordinator state, jointly
/// owned by both halves of a `PERSIST` `BOTH` pair.
pub struct SharedBlock {
    pub host: String,
    pub port: String,
    pub preamble: Option<Vec<u8>>,
    pub retry: Duration,
    pub tuning: TuningConfig,
    state: Mutex<Coordinator>,
    cv: Condvar,
}

impl SharedBlock {
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: impl Into<String>,
        preamble: Option<Vec<u8>>,
        retry: Duration,
        tuning: TuningConfig,
        initial_stream: Option<TcpStream>,
    ) -> Self {
        SharedBlock {
            host: host.into(),
            port: port.into(),
            preamble,
            retry,
            tuning,
            state: Mutex::new(Coordinator {
                stream: initial_stream,
                critical: 0,
                fixing: false,
                peer_ready: false,
                connecting: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// `enter()`: returns a cloned handle to the live stream (a `dup`'d fd,
    /// per invariant 1) and marks this thread as "in the critical region."
    /// Returns `None` when `fd == -1` -- invariant 2, the caller exits.
    pub fn enter_io(&self) -> Option<TcpStream> {
        let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let stream = g.stream.as_ref()?.try_clone().ok()?;
        g.critical += 1;
        Some(stream)
    }

    /// Successful I/O: leave the critical region, waking the repairer if one
    /// is waiting on us to notice.
    pub fn leave_io_ok(&self) {
        let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        g.critical = g.critical.saturating_sub(1);
        if g.fixing {
            self.cv.notify_all();
        }
    }

    /// Failed I/O. Implements the state machine from spec.md §4.E:
    /// - if the peer is already repairing, announce arrival and wait for it;
    /// - if the peer is mid-I/O (`critical == 2`), force it out with
    ///   `shutdown(RDWR)` and wait for it to arrive;
    /// - otherwise (or once the peer has arrived) perform `repair`, which
    ///   returns the new stream on success or `None` to give up.
    ///
    /// `repair` runs with the coordinator lock held, matching the source:
    /// the peer is parked on the condvar for the duration, so this is safe,
    /// not merely permitted.
    pub fn leave_io_fail<F>(&self, repair: F) -> RepairRole
    where
        F: FnOnce() -> Option<TcpStream>,
    {
        let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if g.fixing {
            // The other thread already owns the repair: announce that we've
            // been forced out of our blocking I/O, then wait for it to finish.
            g.peer_ready = true;
            self.cv.notify_all();
            while g.fixing {
                g = self.cv.wait(g).unwrap_or_else(std::sync::PoisonError::into_inner);
            }
            g.critical = g.critical.saturating_sub(1);
            return if g.stream.is_some() { RepairRole::WaitForPeer } else { RepairRole::GiveUp };
        }

        if g.critical == 2 {
            // Peer is mid-I/O on the same socket; force its blocking call to
            // return so it arrives here and parks on `peer_ready`.
            g.fixing = true;
            if let Some(stream) = &g.stream {
                let _ = stream.shutdown(Shutdown::Both);
            }
            while !g.peer_ready {
                g = self.cv.wait(g).unwrap_or_else(std::sync::PoisonError::into_inner);
            }
            g.peer_ready = false;
        }

        let new_stream = repair();
        let role = if new_stream.is_some() { RepairRole::Repair } else { RepairRole::GiveUp };
        if new_stream.is_none() {
            warn!(host = %self.host, port = %self.port, "reconnect failed, giving up");
        } else {
            debug!(host = %self.host, port = %self.port, "reconnect succeeded");
        }
        g.stream = new_stream;
        if g.fixing {
            g.fixing = false;
            self.cv.notify_all();
        }
        g.critical = g.critical.saturating_sub(1);
        role
    }

    /// Installs a freshly (re)connected stream without going through the
    /// failure protocol -- used by the connector on the very first connect.
    pub fn install(&self, stream: Option<TcpStream>) {
        let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        g.stream = stream;
    }

    /// First-use deferred connect (§9 Design Notes' `{Connected, Deferred}`
    /// tag). `connect` is a (possibly long-retrying) connector call and runs
    /// with the lock released, matching the reread probe's rule of never
    /// holding `t_mutex` across a long blocking operation; a `connecting`
    /// flag keeps a BOTH pair's two threads from racing each other into
    /// opening two sockets for one still-deferred interface.
    pub fn ensure_connected<F>(&self, connect: F)
    where
        F: FnOnce() -> Option<TcpStream>,
    {
        {
            let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if g.stream.is_some() {
                return;
            }
            if g.connecting {
                while g.stream.is_none() && g.connecting {
                    g = self.cv.wait(g).unwrap_or_else(std::sync::PoisonError::into_inner);
                }
                return;
            }
            g.connecting = true;
        }

        let stream = connect();

        let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        g.stream = stream;
        g.connecting = false;
        drop(g);
        self.cv.notify_all();
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn block_with_stream() -> (Arc<SharedBlock>, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        let block = Arc::new(SharedBlock::new(
            addr.ip().to_string(),
            addr.port().to_string(),
            None,
            Duration::from_millis(10),
            TuningConfig::default(),
            Some(stream),
        ));
        (block, listener)
    }

    #[test]
    fn give_up_when_fd_is_dead() {
        let (block, _listener) = block_with_stream();
        block.install(None);
        assert!(block.enter_io().is_none());
    }

    #[test]
    fn enter_leave_roundtrip_keeps_critical_at_zero() {
        let (block, _listener) = block_with_stream();
        let s = block.enter_io().unwrap();
        drop(s);
        block.leave_io_ok();
        // A second enter/leave cycle must still succeed -- critical didn't leak.
        let s2 = block.enter_io().unwrap();
        drop(s2);
        block.leave_io_ok();
    }

    #[test]
    fn ensure_connected_runs_the_connector_only_once_for_a_racing_pair() {
        let block = Arc::new(SharedBlock::new(
            "127.0.0.1".to_string(),
            "0".to_string(),
            None,
            Duration::from_millis(10),
            TuningConfig::default(),
            None,
        ));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _accept = thread::spawn(move || {
            let _ = listener.accept();
        });

        let make_connect = |calls: Arc<std::sync::atomic::AtomicUsize>| {
            move || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                TcpStream::connect(addr).ok()
            }
        };

        let block2 = Arc::clone(&block);
        let calls2 = Arc::clone(&calls);
        let t2 = thread::spawn(move || block2.ensure_connected(make_connect(calls2)));
        block.ensure_connected(make_connect(Arc::clone(&calls)));
        t2.join().unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(block.is_live());
    }

    #[test]
    fn single_reconnect_per_outage_both_halves_observe_it() {
        let (block, _listener) = block_with_stream();
        let reconnect_calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        // Simulate both reader and writer entering the critical region
        // (critical == 2), then both failing at the same time.
        let _s1 = block.enter_io().unwrap();
        let _s2 = block.enter_io().unwrap();

        let block2 = Arc::clone(&block);
        let calls2 = Arc::clone(&reconnect_calls);
        let t2 = thread::spawn(move || {
            block2.leave_io_fail(|| {
                calls2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                None
            })
        });

        // Give thread 2 a chance to become the repairer (critical==2 branch).
        thread::sleep(Duration::from_millis(20));
        let role1 = block.leave_io_fail(|| {
            reconnect_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            None
        });
        let role2 = t2.join().unwrap();

        assert_eq!(reconnect_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(
            (role1 == RepairRole::GiveUp && role2 == RepairRole::GiveUp)
                || (role1 == RepairRole::WaitForPeer || role2 == RepairRole::WaitForPeer)
        );
    }
}
