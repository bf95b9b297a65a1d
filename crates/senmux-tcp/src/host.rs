//! Host trait seams (§4.M / spec.md §6): the multiplexer-side collaborators
//! the TCP core calls back into. Out of scope in spirit (spec.md §1 lists
//! the filter compiler, tag formatter, event scheduler and lifecycle hooks
//! as external), these are thin traits here because `senmux-tcp` is a
//! standalone, runnable crate rather than one transport wired into a larger
//! host process.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::iface::Interface;
use crate::senblk::Senblk;

/// `gettag`: renders a tag into `buf`, returning the number of bytes
/// written, or 0 to signal failure (outbound tags are then disabled for
/// the rest of the connection, per spec.md §4.G step 1).
pub trait TagFormatter: Send + Sync {
    fn format(&self, iface_id: u32, senblk: &Senblk, buf: &mut [u8]) -> usize;
}

/// No tag is rendered; `write_tcp` sends payload only.
pub struct NoTag;

impl TagFormatter for NoTag {
    fn format(&self, _iface_id: u32, _senblk: &Senblk, _buf: &mut [u8]) -> usize {
        0
    }
}

/// `addfilter`: decides whether a record should reach a given queue, and
/// clones/ref-counts itself when an interface is duplicated (`ifdup`).
pub trait Filter: Send + Sync {
    fn permits(&self, senblk: &Senblk) -> bool;
    fn clone_box(&self) -> Arc<dyn Filter>;
}

/// Accepts everything; the default filter for interfaces with none configured.
pub struct PassFilter;

impl Filter for PassFilter {
    fn permits(&self, _senblk: &Senblk) -> bool {
        true
    }

    fn clone_box(&self) -> Arc<dyn Filter> {
        Arc::new(PassFilter)
    }
}

/// `add_event(EVT_HB, iface, 0)`: schedules a heartbeat for an interface.
pub trait HeartbeatScheduler: Send + Sync {
    fn schedule(&self, iface_id: u32, period: Duration);
}

/// Logs the schedule request; a real multiplexer would register it with its
/// event loop instead.
pub struct LoggingHeartbeatScheduler;

impl HeartbeatScheduler for LoggingHeartbeatScheduler {
    fn schedule(&self, iface_id: u32, period: Duration) {
        info!(iface_id, ?period, "heartbeat scheduled");
    }
}

/// `link_to_initialized`/`iface_thread_exit`: interface lifecycle hooks.
pub trait InterfaceLifecycle: Send + Sync {
    fn on_initialized(&self, iface: &Interface);
    fn on_thread_exit(&self, iface_id: u32, err: Option<std::io::Error>);
}

/// Logs lifecycle transitions via `tracing`, standing in for `logerr`/`DEBUG`.
pub struct LoggingLifecycle;

impl InterfaceLifecycle for LoggingLifecycle {
    fn on_initialized(&self, iface: &Interface) {
        info!(iface_id = iface.id, name = %iface.name, direction = ?iface.direction, "interface initialized");
    }

    fn on_thread_exit(&self, iface_id: u32, err: Option<std::io::Error>) {
        match err {
            Some(err) => warn!(iface_id, %err, "interface thread exiting on error"),
            None => info!(iface_id, "interface thread exiting"),
        }
    }
}
