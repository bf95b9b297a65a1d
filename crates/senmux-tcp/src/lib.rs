//! TCP transport core for a line-oriented sentence multiplexer: client and
//! server connections, persist-mode recovery shared between a paired
//! reader/writer thread, and the accept loop that spawns per-connection
//! interfaces.
//!
//! Everything upstream of a connected socket -- the frame driver, filter
//! compiler, tag formatter, configuration parser and event scheduler -- is a
//! host collaborator. This crate ships thin trait seams for them ([`host`])
//! plus minimal concrete implementations so it is runnable end to end on its
//! own; a real multiplexer plugs its own implementations in instead.

pub mod connector;
pub mod error;
pub mod host;
pub mod iface;
pub mod init;
pub mod preamble;
pub mod queue;
pub mod reader;
pub mod resolve;
pub mod senblk;
pub mod server;
pub mod shared;
pub mod tuning;
pub mod writer;

use std::sync::Arc;
use std::thread;

use senmux_util::{ThreadPriority, thread_boot};
use tracing::debug;

use error::IoFailure;
use host::InterfaceLifecycle;
use iface::{Interface, Transport};
use queue::SenblkQueue;
use senblk::Senblk;
use shared::SharedBlock;

/// Connects a still-deferred persist interface (armed by `IPERSIST`, per
/// spec.md §4.I) and is a no-op on one that's already live or non-persist.
/// Called once at the top of [`spawn_reader`]/[`spawn_writer`], matching §9
/// Design Notes' "tagged variant `{Connected, Deferred}` checked once at
/// thread entry; no mid-loop dispatch".
fn connect_if_deferred(shared: &SharedBlock) {
    if shared.is_live() {
        return;
    }
    shared.ensure_connected(|| {
        connector::connect(&shared.host, &shared.port, shared.preamble.as_deref(), &shared.tuning, shared.retry, true)
            .ok()
    });
}

fn push_record(queue: &Option<Arc<SenblkQueue>>, source_id: u32, data: &[u8]) {
    if let Some(q) = queue {
        q.push(Senblk::new(data.to_vec(), source_id));
    }
}

/// One interface's read loop, dispatched over `Transport`. Each positive
/// read is handed to `iface.queue` as one [`Senblk`] -- the real sentence
/// framing (splitting a TCP stream into individual NMEA records) is the
/// out-of-scope frame driver's job; this stands in for it so the crate is
/// exercisable without one.
fn run_reader(iface: &Interface) -> Result<(), IoFailure> {
    let mut buf = [0u8; 4096];
    match &iface.transport {
        Transport::Direct(stream) => {
            let stream = stream.try_clone()?;
            loop {
                let n = reader::read_direct(&stream, &mut buf)?;
                if n == 0 {
                    return Ok(());
                }
                push_record(&iface.queue, iface.id, &buf[..n]);
            }
        }
        Transport::Persist(shared) => {
            connect_if_deferred(shared);
            loop {
                let n = reader::read_tcp(shared, &mut buf)?;
                if n > 0 {
                    push_record(&iface.queue, iface.id, &buf[..n]);
                }
            }
        }
    }
}

/// One interface's write loop: drains `iface.queue` and writes each record,
/// recovering via the coordinator under persist.
fn run_writer(iface: &Interface) -> Result<(), IoFailure> {
    let queue = iface.queue.as_ref().expect("writer interface constructed without an outbound queue");
    let tag = iface.tag.as_deref();

    match &iface.transport {
        Transport::Direct(stream) => writer::write_direct(stream, queue, tag, iface.id),
        Transport::Persist(shared) => {
            connect_if_deferred(shared);
            writer::write_tcp(shared, queue, tag, iface.id)
        }
    }
}

/// Spawns `iface`'s read loop on its own OS thread, named `tcp-read-<id>`
/// (spec.md §5), reporting exit through `lifecycle`.
pub fn spawn_reader(iface: Interface, lifecycle: Arc<dyn InterfaceLifecycle>) -> thread::JoinHandle<()> {
    let thread_name = format!("tcp-read-{}", iface.id);
    thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            thread_boot(None, ThreadPriority::OSDefault);
            let id = iface.id;
            let result = run_reader(&iface);
            debug!(id, ok = result.is_ok(), "reader thread exiting");
            lifecycle.on_thread_exit(id, result.err().map(|e| e.source));
        })
        .expect("failed to spawn reader thread")
}

/// Spawns `iface`'s write loop on its own OS thread, named `tcp-write-<id>`,
/// blocking `SIGPIPE` first so a half-closed peer surfaces as `EPIPE`
/// rather than terminating the process (spec.md §4.G step 5).
pub fn spawn_writer(iface: Interface, lifecycle: Arc<dyn InterfaceLifecycle>) -> thread::JoinHandle<()> {
    let thread_name = format!("tcp-write-{}", iface.id);
    thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            thread_boot(None, ThreadPriority::OSDefault);
            writer::block_sigpipe();
            let id = iface.id;
            let result = run_writer(&iface);
            debug!(id, ok = result.is_ok(), "writer thread exiting");
            lifecycle.on_thread_exit(id, result.err().map(|e| e.source));
        })
        .expect("failed to spawn writer thread")
}

/// Spawns the correct thread(s) for `iface` based on its direction: a
/// reader for `In`, a writer for `Out`, both for `Both`. `listener-only`
/// (`None`-direction) interfaces aren't spawned here -- see
/// [`server::tcp_server`].
pub fn spawn_interface(iface: Interface, lifecycle: Arc<dyn InterfaceLifecycle>) -> Vec<thread::JoinHandle<()>> {
    use iface::Direction;

    match iface.direction {
        Direction::In => vec![spawn_reader(iface, lifecycle)],
        Direction::Out => vec![spawn_writer(iface, lifecycle)],
        Direction::Both => {
            // A BOTH interface should already have been split into an IN/OUT
            // pair by `Interface::duplicate_pair` before reaching here.
            unreachable!("BOTH interfaces must be split via duplicate_pair before spawning")
        }
        Direction::None => Vec::new(),
    }
}
