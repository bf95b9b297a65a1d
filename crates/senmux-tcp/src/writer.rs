//! Writer path (§4.G): dequeue-and-writev loop with outbound tag framing and
//! the coordinator's `reconnect` recovery action.

use std::io::{IoSlice, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::{debug, warn};

use crate::connector;
use crate::error::IoFailure;
use crate::host::TagFormatter;
use crate::queue::SenblkQueue;
use crate::senblk::Senblk;
use crate::shared::{RepairRole, SharedBlock};

const TAG_BUF_LEN: usize = 64;

/// Blocks SIGPIPE on the calling thread so a write to a half-closed socket
/// yields `EPIPE` (an ordinary `io::Error`) instead of terminating the
/// process (spec.md §4.G step 5).
///
/// # Safety
/// `pthread_sigmask` only touches this thread's signal mask; safe to call
/// from any thread, any number of times.
pub fn block_sigpipe() {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGPIPE);
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
    }
}

/// Renders `senblk`'s tag into `buf`, unless `tag` is unset or has already
/// failed once on this connection. A formatter returning 0 is a failure
/// (spec.md §4.G step 1): logged once and latched into `tags_disabled` so
/// every later record on this connection is written data-only instead of
/// retrying (and silently re-failing) the formatter each time.
fn render_tag<'buf>(
    tag: Option<&dyn TagFormatter>,
    iface_id: u32,
    senblk: &Senblk,
    buf: &'buf mut [u8; TAG_BUF_LEN],
    tags_disabled: &mut bool,
) -> Option<&'buf [u8]> {
    let tag = tag?;
    if *tags_disabled {
        return None;
    }
    let len = tag.format(iface_id, senblk, buf);
    if len == 0 {
        warn!(iface_id, "tag formatter failed, disabling tags for the rest of this connection");
        *tags_disabled = true;
        return None;
    }
    Some(&buf[..len])
}

/// Writes tag+payload as one `writev` -- a partial write here is treated as
/// a whole-record failure per spec.md §1's "`writev` either succeeds whole
/// or triggers reconnect".
fn write_record(stream: &TcpStream, tag_bytes: Option<&[u8]>, senblk: &Senblk) -> std::io::Result<()> {
    let slices = if let Some(tag_bytes) = tag_bytes {
        vec![IoSlice::new(tag_bytes), IoSlice::new(&senblk.data)]
    } else {
        vec![IoSlice::new(&senblk.data)]
    };

    // Non-goal (spec.md §1): no partial-write retry within a single record.
    // A short `write_vectored` is treated the same as any other write
    // failure and triggers reconnect.
    let total: usize = slices.iter().map(|s| s.len()).sum();
    let written = (&mut &*stream).write_vectored(&slices)?;
    if written < total {
        return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "short writev, record not fully sent"));
    }
    Ok(())
}

/// Drains `queue` and writes each record directly to `stream`, with no
/// persist-mode recovery: any write failure is returned to the caller.
pub fn write_direct(
    stream: &TcpStream,
    queue: &SenblkQueue,
    tag: Option<&dyn TagFormatter>,
    iface_id: u32,
) -> Result<(), IoFailure> {
    let mut tags_disabled = false;
    while let Some(senblk) = queue.next_senblk() {
        let mut tag_buf = [0u8; TAG_BUF_LEN];
        let tag_bytes = render_tag(tag, iface_id, &senblk, &mut tag_buf, &mut tags_disabled);
        write_record(stream, tag_bytes, &senblk)?;
    }
    Ok(())
}

/// Drains `queue` and writes each record to the persist-mode shared
/// connection, recovering from failure via the coordinator and the
/// `reconnect` action (spec.md §4.G).
pub fn write_tcp(
    shared: &SharedBlock,
    queue: &SenblkQueue,
    tag: Option<&dyn TagFormatter>,
    iface_id: u32,
) -> Result<(), IoFailure> {
    let mut tags_disabled = false;
    while let Some(senblk) = queue.next_senblk() {
        let mut tag_buf = [0u8; TAG_BUF_LEN];
        let tag_bytes = render_tag(tag, iface_id, &senblk, &mut tag_buf, &mut tags_disabled);
        loop {
            let Some(stream) = shared.enter_io() else {
                return Err(dead_connection());
            };

            match write_record(&stream, tag_bytes, &senblk) {
                Ok(()) => {
                    shared.leave_io_ok();
                    break;
                }
                Err(err) => {
                    let was_send_timeout = err.kind() == std::io::ErrorKind::WouldBlock;
                    warn!(host = %shared.host, port = %shared.port, %err, "write failed, entering coordinator");

                    let role = shared.leave_io_fail(|| {
                        if !was_send_timeout {
                            std::thread::sleep(shared.retry);
                        }
                        let new_stream = connector::connect(
                            &shared.host,
                            &shared.port,
                            shared.preamble.as_deref(),
                            &shared.tuning,
                            shared.retry,
                            true,
                        )
                        .ok();
                        if new_stream.is_some() {
                            queue.flush();
                        }
                        new_stream
                    });

                    match role {
                        RepairRole::GiveUp => return Err(dead_connection()),
                        RepairRole::Repair => {
                            debug!(host = %shared.host, port = %shared.port, "reconnected, record considered lost");
                            break;
                        }
                        RepairRole::WaitForPeer => continue,
                    }
                }
            }
        }
    }
    Ok(())
}

fn dead_connection() -> IoFailure {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "connection is down").into()
}
