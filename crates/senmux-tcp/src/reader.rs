//! Reader path (§4.F): blocking read loop with the persist-mode recovery
//! action named `reread` in the source -- probe the dead descriptor
//! non-blockingly before paying for a full reconnect.

use std::io::Read;
use std::net::TcpStream;

use tracing::debug;

use crate::connector;
use crate::error::IoFailure;
use crate::shared::{RepairRole, SharedBlock};

/// Result of the non-blocking probe `reread` performs on the descriptor
/// that just failed, before deciding whether a full reconnect is needed.
enum ProbeOutcome {
    Data(usize),
    WouldBlock,
    Dead,
}

/// Flips `stream` to non-blocking, attempts one read into `buf`, and always
/// restores blocking mode before returning -- "the non-blocking probe exists
/// so the repairing thread does not hold the mutex across a long blocking
/// read" (spec.md §4.F).
fn reread_probe(stream: &TcpStream, buf: &mut [u8]) -> ProbeOutcome {
    if stream.set_nonblocking(true).is_err() {
        return ProbeOutcome::Dead;
    }
    let outcome = match stream.try_clone().and_then(|mut s| s.read(buf)) {
        Ok(0) => ProbeOutcome::Dead,
        Ok(n) => ProbeOutcome::Data(n),
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => ProbeOutcome::WouldBlock,
        Err(_) => ProbeOutcome::Dead,
    };
    let _ = stream.set_nonblocking(false);
    outcome
}

/// Reads into `buf` from a non-persist descriptor: one attempt, no retry.
/// EOF is reported as `Ok(0)`; the caller's frame driver (out of scope here)
/// treats that as connection close.
pub fn read_direct(stream: &TcpStream, buf: &mut [u8]) -> Result<usize, IoFailure> {
    Ok((&mut &*stream).read(buf)?)
}

/// Reads into `buf` from a persist-mode shared connection, recovering from
/// failure via the coordinator and the `reread` action, and looping until a
/// positive-length read or a fatal give-up (spec.md §4.F).
pub fn read_tcp(shared: &SharedBlock, buf: &mut [u8]) -> Result<usize, IoFailure> {
    loop {
        let Some(stream) = shared.enter_io() else {
            return Err(dead_connection());
        };

        match stream.read(buf) {
            Ok(n) if n > 0 => {
                shared.leave_io_ok();
                return Ok(n);
            }
            read_result => {
                debug!(host = %shared.host, port = %shared.port, ?read_result, "read failed or hit EOF, entering coordinator");
                let mut reread_bytes = None;
                let role = shared.leave_io_fail(|| match reread_probe(&stream, buf) {
                    ProbeOutcome::Data(n) => {
                        reread_bytes = Some(n);
                        stream.try_clone().ok()
                    }
                    ProbeOutcome::WouldBlock => stream.try_clone().ok(),
                    ProbeOutcome::Dead => connector::connect(
                        &shared.host,
                        &shared.port,
                        shared.preamble.as_deref(),
                        &shared.tuning,
                        shared.retry,
                        true,
                    )
                    .ok(),
                });

                if let Some(n) = reread_bytes {
                    return Ok(n);
                }
                match role {
                    RepairRole::GiveUp => return Err(dead_connection()),
                    // This thread performed the reread/reconnect itself (either
                    // a non-blocking probe that found nothing, or a full
                    // reconnect): report 0 bytes and let the caller's loop
                    // issue the next real read, rather than blocking again
                    // inside this call (spec.md §4.F, DESIGN.md Open Question 4).
                    RepairRole::Repair => return Ok(0),
                    // The peer performed the repair; the new connection is
                    // already installed, so just retry our own read normally.
                    RepairRole::WaitForPeer => continue,
                }
            }
        }
    }
}

fn dead_connection() -> IoFailure {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "connection is down").into()
}
