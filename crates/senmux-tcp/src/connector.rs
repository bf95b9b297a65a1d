//! Connector (§4.D): resolve, connect, tune, write the preamble -- retrying
//! forever under persist, failing fast otherwise.

use std::net::TcpStream;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ConnectError, ResolveError};
use crate::resolve::resolve;
use crate::tuning::{TuningConfig, apply_tuning};

/// One full connection attempt: resolve `(host, port)`, try every returned
/// address in order, apply tuning and write the preamble on the first one
/// that connects.
fn attempt(
    host: &str,
    port: &str,
    preamble: Option<&[u8]>,
    tuning: &TuningConfig,
) -> Result<TcpStream, ConnectError> {
    let addrs = resolve(host, port, false)?;
    if addrs.is_empty() {
        return Err(ConnectError::AllAddressesFailed(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "getaddrinfo returned no addresses",
        )));
    }

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                apply_tuning(&stream, tuning);
                if let Some(bytes) = preamble {
                    write_preamble(&stream, bytes).map_err(ConnectError::PreambleWrite)?;
                }
                debug!(host, port, %addr, "connected");
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(ConnectError::AllAddressesFailed(
        last_err.unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "no addresses attempted")),
    ))
}

fn write_preamble(stream: &TcpStream, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    (&mut &*stream).write_all(bytes)
}

/// Connects once, blocking and retrying every `retry` until a hard (non-persist)
/// failure or success. Used both for the initial connect and for every
/// coordinator-driven reconnect.
///
/// - `persist = false`: a single attempt; any failure returns immediately.
/// - `persist = true`: loops forever on transient resolve failures (which
///   per spec.md §4.B/§7 include "no name"/"no service", not just the
///   classic "try again" codes -- see `resolve::classify`), on "no addresses
///   yet", and on connect failures, per spec.md §4.D steps 1/3.
pub fn connect(
    host: &str,
    port: &str,
    preamble: Option<&[u8]>,
    tuning: &TuningConfig,
    retry: Duration,
    persist: bool,
) -> Result<TcpStream, ConnectError> {
    loop {
        match attempt(host, port, preamble, tuning) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                let retryable = persist
                    && matches!(
                        &err,
                        ConnectError::Resolve(ResolveError::Transient(_)) | ConnectError::AllAddressesFailed(_)
                    );
                if !retryable {
                    return Err(err);
                }
                warn!(host, port, %err, retry_secs = retry.as_secs(), "connect failed, retrying");
                std::thread::sleep(retry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    #[test]
    fn connects_and_writes_preamble_first() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = thread::spawn(move || {
            use std::io::Read;
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).unwrap();
            buf
        });

        let stream = connect(
            &addr.ip().to_string(),
            &addr.port().to_string(),
            Some(b"HELLO"),
            &TuningConfig::default(),
            Duration::from_millis(10),
            false,
        )
        .unwrap();
        drop(stream);

        assert_eq!(&accept.join().unwrap(), b"HELLO");
    }

    #[test]
    fn non_persist_connect_failure_does_not_retry() {
        // port 0 on a resolved loopback address is never connectable.
        let start = std::time::Instant::now();
        let result = connect(
            "127.0.0.1",
            "1",
            None,
            &TuningConfig::default(),
            Duration::from_secs(5),
            false,
        );
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
