//! Socket tuning (§4.C): keepalive, send timeout/buffer, Nagle disable.
//! Applied after every successful connect and, for persist interfaces whose
//! initial connect succeeded, once more at initialization.

use std::net::TcpStream;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tracing::warn;

/// Tri-state keepalive knob: unset leaves the OS default alone.
#[derive(Debug, Clone, Copy, Default)]
pub enum Keepalive {
    #[default]
    Unset,
    Disabled,
    Enabled,
}

/// All tuning knobs the `keepalive`/`timeout`/`sndbuf`/`nodelay` options map to.
#[derive(Debug, Clone, Default)]
pub struct TuningConfig {
    pub keepalive: Keepalive,
    pub keepidle: Option<Duration>,
    pub keepintvl: Option<Duration>,
    pub keepcnt: Option<u32>,
    pub send_timeout: Option<Duration>,
    pub sndbuf: Option<usize>,
    pub nodelay: bool,
}

/// Applies `cfg` to `stream`. Each option is independent: a failure on one
/// is logged and does not prevent the others from being attempted, per
/// spec.md §4.C ("failures to set individual tuning options are logged but
/// do not fail the connection") and the re-derived intent behind the
/// source's `establish_keepalive` bug (DESIGN.md Open Question 2).
pub fn apply_tuning(stream: &TcpStream, cfg: &TuningConfig) {
    let sock = SockRef::from(stream);

    if matches!(cfg.keepalive, Keepalive::Enabled) {
        let mut ka = TcpKeepalive::new();
        if let Some(idle) = cfg.keepidle {
            ka = ka.with_time(idle);
        }
        if let Some(intvl) = cfg.keepintvl {
            ka = ka.with_interval(intvl);
        }
        if let Some(cnt) = cfg.keepcnt {
            ka = ka.with_retries(cnt);
        }
        if let Err(err) = sock.set_tcp_keepalive(&ka) {
            warn!(?err, "couldn't set SO_KEEPALIVE/keepalive tuning");
        }
    } else if matches!(cfg.keepalive, Keepalive::Disabled) {
        if let Err(err) = sock.set_keepalive(false) {
            warn!(?err, "couldn't clear SO_KEEPALIVE");
        }
    }

    if let Some(timeout) = cfg.send_timeout
        && timeout > Duration::ZERO
    {
        if let Err(err) = sock.set_write_timeout(Some(timeout)) {
            warn!(?err, "couldn't set SO_SNDTIMEO");
        }
        if let Some(sndbuf) = cfg.sndbuf
            && let Err(err) = sock.set_send_buffer_size(sndbuf)
        {
            warn!(?err, "couldn't set SO_SNDBUF");
        }
    }

    if cfg.nodelay
        && let Err(err) = sock.set_nodelay(true)
    {
        warn!(?err, "couldn't set TCP_NODELAY");
    }
}
