//! Initializer (§4.I): case-insensitive `(var, val)` option parsing, initial
//! connect/bind, and deferred-connect arming for `IPERSIST`.

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::ConfigError;
use crate::host::{Filter, HeartbeatScheduler, InterfaceLifecycle, PassFilter, TagFormatter};
use crate::iface::{Direction, Interface, InterfaceFlags, Transport};
use crate::preamble::{GPSD_WATCH, parse_preamble};
use crate::queue::SenblkQueue;
use crate::resolve::resolve;
use crate::server::ServerConfig;
use crate::shared::SharedBlock;
use crate::connector;
use crate::tuning::{Keepalive, TuningConfig};

/// Default service name/port, mirroring spec.md §4.I's "implementation-defined string".
const DEFAULT_SERVICE: &str = "10110";
const GPSD_PORT: &str = "2947";

/// Case-insensitive `(var, val)` option bag, as supplied by the host
/// (spec.md §6 "a sequence of `(var, val)` pairs").
#[derive(Debug, Clone, Default)]
pub struct Options {
    values: HashMap<String, String>,
}

impl Options {
    #[must_use]
    pub fn new() -> Self {
        Options::default()
    }

    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

const KNOWN_OPTIONS: &[&str] = &[
    "address", "mode", "port", "persist", "ipersist", "retry", "keepalive", "keepidle", "keepintvl", "keepcnt",
    "timeout", "sndbuf", "nodelay", "preamble", "gpsd",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Client,
    Server,
}

struct Parsed {
    mode: Mode,
    address: Option<String>,
    port: String,
    persist: bool,
    ipersist: bool,
    retry: Duration,
    tuning: TuningConfig,
    preamble: Option<Vec<u8>>,
}

fn parse_bool(value: &str, option: &'static str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue { option, value: value.to_string() }),
    }
}

fn parse_positive_u64(value: &str, option: &'static str) -> Result<u64, ConfigError> {
    value
        .parse::<u64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ConfigError::InvalidValue { option, value: value.to_string() })
}

fn parse_positive_usize(value: &str, option: &'static str) -> Result<usize, ConfigError> {
    value
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ConfigError::InvalidValue { option, value: value.to_string() })
}

fn require(opts: &Options, option: &'static str, persist: bool) -> Result<Option<&str>, ConfigError> {
    match opts.get(option) {
        Some(v) if !persist => Err(ConfigError::RequiresPersist(option)),
        other => Ok(other),
    }
}

/// Validates `opts` against spec.md §4.I's table and produces the typed
/// fields `init_tcp` needs. Unknown keys and PERSIST-gated options supplied
/// without PERSIST are rejected before anything else is attempted.
fn parse_options(opts: &Options) -> Result<Parsed, ConfigError> {
    for key in opts.keys() {
        if !KNOWN_OPTIONS.contains(&key) {
            return Err(ConfigError::UnknownOption(key.to_string()));
        }
    }

    let mode = match opts.get("mode") {
        None | Some("client") => Mode::Client,
        Some("server") => Mode::Server,
        Some(other) => return Err(ConfigError::InvalidValue { option: "mode", value: other.to_string() }),
    };

    let persist = opts.get("persist").map(|v| parse_bool(v, "persist")).transpose()?.unwrap_or(false);
    let ipersist = opts.get("ipersist").map(|v| parse_bool(v, "ipersist")).transpose()?.unwrap_or(false);
    if ipersist && !persist {
        return Err(ConfigError::RequiresPersist("ipersist"));
    }

    let gpsd = opts.get("gpsd").map(|v| parse_bool(v, "gpsd")).transpose()?.unwrap_or(false);
    let preamble_opt = opts.get("preamble");
    if gpsd && preamble_opt.is_some() {
        return Err(ConfigError::PreambleAndGpsd);
    }
    if mode == Mode::Server && (gpsd || preamble_opt.is_some()) {
        return Err(ConfigError::InvalidValue {
            option: "preamble",
            value: "client only".to_string(),
        });
    }

    let preamble = if gpsd {
        Some(parse_preamble(GPSD_WATCH)?)
    } else if let Some(raw) = preamble_opt {
        Some(parse_preamble(raw)?)
    } else {
        None
    };

    let address = match opts.get("address") {
        Some(a) => Some(a.to_string()),
        None if mode == Mode::Client => return Err(ConfigError::MissingAddress),
        None => None,
    };

    let port = match opts.get("port") {
        Some(p) => p.to_string(),
        None if gpsd => GPSD_PORT.to_string(),
        None => DEFAULT_SERVICE.to_string(),
    };

    let retry_secs = require(opts, "retry", persist)?.map(|v| parse_positive_u64(v, "retry")).transpose()?.unwrap_or(5);

    let keepalive = if persist {
        match opts.get("keepalive") {
            Some(v) if parse_bool(v, "keepalive")? => Keepalive::Enabled,
            Some(_) => Keepalive::Disabled,
            None => Keepalive::Enabled, // "PERSIST defaults: keepalive=yes"
        }
    } else if opts.get("keepalive").is_some() {
        return Err(ConfigError::RequiresPersist("keepalive"));
    } else {
        Keepalive::Unset
    };

    let keepidle = opts.get("keepidle").map(|v| parse_positive_u64(v, "keepidle")).transpose()?.map(Duration::from_secs);
    let keepintvl =
        opts.get("keepintvl").map(|v| parse_positive_u64(v, "keepintvl")).transpose()?.map(Duration::from_secs);
    let keepcnt = opts.get("keepcnt").map(|v| parse_positive_u64(v, "keepcnt")).transpose()?.map(|n| n as u32);

    let send_timeout =
        require(opts, "timeout", persist)?.map(|v| parse_positive_u64(v, "timeout")).transpose()?.map(Duration::from_secs);
    let sndbuf = require(opts, "sndbuf", persist)?.map(|v| parse_positive_usize(v, "sndbuf")).transpose()?;

    let nodelay = opts.get("nodelay").map(|v| parse_bool(v, "nodelay")).transpose()?.unwrap_or(true);

    Ok(Parsed {
        mode,
        address,
        port,
        persist,
        ipersist,
        retry: Duration::from_secs(retry_secs),
        tuning: TuningConfig { keepalive, keepidle, keepintvl, keepcnt, send_timeout, sndbuf, nodelay },
        preamble,
    })
}

/// What `init_tcp` produces: a client ready to read/write immediately, a
/// client whose connect is deferred to first use (`IPERSIST`), or the
/// listener a caller should drive with [`crate::server::tcp_server`].
pub enum Initialized {
    Single(Interface),
    Pair(Interface, Interface),
    Listener(TcpListener, ServerConfig),
}

/// Shared construction inputs that have nothing to do with the option table
/// (identity and host-collaborator wiring).
pub struct InitContext {
    pub id: u32,
    pub name: String,
    pub direction: Direction,
    pub queue: Option<Arc<SenblkQueue>>,
    pub filter: Option<Arc<dyn Filter>>,
    pub tag: Option<Arc<dyn TagFormatter>>,
    pub heartbeat: Option<Duration>,
    pub lifecycle: Arc<dyn InterfaceLifecycle>,
    pub heartbeat_scheduler: Arc<dyn HeartbeatScheduler>,
}

/// `init_tcp`: validates `opts`, then either binds a listener (server mode)
/// or resolves+connects (client mode), arming deferred connect when the
/// initial attempt fails and `IPERSIST` is set.
pub fn init_tcp(opts: &Options, ctx: InitContext) -> Result<Initialized, ConfigError> {
    let parsed = parse_options(opts)?;

    match parsed.mode {
        Mode::Server => init_server(&parsed, ctx),
        Mode::Client => init_client(&parsed, ctx),
    }
}

fn init_server(parsed: &Parsed, ctx: InitContext) -> Result<Initialized, ConfigError> {
    let addrs = resolve("0.0.0.0", &parsed.port, true)
        .map_err(|err| ConfigError::InvalidValue { option: "port", value: err.to_string() })?;
    let addr = addrs
        .into_iter()
        .next()
        .ok_or_else(|| ConfigError::InvalidValue { option: "port", value: parsed.port.clone() })?;
    let listener = TcpListener::bind(addr)
        .map_err(|err| ConfigError::InvalidValue { option: "address", value: err.to_string() })?;

    let config = ServerConfig {
        listener_id: ctx.id,
        name: ctx.name,
        direction: ctx.direction,
        in_queue: ctx.queue,
        filter: ctx.filter,
        tag: ctx.tag,
        heartbeat: ctx.heartbeat,
        lifecycle: ctx.lifecycle,
        heartbeat_scheduler: ctx.heartbeat_scheduler,
    };
    Ok(Initialized::Listener(listener, config))
}

fn init_client(parsed: &Parsed, ctx: InitContext) -> Result<Initialized, ConfigError> {
    let host = parsed.address.clone().ok_or(ConfigError::MissingAddress)?;

    let filter = ctx.filter.unwrap_or_else(|| Arc::new(PassFilter));

    if !parsed.persist {
        let stream = connector::connect(&host, &parsed.port, parsed.preamble.as_deref(), &parsed.tuning, parsed.retry, false)
            .map_err(|err| ConfigError::InvalidValue { option: "address", value: err.to_string() })?;

        let iface = Interface {
            id: ctx.id,
            name: ctx.name,
            direction: ctx.direction,
            flags: InterfaceFlags::empty(),
            pair: None,
            transport: Transport::Direct(stream),
            queue: ctx.queue,
            filter: Some(filter),
            tag: ctx.tag,
            heartbeat: ctx.heartbeat,
        };
        return finish_single_or_pair(iface);
    }

    let mut flags = InterfaceFlags::PERSIST;
    if parsed.ipersist {
        flags |= InterfaceFlags::IPERSIST;
    }

    let initial = connector::connect(&host, &parsed.port, parsed.preamble.as_deref(), &parsed.tuning, parsed.retry, false);
    let initial_stream = match initial {
        Ok(stream) => Some(stream),
        Err(err) if parsed.ipersist => {
            warn!(%host, port = %parsed.port, %err, "initial connect failed, arming deferred connect");
            None
        }
        Err(err) => return Err(ConfigError::InvalidValue { option: "address", value: err.to_string() }),
    };

    let shared = Arc::new(SharedBlock::new(
        host,
        parsed.port.clone(),
        parsed.preamble.clone(),
        parsed.retry,
        parsed.tuning.clone(),
        initial_stream,
    ));

    let iface = Interface {
        id: ctx.id,
        name: ctx.name,
        direction: ctx.direction,
        flags,
        pair: None,
        transport: Transport::Persist(shared),
        queue: ctx.queue,
        filter: Some(filter),
        tag: ctx.tag,
        heartbeat: ctx.heartbeat,
    };
    finish_single_or_pair(iface)
}

fn finish_single_or_pair(iface: Interface) -> Result<Initialized, ConfigError> {
    if iface.direction != Direction::Both {
        return Ok(Initialized::Single(iface));
    }
    let in_id = iface.id;
    let out_id = iface.id | 0x8000_0000;
    let out_queue = iface.queue.clone();
    let (in_half, out_half) = iface
        .duplicate_pair(in_id, out_id, iface.queue.clone(), out_queue)
        .map_err(|err| ConfigError::InvalidValue { option: "address", value: err.to_string() })?;
    Ok(Initialized::Pair(in_half, out_half))
}
