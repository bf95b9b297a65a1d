//! Manual exercising harness for `senmux-tcp` (SPEC_FULL §4.N): maps a small
//! set of CLI flags onto the same `Options` bag `init_tcp` consumes, so this
//! binary never duplicates option semantics.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use senmux_tcp::host::{LoggingHeartbeatScheduler, LoggingLifecycle};
use senmux_tcp::iface::Direction;
use senmux_tcp::init::{InitContext, Initialized, Options, init_tcp};
use senmux_tcp::queue::SenblkQueue;
use senmux_tcp::server::tcp_server;
use senmux_tcp::{spawn_interface, spawn_reader, spawn_writer};

#[derive(Parser, Debug)]
#[command(name = "senmux-tcp-demo", about = "Exercises the TCP transport core standalone")]
struct Args {
    #[arg(long, default_value = "client")]
    mode: String,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    persist: bool,
    #[arg(long)]
    ipersist: bool,
    /// Accepts a human duration ("5s", "1m") in addition to plain seconds.
    #[arg(long)]
    retry: Option<String>,
    #[arg(long)]
    preamble: Option<String>,
    #[arg(long)]
    gpsd: bool,
    #[arg(long, default_value_t = true)]
    nodelay: bool,
    #[arg(long, default_value_t = false)]
    both: bool,
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let mut opts = Options::new();
    opts.set("mode", args.mode.clone());
    if let Some(address) = &args.address {
        opts.set("address", address.clone());
    }
    if let Some(port) = &args.port {
        opts.set("port", port.clone());
    }
    if args.persist {
        opts.set("persist", "yes");
    }
    if args.ipersist {
        opts.set("ipersist", "yes");
    }
    if let Some(retry) = &args.retry {
        let secs = humantime::parse_duration(retry).map(|d| d.as_secs()).unwrap_or_else(|_| {
            retry.parse().unwrap_or_else(|_| panic!("--retry must be a duration or a positive integer of seconds"))
        });
        opts.set("retry", secs.to_string());
    }
    if let Some(preamble) = &args.preamble {
        opts.set("preamble", preamble.clone());
    }
    if args.gpsd {
        opts.set("gpsd", "yes");
    }
    opts.set("nodelay", if args.nodelay { "yes" } else { "no" });

    let direction = if args.both { Direction::Both } else { Direction::Out };
    let queue = Arc::new(SenblkQueue::new(256, None, "demo"));
    let ctx = InitContext {
        id: 1,
        name: "demo".into(),
        direction,
        queue: Some(queue),
        filter: None,
        tag: None,
        heartbeat: None,
        lifecycle: Arc::new(LoggingLifecycle),
        heartbeat_scheduler: Arc::new(LoggingHeartbeatScheduler),
    };

    match init_tcp(&opts, ctx) {
        Ok(Initialized::Single(iface)) => {
            let handles = spawn_interface(iface, Arc::new(LoggingLifecycle));
            for handle in handles {
                let _ = handle.join();
            }
        }
        Ok(Initialized::Pair(in_half, out_half)) => {
            let reader = spawn_reader(in_half, Arc::new(LoggingLifecycle));
            let writer = spawn_writer(out_half, Arc::new(LoggingLifecycle));
            let _ = reader.join();
            let _ = writer.join();
        }
        Ok(Initialized::Listener(listener, config)) => {
            tcp_server(&config, &listener, |iface, pair| {
                let lifecycle = Arc::new(LoggingLifecycle);
                if iface.direction == Direction::Both {
                    unreachable!("server config splits BOTH connections before this callback runs");
                }
                let _ = spawn_interface(iface, Arc::clone(&lifecycle));
                if let Some(pair) = pair {
                    let _ = spawn_interface(pair, lifecycle);
                }
            });
        }
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    }

    // Keep the process alive briefly after a client connection exits so log
    // lines flush before the binary returns -- this is a demo convenience,
    // not part of the transport core.
    std::thread::sleep(Duration::from_millis(50));
}
