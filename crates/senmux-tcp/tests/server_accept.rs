//! Drives a BOTH-direction server through `init_tcp`/`tcp_server` and real
//! reader/writer threads, checking that an accepted connection is usable in
//! both directions simultaneously (unit tests in `server.rs` only check that
//! the pair's `Direction`s come out right, not that data actually flows).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use senmux_tcp::host::{LoggingHeartbeatScheduler, LoggingLifecycle};
use senmux_tcp::iface::Direction;
use senmux_tcp::init::{InitContext, Initialized, Options, init_tcp};
use senmux_tcp::queue::SenblkQueue;
use senmux_tcp::senblk::Senblk;
use senmux_tcp::server::tcp_server;
use senmux_tcp::{spawn_reader, spawn_writer};

#[test]
fn accepted_both_connection_reads_and_writes_concurrently() {
    let mut opts = Options::new();
    opts.set("mode", "server").set("port", "0");

    let in_queue = Arc::new(SenblkQueue::new(8, None, "server-in"));
    let out_queue = Arc::new(SenblkQueue::new(8, None, "server-out"));
    out_queue.push(Senblk::new(b"SERVER\r\n".to_vec(), 0));
    out_queue.close();

    let ctx = InitContext {
        id: 0x2000,
        name: "both-server-test".into(),
        direction: Direction::Both,
        queue: Some(Arc::clone(&in_queue)),
        filter: None,
        tag: None,
        heartbeat: None,
        lifecycle: Arc::new(LoggingLifecycle),
        heartbeat_scheduler: Arc::new(LoggingHeartbeatScheduler),
    };

    let (listener, config) = match init_tcp(&opts, ctx).unwrap() {
        Initialized::Listener(listener, config) => (listener, config),
        _ => panic!("expected a listener"),
    };
    let addr = listener.local_addr().unwrap();

    let out_queue_for_accept = Arc::clone(&out_queue);
    thread::spawn(move || {
        tcp_server(&config, &listener, move |in_half, out_half| {
            spawn_reader(in_half, Arc::new(LoggingLifecycle));
            // Server's own accept loop has no outbound queue wired in by
            // default (spec.md §1 scope excludes the engine-level router);
            // a host assigns one before spawning, same as here.
            let mut out_half = out_half.expect("BOTH listener always produces a pair");
            out_half.queue = Some(Arc::clone(&out_queue_for_accept));
            spawn_writer(out_half, Arc::new(LoggingLifecycle));
        });
    });

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"CLIENT\r\n").unwrap();

    let mut buf = [0u8; 8];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"SERVER\r\n");

    thread::sleep(Duration::from_millis(50));
    let record = in_queue.next_senblk().unwrap();
    assert_eq!(record.data, b"CLIENT\r\n");
}
