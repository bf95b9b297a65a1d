//! Server accept loop (§4.H): listen, accept, spin up a fresh interface
//! (optionally a BOTH pair) per connection.

use std::net::{TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use socket2::SockRef;
use tracing::{error, info};

use crate::host::{Filter, HeartbeatScheduler, InterfaceLifecycle, TagFormatter};
use crate::iface::{Direction, Interface, InterfaceFlags, Transport};
use crate::queue::SenblkQueue;

const BACKLOG: i32 = 5;
/// Low bits of the accepted socket's fd OR'd into the listener id to
/// disambiguate per-connection interfaces spawned from the same listener
/// (spec.md §4.H: "low bits OR'd with fd & IDMINORMASK").
const IDMINORMASK: u32 = 0xFFF;

/// Everything a listener needs to construct accepted interfaces: the shared
/// inbound queue (all accepted connections' reads fan into one queue, per
/// spec.md §4.H), filters/tags to clone, and the collaborator objects to
/// invoke per-interface.
pub struct ServerConfig {
    pub listener_id: u32,
    pub name: String,
    pub direction: Direction,
    pub in_queue: Option<Arc<SenblkQueue>>,
    pub filter: Option<Arc<dyn Filter>>,
    pub tag: Option<Arc<dyn TagFormatter>>,
    pub heartbeat: Option<Duration>,
    pub lifecycle: Arc<dyn InterfaceLifecycle>,
    pub heartbeat_scheduler: Arc<dyn HeartbeatScheduler>,
}

/// Runs the accept loop on the calling thread until `direction` is set to
/// `None` (spec.md §5: "server termination is driven by setting the
/// listener's direction = NONE; in-flight accept is not interrupted").
///
/// `on_accept` is invoked for each successfully constructed interface (or
/// pair); this is where the caller spawns the reader/writer threads, since
/// thread bodies need the rest of the host's dispatch (`do_read`) that this
/// crate doesn't own.
pub fn tcp_server<F>(config: &ServerConfig, listener: &TcpListener, mut on_accept: F)
where
    F: FnMut(Interface, Option<Interface>),
{
    loop {
        if config.direction == Direction::None {
            info!(name = %config.name, "listener direction is NONE, stopping accept loop");
            return;
        }

        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(err) => {
                error!(name = %config.name, %err, "accept failed");
                continue;
            }
        };

        if let Err(err) = SockRef::from(&stream).set_nodelay(true) {
            tracing::warn!(%err, "couldn't set TCP_NODELAY on accepted socket");
        }

        let minor = (stream.as_raw_fd() as u32) & IDMINORMASK;
        let id = (config.listener_id & !IDMINORMASK) | minor;
        info!(name = %config.name, %peer, id, "accepted connection");

        let (iface, pair) = spawn_accepted(config, id, stream);
        config.lifecycle.on_initialized(&iface);
        if let Some(period) = config.heartbeat {
            config.heartbeat_scheduler.schedule(id, period);
        }
        on_accept(iface, pair);
    }
}

fn spawn_accepted(config: &ServerConfig, id: u32, stream: TcpStream) -> (Interface, Option<Interface>) {
    let direction = if config.direction == Direction::Both { Direction::Both } else { config.direction };

    let base = Interface {
        id,
        name: config.name.clone(),
        direction,
        // Accepted interfaces never carry PERSIST: reconnection is a
        // client-mode concept (spec.md §4.H: "has no shared block").
        flags: InterfaceFlags::empty(),
        pair: None,
        transport: Transport::Direct(stream),
        queue: config.in_queue.clone(),
        filter: config.filter.as_ref().map(|f| f.clone_box()),
        tag: config.tag.clone(),
        heartbeat: config.heartbeat,
    };

    if direction != Direction::Both {
        return (base, None);
    }

    let out_id = id.wrapping_add(1) | 0x8000_0000;
    match base.duplicate_pair(id, out_id, config.in_queue.clone(), None) {
        Ok((in_half, out_half)) => (in_half, Some(out_half)),
        Err(err) => {
            error!(%err, "couldn't duplicate accepted connection into an IN/OUT pair");
            (base, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::host::{LoggingHeartbeatScheduler, LoggingLifecycle, PassFilter};

    #[test]
    fn accepted_both_connection_is_split_into_a_pair() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let accepted = Arc::new(Mutex::new(Vec::new()));
        let accepted2 = Arc::clone(&accepted);
        let stop_after = AtomicUsize::new(1);

        let config = ServerConfig {
            listener_id: 0x1000,
            name: "test-listener".into(),
            direction: Direction::Both,
            in_queue: Some(Arc::new(SenblkQueue::new(8, Some(Arc::new(PassFilter)), "in"))),
            filter: Some(Arc::new(PassFilter)),
            tag: None,
            heartbeat: None,
            lifecycle: Arc::new(LoggingLifecycle),
            heartbeat_scheduler: Arc::new(LoggingHeartbeatScheduler),
        };

        let server = std::thread::spawn(move || {
            let mut count = 0;
            tcp_server(
                &ServerConfig {
                    listener_id: config.listener_id,
                    name: config.name.clone(),
                    direction: config.direction,
                    in_queue: config.in_queue.clone(),
                    filter: config.filter.as_ref().map(|f| f.clone_box()),
                    tag: config.tag.clone(),
                    heartbeat: config.heartbeat,
                    lifecycle: Arc::clone(&config.lifecycle),
                    heartbeat_scheduler: Arc::clone(&config.heartbeat_scheduler),
                },
                &listener,
                |iface, pair| {
                    accepted2.lock().unwrap().push((iface.direction, pair.map(|p| p.direction)));
                    count += 1;
                    if count >= stop_after.load(Ordering::Relaxed) {
                        // Real termination goes through `direction = NONE`; the
                        // test just needs the handler to fire once.
                    }
                },
            );
        });

        let _client = TcpStream::connect(addr).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        // Listener keeps looping forever in this test (as real servers do);
        // we only assert on what the one accepted connection produced.
        drop(server);

        let got = accepted.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0], (Direction::In, Some(Direction::Out)));
    }
}
