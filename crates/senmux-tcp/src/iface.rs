//! Interface record (§3): identity, direction, transport state and the
//! collaborator handles a reader/writer thread needs. `ifdup` is realized as
//! [`Interface::duplicate_pair`], which is what the accept loop (§4.H) and a
//! BOTH client's initializer (§4.I) both call to split one connection into
//! an IN/OUT pair.

use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;

use crate::host::{Filter, TagFormatter};
use crate::queue::SenblkQueue;
use crate::shared::SharedBlock;

/// Which way records flow through this interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Both,
    /// Set on a listener to tell the accept loop (§4.H) to stop.
    None,
}

bitflags! {
    /// Per-interface flags (spec.md §3); only PERSIST and IPERSIST are
    /// modeled here, the rest of the source's flag word belongs to
    /// transports and collaborators this core doesn't implement.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InterfaceFlags: u8 {
        /// Lost connections are transparently recovered by the coordinator.
        const PERSIST  = 0b01;
        /// A failed initial connect arms a deferred-connect entry point
        /// instead of failing the interface outright.
        const IPERSIST = 0b10;
    }
}

/// The `if_tcp` union realized as an enum: non-persist interfaces own their
/// descriptor directly, persist ones hold a share of the reconnect
/// coordinator instead.
pub enum Transport {
    Direct(TcpStream),
    Persist(Arc<SharedBlock>),
}

impl Transport {
    /// `ifdup_tcp`: duplicate the descriptor (by `dup`, here `try_clone`) or
    /// bump the shared block's refcount, matching whichever variant holds.
    pub fn try_clone(&self) -> std::io::Result<Transport> {
        match self {
            Transport::Direct(stream) => Ok(Transport::Direct(stream.try_clone()?)),
            Transport::Persist(shared) => Ok(Transport::Persist(Arc::clone(shared))),
        }
    }

    #[must_use]
    pub fn shared(&self) -> Option<&Arc<SharedBlock>> {
        match self {
            Transport::Direct(_) => None,
            Transport::Persist(shared) => Some(shared),
        }
    }
}

/// Bookkeeping for the other half of a BOTH pair: just enough to log which
/// interface this one is coupled to. The descriptor/shared-block coupling
/// itself lives in `Transport`, not here.
#[derive(Debug, Clone, Copy)]
pub struct PairHandle {
    pub peer_id: u32,
}

/// One direction of one connection. A BOTH interface is represented as two
/// `Interface` values, each with `direction` set to `In`/`Out` and `pair`
/// pointing at the other (§3's "pointer to a pair interface").
pub struct Interface {
    pub id: u32,
    pub name: String,
    pub direction: Direction,
    pub flags: InterfaceFlags,
    pub pair: Option<PairHandle>,
    pub transport: Transport,
    /// The writer drains this (§3: "outbound only"); the reader pushes into
    /// it instead -- in a full multiplexer an IN interface's records fan out
    /// to other interfaces' queues via the engine's router, which is out of
    /// scope here, so this one queue plays both roles depending on
    /// `direction` (see `DESIGN.md`).
    pub queue: Option<Arc<SenblkQueue>>,
    pub filter: Option<Arc<dyn Filter>>,
    pub tag: Option<Arc<dyn TagFormatter>>,
    pub heartbeat: Option<Duration>,
}

impl Interface {
    #[must_use]
    pub fn is_persist(&self) -> bool {
        self.flags.contains(InterfaceFlags::PERSIST)
    }

    #[must_use]
    pub fn is_initial_persist(&self) -> bool {
        self.flags.contains(InterfaceFlags::IPERSIST)
    }

    /// `ifdup`: splits a BOTH interface into an IN/OUT pair sharing one
    /// transport, each pointing at the other via `pair`. `in_queue` is the
    /// (possibly engine-wide) queue the IN half feeds; `out_queue` is what
    /// the OUT half drains.
    ///
    /// Panics if `self.direction` is not `Both` -- splitting any other
    /// direction is a caller bug, not a runtime condition (§7: internal
    /// invariant violations use `safe_panic!` elsewhere; this one is cheap
    /// enough to check directly since it's not on a hot path).
    pub fn duplicate_pair(
        &self,
        in_id: u32,
        out_id: u32,
        in_queue: Option<Arc<SenblkQueue>>,
        out_queue: Option<Arc<SenblkQueue>>,
    ) -> std::io::Result<(Interface, Interface)> {
        assert_eq!(self.direction, Direction::Both, "duplicate_pair called on a non-BOTH interface");

        let in_transport = self.transport.try_clone()?;
        let out_transport = self.transport.try_clone()?;

        let in_half = Interface {
            id: in_id,
            name: self.name.clone(),
            direction: Direction::In,
            flags: self.flags,
            pair: Some(PairHandle { peer_id: out_id }),
            transport: in_transport,
            queue: in_queue,
            filter: self.filter.as_ref().map(|f| f.clone_box()),
            tag: self.tag.clone(),
            heartbeat: self.heartbeat,
        };
        let out_half = Interface {
            id: out_id,
            name: self.name.clone(),
            direction: Direction::Out,
            flags: self.flags,
            pair: Some(PairHandle { peer_id: in_id }),
            transport: out_transport,
            queue: out_queue,
            filter: self.filter.as_ref().map(|f| f.clone_box()),
            tag: self.tag.clone(),
            heartbeat: self.heartbeat,
        };
        Ok((in_half, out_half))
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn direct_pair() -> Interface {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _accept = std::thread::spawn(move || listener.accept().unwrap());
        let stream = TcpStream::connect(addr).unwrap();
        Interface {
            id: 1,
            name: "test".into(),
            direction: Direction::Both,
            flags: InterfaceFlags::empty(),
            pair: None,
            transport: Transport::Direct(stream),
            queue: None,
            filter: None,
            tag: None,
            heartbeat: None,
        }
    }

    #[test]
    fn duplicate_pair_yields_in_and_out_pointing_at_each_other() {
        let iface = direct_pair();
        let (in_half, out_half) = iface.duplicate_pair(2, 3, None, None).unwrap();
        assert_eq!(in_half.direction, Direction::In);
        assert_eq!(out_half.direction, Direction::Out);
        assert_eq!(in_half.pair.unwrap().peer_id, 3);
        assert_eq!(out_half.pair.unwrap().peer_id, 2);
    }

    #[test]
    #[should_panic(expected = "non-BOTH")]
    fn duplicate_pair_rejects_non_both() {
        let mut iface = direct_pair();
        iface.direction = Direction::In;
        let _ = iface.duplicate_pair(2, 3, None, None);
    }
}
