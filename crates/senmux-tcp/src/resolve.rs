//! Address resolver (§4.B): `(host, service)` resolution with transient
//! vs. hard failure classification, via a direct `getaddrinfo` binding so
//! the `EAI_*` code survives (std's resolver erases it).

use std::ffi::{CString, NulError};
use std::mem::{MaybeUninit, size_of};
use std::net::SocketAddr;
use std::os::raw::c_int;
use std::ptr;

use tracing::debug;

use crate::error::ResolveError;

/// Resolves `(host, service)` into every candidate `SocketAddr`, stream-socket,
/// address-family-agnostic hints. `passive` sets `AI_PASSIVE` for servers.
pub fn resolve(host: &str, service: &str, passive: bool) -> Result<Vec<SocketAddr>, ResolveError> {
    let c_host = cstring(host)?;
    let c_service = cstring(service)?;

    let mut hints: libc::addrinfo = unsafe { MaybeUninit::zeroed().assume_init() };
    hints.ai_family = libc::AF_UNSPEC;
    hints.ai_socktype = libc::SOCK_STREAM;
    hints.ai_protocol = libc::IPPROTO_TCP;
    if passive {
        hints.ai_flags |= libc::AI_PASSIVE;
    }

    let mut res: *mut libc::addrinfo = ptr::null_mut();
    let rc = unsafe {
        libc::getaddrinfo(c_host.as_ptr(), c_service.as_ptr(), &hints, &mut res as *mut _)
    };

    if rc != 0 {
        return Err(classify(rc));
    }

    let mut out = Vec::new();
    let mut cur = res;
    while !cur.is_null() {
        unsafe {
            if let Some(addr) = sockaddr_from_raw((*cur).ai_addr, (*cur).ai_addrlen) {
                out.push(addr);
            }
            cur = (*cur).ai_next;
        }
    }
    unsafe { libc::freeaddrinfo(res) };

    debug!(host, service, n = out.len(), "resolved addresses");
    Ok(out)
}

fn cstring(s: &str) -> Result<CString, ResolveError> {
    CString::new(s).map_err(|_: NulError| ResolveError::Hard(libc::EAI_NONAME))
}

fn classify(rc: c_int) -> ResolveError {
    match rc {
        libc::EAI_AGAIN | libc::EAI_FAIL | libc::EAI_NONAME | libc::EAI_SERVICE => ResolveError::Transient(rc),
        _ => ResolveError::Hard(rc),
    }
}

unsafe fn sockaddr_from_raw(
    addr: *mut libc::sockaddr,
    len: libc::socklen_t,
) -> Option<SocketAddr> {
    use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};

    if addr.is_null() {
        return None;
    }

    match unsafe { (*addr).sa_family as c_int } {
        libc::AF_INET if len as usize >= size_of::<libc::sockaddr_in>() => {
            let sin: libc::sockaddr_in = unsafe { ptr::read(addr.cast()) };
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            let port = u16::from_be(sin.sin_port);
            Some(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        libc::AF_INET6 if len as usize >= size_of::<libc::sockaddr_in6>() => {
            let sin6: libc::sockaddr_in6 = unsafe { ptr::read(addr.cast()) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            let port = u16::from_be(sin6.sin6_port);
            Some(SocketAddr::V6(SocketAddrV6::new(ip, port, sin6.sin6_flowinfo, sin6.sin6_scope_id)))
        }
        _ => None,
    }
}
