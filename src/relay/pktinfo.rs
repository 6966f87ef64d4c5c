//! Per-datagram control metadata on Linux.
//!
//! `IP_PKTINFO` / `IPV6_RECVPKTINFO` report the destination address the
//! datagram was sent to and the arrival interface. Without it a socket bound
//! to a port can be handed traffic for other groups on that port.

use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, RawFd};
use std::ptr;

use libc::{c_int, c_void, socklen_t};
use socket2::Socket;

use super::session::Datagram;

/// Room for pktinfo + ttl/hoplimit messages, u64 for cmsghdr alignment
const CONTROL_WORDS: usize = 16;

/// Ask the kernel to attach destination, interface and TTL to each datagram.
pub fn enable(socket: &Socket, group: IpAddr) -> io::Result<()> {
    let fd = socket.as_raw_fd();
    match group {
        IpAddr::V4(_) => {
            set_flag(fd, libc::IPPROTO_IP, libc::IP_PKTINFO)?;
            set_flag(fd, libc::IPPROTO_IP, libc::IP_RECVTTL)
        }
        IpAddr::V6(_) => {
            set_flag(fd, libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO)?;
            set_flag(fd, libc::IPPROTO_IPV6, libc::IPV6_RECVHOPLIMIT)
        }
    }
}

fn set_flag(fd: RawFd, level: c_int, name: c_int) -> io::Result<()> {
    let on: c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &on as *const c_int as *const c_void,
            mem::size_of::<c_int>() as socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Non-blocking `recvmsg` that fills `buf` and decodes the control messages.
/// Returns `WouldBlock` when nothing is queued.
pub fn recv_with_metadata(fd: RawFd, buf: &mut [u8]) -> io::Result<Datagram> {
    let mut name: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut c_void,
        iov_len: buf.len(),
    };
    let mut control = [0u64; CONTROL_WORDS];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = &mut name as *mut libc::sockaddr_storage as *mut c_void;
    msg.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut c_void;
    msg.msg_controllen = mem::size_of_val(&control) as _;

    let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut datagram = Datagram::bare(n as usize, socket_addr(&name)?);

    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            let data = libc::CMSG_DATA(cmsg);
            match ((*cmsg).cmsg_level, (*cmsg).cmsg_type) {
                (libc::IPPROTO_IP, libc::IP_PKTINFO) => {
                    let info = ptr::read_unaligned(data as *const libc::in_pktinfo);
                    datagram.destination =
                        Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(info.ipi_addr.s_addr))));
                    datagram.interface = Some(info.ipi_ifindex as u32);
                }
                (libc::IPPROTO_IP, libc::IP_TTL) => {
                    let ttl = ptr::read_unaligned(data as *const c_int);
                    datagram.ttl = Some(ttl as u8);
                }
                (libc::IPPROTO_IPV6, libc::IPV6_PKTINFO) => {
                    let info = ptr::read_unaligned(data as *const libc::in6_pktinfo);
                    datagram.destination = Some(IpAddr::V6(Ipv6Addr::from(info.ipi6_addr.s6_addr)));
                    datagram.interface = Some(info.ipi6_ifindex as u32);
                }
                (libc::IPPROTO_IPV6, libc::IPV6_HOPLIMIT) => {
                    let hops = ptr::read_unaligned(data as *const c_int);
                    datagram.ttl = Some(hops as u8);
                }
                _ => {}
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok(datagram)
}

fn socket_addr(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            Ok(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)),
                u16::from_be(sin.sin_port),
            )))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            Ok(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        family => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported source address family {}", family),
        )),
    }
}
