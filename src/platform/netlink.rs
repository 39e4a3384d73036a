//! Raw generic-netlink socket primitives for the TASKSTATS wake-up channel.
//!
//! Implemented directly over `libc`'s socket syscalls rather than the `netlink-sys`/
//! `netlink-packet-core`/`netlink-packet-generic` crate family. This crate's entire use
//! of netlink is three fixed-shape messages against long-stable UAPI constants
//! (`linux/genetlink.h`, `linux/taskstats.h`): resolve the `TASKSTATS` family id once,
//! register interest in every CPU's exit notifications, then block in `recv` purely as
//! a wake-up signal whose payload is discarded. Reproducing `netlink.c`'s hand-rolled
//! `struct msgtemplate` byte layout directly is a better-grounded fit for that than
//! threading an unfamiliar, fast-moving crate family's builder API through three
//! indirection layers.
//!
//! As with [`super::ffi`] and [`super::semaphore`], every field is built and parsed via
//! explicit byte encoding, not a `repr(C)` transmute.

#![allow(unsafe_code)]

use std::io;
use std::mem::size_of;

use crate::core::errors::{PacctError, Result};

/// Stable kernel ABI protocol number for generic netlink (`linux/netlink.h`).
const NETLINK_GENERIC: libc::c_int = 16;
/// Reserved family id for the netlink controller (`linux/genetlink.h`).
const GENL_ID_CTRL: u16 = 0x10;
const CTRL_CMD_GETFAMILY: u8 = 3;
const CTRL_ATTR_FAMILY_NAME: u16 = 2;
const CTRL_ATTR_FAMILY_ID: u16 = 1;
const TASKSTATS_GENL_NAME: &[u8] = b"TASKSTATS\0";
const TASKSTATS_CMD_GET: u8 = 1;
const TASKSTATS_CMD_ATTR_REGISTER_CPUMASK: u16 = 4;
const NLM_F_REQUEST: u16 = 1;
const NLMSG_ERROR: u16 = 2;

const NLMSGHDR_LEN: usize = 16;
const GENLMSGHDR_LEN: usize = 4;
const NLA_HDRLEN: usize = 4;

const fn nla_align(len: usize) -> usize {
    (len + 3) & !3
}

/// A connected `NETLINK_GENERIC` socket registered for TASKSTATS exit notifications on
/// every CPU. Its only use in the daemon main loop is as a blocking wake-up: the message
/// payload itself is never decoded, only its arrival matters (the accounting records
/// themselves are read back out of the kernel's process-accounting file, not out of
/// this channel).
pub struct NetlinkChannel {
    fd: libc::c_int,
}

/// Outcome of one [`NetlinkChannel::recv`] call, matching the three branches
/// `atopacctd.c`'s main loop takes on `recv()`'s return value.
pub enum RecvOutcome {
    /// A message arrived (contents ignored; this is a pure wake-up signal).
    Data(usize),
    /// EOF, or one of the error codes the reference implementation tolerates
    /// (`EINTR`, `ENOMEM`, `ENOBUFS`) — treated as "something may have happened,
    /// go check the accounting file anyway", not a failure.
    Recoverable,
}

impl NetlinkChannel {
    /// Open the socket, resolve the TASKSTATS family id, and register interest in every
    /// CPU. Mirrors `netlink_open()`.
    ///
    /// # Errors
    ///
    /// [`PacctError::Netlink`] on any step of socket setup or family resolution failing.
    pub fn open() -> Result<Self> {
        let fd = checked_socket()?;
        let channel = Self { fd };
        if let Err(err) = channel.configure() {
            // SAFETY: `fd` was just opened by this function and not yet shared.
            unsafe {
                libc::close(fd);
            }
            return Err(err);
        }
        Ok(channel)
    }

    fn configure(&self) -> Result<()> {
        let rcvbuf: libc::c_int = 256 * 1024;
        // SAFETY: `rcvbuf` is a live `c_int` for the duration of the call; `setsockopt`
        // only reads through the pointer, it does not retain it.
        let rc = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                std::ptr::addr_of!(rcvbuf).cast(),
                size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(netlink_err("setsockopt(SO_RCVBUF)"));
        }

        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        // SAFETY: `addr` is a fully-initialized `sockaddr_nl` valid for the call.
        let rc = unsafe {
            libc::bind(
                self.fd,
                std::ptr::addr_of!(addr).cast(),
                size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(netlink_err("bind(AF_NETLINK)"));
        }

        let famid = self.resolve_taskstats_family()?;
        self.register_cpumask(famid)
    }

    fn send(&self, buf: &[u8]) -> Result<()> {
        let addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        let mut sent = 0usize;
        while sent < buf.len() {
            // SAFETY: the slice `buf[sent..]` is valid for `buf.len() - sent` bytes;
            // `addr` is a valid, zeroed `sockaddr_nl` naming the kernel as destination.
            let rc = unsafe {
                libc::sendto(
                    self.fd,
                    buf[sent..].as_ptr().cast(),
                    buf.len() - sent,
                    0,
                    std::ptr::addr_of!(addr).cast(),
                    size_of::<libc::sockaddr_nl>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(PacctError::Netlink {
                    details: format!("sendto: {err}"),
                });
            }
            sent += rc as usize;
        }
        Ok(())
    }

    /// Block for the next message. Returns [`RecvOutcome::Recoverable`] on EOF or a
    /// transient errno the reference implementation tolerates; any other errno is
    /// reported as [`PacctError::Netlink`], which the daemon main loop treats as fatal
    /// (spec.md exit code 8).
    pub fn recv(&self, buf: &mut [u8]) -> Result<RecvOutcome> {
        // SAFETY: `buf` is valid for `buf.len()` bytes for the duration of the call.
        let rc = unsafe { libc::recv(self.fd, buf.as_mut_ptr().cast(), buf.len(), 0) };
        if rc == 0 {
            return Ok(RecvOutcome::Recoverable);
        }
        if rc < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EINTR | libc::ENOMEM | libc::ENOBUFS) => Ok(RecvOutcome::Recoverable),
                _ => Err(PacctError::Netlink {
                    details: format!("recv: {err}"),
                }),
            };
        }
        Ok(RecvOutcome::Data(rc as usize))
    }

    fn resolve_taskstats_family(&self) -> Result<u16> {
        let msg = build_message(
            GENL_ID_CTRL,
            std::process::id(),
            CTRL_CMD_GETFAMILY,
            CTRL_ATTR_FAMILY_NAME,
            TASKSTATS_GENL_NAME,
        );
        self.send(&msg)?;

        let mut buf = [0u8; 2048];
        let len = match self.recv(&mut buf)? {
            RecvOutcome::Data(len) => len,
            RecvOutcome::Recoverable => {
                return Err(PacctError::Netlink {
                    details: "no response resolving TASKSTATS family id".to_string(),
                });
            }
        };
        parse_family_id(&buf[..len])
    }

    fn register_cpumask(&self, famid: u16) -> Result<()> {
        let cpus = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        let mut cpudef = format!("0-{}", cpus.saturating_sub(1));
        cpudef.push('\0');
        let msg = build_message(
            famid,
            std::process::id(),
            TASKSTATS_CMD_GET,
            TASKSTATS_CMD_ATTR_REGISTER_CPUMASK,
            cpudef.as_bytes(),
        );
        self.send(&msg)
    }
}

impl Drop for NetlinkChannel {
    fn drop(&mut self) {
        // SAFETY: `fd` is owned by this struct and not used again after this call.
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn checked_socket() -> Result<libc::c_int> {
    // SAFETY: no pointers cross the FFI boundary; the kernel returns either a valid fd
    // or -1.
    let fd = unsafe { libc::socket(libc::AF_NETLINK, libc::SOCK_RAW, NETLINK_GENERIC) };
    if fd < 0 {
        return Err(netlink_err("socket(AF_NETLINK)"));
    }
    Ok(fd)
}

fn netlink_err(operation: &str) -> PacctError {
    PacctError::Netlink {
        details: format!("{operation}: {}", io::Error::last_os_error()),
    }
}

/// Build one `nlmsghdr` + `genlmsghdr` + single `nlattr` message, matching
/// `nlsock_sendcmd()`'s `struct msgtemplate` layout byte-for-byte (native endianness,
/// as netlink itself uses).
fn build_message(nlmsg_type: u16, nlmsg_pid: u32, genl_cmd: u8, nla_type: u16, nla_data: &[u8]) -> Vec<u8> {
    let nla_len = (NLA_HDRLEN + nla_data.len()) as u16;
    let payload_len = GENLMSGHDR_LEN + nla_align(nla_len as usize);
    let nlmsg_len = (NLMSGHDR_LEN + payload_len) as u32;

    let mut buf = Vec::with_capacity(nlmsg_len as usize);
    buf.extend_from_slice(&nlmsg_len.to_ne_bytes());
    buf.extend_from_slice(&nlmsg_type.to_ne_bytes());
    buf.extend_from_slice(&NLM_F_REQUEST.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes()); // nlmsg_seq
    buf.extend_from_slice(&nlmsg_pid.to_ne_bytes());
    buf.push(genl_cmd);
    buf.push(1); // genl version, fixed at 1 like the reference implementation
    buf.extend_from_slice(&0u16.to_ne_bytes()); // genlmsghdr reserved
    buf.extend_from_slice(&nla_len.to_ne_bytes());
    buf.extend_from_slice(&nla_type.to_ne_bytes());
    buf.extend_from_slice(nla_data);
    buf.resize(nlmsg_len as usize, 0); // pad to the kernel's 4-byte attribute alignment
    buf
}

fn u16ne(buf: &[u8], offset: usize) -> Option<u16> {
    buf.get(offset..offset + 2)
        .map(|b| u16::from_ne_bytes([b[0], b[1]]))
}

/// Parse a `CTRL_CMD_GETFAMILY` response: the first attribute is the family name echoed
/// back, the second is the family id we asked for. Matches `nlsock_getfam()`'s walk.
fn parse_family_id(buf: &[u8]) -> Result<u16> {
    let malformed = || PacctError::Netlink {
        details: "malformed CTRL_CMD_GETFAMILY response".to_string(),
    };

    let nlmsg_type = u16ne(buf, 4).ok_or_else(malformed)?;
    if nlmsg_type == NLMSG_ERROR || buf.len() < NLMSGHDR_LEN {
        return Err(PacctError::Netlink {
            details: "netlink controller returned an error resolving TASKSTATS".to_string(),
        });
    }

    let first_attr_off = NLMSGHDR_LEN + GENLMSGHDR_LEN;
    let first_nla_len = u16ne(buf, first_attr_off).ok_or_else(malformed)? as usize;
    let second_attr_off = first_attr_off + nla_align(first_nla_len);

    let second_nla_len = u16ne(buf, second_attr_off).ok_or_else(malformed)?;
    let second_nla_type = u16ne(buf, second_attr_off + 2).ok_or_else(malformed)?;
    if second_nla_type != CTRL_ATTR_FAMILY_ID || (second_nla_len as usize) < NLA_HDRLEN + 2 {
        return Err(malformed());
    }

    u16ne(buf, second_attr_off + NLA_HDRLEN).ok_or_else(malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_message_pads_to_four_byte_alignment() {
        let msg = build_message(GENL_ID_CTRL, 1, CTRL_CMD_GETFAMILY, CTRL_ATTR_FAMILY_NAME, b"TASKSTATS\0");
        assert_eq!(msg.len() % 4, 0);
        let nlmsg_len = u32::from_ne_bytes([msg[0], msg[1], msg[2], msg[3]]);
        assert_eq!(nlmsg_len as usize, msg.len());
    }

    #[test]
    fn parse_family_id_rejects_short_buffer() {
        let err = parse_family_id(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, PacctError::Netlink { .. }));
    }

    #[test]
    fn parse_family_id_rejects_error_message_type() {
        let mut buf = vec![0u8; NLMSGHDR_LEN];
        buf[4..6].copy_from_slice(&NLMSG_ERROR.to_ne_bytes());
        let err = parse_family_id(&buf).unwrap_err();
        assert!(matches!(err, PacctError::Netlink { .. }));
    }

    #[test]
    fn parse_family_id_extracts_trailing_attribute() {
        // nlmsghdr (16) + genlmsghdr (4) + echoed name attribute (4 + 10, aligned to 12)
        // + family-id attribute (4 + 2, aligned to 8).
        let mut buf = vec![0u8; NLMSGHDR_LEN + GENLMSGHDR_LEN];
        buf[4..6].copy_from_slice(&0u16.to_ne_bytes()); // not NLMSG_ERROR

        let name_nla_len: u16 = (NLA_HDRLEN + 10) as u16; // "TASKSTATS\0"
        buf.extend_from_slice(&name_nla_len.to_ne_bytes());
        buf.extend_from_slice(&CTRL_ATTR_FAMILY_NAME.to_ne_bytes());
        buf.extend_from_slice(b"TASKSTATS\0");
        buf.resize(buf.len() + (nla_align(name_nla_len as usize) - name_nla_len as usize), 0);

        let id_nla_len: u16 = (NLA_HDRLEN + 2) as u16;
        buf.extend_from_slice(&id_nla_len.to_ne_bytes());
        buf.extend_from_slice(&CTRL_ATTR_FAMILY_ID.to_ne_bytes());
        buf.extend_from_slice(&42u16.to_ne_bytes());

        assert_eq!(parse_family_id(&buf).unwrap(), 42);
    }
}
