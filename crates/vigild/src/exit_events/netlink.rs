//! Netlink process-connector exit monitor.
//!
//! The kernel's process connector (`NETLINK_CONNECTOR`, `CN_IDX_PROC`)
//! multicasts a `proc_event` for every process lifecycle change,
//! including `PROC_EVENT_EXIT` with the raw wait-status word. This
//! module subscribes once and filters the stream down to the set of
//! watched pids; registration and removal are therefore userspace
//! operations, while delivery comes from a dedicated reader thread.
//!
//! Binding the connector needs `CAP_NET_ADMIN`. When it is missing,
//! [`NetlinkExitMonitor::spawn`] fails and the caller falls back to
//! poll-only detection.

use std::collections::HashSet;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use vigil_core::ExitReason;

use super::{ExitEvent, ExitWatch, WatchOutcome};

// ============================================================================
// Connector Protocol Constants (linux/connector.h, linux/cn_proc.h)
// ============================================================================

const CN_IDX_PROC: u32 = 1;
const CN_VAL_PROC: u32 = 1;

const PROC_CN_MCAST_LISTEN: u32 = 1;

const PROC_EVENT_EXIT: u32 = 0x8000_0000;

/// `struct cn_msg`: connector id pair, sequencing, payload length.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct CnMsg {
    idx: u32,
    val: u32,
    seq: u32,
    ack: u32,
    len: u16,
    flags: u16,
}

/// Leading fields of `struct proc_event`, before the per-event union.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ProcEventHeader {
    what: u32,
    cpu: u32,
    timestamp_ns: u64,
}

/// The `exit_proc_event` member of the event union.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ExitEventData {
    process_pid: i32,
    process_tgid: i32,
    exit_code: u32,
    exit_signal: u32,
}

const NLMSG_HDR_LEN: usize = mem::size_of::<libc::nlmsghdr>();

fn nlmsg_align(len: usize) -> usize {
    (len + 3) & !3
}

// ============================================================================
// Netlink Exit Monitor
// ============================================================================

/// Watches registered pids for exit via the netlink process connector.
///
/// One-shot semantics: the reader thread removes a pid from the watched
/// set under the lock before forwarding its event, so a registration can
/// deliver at most once. The watched set is shared between the
/// registration path and the reader thread.
pub struct NetlinkExitMonitor {
    socket: OwnedFd,
    wake: OwnedFd,
    watched: Arc<Mutex<HashSet<u32>>>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl NetlinkExitMonitor {
    /// Opens the connector socket, subscribes to process events, and
    /// starts the reader thread. Deliveries go to `events`.
    ///
    /// # Errors
    ///
    /// Fails when the socket cannot be created or bound, typically for
    /// lack of `CAP_NET_ADMIN`.
    pub fn spawn(events: mpsc::UnboundedSender<ExitEvent>) -> io::Result<Self> {
        let socket = open_connector_socket()?;
        send_mcast_op(socket.as_raw_fd(), PROC_CN_MCAST_LISTEN)?;

        let wake = create_eventfd()?;

        let watched = Arc::new(Mutex::new(HashSet::new()));
        let running = Arc::new(AtomicBool::new(true));

        let reader = {
            let socket_fd = socket.as_raw_fd();
            let wake_fd = wake.as_raw_fd();
            let watched = Arc::clone(&watched);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("vigild-exit-events".to_string())
                .spawn(move || {
                    read_loop(socket_fd, wake_fd, &watched, &running, &events);
                })?
        };

        debug!("Netlink exit monitor started");

        Ok(Self {
            socket,
            wake,
            watched,
            running,
            reader: Some(reader),
        })
    }

    fn lock_watched(&self) -> std::sync::MutexGuard<'_, HashSet<u32>> {
        self.watched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ExitWatch for NetlinkExitMonitor {
    fn watch(&self, pid: u32) -> WatchOutcome {
        if !self.running.load(Ordering::SeqCst) {
            return WatchOutcome::Failed(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "exit event listener has stopped",
            ));
        }

        if !process_is_alive(pid) {
            return WatchOutcome::AlreadyExited;
        }

        self.lock_watched().insert(pid);

        // The exit event for a process that died before the insert above
        // has already flowed past the reader; re-check so the caller
        // records an unobserved exit instead of waiting forever.
        if !process_is_alive(pid) {
            self.lock_watched().remove(&pid);
            return WatchOutcome::AlreadyExited;
        }

        WatchOutcome::Registered
    }

    fn is_watching(&self, pid: u32) -> bool {
        self.lock_watched().contains(&pid)
    }

    fn unwatch(&self, pid: u32) {
        self.lock_watched().remove(&pid);
    }
}

impl Drop for NetlinkExitMonitor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        let one: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.wake.as_raw_fd(),
                std::ptr::addr_of!(one).cast(),
                mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            warn!("Failed to signal exit-monitor shutdown");
        }

        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        // socket and wake fds close on drop, after the reader has exited
    }
}

// ============================================================================
// Socket Setup
// ============================================================================

fn open_connector_socket() -> io::Result<OwnedFd> {
    let fd = unsafe {
        libc::socket(
            libc::PF_NETLINK,
            libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
            libc::NETLINK_CONNECTOR,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
    addr.nl_pid = 0;
    addr.nl_groups = CN_IDX_PROC;

    let ret = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            std::ptr::addr_of!(addr).cast(),
            mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(socket)
}

fn create_eventfd() -> io::Result<OwnedFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Sends a multicast subscription op to the proc connector.
fn send_mcast_op(socket: RawFd, op: u32) -> io::Result<()> {
    let total = NLMSG_HDR_LEN + mem::size_of::<CnMsg>() + mem::size_of::<u32>();
    let mut buf = vec![0u8; total];

    let header = libc::nlmsghdr {
        nlmsg_len: total as u32,
        nlmsg_type: libc::NLMSG_DONE as u16,
        nlmsg_flags: 0,
        nlmsg_seq: 0,
        nlmsg_pid: std::process::id(),
    };
    let cn = CnMsg {
        idx: CN_IDX_PROC,
        val: CN_VAL_PROC,
        seq: 0,
        ack: 0,
        len: mem::size_of::<u32>() as u16,
        flags: 0,
    };

    unsafe {
        let ptr = buf.as_mut_ptr();
        std::ptr::write_unaligned(ptr.cast::<libc::nlmsghdr>(), header);
        std::ptr::write_unaligned(ptr.add(NLMSG_HDR_LEN).cast::<CnMsg>(), cn);
        std::ptr::write_unaligned(
            ptr.add(NLMSG_HDR_LEN + mem::size_of::<CnMsg>()).cast::<u32>(),
            op,
        );
    }

    let sent = unsafe { libc::send(socket, buf.as_ptr().cast(), total, 0) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// ============================================================================
// Reader Thread
// ============================================================================

/// Blocks on the connector socket and the shutdown eventfd, draining all
/// pending datagrams per wake.
fn read_loop(
    socket: RawFd,
    wake: RawFd,
    watched: &Mutex<HashSet<u32>>,
    running: &AtomicBool,
    events: &mpsc::UnboundedSender<ExitEvent>,
) {
    let mut buf = vec![0u8; 8192];

    'outer: while running.load(Ordering::SeqCst) {
        let mut fds = [
            libc::pollfd {
                fd: socket,
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: wake,
                events: libc::POLLIN,
                revents: 0,
            },
        ];

        let ready = unsafe { libc::poll(fds.as_mut_ptr(), 2, -1) };
        if ready < 0 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            warn!(%error, "Exit-event poll failed, stopping listener");
            break;
        }

        if fds[1].revents != 0 {
            debug!("Exit-event listener shutting down");
            break;
        }
        if fds[0].revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            warn!("Exit-event socket error, stopping listener");
            break;
        }
        if fds[0].revents & libc::POLLIN == 0 {
            continue;
        }

        // Drain everything queued before blocking again
        loop {
            let len = unsafe {
                libc::recv(
                    socket,
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if len < 0 {
                let error = io::Error::last_os_error();
                match error.raw_os_error() {
                    Some(libc::EAGAIN) | Some(libc::EINTR) => break,
                    Some(libc::ENOBUFS) => {
                        // Kernel dropped events under load; poll coverage
                        // picks up anything missed
                        warn!("Exit-event queue overrun, some exits were dropped");
                        break;
                    }
                    _ => {
                        warn!(%error, "Exit-event recv failed, stopping listener");
                        break 'outer;
                    }
                }
            }
            if len == 0 {
                break;
            }

            for (pid, status) in parse_exit_events(&buf[..len as usize]) {
                let delivered = {
                    let mut set = watched
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    set.remove(&pid)
                };
                if !delivered {
                    continue;
                }

                let reason = ExitReason::from_wait_status(status);
                trace!(pid, %reason, "Exit event delivered");
                if events
                    .send(ExitEvent { pid, reason })
                    .is_err()
                {
                    debug!("Exit-event consumer gone, stopping listener");
                    break 'outer;
                }
            }
        }
    }

    running.store(false, Ordering::SeqCst);
}

// ============================================================================
// Datagram Parsing
// ============================================================================

/// Extracts `(pid, wait_status)` pairs from a netlink datagram.
///
/// A datagram may carry several netlink messages; anything that is not a
/// whole-process `PROC_EVENT_EXIT` is skipped.
fn parse_exit_events(buf: &[u8]) -> Vec<(u32, i32)> {
    let mut out = Vec::new();
    let mut offset = 0usize;

    while offset + NLMSG_HDR_LEN <= buf.len() {
        let header: libc::nlmsghdr =
            unsafe { std::ptr::read_unaligned(buf.as_ptr().add(offset).cast()) };
        let msg_len = header.nlmsg_len as usize;
        if msg_len < NLMSG_HDR_LEN || offset + msg_len > buf.len() {
            break;
        }

        if header.nlmsg_type == libc::NLMSG_DONE as u16 {
            if let Some(event) = parse_connector_payload(&buf[offset + NLMSG_HDR_LEN..offset + msg_len])
            {
                out.push(event);
            }
        }

        offset += nlmsg_align(msg_len);
    }

    out
}

/// Parses one connector payload into an exit event, if it is one.
///
/// Thread exits (pid != tgid) are ignored; only the demise of the whole
/// process counts.
fn parse_connector_payload(payload: &[u8]) -> Option<(u32, i32)> {
    let cn_len = mem::size_of::<CnMsg>();
    let header_len = mem::size_of::<ProcEventHeader>();
    let exit_len = mem::size_of::<ExitEventData>();
    if payload.len() < cn_len + header_len + exit_len {
        return None;
    }

    let cn: CnMsg = unsafe { std::ptr::read_unaligned(payload.as_ptr().cast()) };
    if cn.idx != CN_IDX_PROC || cn.val != CN_VAL_PROC {
        return None;
    }

    let event: ProcEventHeader =
        unsafe { std::ptr::read_unaligned(payload.as_ptr().add(cn_len).cast()) };
    if event.what != PROC_EVENT_EXIT {
        return None;
    }

    let exit: ExitEventData =
        unsafe { std::ptr::read_unaligned(payload.as_ptr().add(cn_len + header_len).cast()) };
    if exit.process_pid != exit.process_tgid || exit.process_pid <= 0 {
        return None;
    }

    Some((exit.process_pid as u32, exit.exit_code as i32))
}

// ============================================================================
// Process Liveness
// ============================================================================

/// True if the process exists and is not a zombie.
///
/// Reads `/proc/<pid>/stat`; the state field follows the last `)` of the
/// comm field, which may itself contain parentheses.
fn process_is_alive(pid: u32) -> bool {
    let stat = match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(contents) => contents,
        Err(_) => return false,
    };

    let state = stat
        .rfind(')')
        .and_then(|close| stat.get(close + 1..))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|field| field.chars().next());

    !matches!(state, None | Some('Z') | Some('X'))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a netlink datagram carrying one connector proc event.
    fn build_datagram(what: u32, pid: i32, tgid: i32, exit_code: u32) -> Vec<u8> {
        let payload_len =
            mem::size_of::<CnMsg>() + mem::size_of::<ProcEventHeader>() + mem::size_of::<ExitEventData>();
        let total = NLMSG_HDR_LEN + payload_len;
        let mut buf = vec![0u8; nlmsg_align(total)];

        let header = libc::nlmsghdr {
            nlmsg_len: total as u32,
            nlmsg_type: libc::NLMSG_DONE as u16,
            nlmsg_flags: 0,
            nlmsg_seq: 0,
            nlmsg_pid: 0,
        };
        let cn = CnMsg {
            idx: CN_IDX_PROC,
            val: CN_VAL_PROC,
            seq: 0,
            ack: 0,
            len: (mem::size_of::<ProcEventHeader>() + mem::size_of::<ExitEventData>()) as u16,
            flags: 0,
        };
        let event = ProcEventHeader {
            what,
            cpu: 0,
            timestamp_ns: 0,
        };
        let exit = ExitEventData {
            process_pid: pid,
            process_tgid: tgid,
            exit_code,
            exit_signal: libc::SIGCHLD as u32,
        };

        unsafe {
            let ptr = buf.as_mut_ptr();
            std::ptr::write_unaligned(ptr.cast::<libc::nlmsghdr>(), header);
            std::ptr::write_unaligned(ptr.add(NLMSG_HDR_LEN).cast::<CnMsg>(), cn);
            std::ptr::write_unaligned(
                ptr.add(NLMSG_HDR_LEN + mem::size_of::<CnMsg>()).cast::<ProcEventHeader>(),
                event,
            );
            std::ptr::write_unaligned(
                ptr.add(NLMSG_HDR_LEN + mem::size_of::<CnMsg>() + mem::size_of::<ProcEventHeader>())
                    .cast::<ExitEventData>(),
                exit,
            );
        }

        buf
    }

    #[test]
    fn test_parse_exit_event() {
        let status = (3 << 8) as u32; // exit(3)
        let buf = build_datagram(PROC_EVENT_EXIT, 1234, 1234, status);

        let events = parse_exit_events(&buf);
        assert_eq!(events, vec![(1234, status as i32)]);
    }

    #[test]
    fn test_parse_skips_non_exit_events() {
        const PROC_EVENT_FORK: u32 = 0x0000_0001;
        let buf = build_datagram(PROC_EVENT_FORK, 1234, 1234, 0);
        assert!(parse_exit_events(&buf).is_empty());
    }

    #[test]
    fn test_parse_skips_thread_exits() {
        let buf = build_datagram(PROC_EVENT_EXIT, 1235, 1234, 0);
        assert!(parse_exit_events(&buf).is_empty());
    }

    #[test]
    fn test_parse_multiple_messages_in_one_datagram() {
        let mut buf = build_datagram(PROC_EVENT_EXIT, 10, 10, 0);
        buf.extend(build_datagram(PROC_EVENT_EXIT, 20, 20, libc::SIGSEGV as u32));

        let events = parse_exit_events(&buf);
        assert_eq!(events, vec![(10, 0), (20, libc::SIGSEGV)]);
    }

    #[test]
    fn test_parse_tolerates_truncated_buffer() {
        let buf = build_datagram(PROC_EVENT_EXIT, 10, 10, 0);
        // Cut into the payload: nothing parsed, no panic
        let truncated = &buf[..NLMSG_HDR_LEN + 4];
        assert!(parse_exit_events(truncated).is_empty());
        assert!(parse_exit_events(&[]).is_empty());
    }

    #[test]
    fn test_nlmsg_align() {
        assert_eq!(nlmsg_align(0), 0);
        assert_eq!(nlmsg_align(1), 4);
        assert_eq!(nlmsg_align(4), 4);
        assert_eq!(nlmsg_align(21), 24);
    }

    #[test]
    fn test_process_is_alive() {
        assert!(process_is_alive(std::process::id()));
        // A pid beyond the kernel's pid_max is never alive
        assert!(!process_is_alive(0x3fff_ffff));
    }

    #[test]
    fn test_monitor_registration_round_trip() {
        let (tx, _rx) = mpsc::unbounded_channel();

        // Binding the proc connector needs CAP_NET_ADMIN; skip (but do
        // not fail) where the environment does not grant it.
        let monitor = match NetlinkExitMonitor::spawn(tx) {
            Ok(monitor) => monitor,
            Err(error) => {
                eprintln!("skipping: proc connector unavailable ({error})");
                return;
            }
        };

        let own_pid = std::process::id();
        assert!(matches!(monitor.watch(own_pid), WatchOutcome::Registered));
        assert!(monitor.is_watching(own_pid));

        monitor.unwatch(own_pid);
        assert!(!monitor.is_watching(own_pid));

        // A pid that cannot exist reports AlreadyExited, not an error
        assert!(matches!(
            monitor.watch(0x3fff_ffff),
            WatchOutcome::AlreadyExited
        ));
    }
}
