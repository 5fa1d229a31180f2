use std::ffi::CStr;
use std::fmt;
use std::io;
use std::mem::ManuallyDrop;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags};
use socket2::SockAddr;

use crate::ffi;
use crate::ibv;

/// Revents that make a channel fd worth reading: data, an error or a hang-up.
const READABLE: PollFlags = PollFlags::POLLIN
    .union(PollFlags::POLLERR)
    .union(PollFlags::POLLHUP);

/// `poll(2)` timeout in milliseconds, rounded up so a short deadline still blocks.
fn poll_timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        Some(t) => ((t.as_nanos() + 999_999) / 1_000_000).min(i32::MAX as u128) as i32,
        None => -1,
    }
}

/// Block until `fds` has something to read or `timeout` elapses. `None` waits forever.
/// Returns the per-fd readiness in the same order as `fds`.
pub fn poll_readable(fds: &[RawFd], timeout: Option<Duration>) -> io::Result<Vec<bool>> {
    let mut pollfds: Vec<PollFd> = fds
        .iter()
        .map(|&fd| PollFd::new(fd, PollFlags::POLLIN))
        .collect();
    let timeout_ms = poll_timeout_ms(timeout);
    loop {
        match poll(&mut pollfds, timeout_ms) {
            Ok(_) => break,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(pollfds
        .iter()
        .map(|p| {
            p.revents()
                .map_or(false, |r| r.intersects(READABLE))
        })
        .collect())
}

#[repr(transparent)]
#[derive(Debug)]
pub struct CmEvent(*mut ffi::rdma_cm_event);

unsafe impl Send for CmEvent {}
unsafe impl Sync for CmEvent {}

/// Every event returned by rdma_get_cm_event must be acked exactly once.
impl Drop for CmEvent {
    fn drop(&mut self) {
        let rc = unsafe { ffi::rdma_ack_cm_event(self.0) };
        if rc != 0 {
            log::debug!(
                "An error occurred on ack_cm_event: {:?}",
                io::Error::last_os_error()
            );
        }
    }
}

impl fmt::Display for CmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", event_str(self.event()))
    }
}

/// The librdmacm name of an event type, e.g. `RDMA_CM_EVENT_ESTABLISHED`.
pub fn event_str(event: ffi::rdma_cm_event_type::Type) -> String {
    let msg = unsafe { ffi::rdma_event_str(event) };
    if msg.is_null() {
        return format!("RDMA_CM_EVENT({})", event);
    }
    unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
}

impl CmEvent {
    #[inline]
    pub fn status(&self) -> i32 {
        assert!(!self.0.is_null());
        unsafe { &*self.0 }.status
    }

    #[inline]
    pub fn event(&self) -> ffi::rdma_cm_event_type::Type {
        assert!(!self.0.is_null());
        unsafe { &*self.0 }.event
    }

    /// Take ownership of the id carried by a connect request and ack the event.
    ///
    /// The event is acked before returning so the new id can be migrated to another channel
    /// right away.
    pub fn into_request(self) -> io::Result<CmId> {
        assert!(!self.0.is_null());
        let event = unsafe { &*self.0 };
        if event.event != ffi::rdma_cm_event_type::RDMA_CM_EVENT_CONNECT_REQUEST {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected a connect request, got {}", self),
            ));
        }
        if event.id.is_null() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "connect request without an id",
            ));
        }
        let id = CmId(event.id);
        drop(self);
        Ok(id)
    }
}

#[repr(transparent)]
#[derive(Debug)]
pub struct EventChannel(*mut ffi::rdma_event_channel);

unsafe impl Send for EventChannel {}
unsafe impl Sync for EventChannel {}

impl AsRawFd for EventChannel {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        assert!(!self.0.is_null());
        unsafe { &*self.0 }.fd
    }
}

impl EventChannel {
    pub fn create_event_channel() -> io::Result<Self> {
        let channel = unsafe { ffi::rdma_create_event_channel() };
        if channel.is_null() {
            Err(io::Error::last_os_error())
        } else {
            Ok(EventChannel(channel))
        }
    }

    /// Blocking read of the next event.
    pub fn get_cm_event(&self) -> io::Result<CmEvent> {
        let mut event = ptr::null_mut();
        let rc = unsafe { ffi::rdma_get_cm_event(self.0, &mut event) };
        if rc != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(CmEvent(event))
        }
    }

    /// Wait at most `timeout` for an event. `Ok(None)` on timeout.
    pub fn poll_event(&self, timeout: Option<Duration>) -> io::Result<Option<CmEvent>> {
        let ready = poll_readable(&[self.as_raw_fd()], timeout)?;
        if !ready[0] {
            return Ok(None);
        }
        self.get_cm_event().map(Some)
    }

    pub fn destroy(self) {
        let this = ManuallyDrop::new(self);
        unsafe { ffi::rdma_destroy_event_channel(this.0) };
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        unsafe { ffi::rdma_destroy_event_channel(self.0) };
    }
}

/// A queue pair created through a `CmId`. It must be destroyed before the id.
#[derive(Debug)]
pub struct QueuePair {
    id: *mut ffi::rdma_cm_id,
}

unsafe impl Send for QueuePair {}
unsafe impl Sync for QueuePair {}

impl QueuePair {
    #[inline]
    pub fn as_raw(&self) -> *mut ffi::ibv_qp {
        unsafe { &*self.id }.qp
    }

    pub fn destroy(self) {
        let this = ManuallyDrop::new(self);
        unsafe { ffi::rdma_destroy_qp(this.id) };
    }
}

impl Drop for QueuePair {
    fn drop(&mut self) {
        log::debug!("dropping QueuePair in rdmacm");
        unsafe { ffi::rdma_destroy_qp(self.id) };
    }
}

#[derive(Debug)]
pub struct CmId(*mut ffi::rdma_cm_id);

unsafe impl Send for CmId {}
unsafe impl Sync for CmId {}

impl Drop for CmId {
    fn drop(&mut self) {
        log::debug!("dropping CmId in rdmacm");
        let rc = unsafe { ffi::rdma_destroy_id(self.0) };
        if rc != 0 {
            log::debug!(
                "error occured when destroying cm_id: {:?}",
                io::Error::last_os_error()
            );
        }
    }
}

impl CmId {
    /// # Safety
    ///
    /// The user must guarantee that the event_channel lives longer than the CmId.
    pub unsafe fn create_id(
        channel: Option<&EventChannel>,
        context: usize,
        ps: ffi::rdma_port_space::Type,
    ) -> io::Result<CmId> {
        let channel = channel.map_or(ptr::null_mut(), |c| c.0);
        let mut cm_id: *mut ffi::rdma_cm_id = ptr::null_mut();

        let rc = ffi::rdma_create_id(channel, &mut cm_id, context as *mut _, ps);
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        assert!(!cm_id.is_null());
        Ok(CmId(cm_id))
    }

    /// The device context the id is bound to, if any. Set after `bind_addr` to a local RDMA
    /// address and on ids delivered with a connect request.
    #[inline]
    pub fn verbs(&self) -> Option<ibv::Context> {
        assert!(!self.0.is_null());
        let ctx = unsafe { &*self.0 }.verbs;
        if ctx.is_null() {
            None
        } else {
            Some(ibv::Context { ctx })
        }
    }

    pub fn migrate_id(&self, channel: &EventChannel) -> io::Result<()> {
        let rc = unsafe { ffi::rdma_migrate_id(self.0, channel.0) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn bind_addr(&self, sockaddr: &SocketAddr) -> io::Result<()> {
        let addr = SockAddr::from(*sockaddr);
        let rc = unsafe { ffi::rdma_bind_addr(self.0, addr.as_ptr() as *mut ffi::sockaddr) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn listen(&self, backlog: i32) -> io::Result<()> {
        let rc = unsafe { ffi::rdma_listen(self.0, backlog) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Create the id's queue pair on `pd`. The protection domain must belong to the same device
    /// as this id.
    #[must_use = "dropping the QueuePair destroys it"]
    pub fn create_qp(
        &self,
        pd: &ibv::ProtectionDomain,
        qp_init_attr: &ffi::ibv_qp_init_attr,
    ) -> io::Result<QueuePair> {
        let rc = unsafe {
            ffi::rdma_create_qp(self.0, pd.pd, qp_init_attr as *const _ as *mut _)
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(QueuePair { id: self.0 })
    }

    pub fn accept(&self, conn_param: &ffi::rdma_conn_param) -> io::Result<()> {
        let rc = unsafe { ffi::rdma_accept(self.0, conn_param as *const _ as *mut _) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn reject(&self) -> io::Result<()> {
        let rc = unsafe { ffi::rdma_reject(self.0, ptr::null(), 0) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn disconnect(&self) -> io::Result<()> {
        let rc = unsafe { ffi::rdma_disconnect(self.0) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn destroy(self) -> io::Result<()> {
        let this = ManuallyDrop::new(self);
        let rc = unsafe { ffi::rdma_destroy_id(this.0) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    use super::*;

    #[test]
    fn timeout_rounds_up_to_whole_millis() {
        assert_eq!(poll_timeout_ms(None), -1);
        assert_eq!(poll_timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(poll_timeout_ms(Some(Duration::from_nanos(1))), 1);
        assert_eq!(poll_timeout_ms(Some(Duration::from_micros(999))), 1);
        assert_eq!(poll_timeout_ms(Some(Duration::from_millis(5))), 5);
        assert_eq!(poll_timeout_ms(Some(Duration::from_micros(5001))), 6);
        assert_eq!(poll_timeout_ms(Some(Duration::from_secs(u64::MAX))), i32::MAX);
    }

    #[test]
    fn short_timeout_blocks() {
        let (a, _b) = UnixStream::pair().unwrap();
        let start = Instant::now();
        let ready = poll_readable(&[a.as_raw_fd()], Some(Duration::from_micros(300))).unwrap();
        assert_eq!(ready, [false]);
        assert!(start.elapsed() >= Duration::from_micros(300));
    }

    #[test]
    fn readiness_per_fd() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let (c, _d) = UnixStream::pair().unwrap();
        b.write_all(b"x").unwrap();
        let ready = poll_readable(&[c.as_raw_fd(), a.as_raw_fd()], Some(Duration::ZERO)).unwrap();
        assert_eq!(ready, [false, true]);
    }

    #[test]
    fn hang_up_counts_as_readable() {
        assert!(READABLE.contains(PollFlags::POLLHUP));
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        let ready = poll_readable(&[a.as_raw_fd()], None).unwrap();
        assert_eq!(ready, [true]);
    }
}
