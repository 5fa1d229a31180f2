//! Verbs objects that hang off a device context: protection domains, completion channels and
//! completion queues.
use std::ffi::CStr;
use std::io;
use std::mem::ManuallyDrop;
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;

use crate::ffi;

/// A device context opened by librdmacm.
///
/// The context is owned by librdmacm and stays valid for the lifetime of the process, so this
/// handle is freely copyable and never closes the device.
#[repr(transparent)]
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub(crate) ctx: *mut ffi::ibv_context,
}

unsafe impl Send for Context {}
unsafe impl Sync for Context {}

impl Context {
    #[inline]
    pub fn as_raw(&self) -> *mut ffi::ibv_context {
        self.ctx
    }

    pub fn name(&self) -> String {
        assert!(!self.ctx.is_null());
        let device = unsafe { &*self.ctx }.device;
        if device.is_null() {
            return String::from("<unknown>");
        }
        let name = unsafe { ffi::ibv_get_device_name(device) };
        if name.is_null() {
            return String::from("<unknown>");
        }
        unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
    }

    pub fn alloc_pd(&self) -> io::Result<ProtectionDomain> {
        let pd = unsafe { ffi::ibv_alloc_pd(self.ctx) };
        if pd.is_null() {
            Err(io::Error::last_os_error())
        } else {
            Ok(ProtectionDomain { pd })
        }
    }

    pub fn create_comp_channel(&self) -> io::Result<CompChannel> {
        let channel = unsafe { ffi::ibv_create_comp_channel(self.ctx) };
        if channel.is_null() {
            Err(io::Error::last_os_error())
        } else {
            Ok(CompChannel { channel })
        }
    }

    /// Create a completion queue with at least `min_cq_entries` entries. Completion events are
    /// delivered to `channel` once the queue has been armed with `req_notify`.
    pub fn create_cq(
        &self,
        min_cq_entries: i32,
        channel: Option<&CompChannel>,
    ) -> io::Result<CompletionQueue> {
        let channel = channel.map_or(ptr::null_mut(), |c| c.channel);
        let cq = unsafe { ffi::ibv_create_cq(self.ctx, min_cq_entries, ptr::null_mut(), channel, 0) };
        if cq.is_null() {
            Err(io::Error::last_os_error())
        } else {
            Ok(CompletionQueue { cq })
        }
    }
}

#[derive(Debug)]
pub struct ProtectionDomain {
    pub(crate) pd: *mut ffi::ibv_pd,
}

unsafe impl Send for ProtectionDomain {}
unsafe impl Sync for ProtectionDomain {}

impl ProtectionDomain {
    #[inline]
    pub fn as_raw(&self) -> *mut ffi::ibv_pd {
        self.pd
    }

    pub fn dealloc(self) -> io::Result<()> {
        let this = ManuallyDrop::new(self);
        let rc = unsafe { ffi::ibv_dealloc_pd(this.pd) };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(())
    }
}

impl Drop for ProtectionDomain {
    fn drop(&mut self) {
        let rc = unsafe { ffi::ibv_dealloc_pd(self.pd) };
        if rc != 0 {
            log::warn!(
                "failed to dealloc pd: {:?}",
                io::Error::from_raw_os_error(rc)
            );
        }
    }
}

/// A completion event channel. Its file descriptor becomes readable when an armed completion
/// queue bound to it receives a new entry.
#[derive(Debug)]
pub struct CompChannel {
    pub(crate) channel: *mut ffi::ibv_comp_channel,
}

unsafe impl Send for CompChannel {}
unsafe impl Sync for CompChannel {}

impl AsRawFd for CompChannel {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        assert!(!self.channel.is_null());
        unsafe { &*self.channel }.fd
    }
}

impl CompChannel {
    /// Consume one pending completion event and acknowledge it. Blocks if no event is pending.
    pub fn get_cq_event(&self) -> io::Result<()> {
        let mut cq = ptr::null_mut();
        let mut cq_context = ptr::null_mut();
        let rc = unsafe { ffi::ibv_get_cq_event(self.channel, &mut cq, &mut cq_context) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe { ffi::ibv_ack_cq_events(cq, 1) };
        Ok(())
    }

    pub fn destroy(self) -> io::Result<()> {
        let this = ManuallyDrop::new(self);
        let rc = unsafe { ffi::ibv_destroy_comp_channel(this.channel) };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(())
    }
}

impl Drop for CompChannel {
    fn drop(&mut self) {
        let rc = unsafe { ffi::ibv_destroy_comp_channel(self.channel) };
        if rc != 0 {
            log::warn!(
                "failed to destroy comp_channel: {:?}",
                io::Error::from_raw_os_error(rc)
            );
        }
    }
}

/// A work completion copied out of a completion queue.
#[derive(Debug, Clone, Copy)]
pub struct WorkCompletion {
    pub wr_id: u64,
    pub status: ffi::ibv_wc_status::Type,
    pub opcode: ffi::ibv_wc_opcode::Type,
    pub vendor_err: u32,
    pub byte_len: u32,
}

impl From<&ffi::ibv_wc> for WorkCompletion {
    fn from(wc: &ffi::ibv_wc) -> Self {
        WorkCompletion {
            wr_id: wc.wr_id,
            status: wc.status,
            opcode: wc.opcode,
            vendor_err: wc.vendor_err,
            byte_len: wc.byte_len,
        }
    }
}

#[derive(Debug)]
pub struct CompletionQueue {
    pub(crate) cq: *mut ffi::ibv_cq,
}

unsafe impl Send for CompletionQueue {}
unsafe impl Sync for CompletionQueue {}

const WC_BATCH: usize = 16;

impl CompletionQueue {
    #[inline]
    pub fn as_raw(&self) -> *mut ffi::ibv_cq {
        self.cq
    }

    /// Poll at most `max` completions, appending them to `out` in the order the device
    /// generated them. Returns the number of completions appended.
    pub fn poll(&self, out: &mut Vec<WorkCompletion>, max: usize) -> io::Result<usize> {
        // ibv_poll_cq is an inline function in verbs.h, go through the ops table instead.
        let ctx = unsafe { &*self.cq }.context;
        let poll_cq = unsafe { &*ctx }
            .ops
            .poll_cq
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "poll_cq not provided"))?;

        let mut wc = [ffi::ibv_wc::default(); WC_BATCH];
        let mut total = 0;
        while total < max {
            let batch = (max - total).min(WC_BATCH);
            let n = unsafe { poll_cq(self.cq, batch as i32, wc.as_mut_ptr()) };
            if n < 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "ibv_poll_cq failed"));
            }
            let n = n as usize;
            out.extend(wc[..n].iter().map(WorkCompletion::from));
            total += n;
            if n < batch {
                break;
            }
        }
        Ok(total)
    }

    /// Arm the queue so the next completion raises an event on its completion channel.
    pub fn req_notify(&self, solicited_only: bool) -> io::Result<()> {
        let ctx = unsafe { &*self.cq }.context;
        let req_notify_cq = unsafe { &*ctx }.ops.req_notify_cq.ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "req_notify_cq not provided")
        })?;
        let rc = unsafe { req_notify_cq(self.cq, solicited_only as i32) };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(())
    }

    pub fn destroy(self) -> io::Result<()> {
        let this = ManuallyDrop::new(self);
        let rc = unsafe { ffi::ibv_destroy_cq(this.cq) };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(())
    }
}

impl Drop for CompletionQueue {
    fn drop(&mut self) {
        let rc = unsafe { ffi::ibv_destroy_cq(self.cq) };
        if rc != 0 {
            log::warn!(
                "failed to destroy cq: {:?}",
                io::Error::from_raw_os_error(rc)
            );
        }
    }
}
