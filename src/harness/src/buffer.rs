//! Page-aligned anonymous memory backing a job's I/O units.
use std::fmt;
use std::ops::Deref;
use std::ptr;
use std::slice;

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

use crate::Error;

pub struct IoBuffer {
    ptr: *mut libc::c_void,
    len: usize,
}

// The mapping is owned exclusively by this struct.
unsafe impl Send for IoBuffer {}
unsafe impl Sync for IoBuffer {}

impl Drop for IoBuffer {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            tracing::warn!("failed to munmap io buffer: {}", e);
        }
    }
}

impl IoBuffer {
    /// Map `len` bytes of zeroed private memory.
    pub fn new(len: usize) -> Result<Self, Error> {
        if len == 0 {
            return Err(Error::Buffer("zero-sized buffer".to_owned()));
        }
        let len = round_up(len, page_size());
        let ptr = unsafe {
            mmap(
                ptr::null_mut(),
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
                -1,
                0,
            )
        }
        .map_err(|e| Error::Buffer(format!("mmap {} bytes: {}", len, e)))?;
        Ok(IoBuffer { ptr, len })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr as *const u8
    }

    /// Returns a mutable pointer to the mapping.
    ///
    /// Devices may write through this pointer while the buffer is registered, so the
    /// buffer must not be read through `Deref` concurrently with remote writes.
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr as *mut u8
    }
}

impl Deref for IoBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.as_ptr(), self.len) }
    }
}

impl fmt::Debug for IoBuffer {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("IoBuffer")
            .field("ptr", &self.as_ptr())
            .field("len", &self.len())
            .finish()
    }
}

#[inline]
fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) / align * align
}

fn page_size() -> usize {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
                n if n > 0 => n as usize,
                _ => 4096,
            };

            PAGE_SIZE.store(page_size, Ordering::Relaxed);

            page_size
        }
        page_size => page_size,
    }
}
