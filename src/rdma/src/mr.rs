//! Memory regions registered over caller-owned memory.
use std::io;
use std::mem::ManuallyDrop;

use crate::{ffi, ibv};

/// A registered memory region.
///
/// The region does not own the memory it covers; the caller keeps the buffer mapped until the
/// region is deregistered.
#[derive(Debug)]
pub struct MemoryRegion {
    mr: *mut ffi::ibv_mr,
}

unsafe impl Send for MemoryRegion {}
unsafe impl Sync for MemoryRegion {}

impl Drop for MemoryRegion {
    fn drop(&mut self) {
        let errno = unsafe { ffi::ibv_dereg_mr(self.mr) };
        if errno != 0 {
            log::warn!(
                "failed to dereg mr: {:?}",
                io::Error::from_raw_os_error(errno)
            );
        }
    }
}

impl MemoryRegion {
    /// # Safety
    ///
    /// `addr..addr + len` must stay mapped for as long as the returned region lives.
    pub unsafe fn new(
        pd: &ibv::ProtectionDomain,
        addr: *mut u8,
        len: usize,
        access: ffi::ibv_access_flags,
    ) -> io::Result<Self> {
        let mr = ffi::ibv_reg_mr(pd.pd, addr as *mut _, len as _, access.0 as i32);
        if mr.is_null() {
            Err(io::Error::last_os_error())
        } else {
            Ok(Self { mr })
        }
    }

    #[inline]
    pub fn mr(&self) -> *mut ffi::ibv_mr {
        self.mr
    }

    #[inline]
    pub fn addr(&self) -> u64 {
        assert!(!self.mr.is_null());
        unsafe { &*self.mr }.addr as u64
    }

    #[inline]
    pub fn len(&self) -> usize {
        assert!(!self.mr.is_null());
        unsafe { &*self.mr }.length as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn rkey(&self) -> u32 {
        assert!(!self.mr.is_null());
        unsafe { &*self.mr }.rkey
    }

    #[inline]
    pub fn lkey(&self) -> u32 {
        assert!(!self.mr.is_null());
        unsafe { &*self.mr }.lkey
    }

    pub fn dereg(self) -> io::Result<()> {
        let this = ManuallyDrop::new(self);
        let errno = unsafe { ffi::ibv_dereg_mr(this.mr) };
        if errno != 0 {
            return Err(io::Error::from_raw_os_error(errno));
        }
        Ok(())
    }
}
