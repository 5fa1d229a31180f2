use bitflags::bitflags;

use harness::IoBuffer;

use crate::descriptor::{MemoryDescriptor, Placement};
use crate::error::NativeError;
use crate::provider::{MemoryRegion, Provider};
use crate::Error;

bitflags! {
    /// How the remote side uses a registered region.
    pub struct MrUsage: u8 {
        /// The client reads from it.
        const READ_SRC = 0b01;
        /// The client writes into it.
        const WRITE_DST = 0b10;
    }
}

/// A region registered with the peer. Only a registered region can produce a descriptor.
#[derive(Debug)]
pub struct MemoryRegistration<R> {
    region: R,
    placement: Placement,
}

impl<R: MemoryRegion> MemoryRegistration<R> {
    pub fn descriptor(&self) -> MemoryDescriptor {
        MemoryDescriptor {
            addr: self.region.addr(),
            length: self.region.length(),
            rkey: self.region.rkey(),
            placement: self.placement,
        }
    }

    #[inline]
    pub fn region(&self) -> &R {
        &self.region
    }

    pub fn deregister(self) -> Result<(), NativeError> {
        self.region.deregister()
    }
}

/// Make `buffer` readable and writable by the client.
pub fn register<P: Provider>(
    provider: &P,
    peer: &P::Peer,
    buffer: &IoBuffer,
    placement: Placement,
) -> Result<MemoryRegistration<P::MemoryRegion>, Error> {
    if buffer.is_empty() {
        return Err(Error::RegistrationFailed(NativeError::from_errno(
            "ibv_reg_mr",
            libc::EINVAL,
        )));
    }
    let region = provider
        .register(peer, buffer, MrUsage::READ_SRC | MrUsage::WRITE_DST)
        .map_err(Error::RegistrationFailed)?;
    tracing::debug!(
        addr = region.addr(),
        length = region.length(),
        ?placement,
        "memory registered"
    );
    Ok(MemoryRegistration { region, placement })
}
