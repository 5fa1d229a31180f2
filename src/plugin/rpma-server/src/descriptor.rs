//! The memory descriptor sent to the client as the accept message's private data.
//!
//! Wire layout, little endian, no padding:
//!
//! | addr: u64 | length: u64 | rkey: u32 | placement: u8 |
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

use crate::Error;

pub const DESCRIPTOR_SIZE: usize = 8 + 8 + 4 + 1;

/// The largest private data an RC accept (IB REP) can carry.
pub const ACCEPT_PRIVATE_DATA_MAX: usize = 196;

const_assert!(DESCRIPTOR_SIZE <= ACCEPT_PRIVATE_DATA_MAX);

/// Where the registered memory lives, which tells the client how to make its writes durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Volatile,
    Persistent,
}

impl Default for Placement {
    fn default() -> Self {
        Placement::Volatile
    }
}

impl From<Placement> for u8 {
    fn from(p: Placement) -> u8 {
        match p {
            Placement::Volatile => 0,
            Placement::Persistent => 1,
        }
    }
}

impl TryFrom<u8> for Placement {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self, Error> {
        match v {
            0 => Ok(Placement::Volatile),
            1 => Ok(Placement::Persistent),
            other => Err(Error::InvalidDescriptor(format!(
                "unknown placement {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryDescriptor {
    pub addr: u64,
    pub length: u64,
    pub rkey: u32,
    pub placement: Placement,
}

#[derive(Serialize, Deserialize)]
struct Wire {
    addr: u64,
    length: u64,
    rkey: u32,
    placement: u8,
}

impl MemoryDescriptor {
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let wire = Wire {
            addr: self.addr,
            length: self.length,
            rkey: self.rkey,
            placement: self.placement.into(),
        };
        bincode::serialize(&wire).map_err(|e| Error::InvalidDescriptor(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != DESCRIPTOR_SIZE {
            return Err(Error::InvalidDescriptor(format!(
                "expected {} bytes, got {}",
                DESCRIPTOR_SIZE,
                bytes.len()
            )));
        }
        let wire: Wire =
            bincode::deserialize(bytes).map_err(|e| Error::InvalidDescriptor(e.to_string()))?;
        Ok(MemoryDescriptor {
            addr: wire.addr,
            length: wire.length,
            rkey: wire.rkey,
            placement: Placement::try_from(wire.placement)?,
        })
    }
}
