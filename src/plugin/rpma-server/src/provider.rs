//! The RDMA objects the engine is built from.
//!
//! Every native object is created through a [`Provider`]. Objects are released by consuming
//! methods (`delete`, `deregister`, `shutdown`, `reject`) so the teardown sequence decides the
//! order and observes each failure.
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use harness::{IoBuffer, IoEvent};

use crate::error::NativeError;
use crate::mr::MrUsage;

/// Queue sizing for the single connection, consumed by the call that creates it.
#[derive(Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    sq_size: u32,
    rq_size: u32,
    cq_size: u32,
}

impl ConnectionConfig {
    pub const RQ_SIZE: u32 = 1;
    pub const CQ_SIZE: u32 = 1;

    /// One send slot per in-flight I/O plus one for a trailing flush.
    pub fn for_io_depth(io_depth: u32) -> Self {
        ConnectionConfig {
            sq_size: io_depth.saturating_add(1),
            rq_size: Self::RQ_SIZE,
            cq_size: Self::CQ_SIZE,
        }
    }

    #[inline]
    pub fn sq_size(&self) -> u32 {
        self.sq_size
    }

    #[inline]
    pub fn rq_size(&self) -> u32 {
        self.rq_size
    }

    #[inline]
    pub fn cq_size(&self) -> u32 {
        self.cq_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    Established,
    Closed,
    Lost,
    Rejected,
    Unreachable,
    /// A connection manager event with no meaning for this engine, by raw value.
    Undefined(i32),
}

impl fmt::Display for ConnEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnEvent::Established => f.write_str("Connection established"),
            ConnEvent::Closed => f.write_str("Connection closed"),
            ConnEvent::Lost => f.write_str("Connection lost"),
            ConnEvent::Rejected => f.write_str("Connection rejected"),
            ConnEvent::Unreachable => f.write_str("Connection unreachable"),
            ConnEvent::Undefined(raw) => write!(f, "Undefined connection event ({})", raw),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOpcode {
    Read,
    Write,
    Send,
    Recv,
    RecvWithImm,
    Other(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    /// Device status code.
    Failed(i32),
}

/// One completion-queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub wr_id: u64,
    pub opcode: CompletionOpcode,
    pub status: CompletionStatus,
    pub byte_len: u32,
}

impl From<&Completion> for IoEvent {
    fn from(c: &Completion) -> Self {
        IoEvent {
            id: c.wr_id,
            bytes: c.byte_len,
            error: match c.status {
                CompletionStatus::Success => None,
                CompletionStatus::Failed(code) => Some(code),
            },
        }
    }
}

/// What woke up a [`Connection::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The completion queue has new entries.
    Completions,
    /// A connection event is pending.
    Event,
    TimedOut,
}

pub trait Provider: Send {
    type Device;
    type Peer: Send;
    type MemoryRegion: MemoryRegion;
    type Endpoint: Endpoint<Request = Self::Request>;
    type Request: ConnectionRequest<Connection = Self::Connection>;
    type Connection: Connection;

    /// Find the RDMA device serving the local address `ip`.
    fn lookup_device(&self, ip: IpAddr) -> Result<Self::Device, NativeError>;

    fn new_peer(&self, device: Self::Device) -> Result<Self::Peer, NativeError>;

    fn delete_peer(&self, peer: Self::Peer) -> Result<(), NativeError>;

    /// Register `buffer` with `peer`. The buffer must outlive the returned region.
    fn register(
        &self,
        peer: &Self::Peer,
        buffer: &IoBuffer,
        usage: MrUsage,
    ) -> Result<Self::MemoryRegion, NativeError>;

    fn listen(
        &self,
        peer: &Self::Peer,
        addr: SocketAddr,
        backlog: i32,
    ) -> Result<Self::Endpoint, NativeError>;
}

pub trait MemoryRegion: Send {
    fn addr(&self) -> u64;

    fn length(&self) -> u64;

    fn rkey(&self) -> u32;

    fn deregister(self) -> Result<(), NativeError>;
}

pub trait Endpoint: Send {
    type Request: ConnectionRequest;

    /// Block until a connection request arrives and prepare its queues from `cfg`.
    fn next_request(&mut self, cfg: ConnectionConfig) -> Result<Self::Request, NativeError>;

    fn shutdown(self) -> Result<(), NativeError>;
}

pub trait ConnectionRequest: Send + Sized {
    type Connection: Connection;

    /// Accept the request, sending `private_data` to the client. On failure the request is
    /// handed back so the caller can reject it.
    fn accept(self, private_data: &[u8]) -> Result<Self::Connection, (NativeError, Self)>;

    fn reject(self) -> Result<(), NativeError>;
}

pub trait Connection: Send {
    /// The next connection event. `timeout` of `None` blocks; `Ok(None)` means it elapsed.
    fn next_event(&mut self, timeout: Option<Duration>) -> Result<Option<ConnEvent>, NativeError>;

    /// Block until the completion queue or the event channel has something, or `timeout`
    /// elapses.
    fn wait(&mut self, timeout: Option<Duration>) -> Result<Readiness, NativeError>;

    /// Append at most `max` completions to `out`, oldest first. Never blocks.
    fn poll_completions(
        &mut self,
        out: &mut Vec<Completion>,
        max: usize,
    ) -> Result<usize, NativeError>;

    fn disconnect(&mut self) -> Result<(), NativeError>;

    fn delete(self) -> Result<(), NativeError>;
}
