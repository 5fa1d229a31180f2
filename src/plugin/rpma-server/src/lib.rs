//! `librpma_server`: the server half of an RDMA remote-memory benchmark.
//!
//! The engine registers the job's I/O buffer, accepts exactly one client connection and hands
//! the client the buffer's [`MemoryDescriptor`] in the accept message. From then on the client
//! reads and writes the buffer directly; the engine only reports completions and, on cleanup,
//! releases every RDMA object in dependency order.
//!
//! RDMA objects are created through a [`Provider`]. With the `verbs` feature,
//! [`verbs::VerbsProvider`] talks to real devices through librdmacm and libibverbs.

pub mod completion;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod mr;
pub mod negotiator;
pub mod peer;
pub mod provider;
pub mod teardown;

#[cfg(feature = "verbs")]
pub mod verbs;

pub use config::{RpmaServerConfig, ServerOptions};
pub use descriptor::{MemoryDescriptor, Placement, DESCRIPTOR_SIZE};
pub use engine::RpmaServer;
pub use error::{Error, NativeError};
pub use negotiator::NegotiationState;
pub use provider::{ConnEvent, ConnectionConfig, Provider};

pub const ENGINE_NAME: &str = "librpma_server";

/// Register the engine with the process-wide registry.
pub fn init<P: Provider + Default + 'static>() -> Result<(), harness::Error> {
    harness::registry::global().register(RpmaServer::<P>::engine_descriptor())
}

/// Remove the engine from the process-wide registry.
pub fn exit() {
    harness::registry::global().unregister(ENGINE_NAME);
}
