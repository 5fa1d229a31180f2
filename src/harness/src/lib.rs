//! The benchmark-harness side of the I/O engine contract.
//!
//! A harness owns jobs; each job drives one engine instance through the callbacks of
//! [`IoEngine`]. Engines are looked up by name in an [`EngineRegistry`].

pub mod buffer;
pub mod driver;
pub mod engine;
pub mod error;
pub mod job;
pub mod logging;
pub mod registry;

pub use buffer::IoBuffer;
pub use engine::{
    DataDirection, EngineFlags, EngineOption, IoEngine, IoEvent, IoUnit, JobFile, QueueStatus,
    ENGINE_API_VERSION,
};
pub use error::Error;
pub use job::Job;
pub use registry::{EngineDescriptor, EngineRegistry};
