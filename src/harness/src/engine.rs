//! The callback contract between a harness job and an I/O engine.
use std::time::Duration;

use bitflags::bitflags;

use crate::job::Job;
use crate::Error;

/// Bumped whenever the [`IoEngine`] callbacks change shape.
pub const ENGINE_API_VERSION: u32 = 1;

bitflags! {
    /// Capabilities an engine declares to the harness.
    #[derive(Default)]
    pub struct EngineFlags: u32 {
        /// The engine performs no local disk I/O.
        const DISKLESS_IO = 0b001;
        /// The engine only moves data in one direction.
        const UNIDIR = 0b010;
        /// The engine behaves like a pipe: no seeking, no file sizes.
        const PIPE_IO = 0b100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    Read,
    Write,
    Sync,
}

/// One unit of I/O handed to an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoUnit {
    pub index: usize,
    pub ddir: DataDirection,
    pub offset: u64,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// Accepted; completion is reported later through `get_events`.
    Queued,
    /// Completed synchronously.
    Completed,
    /// The engine cannot take more work right now.
    Busy,
}

/// A completion reported back to the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoEvent {
    pub id: u64,
    pub bytes: u32,
    /// `None` on success, otherwise an engine-specific status code.
    pub error: Option<i32>,
}

/// A file the job opens through the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFile {
    pub name: String,
}

/// Metadata for one engine-specific option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOption {
    pub name: &'static str,
    pub lname: &'static str,
    pub help: &'static str,
    pub default: &'static str,
}

/// The callbacks a job invokes on its engine, in lifecycle order:
/// `setup`, `init`, `post_init`, then any number of `queue`/`commit`/`get_events`/`event`,
/// and finally `cleanup`.
///
/// `cleanup` may be called at any point after `setup`, including after a failed `init` or
/// `post_init`, and more than once.
pub trait IoEngine: Send {
    fn setup(&mut self, job: &mut Job) -> Result<(), Error>;

    fn init(&mut self, job: &mut Job) -> Result<(), Error>;

    /// Called after the harness has allocated the job's I/O buffer.
    fn post_init(&mut self, job: &mut Job) -> Result<(), Error>;

    fn queue(&mut self, job: &mut Job, io_u: &IoUnit) -> QueueStatus;

    fn commit(&mut self, job: &mut Job) -> Result<(), Error>;

    /// Reap between `min` and `max` completions, waiting at most `timeout` (forever if `None`).
    fn get_events(
        &mut self,
        job: &mut Job,
        min: usize,
        max: usize,
        timeout: Option<Duration>,
    ) -> Result<usize, Error>;

    /// The `index`-th completion of the last `get_events` batch.
    fn event(&mut self, job: &mut Job, index: usize) -> Option<IoEvent>;

    fn cleanup(&mut self, job: &mut Job);

    fn open_file(&mut self, _job: &mut Job, _file: &JobFile) -> Result<(), Error> {
        Ok(())
    }

    fn close_file(&mut self, _job: &mut Job, _file: &JobFile) -> Result<(), Error> {
        Ok(())
    }

    /// Whether the engine has no more work to report, e.g. because its peer went away.
    fn is_finished(&self) -> bool {
        false
    }
}
