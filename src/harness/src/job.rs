use crate::buffer::IoBuffer;
use crate::engine::JobFile;
use crate::Error;

/// Per-job context shared between the harness and an engine instance.
#[derive(Debug)]
pub struct Job {
    name: String,
    io_depth: u32,
    engine_options: Option<String>,
    files: Vec<JobFile>,
    buffer: Option<IoBuffer>,
    errors: Vec<Error>,
}

impl Job {
    pub fn new(name: impl Into<String>, io_depth: u32) -> Self {
        Job {
            name: name.into(),
            io_depth,
            engine_options: None,
            files: Vec::new(),
            buffer: None,
            errors: Vec::new(),
        }
    }

    /// Attach the engine option string (TOML) passed to the engine's `setup`.
    pub fn with_engine_options(mut self, options: impl Into<String>) -> Self {
        self.engine_options = Some(options.into());
        self
    }

    pub fn with_file(mut self, file: JobFile) -> Self {
        self.files.push(file);
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn io_depth(&self) -> u32 {
        self.io_depth
    }

    #[inline]
    pub fn engine_options(&self) -> Option<&str> {
        self.engine_options.as_deref()
    }

    #[inline]
    pub fn files(&self) -> &[JobFile] {
        &self.files
    }

    /// Allocate the job's I/O buffer. Replaces any previous buffer.
    pub fn alloc_buffer(&mut self, len: usize) -> Result<&IoBuffer, Error> {
        let buffer = IoBuffer::new(len)?;
        Ok(self.buffer.insert(buffer))
    }

    #[inline]
    pub fn buffer(&self) -> Option<&IoBuffer> {
        self.buffer.as_ref()
    }

    /// Report an error on the job's error channel.
    pub fn verror(&mut self, err: Error) {
        tracing::error!(job = %self.name, code = err.code(), "{}", err);
        self.errors.push(err);
    }

    #[inline]
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// The first error reported on this job, if any.
    #[inline]
    pub fn error(&self) -> Option<&Error> {
        self.errors.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verror_records_in_order() {
        let mut job = Job::new("job0", 4);
        assert!(job.error().is_none());
        job.verror(Error::Buffer("first".to_owned()));
        job.verror(Error::NotFound("second".to_owned()));
        assert_eq!(job.errors().len(), 2);
        assert_eq!(job.error(), Some(&Error::Buffer("first".to_owned())));
    }

    #[test]
    fn builder_sets_options() {
        let job = Job::new("job1", 8).with_engine_options("listen_ip = \"10.0.0.1\"");
        assert_eq!(job.io_depth(), 8);
        assert_eq!(job.engine_options(), Some("listen_ip = \"10.0.0.1\""));
        assert!(job.buffer().is_none());
    }
}
