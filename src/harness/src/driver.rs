//! Runs one job through the full engine lifecycle.
use std::time::Duration;

use crate::engine::IoEngine;
use crate::job::Job;
use crate::Error;

/// Drive `engine` from `setup` to `cleanup`, waiting up to `poll_interval` at a time for
/// completions until the engine reports it is finished.
///
/// Returns the number of completions reaped. The first error is also recorded on the job.
/// `cleanup` runs no matter where the lifecycle stopped.
pub fn run(
    engine: &mut dyn IoEngine,
    job: &mut Job,
    poll_interval: Duration,
) -> Result<u64, Error> {
    let ret = run_until_finished(engine, job, poll_interval);
    if let Err(e) = &ret {
        job.verror(e.clone());
    }
    engine.cleanup(job);
    ret
}

fn run_until_finished(
    engine: &mut dyn IoEngine,
    job: &mut Job,
    poll_interval: Duration,
) -> Result<u64, Error> {
    engine.setup(job)?;
    engine.init(job)?;
    engine.post_init(job)?;
    tracing::info!(job = job.name(), "engine ready");

    let files = job.files().to_vec();
    for file in &files {
        engine.open_file(job, file)?;
    }

    let max = job.io_depth() as usize;
    let mut reaped = 0u64;
    while !engine.is_finished() {
        let n = engine.get_events(job, 1, max, Some(poll_interval))?;
        for i in 0..n {
            match engine.event(job, i) {
                Some(ev) if ev.error.is_some() => {
                    tracing::warn!(job = job.name(), ?ev, "completion with error")
                }
                Some(ev) => tracing::trace!(job = job.name(), ?ev, "completion"),
                None => break,
            }
            reaped += 1;
        }
    }

    for file in &files {
        engine.close_file(job, file)?;
    }
    tracing::info!(job = job.name(), reaped, "engine finished");
    Ok(reaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{IoEvent, IoUnit, QueueStatus};

    #[derive(Default)]
    struct Countdown {
        left: usize,
        calls: Vec<&'static str>,
        fail_init: bool,
    }

    impl IoEngine for Countdown {
        fn setup(&mut self, _job: &mut Job) -> Result<(), Error> {
            self.calls.push("setup");
            Ok(())
        }
        fn init(&mut self, _job: &mut Job) -> Result<(), Error> {
            self.calls.push("init");
            if self.fail_init {
                return Err(Error::Engine {
                    op: "init".to_owned(),
                    code: libc::ENODEV,
                    message: "no device".to_owned(),
                });
            }
            Ok(())
        }
        fn post_init(&mut self, _job: &mut Job) -> Result<(), Error> {
            self.calls.push("post_init");
            Ok(())
        }
        fn queue(&mut self, _job: &mut Job, _io_u: &IoUnit) -> QueueStatus {
            QueueStatus::Queued
        }
        fn commit(&mut self, _job: &mut Job) -> Result<(), Error> {
            Ok(())
        }
        fn get_events(
            &mut self,
            _job: &mut Job,
            _min: usize,
            max: usize,
            _timeout: Option<Duration>,
        ) -> Result<usize, Error> {
            let n = self.left.min(max);
            self.left -= n;
            Ok(n)
        }
        fn event(&mut self, _job: &mut Job, index: usize) -> Option<IoEvent> {
            Some(IoEvent {
                id: index as u64,
                bytes: 0,
                error: None,
            })
        }
        fn cleanup(&mut self, _job: &mut Job) {
            self.calls.push("cleanup");
        }
        fn is_finished(&self) -> bool {
            self.left == 0
        }
    }

    #[test]
    fn reaps_until_finished() {
        let mut engine = Countdown {
            left: 10,
            ..Default::default()
        };
        let mut job = Job::new("drain", 4);
        let reaped = run(&mut engine, &mut job, Duration::from_millis(1)).unwrap();
        assert_eq!(reaped, 10);
        assert_eq!(engine.calls, ["setup", "init", "post_init", "cleanup"]);
        assert!(job.errors().is_empty());
    }

    #[test]
    fn cleanup_runs_after_failed_init() {
        let mut engine = Countdown {
            left: 1,
            fail_init: true,
            ..Default::default()
        };
        let mut job = Job::new("broken", 1);
        let err = run(&mut engine, &mut job, Duration::from_millis(1)).unwrap_err();
        assert_eq!(err.code(), libc::ENODEV);
        assert_eq!(engine.calls, ["setup", "init", "cleanup"]);
        assert_eq!(job.error(), Some(&err));
    }
}
