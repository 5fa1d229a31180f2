//! Fits the connection's completion queue into the harness's poll-then-fetch protocol.
use std::time::{Duration, Instant};

use harness::IoEvent;

use crate::provider::{Completion, ConnEvent, Connection, Readiness};
use crate::Error;

#[derive(Debug, Default)]
pub struct CompletionReporter {
    batch: Vec<Completion>,
    peer_closed: bool,
}

impl CompletionReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the client has closed or lost the connection.
    #[inline]
    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// Collect between `min` and `max` completions from `conn`, oldest first.
    ///
    /// Returns as soon as `min` completions are ready, or with whatever is ready once
    /// `timeout` elapses or the client goes away. Blocks on the connection while waiting.
    /// Without a connection there is nothing to report.
    pub fn get_events<C: Connection>(
        &mut self,
        conn: Option<&mut C>,
        min: usize,
        max: usize,
        timeout: Option<Duration>,
    ) -> Result<usize, Error> {
        self.batch.clear();
        let conn = match conn {
            Some(conn) => conn,
            None => return Ok(0),
        };
        if max == 0 {
            return Ok(0);
        }
        let min = min.min(max);
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let ready = self.batch.len();
            if ready < max {
                conn.poll_completions(&mut self.batch, max - ready)
                    .map_err(Error::CompletionFailed)?;
            }
            let ready = self.batch.len();
            if ready >= min || self.peer_closed {
                return Ok(ready);
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(ready);
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            match conn.wait(remaining).map_err(Error::CompletionFailed)? {
                Readiness::Completions | Readiness::TimedOut => {}
                Readiness::Event => self.drain_events(conn)?,
            }
        }
    }

    fn drain_events<C: Connection>(&mut self, conn: &mut C) -> Result<(), Error> {
        while let Some(event) = conn
            .next_event(Some(Duration::ZERO))
            .map_err(Error::EventFailed)?
        {
            match event {
                ConnEvent::Closed | ConnEvent::Lost => {
                    tracing::info!("{}", event);
                    self.peer_closed = true;
                }
                other => tracing::warn!("ignoring connection event: {}", other),
            }
        }
        Ok(())
    }

    /// The `index`-th completion of the last batch.
    pub fn event(&self, index: usize) -> Option<IoEvent> {
        self.batch.get(index).map(IoEvent::from)
    }
}
