use std::time::Duration;

use harness::{
    EngineDescriptor, EngineFlags, IoEngine, IoEvent, IoUnit, Job, QueueStatus,
    ENGINE_API_VERSION,
};

use crate::completion::CompletionReporter;
use crate::config::{RpmaServerConfig, ServerOptions, OPTIONS};
use crate::descriptor::MemoryDescriptor;
use crate::negotiator::{NegotiationState, Negotiator};
use crate::peer::bind_peer;
use crate::provider::Provider;
use crate::teardown::{teardown, Resources};
use crate::{mr, Error, ENGINE_NAME};

/// Per-instance state allocated by `setup` and released by `cleanup`.
struct ServerData<P: Provider> {
    config: RpmaServerConfig,
    options: Option<ServerOptions>,
    resources: Resources<P>,
    reporter: CompletionReporter,
}

/// The server side of the RPMA transport: exposes the job buffer to one client.
pub struct RpmaServer<P: Provider> {
    provider: P,
    negotiator: Negotiator,
    data: Option<ServerData<P>>,
}

impl<P: Provider> RpmaServer<P> {
    pub fn new(provider: P) -> Self {
        RpmaServer {
            provider,
            negotiator: Negotiator::new(),
            data: None,
        }
    }

    #[inline]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    #[inline]
    pub fn state(&self) -> NegotiationState {
        self.negotiator.state()
    }

    /// True once the client is gone or the engine has been cleaned up.
    pub fn peer_closed(&self) -> bool {
        self.data.as_ref().map_or(true, |d| d.reporter.peer_closed())
    }

    /// The descriptor of the registered job buffer, once `post_init` has registered it.
    pub fn descriptor(&self) -> Option<MemoryDescriptor> {
        self.data
            .as_ref()
            .and_then(|d| d.resources.mr.as_ref())
            .map(|mr| mr.descriptor())
    }

    pub fn try_setup(&mut self, job: &Job) -> Result<(), Error> {
        if self.data.is_some() {
            return Ok(());
        }
        let config = RpmaServerConfig::new(job.engine_options())?;
        self.data = Some(ServerData {
            config,
            options: None,
            resources: Resources::default(),
            reporter: CompletionReporter::new(),
        });
        Ok(())
    }

    pub fn try_init(&mut self, job: &Job) -> Result<(), Error> {
        let data = self.data.as_mut().ok_or(Error::NotSetUp)?;
        if data.resources.peer.is_some() {
            return Ok(());
        }
        let options = data.config.validate(job.io_depth())?;
        let peer = bind_peer(&self.provider, options.addr.ip())?;
        data.resources.peer = Some(peer);
        data.options = Some(options);
        Ok(())
    }

    pub fn try_post_init(&mut self, job: &Job) -> Result<(), Error> {
        let data = self.data.as_mut().ok_or(Error::NotSetUp)?;
        let options = data.options.as_ref().ok_or(Error::NotSetUp)?;
        let peer = data.resources.peer.as_ref().ok_or(Error::NotSetUp)?;
        let buffer = job.buffer().ok_or(Error::NoBuffer)?;

        let registration = mr::register(&self.provider, peer, buffer, options.placement)?;
        let private_data = registration.descriptor().to_bytes()?;
        data.resources.mr = Some(registration);

        self.negotiator
            .establish(&self.provider, &mut data.resources, options, &private_data)
    }

    pub fn try_get_events(
        &mut self,
        min: usize,
        max: usize,
        timeout: Option<Duration>,
    ) -> Result<usize, Error> {
        let data = self.data.as_mut().ok_or(Error::NotSetUp)?;
        let conn = match self.negotiator.state() {
            NegotiationState::Established => data.resources.conn.as_mut(),
            _ => None,
        };
        data.reporter.get_events(conn, min, max, timeout)
    }

    /// Release everything in dependency order and drop the instance state. Returns the failures
    /// of the individual steps. A second call does nothing.
    pub fn teardown(&mut self) -> Vec<Error> {
        let mut data = match self.data.take() {
            Some(data) => data,
            None => return Vec::new(),
        };
        if !data.resources.is_empty() {
            self.negotiator.transition(NegotiationState::Closing);
        }
        let close_timeout = data
            .options
            .as_ref()
            .map_or(Duration::from_millis(data.config.close_timeout_ms), |o| {
                o.close_timeout
            });
        let errors = teardown(
            &self.provider,
            &mut data.resources,
            close_timeout,
            data.reporter.peer_closed(),
        );
        if self.negotiator.state() != NegotiationState::Idle {
            self.negotiator.transition(NegotiationState::Closed);
        }
        drop(data);
        errors
    }
}

impl<P: Provider + Default + 'static> RpmaServer<P> {
    pub fn engine_descriptor() -> EngineDescriptor {
        EngineDescriptor {
            name: ENGINE_NAME,
            version: ENGINE_API_VERSION,
            flags: EngineFlags::DISKLESS_IO | EngineFlags::UNIDIR | EngineFlags::PIPE_IO,
            options: OPTIONS,
            create: create_engine::<P>,
        }
    }
}

fn create_engine<P: Provider + Default + 'static>() -> Box<dyn IoEngine> {
    Box::new(RpmaServer::new(P::default()))
}

impl<P: Provider> IoEngine for RpmaServer<P> {
    fn setup(&mut self, job: &mut Job) -> Result<(), harness::Error> {
        Ok(self.try_setup(job)?)
    }

    fn init(&mut self, job: &mut Job) -> Result<(), harness::Error> {
        Ok(self.try_init(job)?)
    }

    fn post_init(&mut self, job: &mut Job) -> Result<(), harness::Error> {
        Ok(self.try_post_init(job)?)
    }

    fn queue(&mut self, _job: &mut Job, _io_u: &IoUnit) -> QueueStatus {
        // The client moves the data.
        QueueStatus::Queued
    }

    fn commit(&mut self, _job: &mut Job) -> Result<(), harness::Error> {
        Ok(())
    }

    fn get_events(
        &mut self,
        _job: &mut Job,
        min: usize,
        max: usize,
        timeout: Option<Duration>,
    ) -> Result<usize, harness::Error> {
        Ok(self.try_get_events(min, max, timeout)?)
    }

    fn event(&mut self, _job: &mut Job, index: usize) -> Option<IoEvent> {
        self.data.as_ref()?.reporter.event(index)
    }

    fn cleanup(&mut self, job: &mut Job) {
        for err in self.teardown() {
            job.verror(err.into());
        }
    }

    fn is_finished(&self) -> bool {
        self.peer_closed()
    }
}
