use std::io;

use crate::config::ServerOptions;
use crate::error::NativeError;
use crate::provider::{
    ConnEvent, Connection, ConnectionConfig, ConnectionRequest, Endpoint, Provider,
};
use crate::teardown::Resources;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    Listening,
    RequestPending,
    Accepting,
    Established,
    Closing,
    Closed,
}

/// Drives the single connection from listening to established.
#[derive(Debug)]
pub struct Negotiator {
    state: NegotiationState,
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new()
    }
}

impl Negotiator {
    pub fn new() -> Self {
        Negotiator {
            state: NegotiationState::Idle,
        }
    }

    #[inline]
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub(crate) fn transition(&mut self, next: NegotiationState) {
        tracing::debug!(from = ?self.state, to = ?next, "negotiation");
        self.state = next;
    }

    /// Listen on `opts.addr`, take exactly one connection request, accept it with `private_data`
    /// and wait until it is established.
    ///
    /// Objects created along the way are stored in `res` so teardown can release them whatever
    /// the outcome. On failure the negotiator ends up `Closed`.
    pub fn establish<P: Provider>(
        &mut self,
        provider: &P,
        res: &mut Resources<P>,
        opts: &ServerOptions,
        private_data: &[u8],
    ) -> Result<(), Error> {
        let ret = self.try_establish(provider, res, opts, private_data);
        if ret.is_err() {
            self.transition(NegotiationState::Closed);
        }
        ret
    }

    fn try_establish<P: Provider>(
        &mut self,
        provider: &P,
        res: &mut Resources<P>,
        opts: &ServerOptions,
        private_data: &[u8],
    ) -> Result<(), Error> {
        let peer = res.peer.as_ref().ok_or(Error::NotSetUp)?;

        let endpoint = provider
            .listen(peer, opts.addr, opts.backlog)
            .map_err(Error::ListenFailed)?;
        self.transition(NegotiationState::Listening);
        tracing::info!(addr = %opts.addr, "waiting for a connection");

        let request = res
            .endpoint
            .insert(endpoint)
            .next_request(ConnectionConfig::for_io_depth(opts.io_depth));

        // No further connections are expected.
        if let Some(endpoint) = res.endpoint.take() {
            if let Err(e) = endpoint.shutdown() {
                tracing::warn!("{}", Error::EndpointShutdownFailed(e));
            }
        }

        let request = request.map_err(Error::NoRequestFailed)?;
        self.transition(NegotiationState::RequestPending);

        self.transition(NegotiationState::Accepting);
        let conn = match request.accept(private_data) {
            Ok(conn) => conn,
            Err((e, request)) => {
                if let Err(reject_err) = request.reject() {
                    tracing::warn!("failed to reject connection request: {}", reject_err);
                }
                return Err(Error::ConnectFailed(e));
            }
        };

        match res.conn.insert(conn).next_event(None) {
            Ok(Some(ConnEvent::Established)) => {
                self.transition(NegotiationState::Established);
                tracing::info!(addr = %opts.addr, "connection established");
                Ok(())
            }
            Ok(Some(got)) => Err(Error::UnexpectedEventFailed {
                expected: ConnEvent::Established,
                got,
            }),
            Ok(None) => Err(Error::EventFailed(NativeError::new(
                "rdma_get_cm_event",
                io::ErrorKind::TimedOut.into(),
            ))),
            Err(e) => Err(Error::EventFailed(e)),
        }
    }
}
