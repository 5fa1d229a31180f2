//! Releases whatever the engine managed to create, in dependency order.
use std::fmt;
use std::time::Duration;

use crate::mr::MemoryRegistration;
use crate::provider::{ConnEvent, Connection, Endpoint, Provider};
use crate::Error;

/// The native objects owned by one engine instance. Each slot is filled as setup progresses
/// and emptied by [`teardown`].
pub struct Resources<P: Provider> {
    pub peer: Option<P::Peer>,
    pub mr: Option<MemoryRegistration<P::MemoryRegion>>,
    pub endpoint: Option<P::Endpoint>,
    pub conn: Option<P::Connection>,
}

impl<P: Provider> Default for Resources<P> {
    fn default() -> Self {
        Resources {
            peer: None,
            mr: None,
            endpoint: None,
            conn: None,
        }
    }
}

impl<P: Provider> fmt::Debug for Resources<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resources")
            .field("peer", &self.peer.is_some())
            .field("mr", &self.mr.is_some())
            .field("endpoint", &self.endpoint.is_some())
            .field("conn", &self.conn.is_some())
            .finish()
    }
}

impl<P: Provider> Resources<P> {
    pub fn is_empty(&self) -> bool {
        self.peer.is_none() && self.mr.is_none() && self.endpoint.is_none() && self.conn.is_none()
    }
}

/// Release everything in `res`:
///
/// 1. shut down a leftover endpoint;
/// 2. unless the client already closed, wait up to `close_timeout` for it to do so;
/// 3. disconnect, then delete the connection;
/// 4. deregister the memory;
/// 5. delete the peer.
///
/// A failing step does not stop the following ones. All failures are returned in order.
/// Running it again on the same resources releases nothing.
pub fn teardown<P: Provider>(
    provider: &P,
    res: &mut Resources<P>,
    close_timeout: Duration,
    peer_closed: bool,
) -> Vec<Error> {
    let mut errors = Vec::new();

    if let Some(endpoint) = res.endpoint.take() {
        if let Err(e) = endpoint.shutdown() {
            errors.push(Error::EndpointShutdownFailed(e));
        }
    }

    if let Some(conn) = res.conn.as_mut() {
        if !peer_closed {
            match conn.next_event(Some(close_timeout)) {
                Ok(Some(ConnEvent::Closed)) => tracing::debug!("client closed the connection"),
                Ok(Some(got)) => errors.push(Error::UnexpectedEventFailed {
                    expected: ConnEvent::Closed,
                    got,
                }),
                Ok(None) => tracing::warn!(
                    "client did not close the connection within {:?}",
                    close_timeout
                ),
                Err(e) => errors.push(Error::EventFailed(e)),
            }
        }

        if let Err(e) = conn.disconnect() {
            errors.push(Error::DisconnectFailed(e));
        }
    }

    if let Some(conn) = res.conn.take() {
        if let Err(e) = conn.delete() {
            errors.push(Error::ConnectionDeleteFailed(e));
        }
    }

    if let Some(mr) = res.mr.take() {
        if let Err(e) = mr.deregister() {
            errors.push(Error::DeregistrationFailed(e));
        }
    }

    if let Some(peer) = res.peer.take() {
        if let Err(e) = provider.delete_peer(peer) {
            errors.push(Error::PeerDeleteFailed(e));
        }
    }

    errors
}
