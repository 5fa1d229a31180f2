use std::net::IpAddr;

use crate::provider::Provider;
use crate::Error;

/// Resolve `ip` to its RDMA device and create a peer on it.
pub fn bind_peer<P: Provider>(provider: &P, ip: IpAddr) -> Result<P::Peer, Error> {
    let device = provider
        .lookup_device(ip)
        .map_err(Error::DeviceNotFound)?;
    let peer = provider.new_peer(device).map_err(Error::PeerCreationFailed)?;
    tracing::debug!(%ip, "peer created");
    Ok(peer)
}
