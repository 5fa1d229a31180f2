//! [`Provider`] over librdmacm and libibverbs.
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use rdma::ffi;
use rdma::ibv::{CompChannel, CompletionQueue, Context, ProtectionDomain, WorkCompletion};
use rdma::rdmacm::{self, CmId, EventChannel, QueuePair};

use harness::IoBuffer;

use crate::error::NativeError;
use crate::mr::MrUsage;
use crate::provider::{
    Completion, CompletionOpcode, CompletionStatus, ConnEvent, Connection, ConnectionConfig,
    ConnectionRequest, Endpoint, MemoryRegion, Provider, Readiness,
};

#[inline]
fn native(op: &'static str) -> impl FnOnce(io::Error) -> NativeError {
    move |e| NativeError::new(op, e)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VerbsProvider;

#[derive(Debug)]
pub struct VerbsDevice(Context);

/// The protection domain every other object of the instance is created in.
#[derive(Debug)]
pub struct VerbsPeer {
    ctx: Context,
    pd: Arc<ProtectionDomain>,
}

impl Provider for VerbsProvider {
    type Device = VerbsDevice;
    type Peer = VerbsPeer;
    type MemoryRegion = VerbsMemoryRegion;
    type Endpoint = VerbsEndpoint;
    type Request = VerbsRequest;
    type Connection = VerbsConnection;

    fn lookup_device(&self, ip: IpAddr) -> Result<VerbsDevice, NativeError> {
        // Binding a throwaway id to the address resolves the device serving it.
        let id = unsafe { CmId::create_id(None, 0, ffi::rdma_port_space::RDMA_PS_TCP) }
            .map_err(native("rdma_create_id"))?;
        id.bind_addr(&SocketAddr::new(ip, 0))
            .map_err(native("rdma_bind_addr"))?;
        let ctx = id
            .verbs()
            .ok_or_else(|| NativeError::from_errno("rdma_bind_addr", libc::ENODEV))?;
        if let Err(e) = id.destroy() {
            tracing::warn!("rdma_destroy_id: {}", e);
        }
        tracing::debug!(%ip, device = %ctx.name(), "device found");
        Ok(VerbsDevice(ctx))
    }

    fn new_peer(&self, device: VerbsDevice) -> Result<VerbsPeer, NativeError> {
        let pd = device.0.alloc_pd().map_err(native("ibv_alloc_pd"))?;
        Ok(VerbsPeer {
            ctx: device.0,
            pd: Arc::new(pd),
        })
    }

    fn delete_peer(&self, peer: VerbsPeer) -> Result<(), NativeError> {
        tracing::debug!(device = %peer.ctx.name(), "deleting peer");
        let pd = Arc::try_unwrap(peer.pd)
            .map_err(|_| NativeError::from_errno("ibv_dealloc_pd", libc::EBUSY))?;
        pd.dealloc().map_err(native("ibv_dealloc_pd"))
    }

    fn register(
        &self,
        peer: &VerbsPeer,
        buffer: &IoBuffer,
        usage: MrUsage,
    ) -> Result<VerbsMemoryRegion, NativeError> {
        let mut access = ffi::ibv_access_flags::IBV_ACCESS_LOCAL_WRITE;
        if usage.contains(MrUsage::READ_SRC) {
            access |= ffi::ibv_access_flags::IBV_ACCESS_REMOTE_READ;
        }
        if usage.contains(MrUsage::WRITE_DST) {
            access |= ffi::ibv_access_flags::IBV_ACCESS_REMOTE_WRITE;
        }
        // The job owns the buffer and keeps it mapped until after cleanup.
        let mr = unsafe {
            rdma::mr::MemoryRegion::new(&peer.pd, buffer.as_mut_ptr(), buffer.len(), access)
        }
        .map_err(native("ibv_reg_mr"))?;
        Ok(VerbsMemoryRegion {
            mr,
            _pd: Arc::clone(&peer.pd),
        })
    }

    fn listen(
        &self,
        peer: &VerbsPeer,
        addr: SocketAddr,
        backlog: i32,
    ) -> Result<VerbsEndpoint, NativeError> {
        let channel = EventChannel::create_event_channel()
            .map_err(native("rdma_create_event_channel"))?;
        // The id is dropped before the channel (field order of VerbsEndpoint).
        let id = unsafe { CmId::create_id(Some(&channel), 0, ffi::rdma_port_space::RDMA_PS_TCP) }
            .map_err(native("rdma_create_id"))?;
        id.bind_addr(&addr).map_err(native("rdma_bind_addr"))?;
        id.listen(backlog).map_err(native("rdma_listen"))?;
        Ok(VerbsEndpoint {
            id,
            channel,
            pd: Arc::clone(&peer.pd),
        })
    }
}

#[derive(Debug)]
pub struct VerbsMemoryRegion {
    mr: rdma::mr::MemoryRegion,
    _pd: Arc<ProtectionDomain>,
}

impl MemoryRegion for VerbsMemoryRegion {
    fn addr(&self) -> u64 {
        self.mr.addr()
    }

    fn length(&self) -> u64 {
        self.mr.len() as u64
    }

    fn rkey(&self) -> u32 {
        self.mr.rkey()
    }

    fn deregister(self) -> Result<(), NativeError> {
        let VerbsMemoryRegion { mr, _pd } = self;
        mr.dereg().map_err(native("ibv_dereg_mr"))
    }
}

#[derive(Debug)]
pub struct VerbsEndpoint {
    id: CmId,
    channel: EventChannel,
    pd: Arc<ProtectionDomain>,
}

impl Endpoint for VerbsEndpoint {
    type Request = VerbsRequest;

    fn next_request(&mut self, cfg: ConnectionConfig) -> Result<VerbsRequest, NativeError> {
        let channel = EventChannel::create_event_channel()
            .map_err(native("rdma_create_event_channel"))?;

        let event = self
            .channel
            .get_cm_event()
            .map_err(native("rdma_get_cm_event"))?;
        if event.event() != ffi::rdma_cm_event_type::RDMA_CM_EVENT_CONNECT_REQUEST {
            return Err(NativeError::new(
                "rdma_get_cm_event",
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("expected a connect request, got {}", event),
                ),
            ));
        }
        let id = event.into_request().map_err(native("rdma_get_cm_event"))?;

        match prepare_queues(&self.pd, &channel, &id, &cfg) {
            Ok((comp_channel, cq, qp)) => Ok(VerbsRequest {
                parts: ConnParts {
                    qp,
                    cq,
                    comp_channel,
                    id,
                    channel,
                    _pd: Arc::clone(&self.pd),
                },
            }),
            Err(e) => {
                if let Err(reject_err) = id.reject() {
                    tracing::warn!("rdma_reject: {}", reject_err);
                }
                Err(e)
            }
        }
    }

    fn shutdown(self) -> Result<(), NativeError> {
        let VerbsEndpoint { id, channel, pd } = self;
        let ret = id.destroy().map_err(native("rdma_destroy_id"));
        channel.destroy();
        drop(pd);
        ret
    }
}

/// Move the request to its own event channel and create its completion queue and queue pair.
fn prepare_queues(
    pd: &ProtectionDomain,
    channel: &EventChannel,
    id: &CmId,
    cfg: &ConnectionConfig,
) -> Result<(CompChannel, CompletionQueue, QueuePair), NativeError> {
    id.migrate_id(channel).map_err(native("rdma_migrate_id"))?;
    let ctx = id
        .verbs()
        .ok_or_else(|| NativeError::from_errno("rdma_migrate_id", libc::ENODEV))?;

    let comp_channel = ctx
        .create_comp_channel()
        .map_err(native("ibv_create_comp_channel"))?;
    let cq = ctx
        .create_cq(cfg.cq_size() as i32, Some(&comp_channel))
        .map_err(native("ibv_create_cq"))?;
    cq.req_notify(false).map_err(native("ibv_req_notify_cq"))?;

    let attr = ffi::ibv_qp_init_attr {
        send_cq: cq.as_raw(),
        recv_cq: cq.as_raw(),
        cap: ffi::ibv_qp_cap {
            max_send_wr: cfg.sq_size(),
            max_recv_wr: cfg.rq_size(),
            max_send_sge: 1,
            max_recv_sge: 1,
            max_inline_data: 0,
        },
        qp_type: ffi::ibv_qp_type::IBV_QPT_RC,
        sq_sig_all: 0,
        ..Default::default()
    };
    let qp = id.create_qp(pd, &attr).map_err(native("rdma_create_qp"))?;
    Ok((comp_channel, cq, qp))
}

/// Native objects of one connection, in release order.
#[derive(Debug)]
struct ConnParts {
    qp: QueuePair,
    cq: CompletionQueue,
    comp_channel: CompChannel,
    id: CmId,
    channel: EventChannel,
    _pd: Arc<ProtectionDomain>,
}

impl ConnParts {
    /// Release everything, reporting the first failure.
    fn delete(self) -> Result<(), NativeError> {
        let ConnParts {
            qp,
            cq,
            comp_channel,
            id,
            channel,
            _pd,
        } = self;
        let mut ret = Ok(());
        qp.destroy();
        if let Err(e) = cq.destroy() {
            ret = ret.and(Err(NativeError::new("ibv_destroy_cq", e)));
        }
        if let Err(e) = comp_channel.destroy() {
            ret = ret.and(Err(NativeError::new("ibv_destroy_comp_channel", e)));
        }
        if let Err(e) = id.destroy() {
            ret = ret.and(Err(NativeError::new("rdma_destroy_id", e)));
        }
        channel.destroy();
        ret
    }
}

#[derive(Debug)]
pub struct VerbsRequest {
    parts: ConnParts,
}

impl ConnectionRequest for VerbsRequest {
    type Connection = VerbsConnection;

    fn accept(self, private_data: &[u8]) -> Result<VerbsConnection, (NativeError, Self)> {
        let private_data_len = match u8::try_from(private_data.len()) {
            Ok(len) => len,
            Err(_) => return Err((NativeError::from_errno("rdma_accept", libc::EINVAL), self)),
        };
        let param = ffi::rdma_conn_param {
            private_data: private_data.as_ptr() as *const _,
            private_data_len,
            responder_resources: u8::MAX,
            initiator_depth: u8::MAX,
            flow_control: 1,
            retry_count: 7,
            rnr_retry_count: 7,
            ..Default::default()
        };
        match self.parts.id.accept(&param) {
            Ok(()) => Ok(VerbsConnection {
                parts: self.parts,
                disconnected: false,
            }),
            Err(e) => Err((NativeError::new("rdma_accept", e), self)),
        }
    }

    fn reject(self) -> Result<(), NativeError> {
        let ret = self.parts.id.reject().map_err(native("rdma_reject"));
        let deleted = self.parts.delete();
        ret.and(deleted)
    }
}

#[derive(Debug)]
pub struct VerbsConnection {
    parts: ConnParts,
    disconnected: bool,
}

fn conn_event(event: ffi::rdma_cm_event_type::Type) -> ConnEvent {
    use ffi::rdma_cm_event_type as t;
    match event {
        t::RDMA_CM_EVENT_ESTABLISHED => ConnEvent::Established,
        t::RDMA_CM_EVENT_DISCONNECTED => ConnEvent::Closed,
        t::RDMA_CM_EVENT_DEVICE_REMOVAL => ConnEvent::Lost,
        t::RDMA_CM_EVENT_REJECTED => ConnEvent::Rejected,
        t::RDMA_CM_EVENT_CONNECT_ERROR
        | t::RDMA_CM_EVENT_UNREACHABLE
        | t::RDMA_CM_EVENT_ADDR_ERROR
        | t::RDMA_CM_EVENT_ROUTE_ERROR => ConnEvent::Unreachable,
        other => ConnEvent::Undefined(other as i32),
    }
}

fn completion(wc: &WorkCompletion) -> Completion {
    use ffi::ibv_wc_opcode as op;
    let opcode = match wc.opcode {
        op::IBV_WC_RDMA_READ => CompletionOpcode::Read,
        op::IBV_WC_RDMA_WRITE => CompletionOpcode::Write,
        op::IBV_WC_SEND => CompletionOpcode::Send,
        op::IBV_WC_RECV => CompletionOpcode::Recv,
        op::IBV_WC_RECV_RDMA_WITH_IMM => CompletionOpcode::RecvWithImm,
        other => CompletionOpcode::Other(other as u32),
    };
    let status = if wc.status == ffi::ibv_wc_status::IBV_WC_SUCCESS {
        CompletionStatus::Success
    } else {
        CompletionStatus::Failed(wc.status as i32)
    };
    Completion {
        wr_id: wc.wr_id,
        opcode,
        status,
        byte_len: wc.byte_len,
    }
}

impl Connection for VerbsConnection {
    fn next_event(&mut self, timeout: Option<Duration>) -> Result<Option<ConnEvent>, NativeError> {
        let event = match timeout {
            None => Some(self.parts.channel.get_cm_event()),
            Some(t) => self.parts.channel.poll_event(Some(t)).transpose(),
        };
        match event {
            None => Ok(None),
            Some(event) => {
                let event = event.map_err(native("rdma_get_cm_event"))?;
                tracing::debug!(%event, status = event.status(), "connection event");
                Ok(Some(conn_event(event.event())))
            }
        }
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<Readiness, NativeError> {
        let fds = [
            self.parts.comp_channel.as_raw_fd(),
            self.parts.channel.as_raw_fd(),
        ];
        let ready = rdmacm::poll_readable(&fds, timeout).map_err(native("poll"))?;
        if ready[0] {
            self.parts
                .comp_channel
                .get_cq_event()
                .map_err(native("ibv_get_cq_event"))?;
            self.parts
                .cq
                .req_notify(false)
                .map_err(native("ibv_req_notify_cq"))?;
            Ok(Readiness::Completions)
        } else if ready[1] {
            Ok(Readiness::Event)
        } else {
            Ok(Readiness::TimedOut)
        }
    }

    fn poll_completions(
        &mut self,
        out: &mut Vec<Completion>,
        max: usize,
    ) -> Result<usize, NativeError> {
        let mut wcs = Vec::new();
        let n = self
            .parts
            .cq
            .poll(&mut wcs, max)
            .map_err(native("ibv_poll_cq"))?;
        out.extend(wcs.iter().map(completion));
        Ok(n)
    }

    fn disconnect(&mut self) -> Result<(), NativeError> {
        if self.disconnected {
            return Ok(());
        }
        self.parts.id.disconnect().map_err(native("rdma_disconnect"))?;
        self.disconnected = true;
        Ok(())
    }

    fn delete(self) -> Result<(), NativeError> {
        self.parts.delete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wc(opcode: ffi::ibv_wc_opcode::Type, status: ffi::ibv_wc_status::Type) -> WorkCompletion {
        WorkCompletion {
            wr_id: 42,
            status,
            opcode,
            vendor_err: 0,
            byte_len: 4096,
        }
    }

    #[test]
    fn cm_events() {
        use ffi::rdma_cm_event_type as t;
        assert_eq!(conn_event(t::RDMA_CM_EVENT_ESTABLISHED), ConnEvent::Established);
        assert_eq!(conn_event(t::RDMA_CM_EVENT_DISCONNECTED), ConnEvent::Closed);
        assert_eq!(conn_event(t::RDMA_CM_EVENT_DEVICE_REMOVAL), ConnEvent::Lost);
        assert_eq!(conn_event(t::RDMA_CM_EVENT_REJECTED), ConnEvent::Rejected);
        for unreachable in [
            t::RDMA_CM_EVENT_CONNECT_ERROR,
            t::RDMA_CM_EVENT_UNREACHABLE,
            t::RDMA_CM_EVENT_ADDR_ERROR,
            t::RDMA_CM_EVENT_ROUTE_ERROR,
        ] {
            assert_eq!(conn_event(unreachable), ConnEvent::Unreachable);
        }
        assert_eq!(
            conn_event(t::RDMA_CM_EVENT_TIMEWAIT_EXIT),
            ConnEvent::Undefined(t::RDMA_CM_EVENT_TIMEWAIT_EXIT as i32)
        );
    }

    #[test]
    fn work_completions() {
        use ffi::ibv_wc_opcode as op;
        use ffi::ibv_wc_status as st;

        let c = completion(&wc(op::IBV_WC_RDMA_READ, st::IBV_WC_SUCCESS));
        assert_eq!(c.wr_id, 42);
        assert_eq!(c.byte_len, 4096);
        assert_eq!(c.opcode, CompletionOpcode::Read);
        assert_eq!(c.status, CompletionStatus::Success);

        assert_eq!(
            completion(&wc(op::IBV_WC_RDMA_WRITE, st::IBV_WC_SUCCESS)).opcode,
            CompletionOpcode::Write
        );
        assert_eq!(
            completion(&wc(op::IBV_WC_SEND, st::IBV_WC_SUCCESS)).opcode,
            CompletionOpcode::Send
        );
        assert_eq!(
            completion(&wc(op::IBV_WC_RECV, st::IBV_WC_SUCCESS)).opcode,
            CompletionOpcode::Recv
        );
        assert_eq!(
            completion(&wc(op::IBV_WC_RECV_RDMA_WITH_IMM, st::IBV_WC_SUCCESS)).opcode,
            CompletionOpcode::RecvWithImm
        );
        assert_eq!(
            completion(&wc(op::IBV_WC_COMP_SWAP, st::IBV_WC_SUCCESS)).opcode,
            CompletionOpcode::Other(op::IBV_WC_COMP_SWAP as u32)
        );

        let failed = completion(&wc(op::IBV_WC_RDMA_WRITE, st::IBV_WC_REM_ACCESS_ERR));
        assert_eq!(
            failed.status,
            CompletionStatus::Failed(st::IBV_WC_REM_ACCESS_ERR as i32)
        );
        assert_eq!(
            harness::IoEvent::from(&failed).error,
            Some(st::IBV_WC_REM_ACCESS_ERR as i32)
        );
    }
}
