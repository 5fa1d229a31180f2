#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use harness::{IoBuffer, Job};
use rpma_server::mr::MrUsage;
use rpma_server::provider::{
    Completion, CompletionOpcode, CompletionStatus, Connection, ConnectionRequest, Endpoint,
    MemoryRegion, Readiness,
};
use rpma_server::{ConnEvent, ConnectionConfig, NativeError, Provider};

pub const RKEY: u32 = 0x1234;

/// What the fake device does, and what it saw.
#[derive(Debug)]
pub struct State {
    /// Calls that fail, with the errno they fail with.
    pub fail: HashMap<&'static str, i32>,
    /// Connection events in delivery order, starting with the handshake.
    pub events: VecDeque<ConnEvent>,
    /// Completions visible to the first poll.
    pub completions: VecDeque<Completion>,
    /// Completions that only show up once the engine waits on the connection.
    pub deferred: VecDeque<Completion>,

    pub calls: Vec<&'static str>,
    pub configs: Vec<(u32, u32, u32)>,
    pub private_data: Vec<Vec<u8>>,
    pub usages: Vec<MrUsage>,
    pub bound: Vec<IpAddr>,
    pub listened: Vec<SocketAddr>,
}

impl Default for State {
    fn default() -> Self {
        State {
            fail: HashMap::new(),
            events: VecDeque::from(vec![ConnEvent::Established, ConnEvent::Closed]),
            completions: VecDeque::new(),
            deferred: VecDeque::new(),
            calls: Vec::new(),
            configs: Vec::new(),
            private_data: Vec::new(),
            usages: Vec::new(),
            bound: Vec::new(),
            listened: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    state: Arc<Mutex<State>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn fail(&self, call: &'static str, errno: i32) -> &Self {
        self.state().fail.insert(call, errno);
        self
    }

    pub fn set_events(&self, events: Vec<ConnEvent>) -> &Self {
        self.state().events = events.into();
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == call).count()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.state().calls.iter().position(|c| *c == call)
    }
}

fn record(state: &Arc<Mutex<State>>, call: &'static str) -> Result<(), NativeError> {
    let mut state = state.lock().unwrap();
    state.calls.push(call);
    match state.fail.get(call) {
        Some(&errno) => Err(NativeError::from_errno(call, errno)),
        None => Ok(()),
    }
}

pub fn completion(wr_id: u64) -> Completion {
    Completion {
        wr_id,
        opcode: CompletionOpcode::Read,
        status: CompletionStatus::Success,
        byte_len: 0,
    }
}

#[derive(Debug)]
pub struct MockDevice;

#[derive(Debug)]
pub struct MockPeer;

#[derive(Debug)]
pub struct MockRegion {
    addr: u64,
    length: u64,
    state: Arc<Mutex<State>>,
}

impl MemoryRegion for MockRegion {
    fn addr(&self) -> u64 {
        self.addr
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn rkey(&self) -> u32 {
        RKEY
    }

    fn deregister(self) -> Result<(), NativeError> {
        record(&self.state, "deregister")
    }
}

#[derive(Debug)]
pub struct MockEndpoint {
    state: Arc<Mutex<State>>,
}

impl Endpoint for MockEndpoint {
    type Request = MockRequest;

    fn next_request(&mut self, cfg: ConnectionConfig) -> Result<MockRequest, NativeError> {
        self.state
            .lock()
            .unwrap()
            .configs
            .push((cfg.sq_size(), cfg.rq_size(), cfg.cq_size()));
        record(&self.state, "next_request")?;
        Ok(MockRequest {
            state: Arc::clone(&self.state),
        })
    }

    fn shutdown(self) -> Result<(), NativeError> {
        record(&self.state, "endpoint_shutdown")
    }
}

#[derive(Debug)]
pub struct MockRequest {
    state: Arc<Mutex<State>>,
}

impl ConnectionRequest for MockRequest {
    type Connection = MockConnection;

    fn accept(self, private_data: &[u8]) -> Result<MockConnection, (NativeError, Self)> {
        self.state
            .lock()
            .unwrap()
            .private_data
            .push(private_data.to_vec());
        if let Err(e) = record(&self.state, "accept") {
            return Err((e, self));
        }
        Ok(MockConnection {
            state: Arc::clone(&self.state),
        })
    }

    fn reject(self) -> Result<(), NativeError> {
        record(&self.state, "reject")
    }
}

#[derive(Debug)]
pub struct MockConnection {
    state: Arc<Mutex<State>>,
}

impl Connection for MockConnection {
    fn next_event(&mut self, timeout: Option<Duration>) -> Result<Option<ConnEvent>, NativeError> {
        record(&self.state, "next_event")?;
        match self.state.lock().unwrap().events.pop_front() {
            Some(event) => Ok(Some(event)),
            None if timeout.is_some() => Ok(None),
            // Nothing would ever arrive.
            None => Err(NativeError::new(
                "rdma_get_cm_event",
                io::Error::from_raw_os_error(libc::ECONNRESET),
            )),
        }
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<Readiness, NativeError> {
        {
            let mut state = self.state.lock().unwrap();
            if !state.completions.is_empty() {
                return Ok(Readiness::Completions);
            }
            if let Some(c) = state.deferred.pop_front() {
                state.completions.push_back(c);
                return Ok(Readiness::Completions);
            }
            if !state.events.is_empty() {
                return Ok(Readiness::Event);
            }
        }
        thread::sleep(timeout.unwrap_or(Duration::from_millis(1)));
        Ok(Readiness::TimedOut)
    }

    fn poll_completions(
        &mut self,
        out: &mut Vec<Completion>,
        max: usize,
    ) -> Result<usize, NativeError> {
        let mut state = self.state.lock().unwrap();
        let n = state.completions.len().min(max);
        out.extend(state.completions.drain(..n));
        Ok(n)
    }

    fn disconnect(&mut self) -> Result<(), NativeError> {
        record(&self.state, "disconnect")
    }

    fn delete(self) -> Result<(), NativeError> {
        record(&self.state, "conn_delete")
    }
}

impl Provider for MockProvider {
    type Device = MockDevice;
    type Peer = MockPeer;
    type MemoryRegion = MockRegion;
    type Endpoint = MockEndpoint;
    type Request = MockRequest;
    type Connection = MockConnection;

    fn lookup_device(&self, ip: IpAddr) -> Result<MockDevice, NativeError> {
        self.state().bound.push(ip);
        record(&self.state, "lookup_device")?;
        Ok(MockDevice)
    }

    fn new_peer(&self, _device: MockDevice) -> Result<MockPeer, NativeError> {
        record(&self.state, "new_peer")?;
        Ok(MockPeer)
    }

    fn delete_peer(&self, _peer: MockPeer) -> Result<(), NativeError> {
        record(&self.state, "delete_peer")
    }

    fn register(
        &self,
        _peer: &MockPeer,
        buffer: &IoBuffer,
        usage: MrUsage,
    ) -> Result<MockRegion, NativeError> {
        self.state().usages.push(usage);
        record(&self.state, "register")?;
        Ok(MockRegion {
            addr: buffer.as_ptr() as u64,
            length: buffer.len() as u64,
            state: Arc::clone(&self.state),
        })
    }

    fn listen(
        &self,
        _peer: &MockPeer,
        addr: SocketAddr,
        _backlog: i32,
    ) -> Result<MockEndpoint, NativeError> {
        self.state().listened.push(addr);
        record(&self.state, "listen")?;
        Ok(MockEndpoint {
            state: Arc::clone(&self.state),
        })
    }
}

pub const BUFFER_SIZE: usize = 64 * 1024;

/// A job listening on 127.0.0.1:7777 with a registered-sized buffer.
pub fn job(io_depth: u32) -> Job {
    let mut job = Job::new("server", io_depth).with_engine_options(
        r#"
        listen_ip = "127.0.0.1"
        listen_port = "7777"
        close_timeout_ms = 20
        "#,
    );
    job.alloc_buffer(BUFFER_SIZE).unwrap();
    job
}
