//! Scripted socket table for handler tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relay_reactor::{Engine, Handle, Multiplexer, Readiness, Sockets};

use super::backend::Backend;
use super::forward::Forward;
use super::listener::{ProxyContext, RelayOptions};

/// Next result of a `recv` call.
#[derive(Debug)]
pub enum RecvStep {
    Data(Vec<u8>),
    Eof,
    WouldBlock,
    Fail(io::ErrorKind),
}

/// Next result of a `send` call.
#[derive(Debug)]
pub enum SendStep {
    /// Accept at most this many bytes.
    Take(usize),
    WouldBlock,
    Zero,
    Fail(io::ErrorKind),
}

/// In-memory [`Sockets`] and [`Multiplexer`].
///
/// `recv` with nothing scripted would-block; `send` with nothing scripted
/// takes the whole buffer.
#[derive(Debug, Default)]
pub struct FakeNet {
    next: usize,
    open: HashSet<Handle>,
    closed: HashSet<Handle>,
    pending_accepts: VecDeque<SocketAddr>,
    recv_script: HashMap<Handle, VecDeque<RecvStep>>,
    send_script: HashMap<Handle, VecDeque<SendStep>>,
    written: HashMap<Handle, Vec<u8>>,
    readiness: VecDeque<Readiness>,
    pub refuse_connect: bool,
    /// Outcomes for successive `finish_connect` calls; empty means
    /// established.
    pub finish_script: VecDeque<io::ErrorKind>,
    pub fail_accept: Option<io::ErrorKind>,
    pub accepted: Vec<Handle>,
    pub connected: Vec<Handle>,
    pub connect_attempts: Vec<SocketAddr>,
}

impl FakeNet {
    pub fn socket(&mut self) -> Handle {
        let handle = Handle::new(self.next);
        self.next += 1;
        self.open.insert(handle);
        handle
    }

    pub fn queue_accept(&mut self) {
        let port = 40000 + self.pending_accepts.len() as u16 + self.accepted.len() as u16;
        self.pending_accepts
            .push_back(SocketAddr::from(([127, 0, 0, 1], port)));
    }

    pub fn feed(&mut self, handle: Handle, step: RecvStep) {
        self.recv_script.entry(handle).or_default().push_back(step);
    }

    pub fn script_send(&mut self, handle: Handle, step: SendStep) {
        self.send_script.entry(handle).or_default().push_back(step);
    }

    pub fn push_ready(&mut self, readiness: Readiness) {
        self.readiness.push_back(readiness);
    }

    pub fn written(&self, handle: Handle) -> &[u8] {
        self.written.get(&handle).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_closed(&self, handle: Handle) -> bool {
        self.closed.contains(&handle)
    }

    fn check_open(&self, handle: Handle) -> io::Result<()> {
        if self.open.contains(&handle) {
            Ok(())
        } else {
            Err(io::Error::from(io::ErrorKind::NotConnected))
        }
    }
}

impl Multiplexer for FakeNet {
    fn wait(
        &mut self,
        _readable: &[Handle],
        _writable: &[Handle],
        _timeout: Duration,
    ) -> io::Result<Readiness> {
        Ok(self.readiness.pop_front().unwrap_or_default())
    }
}

impl Sockets for FakeNet {
    fn accept(&mut self, listener: Handle) -> io::Result<(Handle, SocketAddr)> {
        self.check_open(listener)?;
        if let Some(kind) = self.fail_accept.take() {
            return Err(io::Error::from(kind));
        }
        let peer = self
            .pending_accepts
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
        let handle = self.socket();
        self.accepted.push(handle);
        Ok((handle, peer))
    }

    fn connect(&mut self, addr: SocketAddr) -> io::Result<Handle> {
        self.connect_attempts.push(addr);
        if self.refuse_connect {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        let handle = self.socket();
        self.connected.push(handle);
        Ok(handle)
    }

    fn finish_connect(&mut self, handle: Handle) -> io::Result<()> {
        self.check_open(handle)?;
        match self.finish_script.pop_front() {
            Some(kind) => Err(io::Error::from(kind)),
            None => Ok(()),
        }
    }

    fn recv(&mut self, handle: Handle, buf: &mut [u8]) -> io::Result<usize> {
        self.check_open(handle)?;
        let script = self.recv_script.entry(handle).or_default();
        match script.pop_front() {
            None | Some(RecvStep::WouldBlock) => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            Some(RecvStep::Eof) => Ok(0),
            Some(RecvStep::Fail(kind)) => Err(io::Error::from(kind)),
            Some(RecvStep::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    script.push_front(RecvStep::Data(data[n..].to_vec()));
                }
                Ok(n)
            }
        }
    }

    fn send(&mut self, handle: Handle, buf: &[u8]) -> io::Result<usize> {
        self.check_open(handle)?;
        let step = self
            .send_script
            .get_mut(&handle)
            .and_then(VecDeque::pop_front)
            .unwrap_or(SendStep::Take(usize::MAX));
        match step {
            SendStep::Take(max) => {
                let n = max.min(buf.len());
                self.written
                    .entry(handle)
                    .or_default()
                    .extend_from_slice(&buf[..n]);
                Ok(n)
            }
            SendStep::WouldBlock => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            SendStep::Zero => Ok(0),
            SendStep::Fail(kind) => Err(io::Error::from(kind)),
        }
    }

    fn close(&mut self, handle: Handle) {
        if self.open.remove(&handle) {
            self.closed.insert(handle);
        }
    }

    fn peer_addr(&self, _handle: Handle) -> Option<SocketAddr> {
        None
    }
}

/// Engine over a [`FakeNet`] with its listening handle already armed.
pub struct Setup {
    pub engine: Engine<Forward, FakeNet>,
    pub context: Arc<ProxyContext>,
    pub listener: Handle,
}

impl Setup {
    pub fn new() -> Self {
        Self::with_options(RelayOptions::default())
    }

    pub fn with_recv_block(recv_block: usize) -> Self {
        Self::with_options(RelayOptions {
            recv_block,
            ..RelayOptions::default()
        })
    }

    pub fn with_options(options: RelayOptions) -> Self {
        let mut net = FakeNet::default();
        let listener = net.socket();
        let context = Arc::new(ProxyContext::new(Backend::new("127.0.0.1", 9), options));
        let mut engine = Engine::new(net);
        engine.register_readable(listener, Forward::Accept(Arc::clone(&context)));
        Self {
            engine,
            context,
            listener,
        }
    }

    pub fn net(&mut self) -> &mut FakeNet {
        self.engine.io_mut()
    }

    fn turn_with(&mut self, readiness: Readiness) {
        self.net().push_ready(readiness);
        self.engine.turn().expect("turn failed");
    }

    /// A wait that reports nothing.
    pub fn quiet(&mut self) {
        self.turn_with(Readiness::default());
    }

    pub fn readable(&mut self, handle: Handle) {
        self.turn_with(Readiness {
            readable: vec![handle],
            ..Readiness::default()
        });
    }

    pub fn writable(&mut self, handle: Handle) {
        self.turn_with(Readiness {
            writable: vec![handle],
            ..Readiness::default()
        });
    }

    pub fn exceptional(&mut self, handle: Handle) {
        self.turn_with(Readiness {
            exceptional: vec![handle],
            ..Readiness::default()
        });
    }
}

/// Accept one connection through the listener and complete its backend
/// connect; returns (inbound, outbound).
pub fn pair(setup: &mut Setup) -> (Handle, Handle) {
    let listener = setup.listener;
    setup.net().queue_accept();
    setup.readable(listener);
    let inbound = *setup.net().accepted.last().expect("nothing accepted");
    let outbound = *setup.net().connected.last().expect("nothing connected");
    setup.writable(outbound);
    (inbound, outbound)
}
