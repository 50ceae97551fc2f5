use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::simulator::NetworkSimulator;
use super::stats::{NetworkStats, PacketLossSimulation};
use super::{DatagramReceiver, DatagramSink};
use crate::lock;

pub const DEFAULT_PORT: u16 = 8008;
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

type Outbound = (Vec<u8>, SocketAddr);

/// UDP socket with a receive thread feeding a [`DatagramReceiver`] and a send
/// thread draining the outbound queue.
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    remote_addr: Option<SocketAddr>,
    outbound_tx: Sender<Outbound>,
    outbound_rx: Mutex<Option<Receiver<Outbound>>>,
    simulator: Mutex<NetworkSimulator>,
    stats: Mutex<NetworkStats>,
    running: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Binds to `addr` to accept sessions.
    pub fn listen<A: ToSocketAddrs>(addr: A) -> io::Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr)?;
        Self::from_socket(socket, None)
    }

    /// Binds an ephemeral local port for talking to `remote`.
    pub fn dial(remote: SocketAddr) -> io::Result<Arc<Self>> {
        let local: SocketAddr = match remote {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local)?;
        Self::from_socket(socket, Some(remote))
    }

    fn from_socket(socket: UdpSocket, remote_addr: Option<SocketAddr>) -> io::Result<Arc<Self>> {
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let local_addr = socket.local_addr()?;
        let (outbound_tx, outbound_rx) = mpsc::channel();

        Ok(Arc::new(Self {
            socket,
            local_addr,
            remote_addr,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            simulator: Mutex::new(NetworkSimulator::default()),
            stats: Mutex::new(NetworkStats::default()),
            running: Arc::new(AtomicBool::new(true)),
            threads: Mutex::new(Vec::new()),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn stats(&self) -> NetworkStats {
        lock(&self.stats).clone()
    }

    pub fn set_loss_simulation(&self, config: PacketLossSimulation) {
        lock(&self.simulator).set_config(config);
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Spawns the receive and send threads. Calling it twice is an error.
    pub fn start(self: &Arc<Self>, receiver: Arc<dyn DatagramReceiver>) -> io::Result<()> {
        let outbound_rx = lock(&self.outbound_rx).take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AlreadyExists, "transport already started")
        })?;

        let recv_transport = Arc::clone(self);
        let recv_thread = thread::Builder::new()
            .name("rudp-recv".into())
            .spawn(move || recv_transport.recv_loop(receiver))?;

        let send_transport = Arc::clone(self);
        let send_thread = thread::Builder::new()
            .name("rudp-send".into())
            .spawn(move || send_transport.send_loop(outbound_rx))?;

        lock(&self.threads).extend([recv_thread, send_thread]);
        log::debug!("Transport on {} started", self.local_addr);
        Ok(())
    }

    /// Stops both threads and waits for them.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let threads: Vec<_> = lock(&self.threads).drain(..).collect();
        for handle in threads {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    fn recv_loop(&self, receiver: Arc<dyn DatagramReceiver>) {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        while self.running.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut buffer) {
                Ok((size, addr)) => {
                    {
                        let mut stats = lock(&self.stats);
                        stats.datagrams_received += 1;
                        stats.bytes_received += size as u64;
                    }
                    receiver.on_datagram(&buffer[..size], addr);
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    log::error!("recv_from on {} failed: {}", self.local_addr, e);
                }
            }
        }
    }

    fn send_loop(&self, outbound_rx: Receiver<Outbound>) {
        while self.running.load(Ordering::SeqCst) {
            match outbound_rx.recv_timeout(POLL_INTERVAL) {
                Ok((data, addr)) => {
                    self.enqueue(data, addr);
                    while let Ok((data, addr)) = outbound_rx.try_recv() {
                        self.enqueue(data, addr);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let ready = lock(&self.simulator).take_ready(Instant::now());
            for (data, addr) in ready {
                self.transmit(&data, addr);
            }
        }
    }

    fn enqueue(&self, data: Vec<u8>, addr: SocketAddr) {
        let mut simulator = lock(&self.simulator);
        if simulator.should_drop() {
            lock(&self.stats).simulated_drops += 1;
            return;
        }
        simulator.enqueue(data, addr, Instant::now());
    }

    fn transmit(&self, data: &[u8], addr: SocketAddr) {
        match self.socket.send_to(data, addr) {
            Ok(bytes) => {
                let mut stats = lock(&self.stats);
                stats.datagrams_sent += 1;
                stats.bytes_sent += bytes as u64;
            }
            Err(e) => {
                lock(&self.stats).send_errors += 1;
                log::error!("send_to {} failed: {}", addr, e);
            }
        }
    }
}

impl DatagramSink for UdpTransport {
    fn send_datagram(&self, data: Vec<u8>, dest: SocketAddr) {
        if self.outbound_tx.send((data, dest)).is_err() {
            log::warn!("Outbound queue closed, dropping datagram to {}", dest);
        }
    }

    fn send_immediate(&self, data: &[u8], dest: SocketAddr) {
        if lock(&self.simulator).should_drop() {
            lock(&self.stats).simulated_drops += 1;
            return;
        }
        self.transmit(data, dest);
    }
}
