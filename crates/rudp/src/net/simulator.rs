use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::stats::PacketLossSimulation;

#[derive(Debug)]
struct DelayedDatagram {
    release_time: Instant,
    data: Vec<u8>,
    addr: SocketAddr,
}

impl PartialEq for DelayedDatagram {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time
    }
}

impl Eq for DelayedDatagram {}

impl PartialOrd for DelayedDatagram {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedDatagram {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other.release_time.cmp(&self.release_time)
    }
}

/// Holds outbound datagrams back according to a [`PacketLossSimulation`].
#[derive(Debug, Default)]
pub struct NetworkSimulator {
    config: PacketLossSimulation,
    outbound_queue: BinaryHeap<DelayedDatagram>,
}

impl NetworkSimulator {
    pub fn new(config: PacketLossSimulation) -> Self {
        Self {
            config,
            outbound_queue: BinaryHeap::new(),
        }
    }

    pub fn config(&self) -> &PacketLossSimulation {
        &self.config
    }

    pub fn set_config(&mut self, config: PacketLossSimulation) {
        self.config = config;
    }

    pub fn should_drop(&self) -> bool {
        self.config.should_drop()
    }

    pub fn enqueue(&mut self, data: Vec<u8>, addr: SocketAddr, now: Instant) {
        let delay = Duration::from_millis(u64::from(self.config.delay_ms()));
        self.outbound_queue.push(DelayedDatagram {
            release_time: now + delay,
            data,
            addr,
        });
    }

    pub fn take_ready(&mut self, now: Instant) -> Vec<(Vec<u8>, SocketAddr)> {
        let mut ready = Vec::new();
        while self
            .outbound_queue
            .peek()
            .is_some_and(|delayed| delayed.release_time <= now)
        {
            if let Some(delayed) = self.outbound_queue.pop() {
                ready.push((delayed.data, delayed.addr));
            }
        }
        ready
    }

    pub fn pending(&self) -> usize {
        self.outbound_queue.len()
    }
}
