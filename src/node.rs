use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::EngineError;
use crate::scheduler::Time;

/// UDP (8) + IPv4 (20) headers.
const IP_UDP_HEADER: u32 = 28;
/// LLC/SNAP (8) + 802.11 MAC header (24) + FCS (4).
const MAC_OVERHEAD: u32 = 36;

#[derive(Hash, Eq, Clone, Copy, PartialEq, Debug)]
pub enum DeliveryType {
    Delivered,
    NoListener,
    NotAddressed,
}

impl fmt::Display for DeliveryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryType::Delivered => write!(f, "Delivered"),
            DeliveryType::NoListener => write!(f, "No Listener"),
            DeliveryType::NotAddressed => write!(f, "Not Addressed"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceCounters {
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub handshakes: u64,
    pub resolutions: u64,
    pub rx_undeliverable: u64,
}

impl DeviceCounters {
    fn add(&mut self, other: &DeviceCounters) {
        self.tx_packets += other.tx_packets;
        self.rx_packets += other.rx_packets;
        self.tx_bytes += other.tx_bytes;
        self.rx_bytes += other.rx_bytes;
        self.handshakes += other.handshakes;
        self.resolutions += other.resolutions;
        self.rx_undeliverable += other.rx_undeliverable;
    }
}

/// Resolved peer addresses and the time each entry expires.
#[derive(Debug, Default)]
pub struct ArpCache {
    entries: HashMap<Ipv4Addr, Time>,
    alive_timeout: Time,
}

impl ArpCache {
    pub fn new(alive_timeout: Time) -> ArpCache {
        ArpCache {
            entries: HashMap::new(),
            alive_timeout,
        }
    }

    pub fn is_resolved(&self, now: Time, peer: Ipv4Addr) -> bool {
        self.entries.get(&peer).is_some_and(|&expires| now < expires)
    }

    pub fn insert(&mut self, now: Time, peer: Ipv4Addr) {
        self.entries.insert(peer, now.saturating_add(self.alive_timeout));
    }
}

/// A UDP datagram as it leaves a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub port: u16,
    pub payload: u32,
    /// The sender had to resolve `dst` before this frame.
    pub resolved_now: bool,
}

/// Network device of one station. Counts what it sends and receives; the channel
/// itself is ideal, so every frame reaches its destination.
#[derive(Debug)]
pub struct Device {
    node_id: usize,
    device_id: usize,
    address: Ipv4Addr,
    rts_threshold: u32,
    mtu: u32,
    ports: Vec<u16>,
    arp: ArpCache,
    interval: DeviceCounters,
    totals: DeviceCounters,
}

impl Device {
    pub fn new(node_id: usize, address: Ipv4Addr, rts_threshold: u32, mtu: u32, arp_alive_timeout: Time) -> Device {
        Device {
            node_id,
            device_id: 0,
            address,
            rts_threshold,
            mtu,
            ports: Vec::new(),
            arp: ArpCache::new(arp_alive_timeout),
            interval: DeviceCounters::default(),
            totals: DeviceCounters::default(),
        }
    }

    pub fn get_id(&self) -> (usize, usize) {
        (self.node_id, self.device_id)
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Opens a UDP port; datagrams to closed ports are counted as undeliverable.
    pub fn listen(&mut self, port: u16) {
        if !self.ports.contains(&port) {
            self.ports.push(port);
        }
    }

    pub fn totals(&self) -> DeviceCounters {
        let mut totals = self.totals;
        totals.add(&self.interval);
        totals
    }

    /// Rejects payloads whose IP datagram would not fit the device MTU.
    pub fn check_payload(&self, payload: u32) -> Result<(), EngineError> {
        let datagram = payload.checked_add(IP_UDP_HEADER);
        if datagram.map_or(true, |size| size > self.mtu) {
            return Err(EngineError::UnsupportedConfiguration(format!(
                "node {}: {} byte payload exceeds MTU {}",
                self.node_id, payload, self.mtu
            )));
        }
        Ok(())
    }

    pub fn uses_handshake(&self, payload: u32) -> bool {
        payload.saturating_add(IP_UDP_HEADER + MAC_OVERHEAD) > self.rts_threshold
    }

    pub fn is_resolved(&self, now: Time, peer: Ipv4Addr) -> bool {
        self.arp.is_resolved(now, peer)
    }

    pub fn send(&mut self, now: Time, dst: Ipv4Addr, port: u16, payload: u32) -> Frame {
        let resolved_now = !self.arp.is_resolved(now, dst);
        if resolved_now {
            self.interval.resolutions += 1;
            self.arp.insert(now, dst);
        }
        if self.uses_handshake(payload) {
            self.interval.handshakes += 1;
        }
        self.interval.tx_packets += 1;
        self.interval.tx_bytes += u64::from(payload);
        Frame {
            src: self.address,
            dst,
            port,
            payload,
            resolved_now,
        }
    }

    pub fn receive(&mut self, now: Time, frame: &Frame) -> DeliveryType {
        if frame.dst != self.address {
            return DeliveryType::NotAddressed;
        }
        // A resolution request also teaches the target about the requester.
        if frame.resolved_now {
            self.arp.insert(now, frame.src);
        }
        self.interval.rx_packets += 1;
        self.interval.rx_bytes += u64::from(frame.payload);
        if self.ports.contains(&frame.port) {
            DeliveryType::Delivered
        } else {
            self.interval.rx_undeliverable += 1;
            DeliveryType::NoListener
        }
    }

    /// Returns the counters gathered since the previous call and starts a new interval.
    pub fn take_interval(&mut self) -> DeviceCounters {
        let interval = std::mem::take(&mut self.interval);
        self.totals.add(&interval);
        interval
    }
}
