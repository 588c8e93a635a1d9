//! In-memory [`Port`] used by every test in the workspace instead of real
//! link hardware.

use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::Mutex;

use artalk_ddp::Datagram;

use crate::error::PortRangeError;
use crate::port::Port;

/// A `Datagram` captured by a [`MemoryPort`], tagged with how it was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Unicast { network: u16, node: u8, datagram: Datagram },
    Broadcast { datagram: Datagram },
    Multicast { zone_name: Vec<u8>, datagram: Datagram },
}

/// A `Port` backed by `Vec`s instead of hardware: unicasts, broadcasts,
/// and multicasts are captured rather than transmitted. Tests drive
/// inbound traffic by calling `Router::inbound` directly with a
/// `MemoryPort` as `rx_port`.
#[derive(Debug)]
pub struct MemoryPort {
    name: String,
    network: AtomicU16,
    node: AtomicU8,
    network_min: AtomicU16,
    network_max: AtomicU16,
    extended_network: bool,
    sent: Mutex<Vec<Sent>>,
}

impl MemoryPort {
    pub fn new(name: impl Into<String>, extended_network: bool) -> Self {
        Self {
            name: name.into(),
            network: AtomicU16::new(0),
            node: AtomicU8::new(0),
            network_min: AtomicU16::new(0),
            network_max: AtomicU16::new(0),
            extended_network,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Build a port that already has its node address and range, as if a
    /// prior seed exchange had already happened.
    pub fn connected(name: impl Into<String>, network: u16, node: u8, extended_network: bool) -> Self {
        let port = Self::new(name, extended_network);
        port.network.store(network, Ordering::Release);
        port.node.store(node, Ordering::Release);
        port.network_min.store(network, Ordering::Release);
        port.network_max.store(network, Ordering::Release);
        port
    }

    pub fn set_node_address(&self, network: u16, node: u8) {
        self.network.store(network, Ordering::Release);
        self.node.store(node, Ordering::Release);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Port for MemoryPort {
    fn network(&self) -> u16 {
        self.network.load(Ordering::Acquire)
    }

    fn node(&self) -> u8 {
        self.node.load(Ordering::Acquire)
    }

    fn network_min(&self) -> u16 {
        self.network_min.load(Ordering::Acquire)
    }

    fn network_max(&self) -> u16 {
        self.network_max.load(Ordering::Acquire)
    }

    fn extended_network(&self) -> bool {
        self.extended_network
    }

    fn set_network_range(&self, network_min: u16, network_max: u16) -> Result<(), PortRangeError> {
        let current_min = self.network_min.load(Ordering::Acquire);
        let current_max = self.network_max.load(Ordering::Acquire);
        if current_min != 0 || current_max != 0 {
            return Err(PortRangeError {
                network_min: current_min,
                network_max: current_max,
            });
        }
        self.network_min.store(network_min, Ordering::Release);
        self.network_max.store(network_max, Ordering::Release);
        Ok(())
    }

    fn unicast(&self, network: u16, node: u8, datagram: Datagram) {
        self.sent.lock().unwrap().push(Sent::Unicast { network, node, datagram });
    }

    fn broadcast(&self, datagram: Datagram) {
        let datagram = if datagram.destination_network != 0 || datagram.destination_node != 0xFF {
            Datagram {
                destination_network: 0,
                destination_node: 0xFF,
                ..datagram
            }
        } else {
            datagram
        };
        self.sent.lock().unwrap().push(Sent::Broadcast { datagram });
    }

    fn multicast(&self, zone_name: &[u8], datagram: Datagram) {
        self.sent.lock().unwrap().push(Sent::Multicast {
            zone_name: zone_name.to_vec(),
            datagram,
        });
    }

    fn multicast_address(&self, zone_name: &[u8]) -> Vec<u8> {
        if self.extended_network {
            artalk_ddp::zone_multicast_address(zone_name).to_vec()
        } else {
            Vec::new() // LocalTalk-like cables cannot multicast
        }
    }

    fn start(&self) {
        log::debug!("{}: memory port started", self.name);
    }

    fn stop(&self) {
        log::debug!("{}: memory port stopped", self.name);
    }
}
