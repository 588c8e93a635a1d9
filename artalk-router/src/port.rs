//! The abstract link contract every network attachment must satisfy.
//!
//! A `Port` is the router's handle to one physical or virtual cable: a
//! broadcast Ethernet-like segment, a point-to-multipoint LocalTalk-like
//! bus, or a UDP-tunneled equivalent of either. The core never knows or
//! cares which; it only ever calls through this trait. Real link drivers
//! (serial, tap device, UDP multicast socket) live outside this crate and
//! are expected to call [`crate::router::Router::inbound`] for every
//! Datagram addressed to this node, this cable's broadcast address, this
//! cable's zone multicast address, or the any-router address, and to
//! suppress everything else.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};

use artalk_ddp::Datagram;

use crate::error::PortRangeError;

/// Capability set required of a link attachment.
///
/// Implementors own their own I/O threads if they need any; this trait
/// itself is not `Thread`-like, mirroring the reference design note that a
/// port "may have multiple threads according to the implementer's design."
pub trait Port: fmt::Debug + Send + Sync {
    /// This port's acquired node-local network number, or 0 before
    /// acquisition.
    fn network(&self) -> u16;

    /// This port's acquired node number, or 0 before acquisition.
    fn node(&self) -> u8;

    /// The low end of the range of network numbers this cable answers to.
    /// Zero before the range is known.
    fn network_min(&self) -> u16;

    /// The high end of the range of network numbers this cable answers to.
    /// Equal to `network_min` for a non-extended cable.
    fn network_max(&self) -> u16;

    /// Whether this cable carries extended-format RTMP tuples (a real
    /// `min != max` range) or the non-extended single-network form.
    fn extended_network(&self) -> bool;

    /// Record the network range learned from a seed router. It is an
    /// error to call this when a range is already set.
    fn set_network_range(&self, network_min: u16, network_max: u16) -> Result<(), PortRangeError>;

    /// Deliver `datagram` to exactly one host at `(network, node)`.
    fn unicast(&self, network: u16, node: u8, datagram: Datagram);

    /// Deliver `datagram` to every host on this cable. Implementations
    /// must rewrite the destination to `(0x0000, 0xFF)` if it is not
    /// already that.
    fn broadcast(&self, datagram: Datagram);

    /// Deliver `datagram` to every host registered in `zone_name` on this
    /// cable. Cables that cannot multicast (LocalTalk) treat this as a
    /// no-op.
    fn multicast(&self, zone_name: &[u8], datagram: Datagram);

    /// The link-layer multicast address bytes for `zone_name` on this
    /// cable, or empty if this cable cannot multicast.
    fn multicast_address(&self, zone_name: &[u8]) -> Vec<u8>;

    /// Start this port's link-specific node/network acquisition.
    fn start(&self);

    /// Tear down this port's threads.
    fn stop(&self);
}

/// Plain data holder for the mutable fields every real `Port` needs:
/// acquired network/node and the cable's range. Link drivers compose this
/// in rather than reimplementing atomics by hand, the way
/// [`crate::testing::MemoryPort`] does.
#[derive(Debug, Default)]
pub struct PortState {
    network: AtomicU16,
    node: AtomicU8,
    network_min: AtomicU16,
    network_max: AtomicU16,
    range_set: AtomicBool,
}

impl PortState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn network(&self) -> u16 {
        self.network.load(Ordering::Acquire)
    }

    pub fn node(&self) -> u8 {
        self.node.load(Ordering::Acquire)
    }

    pub fn network_min(&self) -> u16 {
        self.network_min.load(Ordering::Acquire)
    }

    pub fn network_max(&self) -> u16 {
        self.network_max.load(Ordering::Acquire)
    }

    pub fn set_node_address(&self, network: u16, node: u8) {
        self.network.store(network, Ordering::Release);
        self.node.store(node, Ordering::Release);
    }

    pub fn set_network_range(&self, network_min: u16, network_max: u16) -> Result<(), PortRangeError> {
        if self
            .range_set
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PortRangeError {
                network_min: self.network_min(),
                network_max: self.network_max(),
            });
        }
        self.network_min.store(network_min, Ordering::Release);
        self.network_max.store(network_max, Ordering::Release);
        Ok(())
    }
}
