//! RTMP (Routing Table Maintenance Protocol): constants shared by the
//! responding and sending services, and the tuple-stream builder the
//! sending service (and the responding service's RDR handler) both use.

pub mod responding;
pub mod sending;

use artalk_ddp::MAX_DATA_LENGTH;
use artalk_router::{Port, Router};
use std::sync::Arc;

pub const RTMP_DDP_TYPE_DATA: u8 = 1;
pub const RTMP_DDP_TYPE_REQUEST: u8 = 5;
pub const RTMP_VERSION: u8 = 0x82;

pub const RTMP_FUNC_REQUEST: u8 = 1;
pub const RTMP_FUNC_RDR_SPLIT_HORIZON: u8 = 2;
pub const RTMP_FUNC_RDR_NO_SPLIT_HORIZON: u8 = 3;

/// Distance value that means "neighbor, withdraw this route": sent in
/// place of an entry's real distance once it has aged into BAD or WORST.
pub const NOTIFY_NEIGHBOR: u8 = 31;

/// Build the sequence of RTMP data-datagram payloads describing the
/// router's routing table from `port`'s point of view.
///
/// Returns `None` if `port`'s own range isn't known yet (nothing to
/// send). Per spec.md §4.6, an extended port's own range tuple always
/// leads the header rather than appearing in the body; for a
/// non-extended port the header carries a zero placeholder instead.
pub fn routing_table_datagram_data(router: &Router, port: &Arc<dyn Port>, split_horizon: bool) -> Option<Vec<Vec<u8>>> {
    if port.network_min() == 0 || port.network_max() == 0 {
        return None;
    }

    let mut this_net = None;
    let mut tuples = Vec::new();
    for (entry, is_bad) in router.routing_table.entries() {
        let is_own_range = port.extended_network() && port.network_min() == entry.network_min && port.network_max() == entry.network_max;
        // split horizon never suppresses the port's own directly-connected range: a
        // neighbor must always learn which range this port itself answers to
        if split_horizon && !is_own_range && Arc::ptr_eq(&entry.port, port) {
            continue;
        }
        let distance = if is_bad { NOTIFY_NEIGHBOR } else { entry.distance };
        let tuple = if !entry.port.extended_network() {
            let mut buf = Vec::with_capacity(3);
            buf.extend_from_slice(&entry.network_min.to_be_bytes());
            buf.push(distance & 0x1F);
            buf
        } else {
            let mut buf = Vec::with_capacity(6);
            buf.extend_from_slice(&entry.network_min.to_be_bytes());
            buf.push((distance & 0x1F) | 0x80);
            buf.extend_from_slice(&entry.network_max.to_be_bytes());
            buf.push(RTMP_VERSION);
            buf
        };
        if is_own_range {
            this_net = Some(tuple);
        } else {
            tuples.push(tuple);
        }
    }

    let header = if port.extended_network() {
        let this_net = this_net?;
        let mut buf = Vec::with_capacity(3 + this_net.len());
        buf.extend_from_slice(&port.network().to_be_bytes());
        buf.push(8);
        buf.push(port.node());
        buf.extend_from_slice(&this_net);
        buf
    } else {
        let mut buf = Vec::with_capacity(7);
        buf.extend_from_slice(&port.network().to_be_bytes());
        buf.push(8);
        buf.push(port.node());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.push(RTMP_VERSION);
        buf
    };

    let mut datagrams = Vec::new();
    let mut current = header.clone();
    for tuple in tuples {
        if current.len() + tuple.len() > MAX_DATA_LENGTH {
            datagrams.push(std::mem::replace(&mut current, header.clone()));
        }
        current.extend_from_slice(&tuple);
    }
    datagrams.push(current);
    Some(datagrams)
}
