//! ZIP sending service (component I): periodically queries for the zones
//! of any routing table range this router doesn't have zone information
//! for yet.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use artalk_ddp::{Datagram, MAX_DATA_LENGTH};
use artalk_router::{Port, Router, Service};

use super::{ZIP_DDP_TYPE, ZIP_FUNC_QUERY};
use crate::periodic::PeriodicWorker;
use crate::sockets::ZIP_SAS;

/// Maximum number of `network:u16` entries a single Query datagram's body
/// can hold: 2 header bytes (func, count) leave `MAX_DATA_LENGTH - 2`
/// bytes, two per network.
const MAX_NETWORKS_PER_QUERY: usize = (MAX_DATA_LENGTH - 2) / 2;

/// Sends ZIP queries for routing table ranges with no known zones, every
/// `router.config().zip_send_interval`, and on demand via
/// [`ZipSendingService::force_send`].
pub struct ZipSendingService {
    worker: PeriodicWorker,
}

impl fmt::Debug for ZipSendingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipSendingService").finish()
    }
}

impl Default for ZipSendingService {
    fn default() -> Self {
        Self::new()
    }
}

impl ZipSendingService {
    pub fn new() -> Self {
        Self { worker: PeriodicWorker::new() }
    }

    /// Send ZIP queries right now, bypassing the timer. Synchronous and
    /// deterministic, for tests.
    pub fn force_send(&self, router: &Router) {
        send_all(router);
    }
}

impl Service for ZipSendingService {
    fn start(&self, router: Arc<Router>) {
        let interval = router.config().zip_send_interval;
        self.worker.start(interval, "zip-sending", move || send_all(&router));
    }

    fn stop(&self) {
        self.worker.stop();
    }

    fn inbound(&self, _datagram: Datagram, _rx_port: Arc<dyn Port>) {}
}

/// Identifies where a batch of queries for a set of ranges should be sent:
/// directly connected ranges (`distance == 0`) go out as a broadcast on
/// their own port, everything else goes unicast to the next hop.
#[derive(Clone)]
struct Destination {
    port: Arc<dyn Port>,
    network: u16,
    node: u8,
}

fn send_all(router: &Router) {
    let mut unknown_by_destination: HashMap<(usize, u16, u8), (Destination, Vec<u16>)> = HashMap::new();

    for (entry, _is_bad) in router.routing_table.entries() {
        if !router.zone_information_table.zones_in_network_range(entry.network_min, Some(entry.network_max)).is_empty() {
            continue;
        }
        let (network, node) = if entry.is_direct() {
            (entry.port.network(), 0xFF)
        } else {
            (entry.next_network, entry.next_node)
        };
        let key = (Arc::as_ptr(&entry.port) as *const () as usize, network, node);
        let (_, networks) = unknown_by_destination.entry(key).or_insert_with(|| {
            (
                Destination {
                    port: entry.port.clone(),
                    network,
                    node,
                },
                Vec::new(),
            )
        });
        networks.push(entry.network_min);
    }

    for (destination, networks) in unknown_by_destination.into_values() {
        for chunk in networks.chunks(MAX_NETWORKS_PER_QUERY) {
            let mut data = Vec::with_capacity(2 + chunk.len() * 2);
            data.push(ZIP_FUNC_QUERY);
            data.push(chunk.len() as u8);
            for network in chunk {
                data.extend_from_slice(&network.to_be_bytes());
            }
            destination.port.unicast(
                destination.network,
                destination.node,
                Datagram {
                    hop_count: 0,
                    destination_network: destination.network,
                    source_network: destination.port.network(),
                    destination_node: destination.node,
                    source_node: destination.port.node(),
                    destination_socket: ZIP_SAS,
                    source_socket: ZIP_SAS,
                    ddp_type: ZIP_DDP_TYPE,
                    data,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artalk_router::testing::{MemoryPort, Sent};
    use artalk_router::RoutingTableEntry;

    /// S3: three directly-connected ranges via the same port, none known
    /// to the zone table, must be batched into a single Query.
    #[test]
    fn force_send_batches_unknown_ranges_into_one_query() {
        let port_a = Arc::new(MemoryPort::connected("A", 10, 1, false));
        let port_a_dyn: Arc<dyn Port> = port_a.clone();
        let router = Router::builder("r1")
            .port(port_a_dyn.clone())
            .service(None, Arc::new(ZipSendingService::new()))
            .build();
        for network in [1u16, 2, 3] {
            router.routing_table.consider(RoutingTableEntry {
                network_min: network,
                network_max: network,
                distance: 0,
                port: port_a_dyn.clone(),
                next_network: 0,
                next_node: 0,
            });
        }

        ZipSendingService::new().force_send(&router);

        let sent = port_a.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Sent::Unicast { network: 10, node: 0xFF, datagram } => {
                assert_eq!(datagram.data[0], ZIP_FUNC_QUERY);
                assert_eq!(datagram.data[1], 3);
                assert_eq!(&datagram.data[2..4], &1u16.to_be_bytes());
                assert_eq!(&datagram.data[4..6], &2u16.to_be_bytes());
                assert_eq!(&datagram.data[6..8], &3u16.to_be_bytes());
            }
            other => panic!("expected unicast query, got {other:?}"),
        }
    }

    #[test]
    fn known_range_is_not_queried() {
        let port_a = Arc::new(MemoryPort::connected("A", 10, 1, false));
        let port_a_dyn: Arc<dyn Port> = port_a.clone();
        let router = Router::builder("r1")
            .port(port_a_dyn.clone())
            .service(None, Arc::new(ZipSendingService::new()))
            .build();
        router.routing_table.consider(RoutingTableEntry {
            network_min: 1,
            network_max: 1,
            distance: 0,
            port: port_a_dyn.clone(),
            next_network: 0,
            next_node: 0,
        });
        router.zone_information_table.add_networks_to_zone(b"Sales", 1, Some(1)).unwrap();

        ZipSendingService::new().force_send(&router);

        assert!(port_a.sent().is_empty());
    }
}
