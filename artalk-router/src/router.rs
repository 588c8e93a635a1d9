//! Datagram dispatch: the heart of the router.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use artalk_ddp::Datagram;

use crate::config::RouterConfig;
use crate::error::RouteError;
use crate::port::Port;
use crate::routing_table::RoutingTable;
use crate::service::Service;
use crate::zone_table::ZoneInformationTable;

/// The stale-address escape hatch in [`Router::reply`]: a ZIP GetNetInfo
/// broadcast.
const ZIP_DDP_TYPE: u8 = 6;

/// A router: dispatches inbound Datagrams to its ports and services,
/// routes and forwards, and owns the routing and zone information tables.
pub struct Router {
    name: String,
    config: RouterConfig,
    ports: Vec<Arc<dyn Port>>,
    services: Vec<Arc<dyn Service>>,
    services_by_socket: HashMap<u8, Arc<dyn Service>>,
    pub routing_table: RoutingTable,
    pub zone_information_table: Arc<ZoneInformationTable>,
    started: RwLock<bool>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router").field("name", &self.name).finish()
    }
}

impl fmt::Display for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Assembles a [`Router`] from its ports and services.
///
/// Component E (this crate) only knows about the `Port` and `Service`
/// traits; it is the caller's job (ordinarily [`artalk::StandardRouter`]'s)
/// to wire up the concrete RTMP/ZIP/echo/NBP services from
/// `artalk-services`.
///
/// [`artalk::StandardRouter`]: https://docs.rs/artalk
pub struct RouterBuilder {
    name: String,
    config: RouterConfig,
    ports: Vec<Arc<dyn Port>>,
    services: Vec<(Option<u8>, Arc<dyn Service>)>,
}

impl RouterBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: RouterConfig::default(),
            ports: Vec::new(),
            services: Vec::new(),
        }
    }

    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn port(mut self, port: Arc<dyn Port>) -> Self {
        self.ports.push(port);
        self
    }

    /// Register a service. `socket` is the static socket it answers on, if
    /// any (some services, like RTMP sending, never receive inbound
    /// Datagrams directly).
    pub fn service(mut self, socket: Option<u8>, service: Arc<dyn Service>) -> Self {
        self.services.push((socket, service));
        self
    }

    pub fn build(self) -> Arc<Router> {
        let zone_information_table = Arc::new(ZoneInformationTable::new());
        let routing_table = RoutingTable::new(zone_information_table.clone());
        let mut services_by_socket = HashMap::new();
        let mut services = Vec::new();
        for (socket, service) in self.services {
            if let Some(socket) = socket {
                services_by_socket.insert(socket, service.clone());
            }
            services.push(service);
        }
        Arc::new(Router {
            name: self.name,
            config: self.config,
            ports: self.ports,
            services,
            services_by_socket,
            routing_table,
            zone_information_table,
            started: RwLock::new(false),
        })
    }
}

impl Router {
    pub fn builder(name: impl Into<String>) -> RouterBuilder {
        RouterBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn ports(&self) -> &[Arc<dyn Port>] {
        &self.ports
    }

    /// Start every port, then every service. Ports are started first
    /// because they seed the routing table with their own ranges, which
    /// services (RTMP sending especially) depend on.
    pub fn start(self: &Arc<Self>) {
        {
            let mut started = self.started.write().unwrap();
            if *started {
                return;
            }
            *started = true;
        }
        for port in &self.ports {
            log::info!("{self}: starting port {port:?}...");
            port.start();
        }
        log::info!("{self}: all ports started");
        for service in &self.services {
            log::info!("{self}: starting service {service:?}...");
            service.start(self.clone());
        }
        log::info!("{self}: all services started");
    }

    /// Stop every service, then every port. Idempotent.
    pub fn stop(&self) {
        {
            let mut started = self.started.write().unwrap();
            if !*started {
                return;
            }
            *started = false;
        }
        for service in &self.services {
            log::info!("{self}: stopping service {service:?}...");
            service.stop();
        }
        log::info!("{self}: all services stopped");
        for port in &self.ports {
            log::info!("{self}: stopping port {port:?}...");
            port.stop();
        }
        log::info!("{self}: all ports stopped");
    }

    fn deliver(&self, datagram: Datagram, rx_port: &Arc<dyn Port>) {
        if let Some(service) = self.services_by_socket.get(&datagram.destination_socket) {
            service.inbound(datagram, rx_port.clone());
        }
    }

    /// Called by a port when a Datagram arrives on it. The Datagram may be
    /// delivered locally, routed onward, both, or neither.
    pub fn inbound(&self, datagram: Datagram, rx_port: &Arc<dyn Port>) {
        let port_network = rx_port.network();

        // a network number of zero means "this network"; substitute the
        // port's network independently for destination and source (a
        // short-header datagram always has both zero)
        let datagram = if port_network != 0 {
            let mut datagram = datagram;
            if datagram.destination_network == 0 {
                datagram.destination_network = port_network;
            }
            if datagram.source_network == 0 {
                datagram.source_network = port_network;
            }
            datagram
        } else {
            datagram
        };

        if datagram.destination_network == 0 || datagram.destination_network == port_network {
            if matches!(datagram.destination_node, 0x00 | 0xFF) || datagram.destination_node == rx_port.node() {
                self.deliver(datagram, rx_port);
            }
            return;
        }

        if let (Some(entry), _) = self.routing_table.get_by_network(datagram.destination_network) {
            if entry.is_direct() {
                if datagram.destination_network == entry.port.network() && datagram.destination_node == entry.port.node() {
                    self.deliver(datagram, rx_port);
                    return;
                } else if datagram.destination_node == 0x00 {
                    self.deliver(datagram, rx_port);
                    return;
                } else if datagram.destination_node == 0xFF {
                    self.deliver(datagram.clone(), rx_port);
                }
            }
        }

        self.route(datagram, false);
    }

    /// Route a Datagram toward its destination. If `originating` is true,
    /// this is a freshly built Datagram from a local service rather than
    /// one that arrived on a port, and must have hop count 0 and a nonzero
    /// destination network; the router fills in its source network/node
    /// once it knows which port it is leaving through.
    pub fn route(&self, datagram: Datagram, originating: bool) -> Result<(), RouteError> {
        if originating {
            if datagram.hop_count != 0 {
                return Err(RouteError::NonZeroHopCount {
                    hop_count: datagram.hop_count,
                });
            }
            if datagram.destination_network == 0 {
                return Err(RouteError::ZeroDestinationNetwork);
            }
        }

        if datagram.destination_network == 0 {
            return Ok(()); // nowhere to send this, drop
        }

        let (Some(entry), _) = self.routing_table.get_by_network(datagram.destination_network) else {
            return Ok(()); // no route, drop
        };

        let mut datagram = datagram;
        if originating {
            if entry.port.network() == 0 || entry.port.node() == 0 {
                return Ok(()); // port not yet up, drop
            }
            datagram.source_network = entry.port.network();
            datagram.source_node = entry.port.node();
        }

        if !entry.is_direct() {
            if datagram.hop_count >= 15 {
                return Ok(()); // hop count exhausted, drop
            }
            entry.port.unicast(entry.next_network, entry.next_node, datagram.hop());
        } else if datagram.destination_node == 0x00 {
            // any-router address, control plane's concern, already handled
        } else if datagram.destination_network == entry.port.network() && datagram.destination_node == entry.port.node() {
            // addressed to another port of ours, already delivered
        } else if datagram.destination_node == 0xFF {
            entry.port.broadcast(datagram);
        } else {
            entry.port.unicast(datagram.destination_network, datagram.destination_node, datagram);
        }
        Ok(())
    }

    /// Build and send a reply to `datagram`, which arrived on `rx_port`.
    pub fn reply(&self, datagram: &Datagram, rx_port: &Arc<dyn Port>, ddp_type: u8, data: Vec<u8>) {
        if matches!(datagram.source_node, 0x00 | 0xFF) {
            return; // invalid as a reply destination
        }

        let stale_source = datagram.source_network == 0 || (0xFF00..=0xFFFE).contains(&datagram.source_network);
        let stale_getnetinfo_client = !(rx_port.network_min()..=rx_port.network_max()).contains(&datagram.source_network)
            && datagram.destination_node == 0xFF
            && ddp_type == ZIP_DDP_TYPE;

        if (stale_source || stale_getnetinfo_client) && rx_port.node() != 0 {
            rx_port.unicast(
                datagram.source_network,
                datagram.source_node,
                Datagram {
                    hop_count: 0,
                    destination_network: datagram.source_network,
                    source_network: rx_port.network(),
                    destination_node: datagram.source_node,
                    source_node: rx_port.node(),
                    destination_socket: datagram.source_socket,
                    source_socket: datagram.destination_socket,
                    ddp_type,
                    data,
                },
            );
            return;
        }

        let _ = self.route(
            Datagram {
                hop_count: 0,
                destination_network: datagram.source_network,
                source_network: 0,
                destination_node: datagram.source_node,
                source_node: 0,
                destination_socket: datagram.source_socket,
                source_socket: datagram.destination_socket,
                ddp_type,
                data,
            },
            true,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing_table::RoutingTableEntry;
    use crate::testing::MemoryPort;

    fn datagram(destination_network: u16, destination_node: u8) -> Datagram {
        Datagram {
            hop_count: 0,
            destination_network,
            source_network: 0,
            destination_node,
            source_node: 1,
            destination_socket: 10,
            source_socket: 10,
            ddp_type: 1,
            data: vec![],
        }
    }

    /// S5: delivery vs forwarding. Port A (net 10, node 128), port B (net
    /// 20, node 128), RT has a direct entry for range 30-30 via port B. A
    /// datagram for (30, 1) arrives on A: no local delivery, one unicast
    /// out port B, hop count unchanged.
    #[test]
    fn s5_delivery_vs_forwarding() {
        let port_a = Arc::new(MemoryPort::connected("A", 10, 128, false));
        let port_b = Arc::new(MemoryPort::connected("B", 20, 128, false));
        let port_a_dyn: Arc<dyn Port> = port_a.clone();
        let port_b_dyn: Arc<dyn Port> = port_b.clone();
        let router = Router::builder("r1")
            .port(port_a_dyn.clone())
            .port(port_b_dyn.clone())
            .build();
        router.routing_table.set_port_range(&port_a_dyn, 10, 10);
        router.routing_table.set_port_range(&port_b_dyn, 20, 20);
        router.routing_table.consider(RoutingTableEntry {
            network_min: 30,
            network_max: 30,
            distance: 0,
            port: port_b_dyn.clone(),
            next_network: 0,
            next_node: 0,
        });

        router.inbound(datagram(30, 1), &port_a_dyn);

        let sent = port_b.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            crate::testing::Sent::Unicast { network, node, datagram } => {
                assert_eq!(*network, 30);
                assert_eq!(*node, 1);
                assert_eq!(datagram.hop_count, 0);
            }
            other => panic!("expected unicast, got {other:?}"),
        }
    }

    /// S6: hop count exhaustion. A datagram with hop_count=15 destined for
    /// a network reachable via a distance-2 entry must be dropped: no
    /// unicast emitted.
    #[test]
    fn s6_hop_count_exhaustion() {
        let port_a = Arc::new(MemoryPort::connected("A", 10, 128, false));
        let port_a_dyn: Arc<dyn Port> = port_a.clone();
        let router = Router::builder("r1").port(port_a_dyn.clone()).build();
        router.routing_table.consider(RoutingTableEntry {
            network_min: 200,
            network_max: 200,
            distance: 2,
            port: port_a_dyn,
            next_network: 100,
            next_node: 5,
        });

        let mut d = datagram(200, 9);
        d.hop_count = 15;
        router.route(d, false).unwrap();

        assert!(port_a.sent().is_empty());
    }

    #[test]
    fn originating_datagram_must_have_zero_hop_count() {
        let port_a: Arc<dyn Port> = Arc::new(MemoryPort::connected("A", 10, 128, false));
        let router = Router::builder("r1").port(port_a).build();
        let mut d = datagram(50, 1);
        d.hop_count = 1;
        assert_eq!(
            router.route(d, true),
            Err(RouteError::NonZeroHopCount { hop_count: 1 })
        );
    }

    #[test]
    fn reply_sends_direct_for_stale_source_network() {
        let port_a = Arc::new(MemoryPort::connected("A", 10, 128, false));
        let port_a_dyn: Arc<dyn Port> = port_a.clone();
        let router = Router::builder("r1").port(port_a_dyn.clone()).build();
        let inbound = datagram(10, 128);
        router.reply(&inbound, &port_a_dyn, 4, vec![2]);

        let sent = port_a.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], crate::testing::Sent::Unicast { .. }));
    }
}
