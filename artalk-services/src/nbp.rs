//! NBP (Name Binding Protocol) routing service (component J, NBP half):
//! forwards BrRq/FwdReq control packets toward the zone they name and
//! answers with LkUp broadcasts/multicasts. Name *registration* (the
//! actual object/type/zone directory) is out of scope; this service only
//! routes and multicasts NBP control packets on behalf of end nodes.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use artalk_ddp::Datagram;
use artalk_router::{Port, Router, Service};

use crate::sockets::NBP_SAS;

pub const NBP_DDP_TYPE: u8 = 2;

const NBP_CTRL_BRRQ: u8 = 1;
const NBP_CTRL_LKUP: u8 = 2;
const NBP_CTRL_FWDREQ: u8 = 4;

const MAX_FIELD_LEN: usize = 32;

enum Msg {
    Inbound(Datagram, Arc<dyn Port>),
    Stop,
}

/// Answers NBP BrRq/FwdReq control packets on socket [`NBP_SAS`].
pub struct NameInformationService {
    tx: Sender<Msg>,
    rx: Mutex<Option<Receiver<Msg>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for NameInformationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameInformationService").finish()
    }
}

impl Default for NameInformationService {
    fn default() -> Self {
        Self::new()
    }
}

impl NameInformationService {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            handle: Mutex::new(None),
        }
    }
}

impl Service for NameInformationService {
    fn start(&self, router: Arc<Router>) {
        let mut handle_guard = self.handle.lock().unwrap();
        if handle_guard.is_some() {
            return;
        }
        let Some(rx) = self.rx.lock().unwrap().take() else {
            return;
        };
        *handle_guard = Some(std::thread::spawn(move || {
            for msg in rx {
                match msg {
                    Msg::Stop => break,
                    Msg::Inbound(datagram, rx_port) => handle_inbound(&router, &datagram, &rx_port),
                }
            }
        }));
    }

    fn stop(&self) {
        let mut handle_guard = self.handle.lock().unwrap();
        let Some(handle) = handle_guard.take() else {
            return;
        };
        let _ = self.tx.send(Msg::Stop);
        let _ = handle.join();
    }

    fn inbound(&self, datagram: Datagram, rx_port: Arc<dyn Port>) {
        let _ = self.tx.send(Msg::Inbound(datagram, rx_port));
    }
}

struct Fields<'a> {
    nbp_id: u8,
    req_network: u16,
    req_node: u8,
    req_socket: u8,
    object: &'a [u8],
    r#type: &'a [u8],
    zone: &'a [u8],
}

fn parse(data: &[u8]) -> Option<Fields<'_>> {
    if data.len() < 8 {
        return None;
    }
    let func = data[0] >> 4;
    let tuple_count = data[0] & 0xF;
    if tuple_count != 1 || (func != NBP_CTRL_BRRQ && func != NBP_CTRL_FWDREQ) {
        return None;
    }
    let nbp_id = data[1];
    let req_network = u16::from_be_bytes([data[2], data[3]]);
    let req_node = data[4];
    let req_socket = data[5];
    let object_len = data[7] as usize;
    if object_len < 1 || object_len > MAX_FIELD_LEN || data.len() < 8 + object_len {
        return None;
    }
    let type_len = *data.get(8 + object_len)? as usize;
    if type_len < 1 || type_len > MAX_FIELD_LEN || data.len() < 9 + object_len + type_len {
        return None;
    }
    let zone_len = *data.get(9 + object_len + type_len)? as usize;
    if zone_len > MAX_FIELD_LEN || data.len() < 10 + object_len + type_len + zone_len {
        return None;
    }
    let object = &data[8..8 + object_len];
    let r#type = &data[9 + object_len..9 + object_len + type_len];
    let zone_start = 10 + object_len + type_len;
    let zone = &data[zone_start..zone_start + zone_len];
    Some(Fields {
        nbp_id,
        req_network,
        req_node,
        req_socket,
        object,
        r#type,
        zone: if zone.is_empty() { b"*" } else { zone },
    })
}

fn handle_inbound(router: &Router, datagram: &Datagram, rx_port: &Arc<dyn Port>) {
    if datagram.ddp_type != NBP_DDP_TYPE {
        return;
    }
    let Some(fields) = parse(&datagram.data) else { return };
    let func = datagram.data[0] >> 4;
    if func == NBP_CTRL_BRRQ {
        handle_brrq(router, rx_port, &fields);
    } else if func == NBP_CTRL_FWDREQ {
        handle_fwdreq(router, datagram, rx_port, &fields);
    }
}

fn handle_brrq(router: &Router, rx_port: &Arc<dyn Port>, fields: &Fields<'_>) {
    let mut zone = fields.zone.to_vec();
    if zone.as_slice() == b"*" {
        if rx_port.extended_network() {
            return; // BrRqs from extended networks must name a zone
        }
        let zones = router.zone_information_table.zones_in_network_range(rx_port.network_min(), Some(rx_port.network_max()));
        if zones.len() == 1 {
            zone = zones.into_iter().next().unwrap();
        } else {
            rx_port.broadcast(lkup_datagram(rx_port, fields, &zone));
            return;
        }
    }

    let networks = router.zone_information_table.networks_in_zone(&zone);
    let mut seen = std::collections::HashSet::new();
    for network in networks {
        let Some(entry) = router.routing_table.get_by_network(network).0 else { continue };
        if !seen.insert(entry.network_min) {
            continue;
        }
        if entry.is_direct() {
            entry.port.multicast(&zone, lkup_datagram_via(&entry.port, fields, &zone));
        } else {
            let _ = router.route(fwdreq_datagram(entry.network_min, fields, &zone), false);
        }
    }
}

fn handle_fwdreq(router: &Router, datagram: &Datagram, _rx_port: &Arc<dyn Port>, fields: &Fields<'_>) {
    let Some(entry) = router.routing_table.get_by_network(datagram.destination_network).0 else {
        return;
    };
    if !entry.is_direct() {
        return;
    }
    entry.port.multicast(fields.zone, lkup_datagram_via(&entry.port, fields, fields.zone));
}

fn nbp_body(ctrl: u8, fields: &Fields<'_>, zone: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + fields.object.len() + 1 + fields.r#type.len() + 1 + zone.len());
    data.push((ctrl << 4) | 1);
    data.push(fields.nbp_id);
    data.extend_from_slice(&fields.req_network.to_be_bytes());
    data.push(fields.req_node);
    data.push(fields.req_socket);
    data.push(0);
    data.push(fields.object.len() as u8);
    data.extend_from_slice(fields.object);
    data.push(fields.r#type.len() as u8);
    data.extend_from_slice(fields.r#type);
    data.push(zone.len() as u8);
    data.extend_from_slice(zone);
    data
}

fn lkup_datagram(rx_port: &Arc<dyn Port>, fields: &Fields<'_>, zone: &[u8]) -> Datagram {
    lkup_datagram_via(rx_port, fields, zone)
}

fn lkup_datagram_via(port: &Arc<dyn Port>, fields: &Fields<'_>, zone: &[u8]) -> Datagram {
    Datagram {
        hop_count: 0,
        destination_network: 0x0000,
        source_network: port.network(),
        destination_node: 0xFF,
        source_node: port.node(),
        destination_socket: NBP_SAS,
        source_socket: NBP_SAS,
        ddp_type: NBP_DDP_TYPE,
        data: nbp_body(NBP_CTRL_LKUP, fields, zone),
    }
}

fn fwdreq_datagram(destination_network: u16, fields: &Fields<'_>, zone: &[u8]) -> Datagram {
    Datagram {
        hop_count: 0,
        destination_network,
        source_network: 0,
        destination_node: 0x00,
        source_node: 0,
        destination_socket: NBP_SAS,
        source_socket: NBP_SAS,
        ddp_type: NBP_DDP_TYPE,
        data: nbp_body(NBP_CTRL_FWDREQ, fields, zone),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artalk_router::testing::{MemoryPort, Sent};
    use artalk_router::RoutingTableEntry;
    use std::time::Duration;

    fn brrq(zone: &[u8]) -> Datagram {
        let object = b"MyServer";
        let r#type = b"AFPServer";
        let mut data = vec![(NBP_CTRL_BRRQ << 4) | 1, 42];
        data.extend_from_slice(&0u16.to_be_bytes());
        data.push(0);
        data.push(0);
        data.push(0);
        data.push(object.len() as u8);
        data.extend_from_slice(object);
        data.push(r#type.len() as u8);
        data.extend_from_slice(r#type);
        data.push(zone.len() as u8);
        data.extend_from_slice(zone);
        Datagram {
            hop_count: 0,
            destination_network: 0,
            source_network: 10,
            destination_node: 0,
            source_node: 9,
            destination_socket: NBP_SAS,
            source_socket: 20,
            ddp_type: NBP_DDP_TYPE,
            data,
        }
    }

    #[test]
    fn brrq_with_resolved_zone_multicasts_lkup_for_direct_entry() {
        let port_a = Arc::new(MemoryPort::connected("A", 10, 1, false));
        let port_a_dyn: Arc<dyn Port> = port_a.clone();
        let router = Router::builder("r1")
            .port(port_a_dyn.clone())
            .service(Some(NBP_SAS), Arc::new(NameInformationService::new()))
            .build();
        router.routing_table.consider(RoutingTableEntry {
            network_min: 10,
            network_max: 10,
            distance: 0,
            port: port_a_dyn.clone(),
            next_network: 0,
            next_node: 0,
        });
        router.zone_information_table.add_networks_to_zone(b"Sales", 10, Some(10)).unwrap();
        router.start();

        router.inbound(brrq(b"Sales"), &(port_a.clone() as Arc<dyn Port>));
        std::thread::sleep(Duration::from_millis(50));

        let sent = port_a.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Sent::Multicast { zone_name, datagram } => {
                assert_eq!(zone_name, b"Sales");
                assert_eq!(datagram.data[0] >> 4, NBP_CTRL_LKUP);
            }
            other => panic!("expected multicast, got {other:?}"),
        }
        router.stop();
    }

    #[test]
    fn brrq_star_from_non_extended_port_substitutes_sole_zone() {
        let port_a = Arc::new(MemoryPort::connected("A", 10, 1, false));
        let port_a_dyn: Arc<dyn Port> = port_a.clone();
        let router = Router::builder("r1")
            .port(port_a_dyn.clone())
            .service(Some(NBP_SAS), Arc::new(NameInformationService::new()))
            .build();
        router.routing_table.set_port_range(&port_a_dyn, 10, 10);
        router.routing_table.consider(RoutingTableEntry {
            network_min: 10,
            network_max: 10,
            distance: 0,
            port: port_a_dyn.clone(),
            next_network: 0,
            next_node: 0,
        });
        router.zone_information_table.add_networks_to_zone(b"Sales", 10, Some(10)).unwrap();
        router.start();

        router.inbound(brrq(b"*"), &(port_a.clone() as Arc<dyn Port>));
        std::thread::sleep(Duration::from_millis(50));

        let sent = port_a.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], Sent::Multicast { zone_name, .. } if zone_name == b"Sales"));
        router.stop();
    }
}
