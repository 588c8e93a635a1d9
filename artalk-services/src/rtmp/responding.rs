//! RTMP responding service (component F): answers RTMP data and request
//! Datagrams, and is the sole writer into the routing table from the wire.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use artalk_ddp::Datagram;
use artalk_router::{Port, Router, RoutingTableEntry, Service};

use super::{RTMP_DDP_TYPE_DATA, RTMP_DDP_TYPE_REQUEST, RTMP_FUNC_RDR_NO_SPLIT_HORIZON, RTMP_FUNC_RDR_SPLIT_HORIZON, RTMP_FUNC_REQUEST, RTMP_VERSION};

enum Msg {
    Inbound(Datagram, Arc<dyn Port>),
    Stop,
}

/// Listens on [`RTMP_SAS`] for RTMP data (updates the routing table) and
/// RTMP request Datagrams (answers with this router's table).
pub struct RtmpRespondingService {
    tx: Sender<Msg>,
    rx: Mutex<Option<Receiver<Msg>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for RtmpRespondingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtmpRespondingService").finish()
    }
}

impl Default for RtmpRespondingService {
    fn default() -> Self {
        Self::new()
    }
}

impl RtmpRespondingService {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            handle: Mutex::new(None),
        }
    }
}

impl Service for RtmpRespondingService {
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
                    Msg::Inbound(datagram, rx_port) => handle_inbound(&router, datagram, &rx_port),
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

fn handle_inbound(router: &Router, datagram: Datagram, rx_port: &Arc<dyn Port>) {
    match datagram.ddp_type {
        RTMP_DDP_TYPE_DATA => handle_data(router, &datagram, rx_port),
        RTMP_DDP_TYPE_REQUEST => handle_request(router, &datagram, rx_port),
        _ => {}
    }
}

fn handle_data(router: &Router, datagram: &Datagram, rx_port: &Arc<dyn Port>) {
    let data = &datagram.data;
    if data.len() < 4 {
        return;
    }
    let sender_network = u16::from_be_bytes([data[0], data[1]]);
    let id_length = data[2];
    let sender_node = data[3];
    if id_length != 8 {
        return;
    }
    let mut data = &data[4..];

    let (sender_network_min, sender_network_max);
    if rx_port.extended_network() {
        if data.len() < 6 {
            return;
        }
        let range_distance = data[2];
        if range_distance != 0x80 {
            return;
        }
        sender_network_min = u16::from_be_bytes([data[0], data[1]]);
        sender_network_max = u16::from_be_bytes([data[3], data[4]]);
        let rtmp_version = data[5];
        if rtmp_version != RTMP_VERSION {
            return;
        }
        data = &data[6..];
    } else {
        if data.len() < 3 {
            return;
        }
        let zero = u16::from_be_bytes([data[0], data[1]]);
        let rtmp_version = data[2];
        if zero != 0 || rtmp_version != RTMP_VERSION {
            return;
        }
        sender_network_min = sender_network;
        sender_network_max = sender_network;
        data = &data[3..];
    }

    let mut tuples = Vec::new();
    let mut idx = 0;
    loop {
        let Some(chunk) = data.get(idx..idx + 3) else { break };
        let network_min = u16::from_be_bytes([chunk[0], chunk[1]]);
        let range_distance = chunk[2];
        let distance = range_distance & 0x1F;
        let network_max = if range_distance & 0x80 != 0 {
            let Some(chunk2) = data.get(idx + 3..idx + 6) else { break };
            let max = u16::from_be_bytes([chunk2[0], chunk2[1]]);
            idx += 6;
            Some(max)
        } else {
            idx += 3;
            None
        };
        tuples.push((network_min, network_max, distance));
    }
    if idx != data.len() {
        return; // tuple stream didn't end exactly at the datagram end
    }

    if rx_port.network_min() == 0 && rx_port.network_max() == 0 {
        let _ = rx_port.set_network_range(sender_network_min, sender_network_max);
    }

    for (network_min, network_max, distance) in tuples {
        let network_max = network_max.unwrap_or(network_min);
        if distance >= 15 {
            router.routing_table.mark_bad(network_min, network_max);
        } else {
            router.routing_table.consider(RoutingTableEntry {
                network_min,
                network_max,
                distance: distance + 1,
                port: rx_port.clone(),
                next_network: sender_network,
                next_node: sender_node,
            });
        }
    }
}

fn handle_request(router: &Router, datagram: &Datagram, rx_port: &Arc<dyn Port>) {
    let Some(&func) = datagram.data.first() else { return };
    if func == RTMP_FUNC_REQUEST {
        if rx_port.network_min() == 0 || rx_port.network_max() == 0 {
            return;
        }
        if datagram.hop_count != 0 {
            return; // responses go back out the same port, no routing
        }
        let mut response_data = Vec::with_capacity(9);
        response_data.extend_from_slice(&rx_port.network().to_be_bytes());
        response_data.push(8);
        response_data.push(rx_port.node());
        if rx_port.extended_network() {
            response_data.extend_from_slice(&rx_port.network_min().to_be_bytes());
            response_data.push(0x80);
            response_data.extend_from_slice(&rx_port.network_max().to_be_bytes());
            response_data.push(RTMP_VERSION);
        }
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
                ddp_type: RTMP_DDP_TYPE_DATA,
                data: response_data,
            },
        );
    } else if func == RTMP_FUNC_RDR_SPLIT_HORIZON || func == RTMP_FUNC_RDR_NO_SPLIT_HORIZON {
        let split_horizon = func == RTMP_FUNC_RDR_SPLIT_HORIZON;
        let Some(datagrams) = super::routing_table_datagram_data(router, rx_port, split_horizon) else {
            return;
        };
        for data in datagrams {
            let _ = router.route(
                Datagram {
                    hop_count: 0,
                    destination_network: datagram.source_network,
                    source_network: rx_port.network(),
                    destination_node: datagram.source_node,
                    source_node: rx_port.node(),
                    destination_socket: datagram.source_socket,
                    source_socket: datagram.destination_socket,
                    ddp_type: RTMP_DDP_TYPE_DATA,
                    data,
                },
                false,
            );
        }
    }
}
