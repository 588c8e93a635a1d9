//! ZIP responding service (component H): answers Query/Reply/ExtReply and
//! GetNetInfo on socket `ZIP_SAS`, plus the ATP-based GetMyZone/
//! GetZoneList/GetLocalZones transactions on `ATP_DDP_TYPE`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use artalk_ddp::{fold, MAX_DATA_LENGTH};
use artalk_router::{Port, Router, Service, ZoneName};

use super::{
    ATP_DDP_TYPE, ATP_EOM, ATP_FUNC_TREQ, ATP_FUNC_TRESP, ZIP_ATP_FUNC_GETLOCALZONES, ZIP_ATP_FUNC_GETMYZONE, ZIP_ATP_FUNC_GETZONELIST,
    ZIP_DDP_TYPE, ZIP_FUNC_EXT_REPLY, ZIP_FUNC_GETNETINFO_REPLY, ZIP_FUNC_GETNETINFO_REQUEST, ZIP_FUNC_QUERY, ZIP_FUNC_REPLY,
    ZIP_GETNETINFO_ONLY_ONE_ZONE, ZIP_GETNETINFO_USE_BROADCAST, ZIP_GETNETINFO_ZONE_INVALID,
};
use artalk_ddp::Datagram;

enum Msg {
    Inbound(Datagram, Arc<dyn Port>),
    Stop,
}

/// Answers ZIP zone queries and ATP zone-list transactions. Holds
/// per-`network_min` accumulation state for ExtReply ingestion, touched
/// only from this service's single worker thread.
pub struct ZipRespondingService {
    tx: Sender<Msg>,
    rx: Mutex<Option<Receiver<Msg>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ZipRespondingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipRespondingService").finish()
    }
}

impl Default for ZipRespondingService {
    fn default() -> Self {
        Self::new()
    }
}

impl ZipRespondingService {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            handle: Mutex::new(None),
        }
    }
}

impl Service for ZipRespondingService {
    fn start(&self, router: Arc<Router>) {
        let mut handle_guard = self.handle.lock().unwrap();
        if handle_guard.is_some() {
            return;
        }
        let Some(rx) = self.rx.lock().unwrap().take() else {
            return;
        };
        *handle_guard = Some(std::thread::spawn(move || {
            let mut pending_ext_reply: HashMap<u16, HashSet<ZoneName>> = HashMap::new();
            for msg in rx {
                match msg {
                    Msg::Stop => break,
                    Msg::Inbound(datagram, rx_port) => handle_inbound(&router, datagram, &rx_port, &mut pending_ext_reply),
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

fn handle_inbound(router: &Router, datagram: Datagram, rx_port: &Arc<dyn Port>, pending_ext_reply: &mut HashMap<u16, HashSet<ZoneName>>) {
    match datagram.ddp_type {
        ZIP_DDP_TYPE => handle_zip(router, &datagram, rx_port, pending_ext_reply),
        ATP_DDP_TYPE => handle_atp(router, &datagram, rx_port),
        _ => {}
    }
}

fn handle_zip(router: &Router, datagram: &Datagram, rx_port: &Arc<dyn Port>, pending_ext_reply: &mut HashMap<u16, HashSet<ZoneName>>) {
    let Some(&func) = datagram.data.first() else { return };
    match func {
        ZIP_FUNC_REPLY => ingest_reply(router, datagram, None),
        ZIP_FUNC_EXT_REPLY => ingest_reply(router, datagram, Some(pending_ext_reply)),
        ZIP_FUNC_QUERY => handle_query(router, datagram, rx_port),
        ZIP_FUNC_GETNETINFO_REQUEST => handle_get_net_info(router, datagram, rx_port),
        _ => {}
    }
}

/// Parse `func, count, (net:u16, len:u8, zone_name[len])*` pairs out of a
/// Reply/ExtReply body.
fn parse_pairs(data: &[u8]) -> Option<(u8, Vec<(u16, ZoneName)>)> {
    if data.len() < 2 {
        return None;
    }
    let count = data[1];
    let mut rest = &data[2..];
    let mut pairs = Vec::new();
    while rest.len() >= 3 {
        let network_min = u16::from_be_bytes([rest[0], rest[1]]);
        let zone_len = rest[2] as usize;
        let Some(zone_name) = rest.get(3..3 + zone_len) else { break };
        rest = &rest[3 + zone_len..];
        if zone_len == 0 {
            continue; // a zero-length zone name is not a real zone, skip it
        }
        pairs.push((network_min, zone_name.to_vec()));
    }
    Some((count, pairs))
}

fn ingest_reply(router: &Router, datagram: &Datagram, pending_ext_reply: Option<&mut HashMap<u16, HashSet<ZoneName>>>) {
    let Some((count, pairs)) = parse_pairs(&datagram.data) else { return };
    if pairs.is_empty() {
        return;
    }

    let Some(pending) = pending_ext_reply else {
        for (network_min, zone_name) in pairs {
            add_zone_for_known_range(router, network_min, &zone_name);
        }
        return;
    };

    let mut last_network_min = None;
    for (network_min, zone_name) in pairs {
        pending.entry(network_min).or_default().insert(zone_name);
        last_network_min = Some(network_min);
    }
    let Some(network_min) = last_network_min else { return };
    if count >= 1 && pending.get(&network_min).map(HashSet::len).unwrap_or(0) >= count as usize {
        if let Some(zone_names) = pending.remove(&network_min) {
            for zone_name in zone_names {
                add_zone_for_known_range(router, network_min, &zone_name);
            }
        }
    }
}

fn add_zone_for_known_range(router: &Router, network_min: u16, zone_name: &[u8]) {
    let Some(entry) = router.routing_table.get_by_network(network_min).0 else {
        log::warn!("{router}: ZIP reply refers to a network range (starting with {network_min}) with which we are not familiar");
        return;
    };
    if let Err(e) = router.zone_information_table.add_networks_to_zone(zone_name, network_min, Some(entry.network_max)) {
        log::warn!("{router}: ZIP reply couldn't be added to zone information table: {e}");
    }
}

fn handle_query(router: &Router, datagram: &Datagram, rx_port: &Arc<dyn Port>) {
    if datagram.data.len() < 4 {
        return;
    }
    let network_count = datagram.data[1] as usize;
    if datagram.data.len() != network_count * 2 + 2 {
        return;
    }
    for idx in 0..network_count {
        let requested_network = u16::from_be_bytes([datagram.data[idx * 2 + 2], datagram.data[idx * 2 + 3]]);
        let Some(entry) = router.routing_table.get_by_network(requested_network).0 else {
            continue;
        };
        let zone_names = router.zone_information_table.zones_in_network_range(entry.network_min, Some(entry.network_max));
        if zone_names.is_empty() {
            continue;
        }
        let total = zone_names.len();
        let mut chunk = Vec::new();
        let mut chunk_len = 0usize;
        for zone_name in &zone_names {
            let mut item = Vec::with_capacity(3 + zone_name.len());
            item.extend_from_slice(&entry.network_min.to_be_bytes());
            item.push(zone_name.len() as u8);
            item.extend_from_slice(zone_name);
            if chunk_len + item.len() > MAX_DATA_LENGTH - 2 {
                flush_ext_reply(router, datagram, rx_port, total, &mut chunk, &mut chunk_len);
            }
            chunk_len += item.len();
            chunk.extend_from_slice(&item);
        }
        flush_ext_reply(router, datagram, rx_port, total, &mut chunk, &mut chunk_len);
    }
}

fn flush_ext_reply(router: &Router, datagram: &Datagram, rx_port: &Arc<dyn Port>, total: usize, chunk: &mut Vec<u8>, chunk_len: &mut usize) {
    if chunk.is_empty() {
        return;
    }
    let mut data = Vec::with_capacity(2 + chunk.len());
    data.push(ZIP_FUNC_EXT_REPLY);
    data.push(total as u8);
    data.extend_from_slice(chunk);
    router.reply(datagram, rx_port, ZIP_DDP_TYPE, data);
    chunk.clear();
    *chunk_len = 0;
}

fn handle_get_net_info(router: &Router, datagram: &Datagram, rx_port: &Arc<dyn Port>) {
    if rx_port.network() == 0 || rx_port.network_min() == 0 || rx_port.network_max() == 0 {
        return;
    }
    if datagram.data.len() < 7 {
        return;
    }
    if datagram.data[1..6] != [0, 0, 0, 0, 0] {
        return;
    }
    let given_zone_len = datagram.data[6] as usize;
    let Some(given_zone_name) = datagram.data.get(7..7 + given_zone_len) else { return };
    let given_zone_folded = fold(given_zone_name);

    let zone_names = router.zone_information_table.zones_in_network_range(rx_port.network_min(), Some(rx_port.network_max()));
    if zone_names.is_empty() {
        return;
    }

    let mut flags = ZIP_GETNETINFO_ZONE_INVALID | ZIP_GETNETINFO_ONLY_ONE_ZONE;
    let mut default_zone_name = None;
    let mut multicast_address: Vec<u8> = Vec::new();
    for (idx, zone_name) in zone_names.iter().enumerate() {
        if idx == 0 {
            default_zone_name = Some(zone_name.clone());
            multicast_address = rx_port.multicast_address(zone_name);
        }
        if fold(zone_name) == given_zone_folded {
            flags &= !ZIP_GETNETINFO_ZONE_INVALID;
            multicast_address = rx_port.multicast_address(zone_name);
        }
        if idx > 0 {
            flags &= !ZIP_GETNETINFO_ONLY_ONE_ZONE;
            if flags & ZIP_GETNETINFO_ZONE_INVALID == 0 {
                break;
            }
        }
    }
    let Some(default_zone_name) = default_zone_name else { return };
    if multicast_address.is_empty() {
        flags |= ZIP_GETNETINFO_USE_BROADCAST;
    }

    let mut reply_data = Vec::new();
    reply_data.push(ZIP_FUNC_GETNETINFO_REPLY);
    reply_data.push(flags);
    reply_data.extend_from_slice(&rx_port.network_min().to_be_bytes());
    reply_data.extend_from_slice(&rx_port.network_max().to_be_bytes());
    reply_data.push(given_zone_name.len() as u8);
    reply_data.extend_from_slice(given_zone_name);
    reply_data.push(multicast_address.len() as u8);
    reply_data.extend_from_slice(&multicast_address);
    if flags & ZIP_GETNETINFO_ZONE_INVALID != 0 {
        reply_data.push(default_zone_name.len() as u8);
        reply_data.extend_from_slice(&default_zone_name);
    }

    router.reply(datagram, rx_port, ZIP_DDP_TYPE, reply_data);
}

fn handle_atp(router: &Router, datagram: &Datagram, rx_port: &Arc<dyn Port>) {
    if datagram.data.len() != 8 {
        return;
    }
    let control = datagram.data[0];
    let bitmap = datagram.data[1];
    let tid = u16::from_be_bytes([datagram.data[2], datagram.data[3]]);
    let func = datagram.data[4];
    let zero = datagram.data[5];
    let start_index = u16::from_be_bytes([datagram.data[6], datagram.data[7]]);
    if control != ATP_FUNC_TREQ || bitmap != 1 || zero != 0 {
        return;
    }
    match func {
        ZIP_ATP_FUNC_GETMYZONE => get_my_zone(router, datagram, rx_port, tid),
        ZIP_ATP_FUNC_GETZONELIST => get_zone_list(router, datagram, rx_port, tid, start_index, router.zone_information_table.zones()),
        ZIP_ATP_FUNC_GETLOCALZONES => get_zone_list(
            router,
            datagram,
            rx_port,
            tid,
            start_index,
            router.zone_information_table.zones_in_network_range(rx_port.network_min(), Some(rx_port.network_max())),
        ),
        _ => {}
    }
}

fn get_my_zone(router: &Router, datagram: &Datagram, rx_port: &Arc<dyn Port>, tid: u16) {
    let Some(entry) = router.routing_table.get_by_network(datagram.source_network).0 else {
        return;
    };
    let Some(zone_name) = router.zone_information_table.zones_in_network_range(entry.network_min, Some(entry.network_max)).into_iter().next() else {
        return;
    };
    let mut data = Vec::with_capacity(8 + zone_name.len());
    data.push(ATP_FUNC_TRESP | ATP_EOM);
    data.push(0);
    data.extend_from_slice(&tid.to_be_bytes());
    data.push(0); // last_flag: GetMyZone is a single-shot reply, not a paged stream
    data.push(0);
    data.extend_from_slice(&1u16.to_be_bytes());
    data.push(zone_name.len() as u8);
    data.extend_from_slice(&zone_name);
    router.reply(datagram, rx_port, ATP_DDP_TYPE, data);
}

fn get_zone_list(router: &Router, datagram: &Datagram, rx_port: &Arc<dyn Port>, tid: u16, start_index: u16, zones: Vec<ZoneName>) {
    let skip = start_index.saturating_sub(1) as usize;
    let mut zone_iter = zones.into_iter().skip(skip);

    let mut last_flag = 0u8;
    let mut zone_list = Vec::new();
    let mut num_zones: u16 = 0;
    let mut data_length = 8usize;
    loop {
        let Some(zone_name) = zone_iter.next() else {
            last_flag = 1;
            break;
        };
        if data_length + 1 + zone_name.len() > MAX_DATA_LENGTH {
            break;
        }
        zone_list.push(zone_name.len() as u8);
        zone_list.extend_from_slice(&zone_name);
        num_zones += 1;
        data_length += 1 + zone_name.len();
    }

    let mut data = Vec::with_capacity(data_length);
    data.push(ATP_FUNC_TRESP | ATP_EOM);
    data.push(0);
    data.extend_from_slice(&tid.to_be_bytes());
    data.push(last_flag);
    data.push(0);
    data.extend_from_slice(&num_zones.to_be_bytes());
    data.extend_from_slice(&zone_list);
    router.reply(datagram, rx_port, ATP_DDP_TYPE, data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sockets::ZIP_SAS;
    use artalk_router::testing::{MemoryPort, Sent};
    use std::time::Duration;

    fn router_with_zones() -> (Arc<Router>, Arc<MemoryPort>) {
        let port = Arc::new(MemoryPort::connected("A", 10, 5, true));
        let port_dyn: Arc<dyn Port> = port.clone();
        let router = Router::builder("r1")
            .port(port_dyn.clone())
            .service(Some(ZIP_SAS), Arc::new(ZipRespondingService::new()))
            .build();
        router.routing_table.set_port_range(&port_dyn, 10, 20);
        router.zone_information_table.add_networks_to_zone(b"Engineering", 10, Some(20)).unwrap();
        router.start();
        (router, port)
    }

    fn zip_query(network: u16) -> Datagram {
        let mut data = vec![ZIP_FUNC_QUERY, 1];
        data.extend_from_slice(&network.to_be_bytes());
        Datagram {
            hop_count: 0,
            destination_network: 10,
            source_network: 10,
            destination_node: 5,
            source_node: 9,
            destination_socket: ZIP_SAS,
            source_socket: 20,
            ddp_type: ZIP_DDP_TYPE,
            data,
        }
    }

    #[test]
    fn query_answers_with_ext_reply() {
        let (router, port) = router_with_zones();
        router.inbound(zip_query(15), &(port.clone() as Arc<dyn Port>));
        std::thread::sleep(Duration::from_millis(50));

        let sent = port.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Sent::Unicast { datagram, .. } => {
                assert_eq!(datagram.data[0], ZIP_FUNC_EXT_REPLY);
                assert_eq!(datagram.data[1], 1); // one zone total
            }
            other => panic!("expected unicast, got {other:?}"),
        }
        router.stop();
    }

    #[test]
    fn reply_ingests_known_range() {
        let port = Arc::new(MemoryPort::connected("A", 10, 5, true));
        let port_dyn: Arc<dyn Port> = port.clone();
        let router = Router::builder("r1")
            .port(port_dyn.clone())
            .service(Some(ZIP_SAS), Arc::new(ZipRespondingService::new()))
            .build();
        router.routing_table.consider(artalk_router::RoutingTableEntry {
            network_min: 200,
            network_max: 210,
            distance: 1,
            port: port_dyn.clone(),
            next_network: 10,
            next_node: 9,
        });
        router.start();

        let mut data = vec![ZIP_FUNC_REPLY, 1];
        data.extend_from_slice(&200u16.to_be_bytes());
        data.push(b"Sales".len() as u8);
        data.extend_from_slice(b"Sales");
        router.inbound(
            Datagram {
                hop_count: 0,
                destination_network: 10,
                source_network: 10,
                destination_node: 5,
                source_node: 9,
                destination_socket: ZIP_SAS,
                source_socket: ZIP_SAS,
                ddp_type: ZIP_DDP_TYPE,
                data,
            },
            &port_dyn,
        );
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(router.zone_information_table.networks_in_zone(b"Sales"), (200..=210).collect::<Vec<_>>());
        router.stop();
    }

    #[test]
    fn reply_skips_zero_length_zone_name() {
        let port = Arc::new(MemoryPort::connected("A", 10, 5, true));
        let port_dyn: Arc<dyn Port> = port.clone();
        let router = Router::builder("r1")
            .port(port_dyn.clone())
            .service(Some(ZIP_SAS), Arc::new(ZipRespondingService::new()))
            .build();
        router.routing_table.consider(artalk_router::RoutingTableEntry {
            network_min: 200,
            network_max: 210,
            distance: 1,
            port: port_dyn.clone(),
            next_network: 10,
            next_node: 9,
        });
        router.start();

        let mut data = vec![ZIP_FUNC_REPLY, 1];
        data.extend_from_slice(&200u16.to_be_bytes());
        data.push(0); // zero-length zone name
        router.inbound(
            Datagram {
                hop_count: 0,
                destination_network: 10,
                source_network: 10,
                destination_node: 5,
                source_node: 9,
                destination_socket: ZIP_SAS,
                source_socket: ZIP_SAS,
                ddp_type: ZIP_DDP_TYPE,
                data,
            },
            &port_dyn,
        );
        std::thread::sleep(Duration::from_millis(50));
        assert!(router.zone_information_table.zones_in_network_range(200, Some(210)).is_empty());
        router.stop();
    }
}
