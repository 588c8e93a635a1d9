//! AEP (AppleTalk Echo Protocol) service (component J, echo half):
//! answers echo requests on socket [`ECHO_SAS`].

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use artalk_ddp::Datagram;
use artalk_router::{Port, Router, Service};

use crate::sockets::ECHO_SAS;

pub const ECHO_DDP_TYPE: u8 = 4;

const ECHO_FUNC_REQUEST: u8 = 1;
const ECHO_FUNC_REPLY: u8 = 2;

enum Msg {
    Inbound(Datagram, Arc<dyn Port>),
    Stop,
}

/// Answers every echo-request Datagram on [`ECHO_SAS`] with an echo-reply
/// carrying the same body, per spec's redesign away from the reference's
/// unconditional `route()`: replies go through `Router::reply`, so a stale
/// or misrouted request still gets a direct answer on the receiving port.
pub struct EchoService {
    tx: Sender<Msg>,
    rx: Mutex<Option<Receiver<Msg>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for EchoService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EchoService").finish()
    }
}

impl Default for EchoService {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoService {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            handle: Mutex::new(None),
        }
    }
}

impl Service for EchoService {
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

fn handle_inbound(router: &Router, datagram: &Datagram, rx_port: &Arc<dyn Port>) {
    if datagram.ddp_type != ECHO_DDP_TYPE {
        return;
    }
    let Some((&func, rest)) = datagram.data.split_first() else { return };
    if func != ECHO_FUNC_REQUEST {
        return;
    }
    let mut data = Vec::with_capacity(1 + rest.len());
    data.push(ECHO_FUNC_REPLY);
    data.extend_from_slice(rest);
    router.reply(datagram, rx_port, ECHO_DDP_TYPE, data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use artalk_router::testing::{MemoryPort, Sent};
    use std::time::Duration;

    #[test]
    fn echo_request_is_answered_with_reply() {
        let port = Arc::new(MemoryPort::connected("A", 10, 5, false));
        let port_dyn: Arc<dyn Port> = port.clone();
        let router = Router::builder("r1")
            .port(port_dyn.clone())
            .service(Some(ECHO_SAS), Arc::new(EchoService::new()))
            .build();
        router.routing_table.set_port_range(&port_dyn, 10, 10);
        router.start();

        router.inbound(
            Datagram {
                hop_count: 0,
                destination_network: 10,
                source_network: 10,
                destination_node: 5,
                source_node: 9,
                destination_socket: ECHO_SAS,
                source_socket: 128,
                ddp_type: ECHO_DDP_TYPE,
                data: vec![ECHO_FUNC_REQUEST, 0xAA, 0xBB],
            },
            &port_dyn,
        );
        std::thread::sleep(Duration::from_millis(50));

        let sent = port.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Sent::Unicast { network: 10, node: 9, datagram } => {
                assert_eq!(datagram.data, vec![ECHO_FUNC_REPLY, 0xAA, 0xBB]);
            }
            other => panic!("expected unicast reply, got {other:?}"),
        }
        router.stop();
    }

    #[test]
    fn non_request_func_is_ignored() {
        let port = Arc::new(MemoryPort::connected("A", 10, 5, false));
        let port_dyn: Arc<dyn Port> = port.clone();
        let router = Router::builder("r1")
            .port(port_dyn.clone())
            .service(Some(ECHO_SAS), Arc::new(EchoService::new()))
            .build();
        router.start();

        router.inbound(
            Datagram {
                hop_count: 0,
                destination_network: 10,
                source_network: 10,
                destination_node: 5,
                source_node: 9,
                destination_socket: ECHO_SAS,
                source_socket: 128,
                ddp_type: ECHO_DDP_TYPE,
                data: vec![ECHO_FUNC_REPLY, 0x01],
            },
            &port_dyn,
        );
        std::thread::sleep(Duration::from_millis(50));
        assert!(port.sent().is_empty());
        router.stop();
    }
}
