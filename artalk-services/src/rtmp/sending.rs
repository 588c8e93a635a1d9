//! RTMP sending service (component G): periodically broadcasts the
//! routing table out every acquired port.

use std::fmt;
use std::sync::Arc;

use artalk_ddp::Datagram;
use artalk_router::{Port, Router, Service};

use super::RTMP_DDP_TYPE_DATA;
use crate::periodic::PeriodicWorker;
use crate::sockets::RTMP_SAS;

/// Broadcasts RTMP data Datagrams for the routing table out every port,
/// every `router.config().rtmp_send_interval`, and on demand via
/// [`RtmpSendingService::force_send`].
pub struct RtmpSendingService {
    worker: PeriodicWorker,
}

impl fmt::Debug for RtmpSendingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtmpSendingService").finish()
    }
}

impl Default for RtmpSendingService {
    fn default() -> Self {
        Self::new()
    }
}

impl RtmpSendingService {
    pub fn new() -> Self {
        Self { worker: PeriodicWorker::new() }
    }

    /// Send an RTMP data Datagram for every port right now, bypassing the
    /// timer. Synchronous and deterministic, for tests that would
    /// otherwise have to wait out the real interval.
    pub fn force_send(&self, router: &Router) {
        send_all(router);
    }
}

impl Service for RtmpSendingService {
    fn start(&self, router: Arc<Router>) {
        let interval = router.config().rtmp_send_interval;
        self.worker.start(interval, "rtmp-sending", move || send_all(&router));
    }

    fn stop(&self) {
        self.worker.stop();
    }

    fn inbound(&self, _datagram: Datagram, _rx_port: Arc<dyn Port>) {}
}

fn send_all(router: &Router) {
    for port in router.ports() {
        if port.network() == 0 || port.node() == 0 {
            continue;
        }
        let Some(datagrams) = super::routing_table_datagram_data(router, port, true) else {
            continue;
        };
        for data in datagrams {
            port.broadcast(Datagram {
                hop_count: 0,
                destination_network: 0x0000,
                source_network: port.network(),
                destination_node: 0xFF,
                source_node: port.node(),
                destination_socket: RTMP_SAS,
                source_socket: RTMP_SAS,
                ddp_type: RTMP_DDP_TYPE_DATA,
                data,
            });
        }
    }
}
