//! Routing table aging service (component J, ager half): periodically
//! ages every entry in the routing table one step toward removal.

use std::fmt;
use std::sync::Arc;

use artalk_ddp::Datagram;
use artalk_router::{Port, Router, Service};

use crate::periodic::PeriodicWorker;

/// Calls [`artalk_router::RoutingTable::age`] every
/// `router.config().routing_table_age_interval`, and on demand via
/// [`RoutingTableAgingService::age_now`].
pub struct RoutingTableAgingService {
    worker: PeriodicWorker,
}

impl fmt::Debug for RoutingTableAgingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingTableAgingService").finish()
    }
}

impl Default for RoutingTableAgingService {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTableAgingService {
    pub fn new() -> Self {
        Self { worker: PeriodicWorker::new() }
    }

    /// Age the routing table right now, bypassing the timer. Synchronous
    /// and deterministic, for tests.
    pub fn age_now(&self, router: &Router) {
        router.routing_table.age();
    }
}

impl Service for RoutingTableAgingService {
    fn start(&self, router: Arc<Router>) {
        let interval = router.config().routing_table_age_interval;
        self.worker.start(interval, "routing-table-aging", move || router.routing_table.age());
    }

    fn stop(&self) {
        self.worker.stop();
    }

    fn inbound(&self, _datagram: Datagram, _rx_port: Arc<dyn Port>) {}
}
