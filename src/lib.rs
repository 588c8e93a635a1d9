//! A multi-port AppleTalk internet router.
//!
//! This crate assembles [`artalk_ddp`]'s datagram codec, [`artalk_router`]'s
//! routing/zone tables and `Port`/`Service` contracts, and
//! [`artalk_services`]'s control-plane services into a ready-to-run
//! [`StandardRouter`] with the standard seven services every AppleTalk
//! router ships with. Link drivers (the actual Ethernet/LocalTalk/UDP-tunnel
//! `Port` implementations) are not this crate's concern; bring your own and
//! hand it to [`StandardRouter::builder`].

pub use artalk_ddp as ddp;
pub use artalk_router as router;
pub use artalk_services as services;

pub use artalk_ddp::Datagram;
pub use artalk_router::{Port, Router, RouterConfig, RoutingTable, RoutingTableEntry, Service, ZoneInformationTable};

use std::sync::Arc;

/// Builds a [`Router`] wired with the standard service set: echo, NBP
/// routing, routing-table aging, RTMP responding/sending, and ZIP
/// responding/sending. Equivalent to the reference router constructor,
/// which always creates exactly these seven services.
pub struct StandardRouterBuilder {
    name: String,
    config: RouterConfig,
    ports: Vec<Arc<dyn Port>>,
}

impl StandardRouterBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: RouterConfig::default(),
            ports: Vec::new(),
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

    /// Assemble the router. Ports are not started; call [`Router::start`]
    /// once the caller is ready to bring the router up.
    pub fn build(self) -> Arc<Router> {
        use artalk_services::sockets::{ECHO_SAS, NBP_SAS, RTMP_SAS, ZIP_SAS};
        use artalk_services::{
            EchoService, NameInformationService, RoutingTableAgingService, RtmpRespondingService, RtmpSendingService, ZipRespondingService,
            ZipSendingService,
        };

        let mut builder = Router::builder(self.name).config(self.config);
        for port in self.ports {
            builder = builder.port(port);
        }
        builder
            .service(Some(ECHO_SAS), Arc::new(EchoService::new()))
            .service(Some(NBP_SAS), Arc::new(NameInformationService::new()))
            .service(None, Arc::new(RoutingTableAgingService::new()))
            .service(Some(RTMP_SAS), Arc::new(RtmpRespondingService::new()))
            .service(None, Arc::new(RtmpSendingService::new()))
            .service(Some(ZIP_SAS), Arc::new(ZipRespondingService::new()))
            .service(None, Arc::new(ZipSendingService::new()))
            .build()
    }
}

/// Entry point for assembling a standard AppleTalk router.
///
/// ```no_run
/// use std::sync::Arc;
/// use artalk::{Port, StandardRouter};
///
/// fn assemble(port_a: Arc<dyn Port>, port_b: Arc<dyn Port>) {
///     let router = StandardRouter::builder("backbone").port(port_a).port(port_b).build();
///     router.start();
/// }
/// ```
pub struct StandardRouter;

impl StandardRouter {
    pub fn builder(name: impl Into<String>) -> StandardRouterBuilder {
        StandardRouterBuilder::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artalk_router::testing::MemoryPort;

    #[test]
    fn standard_router_wires_all_seven_services() {
        let port: Arc<dyn Port> = Arc::new(MemoryPort::connected("A", 10, 1, false));
        let router = StandardRouter::builder("r1").port(port).build();
        router.routing_table.set_port_range(&router.ports()[0], 10, 10);
        router.start();
        router.stop();
    }
}
