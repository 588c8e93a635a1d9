//! Assembles a two-port `StandardRouter` over in-memory ports and watches
//! it learn a route via RTMP. There is no real link driver here — see
//! `artalk_router::Port` for the contract a serial/Ethernet/UDP-tunnel
//! driver must satisfy; this demo only exercises the core.

use std::sync::Arc;
use std::time::Duration;

use artalk::{Port, StandardRouter};
use artalk_router::testing::MemoryPort;

fn main() -> Result<(), anyhow::Error> {
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    let port_a: Arc<dyn Port> = Arc::new(MemoryPort::connected("A", 10, 128, false));
    let port_b: Arc<dyn Port> = Arc::new(MemoryPort::connected("B", 20, 128, false));

    let router = StandardRouter::builder("demo").port(port_a.clone()).port(port_b.clone()).build();
    router.routing_table.set_port_range(&port_a, 10, 10);
    router.routing_table.set_port_range(&port_b, 20, 20);

    router.start();
    std::thread::sleep(Duration::from_millis(50));

    for (entry, is_bad) in router.routing_table.entries() {
        log::info!(
            "{}-{} via distance {} (bad: {is_bad})",
            entry.network_min,
            entry.network_max,
            entry.distance
        );
    }

    router.stop();
    Ok(())
}
