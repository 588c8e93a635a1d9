//! Tunables for the periodic services.
//!
//! spec.md's Non-goals exclude configuration *loading* (no file or
//! environment parsing) but the reference hardcodes these as per-service
//! `DEFAULT_TIMEOUT` class constants; this struct exposes the same
//! defaults as plain, programmatically overridable values instead.

use std::time::Duration;

/// Periodic intervals for the router's background services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// How often `RtmpSendingService` broadcasts the routing table.
    pub rtmp_send_interval: Duration,
    /// How often `RoutingTableAgingService` ticks the aging state machine.
    pub routing_table_age_interval: Duration,
    /// How often `ZipSendingService` asks neighbors for unknown zones.
    pub zip_send_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            rtmp_send_interval: Duration::from_secs(10),
            routing_table_age_interval: Duration::from_secs(20),
            zip_send_interval: Duration::from_secs(10),
        }
    }
}
