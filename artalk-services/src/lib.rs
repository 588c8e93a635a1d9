//! The control-plane services that run on top of `artalk-router`'s tables:
//! RTMP responding/sending, ZIP responding/sending, the routing-table
//! ager, AEP echo, and NBP routing.
//!
//! Each service is a thin [`artalk_router::Service`] wrapper around its own
//! worker thread(s); none of them know about each other, and all of them
//! only ever talk to the router through `Router::route`, `Router::reply`,
//! the routing table, and the zone information table.

mod periodic;

pub mod ager;
pub mod echo;
pub mod nbp;
pub mod rtmp;
pub mod zip;

pub use ager::RoutingTableAgingService;
pub use echo::EchoService;
pub use nbp::NameInformationService;
pub use rtmp::responding::RtmpRespondingService;
pub use rtmp::sending::RtmpSendingService;
pub use zip::responding::ZipRespondingService;
pub use zip::sending::ZipSendingService;

/// Reserved DDP sockets, shared across services (Inside AppleTalk's static
/// socket assignments).
pub mod sockets {
    pub const RTMP_SAS: u8 = 1;
    pub const NBP_SAS: u8 = 2;
    pub const ECHO_SAS: u8 = 4;
    pub const ZIP_SAS: u8 = 6;
}

/// Reserved DDP types.
pub mod ddp_types {
    pub const RTMP: u8 = 1;
    pub const NBP: u8 = 2;
    pub const ATP: u8 = 3;
    pub const ECHO: u8 = 4;
    pub const ZIP: u8 = 6;
}
