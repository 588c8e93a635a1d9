//! The contract a control-plane service fulfills against a [`Router`].
//!
//! [`Router`]: crate::router::Router

use std::fmt;
use std::sync::Arc;

use artalk_ddp::Datagram;

use crate::port::Port;
use crate::router::Router;

/// A service that lives on a router and, if registered against a socket,
/// receives every Datagram addressed to it.
///
/// Like [`Port`], this is not `Thread`-like: a service may run zero, one,
/// or several worker threads internally.
pub trait Service: fmt::Debug + Send + Sync {
    /// Start this service against `router`. Implementations typically
    /// spawn one worker thread that moves this `Arc` into its closure;
    /// since the `Router` owns the `Service` but not the other way
    /// around, the clone lives only as long as the thread does and no
    /// reference cycle results.
    fn start(&self, router: Arc<Router>);

    /// Stop this service's threads, idempotently.
    fn stop(&self);

    /// Deliver a Datagram addressed to this service's socket.
    fn inbound(&self, datagram: Datagram, rx_port: Arc<dyn Port>);
}
