//! Live event fabric: topic registry, per-connection WebSocket loops and
//! the HMAC-guarded webhook ingress.
//!
//! Producers (lifecycle engine, Docker event fabric, webhook) push
//! [`Event`](pan_bagnat_common::types::Event)s onto one bounded channel;
//! a dispatcher task fans each event out to the connections subscribed to
//! its topic. Subscribe/unsubscribe refcount hooks let the fabric start
//! and stop per-container log tails.

pub mod handler;
pub mod registry;
pub mod webhook;

pub use registry::{WsRegistry, spawn_dispatcher};
