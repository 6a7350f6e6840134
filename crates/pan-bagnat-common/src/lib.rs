//! Shared domain types for the Pan Bagnat platform.
//!
//! Everything that more than one process needs lives here: the entity
//! structs backed by the relational store, the error taxonomy, slug and
//! topic helpers, keyset-pagination tokens, and the HMAC handoff token
//! that lets the page proxy reconstruct a session on a module subdomain.

pub mod error;
pub mod id;
pub mod notify;
pub mod pagination;
pub mod sessions;
pub mod slug;
pub mod token;
pub mod topics;
pub mod tracing_init;
pub mod types;

pub use error::Error;
pub use types::*;
