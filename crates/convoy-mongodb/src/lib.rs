//! MongoDB backend for convoy
//!
//! Wires the scheduler's [`Store`](convoy_core::Store) capability to a
//! real MongoDB deployment: a pooled [`Connection`] plus a [`MongoStore`]
//! that maps store calls onto driver operations. Coalesced `$facet`
//! aggregations produced by the scheduler run unchanged against the
//! server.

pub mod connection;
pub mod store;

pub use connection::{Connection, PoolConfig};
pub use convoy_common::{ConvoyError, Result};
pub use store::MongoStore;
