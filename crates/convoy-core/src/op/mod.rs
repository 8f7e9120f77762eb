//! Coarse-grained operation layer
//!
//! The structural twin of the signal scheduler, over raw store operations
//! instead of validation signals. Operations are submitted to an
//! [`OpClient`] and resolved round by round through an ordered operator
//! chain: each [`Operator`] receives the whole still-pending set, claims
//! and completes what it can, and passes the remainder on. Operations
//! unclaimed by the full chain are cancelled with a distinguishable
//! "not supported" error rather than left pending.

pub mod block;
pub mod client;
pub mod operation;
pub mod operator;

pub use block::BlockOperator;
pub use client::OpClient;
pub use operation::{OpKind, OpOutput, OpResult, Operation, OperationId};
pub use operator::{Operator, OperatorPass, StoreOperator};
