//! Cooperative batching scheduler for document stores
//!
//! Convoy lets many independently written pieces of logic (validators,
//! default-value resolvers, collection operations) each describe the store
//! work they need, then coalesces everything issued in the same round into
//! the fewest possible round trips and resumes each piece of logic with its
//! individual answer.
//!
//! The pattern runs at two granularities sharing one round skeleton:
//!
//! - **Signals** — fine-grained queries emitted by resumable task bodies,
//!   batched per round by [`SignalScheduler`] and coalesced per model into
//!   single `$facet` aggregations by [`FacetHandler`].
//! - **Operations** — coarse-grained store operations (insert, update,
//!   delete, find, aggregate, count, bulk write) dispatched by [`OpClient`]
//!   through an ordered operator chain with whole-set claim semantics.
//!
//! Both granularities resolve results through single-assignment
//! [`Handle`]s, and both treat a round boundary as a hard barrier: work
//! issued while resuming in round *k* is dispatched in round *k + 1*.

pub mod facet;
pub mod handle;
pub mod handler;
pub mod memory;
pub mod op;
pub mod scheduler;
pub mod signal;
pub mod store;
pub mod task;

pub use convoy_common::{ConvoyError, Result};
pub use facet::FacetHandler;
pub use handle::Handle;
pub use handler::SignalHandler;
pub use memory::MemoryStore;
pub use op::{
    BlockOperator, OpClient, OpKind, OpOutput, OpResult, Operation, OperationId, Operator,
    OperatorPass, StoreOperator,
};
pub use scheduler::SignalScheduler;
pub use signal::{Signal, SignalQuery, SignalResult};
pub use store::{BulkSummary, Store, WriteRequest};
pub use task::{SignalTask, TaskScope};
