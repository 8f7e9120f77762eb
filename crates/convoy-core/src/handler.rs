//! Pluggable signal handlers
//!
//! A handler declares which signal kinds it can satisfy and executes a
//! same-round batch of them, ideally as one store call. Handlers are
//! registered as an ordered list on the scheduler; the first handler whose
//! [`SignalHandler::can_handle`] accepts a query owns it for the round.
//! New batched request kinds are added purely by registering a new
//! handler; the round loop never changes.

use crate::signal::{SignalQuery, SignalResult};
use async_trait::async_trait;
use convoy_common::Result;

/// Batch executor for one or more signal kinds.
///
/// The positional contract is load-bearing: `handle` must return exactly
/// one result per query, in input order, so the scheduler can zip results
/// back to the emitting tasks. Returning an `Err` from `handle` resolves
/// every query of the batch with that error.
#[async_trait]
pub trait SignalHandler: Send + Sync {
    /// Handler name used in trace output
    fn name(&self) -> &'static str;

    /// Whether this handler can satisfy the given query
    fn can_handle(&self, query: &SignalQuery) -> bool;

    /// Execute a same-round batch of accepted queries.
    ///
    /// `batch[i]`'s outcome must be at position `i` of the returned
    /// vector. Per-item errors are ordinary outcomes; an outer `Err`
    /// fails the whole batch uniformly.
    async fn handle(&self, batch: &[SignalQuery]) -> Result<Vec<SignalResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, Bson};

    struct CountOnly;

    #[async_trait]
    impl SignalHandler for CountOnly {
        fn name(&self) -> &'static str {
            "count_only"
        }

        fn can_handle(&self, query: &SignalQuery) -> bool {
            matches!(query, SignalQuery::Count { .. })
        }

        async fn handle(&self, batch: &[SignalQuery]) -> Result<Vec<SignalResult>> {
            Ok(batch.iter().map(|_| Ok(Bson::Int64(0))).collect())
        }
    }

    #[tokio::test]
    async fn test_capability_predicate() {
        let handler = CountOnly;

        let count = SignalQuery::Count {
            model: "users".to_string(),
            filter: doc! {},
        };
        let exists = SignalQuery::Exists {
            model: "users".to_string(),
            filter: doc! {},
        };

        assert!(handler.can_handle(&count));
        assert!(!handler.can_handle(&exists));

        let results = handler.handle(&[count]).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
