//! Signal kinds for the fine-grained batching layer
//!
//! A [`Signal`] is an immutable description of one unit of batchable work
//! plus the [`Handle`] that receives its outcome. Task bodies emit signals
//! through [`TaskScope`](crate::task::TaskScope); the scheduler batches
//! every signal issued in the same round and hands each batch to the first
//! handler that claims it.

use crate::handle::Handle;
use bson::{Bson, Document};
use convoy_common::ConvoyError;
use serde::{Deserialize, Serialize};

/// Outcome delivered back to a task for one emitted signal
pub type SignalResult = std::result::Result<Bson, ConvoyError>;

/// Closed set of query kinds the fine-grained layer understands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SignalQuery {
    /// Run a pipeline fragment against a model, returning its documents
    Pipeline {
        /// Target model (logical collection name)
        model: String,
        /// Aggregation stages of the fragment
        stages: Vec<Document>,
    },
    /// Count the documents of a model matching a filter
    Count {
        /// Target model
        model: String,
        /// Match filter
        filter: Document,
    },
    /// Check whether any document of a model matches a filter
    Exists {
        /// Target model
        model: String,
        /// Match filter
        filter: Document,
    },
}

impl SignalQuery {
    /// Target model of this query
    pub fn model(&self) -> &str {
        match self {
            SignalQuery::Pipeline { model, .. }
            | SignalQuery::Count { model, .. }
            | SignalQuery::Exists { model, .. } => model,
        }
    }

    /// Short label used in error messages and trace output
    pub fn label(&self) -> String {
        match self {
            SignalQuery::Pipeline { model, .. } => format!("pipeline on {}", model),
            SignalQuery::Count { model, .. } => format!("count on {}", model),
            SignalQuery::Exists { model, .. } => format!("exists on {}", model),
        }
    }
}

/// One emitted unit of batchable work: a query plus its result handle.
///
/// A signal is valueless once issued; the emitting task never mutates it
/// afterwards. The handle can be shared before dispatch so that other
/// readers observe the same outcome.
#[derive(Debug, Clone)]
pub struct Signal {
    query: SignalQuery,
    handle: Handle<Bson>,
}

impl Signal {
    /// Create a signal from a raw query
    pub fn new(query: SignalQuery) -> Self {
        Self {
            query,
            handle: Handle::new(),
        }
    }

    /// Pipeline-fragment signal
    pub fn pipeline(model: impl Into<String>, stages: Vec<Document>) -> Self {
        Self::new(SignalQuery::Pipeline {
            model: model.into(),
            stages,
        })
    }

    /// Count signal
    pub fn count(model: impl Into<String>, filter: Document) -> Self {
        Self::new(SignalQuery::Count {
            model: model.into(),
            filter,
        })
    }

    /// Existence-check signal
    pub fn exists(model: impl Into<String>, filter: Document) -> Self {
        Self::new(SignalQuery::Exists {
            model: model.into(),
            filter,
        })
    }

    /// The query this signal carries
    pub fn query(&self) -> &SignalQuery {
        &self.query
    }

    /// A shared reference to the result handle
    pub fn handle(&self) -> Handle<Bson> {
        self.handle.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_query_model() {
        let q = SignalQuery::Count {
            model: "users".to_string(),
            filter: doc! { "active": true },
        };
        assert_eq!(q.model(), "users");
        assert_eq!(q.label(), "count on users");
    }

    #[test]
    fn test_signal_constructors() {
        let s = Signal::count("users", doc! { "age": { "$gte": 18 } });
        assert!(matches!(s.query(), SignalQuery::Count { model, .. } if model == "users"));
        assert!(!s.handle().is_resolved());

        let s = Signal::exists("orders", doc! { "user_id": 1 });
        assert!(matches!(s.query(), SignalQuery::Exists { .. }));

        let s = Signal::pipeline("events", vec![doc! { "$match": { "kind": "click" } }]);
        assert!(matches!(s.query(), SignalQuery::Pipeline { .. }));
    }

    #[test]
    fn test_handle_is_shared() {
        let s = Signal::count("users", doc! {});
        let observer = s.handle();

        s.handle().complete(Bson::Int64(3)).unwrap();
        assert_eq!(observer.peek().unwrap().unwrap(), Bson::Int64(3));
    }
}
