//! Round-driven client for coarse-grained operations

use crate::handle::Handle;
use crate::op::block::BlockOperator;
use crate::op::operation::{OpOutput, Operation};
use crate::op::operator::{Operator, StoreOperator};
use crate::store::Store;
use convoy_common::{ConvoyError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// Collects submitted operations and resolves them in rounds through an
/// ordered operator chain.
///
/// Each round drains the pending set and walks it through the chain:
/// every operator claims and completes what it owns and hands the rest
/// on. Operations left unclaimed at the end of the chain are cancelled
/// with [`ConvoyError::Unsupported`] so no handle is ever silently
/// abandoned. Deferred operations (blocks waiting on dependencies) and
/// operations submitted during the round re-enter the next one.
pub struct OpClient {
    operators: Vec<Arc<dyn Operator>>,
    pending: Mutex<Vec<Operation>>,
}

impl OpClient {
    /// Create a client with an empty operator chain
    pub fn new() -> Self {
        Self {
            operators: Vec::new(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Standard chain over a store: blocks first, then store kinds.
    ///
    /// The block operator runs first so a block deferred in an earlier
    /// round sees that round's store results before new store work runs.
    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self::new()
            .with_operator(Arc::new(BlockOperator::new()))
            .with_operator(Arc::new(StoreOperator::new(store)))
    }

    /// Append an operator to the chain (builder style)
    pub fn with_operator(mut self, operator: Arc<dyn Operator>) -> Self {
        self.operators.push(operator);
        self
    }

    /// Append an operator to the chain
    pub fn add_operator(&mut self, operator: Arc<dyn Operator>) {
        self.operators.push(operator);
    }

    /// Queue an operation for the next round and return its result handle
    pub fn submit(&self, operation: Operation) -> Handle<OpOutput> {
        let handle = operation.handle();
        tracing::debug!(
            operation = %operation.id(),
            kind = %operation.kind().label(),
            "operation submitted"
        );
        self.pending.lock().push(operation);
        handle
    }

    /// Number of operations waiting for the next round
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drive rounds until every submitted operation is resolved.
    ///
    /// Returns `Err` only on structural faults (an operator failing, a
    /// handle completed twice); per-operation store errors resolve that
    /// operation's handle and do not abort the run.
    pub async fn run(&self) -> Result<()> {
        let mut round = 0u64;
        loop {
            let batch = std::mem::take(&mut *self.pending.lock());
            if batch.is_empty() {
                break;
            }
            round += 1;
            let total = batch.len();

            let mut unclaimed = batch;
            let mut deferred = Vec::new();
            for operator in &self.operators {
                if unclaimed.is_empty() {
                    break;
                }
                let count = unclaimed.len();
                let pass = operator.apply(unclaimed).await?;
                tracing::trace!(
                    round,
                    operator = operator.name(),
                    offered = count,
                    unclaimed = pass.unclaimed.len(),
                    deferred = pass.deferred.len(),
                    "operator pass"
                );
                deferred.extend(pass.deferred);
                unclaimed = pass.unclaimed;
            }

            // End of chain: nothing owns these kinds
            let cancelled = unclaimed.len();
            for op in unclaimed {
                let label = op.kind().label();
                tracing::warn!(operation = %op.id(), kind = %label, "no operator claims this kind");
                op.handle().fail(ConvoyError::Unsupported(label))?;
            }

            let submitted = self.pending.lock().len();
            let claimed = total - cancelled - deferred.len();
            tracing::debug!(
                round,
                total,
                claimed,
                cancelled,
                deferred = deferred.len(),
                submitted,
                "round complete"
            );

            // A round that resolves nothing and gains nothing cannot make
            // the deferred set ready; fail it instead of spinning
            if claimed == 0 && cancelled == 0 && submitted == 0 {
                for op in deferred {
                    let label = op.kind().label();
                    op.handle().fail(ConvoyError::Internal(format!(
                        "dependencies of {} can no longer resolve",
                        label
                    )))?;
                }
                break;
            }

            let mut pending = self.pending.lock();
            let newly_submitted = std::mem::take(&mut *pending);
            *pending = deferred;
            pending.extend(newly_submitted);
        }
        Ok(())
    }
}

impl Default for OpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::op::operation::{OpKind, OpResult};
    use crate::op::operator::OperatorPass;
    use async_trait::async_trait;
    use bson::{doc, Bson};

    #[tokio::test]
    async fn test_store_kinds_resolve_in_one_round() {
        let store = Arc::new(MemoryStore::new());
        let client = OpClient::with_store(store.clone());

        let insert = client.submit(Operation::insert(
            "users",
            vec![doc! { "name": "ada" }, doc! { "name": "grace" }],
        ));
        let count = client.submit(Operation::count("users", doc! {}));

        client.run().await.unwrap();

        assert!(matches!(
            insert.peek().unwrap().unwrap(),
            OpOutput::Inserted(ids) if ids.len() == 2
        ));
        // Counts run in the same round as the insert, against the
        // pre-insert state
        assert_eq!(count.peek().unwrap().unwrap(), OpOutput::Count(0));
        assert_eq!(store.documents("users").len(), 2);
    }

    #[tokio::test]
    async fn test_unclaimed_kind_is_cancelled_without_blocking_siblings() {
        let store = Arc::new(MemoryStore::new());
        let client = OpClient::with_store(store);

        let unknown = client.submit(Operation::custom("teleport", doc! {}));
        let find = client.submit(Operation::find("users", doc! {}));

        client.run().await.unwrap();

        match unknown.peek().unwrap() {
            Err(err) => {
                // Cancellations are distinguishable from store failures
                assert!(err.is_cancellation());
                assert!(matches!(err, ConvoyError::Unsupported(label) if label == "custom:teleport"));
            }
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert!(matches!(
            find.peek().unwrap().unwrap(),
            OpOutput::Documents(docs) if docs.is_empty()
        ));
    }

    struct CacheOperator;

    #[async_trait]
    impl Operator for CacheOperator {
        fn name(&self) -> &'static str {
            "cache"
        }

        async fn apply(&self, pending: Vec<Operation>) -> Result<OperatorPass> {
            let mut pass = OperatorPass::done();
            for op in pending {
                match op.kind() {
                    OpKind::Custom { name, payload } if name == "cache" => {
                        let value = Bson::Document(payload.clone());
                        op.handle().complete(OpOutput::Value(value))?;
                    }
                    _ => pass.unclaimed.push(op),
                }
            }
            Ok(pass)
        }
    }

    #[tokio::test]
    async fn test_earlier_operator_wins_the_claim() {
        let store = Arc::new(MemoryStore::new());
        let client = OpClient::new()
            .with_operator(Arc::new(CacheOperator))
            .with_operator(Arc::new(BlockOperator::new()))
            .with_operator(Arc::new(StoreOperator::new(store)));

        let cached = client.submit(Operation::custom("cache", doc! { "key": "k1" }));
        let other = client.submit(Operation::custom("uncachable", doc! {}));

        client.run().await.unwrap();

        assert_eq!(
            cached.peek().unwrap().unwrap(),
            OpOutput::Value(Bson::Document(doc! { "key": "k1" }))
        );
        assert!(matches!(
            other.peek().unwrap(),
            Err(ConvoyError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_block_fans_in_same_run() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(
                "events",
                vec![
                    doc! { "kind": "a" },
                    doc! { "kind": "a" },
                    doc! { "kind": "b" },
                ],
            )
            .await
            .unwrap();
        let client = OpClient::with_store(store);

        let a = client.submit(Operation::count("events", doc! { "kind": "a" }));
        let b = client.submit(Operation::count("events", doc! { "kind": "b" }));
        let total = client.submit(Operation::block(
            vec![a, b],
            |outcomes: Vec<OpResult>| {
                let mut sum = 0u64;
                for outcome in outcomes {
                    match outcome? {
                        OpOutput::Count(n) => sum += n,
                        other => panic!("unexpected dependency output: {:?}", other),
                    }
                }
                Ok(OpOutput::Count(sum))
            },
        ));

        client.run().await.unwrap();
        assert_eq!(total.peek().unwrap().unwrap(), OpOutput::Count(3));
    }

    #[tokio::test]
    async fn test_block_depending_on_block() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("events", vec![doc! { "kind": "a" }])
            .await
            .unwrap();
        let client = OpClient::with_store(store);

        let leaf = client.submit(Operation::count("events", doc! {}));
        let inner = client.submit(Operation::block(vec![leaf], |outcomes: Vec<OpResult>| {
            match outcomes.into_iter().next().unwrap()? {
                OpOutput::Count(n) => Ok(OpOutput::Count(n + 10)),
                other => Ok(other),
            }
        }));
        let outer = client.submit(Operation::block(vec![inner], |outcomes: Vec<OpResult>| {
            match outcomes.into_iter().next().unwrap()? {
                OpOutput::Count(n) => Ok(OpOutput::Count(n * 2)),
                other => Ok(other),
            }
        }));

        client.run().await.unwrap();
        assert_eq!(outer.peek().unwrap().unwrap(), OpOutput::Count(22));
    }

    #[tokio::test]
    async fn test_block_on_unresolvable_dependency_fails_instead_of_spinning() {
        let store = Arc::new(MemoryStore::new());
        let client = OpClient::with_store(store);

        // Handle no operation will ever resolve
        let orphan: Handle<OpOutput> = Handle::new();
        let stuck = client.submit(Operation::block(vec![orphan], |outcomes| {
            outcomes.into_iter().next().unwrap()
        }));
        let find = client.submit(Operation::find("users", doc! {}));

        client.run().await.unwrap();

        assert!(matches!(
            find.peek().unwrap().unwrap(),
            OpOutput::Documents(_)
        ));
        assert!(matches!(
            stuck.peek().unwrap(),
            Err(ConvoyError::Internal(_))
        ));
    }
}
