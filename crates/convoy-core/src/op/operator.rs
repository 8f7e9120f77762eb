//! Operator chain contracts and the default store operator
//!
//! Unlike signal handlers, operators use whole-set claim semantics: each
//! operator in the chain receives every still-pending operation, resolves
//! the ones it owns, and returns the rest. This lets advanced callers
//! substitute a custom operator for one operation kind (a caching layer,
//! a short-circuit) ahead of the default operator without modifying it.

use crate::op::operation::{OpKind, OpOutput, Operation};
use crate::store::{Store, WriteRequest};
use async_trait::async_trait;
use convoy_common::{ConvoyError, Result};
use std::sync::Arc;

/// Outcome of one operator's pass over the pending set
#[derive(Default)]
pub struct OperatorPass {
    /// Operations this operator does not own; handed to the next operator
    pub unclaimed: Vec<Operation>,
    /// Operations this operator owns but cannot complete yet; re-enter the
    /// next round's pending set
    pub deferred: Vec<Operation>,
}

impl OperatorPass {
    /// Everything claimed and completed
    pub fn done() -> Self {
        Self::default()
    }

    /// Nothing claimed
    pub fn untouched(pending: Vec<Operation>) -> Self {
        Self {
            unclaimed: pending,
            deferred: Vec::new(),
        }
    }
}

/// One link of the operator chain.
///
/// `apply` resolves the handles of every operation it claims (success or
/// error) and never leaves a claimed operation pending, except by
/// returning it as deferred. Errors from `apply` itself are structural
/// faults that abort the round.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Operator name used in trace output
    fn name(&self) -> &'static str;

    /// Claim and complete what this operator can; return the rest
    async fn apply(&self, pending: Vec<Operation>) -> Result<OperatorPass>;
}

/// Default operator mapping store kinds 1:1 onto [`Store`] calls, grouped
/// by target collection.
///
/// Per collection and round: inserts are concatenated into one `insert`
/// call (inserted ids split back positionally), updates and deletes fold
/// into one `bulk_write` whose summary resolves every participating
/// operation, and reads run concurrently. Store errors resolve the
/// affected handles; they are not operator-fatal.
pub struct StoreOperator {
    store: Arc<dyn Store>,
}

impl StoreOperator {
    /// Create the default operator over the given store
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn run_collection(&self, collection: &str, ops: Vec<Operation>) -> Result<()> {
        let mut inserts = Vec::new();
        let mut writes = Vec::new();
        let mut bulks = Vec::new();
        let mut reads = Vec::new();
        for op in ops {
            match op.kind() {
                OpKind::Insert { .. } => inserts.push(op),
                OpKind::Update { .. } | OpKind::Delete { .. } => writes.push(op),
                OpKind::BulkWrite { .. } => bulks.push(op),
                _ => reads.push(op),
            }
        }

        self.run_inserts(collection, &inserts).await?;
        self.run_writes(collection, &writes).await?;
        for op in &bulks {
            if let OpKind::BulkWrite { writes, .. } = op.kind() {
                match self.store.bulk_write(collection, writes.clone()).await {
                    Ok(summary) => op.handle().complete(OpOutput::Bulk(summary))?,
                    Err(err) => op.handle().fail(err)?,
                }
            }
        }
        self.run_reads(collection, &reads).await?;
        Ok(())
    }

    async fn run_inserts(&self, collection: &str, inserts: &[Operation]) -> Result<()> {
        if inserts.is_empty() {
            return Ok(());
        }
        let mut merged = Vec::new();
        let mut spans = Vec::with_capacity(inserts.len());
        for op in inserts {
            if let OpKind::Insert { documents, .. } = op.kind() {
                spans.push(documents.len());
                merged.extend(documents.iter().cloned());
            }
        }
        tracing::debug!(
            collection,
            operations = inserts.len(),
            documents = merged.len(),
            "merged insert"
        );
        match self.store.insert(collection, merged).await {
            Ok(ids) => {
                let mut cursor = 0;
                for (op, span) in inserts.iter().zip(spans) {
                    let own = ids.get(cursor..cursor + span).map(|s| s.to_vec()).ok_or_else(
                        || {
                            ConvoyError::Internal(format!(
                                "store returned {} inserted ids for {} documents",
                                ids.len(),
                                cursor + span
                            ))
                        },
                    )?;
                    cursor += span;
                    op.handle().complete(OpOutput::Inserted(own))?;
                }
            }
            Err(err) => {
                for op in inserts {
                    op.handle().fail(err.clone())?;
                }
            }
        }
        Ok(())
    }

    async fn run_writes(&self, collection: &str, writes: &[Operation]) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let mut entries = Vec::with_capacity(writes.len());
        for op in writes {
            match op.kind() {
                OpKind::Update {
                    filter,
                    update,
                    many,
                    ..
                } => entries.push(if *many {
                    WriteRequest::UpdateMany {
                        filter: filter.clone(),
                        update: update.clone(),
                    }
                } else {
                    WriteRequest::UpdateOne {
                        filter: filter.clone(),
                        update: update.clone(),
                    }
                }),
                OpKind::Delete { filter, many, .. } => entries.push(if *many {
                    WriteRequest::DeleteMany {
                        filter: filter.clone(),
                    }
                } else {
                    WriteRequest::DeleteOne {
                        filter: filter.clone(),
                    }
                }),
                _ => {}
            }
        }
        tracing::debug!(collection, operations = writes.len(), "merged bulk write");
        match self.store.bulk_write(collection, entries).await {
            // Request-level atomicity: every folded operation shares the
            // batch summary
            Ok(summary) => {
                for op in writes {
                    op.handle().complete(OpOutput::Bulk(summary.clone()))?;
                }
            }
            Err(err) => {
                for op in writes {
                    op.handle().fail(err.clone())?;
                }
            }
        }
        Ok(())
    }

    async fn run_reads(&self, collection: &str, reads: &[Operation]) -> Result<()> {
        let calls = reads.iter().map(|op| async move {
            let outcome = match op.kind() {
                OpKind::Find { filter, .. } => self
                    .store
                    .find(collection, filter.clone())
                    .await
                    .map(OpOutput::Documents),
                OpKind::Aggregate { pipeline, .. } => self
                    .store
                    .aggregate(collection, pipeline.clone())
                    .await
                    .map(OpOutput::Documents),
                OpKind::Count { filter, .. } => self
                    .store
                    .count(collection, filter.clone())
                    .await
                    .map(OpOutput::Count),
                other => Err(ConvoyError::Internal(format!(
                    "unexpected kind in read group: {}",
                    other.label()
                ))),
            };
            match outcome {
                Ok(value) => op.handle().complete(value),
                Err(err) => op.handle().fail(err),
            }
        });
        for resolution in futures::future::join_all(calls).await {
            resolution?;
        }
        Ok(())
    }
}

#[async_trait]
impl Operator for StoreOperator {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn apply(&self, pending: Vec<Operation>) -> Result<OperatorPass> {
        // Claim every collection-addressed kind; blocks and customs flow on
        let mut unclaimed = Vec::new();
        let mut groups: Vec<(String, Vec<Operation>)> = Vec::new();
        for op in pending {
            match op.kind().collection() {
                Some(collection) => {
                    let collection = collection.to_string();
                    match groups.iter_mut().find(|(c, _)| *c == collection) {
                        Some((_, ops)) => ops.push(op),
                        None => groups.push((collection, vec![op])),
                    }
                }
                None => unclaimed.push(op),
            }
        }

        for (collection, ops) in groups {
            self.run_collection(&collection, ops).await?;
        }
        Ok(OperatorPass {
            unclaimed,
            deferred: Vec::new(),
        })
    }
}
