//! Fan-in operator for block operations

use crate::op::operation::{OpKind, Operation};
use crate::op::operator::{Operator, OperatorPass};
use async_trait::async_trait;
use convoy_common::{ConvoyError, Result};

/// Claims block operations and runs each body once every dependency
/// handle is resolved.
///
/// A block whose dependencies are still pending is deferred, not
/// unclaimed: it re-enters the next round's pending set and is retried
/// after the round that resolves its dependencies. Blocks depending on
/// other blocks therefore resolve breadth-first, one graph level per
/// round. Install this operator ahead of [`StoreOperator`] so same-round
/// store results are visible to blocks submitted a round earlier.
///
/// [`StoreOperator`]: crate::op::operator::StoreOperator
#[derive(Debug, Default)]
pub struct BlockOperator;

impl BlockOperator {
    /// Create the block operator
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Operator for BlockOperator {
    fn name(&self) -> &'static str {
        "block"
    }

    async fn apply(&self, pending: Vec<Operation>) -> Result<OperatorPass> {
        let mut pass = OperatorPass::done();
        for op in pending {
            let spec = match op.kind() {
                OpKind::Block(spec) => spec,
                _ => {
                    pass.unclaimed.push(op);
                    continue;
                }
            };
            if !spec.ready() {
                pass.deferred.push(op);
                continue;
            }
            let body = spec.take_body().ok_or_else(|| {
                ConvoyError::Internal("block body already consumed".to_string())
            })?;
            let outcomes = spec.outcomes();
            tracing::debug!(
                operation = %op.id(),
                dependencies = outcomes.len(),
                "running block body"
            );
            match body(outcomes) {
                Ok(value) => op.handle().complete(value)?,
                Err(err) => op.handle().fail(err)?,
            }
        }
        Ok(pass)
    }
}
