//! The store capability boundary
//!
//! The scheduler's only external collaborator is a store offering
//! insert/update/delete/find/aggregate/count/bulk-write over a logical
//! collection name and structured bson values. Whatever backs the trait —
//! a MongoDB driver, an in-memory map, a cache — is a legal substitute as
//! long as it honors these primitives.

use async_trait::async_trait;
use bson::{Bson, Document};
use convoy_common::Result;
use serde::{Deserialize, Serialize};

/// One entry of a bulk write batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteRequest {
    /// Insert a single document
    InsertOne(Document),
    /// Update the first document matching the filter
    UpdateOne {
        /// Match filter
        filter: Document,
        /// Update document
        update: Document,
    },
    /// Update every document matching the filter
    UpdateMany {
        /// Match filter
        filter: Document,
        /// Update document
        update: Document,
    },
    /// Delete the first document matching the filter
    DeleteOne {
        /// Match filter
        filter: Document,
    },
    /// Delete every document matching the filter
    DeleteMany {
        /// Match filter
        filter: Document,
    },
}

/// Aggregate counts for one bulk write call.
///
/// The store gives request-level atomicity per batched call; counts are
/// therefore whole-batch, never per entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSummary {
    /// Documents inserted by the batch
    pub inserted: u64,
    /// Documents modified by the batch
    pub modified: u64,
    /// Documents deleted by the batch
    pub deleted: u64,
}

/// External store capability.
///
/// Object safe so the default operator and the facet handler can hold a
/// `dyn Store` behind an `Arc`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert documents, returning their ids in input order
    async fn insert(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<Bson>>;

    /// Update matching documents, returning the modified count
    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        many: bool,
    ) -> Result<u64>;

    /// Delete matching documents, returning the deleted count
    async fn delete(&self, collection: &str, filter: Document, many: bool) -> Result<u64>;

    /// Find all documents matching the filter
    async fn find(&self, collection: &str, filter: Document) -> Result<Vec<Document>>;

    /// Run an aggregation pipeline
    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>>;

    /// Count documents matching the filter
    async fn count(&self, collection: &str, filter: Document) -> Result<u64>;

    /// Execute a batch of writes as one call
    async fn bulk_write(&self, collection: &str, writes: Vec<WriteRequest>) -> Result<BulkSummary>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_bulk_summary_default() {
        let summary = BulkSummary::default();
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.modified, 0);
        assert_eq!(summary.deleted, 0);
    }

    #[test]
    fn test_write_request_shapes() {
        let insert = WriteRequest::InsertOne(doc! { "name": "a" });
        assert!(matches!(insert, WriteRequest::InsertOne(_)));

        let update = WriteRequest::UpdateMany {
            filter: doc! { "active": false },
            update: doc! { "$set": { "active": true } },
        };
        assert!(matches!(update, WriteRequest::UpdateMany { .. }));
    }
}
