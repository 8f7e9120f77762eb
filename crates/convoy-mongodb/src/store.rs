//! MongoDB-backed store

use crate::connection::Connection;
use async_trait::async_trait;
use bson::{Bson, Document};
use convoy_common::{ConvoyError, Result};
use convoy_core::{BulkSummary, Store, WriteRequest};
use futures::TryStreamExt;
use mongodb::options::{
    DeleteManyModel, DeleteOneModel, InsertOneModel, UpdateManyModel, UpdateOneModel, WriteModel,
};
use mongodb::Namespace;
use std::sync::Arc;

/// [`Store`] implementation over a pooled MongoDB [`Connection`].
///
/// Models map to collections in the connection's default database.
pub struct MongoStore {
    connection: Arc<Connection>,
}

impl MongoStore {
    /// Create a store over an established connection
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    /// Connect and wrap in one step
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let connection = Connection::connect(connection_string).await?;
        Ok(Self::new(Arc::new(connection)))
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn insert(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<Bson>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let total = documents.len();
        let result = self
            .connection
            .collection(collection)
            .insert_many(documents)
            .await?;
        // inserted_ids is keyed by input position; re-emit in that order
        (0..total)
            .map(|position| {
                result.inserted_ids.get(&position).cloned().ok_or_else(|| {
                    ConvoyError::Store(format!("missing inserted id at position {}", position))
                })
            })
            .collect()
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        many: bool,
    ) -> Result<u64> {
        let target = self.connection.collection(collection);
        let result = if many {
            target.update_many(filter, update).await?
        } else {
            target.update_one(filter, update).await?
        };
        Ok(result.modified_count)
    }

    async fn delete(&self, collection: &str, filter: Document, many: bool) -> Result<u64> {
        let target = self.connection.collection(collection);
        let result = if many {
            target.delete_many(filter).await?
        } else {
            target.delete_one(filter).await?
        };
        Ok(result.deleted_count)
    }

    async fn find(&self, collection: &str, filter: Document) -> Result<Vec<Document>> {
        let documents = self
            .connection
            .collection(collection)
            .find(filter)
            .await?
            .try_collect()
            .await?;
        Ok(documents)
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        tracing::debug!(collection, stages = pipeline.len(), "running aggregation");
        let documents = self
            .connection
            .collection(collection)
            .aggregate(pipeline)
            .await?
            .try_collect()
            .await?;
        Ok(documents)
    }

    async fn count(&self, collection: &str, filter: Document) -> Result<u64> {
        let count = self
            .connection
            .collection(collection)
            .count_documents(filter)
            .await?;
        Ok(count)
    }

    async fn bulk_write(&self, collection: &str, writes: Vec<WriteRequest>) -> Result<BulkSummary> {
        if writes.is_empty() {
            return Ok(BulkSummary::default());
        }
        let namespace = self.connection.collection(collection).namespace();
        let models = write_models(&namespace, writes);
        tracing::debug!(
            collection,
            writes = models.len(),
            "running write batch as one driver call"
        );
        let result = self.connection.client().bulk_write(models).await?;
        Ok(BulkSummary {
            inserted: result.inserted_count as u64,
            modified: result.modified_count as u64,
            deleted: result.deleted_count as u64,
        })
    }
}

/// Lower batch entries to client-level write models, preserving order
fn write_models(namespace: &Namespace, writes: Vec<WriteRequest>) -> Vec<WriteModel> {
    writes
        .into_iter()
        .map(|write| match write {
            WriteRequest::InsertOne(document) => WriteModel::InsertOne(
                InsertOneModel::builder()
                    .namespace(namespace.clone())
                    .document(document)
                    .build(),
            ),
            WriteRequest::UpdateOne { filter, update } => WriteModel::UpdateOne(
                UpdateOneModel::builder()
                    .namespace(namespace.clone())
                    .filter(filter)
                    .update(update)
                    .build(),
            ),
            WriteRequest::UpdateMany { filter, update } => WriteModel::UpdateMany(
                UpdateManyModel::builder()
                    .namespace(namespace.clone())
                    .filter(filter)
                    .update(update)
                    .build(),
            ),
            WriteRequest::DeleteOne { filter } => WriteModel::DeleteOne(
                DeleteOneModel::builder()
                    .namespace(namespace.clone())
                    .filter(filter)
                    .build(),
            ),
            WriteRequest::DeleteMany { filter } => WriteModel::DeleteMany(
                DeleteManyModel::builder()
                    .namespace(namespace.clone())
                    .filter(filter)
                    .build(),
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_write_models_map_entries_in_order() {
        let namespace = Namespace {
            db: "app".to_string(),
            coll: "users".to_string(),
        };
        let models = write_models(
            &namespace,
            vec![
                WriteRequest::InsertOne(doc! { "name": "ada" }),
                WriteRequest::UpdateOne {
                    filter: doc! { "name": "ada" },
                    update: doc! { "$set": { "active": true } },
                },
                WriteRequest::UpdateMany {
                    filter: doc! { "active": false },
                    update: doc! { "$set": { "tier": "basic" } },
                },
                WriteRequest::DeleteOne {
                    filter: doc! { "name": "alan" },
                },
                WriteRequest::DeleteMany {
                    filter: doc! { "tier": "basic" },
                },
            ],
        );

        assert_eq!(models.len(), 5);
        assert!(matches!(
            &models[0],
            WriteModel::InsertOne(m) if m.namespace.coll == "users" && m.document == doc! { "name": "ada" }
        ));
        assert!(matches!(
            &models[1],
            WriteModel::UpdateOne(m) if m.filter == doc! { "name": "ada" }
        ));
        assert!(matches!(
            &models[2],
            WriteModel::UpdateMany(m) if m.filter == doc! { "active": false }
        ));
        assert!(matches!(
            &models[3],
            WriteModel::DeleteOne(m) if m.filter == doc! { "name": "alan" }
        ));
        assert!(matches!(
            &models[4],
            WriteModel::DeleteMany(m) if m.filter == doc! { "tier": "basic" }
        ));
    }

    #[test]
    fn test_write_models_empty_batch() {
        let namespace = Namespace {
            db: "app".to_string(),
            coll: "users".to_string(),
        };
        assert!(write_models(&namespace, Vec::new()).is_empty());
    }
}
