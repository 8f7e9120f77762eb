//! In-memory reference store
//!
//! [`MemoryStore`] implements the [`Store`] capability over a concurrent
//! map of collections. It understands the filter operators and pipeline
//! stages the scheduler itself relies on (`$match`, `$limit`, `$count`,
//! `$facet`) plus the common comparison operators, which makes it a
//! self-contained backend for tests, examples, and small tools. Every
//! store call is tallied per operation so tests can assert batching
//! behavior ("exactly one aggregate call for this round").

use crate::store::{BulkSummary, Store, WriteRequest};
use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document};
use convoy_common::{ConvoyError, Result};
use dashmap::DashMap;

/// DashMap-backed store with per-operation call counters
#[derive(Default)]
pub struct MemoryStore {
    collections: DashMap<String, Vec<Document>>,
    calls: DashMap<&'static str, u64>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the given operation (`"insert"`, `"find"`,
    /// `"aggregate"`, ...) has been called
    pub fn calls(&self, op: &str) -> u64 {
        self.calls.get(op).map(|c| *c).unwrap_or(0)
    }

    /// Snapshot of a collection's documents
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    fn record(&self, op: &'static str) {
        *self.calls.entry(op).or_insert(0) += 1;
    }

    fn run_pipeline(&self, mut working: Vec<Document>, pipeline: &[Document]) -> Result<Vec<Document>> {
        for stage in pipeline {
            let (name, spec) = stage.iter().next().ok_or_else(|| {
                ConvoyError::Store("empty aggregation stage".to_string())
            })?;
            match name.as_str() {
                "$match" => {
                    let filter = spec.as_document().ok_or_else(|| {
                        ConvoyError::Store("$match expects a document".to_string())
                    })?;
                    working.retain(|d| matches_filter(d, filter));
                }
                "$limit" => {
                    let limit = bson_to_i64(spec).ok_or_else(|| {
                        ConvoyError::Store("$limit expects a number".to_string())
                    })?;
                    working.truncate(limit.max(0) as usize);
                }
                "$count" => {
                    let field = spec.as_str().ok_or_else(|| {
                        ConvoyError::Store("$count expects a field name".to_string())
                    })?;
                    let n = working.len() as i64;
                    working = vec![doc! { field: n }];
                }
                "$facet" => {
                    let branches = spec.as_document().ok_or_else(|| {
                        ConvoyError::Store("$facet expects a document".to_string())
                    })?;
                    let mut fanned = Document::new();
                    for (branch, stages) in branches {
                        let stages: Vec<Document> = stages
                            .as_array()
                            .ok_or_else(|| {
                                ConvoyError::Store("$facet branch expects an array".to_string())
                            })?
                            .iter()
                            .map(|s| {
                                s.as_document().cloned().ok_or_else(|| {
                                    ConvoyError::Store(
                                        "$facet branch stage expects a document".to_string(),
                                    )
                                })
                            })
                            .collect::<Result<_>>()?;
                        // Every branch runs over the stage's full input set
                        let branch_docs = self.run_pipeline(working.clone(), &stages)?;
                        fanned.insert(
                            branch.to_string(),
                            Bson::Array(branch_docs.into_iter().map(Bson::Document).collect()),
                        );
                    }
                    working = vec![fanned];
                }
                other => {
                    return Err(ConvoyError::Store(format!(
                        "unsupported aggregation stage: {}",
                        other
                    )))
                }
            }
        }
        Ok(working)
    }

    fn apply_update(target: &mut Document, update: &Document) -> Result<u64> {
        for (op, spec) in update {
            let spec = spec.as_document().ok_or_else(|| {
                ConvoyError::Store(format!("update operator {} expects a document", op))
            })?;
            match op.as_str() {
                "$set" => {
                    for (k, v) in spec {
                        target.insert(k.to_string(), v.clone());
                    }
                }
                "$unset" => {
                    for (k, _) in spec {
                        target.remove(k);
                    }
                }
                "$inc" => {
                    for (k, v) in spec {
                        let current = target.get(k).and_then(bson_to_i64).unwrap_or(0);
                        let delta = bson_to_i64(v).ok_or_else(|| {
                            ConvoyError::Store("$inc expects a number".to_string())
                        })?;
                        target.insert(k.to_string(), Bson::Int64(current + delta));
                    }
                }
                other => {
                    return Err(ConvoyError::Store(format!(
                        "unsupported update operator: {}",
                        other
                    )))
                }
            }
        }
        Ok(1)
    }

    fn update_in_place(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        many: bool,
    ) -> Result<u64> {
        let mut entry = self.collections.entry(collection.to_string()).or_default();
        let mut modified = 0u64;
        for document in entry.iter_mut() {
            if matches_filter(document, filter) {
                modified += Self::apply_update(document, update)?;
                if !many {
                    break;
                }
            }
        }
        Ok(modified)
    }

    fn delete_in_place(&self, collection: &str, filter: &Document, many: bool) -> u64 {
        let mut entry = self.collections.entry(collection.to_string()).or_default();
        let before = entry.len();
        if many {
            entry.retain(|d| !matches_filter(d, filter));
        } else if let Some(pos) = entry.iter().position(|d| matches_filter(d, filter)) {
            entry.remove(pos);
        }
        (before - entry.len()) as u64
    }

    fn insert_docs(&self, collection: &str, documents: Vec<Document>) -> Vec<Bson> {
        let mut entry = self.collections.entry(collection.to_string()).or_default();
        let mut ids = Vec::with_capacity(documents.len());
        for mut document in documents {
            let id = document
                .get("_id")
                .cloned()
                .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));
            document.insert("_id", id.clone());
            entry.push(document);
            ids.push(id);
        }
        ids
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<Bson>> {
        self.record("insert");
        Ok(self.insert_docs(collection, documents))
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        many: bool,
    ) -> Result<u64> {
        self.record("update");
        self.update_in_place(collection, &filter, &update, many)
    }

    async fn delete(&self, collection: &str, filter: Document, many: bool) -> Result<u64> {
        self.record("delete");
        Ok(self.delete_in_place(collection, &filter, many))
    }

    async fn find(&self, collection: &str, filter: Document) -> Result<Vec<Document>> {
        self.record("find");
        Ok(self
            .documents(collection)
            .into_iter()
            .filter(|d| matches_filter(d, &filter))
            .collect())
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        self.record("aggregate");
        self.run_pipeline(self.documents(collection), &pipeline)
    }

    async fn count(&self, collection: &str, filter: Document) -> Result<u64> {
        self.record("count");
        Ok(self
            .documents(collection)
            .iter()
            .filter(|d| matches_filter(d, &filter))
            .count() as u64)
    }

    async fn bulk_write(&self, collection: &str, writes: Vec<WriteRequest>) -> Result<BulkSummary> {
        self.record("bulk_write");
        let mut summary = BulkSummary::default();
        for write in writes {
            match write {
                WriteRequest::InsertOne(document) => {
                    self.insert_docs(collection, vec![document]);
                    summary.inserted += 1;
                }
                WriteRequest::UpdateOne { filter, update } => {
                    summary.modified += self.update_in_place(collection, &filter, &update, false)?;
                }
                WriteRequest::UpdateMany { filter, update } => {
                    summary.modified += self.update_in_place(collection, &filter, &update, true)?;
                }
                WriteRequest::DeleteOne { filter } => {
                    summary.deleted += self.delete_in_place(collection, &filter, false);
                }
                WriteRequest::DeleteMany { filter } => {
                    summary.deleted += self.delete_in_place(collection, &filter, true);
                }
            }
        }
        Ok(summary)
    }
}

fn bson_to_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(*v as i64),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) => Some(*v as i64),
        _ => None,
    }
}

fn bson_to_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Equality with numeric coercion (`{ "n": 1 }` matches Int32, Int64 and
/// Double representations alike)
fn bson_eq(a: &Bson, b: &Bson) -> bool {
    match (bson_to_f64(a), bson_to_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn bson_cmp(a: &Bson, b: &Bson) -> Option<std::cmp::Ordering> {
    match (bson_to_f64(a), bson_to_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a, b) {
            (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

fn matches_condition(value: Option<&Bson>, condition: &Bson) -> bool {
    // A document whose keys all start with '$' is an operator expression
    if let Bson::Document(ops) = condition {
        if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) {
            return ops.iter().all(|(op, operand)| match op.as_str() {
                "$eq" => value.is_some_and(|v| bson_eq(v, operand)),
                "$ne" => !value.is_some_and(|v| bson_eq(v, operand)),
                "$gt" => value
                    .and_then(|v| bson_cmp(v, operand))
                    .is_some_and(|o| o == std::cmp::Ordering::Greater),
                "$gte" => value
                    .and_then(|v| bson_cmp(v, operand))
                    .is_some_and(|o| o != std::cmp::Ordering::Less),
                "$lt" => value
                    .and_then(|v| bson_cmp(v, operand))
                    .is_some_and(|o| o == std::cmp::Ordering::Less),
                "$lte" => value
                    .and_then(|v| bson_cmp(v, operand))
                    .is_some_and(|o| o != std::cmp::Ordering::Greater),
                "$in" => operand.as_array().is_some_and(|candidates| {
                    value.is_some_and(|v| candidates.iter().any(|c| bson_eq(v, c)))
                }),
                "$exists" => {
                    let wanted = matches!(operand, Bson::Boolean(true));
                    value.is_some() == wanted
                }
                _ => false,
            });
        }
    }
    value.is_some_and(|v| bson_eq(v, condition))
}

/// Minimal filter matcher: top-level equality plus the comparison
/// operators used throughout the scheduler
pub fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, condition)| match key.as_str() {
        "$and" => condition.as_array().is_some_and(|clauses| {
            clauses.iter().all(|c| {
                c.as_document()
                    .is_some_and(|f| matches_filter(document, f))
            })
        }),
        "$or" => condition.as_array().is_some_and(|clauses| {
            clauses.iter().any(|c| {
                c.as_document()
                    .is_some_and(|f| matches_filter(document, f))
            })
        }),
        _ => matches_condition(document.get(key), condition),
    })
}
