//! Aggregation coalescing handler
//!
//! [`FacetHandler`] is the mechanism by which N independently written
//! "count how many sibling documents share this value" or "does this
//! referenced id exist" validators, run against the same model in the same
//! round, cost one round trip instead of N. A same-round batch is grouped
//! by model; each group becomes a single aggregation whose `$facet` stage
//! runs every fragment under a branch keyed by its position in the group,
//! and the combined result document is un-fanned back into per-branch
//! results in position order.

use crate::handler::SignalHandler;
use crate::signal::{SignalQuery, SignalResult};
use crate::store::Store;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use convoy_common::{ConvoyError, Result};
use std::sync::Arc;

/// Coalesces pipeline, count, and exists signals into per-model `$facet`
/// aggregations against a [`Store`]
pub struct FacetHandler {
    store: Arc<dyn Store>,
}

impl FacetHandler {
    /// Create a handler backed by the given store
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Lower one query to its branch pipeline fragment
    fn branch_stages(query: &SignalQuery) -> Vec<Document> {
        match query {
            SignalQuery::Pipeline { stages, .. } => stages.clone(),
            SignalQuery::Count { filter, .. } => vec![
                doc! { "$match": filter.clone() },
                doc! { "$count": "n" },
            ],
            SignalQuery::Exists { filter, .. } => vec![
                doc! { "$match": filter.clone() },
                doc! { "$limit": 1 },
                doc! { "$count": "n" },
            ],
        }
    }

    /// Convert one branch's document list back into the query's result
    /// shape
    fn unfan(query: &SignalQuery, branch: Vec<Bson>) -> SignalResult {
        match query {
            SignalQuery::Pipeline { .. } => Ok(Bson::Array(branch)),
            SignalQuery::Count { .. } => Ok(Bson::Int64(branch_count(&branch)?)),
            SignalQuery::Exists { .. } => Ok(Bson::Boolean(branch_count(&branch)? > 0)),
        }
    }

    /// Run one model group as a single `$facet` aggregation, writing each
    /// member's outcome into `outcomes` at its batch position
    async fn run_group(
        &self,
        model: &str,
        members: &[usize],
        batch: &[SignalQuery],
        outcomes: &mut [Option<SignalResult>],
    ) {
        let mut branches = Document::new();
        for (position, &index) in members.iter().enumerate() {
            let stages = Self::branch_stages(&batch[index]);
            branches.insert(
                position.to_string(),
                Bson::Array(stages.into_iter().map(Bson::Document).collect()),
            );
        }

        tracing::debug!(model, branches = members.len(), "coalescing into one $facet call");
        let outcome = self
            .store
            .aggregate(model, vec![doc! { "$facet": branches }])
            .await;

        match outcome {
            Ok(mut documents) => {
                let fanned = if documents.is_empty() {
                    Document::new()
                } else {
                    documents.remove(0)
                };
                for (position, &index) in members.iter().enumerate() {
                    let branch = fanned
                        .get_array(position.to_string())
                        .map(|a| a.to_vec())
                        .map_err(|_| {
                            ConvoyError::Internal(format!(
                                "missing $facet branch {} for {}",
                                position, model
                            ))
                        });
                    outcomes[index] = Some(match branch {
                        Ok(branch) => Self::unfan(&batch[index], branch),
                        Err(err) => Err(err),
                    });
                }
            }
            // Combined call failed: every member of the group gets the
            // same error, no partial success inference
            Err(err) => {
                for &index in members {
                    outcomes[index] = Some(Err(err.clone()));
                }
            }
        }
    }
}

fn branch_count(branch: &[Bson]) -> Result<i64> {
    match branch.first() {
        // `$count` emits no document at all for an empty match set
        None => Ok(0),
        Some(Bson::Document(d)) => match d.get("n") {
            Some(Bson::Int32(v)) => Ok(*v as i64),
            Some(Bson::Int64(v)) => Ok(*v),
            Some(Bson::Double(v)) => Ok(*v as i64),
            _ => Err(ConvoyError::Internal(
                "malformed $count branch result".to_string(),
            )),
        },
        Some(_) => Err(ConvoyError::Internal(
            "malformed $count branch result".to_string(),
        )),
    }
}

#[async_trait]
impl SignalHandler for FacetHandler {
    fn name(&self) -> &'static str {
        "facet"
    }

    fn can_handle(&self, query: &SignalQuery) -> bool {
        matches!(
            query,
            SignalQuery::Pipeline { .. } | SignalQuery::Count { .. } | SignalQuery::Exists { .. }
        )
    }

    async fn handle(&self, batch: &[SignalQuery]) -> Result<Vec<SignalResult>> {
        // Group batch positions by model, preserving first-appearance order
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        for (index, query) in batch.iter().enumerate() {
            match groups.iter_mut().find(|(model, _)| model == query.model()) {
                Some((_, members)) => members.push(index),
                None => groups.push((query.model().to_string(), vec![index])),
            }
        }

        let mut outcomes: Vec<Option<SignalResult>> = vec![None; batch.len()];
        for (model, members) in &groups {
            self.run_group(model, members, batch, &mut outcomes).await;
        }

        outcomes
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| {
                outcome.ok_or_else(|| {
                    ConvoyError::Internal(format!("no outcome produced for signal {}", index))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::signal::Signal;

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(
                "events",
                vec![
                    doc! { "kind": "a", "owner": 1 },
                    doc! { "kind": "a", "owner": 2 },
                    doc! { "kind": "b", "owner": 1 },
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_same_model_batch_costs_one_call() {
        let store = seeded_store().await;
        let handler = FacetHandler::new(store.clone());

        let batch = vec![
            SignalQuery::Count {
                model: "events".to_string(),
                filter: doc! { "kind": "a" },
            },
            SignalQuery::Count {
                model: "events".to_string(),
                filter: doc! { "kind": "b" },
            },
            SignalQuery::Count {
                model: "events".to_string(),
                filter: doc! { "kind": "c" },
            },
        ];

        let results = handler.handle(&batch).await.unwrap();

        assert_eq!(store.calls("aggregate"), 1);
        assert_eq!(results[0].clone().unwrap(), Bson::Int64(2));
        assert_eq!(results[1].clone().unwrap(), Bson::Int64(1));
        assert_eq!(results[2].clone().unwrap(), Bson::Int64(0));
    }

    #[tokio::test]
    async fn test_distinct_models_get_distinct_calls() {
        let store = seeded_store().await;
        store
            .insert("users", vec![doc! { "name": "ada" }])
            .await
            .unwrap();
        let handler = FacetHandler::new(store.clone());

        let batch = vec![
            SignalQuery::Count {
                model: "events".to_string(),
                filter: doc! {},
            },
            SignalQuery::Exists {
                model: "users".to_string(),
                filter: doc! { "name": "ada" },
            },
        ];

        let results = handler.handle(&batch).await.unwrap();
        // One aggregation call per model group
        assert_eq!(store.calls("aggregate"), 2);
        assert_eq!(results[0].clone().unwrap(), Bson::Int64(3));
        assert_eq!(results[1].clone().unwrap(), Bson::Boolean(true));
    }

    #[tokio::test]
    async fn test_exists_false_for_no_match() {
        let store = seeded_store().await;
        let handler = FacetHandler::new(store.clone());

        let batch = vec![SignalQuery::Exists {
            model: "events".to_string(),
            filter: doc! { "kind": "zzz" },
        }];

        let results = handler.handle(&batch).await.unwrap();
        assert_eq!(results[0].clone().unwrap(), Bson::Boolean(false));
    }

    #[tokio::test]
    async fn test_pipeline_fragment_returns_documents() {
        let store = seeded_store().await;
        let handler = FacetHandler::new(store.clone());

        let batch = vec![SignalQuery::Pipeline {
            model: "events".to_string(),
            stages: vec![doc! { "$match": { "owner": 1 } }],
        }];

        let results = handler.handle(&batch).await.unwrap();
        let docs = match results[0].clone().unwrap() {
            Bson::Array(docs) => docs,
            other => panic!("expected array, got {:?}", other),
        };
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn test_handles_every_signal_kind() {
        let store = seeded_store().await;
        let handler = FacetHandler::new(store);

        assert!(handler.can_handle(Signal::count("m", doc! {}).query()));
        assert!(handler.can_handle(Signal::exists("m", doc! {}).query()));
        assert!(handler.can_handle(Signal::pipeline("m", vec![]).query()));
    }
}
