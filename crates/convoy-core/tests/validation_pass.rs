//! End-to-end validation pass: several independently written validators,
//! one store round trip.

use bson::{doc, Bson};
use convoy_core::{
    ConvoyError, FacetHandler, MemoryStore, OpClient, Operation, OpOutput, Signal,
    SignalScheduler, Store,
};
use std::sync::Arc;

async fn library_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .insert(
            "books",
            vec![
                doc! { "isbn": "978-0", "author_id": 1, "shelf": "a" },
                doc! { "isbn": "978-1", "author_id": 1, "shelf": "a" },
                doc! { "isbn": "978-2", "author_id": 2, "shelf": "b" },
            ],
        )
        .await
        .unwrap();
    store
        .insert(
            "authors",
            vec![doc! { "_id": 1, "name": "ada" }, doc! { "_id": 2, "name": "alan" }],
        )
        .await
        .unwrap();
    store
}

/// Three validators written independently, each emitting its own query.
/// Running them in the same round costs exactly one aggregation.
#[tokio::test]
async fn test_validators_coalesce_into_one_store_call() {
    let store = library_store().await;
    let mut scheduler = SignalScheduler::new().with_handler(FacetHandler::new(store.clone()));

    // Uniqueness: no existing book carries the new isbn
    let unique = scheduler.spawn(|mut scope| async move {
        let taken = scope
            .emit(Signal::exists("books", doc! { "isbn": "978-9" }))
            .await??;
        Ok(Bson::Boolean(taken == Bson::Boolean(false)))
    });

    // Referential integrity: the author id must exist
    let author_known = scheduler.spawn(|mut scope| async move {
        let found = scope
            .emit(Signal::exists("authors", doc! { "_id": 1 }))
            .await??;
        Ok(found)
    });

    // Capacity: shelf "a" holds fewer than 5 books
    let shelf_has_room = scheduler.spawn(|mut scope| async move {
        let on_shelf = scope
            .emit(Signal::count("books", doc! { "shelf": "a" }))
            .await??;
        Ok(Bson::Boolean(on_shelf.as_i64().unwrap_or(i64::MAX) < 5))
    });

    scheduler.run().await.unwrap();

    // Two models in the batch: one $facet aggregation per model
    assert_eq!(store.calls("aggregate"), 2);
    assert_eq!(store.calls("count"), 0);
    assert_eq!(store.calls("find"), 0);

    assert_eq!(unique.peek().unwrap().unwrap(), Bson::Boolean(true));
    assert_eq!(author_known.peek().unwrap().unwrap(), Bson::Boolean(true));
    assert_eq!(shelf_has_room.peek().unwrap().unwrap(), Bson::Boolean(true));
}

/// A validator whose second query depends on its first spills into a
/// second round; unrelated validators still share the first round's call.
#[tokio::test]
async fn test_dependent_query_runs_next_round() {
    let store = library_store().await;
    let mut scheduler = SignalScheduler::new().with_handler(FacetHandler::new(store.clone()));

    let chained = scheduler.spawn(|mut scope| async move {
        let total = scope.emit(Signal::count("books", doc! {})).await??;
        if total != Bson::Int64(3) {
            return Err(ConvoyError::Handler(format!("bad total: {:?}", total)));
        }
        // Phrased only after the first answer arrives
        let same_author = scope
            .emit(Signal::count("books", doc! { "author_id": 1 }))
            .await??;
        Ok(same_author)
    });
    let flat = scheduler.spawn(|mut scope| async move {
        scope.emit(Signal::count("books", doc! { "shelf": "b" })).await?
    });

    scheduler.run().await.unwrap();

    // Round 1 coalesces both first queries; round 2 carries the chained
    // validator alone
    assert_eq!(store.calls("aggregate"), 2);
    assert_eq!(chained.peek().unwrap().unwrap(), Bson::Int64(2));
    assert_eq!(flat.peek().unwrap().unwrap(), Bson::Int64(1));
}

/// Full save flow: validate in one pass, then persist through the
/// operation client with a block summarizing the writes.
#[tokio::test]
async fn test_validate_then_persist() {
    let store = library_store().await;

    let mut scheduler = SignalScheduler::new().with_handler(FacetHandler::new(store.clone()));
    let verdict = scheduler.spawn(|mut scope| async move {
        let taken = scope
            .emit(Signal::exists("books", doc! { "isbn": "978-3" }))
            .await??;
        Ok(Bson::Boolean(taken == Bson::Boolean(false)))
    });
    scheduler.run().await.unwrap();
    assert_eq!(verdict.peek().unwrap().unwrap(), Bson::Boolean(true));

    let client = OpClient::with_store(store.clone());
    let inserted = client.submit(Operation::insert(
        "books",
        vec![doc! { "isbn": "978-3", "author_id": 2, "shelf": "b" }],
    ));
    let recorded = client.submit(Operation::block(vec![inserted], |outcomes| {
        match outcomes.into_iter().next().unwrap()? {
            OpOutput::Inserted(ids) => Ok(OpOutput::Count(ids.len() as u64)),
            other => Err(ConvoyError::Internal(format!(
                "unexpected insert output: {:?}",
                other
            ))),
        }
    }));
    client.run().await.unwrap();

    assert_eq!(recorded.peek().unwrap().unwrap(), OpOutput::Count(1));
    assert_eq!(store.documents("books").len(), 4);
}
