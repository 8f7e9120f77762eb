//! Demonstrates query coalescing across independently written validators.
//!
//! Five validators each check one rule about a pending order. Written
//! naively, saving the order would cost five store round trips; run
//! through the scheduler they cost one `$facet` aggregation per model.
//!
//! Run with: cargo run --example coalesced_validators

use bson::{doc, Bson};
use convoy_core::{FacetHandler, MemoryStore, Signal, SignalScheduler, Store};
use std::sync::Arc;

#[tokio::main]
async fn main() -> convoy_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("convoy_core=debug")
        .init();

    let store = Arc::new(MemoryStore::new());
    store
        .insert(
            "orders",
            vec![
                doc! { "customer": 7, "status": "open", "total": 120 },
                doc! { "customer": 7, "status": "shipped", "total": 80 },
                doc! { "customer": 9, "status": "open", "total": 40 },
            ],
        )
        .await?;
    store
        .insert("customers", vec![doc! { "_id": 7, "name": "ada" }])
        .await?;

    let mut scheduler = SignalScheduler::new().with_handler(FacetHandler::new(store.clone()));

    let customer_exists = scheduler.spawn(|mut scope| async move {
        scope.emit(Signal::exists("customers", doc! { "_id": 7 })).await?
    });
    let open_orders = scheduler.spawn(|mut scope| async move {
        let open = scope
            .emit(Signal::count("orders", doc! { "customer": 7, "status": "open" }))
            .await??;
        Ok(Bson::Boolean(open.as_i64().unwrap_or(i64::MAX) < 3))
    });
    let no_duplicates = scheduler.spawn(|mut scope| async move {
        let dup = scope
            .emit(Signal::exists(
                "orders",
                doc! { "customer": 7, "status": "draft" },
            ))
            .await??;
        Ok(Bson::Boolean(dup == Bson::Boolean(false)))
    });
    let big_spender = scheduler.spawn(|mut scope| async move {
        let large = scope
            .emit(Signal::count(
                "orders",
                doc! { "customer": 7, "total": { "$gte": 100 } },
            ))
            .await??;
        Ok(Bson::Boolean(large.as_i64().unwrap_or(0) > 0))
    });
    let customer_not_banned = scheduler.spawn(|mut scope| async move {
        let banned = scope
            .emit(Signal::exists("customers", doc! { "_id": 7, "banned": true }))
            .await??;
        Ok(Bson::Boolean(banned == Bson::Boolean(false)))
    });

    scheduler.run().await?;

    println!("store aggregate calls: {}", store.calls("aggregate"));
    println!("customer exists:     {:?}", customer_exists.peek());
    println!("open orders ok:      {:?}", open_orders.peek());
    println!("no duplicate drafts: {:?}", no_duplicates.peek());
    println!("big spender:         {:?}", big_spender.peek());
    println!("not banned:          {:?}", customer_not_banned.peek());
    Ok(())
}
