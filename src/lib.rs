//! Authoritative in-memory kit inventory ledger with append-only SQLite
//! journaling.
//!
//! Kits are tracked as aggregate counters (total / available / lost /
//! wornout) next to an immutable transaction log of issues and returns with
//! condition-based fines. Every mutation is captured as a single composite
//! op, so the counters and the log can never diverge across a crash.
//!
//! # Examples
//!
//! In-memory usage with [`engine::InventoryEngine`]:
//! ```
//! use kitlog::{engine::InventoryEngine, types::Condition};
//!
//! let mut engine = InventoryEngine::new();
//! let kit = engine.define_kit("Cricket Set", 3).expect("define");
//! assert_eq!(kit.available, 3);
//!
//! let txn = engine.issue("Alice", "Cricket Set").expect("issue");
//! assert_eq!(txn.fine, 0);
//!
//! let txn = engine.return_kit("Alice", "Cricket Set", Condition::Lost);
//! assert_eq!(txn.fine, 200);
//! assert_eq!(engine.get_kit("Cricket Set").expect("kit").lost, 1);
//! ```
//!
//! Runtime usage with SQLite sink and durable acks:
//! ```no_run
//! use kitlog::{
//!     engine::InventoryEngine,
//!     persist::sqlite::SqliteOpSink,
//!     runtime::handle::{spawn_kitlog, AckMode, RuntimeConfig},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = SqliteOpSink::open("kits.db").expect("open sqlite");
//! let engine = InventoryEngine::with_store(sink.load_store().expect("recover"));
//! let cfg = RuntimeConfig { ack_mode: AckMode::Durable, ..RuntimeConfig::default() };
//! let handle = spawn_kitlog(engine, Some(Box::new(sink)), cfg);
//! handle.define_kit("Cricket Set", 3).await.expect("define");
//! let txn = handle.issue("Alice", "Cricket Set").await.expect("issue");
//! assert_eq!(txn.fine, 0);
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```

/// Core in-memory store and index helpers.
pub mod core;
/// Inventory rules and fine policy.
pub mod engine;
/// Kit and transaction domain records.
pub mod ledger;
/// Mutation op model and persistence wrapper types.
pub mod op;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Shared primitive types and enums.
pub mod types;
