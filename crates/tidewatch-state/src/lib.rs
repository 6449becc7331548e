//! tidewatch-state — embedded state store for Tidewatch.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for monitored applications, monitored hosts, and the append-only
//! health-check log.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Health-check records live in a `u64`-keyed table (auto-increment id) with
//! two secondary index tables keyed `{target_id}:{checked_at}:{id}`, which
//! makes windowed and newest-first queries a single range scan.
//!
//! Counter updates and the record append for one evaluation are committed in
//! a single write transaction, so a check is either fully recorded or not at
//! all.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
