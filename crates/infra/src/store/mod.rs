//! Ledger storage boundary.
//!
//! Defines the transactional abstraction the cancellation and correction
//! flows run against, without making storage assumptions, plus the Postgres
//! and in-memory backends.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryLedgerStore, InMemoryLedgerTx};
pub use postgres::{PgLedgerStore, PgLedgerTx};
pub use r#trait::{LedgerStore, LedgerTx, StoreError};
