//! `fiscalchain-core` — foundation types for the fiscal ledger.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod actor;
pub mod error;
pub mod id;

pub use actor::ActorContext;
pub use error::{DomainError, DomainResult};
pub use id::{DocumentId, SchemeId, StoreId, UserId};
