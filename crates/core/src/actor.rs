//! Explicit actor identity for ledger operations.

use serde::{Deserialize, Serialize};

use crate::id::{StoreId, UserId};

/// Identity under which a ledger operation executes.
///
/// Operations take this explicitly instead of reading any ambient session
/// state, so call sites stay auditable and tests stay deterministic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    /// Store the acting terminal belongs to.
    pub store_id: StoreId,
    /// Operator performing the action.
    pub user_id: UserId,
}

impl ActorContext {
    pub fn new(store_id: StoreId, user_id: UserId) -> Self {
        Self { store_id, user_id }
    }
}
