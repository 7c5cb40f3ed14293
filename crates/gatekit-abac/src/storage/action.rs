//! Action storage trait.

use async_trait::async_trait;

use crate::types::ActionResourceType;
use crate::AbacResult;

/// An action row as the PIP reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDetail {
    /// The action's pk.
    pub pk: i64,

    /// Resource types the action binds; empty for unconditional actions.
    pub resource_types: Vec<ActionResourceType>,
}

/// Storage operations for actions.
#[async_trait]
pub trait ActionStore: Send + Sync {
    /// Resolves `(system, action_id)` to the action's pk and bound resource
    /// types. Returns `None` for unknown actions.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get_action_detail(
        &self,
        system: &str,
        action_id: &str,
    ) -> AbacResult<Option<ActionDetail>>;
}
