//! Storage allocation selection
//!
//! Callers control priority through list order: the first eligible
//! allocation wins.

use crate::error::{PublishError, Result};
use crate::types::StorageAllocation;

/// Return the first allocation with time left that the node marks usable
pub fn select_allocation(allocations: &[StorageAllocation]) -> Result<&StorageAllocation> {
    allocations
        .iter()
        .find(|a| a.is_eligible())
        .ok_or(PublishError::ResourceUnavailable {
            checked: allocations.len(),
        })
}
