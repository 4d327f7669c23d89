//! External collaborator: the verified header chain (SPEC_FULL.md §6.3).
//! Only the surface the core consumes is modeled here; checkpoint logic and
//! header validation themselves are out of scope.

use crate::error::Result;
use crate::types::Hash32;

pub trait HeaderChain: Send + Sync {
    fn best_height(&self) -> u32;
    fn best_header(&self) -> Result<(Hash32, u32)>;
}
