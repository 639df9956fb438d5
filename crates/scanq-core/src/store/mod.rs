pub mod local;

pub use local::LocalBlobStore;

use crate::error::Result;

/// Storage for submitted artifact content, keyed by job id.
///
/// Content is written at submission time and removed once the job reaches
/// a terminal state, so a restart can always re-read the bytes it still
/// needs.
pub trait BlobStore: Send {
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// `Ok(None)` when no blob exists under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Deleting a missing blob is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}
