//! Persistent key/value stores for certificates and account keys
//!
//! Values are opaque JSON strings. Two implementations exist:
//!
//! - [`FileStore`] - one `<key>.json` file per entry, written atomically
//! - [`MemoryStore`] - process-local map, used when no cache directory is set
//!
//! # Directory Structure
//!
//! ```text
//! work_dir/
//! └── account-<name>.json      # ACME account credentials
//!
//! cache_dir/
//! └── <fingerprint>.json       # {certPem, keyPem, identifiers, validFrom, validTo}
//! ```

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::fmt;

use crate::errors::StorageError;

/// Key/value store for serialized entries
///
/// Implementations must never expose a partially written value: `fetch`
/// observes either the previous value or the new one.
pub trait Store: Send + Sync + fmt::Debug {
    /// Raw value stored under `key`
    fn fetch(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value
    fn store(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// All keys currently stored
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Remove `key`; removing a missing key is not an error
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Map a key onto a safe file stem
///
/// Anything outside `[A-Za-z0-9._-]` becomes `_`, and a leading dot is
/// replaced so keys never produce hidden files or path traversal.
pub(crate) fn sanitize_key(key: &str) -> String {
    let mut sanitized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() || sanitized.starts_with('.') {
        sanitized.insert(0, '_');
    }
    sanitized
}
