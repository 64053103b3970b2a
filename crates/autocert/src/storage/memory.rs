//! In-memory store

use std::collections::HashMap;

use parking_lot::RwLock;

use super::Store;
use crate::errors::StorageError;

/// Process-local store; contents are lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Store for MemoryStore {
    fn fetch(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.store("b", "2").unwrap();
        store.store("a", "1").unwrap();
        store.store("a", "3").unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.fetch("a").unwrap().as_deref(), Some("3"));
        assert_eq!(store.keys().unwrap(), ["a".to_string(), "b".to_string()]);

        store.delete("a").unwrap();
        assert_eq!(store.fetch("a").unwrap(), None);
    }
}
