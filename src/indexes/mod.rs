mod extendible_hash;

/// Opaque handle for the transaction running an index operation.
#[derive(Debug, Default)]
pub struct Transaction {
    id: u64,
}

impl Transaction {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

pub use extendible_hash::{ExtendibleHashTable, HashTableError, KeyHasher, XxHasher};
