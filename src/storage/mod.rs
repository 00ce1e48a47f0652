mod backend;

pub use backend::{FileStorage, MemStorage, StorageBackend, StorageError};
