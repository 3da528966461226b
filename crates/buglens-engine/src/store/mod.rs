pub mod buffer;
pub mod kv;
pub mod persistent;

pub use buffer::BoundedLog;
pub use kv::{FileKvStore, KvStore, MemoryKvStore, StorageError};
pub use persistent::{PersistentLogStore, SharedPersistentStore};
