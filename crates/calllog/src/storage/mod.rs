//! Call log storage
//!
//! The trait-based design allows swapping between in-memory and SQLite
//! storage implementations.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryRecordStore;
pub use sqlite::SqliteRecordStore;
pub use traits::RecordStore;
