//! In-memory stand-ins for exercising the executors without PostgreSQL.

mod memory;

pub use memory::MemoryStore;
