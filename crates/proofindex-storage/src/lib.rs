//! proofindex-storage — `StateStore` backends.
//!
//! Backends:
//! - [`memory`] — in-memory (tests, dry runs, no persistence)
//! - `postgres` — PostgreSQL via `sqlx` (feature `postgres`)

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStateStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStateStore;
