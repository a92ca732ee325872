//! Persistent storage backends.

pub mod sqlite;

#[cfg(test)]
mod sqlite_pbt;

pub use sqlite::SqliteBackend;
