//! `givegrid-store` - reads donor snapshots out of a SQLite record store.
//!
//! Applies the same upstream filter as the source views: only donors with at
//! least one donation, and only donations and tax units of those donors.

pub mod error;
pub mod sqlite;

pub use error::StoreError;
pub use sqlite::SqliteStore;
