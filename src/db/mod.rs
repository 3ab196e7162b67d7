//! Local persistence: a small SQLite key-value store.
//!
//! `repo` holds the SQL; callers import from `medicontent_qa::db`.

pub mod repo;

pub use repo::*;
