//! Persistent session store: one contract, SQLite and PostgreSQL engines.

mod config;
mod encryption;
mod errors;
mod postgres;
mod schema_validation;
mod sqlite;
mod types;

pub use config::{DB_TABLE_SESSIONS, SharedSessionStore, StoreConfig, StoreKind, connect_store};
pub use errors::StoreError;
pub use postgres::PostgresSessionStore;
pub use sqlite::SqliteSessionStore;
pub use types::{SessionRecord, SessionStore};

pub(crate) use schema_validation::{validate_postgres_table_schema, validate_sqlite_table_schema};

#[cfg(test)]
pub(crate) mod store_tests;
