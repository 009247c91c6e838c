//! Store selection and the process-wide store cell.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use tokio::sync::OnceCell;

use super::{
    errors::StoreError, postgres::PostgresSessionStore, sqlite::SqliteSessionStore,
    types::SessionStore,
};
use crate::cipher::HexCipher;

/// Sessions table name
pub static DB_TABLE_SESSIONS: LazyLock<String> =
    LazyLock::new(|| env::var("SESSION_TABLE_NAME").unwrap_or_else(|_| "sessions".to_string()));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    Postgres,
}

impl FromStr for StoreKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(StoreError::UnsupportedStoreType(other.to_string())),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub url: String,
}

impl StoreConfig {
    pub fn new(kind: StoreKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
        }
    }
}

/// Opens the engine selected by `config`, creating and validating its table.
pub async fn connect_store(
    config: &StoreConfig,
    cipher: Option<Arc<dyn HexCipher>>,
) -> Result<Arc<dyn SessionStore>, StoreError> {
    tracing::info!(kind = %config.kind, "Connecting session store");
    let store: Arc<dyn SessionStore> = match config.kind {
        StoreKind::Sqlite => Arc::new(SqliteSessionStore::connect(&config.url, cipher).await?),
        StoreKind::Postgres => Arc::new(PostgresSessionStore::connect(&config.url, cipher).await?),
    };
    Ok(store)
}

/// Owns the single store connection of a process.
///
/// The first caller of [`SharedSessionStore::get_or_connect`] opens the pool;
/// concurrent and later callers receive the same handle.
#[derive(Default)]
pub struct SharedSessionStore {
    cell: OnceCell<Arc<dyn SessionStore>>,
}

impl SharedSessionStore {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn get_or_connect(
        &self,
        config: &StoreConfig,
        cipher: Option<Arc<dyn HexCipher>>,
    ) -> Result<Arc<dyn SessionStore>, StoreError> {
        self.cell
            .get_or_try_init(|| connect_store(config, cipher))
            .await
            .cloned()
    }

    /// Installs an already opened store. Returns `false` if one was set before.
    pub fn set(&self, store: Arc<dyn SessionStore>) -> bool {
        self.cell.set(store).is_ok()
    }

    pub fn get(&self) -> Option<Arc<dyn SessionStore>> {
        self.cell.get().cloned()
    }
}
