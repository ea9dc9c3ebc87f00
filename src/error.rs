use thiserror::Error;

/// A table did not have the shape a step expected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("table '{table}' has no column '{column}'")]
    MissingColumn { table: String, column: String },

    #[error("table '{table}' shares no merge key with the accumulated table")]
    NoSharedKeys { table: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sheet '{sheet}' not found in dataset '{dataset}'")]
    NotFound { dataset: String, sheet: String },

    #[error("storage backend: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("encoding sheet '{sheet}': {source}")]
    Encoding {
        sheet: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http {status} for {url}")]
    Http { status: u16, url: String },

    #[error("403 forbidden for {url} (anti-bot or network blocking)")]
    Blocked { url: String },

    #[error("gave up on {url} after {tries} rate-limited attempts")]
    Exhausted { url: String, tries: u32 },

    #[error("no table matching '{locator}' on page")]
    NoTable { locator: String },

    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid json from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("ensemble weights must sum to 1 (got {sum})")]
    InvalidWeights { sum: f64 },

    #[error("need at least {needed} rows with a known target, got {got}")]
    InsufficientRows { needed: usize, got: usize },

    #[error("matrix is empty")]
    Empty,
}
