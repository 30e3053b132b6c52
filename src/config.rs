//! # Configuration
//!
//! Runtime settings for a [`Workspace`](crate::Workspace). Defaults match the
//! hosted service; every setting can be overridden through an environment
//! variable read by a small named-parameter handler.
use crate::error::RustyTableError;
use std::path::PathBuf;

/// Settings shared by every operation of a workspace.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Database file, `None` for an in-memory database
    pub database: Option<PathBuf>,
    /// Page size used when a caller does not ask for one
    pub page_size: usize,
    /// Per-table cap used by global search when a caller does not ask for one
    pub search_limit: usize,
    /// Largest spreadsheet file accepted for ingestion
    pub max_upload_bytes: u64,
    /// How many times an ingestion is replayed after losing a name race
    pub conflict_retries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: None,
            page_size: 50,
            search_limit: 1000,
            max_upload_bytes: 16 * 1024 * 1024,
            conflict_retries: 8,
        }
    }
}

impl Config {
    /// Builds a configuration from the process environment.
    pub fn from_env() -> Result<Self, RustyTableError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RustyTableError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        Ok(Config {
            database: DatabaseParam::read(&lookup)?.or(defaults.database),
            page_size: PageSizeParam::read(&lookup)?.unwrap_or(defaults.page_size),
            search_limit: SearchLimitParam::read(&lookup)?.unwrap_or(defaults.search_limit),
            max_upload_bytes: MaxUploadBytesParam::read(&lookup)?.unwrap_or(defaults.max_upload_bytes),
            conflict_retries: ConflictRetriesParam::read(&lookup)?.unwrap_or(defaults.conflict_retries),
        })
    }
}

/// Trait for settings read from named environment variables.
///
/// # Type Parameters
///
/// * `T` - The type of the setting value
pub trait EnvParam<T> {
    /// Returns the variable name
    fn name() -> &'static str;

    /// Parses the raw variable value
    fn parse(value: &str) -> Result<T, String>;

    /// Reads and parses the variable; unset or blank variables yield `None`.
    fn read<F>(lookup: &F) -> Result<Option<T>, RustyTableError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup(Self::name()) {
            Some(value) if !value.trim().is_empty() => Self::parse(value.trim())
                .map(Some)
                .map_err(|message| RustyTableError::InvalidParameter {
                    name: Self::name().to_owned(),
                    message,
                }),
            _ => Ok(None),
        }
    }
}

/// Database path parameter handler
struct DatabaseParam;

/// Default page size parameter handler
struct PageSizeParam;

/// Default search limit parameter handler
struct SearchLimitParam;

/// Upload size limit parameter handler
struct MaxUploadBytesParam;

/// Conflict retry parameter handler
struct ConflictRetriesParam;

fn parse_positive(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be greater than zero".to_owned()),
        Ok(number) => Ok(number),
        Err(_) => Err(format!("'{value}' is not a positive integer")),
    }
}

impl EnvParam<PathBuf> for DatabaseParam {
    fn name() -> &'static str {
        "RUSTY_TABLE_DATABASE"
    }

    fn parse(value: &str) -> Result<PathBuf, String> {
        Ok(PathBuf::from(value))
    }
}

impl EnvParam<usize> for PageSizeParam {
    fn name() -> &'static str {
        "RUSTY_TABLE_PAGE_SIZE"
    }

    fn parse(value: &str) -> Result<usize, String> {
        parse_positive(value)
    }
}

impl EnvParam<usize> for SearchLimitParam {
    fn name() -> &'static str {
        "RUSTY_TABLE_SEARCH_LIMIT"
    }

    fn parse(value: &str) -> Result<usize, String> {
        parse_positive(value)
    }
}

impl EnvParam<u64> for MaxUploadBytesParam {
    fn name() -> &'static str {
        "RUSTY_TABLE_MAX_UPLOAD_BYTES"
    }

    fn parse(value: &str) -> Result<u64, String> {
        value.parse().map_err(|_| format!("'{value}' is not a byte count"))
    }
}

impl EnvParam<usize> for ConflictRetriesParam {
    fn name() -> &'static str {
        "RUSTY_TABLE_CONFLICT_RETRIES"
    }

    fn parse(value: &str) -> Result<usize, String> {
        value.parse().map_err(|_| format!("'{value}' is not a retry count"))
    }
}
