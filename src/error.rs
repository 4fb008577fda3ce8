use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Which catalog a lookup miss came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    OrgUnit,
    DataSet,
    DataElement,
    CategoryOptionCombo,
    Field,
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogKind::OrgUnit => write!(f, "Organisation Unit"),
            CatalogKind::DataSet => write!(f, "Data Set"),
            CatalogKind::DataElement => write!(f, "Data Element"),
            CatalogKind::CategoryOptionCombo => write!(f, "Category Option Combo"),
            CatalogKind::Field => write!(f, "field"),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum HmisError {
    #[error("missing config file hmis.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("request to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("server returned status {status} for {url}: {body}")]
    Transport {
        status: u16,
        url: String,
        body: String,
    },

    #[error("unexpected response payload from {url}: {message}")]
    Payload { url: String, message: String },

    #[error("no {kind} matching \"{key}\" found in DHIS2 instance \"{server_url}\"")]
    NotFound {
        kind: CatalogKind,
        key: String,
        server_url: String,
    },

    #[error("org unit handle from snapshot generation {handle} used with generation {current}")]
    StaleHandle { handle: u64, current: u64 },

    #[error("cache artifact {path} is unreadable: {message}")]
    CacheCorrupt { path: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl HmisError {
    pub fn not_found(kind: CatalogKind, key: impl Into<String>, server_url: &str) -> Self {
        HmisError::NotFound {
            kind,
            key: key.into(),
            server_url: server_url.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HmisError::NotFound { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            HmisError::Transport { .. } | HmisError::Connection { .. } | HmisError::Payload { .. }
        )
    }
}
