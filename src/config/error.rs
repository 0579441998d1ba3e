use std::path::PathBuf;

use thiserror::Error;

use crate::admission::AdmissionError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot open config file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {source}")]
    Parse {
        #[from]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {key} {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error(transparent)]
    Admission(#[from] AdmissionError),
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}
