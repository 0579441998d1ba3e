use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("failed opening allowed senders file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed reading allowed senders: {source}")]
    Read {
        #[source]
        source: std::io::Error,
    },
}
