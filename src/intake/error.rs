use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}
