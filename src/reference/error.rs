use std::io;

use thiserror::Error;

/// Failure to bring the reference server up.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
    #[error("TLS setup failed: {source}")]
    Tls {
        #[from]
        source: native_tls::Error,
    },
}
