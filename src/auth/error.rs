use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The LOGIN exchange received a prompt it does not know how to answer.
    #[error("unknown server response \"{label}\"")]
    UnknownPrompt { label: String },
    #[error("unexpected server challenge")]
    UnexpectedChallenge,
    #[error("unencrypted connection")]
    InsecureConnection,
}
