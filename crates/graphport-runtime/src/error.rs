use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("reading artifact {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: graphport_core::Error,
    },

    #[error("artifact does not export `{symbol}` (entry point is `{available}`)")]
    UnknownSymbol { symbol: String, available: String },

    #[error("{backend} backend could not load `{symbol}`: {source}")]
    Backend {
        backend: &'static str,
        symbol: String,
        #[source]
        source: graphport_core::Error,
    },

    #[error("entry point `{0}` disagrees with the artifact metadata about its signature")]
    SignatureDisagreement(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("expected {expected} inputs, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    #[error("input {index} (`{name}`): {reason}")]
    SignatureMismatch {
        index: usize,
        name: String,
        reason: String,
    },

    #[error("execution fault (status {status}): {detail}")]
    ExecutionFault { status: i32, detail: String },

    #[error("run did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("session is closed")]
    Closed,
}
