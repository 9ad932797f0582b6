use thiserror::Error;

/// All errors produced by parley-core.
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("invalid frame duration {0} ms (expected 10, 20 or 30)")]
    InvalidFrameDuration(u32),

    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    #[error("malformed audio frame: {0}")]
    MalformedFrame(String),

    #[error("resampler error: {0}")]
    Resampler(String),

    #[error("capability error: {0}")]
    Capability(String),

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session has been stopped")]
    SessionClosed,

    #[error("session config is locked once the pipeline has started")]
    ConfigLocked,

    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ParleyError>;
