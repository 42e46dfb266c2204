use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("state error: {0}")]
    State(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("crm error: {0}")]
    Crm(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
