use thiserror::Error;

#[derive(Debug, Error)]
pub enum TracklinkError {
    #[error("malformed issue key: {0}")]
    MalformedKey(String),

    #[error("malformed link: {0}")]
    MalformedLink(String),
}

pub type Result<T> = std::result::Result<T, TracklinkError>;
