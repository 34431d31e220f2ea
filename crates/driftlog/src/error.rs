use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupted log data: {0}")]
    Corruption(String),

    #[error("no record at index {0}")]
    NotFound(u64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Error returned by operations attempted after `close` or `delete`.
    pub(crate) fn closed() -> Self {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "log is closed",
        ))
    }
}
