use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid listen address {0}: {1}")]
    InvalidAddress(String, std::net::AddrParseError),

    #[error("Cannot bind {0}: {1}")]
    Bind(String, std::io::Error),

    #[error("HTTP server error: {0}")]
    Serve(#[from] std::io::Error),
}
