#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("bind {addr}: {source}")]
    Bind { addr: String, source: std::io::Error },

    #[error("connect to {addr}: {source}")]
    Connect { addr: String, source: std::io::Error },

    #[error("line too long: {len} bytes (max {max})")]
    LineTooLong { len: usize, max: usize },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
