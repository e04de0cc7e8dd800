/// Category of an upstream error. Lets the bridge decide whether a failure
/// stays contained in one request or takes the whole loop down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// I/O or network error on a single exchange: transient.
    Io,
    /// Upstream did not answer within the client's deadline.
    Timeout,
    /// Malformed reply from upstream.
    Format,
    /// Upstream answered with an explicit error.
    Remote,
    /// Connection to upstream is gone for good: fatal for the bridge.
    Closed,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Timeout => f.write_str("timeout"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Remote => f.write_str("remote"),
            ErrorKind::Closed => f.write_str("closed"),
        }
    }
}

/// Error returned by [`UpstreamClient::fetch`](crate::UpstreamClient::fetch).
///
/// Carries an `ErrorKind` for categorization and a human-readable message.
/// `From` impls assign the kind automatically so implementations can use `?`.
#[derive(Clone)]
pub struct UpstreamError {
    kind: ErrorKind,
    message: String,
}

impl UpstreamError {
    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Timeout, message: msg.into() }
    }

    pub fn format_err(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Remote, message: msg.into() }
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Closed, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Соединение с upstream потеряно: bridge должен остановиться.
    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Closed
    }
}

impl std::fmt::Debug for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for UpstreamError {}

impl From<std::io::Error> for UpstreamError {
    fn from(e: std::io::Error) -> Self { Self { kind: ErrorKind::Io, message: e.to_string() } }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(e: serde_json::Error) -> Self { Self { kind: ErrorKind::Format, message: e.to_string() } }
}

/// Ответ не удалось доставить потребителю. Ответ отбрасывается, повторов нет.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Потребитель отключился до готовности ответа.
    #[error("consumer disconnected")]
    Closed,

    /// Handle не соответствует ни одному ожидающему запросу
    /// (уже отвечен или никогда не выдавался этим port'ом).
    #[error("unknown request handle {0}")]
    UnknownHandle(u64),

    /// Очередь записи потребителя переполнена.
    #[error("consumer backlog full")]
    Backlog,

    #[error("delivery: {0}")]
    Other(String),
}

/// RequestPort больше не может выдавать запросы: фатально для bridge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("request port closed")]
    Closed,

    #[error("request port: {0}")]
    Io(String),
}

impl From<std::io::Error> for PortError {
    fn from(e: std::io::Error) -> Self {
        PortError::Io(e.to_string())
    }
}
