use bridge_api::{PortError, UpstreamError};

/// Некорректная таблица соответствий каналов. Bridge не стартует.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("empty channel name in pair {0}")]
    EmptyName(usize),

    #[error("real channel '{0}' is mapped more than once")]
    DuplicateReal(String),

    #[error("virtual channel '{0}' is mapped more than once")]
    DuplicateVirtual(String),

    #[error("channel name '{0}' is reserved for wildcard requests")]
    ReservedName(String),

    #[error("real channel '{0}' has no virtual counterpart (odd number of names)")]
    UnmatchedPair(String),
}

/// Канал без соответствия в другом namespace'е. Обрабатывается
/// локально: канал выпадает из запроса/ответа, запрос продолжается.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unresolvable channel '{name}'")]
pub struct UnresolvableChannel {
    pub name: String,
}

/// Фатальное завершение цикла обслуживания.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("{0}")]
    Port(#[from] PortError),

    #[error("upstream connection lost: {0}")]
    UpstreamClosed(UpstreamError),
}
