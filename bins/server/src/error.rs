#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("channel map: {0}")]
    Mapping(#[from] bridge_engine::ConfigError),

    #[error("no channels configured")]
    NoChannels,

    #[error("{0}")]
    Wire(#[from] bridge_wire::WireError),

    #[error("{0}")]
    Bridge(#[from] bridge_engine::BridgeError),
}
