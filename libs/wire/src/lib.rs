pub mod error;
pub mod protocol;
mod port;
mod upstream;

pub use error::WireError;
pub use port::{TcpPortConfig, TcpRequestPort};
pub use protocol::{Action, WireRequest, WireResponse};
pub use upstream::{TcpUpstreamClient, TcpUpstreamConfig};
