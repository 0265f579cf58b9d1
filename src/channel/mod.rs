pub mod protocol;
pub mod transport;

use thiserror::Error;

pub use protocol::{parse_message, ServerMessage};
pub use transport::{
    ChannelConnector, ChannelEvent, ChannelHandle, ChannelSink, WebSocketConnector, CLEAN_CLOSE,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Malformed server message: {0}")]
    Malformed(String),
}
