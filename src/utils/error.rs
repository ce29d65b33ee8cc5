use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("transfer error: {0}")]
    Transfer(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Codec(err.to_string())
    }
}

impl From<crate::core::protocol::CodecError> for ChatError {
    fn from(err: crate::core::protocol::CodecError) -> Self {
        ChatError::Codec(err.to_string())
    }
}
