use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("model is not ready")]
    NotReady,

    #[error("Image decode failed: {0}")]
    Decode(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Invalid data format: {0}")]
    InvalidData(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Operator-visible error channel, distinct from status and payload.
pub type ErrorSender = tokio::sync::mpsc::UnboundedSender<NodeError>;
pub type ErrorReceiver = tokio::sync::mpsc::UnboundedReceiver<NodeError>;
