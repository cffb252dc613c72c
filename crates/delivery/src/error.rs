use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("delivery aborted")]
    Aborted,
}
