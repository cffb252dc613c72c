pub mod channel;
pub mod error;
pub mod service;
pub mod types;

pub use channel::{Channel, ChannelRegistry};
pub use error::DeliveryError;
pub use service::DeliveryService;
pub use types::{AbortSignal, DeliverOptions, DeliveryResult, OutboundPayload, Target};
