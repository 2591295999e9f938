//! Publishing session
//!
//! [`FlvPublisher`] ties the muxer (producer side) to the network worker
//! (consumer side) through the delivery queue.

pub mod config;
pub mod publisher;

pub use config::SessionConfig;
pub use publisher::{FlvPublisher, PublishEvent};
