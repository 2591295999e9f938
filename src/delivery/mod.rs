//! Ordered delivery of FLV tags to the byte sink

pub mod queue;
pub mod worker;

pub use queue::{DeliveryMessage, DeliveryQueue, MessageSink, OverflowPolicy};
pub use worker::NetworkWorker;
