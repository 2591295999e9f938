//! Session configuration

use std::time::Duration;

use crate::delivery::queue::OverflowPolicy;

/// Publishing session options
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delivery queue capacity in messages (minimum 1)
    pub queue_capacity: usize,

    /// What a full queue gives up
    pub overflow_policy: OverflowPolicy,

    /// How long `stop` waits for the network worker before aborting it
    pub shutdown_timeout: Duration,

    /// Write the FLV file header before the first tag
    pub write_flv_header: bool,

    /// Flush the sink after every tag (lowest latency)
    pub flush_each_tag: bool,

    /// Application-level write buffer size
    pub write_buffer_size: usize,

    /// Capacity of the publish event channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 512,
            overflow_policy: OverflowPolicy::DropNewest,
            shutdown_timeout: Duration::from_secs(5),
            write_flv_header: true,
            flush_each_tag: true, // Important for low latency
            write_buffer_size: 64 * 1024, // 64KB
            event_capacity: 64,
        }
    }
}

impl SessionConfig {
    /// Set the delivery queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the overflow policy
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Set the worker shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Enable or disable the FLV file header
    pub fn write_flv_header(mut self, enabled: bool) -> Self {
        self.write_flv_header = enabled;
        self
    }

    /// Enable or disable flushing after every tag
    pub fn flush_each_tag(mut self, enabled: bool) -> Self {
        self.flush_each_tag = enabled;
        self
    }

    /// Set the write buffer size
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size.max(1);
        self
    }

    /// Set the event channel capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
