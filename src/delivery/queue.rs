//! Ordered producer/consumer queue between the muxer and the network worker
//!
//! The producer runs on the encoder callback and must never wait on the
//! network, so [`DeliveryQueue::offer`] is synchronous and only takes a short
//! lock. The single consumer awaits [`DeliveryQueue::take`].
//!
//! ```text
//!   encoder callback                         network worker task
//!   FlvMuxer ──offer()──► [ seq | nalu | nalu | ... ] ──take()──► sink
//! ```
//!
//! The queue is closed until the session starts, so nothing is accepted
//! before a consumer exists; once open it buffers until the worker drains it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{DeliveryError, RejectReason};
use crate::media::flv::{FlvTag, VideoFrameType};
use crate::muxer::track::TrackId;

/// One tag on its way to the sink
#[derive(Debug, Clone)]
pub struct DeliveryMessage {
    pub track_id: TrackId,
    /// Decode timestamp in milliseconds
    pub dts: u32,
    pub frame_type: VideoFrameType,
    pub tag: FlvTag,
}

impl DeliveryMessage {
    pub fn new(track_id: TrackId, frame_type: VideoFrameType, tag: FlvTag) -> Self {
        Self {
            track_id,
            dts: tag.timestamp,
            frame_type,
            tag,
        }
    }

    pub fn is_sequence_header(&self) -> bool {
        self.tag.is_avc_sequence_header()
    }
}

/// Anything the muxer can hand finished tags to
pub trait MessageSink {
    /// Accept a message without blocking
    fn offer(&self, message: DeliveryMessage) -> Result<(), RejectReason>;
}

/// What to give up when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Reject the incoming NALU tag
    #[default]
    DropNewest,
    /// Evict the oldest queued NALU tag
    DropOldest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Closed(RejectReason),
    Open,
    Failed(DeliveryError),
}

#[derive(Debug)]
struct QueueState {
    messages: VecDeque<DeliveryMessage>,
    phase: Phase,
}

/// Bounded FIFO of [`DeliveryMessage`]s
#[derive(Debug)]
pub struct DeliveryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
    evicted: AtomicU64,
}

impl DeliveryQueue {
    /// Create a closed queue
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState {
                messages: VecDeque::with_capacity(capacity.min(1024)),
                phase: Phase::Closed(RejectReason::NotStarted),
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
            policy,
            evicted: AtomicU64::new(0),
        }
    }

    /// Start accepting messages, clearing any earlier failure
    pub fn open(&self) {
        let mut state = self.state.lock();
        state.messages.clear();
        state.phase = Phase::Open;
        self.evicted.store(0, Ordering::Relaxed);
    }

    /// Stop accepting messages and discard anything pending.
    ///
    /// Returns the number of discarded messages.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            if state.phase == Phase::Open {
                state.phase = Phase::Closed(RejectReason::Stopped);
            }
            let n = state.messages.len();
            state.messages.clear();
            n
        };
        self.notify.notify_one();
        discarded
    }

    /// Record a sink failure; the queue stays closed until reopened
    pub fn fail(&self, error: DeliveryError) {
        {
            let mut state = self.state.lock();
            state.phase = Phase::Failed(error);
            state.messages.clear();
        }
        self.notify.notify_one();
    }

    /// The sink failure that ended the session, if any
    pub fn failure(&self) -> Option<DeliveryError> {
        match &self.state.lock().phase {
            Phase::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().phase == Phase::Open
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// NALU tags evicted to make room so far
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Wait for the next message in FIFO order.
    ///
    /// Returns `None` once the queue is closed or failed.
    pub async fn take(&self) -> Option<DeliveryMessage> {
        loop {
            {
                let mut state = self.state.lock();
                if state.phase != Phase::Open {
                    return None;
                }
                if let Some(message) = state.messages.pop_front() {
                    return Some(message);
                }
            }
            self.notify.notified().await;
        }
    }

    fn push(&self, message: DeliveryMessage) -> Result<(), RejectReason> {
        let mut state = self.state.lock();
        match &state.phase {
            Phase::Open => {}
            Phase::Closed(reason) => return Err(*reason),
            Phase::Failed(_) => return Err(RejectReason::SinkFailed),
        }

        if state.messages.len() >= self.capacity {
            let evict = message.is_sequence_header() || self.policy == OverflowPolicy::DropOldest;
            if !evict {
                return Err(RejectReason::Full);
            }

            let oldest_frame = state.messages.iter().position(|m| !m.is_sequence_header());
            match oldest_frame {
                Some(index) => {
                    if let Some(old) = state.messages.remove(index) {
                        self.evicted.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            track = %old.track_id,
                            dts = old.dts,
                            size = old.tag.size(),
                            "Queue full, evicted oldest frame"
                        );
                    }
                }
                // Only sequence headers queued: a header still gets in
                None if message.is_sequence_header() => {}
                None => return Err(RejectReason::Full),
            }
        }

        state.messages.push_back(message);
        Ok(())
    }
}

impl MessageSink for DeliveryQueue {
    fn offer(&self, message: DeliveryMessage) -> Result<(), RejectReason> {
        self.push(message)?;
        self.notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;

    fn header(dts: u32) -> DeliveryMessage {
        let tag = FlvTag::video(dts, Bytes::from_static(&[0x17, 0x00, 0x00, 0x00, 0x00]));
        DeliveryMessage::new(TrackId(1), VideoFrameType::Keyframe, tag)
    }

    fn frame(dts: u32) -> DeliveryMessage {
        let tag = FlvTag::video(dts, Bytes::from_static(&[0x27, 0x01, 0x00, 0x00, 0x00]));
        DeliveryMessage::new(TrackId(1), VideoFrameType::InterFrame, tag)
    }

    fn drain(queue: &DeliveryQueue) -> Vec<u32> {
        let mut state = queue.state.lock();
        state.messages.drain(..).map(|m| m.dts).collect()
    }

    #[test]
    fn test_rejects_before_open() {
        let queue = DeliveryQueue::new(4, OverflowPolicy::DropNewest);
        assert_eq!(queue.offer(header(0)), Err(RejectReason::NotStarted));
        assert!(queue.is_empty());

        queue.open();
        assert!(queue.offer(header(0)).is_ok());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_rejects_after_close() {
        let queue = DeliveryQueue::new(4, OverflowPolicy::DropNewest);
        queue.open();
        queue.offer(frame(0)).unwrap();
        queue.offer(frame(33)).unwrap();

        assert_eq!(queue.close(), 2);
        assert_eq!(queue.offer(frame(66)), Err(RejectReason::Stopped));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drop_newest_when_full() {
        let queue = DeliveryQueue::new(2, OverflowPolicy::DropNewest);
        queue.open();
        queue.offer(frame(0)).unwrap();
        queue.offer(frame(33)).unwrap();

        assert_eq!(queue.offer(frame(66)), Err(RejectReason::Full));
        assert_eq!(drain(&queue), vec![0, 33]);
        assert_eq!(queue.evicted(), 0);
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let queue = DeliveryQueue::new(3, OverflowPolicy::DropOldest);
        queue.open();
        queue.offer(header(0)).unwrap();
        queue.offer(frame(0)).unwrap();
        queue.offer(frame(33)).unwrap();

        queue.offer(frame(66)).unwrap();
        // the header survives, the oldest frame goes
        assert_eq!(drain(&queue), vec![0, 33, 66]);
        assert_eq!(queue.evicted(), 1);
    }

    #[test]
    fn test_sequence_header_never_dropped() {
        let queue = DeliveryQueue::new(2, OverflowPolicy::DropNewest);
        queue.open();
        queue.offer(frame(0)).unwrap();
        queue.offer(frame(33)).unwrap();

        queue.offer(header(66)).unwrap();
        let kept: Vec<bool> = queue
            .state
            .lock()
            .messages
            .iter()
            .map(|m| m.is_sequence_header())
            .collect();
        assert_eq!(kept, vec![false, true]);

        // Headers only: still admitted past capacity
        let queue = DeliveryQueue::new(1, OverflowPolicy::DropNewest);
        queue.open();
        queue.offer(header(0)).unwrap();
        queue.offer(header(33)).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.offer(frame(33)), Err(RejectReason::Full));
    }

    #[test]
    fn test_fail_rejects_and_reports() {
        let queue = DeliveryQueue::new(4, OverflowPolicy::DropNewest);
        queue.open();
        queue.offer(frame(0)).unwrap();

        let err = DeliveryError::SinkWriteFailure {
            kind: std::io::ErrorKind::BrokenPipe,
            message: "broken pipe".into(),
        };
        queue.fail(err.clone());

        assert_eq!(queue.failure(), Some(err));
        assert_eq!(queue.offer(frame(33)), Err(RejectReason::SinkFailed));
        assert!(queue.is_empty());

        // reopening clears the failure
        queue.open();
        assert!(queue.failure().is_none());
    }

    #[tokio::test]
    async fn test_take_in_fifo_order() {
        let queue = DeliveryQueue::new(8, OverflowPolicy::DropNewest);
        queue.open();
        queue.offer(header(0)).unwrap();
        queue.offer(frame(0)).unwrap();
        queue.offer(frame(33)).unwrap();

        assert!(queue.take().await.unwrap().is_sequence_header());
        assert_eq!(queue.take().await.unwrap().dts, 0);
        assert_eq!(queue.take().await.unwrap().dts, 33);
    }

    #[tokio::test]
    async fn test_take_wakes_on_offer_and_close() {
        let queue = Arc::new(DeliveryQueue::new(8, OverflowPolicy::DropNewest));
        queue.open();

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(message) = queue.take().await {
                    seen.push(message.dts);
                }
                seen
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.offer(frame(0)).unwrap();
        queue.offer(frame(33)).unwrap();

        // wait until the consumer has drained both
        while !queue.is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let seen = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, vec![0, 33]);
    }
}
