//! Statistics for publishing sessions
//!
//! The producer and the network worker both bump [`StatsCounters`] without
//! taking a lock; [`SessionStats`] is the plain snapshot handed to callers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Session-level statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Access units passed to `submit_frame`
    pub access_units: u64,
    /// Access units containing an IDR slice
    pub keyframes: u64,
    /// Sequence header tags queued
    pub sequence_headers: u64,
    /// NALU tags queued
    pub nalu_tags: u64,
    /// Frames dropped before a sequence header went out
    pub dropped_frames: u64,
    /// Messages the queue refused
    pub rejected: u64,
    /// Messages evicted from a full queue
    pub evicted: u64,
    /// Buffers that failed Annex-B scanning
    pub malformed: u64,
    /// Tags written to the sink
    pub tags_sent: u64,
    /// Bytes written to the sink, FLV header included
    pub bytes_sent: u64,
    /// Time since the session started
    pub duration: Duration,
    /// Outgoing bitrate estimate (bits/sec)
    pub bitrate: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculate bitrate from bytes sent and duration
    pub fn calculate_bitrate(&mut self) {
        let secs = self.duration.as_secs();
        if secs > 0 {
            self.bitrate = (self.bytes_sent * 8) / secs;
        }
    }
}

/// Live counters shared by the producer and the network worker
#[derive(Debug, Default)]
pub struct StatsCounters {
    access_units: AtomicU64,
    keyframes: AtomicU64,
    sequence_headers: AtomicU64,
    nalu_tags: AtomicU64,
    dropped_frames: AtomicU64,
    rejected: AtomicU64,
    malformed: AtomicU64,
    tags_sent: AtomicU64,
    bytes_sent: AtomicU64,
    started_at: Mutex<Option<Instant>>,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every counter and start the session clock
    pub fn reset(&self) {
        for counter in [
            &self.access_units,
            &self.keyframes,
            &self.sequence_headers,
            &self.nalu_tags,
            &self.dropped_frames,
            &self.rejected,
            &self.malformed,
            &self.tags_sent,
            &self.bytes_sent,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.started_at.lock() = Some(Instant::now());
    }

    pub fn record_access_unit(&self, keyframe: bool) {
        self.access_units.fetch_add(1, Ordering::Relaxed);
        if keyframe {
            self.keyframes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_sequence_header(&self) {
        self.sequence_headers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_nalu_tag(&self) {
        self.nalu_tags.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self, count: u64) {
        self.rejected.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Account for bytes written to the sink
    pub fn record_sent(&self, tags: u64, bytes: usize) {
        self.tags_sent.fetch_add(tags, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn tags_sent(&self) -> u64 {
        self.tags_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Take a snapshot; `evicted` is owned by the queue and passed in
    pub fn snapshot(&self, evicted: u64) -> SessionStats {
        let started_at = *self.started_at.lock();
        let duration = started_at.map(|t| t.elapsed()).unwrap_or_default();

        let mut stats = SessionStats {
            access_units: self.access_units.load(Ordering::Relaxed),
            keyframes: self.keyframes.load(Ordering::Relaxed),
            sequence_headers: self.sequence_headers.load(Ordering::Relaxed),
            nalu_tags: self.nalu_tags.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            evicted,
            malformed: self.malformed.load(Ordering::Relaxed),
            tags_sent: self.tags_sent(),
            bytes_sent: self.bytes_sent(),
            duration,
            bitrate: 0,
        };
        stats.calculate_bitrate();
        stats
    }
}
