//! HTTP-FLV stream publisher
//!
//! High-level API for pushing an encoder's H.264 output to an FLV byte sink,
//! typically the request body of an HTTP-FLV ingest.
//!
//! ```text
//!   submit_frame() ──► FlvMuxer ──► DeliveryQueue ──► NetworkWorker ──► sink
//!   (encoder thread, never blocks)                    (tokio task)
//! ```

use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::delivery::queue::DeliveryQueue;
use crate::delivery::worker::NetworkWorker;
use crate::error::{DeliveryError, Error, MediaError, RejectReason, Result};
use crate::muxer::flv_muxer::{BufferInfo, FlvMuxer};
use crate::muxer::track::{TrackFormat, TrackId};
use crate::stats::{SessionStats, StatsCounters};

use super::config::SessionConfig;

/// Events from the FLV publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishEvent {
    /// Network worker running, tags are being delivered
    Started,

    /// The sink failed; the session delivers nothing more until restarted
    Failed(DeliveryError),

    /// Session stopped
    Stopped,
}

struct WorkerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// HTTP-FLV stream publisher
///
/// # Example
/// ```no_run
/// use httpflv_rs::{BufferInfo, FlvPublisher, SessionConfig, TrackFormat};
///
/// # async fn example(access_units: Vec<(Vec<u8>, i64)>) -> httpflv_rs::Result<()> {
/// let (mut publisher, mut events) = FlvPublisher::new(SessionConfig::default());
///
/// tokio::spawn(async move {
///     while let Some(event) = events.recv().await {
///         println!("Event: {:?}", event);
///     }
/// });
///
/// let track = publisher.register_track(TrackFormat::avc(1280, 720))?;
/// let file = tokio::fs::File::create("out.flv").await?;
/// publisher.start(file)?;
///
/// for (data, pts_us) in &access_units {
///     publisher.submit_frame(track, data, &BufferInfo::new(data.len(), *pts_us))?;
/// }
///
/// publisher.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct FlvPublisher {
    config: SessionConfig,
    muxer: FlvMuxer,
    queue: Arc<DeliveryQueue>,
    stats: Arc<StatsCounters>,
    event_tx: mpsc::Sender<PublishEvent>,
    worker: Option<WorkerHandle>,
}

impl FlvPublisher {
    /// Create a new publisher.
    ///
    /// Returns the publisher and a receiver for events.
    pub fn new(config: SessionConfig) -> (Self, mpsc::Receiver<PublishEvent>) {
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
        let queue = Arc::new(DeliveryQueue::new(config.queue_capacity, config.overflow_policy));

        let publisher = Self {
            config,
            muxer: FlvMuxer::new(),
            queue,
            stats: Arc::new(StatsCounters::new()),
            event_tx: tx,
            worker: None,
        };

        (publisher, rx)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register a track with the muxer.
    ///
    /// Registrations survive `stop`; only a single AVC track is supported.
    pub fn register_track(&mut self, format: TrackFormat) -> Result<TrackId> {
        self.muxer.register_track(format)
    }

    /// Start the network worker on the current tokio runtime.
    ///
    /// Frames submitted before this call are dropped. After a sink failure
    /// call [`stop`](Self::stop) before starting again.
    pub fn start<W>(&mut self, sink: W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if self.worker.is_some() {
            return Err(Error::AlreadyStarted);
        }
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        self.stats.reset();
        self.queue.open();

        let worker = NetworkWorker::new(
            sink,
            Arc::clone(&self.queue),
            Arc::clone(&self.stats),
            self.event_tx.clone(),
            &self.config,
        );
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        // Started goes out before the worker can report a failure
        self.emit(PublishEvent::Started);
        let task = runtime.spawn(worker.run(shutdown_rx));

        self.worker = Some(WorkerHandle {
            shutdown: shutdown_tx,
            task,
        });

        tracing::info!(
            queue_capacity = self.queue.capacity(),
            policy = ?self.config.overflow_policy,
            "Publishing session started"
        );
        Ok(())
    }

    /// Submit one encoded access unit.
    ///
    /// Never waits on the network. Bitstream and parameter-set errors concern
    /// this access unit only; frames the queue refuses are logged and counted
    /// but not reported. Once the sink has failed every call returns that
    /// failure.
    pub fn submit_frame(&mut self, track: TrackId, data: &[u8], info: &BufferInfo) -> Result<()> {
        if let Some(err) = self.queue.failure() {
            return Err(err.into());
        }

        let report = match self.muxer.write_video_sample(track, data, info, self.queue.as_ref()) {
            Ok(report) => report,
            Err(e) => {
                if let Error::Media(MediaError::MalformedBitstream { offset, remaining }) = &e {
                    self.stats.record_malformed();
                    tracing::warn!(track = %track, offset, remaining, "Skipping malformed access unit");
                }
                return Err(e);
            }
        };

        self.stats.record_access_unit(report.keyframe);
        if report.sequence_header_queued {
            self.stats.record_sequence_header();
        }
        if report.frame_queued {
            self.stats.record_nalu_tag();
        }
        if report.frame_dropped {
            self.stats.record_dropped();
        }
        if !report.rejected.is_empty() {
            self.stats.record_rejected(report.rejected.len() as u64);
            if report.rejected.contains(&RejectReason::SinkFailed) {
                if let Some(err) = self.queue.failure() {
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Stop the network worker and end the session.
    ///
    /// Waits up to the configured shutdown timeout for the worker, then aborts
    /// it. Pending tags are discarded and every track's SPS/PPS state is
    /// reset, so a restarted session sends a fresh sequence header.
    /// Errors are logged, never returned.
    pub async fn stop(&mut self) {
        let Some(WorkerHandle { shutdown, mut task }) = self.worker.take() else {
            tracing::debug!("Publishing session not running");
            return;
        };

        let _ = shutdown.send(());
        match tokio::time::timeout(self.config.shutdown_timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Network worker ended abnormally"),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    "Network worker did not stop in time, aborting"
                );
                task.abort();
            }
        }

        let discarded = self.queue.close();
        self.muxer.reset_tracks();

        let stats = self.stats();
        tracing::info!(
            discarded,
            access_units = stats.access_units,
            tags_sent = stats.tags_sent,
            bytes_sent = stats.bytes_sent,
            dropped = stats.dropped_frames,
            rejected = stats.rejected,
            "Publishing session stopped"
        );
        self.emit(PublishEvent::Stopped);
    }

    /// Whether the network worker is alive
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| !w.task.is_finished())
            .unwrap_or(false)
    }

    /// Snapshot of the session counters
    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot(self.queue.evicted())
    }

    fn emit(&self, event: PublishEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            tracing::debug!(error = %e, "Dropped publish event");
        }
    }
}

impl Drop for FlvPublisher {
    fn drop(&mut self) {
        // The worker shuts the sink down on its own once signalled
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::{Duration, Instant};

    use tokio::io::{AsyncReadExt, AsyncWrite};

    use super::*;
    use crate::media::flv::{encode_file_header, encode_tag, VideoFrameType};
    use crate::media::h264::AvcPacketType;
    use crate::muxer::packetizer::{mux_avc_to_flv_tag, mux_ibp_nalu, mux_sequence_header};

    const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9, 0x40];
    const PPS: &[u8] = &[0x68, 0xEB, 0xE3, 0xCB];
    const IDR: &[u8] = &[0x65, 0x88, 0x80, 0x10];
    const SLICE: &[u8] = &[0x41, 0x9A, 0x21, 0x6C];

    /// Accepts every write and fails on close
    struct FailingShutdown;

    impl AsyncWrite for FailingShutdown {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")))
        }
    }

    fn annexb(units: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in units {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(unit);
        }
        out
    }

    fn submit(publisher: &mut FlvPublisher, track: TrackId, units: &[&[u8]], pts_us: i64) -> Result<()> {
        let data = annexb(units);
        publisher.submit_frame(track, &data, &BufferInfo::new(data.len(), pts_us))
    }

    fn expected_stream(with_header: bool) -> Vec<u8> {
        let mut out = Vec::new();
        if with_header {
            out.extend_from_slice(&encode_file_header(false, true));
        }
        let seq = mux_avc_to_flv_tag(
            &mux_sequence_header(SPS, PPS).unwrap(),
            VideoFrameType::Keyframe,
            AvcPacketType::SequenceHeader,
            0,
            0,
        );
        let key = mux_avc_to_flv_tag(&mux_ibp_nalu(IDR), VideoFrameType::Keyframe, AvcPacketType::Nalu, 0, 0);
        let inter = mux_avc_to_flv_tag(&mux_ibp_nalu(SLICE), VideoFrameType::InterFrame, AvcPacketType::Nalu, 33, 33);
        for tag in [seq, key, inter] {
            out.extend_from_slice(&encode_tag(&tag));
        }
        out
    }

    #[tokio::test]
    async fn test_publish_to_sink() {
        let (mut publisher, mut events) = FlvPublisher::new(SessionConfig::default());
        let track = publisher.register_track(TrackFormat::avc(1920, 1080)).unwrap();

        let (client, mut server) = tokio::io::duplex(64 * 1024);
        publisher.start(client).unwrap();
        assert!(publisher.is_running());
        assert_eq!(events.recv().await, Some(PublishEvent::Started));

        submit(&mut publisher, track, &[SPS, PPS, IDR], 0).unwrap();
        submit(&mut publisher, track, &[SPS, PPS, SLICE], 33_333).unwrap();

        let expected = expected_stream(true);
        let mut received = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(1), server.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, expected);

        publisher.stop().await;
        assert!(!publisher.is_running());
        assert_eq!(events.recv().await, Some(PublishEvent::Stopped));

        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        let stats = publisher.stats();
        assert_eq!(stats.access_units, 2);
        assert_eq!(stats.keyframes, 1);
        assert_eq!(stats.sequence_headers, 1);
        assert_eq!(stats.nalu_tags, 2);
        assert_eq!(stats.tags_sent, 3);
        assert_eq!(stats.bytes_sent, expected.len() as u64);
    }

    #[tokio::test]
    async fn test_frames_before_start_are_dropped() {
        let config = SessionConfig::default().write_flv_header(false);
        let (mut publisher, _events) = FlvPublisher::new(config);
        let track = publisher.register_track(TrackFormat::avc(640, 360)).unwrap();

        // accepted by the call, refused by the closed queue
        submit(&mut publisher, track, &[SPS, PPS, IDR], 0).unwrap();
        let stats = publisher.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.dropped_frames, 1);
        assert_eq!(stats.sequence_headers, 0);

        let (client, mut server) = tokio::io::duplex(64 * 1024);
        publisher.start(client).unwrap();

        // the header is still due and goes out first
        submit(&mut publisher, track, &[IDR], 0).unwrap();
        submit(&mut publisher, track, &[SLICE], 33_000).unwrap();

        let expected = expected_stream(false);
        let mut received = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(1), server.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, expected);

        publisher.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice() {
        let (mut publisher, _events) = FlvPublisher::new(SessionConfig::default());
        publisher.start(tokio::io::sink()).unwrap();

        assert!(matches!(publisher.start(tokio::io::sink()), Err(Error::AlreadyStarted)));

        publisher.stop().await;
        publisher.start(tokio::io::sink()).unwrap();
        publisher.stop().await;
    }

    #[test]
    fn test_start_without_runtime() {
        let (mut publisher, _events) = FlvPublisher::new(SessionConfig::default());

        assert!(matches!(publisher.start(tokio::io::sink()), Err(Error::NoRuntime)));
        assert!(!publisher.is_running());
    }

    #[tokio::test]
    async fn test_stop_when_not_running() {
        let (mut publisher, mut events) = FlvPublisher::new(SessionConfig::default());
        publisher.stop().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sink_failure_is_sticky() {
        let (mut publisher, mut events) = FlvPublisher::new(SessionConfig::default());
        let track = publisher.register_track(TrackFormat::avc(640, 360)).unwrap();

        let sink = tokio_test::io::Builder::new()
            .write_error(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"))
            .build();
        publisher.start(sink).unwrap();

        assert_eq!(events.recv().await, Some(PublishEvent::Started));
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap();
        assert!(matches!(
            event,
            Some(PublishEvent::Failed(DeliveryError::SinkWriteFailure {
                kind: io::ErrorKind::ConnectionReset,
                ..
            }))
        ));

        let result = submit(&mut publisher, track, &[SPS, PPS, IDR], 0);
        assert!(matches!(
            result,
            Err(Error::Delivery(DeliveryError::SinkWriteFailure { .. }))
        ));

        publisher.stop().await;
    }

    #[tokio::test]
    async fn test_stop_aborts_stalled_worker() {
        let config = SessionConfig::default().shutdown_timeout(Duration::from_millis(200));
        let (mut publisher, mut events) = FlvPublisher::new(config);
        let track = publisher.register_track(TrackFormat::avc(1280, 720)).unwrap();

        // nobody reads the far end, so the worker blocks mid-write
        let (client, _server) = tokio::io::duplex(16);
        publisher.start(client).unwrap();
        assert_eq!(events.recv().await, Some(PublishEvent::Started));

        let mut idr = vec![0x5A; 4096];
        idr[0] = 0x65;
        submit(&mut publisher, track, &[SPS, PPS, &idr], 0).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(publisher.is_running());

        let started = Instant::now();
        publisher.stop().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!publisher.is_running());
        assert_eq!(events.recv().await, Some(PublishEvent::Stopped));
    }

    #[tokio::test]
    async fn test_sink_shutdown_error_is_not_fatal() {
        let (mut publisher, mut events) = FlvPublisher::new(SessionConfig::default());
        let track = publisher.register_track(TrackFormat::avc(640, 360)).unwrap();

        publisher.start(FailingShutdown).unwrap();
        submit(&mut publisher, track, &[SPS, PPS, IDR], 0).unwrap();

        publisher.stop().await;
        assert!(!publisher.is_running());
        assert_eq!(events.recv().await, Some(PublishEvent::Started));
        assert_eq!(events.recv().await, Some(PublishEvent::Stopped));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_event_channel_drops_events() {
        let config = SessionConfig::default().event_capacity(1);
        let (mut publisher, mut events) = FlvPublisher::new(config);

        publisher.start(tokio::io::sink()).unwrap();
        // Started fills the channel, Stopped has nowhere to go
        publisher.stop().await;
        assert!(!publisher.is_running());

        assert_eq!(events.recv().await, Some(PublishEvent::Started));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_session_usable() {
        let config = SessionConfig::default().write_flv_header(false);
        let (mut publisher, _events) = FlvPublisher::new(config);
        let track = publisher.register_track(TrackFormat::avc(640, 360)).unwrap();

        let (client, mut server) = tokio::io::duplex(64 * 1024);
        publisher.start(client).unwrap();

        let garbage = [0x12, 0x34, 0x56, 0x78];
        let result = publisher.submit_frame(track, &garbage, &BufferInfo::new(garbage.len(), 0));
        assert!(matches!(
            result,
            Err(Error::Media(MediaError::MalformedBitstream { offset: 0, remaining: 4 }))
        ));
        assert_eq!(publisher.stats().malformed, 1);

        submit(&mut publisher, track, &[SPS, PPS, IDR], 0).unwrap();
        submit(&mut publisher, track, &[SLICE], 33_000).unwrap();

        let expected = expected_stream(false);
        let mut received = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(1), server.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, expected);

        publisher.stop().await;
    }

    #[tokio::test]
    async fn test_restart_resends_sequence_header() {
        let config = SessionConfig::default().write_flv_header(false);
        let (mut publisher, _events) = FlvPublisher::new(config);
        let track = publisher.register_track(TrackFormat::avc(640, 360)).unwrap();

        let (client, _server) = tokio::io::duplex(64 * 1024);
        publisher.start(client).unwrap();
        submit(&mut publisher, track, &[SPS, PPS, IDR], 0).unwrap();
        publisher.stop().await;

        let (client, mut server) = tokio::io::duplex(64 * 1024);
        publisher.start(client).unwrap();
        submit(&mut publisher, track, &[SPS, PPS, IDR], 0).unwrap();
        submit(&mut publisher, track, &[SLICE], 33_000).unwrap();

        let expected = expected_stream(false);
        let mut received = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(1), server.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, expected);

        publisher.stop().await;
        assert_eq!(publisher.stats().sequence_headers, 1);
    }
}
