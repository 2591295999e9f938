//! Network worker
//!
//! Owns the byte sink and drains the delivery queue into it, one FLV tag
//! envelope per message, strictly in queue order. A failed write ends the
//! worker and marks the queue failed; nothing is retried here.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};

use crate::error::DeliveryError;
use crate::media::flv::{encode_file_header, encode_tag_into};
use crate::session::config::SessionConfig;
use crate::session::publisher::PublishEvent;
use crate::stats::StatsCounters;

use super::queue::{DeliveryMessage, DeliveryQueue};

/// Consumer side of a publishing session
pub struct NetworkWorker<W> {
    sink: BufWriter<W>,
    queue: Arc<DeliveryQueue>,
    stats: Arc<StatsCounters>,
    events: mpsc::Sender<PublishEvent>,
    write_flv_header: bool,
    flush_each_tag: bool,
    scratch: BytesMut,
}

impl<W> NetworkWorker<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        sink: W,
        queue: Arc<DeliveryQueue>,
        stats: Arc<StatsCounters>,
        events: mpsc::Sender<PublishEvent>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            sink: BufWriter::with_capacity(config.write_buffer_size, sink),
            queue,
            stats,
            events,
            write_flv_header: config.write_flv_header,
            flush_each_tag: config.flush_each_tag,
            scratch: BytesMut::with_capacity(config.write_buffer_size),
        }
    }

    /// Drain the queue until `shutdown` fires, the queue closes, or a write
    /// fails. A healthy sink is shut down on the way out; a failed one is
    /// just dropped.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        tracing::info!("Network worker started");

        let result = match self.write_preamble().await {
            Ok(()) => self.drain(&mut shutdown).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.sink.shutdown().await {
                    tracing::warn!(error = %e, "Failed to close sink");
                }
            }
            Err(e) => self.on_write_error(e),
        }

        tracing::info!(
            tags_sent = self.stats.tags_sent(),
            bytes_sent = self.stats.bytes_sent(),
            "Network worker stopped"
        );
    }

    async fn drain(&mut self, shutdown: &mut oneshot::Receiver<()>) -> std::io::Result<()> {
        loop {
            let message = tokio::select! {
                biased;
                _ = &mut *shutdown => {
                    tracing::debug!("Network worker interrupted");
                    return Ok(());
                }
                message = self.queue.take() => message,
            };

            let Some(message) = message else {
                tracing::debug!("Delivery queue closed");
                return Ok(());
            };

            self.deliver(&message).await?;
        }
    }

    async fn write_preamble(&mut self) -> std::io::Result<()> {
        if !self.write_flv_header {
            return Ok(());
        }
        let header = encode_file_header(false, true);
        self.sink.write_all(&header).await?;
        self.sink.flush().await?;
        self.stats.record_sent(0, header.len());
        Ok(())
    }

    async fn deliver(&mut self, message: &DeliveryMessage) -> std::io::Result<()> {
        self.scratch.clear();
        encode_tag_into(&mut self.scratch, &message.tag);

        self.sink.write_all(&self.scratch).await?;
        if self.flush_each_tag {
            self.sink.flush().await?;
        }
        self.stats.record_sent(1, self.scratch.len());

        if message.frame_type.is_keyframe() {
            tracing::info!(
                track = %message.track_id,
                dts = message.dts,
                size = message.tag.size(),
                sequence_header = message.is_sequence_header(),
                "Sent key frame"
            );
        } else {
            tracing::debug!(
                track = %message.track_id,
                dts = message.dts,
                size = message.tag.size(),
                "Sent frame"
            );
        }
        Ok(())
    }

    fn on_write_error(&self, e: std::io::Error) {
        tracing::error!(error = %e, "Sink write failed, ending session");
        let err = DeliveryError::sink(&e);
        self.queue.fail(err.clone());
        if let Err(e) = self.events.try_send(PublishEvent::Failed(err)) {
            tracing::debug!(error = %e, "Dropped publish event");
        }
    }
}
