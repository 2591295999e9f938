//! httpflv-rs: Annex-B H.264 to FLV publishing
//!
//! This library turns the raw output of an H.264 encoder into an ordered FLV
//! byte stream for an HTTP-FLV ingest server:
//! - Annex-B start-code scanning and NAL classification
//! - SPS/PPS change tracking and AVCDecoderConfigurationRecord generation
//! - FLV VIDEODATA tags with signed composition time
//! - A non-blocking producer queue drained by a network worker task
//!
//! # Example
//!
//! ```no_run
//! use httpflv_rs::{BufferInfo, FlvPublisher, SessionConfig, TrackFormat};
//!
//! # async fn example(encoded: Vec<u8>) -> httpflv_rs::Result<()> {
//! let (mut publisher, _events) = FlvPublisher::new(SessionConfig::default());
//! let track = publisher.register_track(TrackFormat::avc(1280, 720))?;
//!
//! let sink = tokio::net::TcpStream::connect("127.0.0.1:8936").await?;
//! publisher.start(sink)?;
//!
//! // From the encoder callback
//! let info = BufferInfo::new(encoded.len(), 0);
//! publisher.submit_frame(track, &encoded, &info)?;
//!
//! publisher.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod delivery;
pub mod error;
pub mod media;
pub mod muxer;
pub mod session;
pub mod stats;

// Re-export main types for convenience
pub use error::{DeliveryError, Error, MediaError, RejectReason, Result};
pub use muxer::flv_muxer::{BufferInfo, FlvMuxer, RawFrameBuffer};
pub use muxer::track::{TrackCodec, TrackFormat, TrackId};
pub use session::config::SessionConfig;
pub use session::publisher::{FlvPublisher, PublishEvent};
pub use stats::SessionStats;
