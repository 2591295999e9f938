//! Annex-B to FLV - Publishes a raw H.264 file as an FLV byte stream
//!
//! Run with: cargo run --example annexb_to_flv -- <input.h264> [output.flv] [fps]
//!
//! This example demonstrates:
//! - Splitting an Annex-B elementary stream into access units
//! - Feeding them through `FlvPublisher` at a fixed frame rate
//! - Watching `PublishEvent`s and the session stats
//!
//! A raw stream can be produced with:
//! `ffmpeg -i input.mp4 -c:v libx264 -bf 0 -an -f h264 input.h264`
//!
//! Access units are split at every picture, so streams with several slices
//! per picture come out as several FLV tags per picture.

use std::path::PathBuf;
use std::time::Duration;

use httpflv_rs::media::annexb::split_units;
use httpflv_rs::{BufferInfo, FlvPublisher, PublishEvent, SessionConfig, TrackFormat};

/// Byte ranges of the access units in an Annex-B stream
fn access_units(data: &[u8]) -> Result<Vec<std::ops::Range<usize>>, Box<dyn std::error::Error>> {
    let units = split_units(data)?;

    let mut starts = Vec::new();
    let mut seen_picture = false;
    for unit in &units {
        let is_vcl = unit.nalu_type().map(|t| t.is_vcl()).unwrap_or(false);
        // A non-VCL unit after a picture, or a second picture, opens a new access unit
        if seen_picture {
            starts.push(unit.start_code_offset());
            seen_picture = false;
        } else if starts.is_empty() {
            starts.push(unit.start_code_offset());
        }
        if is_vcl {
            seen_picture = true;
        }
    }

    let mut ranges = Vec::with_capacity(starts.len());
    for (i, start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(data.len());
        ranges.push(*start..end);
    }
    Ok(ranges)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("httpflv_rs=info".parse()?)
                .add_directive("annexb_to_flv=info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let input = args
        .next()
        .map(PathBuf::from)
        .ok_or("usage: annexb_to_flv <input.h264> [output.flv] [fps]")?;
    let output = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| input.with_extension("flv"));
    let fps: u32 = match args.next() {
        Some(fps) => fps.parse()?,
        None => 25,
    };

    let data = tokio::fs::read(&input).await?;
    let ranges = access_units(&data)?;

    println!("Annex-B to FLV");
    println!("==============");
    println!("Input:        {} ({} bytes)", input.display(), data.len());
    println!("Output:       {}", output.display());
    println!("Access units: {}", ranges.len());
    println!("Frame rate:   {} fps", fps);
    println!();

    let (mut publisher, mut events) = FlvPublisher::new(SessionConfig::default());
    let track = publisher.register_track(TrackFormat::avc(0, 0))?;

    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PublishEvent::Failed(e) => eprintln!("Publish failed: {}", e),
                other => println!("Event: {:?}", other),
            }
        }
    });

    let file = tokio::fs::File::create(&output).await?;
    publisher.start(file)?;

    let frame_duration = Duration::from_secs(1) / fps.max(1);
    let mut ticker = tokio::time::interval(frame_duration);
    for (index, range) in ranges.into_iter().enumerate() {
        ticker.tick().await;

        let pts_us = (frame_duration * index as u32).as_micros() as i64;
        let au = &data[range];
        if let Err(e) = publisher.submit_frame(track, au, &BufferInfo::new(au.len(), pts_us)) {
            eprintln!("Frame {}: {}", index, e);
            if matches!(e, httpflv_rs::Error::Delivery(_)) {
                break;
            }
        }
    }

    // wait until every queued tag reached the file
    while publisher.is_running() {
        let stats = publisher.stats();
        if stats.tags_sent >= stats.sequence_headers + stats.nalu_tags {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    publisher.stop().await;

    let stats = publisher.stats();
    println!();
    println!("Access units: {}", stats.access_units);
    println!("Key frames:   {}", stats.keyframes);
    println!("Tags sent:    {}", stats.tags_sent);
    println!("Bytes sent:   {}", stats.bytes_sent);
    println!("Dropped:      {}", stats.dropped_frames);

    drop(publisher);
    event_task.await?;
    Ok(())
}
