//! Minimal host audio-graph primitives.
//!
//! # Purpose
//! Processors are wired the same way in the live pipeline and in the offline
//! harness: a [`SourceNode`] reads an input [`Track`], the processor's stages
//! transform the samples, and a [`DestinationNode`] publishes them on an
//! output [`Track`].
//!
//! # Design Notes
//! - A track is an SPSC ring (`ringbuf` 0.2). The writer half is owned by
//!   exactly one stage; the reader half is a cloneable handle.
//! - Realtime contexts drop samples when a ring is full (counted, never
//!   blocking). Offline contexts size rings to hold a whole take.
//! - Dropping or closing the writer marks the track as ended.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};
use ringbuf::{Consumer, Producer, RingBuffer};

/// Smallest ring an offline context hands out.
const MIN_TRACK_CAPACITY: usize = 128;

/// Rendering context shared by every node of one graph.
///
/// Realtime contexts buffer one second per track; offline contexts hold a
/// whole take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioContext {
    sample_rate: u32,
    track_capacity: usize,
}

impl AudioContext {
    /// Realtime context with one second of buffering per track.
    pub fn realtime(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            track_capacity: sample_rate.max(1) as usize,
        }
    }

    /// Offline context whose tracks can hold `capacity` samples.
    pub fn offline(sample_rate: u32, capacity: usize) -> Self {
        Self {
            sample_rate,
            track_capacity: capacity.max(MIN_TRACK_CAPACITY),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn track(&self) -> (TrackWriter, Track) {
        track(self.track_capacity)
    }
}

// =============================================================================
// Tracks
// =============================================================================

struct TrackShared {
    consumer: Mutex<Consumer<f32>>,
    open: AtomicBool,
    dropped: AtomicU64,
}

/// Reader handle of a mono sample stream.
#[derive(Clone)]
pub struct Track {
    shared: Arc<TrackShared>,
}

/// Writer half of a track. Closing (or dropping) it ends the stream.
pub struct TrackWriter {
    producer: Producer<f32>,
    shared: Arc<TrackShared>,
}

/// Create a track holding at most `capacity` unread samples.
pub fn track(capacity: usize) -> (TrackWriter, Track) {
    let (producer, consumer) = RingBuffer::<f32>::new(capacity.max(1)).split();
    let shared = Arc::new(TrackShared {
        consumer: Mutex::new(consumer),
        open: AtomicBool::new(true),
        dropped: AtomicU64::new(0),
    });
    (
        TrackWriter {
            producer,
            shared: shared.clone(),
        },
        Track { shared },
    )
}

impl Track {
    fn consumer(&self) -> MutexGuard<'_, Consumer<f32>> {
        self.shared
            .consumer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Read up to `out.len()` samples. Returns the count read.
    pub fn read(&self, out: &mut [f32]) -> usize {
        self.consumer().pop_slice(out)
    }

    /// Everything currently buffered.
    pub fn drain(&self) -> Vec<f32> {
        let mut consumer = self.consumer();
        let mut out = vec![0.0; consumer.len()];
        let n = consumer.pop_slice(&mut out);
        out.truncate(n);
        out
    }

    pub fn available(&self) -> usize {
        self.consumer().len()
    }

    /// False once the writer has been closed or dropped.
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Samples lost because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn same_track(&self, other: &Track) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("available", &self.available())
            .field("open", &self.is_open())
            .finish()
    }
}

impl TrackWriter {
    /// Append samples. Returns how many fit; the rest are counted as dropped.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        if !self.shared.open.load(Ordering::Acquire) {
            return 0;
        }
        let n = self.producer.push_slice(samples);
        if n < samples.len() {
            let lost = (samples.len() - n) as u64;
            let before = self.shared.dropped.fetch_add(lost, Ordering::Relaxed);
            if before == 0 {
                warn!("track overflow, dropping {} samples", lost);
            }
        }
        n
    }

    pub fn remaining(&self) -> usize {
        self.producer.remaining()
    }

    /// Reader handle for this writer's track.
    pub fn track(&self) -> Track {
        Track {
            shared: self.shared.clone(),
        }
    }

    pub fn close(&mut self) {
        self.shared.open.store(false, Ordering::Release);
    }
}

impl Drop for TrackWriter {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// Graph entry: pulls from an input track while connected.
pub struct SourceNode {
    input: Option<Track>,
}

impl SourceNode {
    pub fn connect(input: Track) -> Self {
        Self { input: Some(input) }
    }

    pub fn is_connected(&self) -> bool {
        self.input.is_some()
    }

    /// Everything the input has buffered. Empty once disconnected.
    pub fn pull(&mut self) -> Vec<f32> {
        self.input.as_ref().map(Track::drain).unwrap_or_default()
    }

    /// True when the input has ended and nothing is left to read.
    pub fn is_exhausted(&self) -> bool {
        self.input
            .as_ref()
            .map_or(true, |t| !t.is_open() && t.available() == 0)
    }

    pub fn disconnect(&mut self) {
        if self.input.take().is_some() {
            debug!("source node disconnected");
        }
    }
}

/// Graph exit: publishes processed samples on its track.
pub struct DestinationNode {
    writer: Option<TrackWriter>,
    track: Track,
}

impl DestinationNode {
    pub fn new(writer: TrackWriter) -> Self {
        let track = writer.track();
        Self {
            writer: Some(writer),
            track,
        }
    }

    pub fn track(&self) -> Track {
        self.track.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    pub fn write(&mut self, samples: &[f32]) -> usize {
        match self.writer.as_mut() {
            Some(w) => w.write(samples),
            None => 0,
        }
    }

    /// Close the output. Readers still see buffered samples.
    pub fn disconnect(&mut self) {
        if let Some(mut w) = self.writer.take() {
            w.close();
            debug!("destination node disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_roundtrip_and_close() {
        let (mut w, t) = track(8);
        assert_eq!(w.write(&[1.0, 2.0, 3.0]), 3);
        assert_eq!(t.available(), 3);
        assert_eq!(t.drain(), vec![1.0, 2.0, 3.0]);
        assert!(t.is_open());
        drop(w);
        assert!(!t.is_open());
    }

    #[test]
    fn test_overflow_is_counted() {
        let (mut w, t) = track(4);
        assert_eq!(w.write(&[0.0; 6]), 4);
        assert_eq!(t.dropped(), 2);
    }

    #[test]
    fn test_source_and_destination_disconnect() {
        let (mut w, t) = track(16);
        w.write(&[0.5; 4]);
        let mut src = SourceNode::connect(t.clone());
        assert_eq!(src.pull().len(), 4);
        src.disconnect();
        w.write(&[0.5; 4]);
        assert!(src.pull().is_empty());
        assert!(src.is_exhausted());

        let (ow, _) = track(16);
        let mut dst = DestinationNode::new(ow);
        let out = dst.track();
        assert_eq!(dst.write(&[1.0; 3]), 3);
        dst.disconnect();
        dst.disconnect();
        assert_eq!(dst.write(&[1.0; 3]), 0);
        assert!(!out.is_open());
        assert_eq!(out.drain().len(), 3);
    }

    #[test]
    fn test_clones_share_one_stream() {
        let (mut w, t) = track(8);
        let t2 = t.clone();
        assert!(t.same_track(&t2));
        w.write(&[1.0, 2.0]);
        let mut buf = [0.0; 1];
        assert_eq!(t.read(&mut buf), 1);
        assert_eq!(t2.drain(), vec![2.0]);
    }
}
