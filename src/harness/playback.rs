//! Harness playback: single buffers and A/B sequences.
//!
//! # Design Notes
//! - Playback timing runs on a tokio task; the device only starts and stops.
//! - Every `play*` and `stop` bumps a generation counter. A task only touches
//!   the device or emits [`PlayerEvent::Ended`] while holding the state lock
//!   and only if its generation is still current, so nothing fires after
//!   `stop` returns.
//! - All entry points must be called from within a tokio runtime.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::buffer::AudioBuffer;
use crate::error::PipelineResult;

/// Silence between A and B in an A/B sequence.
pub const DEFAULT_AB_GAP: Duration = Duration::from_millis(400);

pub trait PlaybackDevice: Send + Sync {
    /// Start playing `buffer` immediately.
    fn start(&self, buffer: &AudioBuffer) -> PipelineResult<Box<dyn PlaybackHandle>>;
}

pub trait PlaybackHandle: Send {
    /// Stop output and release the device. Synchronous.
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// The sequence started with `generation` played to the end.
    Ended { generation: u64 },
}

#[derive(Default)]
struct PlayerState {
    generation: u64,
    handle: Option<Box<dyn PlaybackHandle>>,
    task: Option<JoinHandle<()>>,
}

impl PlayerState {
    fn stop_device(&mut self) {
        if let Some(mut h) = self.handle.take() {
            h.stop();
        }
    }
}

pub struct Player {
    device: Arc<dyn PlaybackDevice>,
    state: Arc<Mutex<PlayerState>>,
    events: UnboundedSender<PlayerEvent>,
    gap: Duration,
}

fn lock(state: &Mutex<PlayerState>) -> MutexGuard<'_, PlayerState> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

fn duration_of(buffer: &AudioBuffer) -> Duration {
    Duration::from_secs_f64(buffer.duration_secs())
}

impl Player {
    pub fn new(device: Arc<dyn PlaybackDevice>) -> (Self, UnboundedReceiver<PlayerEvent>) {
        Self::with_gap(device, DEFAULT_AB_GAP)
    }

    pub fn with_gap(
        device: Arc<dyn PlaybackDevice>,
        gap: Duration,
    ) -> (Self, UnboundedReceiver<PlayerEvent>) {
        let (events, rx) = unbounded_channel();
        (
            Self {
                device,
                state: Arc::new(Mutex::new(PlayerState::default())),
                events,
                gap,
            },
            rx,
        )
    }

    pub fn is_playing(&self) -> bool {
        let st = lock(&self.state);
        st.task.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Stop whatever is playing. No `Ended` event follows.
    pub fn stop(&self) {
        let mut st = lock(&self.state);
        st.generation += 1;
        if let Some(task) = st.task.take() {
            task.abort();
        }
        st.stop_device();
    }

    /// Play one buffer. Returns the generation reported by its `Ended` event.
    pub fn play(&self, buffer: AudioBuffer) -> PipelineResult<u64> {
        let mut st = lock(&self.state);
        st.generation += 1;
        if let Some(task) = st.task.take() {
            task.abort();
        }
        st.stop_device();

        let generation = st.generation;
        st.handle = Some(self.device.start(&buffer)?);
        let state = self.state.clone();
        let events = self.events.clone();
        let length = duration_of(&buffer);
        st.task = Some(tokio::spawn(async move {
            tokio::time::sleep(length).await;
            let mut st = lock(&state);
            if st.generation == generation {
                st.stop_device();
                let _ = events.send(PlayerEvent::Ended { generation });
            }
        }));
        Ok(generation)
    }

    /// Play `a`, wait the A/B gap, then play `b`.
    pub fn play_ab(&self, a: AudioBuffer, b: AudioBuffer) -> u64 {
        let mut st = lock(&self.state);
        st.generation += 1;
        if let Some(task) = st.task.take() {
            task.abort();
        }
        st.stop_device();

        let generation = st.generation;
        let state = self.state.clone();
        let events = self.events.clone();
        let device = self.device.clone();
        let gap = self.gap;
        st.task = Some(tokio::spawn(async move {
            for (i, buffer) in [a, b].iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(gap).await;
                }
                {
                    let mut st = lock(&state);
                    if st.generation != generation {
                        return;
                    }
                    match device.start(buffer) {
                        Ok(h) => st.handle = Some(h),
                        Err(e) => {
                            warn!("A/B playback could not start: {}", e);
                            return;
                        }
                    }
                }
                tokio::time::sleep(duration_of(buffer)).await;
                let mut st = lock(&state);
                if st.generation != generation {
                    return;
                }
                st.stop_device();
            }
            let st = lock(&state);
            if st.generation == generation {
                debug!("A/B sequence {} finished", generation);
                let _ = events.send(PlayerEvent::Ended { generation });
            }
        }));
        generation
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[derive(Default)]
    struct LogDevice {
        log: Arc<Mutex<Vec<String>>>,
    }

    struct LogHandle {
        frames: usize,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl PlaybackHandle for LogHandle {
        fn stop(&mut self) {
            self.log.lock().unwrap().push(format!("stop {}", self.frames));
        }
    }

    impl PlaybackDevice for LogDevice {
        fn start(&self, buffer: &AudioBuffer) -> PipelineResult<Box<dyn PlaybackHandle>> {
            let frames = buffer.frame_count();
            self.log.lock().unwrap().push(format!("start {}", frames));
            Ok(Box::new(LogHandle {
                frames,
                log: self.log.clone(),
            }))
        }
    }

    fn device() -> (Arc<LogDevice>, Arc<Mutex<Vec<String>>>) {
        let dev = Arc::new(LogDevice::default());
        let log = dev.log.clone();
        (dev, log)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ab_plays_in_order_with_gap() {
        let (dev, log) = device();
        let (player, mut rx) = Player::new(dev);
        let start = Instant::now();
        let g = player.play_ab(
            AudioBuffer::silence(48000, 1, 4800),
            AudioBuffer::silence(48000, 1, 9600),
        );
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev, PlayerEvent::Ended { generation: g });
        assert!(start.elapsed() >= Duration::from_millis(100 + 400 + 200));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start 4800", "stop 4800", "start 9600", "stop 9600"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_suppresses_ended() {
        let (dev, log) = device();
        let (player, mut rx) = Player::new(dev);
        player.play(AudioBuffer::silence(48000, 1, 48000)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        player.stop();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(*log.lock().unwrap(), vec!["start 48000", "stop 48000"]);
        assert!(!player.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_play_replaces_old() {
        let (dev, log) = device();
        let (player, mut rx) = Player::new(dev);
        player.play(AudioBuffer::silence(48000, 1, 48000)).unwrap();
        let g2 = player.play(AudioBuffer::silence(48000, 1, 480)).unwrap();
        assert_eq!(rx.recv().await.unwrap(), PlayerEvent::Ended { generation: g2 });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start 48000", "stop 48000", "start 480", "stop 480"]
        );
    }
}
