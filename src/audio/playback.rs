// src/audio/playback.rs
// Playback driver: the output callback drains pre-mixed blocks and tracks
// the audio cursor; `Player` owns the stream and the mixing thread behind it.

use crossbeam::channel::Sender;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::device::{ActiveStream, AudioBackend, StreamSettings};
use super::mixer::Aggregator;
use super::queue::{BlockReceiver, block_queue};
use super::{CHANNELS, EngineConfig, EngineEvent};
use crate::error::Result;
use crate::model::{Loop, StereoGain};

/// Playback position within the current pass, shared with the output callback
#[derive(Debug, Clone, Default)]
pub struct AudioCursor(Arc<AtomicUsize>);

impl AudioCursor {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, frames: usize) {
        self.0.store(frames, Ordering::Release);
    }

    fn advance(&self, frames: usize) {
        self.0.fetch_add(frames, Ordering::AcqRel);
    }
}

/// State owned by the real-time output callback
pub struct PlaybackCallback {
    queue: BlockReceiver,
    cursor: AudioCursor,
    events: Sender<EngineEvent>,
    aborted: bool,
    mismatch_reported: bool,
}

impl PlaybackCallback {
    pub fn new(queue: BlockReceiver, cursor: AudioCursor, events: Sender<EngineEvent>) -> Self {
        Self {
            queue,
            cursor,
            events,
            aborted: false,
            mismatch_reported: false,
        }
    }

    /// Fill one hardware buffer. Never blocks or allocates.
    ///
    /// An empty queue aborts the stream: every later call outputs silence
    /// and the control thread is told to restart playback.
    pub fn process(&mut self, out: &mut [f32]) {
        if self.aborted {
            out.fill(0.0);
            return;
        }

        let Some(block) = self.queue.try_recv() else {
            self.aborted = true;
            out.fill(0.0);
            let _ = self.events.try_send(EngineEvent::PlaybackUnderrun);
            return;
        };

        if block.samples.len() > out.len() && !self.mismatch_reported {
            self.mismatch_reported = true;
            let _ = self.events.try_send(EngineEvent::BufferMismatch {
                block_frames: block.frames(),
                device_frames: out.len() / CHANNELS,
            });
        }

        let n = block.samples.len().min(out.len());
        out[..n].copy_from_slice(&block.samples[..n]);
        out[n..].fill(0.0);

        if block.is_last {
            self.cursor.set(0);
        } else {
            self.cursor.advance(block.frames());
        }
        self.queue.recycle(block.samples);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

/// Output stream plus the aggregator keeping its queue full
pub struct Player {
    settings: StreamSettings,
    queue_depth: usize,
    block_samples: usize,
    aggregator: Aggregator,
    stream: Option<Box<dyn ActiveStream>>,
    cursor: AudioCursor,
    events: Sender<EngineEvent>,
}

impl Player {
    pub fn new(config: &EngineConfig, cursor: AudioCursor, events: Sender<EngineEvent>) -> Self {
        Self {
            settings: StreamSettings::output(config),
            queue_depth: config.player_queue_depth,
            block_samples: config.block_samples(),
            aggregator: Aggregator::new(
                config.block_size,
                config.reader_queue_depth,
                events.clone(),
            ),
            stream: None,
            cursor,
            events,
        }
    }

    /// Start playing `project` from `cursor`.
    ///
    /// The queue is primed before the stream opens; on any failure nothing
    /// is left running.
    pub fn play(
        &mut self,
        backend: &dyn AudioBackend,
        project: &Loop,
        cursor: usize,
    ) -> Result<()> {
        self.stop();

        let (sender, receiver) = block_queue(self.queue_depth, self.block_samples);
        let start = self.aggregator.start(project, cursor, sender)?;
        self.cursor.set(start);

        let callback = PlaybackCallback::new(receiver, self.cursor.clone(), self.events.clone());
        match backend.open_output(&self.settings, callback) {
            Ok(stream) => {
                self.stream = Some(stream);
                log::info!("Player: playing from cursor {}", start);
                Ok(())
            }
            Err(e) => {
                log::error!("Player: could not open output stream: {}", e);
                self.aggregator.stop();
                Err(e)
            }
        }
    }

    /// Close the stream, drop whatever was still queued and join the mixer.
    /// Returns the audio cursor at the moment playback stopped.
    pub fn stop(&mut self) -> usize {
        if self.stream.take().is_some() {
            log::info!("Player: stopped at cursor {}", self.cursor.get());
        }
        self.aggregator.stop();
        self.cursor.get()
    }

    pub fn is_playing(&self) -> bool {
        self.stream.is_some()
    }

    pub fn cursor(&self) -> &AudioCursor {
        &self.cursor
    }

    /// Join a track at the next loop restart
    pub fn add_track(&self, path: PathBuf, slip: usize, gain: StereoGain) {
        self.aggregator.add_track(path, slip, gain);
    }

    pub fn remove_track(&self, path: PathBuf) {
        self.aggregator.remove_track(path);
    }

    pub fn set_track_gain(&self, path: PathBuf, gain: StereoGain) {
        self.aggregator.set_track_gain(path, gain);
    }

    pub fn set_master_gain(&self, gain: StereoGain) {
        self.aggregator.set_master_gain(gain);
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}
