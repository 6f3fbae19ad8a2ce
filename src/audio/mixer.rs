// src/audio/mixer.rs
// Mixing aggregator: reads every track block by block on a background thread,
// combines them into one stereo block and feeds the playback queue.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wide::f32x4;

use super::queue::{BlockSender, MixedBlock};
use super::reader::{TrackBlock, TrackReader};
use super::{CHANNELS, EngineEvent};
use crate::error::Result;
use crate::model::{Loop, StereoGain};

/// How long the mixing thread sleeps while the playback queue is full
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Combine one tick of track blocks into `out`.
///
/// Blocks shorter than the longest are padded with trailing silence. The sum
/// is divided by the track count (a plain average, so a full-scale track
/// never clips however many are layered) and then scaled by the loop gain.
/// With no tracks at all the result is `silence_len` samples of silence.
pub fn mix_blocks(
    blocks: &[TrackBlock],
    master: StereoGain,
    silence_len: usize,
    out: &mut Vec<f32>,
) {
    let len = blocks
        .iter()
        .map(|b| b.samples.len())
        .max()
        .unwrap_or(silence_len);
    out.clear();
    out.resize(len, 0.0);

    for block in blocks {
        add_scaled_simd(out, &block.samples, block.gain);
    }

    let count = blocks.len().max(1) as f32;
    scale_and_clip_simd(
        out,
        StereoGain {
            left: master.left / count,
            right: master.right / count,
        },
    );
}

/// dest += src * gain over interleaved stereo; `src` may be shorter than `dest`
#[inline]
fn add_scaled_simd(dest: &mut [f32], src: &[f32], gain: StereoGain) {
    let gain_vec = f32x4::new([gain.left, gain.right, gain.left, gain.right]);
    let len = dest.len().min(src.len());
    let chunks = len / 4;

    for i in 0..chunks {
        let idx = i * 4;
        let dest_vec = f32x4::new([dest[idx], dest[idx + 1], dest[idx + 2], dest[idx + 3]]);
        let src_vec = f32x4::new([src[idx], src[idx + 1], src[idx + 2], src[idx + 3]]);
        let result = dest_vec + src_vec * gain_vec;
        dest[idx..idx + 4].copy_from_slice(&result.to_array());
    }

    // Remainder is at most one stereo frame
    for i in chunks * 4..len {
        let g = if i % CHANNELS == 0 {
            gain.left
        } else {
            gain.right
        };
        dest[i] += src[i] * g;
    }
}

#[inline]
fn scale_and_clip_simd(buffer: &mut [f32], gain: StereoGain) {
    let gain_vec = f32x4::new([gain.left, gain.right, gain.left, gain.right]);
    let one = f32x4::splat(1.0);
    let neg_one = f32x4::splat(-1.0);
    let chunks = buffer.len() / 4;

    for i in 0..chunks {
        let idx = i * 4;
        let vec = f32x4::new([
            buffer[idx],
            buffer[idx + 1],
            buffer[idx + 2],
            buffer[idx + 3],
        ]);
        let result = (vec * gain_vec).max(neg_one).min(one);
        buffer[idx..idx + 4].copy_from_slice(&result.to_array());
    }

    for i in chunks * 4..buffer.len() {
        let g = if i % CHANNELS == 0 {
            gain.left
        } else {
            gain.right
        };
        buffer[i] = (buffer[i] * g).clamp(-1.0, 1.0);
    }
}

/// Track changes forwarded to the mixing thread while it runs
#[derive(Debug)]
enum ReaderCommand {
    Add {
        path: PathBuf,
        slip: usize,
        gain: StereoGain,
    },
    Remove(PathBuf),
    SetGain {
        path: PathBuf,
        gain: StereoGain,
    },
    SetMasterGain(StereoGain),
}

struct MixWorker {
    reader: TrackReader,
    output: BlockSender,
    master: StereoGain,
    block_samples: usize,
    commands: Receiver<ReaderCommand>,
    running: Arc<AtomicBool>,
    events: Sender<EngineEvent>,
}

impl MixWorker {
    /// Fill the playback queue before the output stream starts
    fn prime(&mut self) -> Result<()> {
        while !self.output.is_full() {
            self.mix_next()?;
        }
        Ok(())
    }

    fn run(mut self) {
        while self.running.load(Ordering::Acquire) {
            self.apply_commands();

            if self.output.is_full() {
                thread::sleep(POLL_INTERVAL);
                continue;
            }

            if let Err(e) = self.mix_next() {
                log::error!("Aggregator: read failed, stopping mix: {}", e);
                let _ = self.events.try_send(EngineEvent::MixerFailed(e.to_string()));
                break;
            }
        }
        self.reader.close_all();
        log::debug!("Aggregator: mixing thread exiting");
    }

    fn mix_next(&mut self) -> Result<()> {
        let set = self.reader.read_next_block()?;
        let mut samples = self.output.buffer();
        mix_blocks(&set.blocks, self.master, self.block_samples, &mut samples);

        // Single producer and checked for room, so this cannot be rejected
        if self
            .output
            .send(MixedBlock {
                samples,
                is_last: set.is_last,
            })
            .is_err()
        {
            log::warn!("Aggregator: playback queue unexpectedly full, block dropped");
        }
        Ok(())
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                ReaderCommand::Add { path, slip, gain } => {
                    if let Err(e) = self.reader.queue_addition(&path, slip, gain) {
                        log::error!("Aggregator: could not open {:?}: {}", path, e);
                        let _ = self.events.try_send(EngineEvent::MixerFailed(format!(
                            "could not open {}: {}",
                            path.display(),
                            e
                        )));
                    }
                }
                ReaderCommand::Remove(path) => {
                    if !self.reader.close(&path) {
                        log::debug!("Aggregator: {:?} was not open", path);
                    }
                }
                ReaderCommand::SetGain { path, gain } => self.reader.set_gain(&path, gain),
                ReaderCommand::SetMasterGain(gain) => self.master = gain,
            }
        }
    }
}

/// Owns the mixing thread for one playback session
pub struct Aggregator {
    block_size: usize,
    command_depth: usize,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    commands: Option<Sender<ReaderCommand>>,
    events: Sender<EngineEvent>,
}

impl Aggregator {
    pub fn new(block_size: usize, command_depth: usize, events: Sender<EngineEvent>) -> Self {
        Self {
            block_size,
            command_depth,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            commands: None,
            events,
        }
    }

    /// Open the loop's files at `cursor`, fill the playback queue, then keep
    /// it full from a background thread.
    ///
    /// Returns the cursor the first queued block starts at, which is 0 when
    /// `cursor` lies outside the current pass.
    pub fn start(&mut self, project: &Loop, cursor: usize, output: BlockSender) -> Result<usize> {
        self.stop();

        let mut reader = TrackReader::new(self.block_size);
        reader.open_at(project, cursor)?;
        let start = reader.cursor();

        let (command_tx, command_rx) = channel::bounded(self.command_depth);
        let running = Arc::new(AtomicBool::new(true));
        let mut worker = MixWorker {
            reader,
            output,
            master: project.fx.gain(),
            block_samples: self.block_size * CHANNELS,
            commands: command_rx,
            running: Arc::clone(&running),
            events: self.events.clone(),
        };
        worker.prime()?;

        let handle = thread::Builder::new()
            .name("loopstation-mixer".to_string())
            .spawn(move || worker.run())?;

        self.running = running;
        self.thread = Some(handle);
        self.commands = Some(command_tx);
        log::info!(
            "Aggregator: started with {} tracks at cursor {}",
            project.track_count(),
            start
        );
        Ok(start)
    }

    /// Stop the mixing thread and wait for it to close its files
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.commands = None;
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("Aggregator: mixing thread panicked");
            }
            log::info!("Aggregator: stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Queue a track to join at the next loop restart
    pub fn add_track(&self, path: PathBuf, slip: usize, gain: StereoGain) {
        self.send(ReaderCommand::Add { path, slip, gain });
    }

    /// Close a track's file right away
    pub fn remove_track(&self, path: PathBuf) {
        self.send(ReaderCommand::Remove(path));
    }

    pub fn set_track_gain(&self, path: PathBuf, gain: StereoGain) {
        self.send(ReaderCommand::SetGain { path, gain });
    }

    pub fn set_master_gain(&self, gain: StereoGain) {
        self.send(ReaderCommand::SetMasterGain(gain));
    }

    fn send(&self, command: ReaderCommand) {
        let Some(commands) = &self.commands else {
            return;
        };
        match commands.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                // The mixing thread drains commands every block; wait for room
                if commands.send(command).is_err() {
                    log::warn!("Aggregator: mixing thread gone, command dropped");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("Aggregator: mixing thread gone, command dropped");
            }
        }
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.stop();
    }
}
