// src/audio/capture.rs
// Capture driver: the input callback copies blocks onto a bounded queue and a
// disk-writer thread drains them into a stereo float WAV.

use chrono::Local;
use crossbeam::channel::Sender;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::device::{ActiveStream, AudioBackend, StreamSettings};
use super::queue::{CaptureMessage, CaptureReceiver, CaptureSender, capture_queue};
use super::{CHANNELS, EngineConfig, EngineEvent};
use crate::error::{LooperError, Result};
use crate::model::Track;

const WRITER_POLL: Duration = Duration::from_millis(1);

/// State owned by the real-time input callback
pub struct CaptureCallback {
    queue: CaptureSender,
    recording: Arc<AtomicBool>,
    ended: bool,
}

impl CaptureCallback {
    pub fn new(queue: CaptureSender, recording: Arc<AtomicBool>) -> Self {
        Self {
            queue,
            recording,
            ended: false,
        }
    }

    /// Hand one captured buffer to the disk writer.
    ///
    /// Once recording is switched off the end sentinel is queued (retried on
    /// later calls while the queue is full) and further input is ignored.
    pub fn process(&mut self, input: &[f32]) {
        if self.ended {
            return;
        }
        if self.recording.load(Ordering::Acquire) {
            self.queue.send_block(input);
        } else if self.queue.send_end() {
            self.ended = true;
        }
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }
}

struct DiskWriter {
    queue: CaptureReceiver,
    writer: WavWriter<BufWriter<File>>,
    input_channels: usize,
    abandon: Arc<AtomicBool>,
}

impl DiskWriter {
    /// Drain the queue until the end sentinel; returns frames written
    fn run(mut self) -> Result<u64> {
        let mut frames = 0u64;
        loop {
            match self.queue.try_recv() {
                Some(CaptureMessage::Block(buf)) => {
                    frames += self.write_block(&buf)?;
                    self.queue.recycle(buf);
                }
                Some(CaptureMessage::End) => break,
                None => {
                    if self.abandon.load(Ordering::Acquire) {
                        log::warn!("Recorder: input stream went quiet, closing file early");
                        break;
                    }
                    thread::sleep(WRITER_POLL);
                }
            }
        }
        self.writer.finalize()?;
        Ok(frames)
    }

    /// Write interleaved input as stereo: mono is duplicated, extra channels dropped
    fn write_block(&mut self, buf: &[f32]) -> Result<u64> {
        let mut frames = 0;
        for frame in buf.chunks_exact(self.input_channels) {
            let left = frame[0];
            let right = if self.input_channels > 1 { frame[1] } else { left };
            self.writer.write_sample(left)?;
            self.writer.write_sample(right)?;
            frames += 1;
        }
        Ok(frames)
    }
}

struct Session {
    path: PathBuf,
    slip: usize,
    recording: Arc<AtomicBool>,
    abandon: Arc<AtomicBool>,
    overflows: Arc<AtomicU64>,
    stream: Box<dyn ActiveStream>,
    writer: JoinHandle<Result<u64>>,
}

/// Records new tracks from the default input
pub struct Recorder {
    config: EngineConfig,
    events: Sender<EngineEvent>,
    session: Option<Session>,
}

impl Recorder {
    pub fn new(config: &EngineConfig, events: Sender<EngineEvent>) -> Self {
        Self {
            config: config.clone(),
            events,
            session: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Open a new take. `cursor` becomes the slip of the recorded track.
    pub fn start_recording(&mut self, backend: &dyn AudioBackend, cursor: usize) -> Result<()> {
        if self.session.is_some() {
            log::warn!("Recorder: already recording");
            return Ok(());
        }

        let input_channels = backend.input_channels()?.max(1);
        std::fs::create_dir_all(&self.config.recordings_dir)?;
        let path = recording_path(
            &self.config.recordings_dir,
            &Local::now().format("%Y%m%d%H%M%S").to_string(),
        );

        let spec = WavSpec {
            channels: CHANNELS as u16,
            sample_rate: self.config.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(&path, spec)?;

        let overflows = Arc::new(AtomicU64::new(0));
        let (sender, receiver) = capture_queue(
            self.config.recorder_queue_depth,
            self.config.block_size * input_channels as usize,
            Arc::clone(&overflows),
        );
        let recording = Arc::new(AtomicBool::new(true));
        let abandon = Arc::new(AtomicBool::new(false));

        let disk = DiskWriter {
            queue: receiver,
            writer,
            input_channels: input_channels as usize,
            abandon: Arc::clone(&abandon),
        };
        let writer = thread::Builder::new()
            .name("loopstation-writer".to_string())
            .spawn(move || disk.run())?;

        let settings = StreamSettings::input(&self.config, input_channels);
        let callback = CaptureCallback::new(sender, Arc::clone(&recording));
        let stream = match backend.open_input(&settings, callback) {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("Recorder: could not open input stream: {}", e);
                abandon.store(true, Ordering::Release);
                let _ = writer.join();
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        };

        log::info!("Recorder: recording {:?} with slip {}", path, cursor);
        self.session = Some(Session {
            path,
            slip: cursor,
            recording,
            abandon,
            overflows,
            stream,
            writer,
        });
        Ok(())
    }

    /// Finish the current take and wait for its file to be closed.
    pub fn stop_recording(&mut self) -> Result<Track> {
        let Some(session) = self.session.take() else {
            return Err(LooperError::EmptyRecording);
        };
        session.recording.store(false, Ordering::Release);

        // The callback queues the end sentinel on its next tick. If the
        // stream has stopped calling back, give up waiting and close anyway.
        let deadline = Instant::now() + self.end_timeout();
        while !session.writer.is_finished() && Instant::now() < deadline {
            thread::sleep(WRITER_POLL);
        }
        session.abandon.store(true, Ordering::Release);

        let written = session
            .writer
            .join()
            .map_err(|_| LooperError::Thread("disk writer panicked".to_string()))?;
        drop(session.stream);

        let overflows = session.overflows.load(Ordering::Relaxed);
        if overflows > 0 {
            log::warn!("Recorder: {} captured blocks dropped", overflows);
            let _ = self.events.try_send(EngineEvent::CaptureOverflow(overflows));
        }

        let frames = match written {
            Ok(frames) => frames,
            Err(e) => {
                log::error!("Recorder: writing {:?} failed: {}", session.path, e);
                let _ = std::fs::remove_file(&session.path);
                return Err(e);
            }
        };
        if frames == 0 {
            log::warn!("Recorder: no audio captured, discarding {:?}", session.path);
            let _ = std::fs::remove_file(&session.path);
            return Err(LooperError::EmptyRecording);
        }

        let track = Track::from_file(&session.path)?.with_slip(session.slip);
        log::info!(
            "Recorder: finished {:?} ({} frames, slip {})",
            session.path,
            frames,
            session.slip
        );
        let _ = self
            .events
            .try_send(EngineEvent::RecordingFinished(session.path));
        Ok(track)
    }

    fn end_timeout(&self) -> Duration {
        let block = Duration::from_secs_f64(
            self.config.block_size as f64 / self.config.sample_rate as f64,
        );
        (block * 8).max(Duration::from_millis(250))
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.session.is_some()
            && let Err(e) = self.stop_recording()
        {
            log::warn!("Recorder: take discarded on shutdown: {}", e);
        }
    }
}

/// `track_<stamp>.wav` in `dir`, with a numeric suffix if that name is taken
fn recording_path(dir: &Path, stamp: &str) -> PathBuf {
    let path = dir.join(format!("track_{}.wav", stamp));
    if !path.exists() {
        return path;
    }
    (1..)
        .map(|n| dir.join(format!("track_{}_{}.wav", stamp, n)))
        .find(|p| !p.exists())
        .unwrap_or(path)
}
