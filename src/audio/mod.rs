pub mod capture;
pub mod device;
pub mod mixer;
pub mod playback;
pub mod queue;
pub mod reader;

pub use capture::{CaptureCallback, Recorder};
pub use device::{ActiveStream, AudioBackend, CpalBackend, StreamSettings};
pub use mixer::Aggregator;
pub use playback::{AudioCursor, PlaybackCallback, Player};
pub use reader::{BlockSet, TrackReader};

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{LooperError, Result};

/// Output and capture are always interleaved stereo
pub const CHANNELS: usize = 2;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Frames per block, shared by reader, mixer and hardware callbacks
    pub block_size: usize,
    /// Mixed blocks buffered ahead of the playback callback
    pub player_queue_depth: usize,
    /// Depth of the reader command queue: track additions, removals and
    /// gain changes waiting for the mixing thread
    pub reader_queue_depth: usize,
    /// Captured blocks buffered ahead of the disk writer
    pub recorder_queue_depth: usize,
    pub recordings_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            block_size: 2048,
            player_queue_depth: 10,
            reader_queue_depth: 10,
            recorder_queue_depth: 10,
            recordings_dir: PathBuf::from("resources/recordings"),
        }
    }
}

impl EngineConfig {
    /// Load overrides from a TOML file; missing keys keep their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(LooperError::InvalidConfig("sample_rate must be positive"));
        }
        if self.block_size == 0 {
            return Err(LooperError::InvalidConfig("block_size must be positive"));
        }
        if self.player_queue_depth == 0
            || self.reader_queue_depth == 0
            || self.recorder_queue_depth == 0
        {
            return Err(LooperError::InvalidConfig("queue depths must be positive"));
        }
        Ok(())
    }

    /// Interleaved samples in one full block
    pub fn block_samples(&self) -> usize {
        self.block_size * CHANNELS
    }
}

/// Conditions reported from the audio threads to the control thread
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The playback queue was empty when the output callback fired
    PlaybackUnderrun,
    /// Captured blocks dropped because the disk writer fell behind
    CaptureOverflow(u64),
    StreamError(String),
    MixerFailed(String),
    /// The device asked for fewer frames than a block holds; the tail of
    /// each block is dropped
    BufferMismatch {
        block_frames: usize,
        device_frames: usize,
    },
    RecordingFinished(PathBuf),
}
