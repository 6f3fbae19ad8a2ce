//! Error types for the looper engine

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading, recording or playing a loop
#[derive(Error, Debug)]
pub enum LooperError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Project file error: {0}")]
    Project(#[from] serde_json::Error),

    #[error("Project file is not a Loop (found type {0:?})")]
    NotALoop(Option<String>),

    #[error("Config file error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(&'static str),

    /// No usable audio device
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuild(#[from] cpal::BuildStreamError),

    #[error("Failed to start audio stream: {0}")]
    StreamPlay(#[from] cpal::PlayStreamError),

    #[error("Sample rate mismatch for {path:?}: track={track}Hz, engine={engine}Hz")]
    SampleRateMismatch {
        path: PathBuf,
        track: u32,
        engine: u32,
    },

    #[error("Unsupported channel count {channels} in {path:?} (mono or stereo only)")]
    UnsupportedChannels { path: PathBuf, channels: u16 },

    #[error("Track not found: {0:?}")]
    TrackNotFound(PathBuf),

    #[error("No track at index {0}")]
    NoSuchTrack(usize),

    /// Out-of-range value passed to a setter; the previous value is kept
    #[error("Invalid value for {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("Recording captured no audio")]
    EmptyRecording,

    #[error("Engine thread failed: {0}")]
    Thread(String),
}

/// Result type for looper operations
pub type Result<T> = std::result::Result<T, LooperError>;
