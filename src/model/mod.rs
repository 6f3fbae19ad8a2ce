//! Persisted data model: loops, tracks, effect settings and the metronome.

pub mod fx;
pub mod metronome;
pub mod project;
pub mod track;

pub use fx::{FxSettings, StereoGain};
pub use metronome::{Click, Metronome};
pub use project::Loop;
pub use track::Track;
