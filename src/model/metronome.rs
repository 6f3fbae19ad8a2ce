use serde::{Deserialize, Serialize};

use crate::error::{LooperError, Result};

const MAX_BPM: u32 = 300;
const VOLUME_STEP: f32 = 0.01;

/// Metronome settings for a loop.
///
/// The metronome does not take part in mixing. It only needs to agree with
/// the tracks on where a beat falls, which `next_click` computes from the
/// same audio-cursor + slip convention the reader uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__type__", rename = "Metronome")]
pub struct Metronome {
    pub bpm: u32,
    pub beats: u32,
    pub volume: f32,
    pub count_in: bool,
    pub is_on: bool,
}

/// The next click relative to a cursor position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Click {
    pub samples_until: usize,
    /// Beat index within the measure, 0 is the downbeat
    pub beat: u32,
}

impl Click {
    pub fn is_downbeat(&self) -> bool {
        self.beat == 0
    }
}

impl Default for Metronome {
    fn default() -> Self {
        Self {
            bpm: 120,
            beats: 4,
            volume: 0.5,
            count_in: false,
            is_on: false,
        }
    }
}

impl Metronome {
    pub fn samples_per_beat(&self, sample_rate: u32) -> f64 {
        60.0 / self.bpm as f64 * sample_rate as f64
    }

    pub fn samples_per_measure(&self, sample_rate: u32) -> f64 {
        self.samples_per_beat(sample_rate) * self.beats as f64
    }

    /// Where the next click falls for a playback position.
    ///
    /// `cursor + slip` is the elapsed time since the loop's first beat. A
    /// position exactly on a beat clicks immediately.
    pub fn next_click(&self, cursor: usize, slip: usize, sample_rate: u32) -> Click {
        let samples_per_beat = self.samples_per_beat(sample_rate);
        let offset = (cursor + slip) as f64;
        let next_beat = (offset / samples_per_beat).ceil();
        let samples_until = (next_beat * samples_per_beat - offset).round() as usize;
        Click {
            samples_until,
            beat: (next_beat as u64 % self.beats as u64) as u32,
        }
    }

    /// Beat within the measure (1-based) at a playback position
    pub fn current_beat(&self, cursor: usize, sample_rate: u32) -> u32 {
        let in_measure = cursor as f64 % self.samples_per_measure(sample_rate);
        (in_measure / self.samples_per_beat(sample_rate)).floor() as u32 + 1
    }

    /// Check values that did not come through the setters, e.g. from a project file
    pub fn validate(&self) -> Result<()> {
        if self.bpm == 0 || self.bpm >= MAX_BPM {
            return Err(invalid("bpm", self.bpm as f64));
        }
        if self.beats == 0 {
            return Err(invalid("beats", 0.0));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(invalid("metronome_volume", self.volume as f64));
        }
        Ok(())
    }

    pub fn toggle(&mut self) {
        self.is_on = !self.is_on;
    }

    pub fn toggle_count_in(&mut self) {
        self.count_in = !self.count_in;
    }

    pub fn set_bpm(&mut self, bpm: u32) -> Result<()> {
        if bpm == 0 || bpm >= MAX_BPM {
            return Err(invalid("bpm", bpm as f64));
        }
        self.bpm = bpm;
        Ok(())
    }

    pub fn bpm_inc(&mut self) -> Result<()> {
        self.set_bpm(self.bpm + 1)
    }

    pub fn bpm_dec(&mut self) -> Result<()> {
        self.set_bpm(self.bpm.saturating_sub(1))
    }

    pub fn set_beats(&mut self, beats: u32) -> Result<()> {
        if beats == 0 {
            return Err(invalid("beats", 0.0));
        }
        self.beats = beats;
        Ok(())
    }

    pub fn beats_inc(&mut self) -> Result<()> {
        self.set_beats(self.beats.saturating_add(1))
    }

    pub fn beats_dec(&mut self) -> Result<()> {
        self.set_beats(self.beats.saturating_sub(1))
    }

    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(invalid("metronome_volume", volume as f64));
        }
        self.volume = volume;
        Ok(())
    }

    pub fn volume_inc(&mut self) -> Result<()> {
        if self.volume > 1.0 - VOLUME_STEP {
            return Err(invalid("metronome_volume", (self.volume + VOLUME_STEP) as f64));
        }
        self.set_volume((self.volume + VOLUME_STEP).min(1.0))
    }

    pub fn volume_dec(&mut self) -> Result<()> {
        if self.volume < VOLUME_STEP {
            return Err(invalid("metronome_volume", (self.volume - VOLUME_STEP) as f64));
        }
        self.set_volume((self.volume - VOLUME_STEP).max(0.0))
    }
}

fn invalid(name: &'static str, value: f64) -> LooperError {
    LooperError::InvalidParameter { name, value }
}
