use serde::{Deserialize, Serialize};

use crate::error::{LooperError, Result};

const STEP: f32 = 0.01;

/// Volume, pan, pitch, reverse and slip settings shared by tracks and loops.
///
/// `slip` only has meaning on a track. Pitch and reverse are carried as
/// settings; the mixer applies volume and pan only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__type__", rename = "FxSettings")]
pub struct FxSettings {
    pub volume: f32,
    pub pan: f32,
    pub is_reversed: bool,
    pub pitch_adjust: i32,
    /// Delay before the track sounds, in samples
    pub slip: usize,
}

impl Default for FxSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.5,
            is_reversed: false,
            pitch_adjust: 0,
            slip: 0,
        }
    }
}

impl FxSettings {
    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(invalid("volume", volume));
        }
        self.volume = volume;
        Ok(())
    }

    pub fn volume_inc(&mut self) -> Result<()> {
        if self.volume > 1.0 - STEP {
            return Err(invalid("volume", self.volume + STEP));
        }
        self.volume = (self.volume + STEP).min(1.0);
        Ok(())
    }

    pub fn volume_dec(&mut self) -> Result<()> {
        if self.volume < STEP {
            return Err(invalid("volume", self.volume - STEP));
        }
        self.volume = (self.volume - STEP).max(0.0);
        Ok(())
    }

    /// Set volume from the 0-100 scale used by control surfaces
    pub fn set_volume_percent(&mut self, percent: u8) -> Result<()> {
        if percent > 100 {
            return Err(invalid("volume_percent", percent as f32));
        }
        self.set_volume(percent as f32 / 100.0)
    }

    pub fn volume_percent(&self) -> u8 {
        (self.volume * 100.0).round() as u8
    }

    /// Pan in `[0, 1]`, 0.5 is centre
    pub fn set_pan(&mut self, pan: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&pan) {
            return Err(invalid("pan", pan));
        }
        self.pan = pan;
        Ok(())
    }

    pub fn pan_inc(&mut self) -> Result<()> {
        if self.pan > 1.0 - STEP {
            return Err(invalid("pan", self.pan + STEP));
        }
        self.pan = (self.pan + STEP).min(1.0);
        Ok(())
    }

    pub fn pan_dec(&mut self) -> Result<()> {
        if self.pan < STEP {
            return Err(invalid("pan", self.pan - STEP));
        }
        self.pan = (self.pan - STEP).max(0.0);
        Ok(())
    }

    /// Check values that did not come through the setters, e.g. from a project file
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(invalid("volume", self.volume));
        }
        if !(0.0..=1.0).contains(&self.pan) {
            return Err(invalid("pan", self.pan));
        }
        Ok(())
    }

    pub fn toggle_reverse(&mut self) {
        self.is_reversed = !self.is_reversed;
    }

    /// Per-channel linear gain for the current volume and balance
    pub fn gain(&self) -> StereoGain {
        StereoGain {
            left: self.volume * (2.0 * (1.0 - self.pan)).min(1.0),
            right: self.volume * (2.0 * self.pan).min(1.0),
        }
    }
}

/// Left/right gain applied to an interleaved stereo block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoGain {
    pub left: f32,
    pub right: f32,
}

impl StereoGain {
    pub const UNITY: Self = Self {
        left: 1.0,
        right: 1.0,
    };

    pub fn is_unity(&self) -> bool {
        self.left == 1.0 && self.right == 1.0
    }
}

impl Default for StereoGain {
    fn default() -> Self {
        Self::UNITY
    }
}

fn invalid(name: &'static str, value: f32) -> LooperError {
    LooperError::InvalidParameter {
        name,
        value: value as f64,
    }
}
