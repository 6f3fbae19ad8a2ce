use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::FxSettings;
use crate::error::{LooperError, Result};

/// One audio stream in a loop, backed by a WAV file on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__type__", rename = "Track")]
pub struct Track {
    pub file_name: PathBuf,
    /// Length in frames
    pub samples: usize,
    pub samplerate: u32,
    pub beats: Option<u32>,
    pub bpm: Option<f64>,
    pub ms_length: f64,
    pub fx: FxSettings,
}

impl Track {
    /// Build a track from a WAV file's header.
    ///
    /// Only mono and stereo files are accepted.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        if spec.channels == 0 || spec.channels > 2 {
            return Err(LooperError::UnsupportedChannels {
                path: path.to_path_buf(),
                channels: spec.channels,
            });
        }

        let samples = reader.duration() as usize;
        let ms_length = samples as f64 / spec.sample_rate as f64 * 1000.0;
        Ok(Self {
            file_name: path.to_path_buf(),
            samples,
            samplerate: spec.sample_rate,
            beats: None,
            bpm: None,
            ms_length,
            fx: FxSettings::default(),
        })
    }

    pub fn with_slip(mut self, slip: usize) -> Self {
        self.fx.slip = slip;
        self
    }

    /// Set the beat count and derive the tempo from the track length
    pub fn set_beats(&mut self, beats: u32) -> Result<()> {
        if beats == 0 {
            return Err(LooperError::InvalidParameter {
                name: "beats",
                value: 0.0,
            });
        }
        self.beats = Some(beats);
        self.bpm = (self.ms_length > 0.0).then(|| beats as f64 / self.ms_length * 60_000.0);
        Ok(())
    }

    /// One millisecond worth of samples at this track's rate
    pub fn slip_step(&self) -> usize {
        ((self.samplerate as f64 / 1000.0).round() as usize).max(1)
    }

    pub fn set_slip(&mut self, slip: usize) {
        self.fx.slip = slip;
    }

    /// Set the slip from a millisecond offset, wrapped to the track length
    pub fn set_slip_ms(&mut self, slip_ms: f64) -> Result<()> {
        if !slip_ms.is_finite() || slip_ms < 0.0 {
            return Err(LooperError::InvalidParameter {
                name: "slip_ms",
                value: slip_ms,
            });
        }
        let wrapped = if self.ms_length > 0.0 {
            slip_ms % self.ms_length
        } else {
            0.0
        };
        self.fx.slip = (wrapped * self.samplerate as f64 / 1000.0).round() as usize;
        Ok(())
    }

    /// Move the slip forward 1 ms, wrapping to 0 at the end of the track
    pub fn slip_inc(&mut self) {
        let step = self.slip_step();
        if self.fx.slip + step < self.samples {
            self.fx.slip += step;
        } else {
            self.fx.slip = 0;
        }
    }

    /// Move the slip back 1 ms, wrapping to 1 ms before the end
    pub fn slip_dec(&mut self) {
        let step = self.slip_step();
        if self.fx.slip > step {
            self.fx.slip -= step;
        } else {
            self.fx.slip = self.samples.saturating_sub(step);
        }
    }

    pub fn set_pitch_adjust(&mut self, adjust: i32) {
        self.fx.pitch_adjust = adjust;
    }

    pub fn pitch_adjust_inc(&mut self) {
        self.fx.pitch_adjust = self.fx.pitch_adjust.saturating_add(1);
    }

    pub fn pitch_adjust_dec(&mut self) {
        self.fx.pitch_adjust = self.fx.pitch_adjust.saturating_sub(1);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};

    #[test]
    fn test_header_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::write_stereo(dir.path(), "a.wav", 44100, |_| 0.1);
        let mut track = Track::from_file(&path).unwrap();

        assert_eq!(track.samples, 44100);
        assert_eq!(track.samplerate, 44100);
        assert!((track.ms_length - 1000.0).abs() < 1e-9);
        assert_eq!(track.fx.slip, 0);

        track.set_beats(2).unwrap();
        assert!((track.bpm.unwrap() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_multichannel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quad.wav");
        let spec = WavSpec {
            channels: 4,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..16 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        assert!(matches!(
            Track::from_file(&path),
            Err(LooperError::UnsupportedChannels { channels: 4, .. })
        ));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Track::from_file("does/not/exist.wav").is_err());
    }

    #[test]
    fn test_slip_wraps_in_one_ms_steps() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::write_stereo(dir.path(), "short.wav", 100, |_| 0.0);
        let mut track = Track::from_file(&path).unwrap();
        assert_eq!(track.slip_step(), 44);

        track.slip_inc();
        assert_eq!(track.fx.slip, 44);
        track.slip_inc();
        assert_eq!(track.fx.slip, 88);
        track.slip_inc();
        assert_eq!(track.fx.slip, 0);

        track.slip_dec();
        assert_eq!(track.fx.slip, 56);
    }

    #[test]
    fn test_slip_from_milliseconds() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::write_stereo(dir.path(), "b.wav", 44100, |_| 0.0);
        let mut track = Track::from_file(&path).unwrap();

        track.set_slip_ms(250.0).unwrap();
        assert_eq!(track.fx.slip, 11025);
        track.set_slip_ms(1250.0).unwrap();
        assert_eq!(track.fx.slip, 11025);
        assert!(track.set_slip_ms(-1.0).is_err());
    }
}
