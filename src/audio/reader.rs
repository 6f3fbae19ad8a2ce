use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::CHANNELS;
use crate::error::{LooperError, Result};
use crate::model::{Loop, StereoGain};

type WavSource = WavReader<BufReader<File>>;

/// One open track file and its position within the current pass
pub struct WavFile {
    path: PathBuf,
    source: WavSource,
    channels: usize,
    format: SampleFormat,
    bits_per_sample: u16,
    /// Length in frames
    len: usize,
    /// Next frame to read
    position: usize,
    slip: usize,
    /// The shared cursor has not reached `slip` yet
    is_slipping: bool,
    finished_reading: bool,
    gain: StereoGain,
}

impl WavFile {
    pub fn open<P: AsRef<Path>>(path: P, slip: usize, gain: StereoGain) -> Result<Self> {
        let path = path.as_ref();
        let source = WavReader::open(path)?;
        let spec = source.spec();
        if spec.channels == 0 || spec.channels as usize > CHANNELS {
            return Err(LooperError::UnsupportedChannels {
                path: path.to_path_buf(),
                channels: spec.channels,
            });
        }
        let len = source.duration() as usize;
        Ok(Self {
            path: path.to_path_buf(),
            source,
            channels: spec.channels as usize,
            format: spec.sample_format,
            bits_per_sample: spec.bits_per_sample,
            len,
            position: 0,
            slip,
            is_slipping: slip > 0,
            finished_reading: false,
            gain,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_slipping(&self) -> bool {
        self.is_slipping
    }

    pub fn finished_reading(&self) -> bool {
        self.finished_reading
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Place the file where it belongs when the shared cursor is at `cursor`
    fn position_for(&mut self, cursor: usize) -> Result<()> {
        if cursor < self.slip {
            self.is_slipping = true;
            self.finished_reading = false;
            return self.seek(0);
        }

        self.is_slipping = false;
        let offset = cursor - self.slip;
        if offset >= self.len {
            self.finished_reading = true;
            self.position = self.len;
            Ok(())
        } else {
            self.finished_reading = false;
            self.seek(offset)
        }
    }

    fn seek(&mut self, frame: usize) -> Result<()> {
        self.source.seek(frame as u32)?;
        self.position = frame;
        Ok(())
    }

    /// Append up to `frames` frames as interleaved stereo, returning how many were read
    fn read_frames(&mut self, frames: usize, out: &mut Vec<f32>) -> Result<usize> {
        let wanted = frames.min(self.len - self.position);
        let read = match self.format {
            SampleFormat::Float => read_interleaved::<f32>(
                &mut self.source,
                self.channels,
                wanted,
                |s| s,
                out,
            )?,
            SampleFormat::Int => {
                let scale = 1.0 / (1_i64 << (self.bits_per_sample - 1)) as f32;
                read_interleaved::<i32>(
                    &mut self.source,
                    self.channels,
                    wanted,
                    |s| s as f32 * scale,
                    out,
                )?
            }
        };
        // A header that promises more data than the file holds ends the file here
        self.position = if read < wanted {
            self.len
        } else {
            self.position + read
        };
        Ok(read)
    }
}

fn read_interleaved<S: hound::Sample>(
    source: &mut WavSource,
    channels: usize,
    frames: usize,
    convert: impl Fn(S) -> f32,
    out: &mut Vec<f32>,
) -> Result<usize> {
    let mut samples = source.samples::<S>();
    for frame in 0..frames {
        let Some(first) = samples.next() else {
            return Ok(frame);
        };
        let left = convert(first?);
        let right = if channels == 2 {
            match samples.next() {
                Some(s) => convert(s?),
                None => return Ok(frame),
            }
        } else {
            left
        };
        out.push(left);
        out.push(right);
    }
    Ok(frames)
}

/// Raw samples for one track for one tick
#[derive(Debug, Clone)]
pub struct TrackBlock {
    /// Interleaved stereo; shorter than a full block at the end of a file
    pub samples: Vec<f32>,
    pub gain: StereoGain,
}

/// Everything read for one tick
#[derive(Debug, Clone)]
pub struct BlockSet {
    pub blocks: Vec<TrackBlock>,
    /// The master track ran out; the reader has already restarted the pass
    pub is_last: bool,
}

/// Reads every track of a loop block by block against a shared cursor.
pub struct TrackReader {
    files: Vec<WavFile>,
    /// Added mid-pass; joined at the next restart
    pending: Vec<WavFile>,
    /// Frame position of the next block within the pass
    cursor: usize,
    block_size: usize,
}

impl TrackReader {
    pub fn new(block_size: usize) -> Self {
        Self {
            files: Vec::new(),
            pending: Vec::new(),
            cursor: 0,
            block_size,
        }
    }

    /// Open every track of the loop at the start of a pass
    pub fn open(&mut self, project: &Loop) -> Result<()> {
        self.open_at(project, 0)
    }

    /// Open every track of the loop positioned for `cursor`.
    ///
    /// If any file fails to open nothing changes.
    pub fn open_at(&mut self, project: &Loop, cursor: usize) -> Result<()> {
        let mut files = project
            .tracks
            .iter()
            .map(|track| WavFile::open(&track.file_name, track.fx.slip, track.fx.gain()))
            .collect::<Result<Vec<_>>>()?;

        let pass_length = project.pass_length().unwrap_or(0);
        let cursor = if cursor < pass_length { cursor } else { 0 };
        for file in files.iter_mut() {
            file.position_for(cursor)?;
        }

        self.files = files;
        self.pending.clear();
        self.cursor = cursor;
        log::debug!(
            "TrackReader: opened {} files at cursor {}",
            self.files.len(),
            cursor
        );
        Ok(())
    }

    /// Open a file to join the loop at the next restart.
    ///
    /// With nothing playing there is no pass to keep in step with, so the
    /// file joins immediately.
    pub fn queue_addition<P: AsRef<Path>>(
        &mut self,
        path: P,
        slip: usize,
        gain: StereoGain,
    ) -> Result<()> {
        let mut file = WavFile::open(path, slip, gain)?;
        if self.files.is_empty() {
            file.position_for(self.cursor)?;
            self.files.push(file);
        } else {
            self.pending.push(file);
        }
        Ok(())
    }

    /// Close the first open or pending file with this path
    pub fn close<P: AsRef<Path>>(&mut self, path: P) -> bool {
        let path = path.as_ref();
        if let Some(index) = self.files.iter().position(|f| f.path == path) {
            self.files.remove(index);
            return true;
        }
        if let Some(index) = self.pending.iter().position(|f| f.path == path) {
            self.pending.remove(index);
            return true;
        }
        false
    }

    pub fn close_all(&mut self) {
        self.files.clear();
        self.pending.clear();
        self.cursor = 0;
    }

    pub fn set_gain<P: AsRef<Path>>(&mut self, path: P, gain: StereoGain) {
        let path = path.as_ref();
        for file in self.files.iter_mut().chain(self.pending.iter_mut()) {
            if file.path == path {
                file.gain = gain;
            }
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn files(&self) -> &[WavFile] {
        &self.files
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Read one block from every open file.
    ///
    /// Slipping and finished files contribute a full block of silence. A file
    /// reaching its end contributes a short block, passed through unpadded.
    /// When the master file finishes, the pass restarts and `is_last` is set.
    pub fn read_next_block(&mut self) -> Result<BlockSet> {
        let block_size = self.block_size;
        let start = self.cursor;
        let mut blocks = Vec::with_capacity(self.files.len());

        for file in self.files.iter_mut() {
            let mut samples = Vec::with_capacity(block_size * CHANNELS);
            if file.finished_reading || (file.is_slipping && file.slip >= start + block_size) {
                samples.resize(block_size * CHANNELS, 0.0);
            } else {
                let lead = if file.is_slipping {
                    file.slip - start.min(file.slip)
                } else {
                    0
                };
                file.is_slipping = false;
                samples.resize(lead * CHANNELS, 0.0);
                file.read_frames(block_size - lead, &mut samples)?;
                if file.position >= file.len {
                    file.finished_reading = true;
                }
            }
            blocks.push(TrackBlock {
                samples,
                gain: file.gain,
            });
        }

        self.cursor += block_size;
        let is_last = self.files.first().is_some_and(|master| master.finished_reading);
        if is_last {
            self.restart()?;
        }
        Ok(BlockSet { blocks, is_last })
    }

    fn restart(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            log::debug!("TrackReader: {} queued files join the loop", self.pending.len());
            self.files.append(&mut self.pending);
        }
        for file in self.files.iter_mut() {
            file.position_for(0)?;
        }
        self.cursor = 0;
        Ok(())
    }
}
