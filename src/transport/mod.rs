// src/transport/mod.rs
// The Looper: single owner of the loop and every engine component. Transport
// commands go through the state table in `state`, then their effects run here.

pub mod state;

pub use state::{Effect, Guards, LooperState, Transition, Trigger, transition};

use crossbeam::channel::{self, Receiver, Sender};
use std::path::{Path, PathBuf};

use crate::audio::{
    AudioBackend, AudioCursor, CpalBackend, EngineConfig, EngineEvent, Player, Recorder,
};
use crate::error::{LooperError, Result};
use crate::model::{Click, FxSettings, Loop, Metronome, Track};

const EVENT_QUEUE_DEPTH: usize = 64;

/// Data a trigger carries into its effects
enum Operand {
    None,
    Loop(Box<Loop>),
    Track(Track),
    Removal(PathBuf),
}

pub struct Looper {
    config: EngineConfig,
    backend: Box<dyn AudioBackend>,
    project: Loop,
    state: LooperState,
    cursor: AudioCursor,
    player: Player,
    recorder: Recorder,
    events: Receiver<EngineEvent>,
    last_recording: Option<PathBuf>,
    capture_overflows: u64,
}

impl Looper {
    /// Engine on the default sound card
    pub fn new(config: EngineConfig) -> Result<Self> {
        let (event_tx, event_rx) = channel::bounded(EVENT_QUEUE_DEPTH);
        let backend = CpalBackend::new(event_tx.clone());
        Self::build(config, Box::new(backend), event_tx, event_rx)
    }

    /// Engine on a caller-supplied backend
    pub fn with_backend(config: EngineConfig, backend: Box<dyn AudioBackend>) -> Result<Self> {
        let (event_tx, event_rx) = channel::bounded(EVENT_QUEUE_DEPTH);
        Self::build(config, backend, event_tx, event_rx)
    }

    fn build(
        config: EngineConfig,
        backend: Box<dyn AudioBackend>,
        event_tx: Sender<EngineEvent>,
        event_rx: Receiver<EngineEvent>,
    ) -> Result<Self> {
        config.validate()?;
        let cursor = AudioCursor::default();
        log::info!(
            "Looper: {}Hz, {} frames per block",
            config.sample_rate,
            config.block_size
        );
        Ok(Self {
            player: Player::new(&config, cursor.clone(), event_tx.clone()),
            recorder: Recorder::new(&config, event_tx),
            config,
            backend,
            project: Loop::default(),
            state: LooperState::Idle,
            cursor,
            events: event_rx,
            last_recording: None,
            capture_overflows: 0,
        })
    }

    // ---- transport ----

    /// Load a project file. Ignored while playing or recording.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if self.state.is_running() {
            log::debug!("Looper: load ignored in {}", self.state);
            return Ok(());
        }
        let path = path.as_ref();
        let project = Loop::load(path)
            .and_then(|project| {
                project
                    .tracks
                    .iter()
                    .try_for_each(|track| self.check_track(track))
                    .map(|()| project)
            })
            .inspect_err(|e| log::warn!("Looper: cannot load {:?}: {}", path, e))?;
        let guards = Guards {
            tracks_after: project.has_tracks(),
        };
        self.fire(Trigger::Load, guards, Operand::Loop(Box::new(project)))
    }

    /// Save the loop; returns the path written
    pub fn write<P: AsRef<Path>>(&mut self, path: P) -> Result<PathBuf> {
        self.project.audio_cursor = self.cursor.get();
        self.project
            .write(path.as_ref())
            .inspect_err(|e| log::error!("Looper: cannot write {:?}: {}", path.as_ref(), e))
    }

    /// Add a WAV file as a new track. While playing it joins at the next pass.
    pub fn add_track<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let track = Track::from_file(path)
            .and_then(|track| self.check_track(&track).map(|()| track))
            .inspect_err(|e| log::warn!("Looper: cannot add {:?}: {}", path, e))?;
        self.fire(
            Trigger::AddTrack,
            Guards { tracks_after: true },
            Operand::Track(track),
        )
    }

    pub fn remove_track<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        if self.project.position(path).is_none() {
            log::warn!("Looper: no track {:?} to remove", path);
            return Err(LooperError::TrackNotFound(path.to_path_buf()));
        }
        let guards = Guards {
            tracks_after: self.project.track_count() > 1,
        };
        self.fire(
            Trigger::RemoveTrack,
            guards,
            Operand::Removal(path.to_path_buf()),
        )
    }

    pub fn record(&mut self) -> Result<()> {
        self.fire_plain(Trigger::Record)
    }

    pub fn play(&mut self) -> Result<()> {
        self.fire_plain(Trigger::Play)
    }

    pub fn pause(&mut self) -> Result<()> {
        self.fire_plain(Trigger::Pause)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.fire_plain(Trigger::Stop)
    }

    /// Stop recording, then playback, joining every engine thread
    pub fn shutdown(&mut self) {
        if self.recorder.is_recording()
            && let Err(e) = self.finish_recording()
        {
            log::warn!("Looper: recording discarded on shutdown: {}", e);
        }
        self.player.stop();
        self.project.audio_cursor = self.cursor.get();
        self.state = state::settle(LooperState::Loaded, false, false, self.project.has_tracks());
        log::info!("Looper: shut down in {}", self.state);
    }

    fn fire_plain(&mut self, trigger: Trigger) -> Result<()> {
        let guards = Guards {
            tracks_after: self.project.has_tracks(),
        };
        self.fire(trigger, guards, Operand::None)
    }

    fn fire(&mut self, trigger: Trigger, guards: Guards, mut operand: Operand) -> Result<()> {
        let step = transition(self.state, trigger, guards);
        if step.is_ignored() {
            log::debug!("Looper: {:?} ignored in {}", trigger, self.state);
            return Ok(());
        }

        for effect in step.effects {
            if let Err(e) = self.run_effect(*effect, &mut operand) {
                self.state = self.settled(step.next);
                log::error!(
                    "Looper: {:?} failed during {:?}, now {}: {}",
                    trigger,
                    effect,
                    self.state,
                    e
                );
                return Err(e);
            }
        }

        let previous = self.state;
        self.state = self.settled(step.next);
        log::info!("Looper: {:?} {} -> {}", trigger, previous, self.state);
        Ok(())
    }

    fn settled(&self, intended: LooperState) -> LooperState {
        state::settle(
            intended,
            self.player.is_playing(),
            self.recorder.is_recording(),
            self.project.has_tracks(),
        )
    }

    fn run_effect(&mut self, effect: Effect, operand: &mut Operand) -> Result<()> {
        match effect {
            Effect::InstallLoop => {
                if let Operand::Loop(project) = std::mem::replace(operand, Operand::None) {
                    self.project = *project;
                    self.cursor.set(0);
                }
            }
            Effect::AppendTrack => {
                if let Operand::Track(track) = operand {
                    self.project.append(track.clone());
                }
            }
            Effect::HotAddTrack => {
                if let Operand::Track(track) = operand {
                    self.player
                        .add_track(track.file_name.clone(), track.fx.slip, track.fx.gain());
                }
            }
            Effect::RemoveTrack => {
                if let Operand::Removal(path) = operand {
                    self.project.remove(&*path);
                }
            }
            Effect::CloseLiveTrack => {
                if let Operand::Removal(path) = operand {
                    self.player.remove_track(path.clone());
                }
            }
            Effect::StartRecording => {
                self.recorder
                    .start_recording(self.backend.as_ref(), self.cursor.get())?;
            }
            Effect::StopRecording => match self.finish_recording() {
                // An empty take is dropped; the rest of the transition goes on
                Err(LooperError::EmptyRecording) => {
                    log::warn!("Looper: recording captured nothing, no track added");
                }
                other => other?,
            },
            Effect::StartPlayback => {
                if !self.project.has_tracks() {
                    log::warn!("Looper: nothing to play");
                    return Ok(());
                }
                self.player
                    .play(self.backend.as_ref(), &self.project, self.cursor.get())?;
            }
            Effect::StopPlayback => {
                self.project.audio_cursor = self.player.stop();
            }
            Effect::ResetCursor => {
                self.cursor.set(0);
                self.project.audio_cursor = 0;
            }
        }
        Ok(())
    }

    /// Close the current take, append it and feed it to a running mix
    fn finish_recording(&mut self) -> Result<()> {
        let track = self.recorder.stop_recording()?;
        if self.player.is_playing() {
            self.player
                .add_track(track.file_name.clone(), track.fx.slip, track.fx.gain());
        }
        self.last_recording = Some(track.file_name.clone());
        self.project.append(track);
        Ok(())
    }

    fn check_track(&self, track: &Track) -> Result<()> {
        if track.samplerate != self.config.sample_rate {
            return Err(LooperError::SampleRateMismatch {
                path: track.file_name.clone(),
                track: track.samplerate,
                engine: self.config.sample_rate,
            });
        }
        Ok(())
    }

    // ---- events ----

    /// Drain events reported by the audio threads
    pub fn poll_events(&mut self) -> Vec<EngineEvent> {
        let events: Vec<EngineEvent> = self.events.try_iter().collect();
        for event in &events {
            match event {
                EngineEvent::CaptureOverflow(n) => self.capture_overflows += n,
                EngineEvent::PlaybackUnderrun => log::warn!("Looper: playback underrun"),
                EngineEvent::StreamError(e) => log::error!("Looper: stream error: {}", e),
                EngineEvent::MixerFailed(e) => log::error!("Looper: mixer failed: {}", e),
                EngineEvent::BufferMismatch {
                    block_frames,
                    device_frames,
                } => log::warn!(
                    "Looper: device buffer holds {} frames, blocks hold {}",
                    device_frames,
                    block_frames
                ),
                EngineEvent::RecordingFinished(path) => {
                    log::debug!("Looper: recording finished {:?}", path)
                }
            }
        }
        events
    }

    /// Whether `event` calls for `recover_playback` in the current state
    pub fn needs_recovery(&self, event: &EngineEvent) -> bool {
        self.state.is_playing()
            && matches!(
                event,
                EngineEvent::PlaybackUnderrun | EngineEvent::MixerFailed(_)
            )
    }

    /// Restart reader, mixer and output stream from the current audio cursor
    pub fn recover_playback(&mut self) -> Result<()> {
        if !self.state.is_playing() {
            return Ok(());
        }
        let cursor = self.cursor.get();
        log::warn!("Looper: restarting playback at cursor {}", cursor);
        let result = self
            .player
            .play(self.backend.as_ref(), &self.project, cursor);
        self.state = self.settled(self.state);
        result
    }

    // ---- queries ----

    pub fn state(&self) -> LooperState {
        self.state
    }

    pub fn audio_cursor(&self) -> usize {
        self.cursor.get()
    }

    pub fn project(&self) -> &Loop {
        &self.project
    }

    pub fn tracks(&self) -> &[Track] {
        &self.project.tracks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// File of the most recent finished take
    pub fn last_recording(&self) -> Option<&Path> {
        self.last_recording.as_deref()
    }

    /// Captured blocks dropped across all takes
    pub fn capture_overflows(&self) -> u64 {
        self.capture_overflows
    }

    // ---- loop parameters ----

    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.update_master(|fx| fx.set_volume(volume))
    }

    pub fn volume_inc(&mut self) -> Result<()> {
        self.update_master(FxSettings::volume_inc)
    }

    pub fn volume_dec(&mut self) -> Result<()> {
        self.update_master(FxSettings::volume_dec)
    }

    pub fn set_volume_percent(&mut self, percent: u8) -> Result<()> {
        self.update_master(|fx| fx.set_volume_percent(percent))
    }

    pub fn set_pan(&mut self, pan: f32) -> Result<()> {
        self.update_master(|fx| fx.set_pan(pan))
    }

    pub fn pan_inc(&mut self) -> Result<()> {
        self.update_master(FxSettings::pan_inc)
    }

    pub fn pan_dec(&mut self) -> Result<()> {
        self.update_master(FxSettings::pan_dec)
    }

    fn update_master<F>(&mut self, change: F) -> Result<()>
    where
        F: FnOnce(&mut FxSettings) -> Result<()>,
    {
        change(&mut self.project.fx)
            .inspect_err(|e| log::warn!("Looper: loop setting rejected: {}", e))?;
        self.player.set_master_gain(self.project.fx.gain());
        Ok(())
    }

    // ---- track parameters ----

    pub fn set_track_volume(&mut self, index: usize, volume: f32) -> Result<()> {
        self.update_track(index, |t| t.fx.set_volume(volume))
    }

    pub fn track_volume_inc(&mut self, index: usize) -> Result<()> {
        self.update_track(index, |t| t.fx.volume_inc())
    }

    pub fn track_volume_dec(&mut self, index: usize) -> Result<()> {
        self.update_track(index, |t| t.fx.volume_dec())
    }

    pub fn set_track_pan(&mut self, index: usize, pan: f32) -> Result<()> {
        self.update_track(index, |t| t.fx.set_pan(pan))
    }

    pub fn track_pan_inc(&mut self, index: usize) -> Result<()> {
        self.update_track(index, |t| t.fx.pan_inc())
    }

    pub fn track_pan_dec(&mut self, index: usize) -> Result<()> {
        self.update_track(index, |t| t.fx.pan_dec())
    }

    pub fn toggle_track_reverse(&mut self, index: usize) -> Result<()> {
        self.update_track(index, |t| {
            t.fx.toggle_reverse();
            Ok(())
        })
    }

    pub fn set_track_pitch_adjust(&mut self, index: usize, adjust: i32) -> Result<()> {
        self.update_track(index, |t| {
            t.set_pitch_adjust(adjust);
            Ok(())
        })
    }

    pub fn track_pitch_adjust_inc(&mut self, index: usize) -> Result<()> {
        self.update_track(index, |t| {
            t.pitch_adjust_inc();
            Ok(())
        })
    }

    pub fn track_pitch_adjust_dec(&mut self, index: usize) -> Result<()> {
        self.update_track(index, |t| {
            t.pitch_adjust_dec();
            Ok(())
        })
    }

    /// Slip changes take effect the next time playback opens the files
    pub fn set_track_slip(&mut self, index: usize, slip: usize) -> Result<()> {
        self.update_track(index, |t| {
            t.set_slip(slip);
            Ok(())
        })
    }

    pub fn set_track_slip_ms(&mut self, index: usize, slip_ms: f64) -> Result<()> {
        self.update_track(index, |t| t.set_slip_ms(slip_ms))
    }

    pub fn track_slip_inc(&mut self, index: usize) -> Result<()> {
        self.update_track(index, |t| {
            t.slip_inc();
            Ok(())
        })
    }

    pub fn track_slip_dec(&mut self, index: usize) -> Result<()> {
        self.update_track(index, |t| {
            t.slip_dec();
            Ok(())
        })
    }

    fn update_track<F>(&mut self, index: usize, change: F) -> Result<()>
    where
        F: FnOnce(&mut Track) -> Result<()>,
    {
        let track = self
            .project
            .track_mut(index)
            .inspect_err(|e| log::warn!("Looper: {}", e))?;
        change(track)
            .inspect_err(|e| log::warn!("Looper: track {} setting rejected: {}", index, e))?;
        let (path, gain) = (track.file_name.clone(), track.fx.gain());
        self.player.set_track_gain(path, gain);
        Ok(())
    }

    // ---- metronome ----

    pub fn metronome(&self) -> &Metronome {
        &self.project.met
    }

    pub fn metronome_mut(&mut self) -> &mut Metronome {
        &mut self.project.met
    }

    /// Next click relative to the live cursor, aligned to the master track's slip
    pub fn next_click(&self) -> Click {
        let slip = self.project.tracks.first().map_or(0, |t| t.fx.slip);
        self.project
            .met
            .next_click(self.cursor.get(), slip, self.config.sample_rate)
    }
}

impl Drop for Looper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::simulated::SimulatedBackend;
    use crate::model::track::fixtures;
    use std::fs;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::{Duration, Instant};

    fn test_config(dir: &Path) -> EngineConfig {
        EngineConfig {
            block_size: 64,
            player_queue_depth: 8,
            recordings_dir: dir.join("takes"),
            ..EngineConfig::default()
        }
    }

    fn looper(dir: &Path) -> Looper {
        Looper::with_backend(test_config(dir), Box::new(SimulatedBackend::default())).unwrap()
    }

    fn wait() {
        thread::sleep(Duration::from_millis(60));
    }

    fn wait_for_event(looper: &mut Looper, wanted: fn(&EngineEvent) -> bool) -> EngineEvent {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(event) = looper.poll_events().into_iter().find(wanted) {
                return event;
            }
            assert!(Instant::now() < deadline, "event never arrived");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn starving_looper(dir: &Path, track: &Path) -> Looper {
        let backend = SimulatedBackend::default();
        let starve = Arc::clone(&backend.starve_output);
        let mut looper = Looper::with_backend(test_config(dir), Box::new(backend)).unwrap();
        looper.add_track(track).unwrap();
        looper.play().unwrap();
        wait();
        starve.store(true, Ordering::Release);
        looper
    }

    #[test]
    fn test_underrun_recovers_from_audio_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let a = fixtures::write_stereo(dir.path(), "a.wav", 44100, |_| 0.2);
        let mut looper = starving_looper(dir.path(), &a);

        let event = wait_for_event(&mut looper, |e| *e == EngineEvent::PlaybackUnderrun);
        assert!(looper.needs_recovery(&event));
        let before = looper.audio_cursor();
        assert!(before > 0);

        looper.recover_playback().unwrap();
        assert_eq!(looper.state(), LooperState::Playing);
        assert!(looper.audio_cursor() >= before);
        wait();
        assert!(looper.audio_cursor() > before);

        looper.stop().unwrap();
        assert!(!looper.needs_recovery(&EngineEvent::PlaybackUnderrun));
    }

    #[test]
    fn test_failed_recovery_settles_to_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let a = fixtures::write_stereo(dir.path(), "a.wav", 44100, |_| 0.2);
        let mut looper = starving_looper(dir.path(), &a);

        let event = wait_for_event(&mut looper, |e| *e == EngineEvent::PlaybackUnderrun);
        fs::remove_file(&a).unwrap();
        assert!(looper.needs_recovery(&event));
        assert!(looper.recover_playback().is_err());
        assert_eq!(looper.state(), LooperState::Loaded);
        assert_eq!(looper.tracks().len(), 1);
        assert!(!looper.needs_recovery(&event));
    }

    #[test]
    fn test_capture_overflows_accumulate_across_takes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SimulatedBackend {
            input_burst: 200,
            ..SimulatedBackend::default()
        };
        let config = EngineConfig {
            recorder_queue_depth: 1,
            ..test_config(dir.path())
        };
        let mut looper = Looper::with_backend(config, Box::new(backend)).unwrap();

        let mut reported = 0;
        for _ in 0..2 {
            looper.record().unwrap();
            wait();
            looper.stop().unwrap();
            for event in looper.poll_events() {
                if let EngineEvent::CaptureOverflow(n) = event {
                    assert!(n > 0);
                    reported += n;
                }
            }
        }
        assert!(reported > 0);
        assert_eq!(looper.capture_overflows(), reported);
        assert_eq!(looper.tracks().len(), 2);
    }

    #[test]
    fn test_record_from_idle_then_stop_adds_one_track() {
        let dir = tempfile::tempdir().unwrap();
        let mut looper = looper(dir.path());
        assert_eq!(looper.state(), LooperState::Idle);

        looper.record().unwrap();
        assert_eq!(looper.state(), LooperState::Recording);
        wait();
        looper.stop().unwrap();

        assert_eq!(looper.state(), LooperState::Loaded);
        assert_eq!(looper.tracks().len(), 1);
        assert_eq!(looper.tracks()[0].fx.slip, 0);
        assert_eq!(looper.last_recording(), Some(looper.tracks()[0].file_name.as_path()));
        assert_eq!(looper.audio_cursor(), 0);
    }

    #[test]
    fn test_play_pause_resume_stop() {
        let dir = tempfile::tempdir().unwrap();
        let a = fixtures::write_stereo(dir.path(), "a.wav", 44100, |_| 0.2);
        let mut looper = looper(dir.path());

        looper.add_track(&a).unwrap();
        assert_eq!(looper.state(), LooperState::Loaded);

        looper.play().unwrap();
        assert_eq!(looper.state(), LooperState::Playing);
        wait();

        looper.pause().unwrap();
        assert_eq!(looper.state(), LooperState::Paused);
        let paused_at = looper.audio_cursor();
        assert!(paused_at > 0);
        assert_eq!(looper.project().audio_cursor, paused_at);

        looper.play().unwrap();
        assert_eq!(looper.state(), LooperState::Playing);
        assert!(looper.audio_cursor() >= paused_at);

        looper.stop().unwrap();
        assert_eq!(looper.state(), LooperState::Loaded);
        assert_eq!(looper.audio_cursor(), 0);
    }

    #[test]
    fn test_overdub_slip_matches_cursor_at_record() {
        let dir = tempfile::tempdir().unwrap();
        let a = fixtures::write_stereo(dir.path(), "a.wav", 44100, |_| 0.2);
        let mut looper = looper(dir.path());
        looper.add_track(&a).unwrap();

        looper.play().unwrap();
        wait();
        looper.record().unwrap();
        assert_eq!(looper.state(), LooperState::PlayingAndRecording);
        wait();
        looper.play().unwrap();
        assert_eq!(looper.state(), LooperState::Playing);

        assert_eq!(looper.tracks().len(), 2);
        let slip = looper.tracks()[1].fx.slip;
        assert!(slip > 0 && slip < 44100);
        assert_eq!(slip % 64, 0);

        looper.stop().unwrap();
        assert_eq!(looper.state(), LooperState::Loaded);
    }

    #[test]
    fn test_invalid_triggers_are_no_ops() {
        let dir = tempfile::tempdir().unwrap();
        let mut looper = looper(dir.path());

        looper.play().unwrap();
        looper.pause().unwrap();
        looper.stop().unwrap();
        assert_eq!(looper.state(), LooperState::Idle);
    }

    #[test]
    fn test_removing_last_track_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let a = fixtures::write_stereo(dir.path(), "a.wav", 1000, |_| 0.2);
        let mut looper = looper(dir.path());
        looper.add_track(&a).unwrap();

        assert!(matches!(
            looper.remove_track(dir.path().join("other.wav")),
            Err(LooperError::TrackNotFound(_))
        ));
        looper.remove_track(&a).unwrap();
        assert_eq!(looper.state(), LooperState::Idle);
        assert!(looper.tracks().is_empty());
    }

    #[test]
    fn test_sample_rate_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = fixtures::write_stereo(dir.path(), "a.wav", 1000, |_| 0.2);
        let config = EngineConfig {
            sample_rate: 48000,
            ..test_config(dir.path())
        };
        let mut looper =
            Looper::with_backend(config, Box::new(SimulatedBackend::default())).unwrap();

        assert!(matches!(
            looper.add_track(&a),
            Err(LooperError::SampleRateMismatch { track: 44100, engine: 48000, .. })
        ));
        assert_eq!(looper.state(), LooperState::Idle);
        assert!(looper.tracks().is_empty());
    }

    #[test]
    fn test_failed_record_settles_state() {
        let dir = tempfile::tempdir().unwrap();
        let a = fixtures::write_stereo(dir.path(), "a.wav", 1000, |_| 0.2);
        let backend = SimulatedBackend {
            fail_input: true,
            ..SimulatedBackend::default()
        };
        let mut looper = Looper::with_backend(test_config(dir.path()), Box::new(backend)).unwrap();
        looper.add_track(&a).unwrap();

        assert!(looper.record().is_err());
        assert_eq!(looper.state(), LooperState::Loaded);
    }

    #[test]
    fn test_hot_added_track_joins_running_loop() {
        let dir = tempfile::tempdir().unwrap();
        let a = fixtures::write_stereo(dir.path(), "a.wav", 640, |_| 0.2);
        let b = fixtures::write_stereo(dir.path(), "b.wav", 640, |_| 0.4);
        let mut looper = looper(dir.path());
        looper.add_track(&a).unwrap();
        looper.play().unwrap();

        looper.add_track(&b).unwrap();
        assert_eq!(looper.state(), LooperState::Playing);
        assert_eq!(looper.tracks().len(), 2);

        // Removing while running keeps at least one track
        looper.remove_track(&b).unwrap();
        looper.remove_track(&a).unwrap();
        assert_eq!(looper.tracks().len(), 1);
        assert_eq!(looper.state(), LooperState::Playing);

        looper.stop().unwrap();
        assert!(looper.poll_events().is_empty());
    }

    #[test]
    fn test_load_and_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let a = fixtures::write_stereo(dir.path(), "a.wav", 1000, |_| 0.2);
        let mut looper = looper(dir.path());
        looper.add_track(&a).unwrap();
        looper.set_track_volume(0, 0.5).unwrap();
        looper.metronome_mut().set_bpm(90).unwrap();

        let written = looper.write(dir.path().join("song")).unwrap();
        assert_eq!(written, dir.path().join("song.json"));

        let mut other = Looper::with_backend(
            test_config(dir.path()),
            Box::new(SimulatedBackend::default()),
        )
        .unwrap();
        other.load(&written).unwrap();
        assert_eq!(other.state(), LooperState::Loaded);
        assert_eq!(other.tracks().len(), 1);
        assert_eq!(other.tracks()[0].file_name, a);
        assert_eq!(other.tracks()[0].samples, 1000);
        assert!((other.tracks()[0].fx.volume - 0.5).abs() < 1e-6);
        assert_eq!(other.metronome().bpm, 90);

        // Loading is refused while running
        other.play().unwrap();
        other.load(dir.path().join("missing.json")).unwrap();
        assert_eq!(other.state(), LooperState::Playing);
    }

    #[test]
    fn test_parameter_errors_keep_values() {
        let dir = tempfile::tempdir().unwrap();
        let a = fixtures::write_stereo(dir.path(), "a.wav", 1000, |_| 0.2);
        let mut looper = looper(dir.path());
        looper.add_track(&a).unwrap();

        assert!(looper.set_track_volume(0, 1.5).is_err());
        assert_eq!(looper.tracks()[0].fx.volume, 1.0);
        assert!(matches!(
            looper.set_track_pan(3, 0.5),
            Err(LooperError::NoSuchTrack(3))
        ));
        assert!(looper.set_volume(-0.1).is_err());
        assert_eq!(looper.project().fx.volume, 1.0);

        looper.track_slip_inc(0).unwrap();
        assert_eq!(looper.tracks()[0].fx.slip, 44);
    }

    #[test]
    fn test_next_click_follows_master_slip() {
        let dir = tempfile::tempdir().unwrap();
        let a = fixtures::write_stereo(dir.path(), "a.wav", 1000, |_| 0.2);
        let mut looper = looper(dir.path());
        assert_eq!(looper.next_click().samples_until, 0);

        looper.add_track(&a).unwrap();
        looper.set_track_slip(0, 100).unwrap();
        // 120 bpm at 44.1 kHz: a beat every 22050 samples
        let click = looper.next_click();
        assert_eq!(click.samples_until, 21950);
        assert_eq!(click.beat, 1);
    }
}
