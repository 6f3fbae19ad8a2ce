// src/transport/state.rs
// Transport state table. `transition` is pure: it only decides the next
// state and which effects to run, the executor in `Looper` performs them.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LooperState {
    /// No tracks
    #[default]
    Idle,
    /// At least one track, nothing running
    Loaded,
    Playing,
    Recording,
    PlayingAndRecording,
    Paused,
}

impl LooperState {
    pub fn is_playing(self) -> bool {
        matches!(self, Self::Playing | Self::PlayingAndRecording)
    }

    pub fn is_recording(self) -> bool {
        matches!(self, Self::Recording | Self::PlayingAndRecording)
    }

    /// Playback or capture is active
    pub fn is_running(self) -> bool {
        self.is_playing() || self.is_recording()
    }
}

impl fmt::Display for LooperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Loaded => "LOADED",
            Self::Playing => "PLAYING",
            Self::Recording => "RECORDING",
            Self::PlayingAndRecording => "PLAYING_AND_RECORDING",
            Self::Paused => "PAUSED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Load,
    AddTrack,
    RemoveTrack,
    Record,
    Play,
    Pause,
    Stop,
}

/// Facts about the loop the executor knows before firing a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guards {
    /// The loop left behind by the trigger has tracks: the incoming loop for
    /// `Load`, the remaining tracks for `RemoveTrack`
    pub tracks_after: bool,
}

/// Side effects, run in order. Stops always come before starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Replace the engine's loop with the staged one
    InstallLoop,
    AppendTrack,
    /// Queue the appended track into the running mix
    HotAddTrack,
    RemoveTrack,
    /// Close the removed track's file in the running mix
    CloseLiveTrack,
    StartRecording,
    /// Finish the take and append it to the loop
    StopRecording,
    StartPlayback,
    StopPlayback,
    ResetCursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: LooperState,
    pub effects: &'static [Effect],
}

impl Transition {
    fn to(next: LooperState, effects: &'static [Effect]) -> Self {
        Self { next, effects }
    }

    /// The trigger has no meaning in the current state
    pub fn is_ignored(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Look up `trigger` in the transport table.
///
/// Triggers that make no sense in `state` come back as an ignored
/// transition to the same state.
pub fn transition(state: LooperState, trigger: Trigger, guards: Guards) -> Transition {
    use Effect::*;
    use LooperState::*;

    let stay = Transition::to(state, &[]);
    let loaded_or_idle = if guards.tracks_after { Loaded } else { Idle };

    match (state, trigger) {
        (Idle, Trigger::Load) | (Loaded, Trigger::Load) | (Paused, Trigger::Load) => {
            Transition::to(loaded_or_idle, &[InstallLoop])
        }
        (Idle, Trigger::AddTrack) => Transition::to(Loaded, &[AppendTrack]),
        (Idle, Trigger::Record) => Transition::to(Recording, &[StartRecording]),

        (Loaded, Trigger::AddTrack) => Transition::to(Loaded, &[AppendTrack]),
        (Loaded, Trigger::RemoveTrack) => Transition::to(loaded_or_idle, &[RemoveTrack]),
        (Loaded, Trigger::Play) => Transition::to(Playing, &[StartPlayback]),
        (Loaded, Trigger::Record) => {
            Transition::to(PlayingAndRecording, &[StartRecording, StartPlayback])
        }

        (Playing, Trigger::AddTrack) => Transition::to(Playing, &[AppendTrack, HotAddTrack]),
        (Playing, Trigger::RemoveTrack) if guards.tracks_after => {
            Transition::to(Playing, &[RemoveTrack, CloseLiveTrack])
        }
        (Playing, Trigger::Record) => Transition::to(PlayingAndRecording, &[StartRecording]),
        (Playing, Trigger::Pause) => Transition::to(Paused, &[StopPlayback]),
        (Playing, Trigger::Stop) => Transition::to(Loaded, &[StopPlayback, ResetCursor]),

        (Recording, Trigger::AddTrack) => Transition::to(Recording, &[AppendTrack]),
        (Recording, Trigger::RemoveTrack) if guards.tracks_after => {
            Transition::to(Recording, &[RemoveTrack])
        }
        (Recording, Trigger::Record) | (Recording, Trigger::Play) => {
            Transition::to(Playing, &[StopRecording, StartPlayback])
        }
        (Recording, Trigger::Pause) => Transition::to(Paused, &[StopRecording]),
        (Recording, Trigger::Stop) => Transition::to(Loaded, &[StopRecording, ResetCursor]),

        (PlayingAndRecording, Trigger::AddTrack) => {
            Transition::to(PlayingAndRecording, &[AppendTrack, HotAddTrack])
        }
        (PlayingAndRecording, Trigger::RemoveTrack) if guards.tracks_after => {
            Transition::to(PlayingAndRecording, &[RemoveTrack, CloseLiveTrack])
        }
        (PlayingAndRecording, Trigger::Record) | (PlayingAndRecording, Trigger::Play) => {
            Transition::to(Playing, &[StopRecording])
        }
        (PlayingAndRecording, Trigger::Pause) => {
            Transition::to(Paused, &[StopRecording, StopPlayback])
        }
        (PlayingAndRecording, Trigger::Stop) => {
            Transition::to(Loaded, &[StopRecording, StopPlayback, ResetCursor])
        }

        (Paused, Trigger::AddTrack) => Transition::to(Paused, &[AppendTrack]),
        (Paused, Trigger::RemoveTrack) if guards.tracks_after => {
            Transition::to(Paused, &[RemoveTrack])
        }
        (Paused, Trigger::RemoveTrack) => Transition::to(Idle, &[RemoveTrack, ResetCursor]),
        (Paused, Trigger::Play) | (Paused, Trigger::Pause) => {
            Transition::to(Playing, &[StartPlayback])
        }
        (Paused, Trigger::Record) => {
            Transition::to(PlayingAndRecording, &[StartRecording, StartPlayback])
        }
        (Paused, Trigger::Stop) => Transition::to(Loaded, &[ResetCursor]),

        _ => stay,
    }
}

/// State implied by what is actually running, used after an effect fails
pub fn settle(
    intended: LooperState,
    playing: bool,
    recording: bool,
    has_tracks: bool,
) -> LooperState {
    match (playing, recording) {
        (true, true) => LooperState::PlayingAndRecording,
        (true, false) => LooperState::Playing,
        (false, true) => LooperState::Recording,
        (false, false) if !has_tracks => LooperState::Idle,
        (false, false) if intended == LooperState::Paused => LooperState::Paused,
        (false, false) => LooperState::Loaded,
    }
}
