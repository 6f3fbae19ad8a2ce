use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::{FxSettings, Metronome, Track};
use crate::error::{LooperError, Result};

const TYPE_TAG: &str = "__type__";

/// The unit of work: an ordered set of tracks played together in a loop.
///
/// Track 0 is the master track; its end marks the end of a pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "__type__", rename = "Loop")]
pub struct Loop {
    pub file_path: Option<PathBuf>,
    pub tracks: Vec<Track>,
    pub met: Metronome,
    pub fx: FxSettings,
    /// Playback position within the current pass when last saved
    pub audio_cursor: usize,
}

impl Loop {
    /// Read a project file.
    ///
    /// The root object must carry the `Loop` discriminator.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&contents)?;
        match value.get(TYPE_TAG).and_then(|tag| tag.as_str()) {
            Some("Loop") => {}
            other => return Err(LooperError::NotALoop(other.map(str::to_string))),
        }

        let mut project: Loop = serde_json::from_value(value)?;
        project.validate()?;
        project.file_path = Some(path.to_path_buf());
        log::debug!(
            "Loaded project {:?} with {} tracks",
            path,
            project.tracks.len()
        );
        Ok(project)
    }

    /// Write the project as pretty JSON, adding a `.json` extension if missing.
    /// Returns the path actually written.
    pub fn write<P: AsRef<Path>>(&mut self, path: P) -> Result<PathBuf> {
        let mut path = path.as_ref().to_path_buf();
        let has_json_ext = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if !has_json_ext {
            let mut name = path.clone().into_os_string();
            name.push(".json");
            path = PathBuf::from(name);
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        self.file_path = Some(path.clone());
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        log::debug!("Wrote project {:?}", path);
        Ok(path)
    }

    /// Settings read from disk obey the same bounds as the setters
    pub fn validate(&self) -> Result<()> {
        self.fx.validate()?;
        self.met.validate()?;
        for track in &self.tracks {
            track.fx.validate()?;
        }
        Ok(())
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn has_tracks(&self) -> bool {
        !self.tracks.is_empty()
    }

    /// Length of a pass in frames: the master track's slip plus its length
    pub fn pass_length(&self) -> Option<usize> {
        self.tracks.first().map(|t| t.fx.slip + t.samples)
    }

    pub fn append(&mut self, track: Track) {
        self.tracks.push(track);
    }

    /// Remove the first track with this file path
    pub fn remove<P: AsRef<Path>>(&mut self, path: P) -> Option<Track> {
        let index = self.position(path)?;
        Some(self.tracks.remove(index))
    }

    pub fn position<P: AsRef<Path>>(&self, path: P) -> Option<usize> {
        let path = path.as_ref();
        self.tracks.iter().position(|t| t.file_name == path)
    }

    pub fn track_mut(&mut self, index: usize) -> Result<&mut Track> {
        self.tracks
            .get_mut(index)
            .ok_or(LooperError::NoSuchTrack(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::track::fixtures;
    use serde_json::json;

    fn sample_loop(dir: &Path) -> Loop {
        let a = fixtures::write_stereo(dir, "a.wav", 4410, |_| 0.25);
        let b = fixtures::write_stereo(dir, "b.wav", 2205, |_| -0.25);

        let mut project = Loop::default();
        let mut first = Track::from_file(a).unwrap();
        first.set_beats(4).unwrap();
        first.fx.set_volume(0.8).unwrap();
        first.fx.set_pan(0.3).unwrap();
        first.fx.pitch_adjust = -2;
        project.append(first);
        project.append(Track::from_file(b).unwrap().with_slip(1234));
        project.met.set_bpm(96).unwrap();
        project.met.set_beats(3).unwrap();
        project.met.toggle_count_in();
        project.fx.set_volume(0.7).unwrap();
        project.audio_cursor = 2048;
        project
    }

    #[test]
    fn test_write_then_load_reproduces_project() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = sample_loop(dir.path());

        let written = project.write(dir.path().join("session")).unwrap();
        assert_eq!(written, dir.path().join("session.json"));

        let loaded = Loop::load(&written).unwrap();
        assert_eq!(loaded, project);

        let mut again = loaded.clone();
        again.write(&written).unwrap();
        assert_eq!(Loop::load(&written).unwrap(), project);
    }

    #[test]
    fn test_every_object_is_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = sample_loop(dir.path());
        let path = project.write(dir.path().join("tags.json")).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value[TYPE_TAG], "Loop");
        assert_eq!(value["met"][TYPE_TAG], "Metronome");
        assert_eq!(value["fx"][TYPE_TAG], "FxSettings");
        assert_eq!(value["tracks"][0][TYPE_TAG], "Track");
        assert_eq!(value["tracks"][1]["fx"][TYPE_TAG], "FxSettings");
        assert_eq!(value["tracks"][1]["fx"]["slip"], 1234);
    }

    #[test]
    fn test_load_rejects_other_root_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.json");
        fs::write(&path, r#"{"__type__": "Metronome", "bpm": 100}"#).unwrap();
        assert!(matches!(
            Loop::load(&path),
            Err(LooperError::NotALoop(Some(ref t))) if t == "Metronome"
        ));
    }

    #[test]
    fn test_load_rejects_out_of_range_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = sample_loop(dir.path());
        let path = project.write(dir.path().join("bad.json")).unwrap();
        let good: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

        let cases: [(&str, &str, serde_json::Value); 5] = [
            ("met", "beats", json!(0)),
            ("met", "bpm", json!(0)),
            ("met", "volume", json!(7.0)),
            ("fx", "volume", json!(5.0)),
            ("fx", "pan", json!(-3.0)),
        ];
        for (object, field, bad) in cases {
            let mut value = good.clone();
            value[object][field] = bad;
            fs::write(&path, value.to_string()).unwrap();
            assert!(
                matches!(Loop::load(&path), Err(LooperError::InvalidParameter { .. })),
                "{}.{} accepted",
                object,
                field
            );
        }

        let mut value = good.clone();
        value["tracks"][1]["fx"]["volume"] = json!(2.0);
        fs::write(&path, value.to_string()).unwrap();
        assert!(matches!(
            Loop::load(&path),
            Err(LooperError::InvalidParameter { name: "volume", .. })
        ));
    }

    #[test]
    fn test_remove_first_match_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = sample_loop(dir.path());
        let dup = project.tracks[0].clone();
        project.append(dup.clone());

        let removed = project.remove(&dup.file_name).unwrap();
        assert_eq!(removed.file_name, dup.file_name);
        assert_eq!(project.track_count(), 2);
        assert_eq!(project.tracks[1].file_name, dup.file_name);
        assert!(project.remove("nope.wav").is_none());
    }

    #[test]
    fn test_pass_length_uses_master() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = sample_loop(dir.path());
        assert_eq!(project.pass_length(), Some(4410));
        project.tracks.swap(0, 1);
        assert_eq!(project.pass_length(), Some(2205 + 1234));
    }
}
