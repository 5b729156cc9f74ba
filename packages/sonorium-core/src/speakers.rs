//! Network speaker capabilities consumed by the core.
//!
//! Concrete device protocols (Chromecast, Sonos, UPnP/DLNA, AirPlay) live
//! outside the core; sessions only see these traits. The topology trait
//! supplies the floors → areas → speakers hierarchy that speaker
//! selections are resolved against.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::session::SpeakerSelection;

/// Speaker id reserved for local sound-card playback.
pub const LOCAL_SPEAKER_ID: &str = "local";

/// Media control over a set of network speakers.
///
/// Implementations apply their own per-operation timeouts per device and
/// report per-speaker success; a failing speaker never fails the session.
#[async_trait]
pub trait MediaControl: Send + Sync {
    /// Starts `stream_url` on every speaker; returns per-speaker success.
    async fn play_media_multi(
        &self,
        speakers: &[String],
        stream_url: &str,
    ) -> HashMap<String, bool>;

    /// Stops playback on every speaker.
    async fn stop_multi(&self, speakers: &[String]);

    /// Pauses playback on every speaker.
    async fn pause_multi(&self, speakers: &[String]);

    /// Sets the volume on every speaker, `level` in [0, 1].
    async fn set_volume_multi(&self, speakers: &[String], level: f32);
}

/// The external floors → areas → speakers hierarchy.
pub trait SpeakerTopology: Send + Sync {
    fn floor_name(&self, floor_id: &str) -> String;
    fn area_name(&self, area_id: &str) -> String;
    fn speaker_name(&self, speaker_id: &str) -> String;
    fn speakers_on_floor(&self, floor_id: &str) -> Vec<String>;
    fn speakers_in_area(&self, area_id: &str) -> Vec<String>;
}

/// Resolves a selection to a sorted speaker list: union of the includes
/// minus the union of the excludes.
pub fn resolve_selection(
    topology: &dyn SpeakerTopology,
    selection: &SpeakerSelection,
) -> Vec<String> {
    let mut speakers: HashSet<String> = HashSet::new();

    for floor_id in &selection.include_floors {
        speakers.extend(topology.speakers_on_floor(floor_id));
    }
    for area_id in &selection.include_areas {
        speakers.extend(topology.speakers_in_area(area_id));
    }
    speakers.extend(selection.include_speakers.iter().cloned());

    for area_id in &selection.exclude_areas {
        for speaker in topology.speakers_in_area(area_id) {
            speakers.remove(&speaker);
        }
    }
    for speaker in &selection.exclude_speakers {
        speakers.remove(speaker);
    }

    let mut resolved: Vec<String> = speakers.into_iter().collect();
    resolved.sort();
    resolved
}

/// A media controller that logs instead of talking to devices.
///
/// Used by the headless server until a real protocol adapter is wired in,
/// and by tests.
#[derive(Debug, Default)]
pub struct NullMediaControl;

#[async_trait]
impl MediaControl for NullMediaControl {
    async fn play_media_multi(
        &self,
        speakers: &[String],
        stream_url: &str,
    ) -> HashMap<String, bool> {
        log::info!(
            "[Speakers] play {} on {} speaker(s)",
            stream_url,
            speakers.len()
        );
        speakers.iter().map(|s| (s.clone(), true)).collect()
    }

    async fn stop_multi(&self, speakers: &[String]) {
        log::info!("[Speakers] stop on {} speaker(s)", speakers.len());
    }

    async fn pause_multi(&self, speakers: &[String]) {
        log::info!("[Speakers] pause on {} speaker(s)", speakers.len());
    }

    async fn set_volume_multi(&self, speakers: &[String], level: f32) {
        log::info!(
            "[Speakers] volume {:.2} on {} speaker(s)",
            level,
            speakers.len()
        );
    }
}

/// An in-memory topology built from explicit floor/area/speaker tables.
#[derive(Debug, Default)]
pub struct StaticTopology {
    floors: HashMap<String, String>,
    areas: HashMap<String, String>,
    speakers: HashMap<String, String>,
    floor_areas: HashMap<String, Vec<String>>,
    area_speakers: HashMap<String, Vec<String>>,
}

impl StaticTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_floor(&mut self, id: &str, name: &str) {
        self.floors.insert(id.into(), name.into());
    }

    pub fn add_area(&mut self, id: &str, name: &str, floor_id: &str) {
        self.areas.insert(id.into(), name.into());
        self.floor_areas
            .entry(floor_id.into())
            .or_default()
            .push(id.into());
    }

    pub fn add_speaker(&mut self, id: &str, name: &str, area_id: &str) {
        self.speakers.insert(id.into(), name.into());
        self.area_speakers
            .entry(area_id.into())
            .or_default()
            .push(id.into());
    }
}

impl SpeakerTopology for StaticTopology {
    fn floor_name(&self, floor_id: &str) -> String {
        self.floors
            .get(floor_id)
            .cloned()
            .unwrap_or_else(|| floor_id.to_string())
    }

    fn area_name(&self, area_id: &str) -> String {
        self.areas
            .get(area_id)
            .cloned()
            .unwrap_or_else(|| area_id.to_string())
    }

    fn speaker_name(&self, speaker_id: &str) -> String {
        self.speakers
            .get(speaker_id)
            .cloned()
            .unwrap_or_else(|| speaker_id.to_string())
    }

    fn speakers_on_floor(&self, floor_id: &str) -> Vec<String> {
        self.floor_areas
            .get(floor_id)
            .map(|areas| {
                areas
                    .iter()
                    .flat_map(|area| self.speakers_in_area(area))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn speakers_in_area(&self, area_id: &str) -> Vec<String> {
        self.area_speakers.get(area_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) fn test_topology() -> StaticTopology {
    let mut topology = StaticTopology::new();
    topology.add_floor("floor_1", "Ground Floor");
    topology.add_area("kitchen", "Kitchen", "floor_1");
    topology.add_area("living", "Living Room", "floor_1");
    topology.add_floor("floor_2", "Upstairs");
    topology.add_area("bedroom", "Bedroom", "floor_2");
    topology.add_speaker("sp_kitchen", "Kitchen Echo", "kitchen");
    topology.add_speaker("sp_living_l", "Living Left", "living");
    topology.add_speaker("sp_living_r", "Living Right", "living");
    topology.add_speaker("sp_bedroom", "Bedroom Sonos", "bedroom");
    topology
}
