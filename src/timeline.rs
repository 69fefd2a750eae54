//! C7 — TimelineBinder: reconciles mixer channels with the timeline's
//! audio track set.
//!
//! Grounded on `timeline_audio_manager.hpp`'s `sync_tracks`/
//! `TimelineAudioChannel`/`TimelineAudioStats`: this module carries the same
//! per-channel bookkeeping (mute/solo/gain/pan mirrored from the bound
//! mixer channel, plus aggregate stats) as additive detail, per
//! SPEC_FULL.md §C — it does not add any new audible feature, only richer
//! reconciliation bookkeeping.

use std::collections::HashMap;

use crate::mixer::Mixer;

/// Per-channel state mirrored from the bound mixer channel, per
/// SPEC_FULL.md §C (`timeline_audio_manager.hpp`'s `TimelineAudioChannel`
/// carries these alongside the bare track-id reconciliation).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimelineAudioChannel {
    pub track_id: TrackId,
    pub pipeline_channel_id: u32,
    pub track_name: String,
    pub gain_db: f32,
    pub pan: f32,
    pub is_muted: bool,
    pub is_solo: bool,
}

pub type TrackId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
    Other,
}

#[derive(Debug, Clone)]
pub struct TimelineTrack {
    pub track_id: TrackId,
    pub kind: TrackKind,
    pub name: String,
}

/// Read-only view of the timeline's current track list, as handed to the
/// binder whenever the timeline's version counter changes.
#[derive(Debug, Clone, Default)]
pub struct TimelineSnapshot {
    pub tracks: Vec<TimelineTrack>,
}

impl TimelineSnapshot {
    pub fn audio_tracks(&self) -> impl Iterator<Item = &TimelineTrack> {
        self.tracks.iter().filter(|t| t.kind == TrackKind::Audio)
    }
}

#[derive(Debug, Clone)]
struct BoundChannel {
    pipeline_channel_id: u32,
    track_name: String,
}

/// Additive bookkeeping beyond bare track-id reconciliation, per
/// SPEC_FULL.md §C (`timeline_audio_manager.hpp`'s `TimelineAudioStats`):
/// `frames_mixed`/`segments_processed`/`decode_errors` are running counters
/// the embedder updates as it feeds timeline-bound channels, not values the
/// binder derives on its own from `sync()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimelineAudioStats {
    pub active_tracks: u32,
    pub total_tracks: u32,
    pub frames_mixed: u64,
    pub segments_processed: u64,
    pub decode_errors: u64,
}

/// Keeps mixer channels consistent with the timeline's audio track list as
/// tracks appear, disappear, or are renamed. Never touches the audio
/// callback: it only takes the mixer's channel-table lock briefly, the same
/// lock ordinary control-surface calls (`set_channel_gain`, etc) take.
pub struct TimelineBinder {
    bound: HashMap<TrackId, BoundChannel>,
    frames_mixed: u64,
    segments_processed: u64,
    decode_errors: u64,
}

impl TimelineBinder {
    pub fn new() -> Self {
        Self {
            bound: HashMap::new(),
            frames_mixed: 0,
            segments_processed: 0,
            decode_errors: 0,
        }
    }

    /// Records that `count` frames from a timeline-bound channel were
    /// handed to the mixer, and one more timeline segment was processed.
    /// Called by the embedder's decode loop, not by `sync()` itself.
    pub fn record_segment_mixed(&mut self, frame_count: u64) {
        self.frames_mixed += frame_count;
        self.segments_processed += 1;
    }

    pub fn record_decode_error(&mut self) {
        self.decode_errors += 1;
    }

    pub fn bound_channel_count(&self) -> usize {
        self.bound.len()
    }

    /// Reconciles `mixer`'s channel table against `snapshot`:
    /// 1. Channels whose track no longer exists are removed.
    /// 2. New audio tracks get a fresh channel at 0 dB / center pan.
    /// 3. Channels whose track survived but was renamed are updated in
    ///    place (same channel id).
    pub fn sync(&mut self, mixer: &Mixer, snapshot: &TimelineSnapshot) -> TimelineAudioStats {
        let present: HashMap<TrackId, &TimelineTrack> =
            snapshot.audio_tracks().map(|t| (t.track_id, t)).collect();

        let vanished: Vec<TrackId> = self
            .bound
            .keys()
            .filter(|id| !present.contains_key(id))
            .copied()
            .collect();
        for track_id in vanished {
            if let Some(bound) = self.bound.remove(&track_id) {
                mixer.remove_channel(bound.pipeline_channel_id);
            }
        }

        for (track_id, track) in &present {
            match self.bound.get_mut(track_id) {
                Some(bound) if bound.track_name != track.name => {
                    let _ = mixer.set_channel_name(bound.pipeline_channel_id, track.name.clone());
                    bound.track_name = track.name.clone();
                }
                Some(_) => {}
                None => {
                    let channel_id = mixer.add_channel(track.name.clone(), 0.0, 0.0);
                    if channel_id != 0 {
                        self.bound.insert(
                            *track_id,
                            BoundChannel {
                                pipeline_channel_id: channel_id,
                                track_name: track.name.clone(),
                            },
                        );
                    }
                }
            }
        }

        TimelineAudioStats {
            active_tracks: self.bound.len() as u32,
            total_tracks: snapshot.tracks.len() as u32,
            frames_mixed: self.frames_mixed,
            segments_processed: self.segments_processed,
            decode_errors: self.decode_errors,
        }
    }

    pub fn stats(&self) -> TimelineAudioStats {
        TimelineAudioStats {
            active_tracks: self.bound.len() as u32,
            total_tracks: 0,
            frames_mixed: self.frames_mixed,
            segments_processed: self.segments_processed,
            decode_errors: self.decode_errors,
        }
    }

    pub fn channel_for_track(&self, track_id: TrackId) -> Option<u32> {
        self.bound.get(&track_id).map(|b| b.pipeline_channel_id)
    }

    /// Mirrors the bound mixer channel's current mute/solo/gain/pan into a
    /// `TimelineAudioChannel`. Queried live against `mixer` rather than
    /// cached, since control-surface calls (`set_channel_gain`, etc.) go
    /// straight to the mixer and never pass through the binder.
    pub fn channel(&self, track_id: TrackId, mixer: &Mixer) -> Option<TimelineAudioChannel> {
        let bound = self.bound.get(&track_id)?;
        let snap = mixer.channel_snapshot(bound.pipeline_channel_id)?;
        Some(TimelineAudioChannel {
            track_id,
            pipeline_channel_id: snap.id,
            track_name: bound.track_name.clone(),
            gain_db: snap.gain_db,
            pan: snap.pan,
            is_muted: snap.muted,
            is_solo: snap.solo,
        })
    }
}

impl Default for TimelineBinder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MixerConfig;
    use crate::frame::SampleFormat;

    fn mixer() -> Mixer {
        Mixer::new(MixerConfig::new(48_000, 2, SampleFormat::Float32).unwrap().with_max_channels(32))
    }

    fn snapshot(tracks: &[(TrackId, &str)]) -> TimelineSnapshot {
        TimelineSnapshot {
            tracks: tracks
                .iter()
                .map(|(id, name)| TimelineTrack {
                    track_id: *id,
                    kind: TrackKind::Audio,
                    name: name.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn adds_channel_for_new_track() {
        let mixer = mixer();
        let mut binder = TimelineBinder::new();
        let stats = binder.sync(&mixer, &snapshot(&[(1, "Dialogue")]));
        assert_eq!(stats.active_tracks, 1);
        assert_eq!(mixer.channel_count(), 1);
    }

    #[test]
    fn removes_channel_for_vanished_track() {
        let mixer = mixer();
        let mut binder = TimelineBinder::new();
        binder.sync(&mixer, &snapshot(&[(1, "Dialogue")]));
        let stats = binder.sync(&mixer, &snapshot(&[]));
        assert_eq!(stats.active_tracks, 0);
        assert_eq!(mixer.channel_count(), 0);
    }

    #[test]
    fn ignores_non_audio_tracks() {
        let mixer = mixer();
        let mut binder = TimelineBinder::new();
        let mut snap = snapshot(&[(1, "Video")]);
        snap.tracks[0].kind = TrackKind::Video;
        let stats = binder.sync(&mixer, &snap);
        assert_eq!(stats.active_tracks, 0);
        assert_eq!(mixer.channel_count(), 0);
    }

    #[test]
    fn records_mixed_segments_and_decode_errors() {
        let mixer = mixer();
        let mut binder = TimelineBinder::new();
        binder.sync(&mixer, &snapshot(&[(1, "Dialogue")]));
        binder.record_segment_mixed(512);
        binder.record_segment_mixed(512);
        binder.record_decode_error();
        let stats = binder.stats();
        assert_eq!(stats.frames_mixed, 1024);
        assert_eq!(stats.segments_processed, 2);
        assert_eq!(stats.decode_errors, 1);
    }

    #[test]
    fn channel_mirrors_live_mute_and_gain_from_the_mixer() {
        let mixer = mixer();
        let mut binder = TimelineBinder::new();
        binder.sync(&mixer, &snapshot(&[(1, "Dialogue")]));
        let id = binder.channel_for_track(1).unwrap();
        mixer.set_channel_gain(id, -6.0).unwrap();
        mixer.set_channel_mute(id, true).unwrap();

        let ch = binder.channel(1, &mixer).unwrap();
        assert_eq!(ch.track_name, "Dialogue");
        assert!((ch.gain_db - -6.0).abs() < 1e-6);
        assert!(ch.is_muted);
        assert!(!ch.is_solo);
    }

    #[test]
    fn renames_channel_in_place_without_changing_id() {
        let mixer = mixer();
        let mut binder = TimelineBinder::new();
        binder.sync(&mixer, &snapshot(&[(1, "Dialogue")]));
        let id_before = binder.channel_for_track(1);
        binder.sync(&mixer, &snapshot(&[(1, "Dialogue (renamed)")]));
        let id_after = binder.channel_for_track(1);
        assert_eq!(id_before, id_after);
    }
}
