use serde::{Deserialize, Serialize};

use crate::backend::BackendPlaybackState;
use crate::error::ErrorCode;

/// Coarse playback state exposed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    None,
    Opening,
    Buffering,
    Playing,
    Paused,
    Ended,
    Failed,
    /// Carried by texture and device events, which have no playback state.
    NotApplicable,
}

impl PlaybackState {
    /// States in which the backend is still negotiating the media.
    pub fn is_pre_open(self) -> bool {
        matches!(self, PlaybackState::None | PlaybackState::Opening)
    }
}

impl From<BackendPlaybackState> for PlaybackState {
    fn from(state: BackendPlaybackState) -> Self {
        match state {
            BackendPlaybackState::None => PlaybackState::None,
            BackendPlaybackState::Opening => PlaybackState::Opening,
            BackendPlaybackState::Buffering => PlaybackState::Buffering,
            BackendPlaybackState::Playing => PlaybackState::Playing,
            BackendPlaybackState::Paused => PlaybackState::Paused,
            BackendPlaybackState::Ended => PlaybackState::Ended,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StereoscopicRenderMode {
    #[default]
    Mono,
    Stereo,
}

/// Properties of the loaded media, captured once per load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MediaDescription {
    pub width: u32,
    /// Doubled for stereoscopic content (two eyes stacked vertically).
    pub height: u32,
    /// 100-nanosecond ticks.
    pub duration: i64,
    pub can_seek: bool,
    pub is_stereoscopic: bool,
}

impl MediaDescription {
    pub fn capture(
        width: u32,
        height: u32,
        duration: i64,
        can_seek: bool,
        mode: StereoscopicRenderMode,
    ) -> Self {
        let is_stereoscopic = mode == StereoscopicRenderMode::Stereo;
        Self {
            width,
            height: if is_stereoscopic { height.saturating_mul(2) } else { height },
            duration,
            can_seek,
            is_stereoscopic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubtitleTrack {
    pub id: String,
    pub title: String,
    pub language: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// Published by `stop()` once the player has been reset.
    None,
    Opened,
    StateChanged,
    Failed,
    NewFrameTexture,
    GraphicsDeviceShutdown,
    GraphicsDeviceReady,
}

/// Notification delivered to the host over the session's event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackEvent {
    pub event_type: EventType,
    pub state: PlaybackState,
    /// Set for `Failed` events.
    pub code: Option<ErrorCode>,
    pub description: MediaDescription,
}

impl PlaybackEvent {
    pub fn new(event_type: EventType, state: PlaybackState, description: MediaDescription) -> Self {
        Self {
            event_type,
            state,
            code: None,
            description,
        }
    }

    pub fn failed(code: ErrorCode) -> Self {
        Self {
            event_type: EventType::Failed,
            state: PlaybackState::Failed,
            code: Some(code),
            description: MediaDescription::default(),
        }
    }

    pub fn device(event_type: EventType) -> Self {
        Self::new(
            event_type,
            PlaybackState::NotApplicable,
            MediaDescription::default(),
        )
    }
}
