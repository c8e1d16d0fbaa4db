//! Contracts for the platform media backend.
//!
//! The controller never talks to a decode pipeline directly. It consumes these
//! traits: a factory for sources, playback items and players, and a player that
//! reports state through subscribe/unsubscribe-by-token notifications delivered on
//! backend-owned threads.

pub mod sim;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::async_op::{AsyncOperation, CreationResult};
use crate::error::{BackendError, ErrorCode};
use crate::gpu::device::DecodeSurface;
use crate::media::access_list::StorageFile;
use crate::media::resolver::MediaSource;
use crate::playback::types::{StereoscopicRenderMode, SubtitleTrack};

/// Reference to an object owned by a backend. Backends downcast to their own types.
#[derive(Clone)]
pub struct BackendObject(Arc<dyn Any + Send + Sync>);

impl BackendObject {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Whether both references point at the same backend object.
    pub fn same_object(&self, other: &BackendObject) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for BackendObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BackendObject(..)")
    }
}

/// Token returned by a subscribe call, needed to detach the handler again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(pub u64);

/// Playback state as the backend player reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendPlaybackState {
    None,
    Opening,
    Buffering,
    Playing,
    Paused,
    Ended,
}

/// Notifications a player can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerEventKind {
    MediaFailed,
    VideoFrameAvailable,
    PlaybackStateChanged,
    NaturalVideoSizeChanged,
    NaturalDurationChanged,
    TimedTracksChanged,
}

impl PlayerEventKind {
    pub const ALL: &[PlayerEventKind] = &[
        PlayerEventKind::MediaFailed,
        PlayerEventKind::VideoFrameAvailable,
        PlayerEventKind::PlaybackStateChanged,
        PlayerEventKind::NaturalVideoSizeChanged,
        PlayerEventKind::NaturalDurationChanged,
        PlayerEventKind::TimedTracksChanged,
    ];
}

/// Payload of a player notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    MediaFailed { code: ErrorCode, message: String },
    VideoFrameAvailable,
    PlaybackStateChanged,
    NaturalVideoSizeChanged,
    NaturalDurationChanged,
    TimedTracksChanged,
}

impl PlayerEvent {
    pub fn kind(&self) -> PlayerEventKind {
        match self {
            PlayerEvent::MediaFailed { .. } => PlayerEventKind::MediaFailed,
            PlayerEvent::VideoFrameAvailable => PlayerEventKind::VideoFrameAvailable,
            PlayerEvent::PlaybackStateChanged => PlayerEventKind::PlaybackStateChanged,
            PlayerEvent::NaturalVideoSizeChanged => PlayerEventKind::NaturalVideoSizeChanged,
            PlayerEvent::NaturalDurationChanged => PlayerEventKind::NaturalDurationChanged,
            PlayerEvent::TimedTracksChanged => PlayerEventKind::TimedTracksChanged,
        }
    }
}

/// Handler invoked with the sending player and the notification.
pub type PlayerEventHandler = Arc<dyn Fn(&dyn MediaPlayer, &PlayerEvent) + Send + Sync>;

/// A resolved source wrapped for presentation by a player.
#[derive(Debug, Clone)]
pub struct PlaybackItem {
    source_uri: String,
    object: BackendObject,
}

impl PlaybackItem {
    pub fn new(source_uri: impl Into<String>, object: BackendObject) -> Self {
        Self {
            source_uri: source_uri.into(),
            object,
        }
    }

    pub fn source_uri(&self) -> &str {
        &self.source_uri
    }

    pub fn object(&self) -> &BackendObject {
        &self.object
    }
}

/// Backend player in frame-server mode.
pub trait MediaPlayer: Send + Sync {
    fn set_auto_play(&self, enabled: bool);
    fn set_volume(&self, volume: f64);
    fn set_frame_server_enabled(&self, enabled: bool) -> Result<(), BackendError>;

    fn source(&self) -> Option<PlaybackItem>;
    fn set_source(&self, item: Option<PlaybackItem>) -> Result<(), BackendError>;

    fn play(&self) -> Result<(), BackendError>;
    fn pause(&self) -> Result<(), BackendError>;

    fn playback_state(&self) -> Result<BackendPlaybackState, BackendError>;
    fn natural_video_size(&self) -> Result<(u32, u32), BackendError>;
    fn natural_duration(&self) -> i64;
    fn can_seek(&self) -> bool;
    fn stereoscopic_render_mode(&self) -> StereoscopicRenderMode;
    fn subtitle_tracks(&self) -> Vec<SubtitleTrack>;

    /// Copy the next decoded frame into a surface on the decode device.
    fn copy_frame_to_surface(&self, surface: &DecodeSurface) -> Result<(), BackendError>;

    fn subscribe(
        &self,
        kind: PlayerEventKind,
        handler: PlayerEventHandler,
    ) -> Result<SubscriptionToken, BackendError>;
    fn unsubscribe(
        &self,
        kind: PlayerEventKind,
        token: SubscriptionToken,
    ) -> Result<(), BackendError>;
}

/// Factory side of the media backend.
pub trait MediaBackend: Send + Sync {
    fn create_player(&self) -> Result<Arc<dyn MediaPlayer>, BackendError>;

    /// Negotiate an adaptive-streaming manifest. Completes on a backend thread.
    fn create_adaptive_source(&self, uri: &str) -> AsyncOperation<CreationResult<BackendObject>>;
    fn source_from_adaptive(&self, adaptive: &BackendObject) -> Result<BackendObject, BackendError>;
    fn source_from_uri(&self, uri: &str) -> Result<BackendObject, BackendError>;
    fn source_from_file(&self, file: &StorageFile) -> Result<BackendObject, BackendError>;

    fn create_playback_item(&self, source: &MediaSource) -> Result<PlaybackItem, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_object_identity() {
        let a = BackendObject::new(5u32);
        let b = a.clone();
        let c = BackendObject::new(5u32);
        assert!(a.same_object(&b));
        assert!(!a.same_object(&c));
        assert_eq!(a.downcast_ref::<u32>(), Some(&5));
        assert!(a.downcast_ref::<String>().is_none());
    }

    #[test]
    fn event_kinds_match_payloads() {
        let failed = PlayerEvent::MediaFailed {
            code: ErrorCode::FAIL,
            message: String::new(),
        };
        assert_eq!(failed.kind(), PlayerEventKind::MediaFailed);
        assert_eq!(
            PlayerEvent::NaturalDurationChanged.kind(),
            PlayerEventKind::NaturalDurationChanged
        );
        assert_eq!(PlayerEventKind::ALL.len(), 6);
    }
}
