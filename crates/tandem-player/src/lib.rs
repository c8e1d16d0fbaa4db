//! Playback controller bridging an adaptive media source to a shared GPU texture.
//!
//! A [`PlaybackSession`] owns one backend media player in frame-server mode. Decoded
//! frames are copied into a texture allocated on the host graphics device and opened
//! on the decode device through a shared handle. Audio either stays with the player
//! or is routed through a separate audio graph fed by its own source instance.

pub mod async_op;
pub mod audio;
pub mod backend;
pub mod error;
pub mod gpu;
pub mod media;
pub mod playback;
pub mod settings;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use audio::{AudioPipeline, AudioRouting};
pub use error::{BackendError, ErrorCode, PlaybackError, Result};
pub use playback::types::{
    EventType, MediaDescription, PlaybackEvent, PlaybackState, StereoscopicRenderMode,
    SubtitleTrack,
};
pub use playback::{Collaborators, PlaybackSession};
pub use settings::PlayerConfig;

/// Lock a mutex, recovering the data if a notification thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
