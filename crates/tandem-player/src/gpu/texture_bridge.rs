//! Shared texture set spanning the host and decode devices.
//!
//! One BGRA8 texture is allocated on the host device with the shared flag, exported
//! through an OS handle and opened on the decode device. The player copies frames into
//! the decode-side surface and the renderer samples the host-side view. The set is
//! built all-or-nothing and released as a unit.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::device::{
    DecodeDevice, DecodeSurface, DecodeTexture, HostDevice, HostTexture, HostTextureView,
    SharedHandle, TextureDesc,
};
use crate::backend::MediaPlayer;
use crate::error::{BackendError, PlaybackError, Result};
use crate::lock;

/// Number of resources a complete set holds.
pub const SET_MEMBERS: usize = 5;

/// A complete shared texture set.
///
/// Field order is the release order: decode-side objects go before the host texture
/// they alias.
pub struct SharedTextureSet {
    decode_surface: DecodeSurface,
    decode_texture: DecodeTexture,
    shared_handle: SharedHandle,
    host_view: HostTextureView,
    host_texture: HostTexture,
}

impl SharedTextureSet {
    fn build(
        host: &dyn HostDevice,
        decode: &dyn DecodeDevice,
        width: u32,
        height: u32,
    ) -> Result<Self, BackendError> {
        let desc = TextureDesc::shared_color_target(width, height);
        let host_texture = host.create_texture(&desc)?;
        let host_view = host.create_shader_resource_view(&host_texture)?;
        let shared_handle = host.shared_handle(&host_texture)?;
        let decode_texture = decode.open_shared_texture(shared_handle)?;
        let decode_surface = decode.surface_from_texture(&decode_texture)?;
        Ok(Self {
            decode_surface,
            decode_texture,
            shared_handle,
            host_view,
            host_texture,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.host_texture.desc.width, self.host_texture.desc.height)
    }

    pub fn shared_handle(&self) -> SharedHandle {
        self.shared_handle
    }

    pub fn host_view(&self) -> &HostTextureView {
        &self.host_view
    }

    pub fn decode_surface(&self) -> &DecodeSurface {
        &self.decode_surface
    }

    pub fn decode_texture(&self) -> &DecodeTexture {
        &self.decode_texture
    }
}

/// Owns the shared set and the ready-for-frames flag the frame callback checks.
pub struct TextureBridge {
    set: Mutex<Option<SharedTextureSet>>,
    ready_for_frames: AtomicBool,
}

impl TextureBridge {
    pub fn new() -> Self {
        Self {
            set: Mutex::new(None),
            ready_for_frames: AtomicBool::new(false),
        }
    }

    /// Build a fresh set sized to the player's current natural video size.
    ///
    /// Any previous set is released first, even when the request is rejected. Returns
    /// the dimensions of the new set.
    pub fn create_playback_textures(
        &self,
        host: Option<&dyn HostDevice>,
        decode: Option<&dyn DecodeDevice>,
        player: Option<&dyn MediaPlayer>,
    ) -> Result<(u32, u32)> {
        self.release_textures();

        let host = host.ok_or(PlaybackError::IllegalState("no host graphics device"))?;
        let player = player.ok_or(PlaybackError::IllegalState("no media player"))?;
        let decode = decode.ok_or(PlaybackError::IllegalState("no decode device"))?;

        let (width, height) = player.natural_video_size()?;
        if width == 0 || height == 0 {
            return Err(PlaybackError::NotReady("natural video size is not known yet"));
        }

        let set = SharedTextureSet::build(host, decode, width, height).map_err(|e| {
            log::warn!("Shared texture creation failed at {width}x{height}: {e}");
            e
        })?;
        *lock(&self.set) = Some(set);
        self.ready_for_frames.store(true, Ordering::Release);

        log::info!("Shared playback textures created: {width}x{height}");
        Ok((width, height))
    }

    /// Drop every member of the set. Safe to call when nothing is held.
    pub fn release_textures(&self) {
        self.ready_for_frames.store(false, Ordering::Release);
        if lock(&self.set).take().is_some() {
            log::debug!("Shared playback textures released");
        }
    }

    /// Ask the player to copy its current frame into the decode-side surface.
    ///
    /// Returns `Ok(false)` when no set is ready.
    pub fn copy_frame(&self, player: &dyn MediaPlayer) -> Result<bool, BackendError> {
        if !self.is_ready_for_frames() {
            return Ok(false);
        }
        let guard = lock(&self.set);
        match guard.as_ref() {
            Some(set) => {
                player.copy_frame_to_surface(set.decode_surface())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_ready_for_frames(&self) -> bool {
        self.ready_for_frames.load(Ordering::Acquire)
    }

    /// Count of held resources: zero or a full set.
    pub fn members_present(&self) -> usize {
        if lock(&self.set).is_some() { SET_MEMBERS } else { 0 }
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        lock(&self.set).as_ref().map(SharedTextureSet::dimensions)
    }

    pub fn shared_handle(&self) -> Option<SharedHandle> {
        lock(&self.set).as_ref().map(SharedTextureSet::shared_handle)
    }

    /// View the renderer binds to sample the current frame.
    pub fn host_view(&self) -> Option<HostTextureView> {
        lock(&self.set).as_ref().map(|s| s.host_view().clone())
    }
}

impl Default for TextureBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim::{GpuStep, SimGpu, SimPlayer};

    fn player_with_size(width: u32, height: u32) -> std::sync::Arc<SimPlayer> {
        let player = SimPlayer::new(1);
        player.set_natural_size(width, height);
        player
    }

    #[test]
    fn creates_full_set() {
        let gpu = SimGpu::new();
        let player = player_with_size(1920, 1080);
        let bridge = TextureBridge::new();

        let dims = bridge
            .create_playback_textures(
                Some(gpu.host.as_ref()),
                Some(gpu.decode.as_ref()),
                Some(player.as_ref()),
            )
            .unwrap();
        assert_eq!(dims, (1920, 1080));
        assert!(bridge.is_ready_for_frames());
        assert_eq!(bridge.members_present(), SET_MEMBERS);
        assert!(bridge.shared_handle().is_some());
        assert!(gpu.live_allocations() > 0);

        bridge.release_textures();
        assert!(!bridge.is_ready_for_frames());
        assert_eq!(bridge.members_present(), 0);
        assert_eq!(gpu.live_allocations(), 0);
    }

    #[test]
    fn missing_collaborators_are_illegal_state() {
        let gpu = SimGpu::new();
        let player = player_with_size(640, 360);
        let bridge = TextureBridge::new();

        let no_host = bridge.create_playback_textures(
            None,
            Some(gpu.decode.as_ref()),
            Some(player.as_ref()),
        );
        assert!(matches!(no_host, Err(PlaybackError::IllegalState(_))));

        let no_player =
            bridge.create_playback_textures(Some(gpu.host.as_ref()), Some(gpu.decode.as_ref()), None);
        assert!(matches!(no_player, Err(PlaybackError::IllegalState(_))));
        assert_eq!(bridge.members_present(), 0);
    }

    #[test]
    fn zero_size_is_not_ready() {
        let gpu = SimGpu::new();
        let player = player_with_size(0, 0);
        let bridge = TextureBridge::new();
        let r = bridge.create_playback_textures(
            Some(gpu.host.as_ref()),
            Some(gpu.decode.as_ref()),
            Some(player.as_ref()),
        );
        assert!(matches!(r, Err(PlaybackError::NotReady(_))));
        assert!(!bridge.is_ready_for_frames());
    }

    #[test]
    fn rejected_request_releases_previous_set() {
        let gpu = SimGpu::new();
        let player = player_with_size(1280, 720);
        let bridge = TextureBridge::new();
        let host = Some(gpu.host.as_ref() as &dyn HostDevice);
        let decode = Some(gpu.decode.as_ref() as &dyn DecodeDevice);

        bridge
            .create_playback_textures(host, decode, Some(player.as_ref()))
            .unwrap();
        assert_eq!(bridge.members_present(), SET_MEMBERS);

        player.set_natural_size(0, 0);
        let r = bridge.create_playback_textures(host, decode, Some(player.as_ref()));
        assert!(matches!(r, Err(PlaybackError::NotReady(_))));
        assert_eq!(bridge.members_present(), 0);
        assert!(!bridge.is_ready_for_frames());
        assert_eq!(gpu.live_allocations(), 0);

        player.set_natural_size(1280, 720);
        bridge
            .create_playback_textures(host, decode, Some(player.as_ref()))
            .unwrap();
        let r = bridge.create_playback_textures(None, decode, Some(player.as_ref()));
        assert!(matches!(r, Err(PlaybackError::IllegalState(_))));
        assert_eq!(bridge.members_present(), 0);
        assert_eq!(gpu.live_allocations(), 0);
    }

    #[test]
    fn failure_at_any_step_leaves_nothing_allocated() {
        for step in GpuStep::ALL {
            let gpu = SimGpu::new();
            let player = player_with_size(1280, 720);
            let bridge = TextureBridge::new();
            gpu.fail_next(*step);

            let r = bridge.create_playback_textures(
                Some(gpu.host.as_ref()),
                Some(gpu.decode.as_ref()),
                Some(player.as_ref()),
            );
            assert!(r.is_err(), "{step:?} should fail");
            assert_eq!(bridge.members_present(), 0, "{step:?}");
            assert!(!bridge.is_ready_for_frames(), "{step:?}");
            assert_eq!(gpu.live_allocations(), 0, "{step:?} leaked");
        }
    }

    #[test]
    fn recreate_replaces_previous_set() {
        let gpu = SimGpu::new();
        let player = player_with_size(1280, 720);
        let bridge = TextureBridge::new();
        let host = Some(gpu.host.as_ref() as &dyn HostDevice);
        let decode = Some(gpu.decode.as_ref() as &dyn DecodeDevice);

        bridge
            .create_playback_textures(host, decode, Some(player.as_ref()))
            .unwrap();
        let first = bridge.shared_handle().unwrap();
        let live = gpu.live_allocations();

        player.set_natural_size(1920, 1080);
        bridge
            .create_playback_textures(host, decode, Some(player.as_ref()))
            .unwrap();
        assert_ne!(bridge.shared_handle().unwrap(), first);
        assert_eq!(bridge.dimensions(), Some((1920, 1080)));
        assert_eq!(gpu.live_allocations(), live);
    }

    #[test]
    fn copy_frame_requires_ready_set() {
        let gpu = SimGpu::new();
        let player = player_with_size(640, 360);
        let bridge = TextureBridge::new();
        assert!(!bridge.copy_frame(player.as_ref()).unwrap());

        bridge
            .create_playback_textures(
                Some(gpu.host.as_ref()),
                Some(gpu.decode.as_ref()),
                Some(player.as_ref()),
            )
            .unwrap();
        assert!(bridge.copy_frame(player.as_ref()).unwrap());
        assert_eq!(player.frames_copied(), 1);
    }
}
