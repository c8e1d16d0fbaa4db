//! The playback session: one backend player, its shared textures and an optional
//! separate audio pipeline, driven by caller commands and backend notifications.
//!
//! Caller commands (`load_content`, `play`, `stop`, ...) take `&mut self` and are
//! serialized by the owner. Notifications arrive on backend threads and only touch
//! [`SessionShared`], reached through a weak reference so a late notification after
//! the session is gone is a no-op.

pub mod subscriptions;
pub mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crossbeam_channel::{Receiver, Sender};

use self::subscriptions::{EventGate, EventSubscriptionManager};
use self::types::{EventType, MediaDescription, PlaybackEvent, PlaybackState, SubtitleTrack};
use crate::audio::graph::AudioGraphBackend;
use crate::audio::{AudioInput, AudioPipeline, AudioRouting};
use crate::backend::{MediaBackend, MediaPlayer, PlaybackItem, PlayerEvent, PlayerEventHandler};
use crate::error::{BackendError, ErrorCode, PlaybackError, Result};
use crate::gpu::device::{DecodeDevice, HostDevice, HostTextureView, SharedHandle};
use crate::gpu::texture_bridge::TextureBridge;
use crate::lock;
use crate::media::access_list::AccessList;
use crate::media::resolver::{MediaSource, MediaSourceResolver};
use crate::settings::PlayerConfig;

/// Backends a session is built on.
pub struct Collaborators {
    pub media: Arc<dyn MediaBackend>,
    pub access_list: Arc<dyn AccessList>,
    /// Required when the configured routing uses a separate audio graph.
    pub audio: Option<Arc<dyn AudioGraphBackend>>,
    /// Device the player decodes on; the shared texture is opened here.
    pub decode_device: Option<Arc<dyn DecodeDevice>>,
}

#[derive(Default)]
struct SessionStatus {
    state: PlaybackState,
    description: Option<MediaDescription>,
    subtitle_tracks: Vec<SubtitleTrack>,
}

/// State reachable from backend notification threads.
struct SessionShared {
    gate: Arc<EventGate>,
    textures: TextureBridge,
    device_ready: AtomicBool,
    rebuild_textures: AtomicBool,
    status: Mutex<SessionStatus>,
    events: Sender<PlaybackEvent>,
}

impl SessionShared {
    fn publish(&self, event: PlaybackEvent) {
        // The session holds a receiver, so the channel never disconnects while we exist.
        if self.events.send(event).is_err() {
            log::trace!("Event channel closed, dropping {:?}", event.event_type);
        }
    }

    /// Route a notification from the player registered under `generation`.
    ///
    /// Handlers re-check the generation under the status lock, so a notification that
    /// passed the gate just before a teardown cannot write over the reset state.
    fn dispatch(&self, generation: u64, sender: &dyn MediaPlayer, event: &PlayerEvent) {
        let result = match event {
            PlayerEvent::MediaFailed { code, message } => {
                self.on_failed(generation, *code, message);
                Ok(())
            }
            PlayerEvent::VideoFrameAvailable => self.on_frame_available(sender),
            PlayerEvent::PlaybackStateChanged | PlayerEvent::NaturalDurationChanged => {
                self.on_state_changed(generation, sender)
            }
            PlayerEvent::NaturalVideoSizeChanged => self.on_size_changed(generation, sender),
            PlayerEvent::TimedTracksChanged => {
                self.on_tracks_changed(generation, sender);
                Ok(())
            }
        };
        if let Err(e) = result {
            log::warn!("Handling {:?} failed: {e}", event.kind());
        }
    }

    fn on_state_changed(
        &self,
        generation: u64,
        sender: &dyn MediaPlayer,
    ) -> Result<(), BackendError> {
        let state = PlaybackState::from(sender.playback_state()?);

        let mut status = lock(&self.status);
        if !self.gate.admits(generation) {
            log::trace!("Dropped {state:?} from generation {generation}");
            return Ok(());
        }
        if status.state == PlaybackState::Failed {
            log::debug!("Ignoring {state:?} after failure");
            return Ok(());
        }
        status.state = state;

        let mut opened = false;
        if !state.is_pre_open() && status.description.is_none() {
            let (width, height) = sender.natural_video_size()?;
            if width > 0 && height > 0 {
                status.description = Some(MediaDescription::capture(
                    width,
                    height,
                    sender.natural_duration(),
                    sender.can_seek(),
                    sender.stereoscopic_render_mode(),
                ));
                opened = true;
            }
        }
        let description = if state.is_pre_open() {
            MediaDescription::default()
        } else {
            status.description.unwrap_or_default()
        };

        // Published under the lock so a concurrent stop's reset event comes after.
        if opened {
            log::info!(
                "Media opened: {}x{}, duration {}, seekable {}, stereo {}",
                description.width,
                description.height,
                description.duration,
                description.can_seek,
                description.is_stereoscopic
            );
            self.publish(PlaybackEvent::new(EventType::Opened, state, description));
        }
        log::debug!("Playback state: {state:?}");
        self.publish(PlaybackEvent::new(EventType::StateChanged, state, description));
        Ok(())
    }

    fn on_size_changed(
        &self,
        generation: u64,
        sender: &dyn MediaPlayer,
    ) -> Result<(), BackendError> {
        let (width, height) = sender.natural_video_size()?;
        if width == 0 || height == 0 {
            return Ok(());
        }
        let _status = lock(&self.status);
        if !self.gate.admits(generation) {
            return Ok(());
        }
        // The set is released now; the render thread rebuilds it at the new size.
        self.textures.release_textures();
        self.rebuild_textures.store(true, Ordering::Release);
        log::debug!("Natural video size changed to {width}x{height}");
        Ok(())
    }

    fn on_failed(&self, generation: u64, code: ErrorCode, message: &str) {
        let mut status = lock(&self.status);
        if !self.gate.admits(generation) {
            return;
        }
        log::error!("Playback failed {code}: {message}");
        status.state = PlaybackState::Failed;
        self.publish(PlaybackEvent::failed(code));
    }

    fn on_frame_available(&self, sender: &dyn MediaPlayer) -> Result<(), BackendError> {
        if !self.device_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        self.textures.copy_frame(sender)?;
        Ok(())
    }

    fn on_tracks_changed(&self, generation: u64, sender: &dyn MediaPlayer) {
        let tracks = sender.subtitle_tracks();
        let mut status = lock(&self.status);
        if self.gate.admits(generation) {
            log::debug!("{} subtitle tracks available", tracks.len());
            status.subtitle_tracks = tracks;
        }
    }
}

/// Playback controller for one host.
pub struct PlaybackSession {
    config: PlayerConfig,
    backend: Arc<dyn MediaBackend>,
    audio_backend: Option<Arc<dyn AudioGraphBackend>>,
    resolver: MediaSourceResolver,
    decode_device: Option<Arc<dyn DecodeDevice>>,
    host_device: Option<Arc<dyn HostDevice>>,

    player: Option<Arc<dyn MediaPlayer>>,
    subscriptions: EventSubscriptionManager,
    source: Option<MediaSource>,
    item: Option<PlaybackItem>,
    audio: Option<AudioPipeline>,
    initialized: bool,

    shared: Arc<SessionShared>,
    events: Receiver<PlaybackEvent>,
}

impl PlaybackSession {
    pub fn new(config: PlayerConfig, collaborators: Collaborators) -> Self {
        let gate = Arc::new(EventGate::new());
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(SessionShared {
            gate: gate.clone(),
            textures: TextureBridge::new(),
            device_ready: AtomicBool::new(false),
            rebuild_textures: AtomicBool::new(false),
            status: Mutex::new(SessionStatus::default()),
            events: tx,
        });
        let resolver =
            MediaSourceResolver::new(collaborators.media.clone(), collaborators.access_list);

        Self {
            config,
            backend: collaborators.media,
            audio_backend: collaborators.audio,
            resolver,
            decode_device: collaborators.decode_device,
            host_device: None,
            player: None,
            subscriptions: EventSubscriptionManager::new(gate),
            source: None,
            item: None,
            audio: None,
            initialized: false,
            shared,
            events: rx,
        }
    }

    /// Create the backend player and attach to its notifications.
    pub fn initialize(&mut self) -> Result<()> {
        if self.player.is_some() {
            return Ok(());
        }
        if self.config.audio_routing.uses_graph() && self.audio_backend.is_none() {
            return Err(PlaybackError::IllegalState(
                "separate audio routing requires an audio graph backend",
            ));
        }
        self.create_media_player()?;
        self.initialized = true;
        log::info!(
            "Playback session initialized (audio: {})",
            self.config.audio_routing.display_name()
        );
        Ok(())
    }

    /// Resolve `url` and hand it to the player. Any current content is stopped first.
    pub fn load_content(&mut self, url: &str) -> Result<()> {
        if self.player.is_none() {
            return Err(PlaybackError::NotInitialized);
        }
        log::info!("Loading {url}");

        if self.item.is_some() || self.player.as_ref().is_some_and(|p| p.source().is_some()) {
            self.stop()?;
        }
        let player = self.player.clone().ok_or(PlaybackError::NotInitialized)?;

        {
            let mut status = lock(&self.shared.status);
            status.subtitle_tracks.clear();
            status.description = None;
            status.state = PlaybackState::None;
        }

        let source = self.resolver.resolve(url)?;
        let audio = self.build_audio(url, player.as_ref())?;
        let item = self.backend.create_playback_item(&source)?;
        player.set_source(Some(item.clone()))?;

        self.source = Some(source);
        self.item = Some(item);
        self.audio = audio;
        Ok(())
    }

    fn build_audio(&self, url: &str, player: &dyn MediaPlayer) -> Result<Option<AudioPipeline>> {
        let routing = self.config.audio_routing;
        if !routing.uses_graph() {
            return Ok(None);
        }
        let backend = self
            .audio_backend
            .as_deref()
            .ok_or(PlaybackError::IllegalState("no audio graph backend"))?;

        player.set_volume(0.0);
        let gate = self.shared.gate.clone();
        let pipeline = match &self.config.audio_file_input {
            Some(path) => AudioPipeline::build(backend, routing, AudioInput::File(path), gate)?,
            None => {
                let audio_source = self.resolver.resolve(url)?;
                AudioPipeline::build(backend, routing, AudioInput::Source(&audio_source), gate)?
            }
        };
        Ok(Some(pipeline))
    }

    pub fn play(&mut self) -> Result<()> {
        let player = self
            .player
            .as_ref()
            .ok_or(PlaybackError::IllegalState("no media player"))?;
        player.play()?;
        if let Some(audio) = &self.audio {
            audio.play()?;
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        let player = self
            .player
            .as_ref()
            .ok_or(PlaybackError::IllegalState("no media player"))?;
        player.pause()?;
        if let Some(audio) = &self.audio {
            audio.pause()?;
        }
        Ok(())
    }

    /// Tear down current content and return to a fresh player.
    ///
    /// Notifications are gated off for the whole teardown.
    pub fn stop(&mut self) -> Result<()> {
        if !self.initialized || self.is_idle() {
            return Ok(());
        }
        log::info!("Stopping playback");
        let gate = self.shared.gate.clone();
        gate.close();

        let had_player = self.player.is_some();
        if let Some(player) = &self.player {
            if let Err(e) = player.set_source(None) {
                log::warn!("Failed to detach source: {e}");
            }
        }
        self.item = None;
        self.source = None;
        lock(&self.shared.status).subtitle_tracks.clear();

        if let Some(mut audio) = self.audio.take() {
            audio.shutdown();
        }

        self.release_media_player();
        let recreated = self.create_media_player();

        {
            let mut status = lock(&self.shared.status);
            self.shared.textures.release_textures();
            self.shared.rebuild_textures.store(false, Ordering::Release);
            status.state = PlaybackState::None;
            status.description = None;
        }
        if had_player {
            self.shared.publish(PlaybackEvent::new(
                EventType::None,
                PlaybackState::None,
                MediaDescription::default(),
            ));
        }

        gate.open();
        recreated
    }

    fn is_idle(&self) -> bool {
        self.player.is_some()
            && self.item.is_none()
            && self.audio.is_none()
            && self.shared.textures.members_present() == 0
            && self.state() == PlaybackState::None
    }

    fn create_media_player(&mut self) -> Result<()> {
        let player = self.backend.create_player()?;
        player.set_auto_play(false);

        let generation = self.shared.gate.advance();
        let shared: Weak<SessionShared> = Arc::downgrade(&self.shared);
        let handler: PlayerEventHandler =
            Arc::new(move |sender: &dyn MediaPlayer, event: &PlayerEvent| {
                if let Some(shared) = shared.upgrade() {
                    shared.dispatch(generation, sender, event);
                }
            });
        self.subscriptions.subscribe_player(&player, handler)?;

        if self.config.frame_server {
            if let Err(e) = player.set_frame_server_enabled(true) {
                self.subscriptions.unsubscribe_all();
                return Err(e.into());
            }
        }
        self.player = Some(player);
        log::debug!("Media player created (generation {})", self.shared.gate.generation());
        Ok(())
    }

    fn release_media_player(&mut self) {
        self.subscriptions.unsubscribe_all();
        if let Some(player) = self.player.take() {
            if player.source().is_some() {
                if let Err(e) = player.set_source(None) {
                    log::warn!("Failed to detach source on release: {e}");
                }
            }
            log::debug!("Media player released");
        }
    }

    /// Build the shared texture set at the current natural video size.
    pub fn create_playback_textures(&mut self) -> Result<MediaDescription> {
        let (width, height) = self.shared.textures.create_playback_textures(
            self.host_device.as_deref(),
            self.decode_device.as_deref(),
            self.player.as_deref(),
        )?;
        let player = self
            .player
            .as_ref()
            .ok_or(PlaybackError::IllegalState("no media player"))?;
        let description = MediaDescription {
            width,
            height,
            duration: player.natural_duration(),
            can_seek: player.can_seek(),
            is_stereoscopic: false,
        };
        self.shared.publish(PlaybackEvent::new(
            EventType::NewFrameTexture,
            PlaybackState::NotApplicable,
            description,
        ));
        Ok(description)
    }

    pub fn release_textures(&mut self) {
        self.shared.textures.release_textures();
    }

    /// Run deferred work on the render thread. Returns whether textures were rebuilt.
    pub fn render_tick(&mut self) -> Result<bool> {
        if !self.shared.rebuild_textures.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        if !self.shared.device_ready.load(Ordering::Acquire) {
            // Keep the request until a device is available.
            self.shared.rebuild_textures.store(true, Ordering::Release);
            return Ok(false);
        }
        self.create_playback_textures()?;
        Ok(true)
    }

    /// The host graphics device became available.
    pub fn on_graphics_device_ready(&mut self, host: Arc<dyn HostDevice>) {
        self.host_device = Some(host);
        self.shared.device_ready.store(true, Ordering::Release);
        if self.shared.textures.members_present() == 0 && self.media_description().is_some() {
            self.shared.rebuild_textures.store(true, Ordering::Release);
        }
        log::info!("Graphics device ready");
        self.shared
            .publish(PlaybackEvent::device(EventType::GraphicsDeviceReady));
    }

    /// The host graphics device is going away; nothing may reference it afterwards.
    pub fn on_graphics_device_shutdown(&mut self) {
        self.shared.device_ready.store(false, Ordering::Release);
        self.shared.textures.release_textures();
        self.host_device = None;
        log::info!("Graphics device shut down");
        self.shared
            .publish(PlaybackEvent::device(EventType::GraphicsDeviceShutdown));
    }

    /// Receiver for session events. Every clone competes for the same events.
    pub fn events(&self) -> Receiver<PlaybackEvent> {
        self.events.clone()
    }

    pub fn state(&self) -> PlaybackState {
        lock(&self.shared.status).state
    }

    pub fn media_description(&self) -> Option<MediaDescription> {
        lock(&self.shared.status).description
    }

    pub fn subtitle_tracks(&self) -> Vec<SubtitleTrack> {
        lock(&self.shared.status).subtitle_tracks.clone()
    }

    pub fn is_ready_for_frames(&self) -> bool {
        self.shared.textures.is_ready_for_frames()
    }

    pub fn texture_members(&self) -> usize {
        self.shared.textures.members_present()
    }

    pub fn shared_handle(&self) -> Option<SharedHandle> {
        self.shared.textures.shared_handle()
    }

    pub fn host_view(&self) -> Option<HostTextureView> {
        self.shared.textures.host_view()
    }

    pub fn audio(&self) -> Option<&AudioPipeline> {
        self.audio.as_ref()
    }

    pub fn audio_routing(&self) -> AudioRouting {
        self.config.audio_routing
    }

    pub fn source(&self) -> Option<&MediaSource> {
        self.source.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn generation(&self) -> u64 {
        self.shared.gate.generation()
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.shared.gate.close();
        if let Some(mut audio) = self.audio.take() {
            audio.shutdown();
        }
        self.item = None;
        self.source = None;
        self.release_media_player();
        self.shared.textures.release_textures();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PlayerEventKind;
    use crate::backend::sim::{SimAudioBackend, SimBackend, SimGpu, SimMedia};
    use crate::media::access_list::FutureAccessList;

    const MANIFEST: &str = "https://cdn.example/show/master.m3u8";
    const CLIP: &str = "https://cdn.example/clip.mp4";

    struct Rig {
        session: PlaybackSession,
        backend: Arc<SimBackend>,
        gpu: SimGpu,
        audio: Arc<SimAudioBackend>,
        events: Receiver<PlaybackEvent>,
    }

    fn rig(config: PlayerConfig) -> Rig {
        let backend = SimBackend::new();
        backend.register(MANIFEST, SimMedia::manifest(1920, 1080));
        backend.register(CLIP, SimMedia::progressive(1280, 720));
        let gpu = SimGpu::new();
        let audio = SimAudioBackend::new();
        let session = PlaybackSession::new(
            config,
            Collaborators {
                media: backend.clone(),
                access_list: Arc::new(FutureAccessList::in_memory()),
                audio: Some(audio.clone()),
                decode_device: Some(gpu.decode.clone()),
            },
        );
        let events = session.events();
        Rig {
            session,
            backend,
            gpu,
            audio,
            events,
        }
    }

    fn started(config: PlayerConfig) -> Rig {
        let mut r = rig(config);
        r.session.initialize().unwrap();
        r
    }

    fn drain(rx: &Receiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
        rx.try_iter().collect()
    }

    fn state_changes(events: &[PlaybackEvent]) -> Vec<PlaybackState> {
        let mut states: Vec<PlaybackState> = events
            .iter()
            .filter(|e| e.event_type == EventType::StateChanged)
            .map(|e| e.state)
            .collect();
        states.dedup();
        states
    }

    #[test]
    fn commands_before_initialize_fail() {
        let mut r = rig(PlayerConfig::default());
        let err = r.session.load_content(CLIP).unwrap_err();
        assert!(matches!(err, PlaybackError::NotInitialized));
        assert_eq!(err.code(), ErrorCode::UNEXPECTED);
        assert!(matches!(r.session.play(), Err(PlaybackError::IllegalState(_))));
        assert!(matches!(r.session.pause(), Err(PlaybackError::IllegalState(_))));
        assert!(r.session.stop().is_ok());
        assert_eq!(r.backend.players_created(), 0);
    }

    #[test]
    fn initialize_configures_player() {
        let r = started(PlayerConfig::default());
        let player = r.backend.latest_player().unwrap();
        assert!(!player.auto_play());
        assert!(player.frame_server_enabled());
        assert_eq!(player.subscription_count(), PlayerEventKind::ALL.len());
        assert!(r.session.is_initialized());
    }

    #[test]
    fn initialize_propagates_player_creation_failure() {
        let mut r = rig(PlayerConfig::default());
        r.backend.fail_player_creation(true);
        assert!(matches!(
            r.session.initialize(),
            Err(PlaybackError::BackendFailure { .. })
        ));
        assert!(!r.session.is_initialized());
    }

    #[test]
    fn separate_routing_requires_audio_backend() {
        let backend = SimBackend::new();
        let mut session = PlaybackSession::new(
            PlayerConfig {
                audio_routing: AudioRouting::SeparateGraphToSoundCard,
                ..PlayerConfig::default()
            },
            Collaborators {
                media: backend.clone(),
                access_list: Arc::new(FutureAccessList::in_memory()),
                audio: None,
                decode_device: None,
            },
        );
        assert!(matches!(
            session.initialize(),
            Err(PlaybackError::IllegalState(_))
        ));
        assert_eq!(backend.players_created(), 0);
    }

    #[test]
    fn manifest_load_and_play_reports_states() {
        let mut r = started(PlayerConfig::default());
        r.session.load_content(MANIFEST).unwrap();
        r.session.play().unwrap();

        let events = drain(&r.events);
        assert_eq!(
            state_changes(&events),
            vec![
                PlaybackState::Opening,
                PlaybackState::Buffering,
                PlaybackState::Playing
            ]
        );

        let opened: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::Opened)
            .collect();
        assert_eq!(opened.len(), 1);
        let d = opened[0].description;
        assert_eq!((d.width, d.height), (1920, 1080));
        assert!(d.can_seek);
        assert!(!d.is_stereoscopic);

        assert_eq!(r.session.state(), PlaybackState::Playing);
        assert_eq!(r.session.media_description(), Some(d));
        assert!(r.session.source().unwrap().is_adaptive());
    }

    #[test]
    fn opening_events_carry_empty_description() {
        let mut r = started(PlayerConfig::default());
        r.session.load_content(CLIP).unwrap();
        let events = drain(&r.events);
        let opening = events
            .iter()
            .find(|e| e.state == PlaybackState::Opening)
            .unwrap();
        assert_eq!(opening.description, MediaDescription::default());
    }

    #[test]
    fn stereo_content_doubles_reported_height() {
        let mut r = started(PlayerConfig::default());
        let url = "https://cdn.example/vr.mp4";
        r.backend
            .register(url, SimMedia::progressive(1920, 1080).stereo());
        r.session.load_content(url).unwrap();
        r.session.play().unwrap();
        let d = r.session.media_description().unwrap();
        assert_eq!(d.height, 2160);
        assert!(d.is_stereoscopic);
    }

    #[test]
    fn textures_follow_size_changes() {
        let mut r = started(PlayerConfig::default());
        r.session.on_graphics_device_ready(r.gpu.host.clone());
        r.session.load_content(MANIFEST).unwrap();
        drain(&r.events);

        assert!(r.session.render_tick().unwrap());
        assert_eq!(r.session.texture_members(), 5);
        assert!(r.session.is_ready_for_frames());
        let texture_event = drain(&r.events)
            .into_iter()
            .find(|e| e.event_type == EventType::NewFrameTexture)
            .unwrap();
        assert_eq!(texture_event.state, PlaybackState::NotApplicable);
        assert_eq!(texture_event.description.width, 1920);
        assert_eq!(texture_event.description.height, 1080);
        assert!(!r.session.render_tick().unwrap());

        let player = r.backend.latest_player().unwrap();
        player.set_natural_size(1280, 720);
        assert_eq!(r.session.texture_members(), 0);
        assert!(!r.session.is_ready_for_frames());

        assert!(r.session.render_tick().unwrap());
        assert_eq!(r.session.texture_members(), 5);
        let rebuilt = drain(&r.events)
            .into_iter()
            .find(|e| e.event_type == EventType::NewFrameTexture)
            .unwrap();
        assert_eq!(
            (rebuilt.description.width, rebuilt.description.height),
            (1280, 720)
        );
    }

    #[test]
    fn rejected_texture_request_drops_current_set() {
        let mut r = started(PlayerConfig::default());
        r.session.on_graphics_device_ready(r.gpu.host.clone());
        r.session.load_content(CLIP).unwrap();
        assert!(r.session.render_tick().unwrap());
        assert_eq!(r.session.texture_members(), 5);

        let player = r.backend.latest_player().unwrap();
        player.set_natural_size(0, 0);
        assert!(matches!(
            r.session.create_playback_textures(),
            Err(PlaybackError::NotReady(_))
        ));
        assert_eq!(r.session.texture_members(), 0);
        assert!(!r.session.is_ready_for_frames());
        assert_eq!(r.gpu.live_allocations(), 0);
    }

    #[test]
    fn zero_size_change_keeps_textures() {
        let mut r = started(PlayerConfig::default());
        r.session.on_graphics_device_ready(r.gpu.host.clone());
        r.session.load_content(CLIP).unwrap();
        r.session.render_tick().unwrap();
        let handle = r.session.shared_handle();

        r.backend.latest_player().unwrap().set_natural_size(0, 0);
        assert!(!r.session.render_tick().unwrap());
        assert_eq!(r.session.texture_members(), 5);
        assert_eq!(r.session.shared_handle(), handle);
    }

    #[test]
    fn rebuild_waits_for_device() {
        let mut r = started(PlayerConfig::default());
        r.session.load_content(CLIP).unwrap();
        assert!(!r.session.render_tick().unwrap());
        assert_eq!(r.session.texture_members(), 0);

        r.session.on_graphics_device_ready(r.gpu.host.clone());
        assert!(r.session.render_tick().unwrap());
        assert_eq!(r.session.texture_members(), 5);
    }

    #[test]
    fn create_textures_without_device_is_illegal() {
        let mut r = started(PlayerConfig::default());
        r.session.load_content(CLIP).unwrap();
        assert!(matches!(
            r.session.create_playback_textures(),
            Err(PlaybackError::IllegalState(_))
        ));
    }

    #[test]
    fn frames_are_copied_only_when_ready() {
        let mut r = started(PlayerConfig::default());
        r.session.load_content(CLIP).unwrap();
        let player = r.backend.latest_player().unwrap();

        player.emit_frame();
        assert_eq!(player.frames_copied(), 0);

        r.session.on_graphics_device_ready(r.gpu.host.clone());
        player.emit_frame();
        assert_eq!(player.frames_copied(), 0);

        r.session.render_tick().unwrap();
        player.emit_frame();
        player.emit_frame();
        assert_eq!(player.frames_copied(), 2);

        r.session.on_graphics_device_shutdown();
        player.emit_frame();
        assert_eq!(player.frames_copied(), 2);
    }

    #[test]
    fn device_events_are_published() {
        let mut r = started(PlayerConfig::default());
        r.session.on_graphics_device_ready(r.gpu.host.clone());
        r.session.load_content(CLIP).unwrap();
        r.session.render_tick().unwrap();
        r.session.on_graphics_device_shutdown();

        assert_eq!(r.session.texture_members(), 0);
        assert_eq!(r.gpu.live_allocations(), 0);
        let kinds: Vec<EventType> = drain(&r.events).iter().map(|e| e.event_type).collect();
        assert_eq!(kinds.first(), Some(&EventType::GraphicsDeviceReady));
        assert_eq!(kinds.last(), Some(&EventType::GraphicsDeviceShutdown));
    }

    #[test]
    fn failure_is_published_and_sticky() {
        let mut r = started(PlayerConfig::default());
        r.session.load_content(CLIP).unwrap();
        drain(&r.events);

        let player = r.backend.latest_player().unwrap();
        player.emit_failed(ErrorCode(0x80000001), "decoder error");
        assert_eq!(r.session.state(), PlaybackState::Failed);
        let failed = drain(&r.events);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].event_type, EventType::Failed);
        assert_eq!(failed[0].code, Some(ErrorCode(0x80000001)));

        r.session.play().unwrap();
        assert_eq!(r.session.state(), PlaybackState::Failed);
        assert!(state_changes(&drain(&r.events)).is_empty());
    }

    #[test]
    fn new_load_clears_failure() {
        let mut r = started(PlayerConfig::default());
        r.session.load_content(CLIP).unwrap();
        r.backend
            .latest_player()
            .unwrap()
            .emit_failed(ErrorCode::FAIL, "network");
        assert_eq!(r.session.state(), PlaybackState::Failed);

        r.session.load_content(MANIFEST).unwrap();
        r.session.play().unwrap();
        assert_eq!(r.session.state(), PlaybackState::Playing);
    }

    #[test]
    fn stop_resets_to_fresh_player() {
        let mut r = started(PlayerConfig::default());
        r.session.on_graphics_device_ready(r.gpu.host.clone());
        r.session.load_content(MANIFEST).unwrap();
        r.session.play().unwrap();
        r.session.render_tick().unwrap();
        let old = r.backend.latest_player().unwrap();
        old.set_tracks(vec![SubtitleTrack {
            id: "1".into(),
            title: "English".into(),
            language: "en".into(),
        }]);
        assert_eq!(r.session.subtitle_tracks().len(), 1);
        drain(&r.events);

        r.session.stop().unwrap();

        assert_eq!(r.session.state(), PlaybackState::None);
        assert_eq!(r.session.texture_members(), 0);
        assert!(!r.session.is_ready_for_frames());
        assert!(r.session.subtitle_tracks().is_empty());
        assert!(r.session.media_description().is_none());
        assert!(r.session.source().is_none());
        assert_eq!(r.gpu.live_allocations(), 0);

        assert_eq!(r.backend.players_created(), 2);
        assert_eq!(old.subscription_count(), 0);
        let fresh = r.backend.latest_player().unwrap();
        assert_eq!(fresh.subscription_count(), PlayerEventKind::ALL.len());
        assert!(fresh.source().is_none());

        let events = drain(&r.events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::None);
        assert_eq!(events[0].state, PlaybackState::None);
    }

    #[test]
    fn stop_when_idle_is_a_no_op() {
        let mut r = started(PlayerConfig::default());
        r.session.stop().unwrap();
        r.session.stop().unwrap();
        assert_eq!(r.backend.players_created(), 1);
        assert!(drain(&r.events).is_empty());
    }

    #[test]
    fn in_flight_callbacks_from_replaced_player_are_dropped() {
        let mut r = started(PlayerConfig::default());
        r.session.load_content(CLIP).unwrap();
        let old = r.backend.latest_player().unwrap();
        let stale_failed = old.handlers_for(PlayerEventKind::MediaFailed);
        let stale_state = old.handlers_for(PlayerEventKind::PlaybackStateChanged);

        r.session.stop().unwrap();
        r.session.load_content(MANIFEST).unwrap();
        r.session.play().unwrap();
        drain(&r.events);

        let event = PlayerEvent::MediaFailed {
            code: ErrorCode(0x80000001),
            message: "late".into(),
        };
        for h in &stale_failed {
            h(old.as_ref(), &event);
        }
        for h in &stale_state {
            h(old.as_ref(), &PlayerEvent::PlaybackStateChanged);
        }
        assert_eq!(r.session.state(), PlaybackState::Playing);
        assert!(drain(&r.events).is_empty());
    }

    #[test]
    fn admitted_callback_cannot_overwrite_reset_state() {
        let mut r = started(PlayerConfig::default());
        r.session.load_content(CLIP).unwrap();
        let old = r.backend.latest_player().unwrap();
        let old_generation = r.session.generation();
        r.session.stop().unwrap();
        drain(&r.events);

        // Handlers that cleared the entry check before stop closed the gate.
        let shared = r.session.shared.clone();
        let failed = PlayerEvent::MediaFailed {
            code: ErrorCode(0x80000001),
            message: "late".into(),
        };
        shared.dispatch(old_generation, old.as_ref(), &failed);
        old.set_natural_size(1920, 1080);
        shared.dispatch(old_generation, old.as_ref(), &PlayerEvent::NaturalVideoSizeChanged);
        old.set_tracks(vec![SubtitleTrack {
            id: "cc1".into(),
            title: "Late".into(),
            language: "en".into(),
        }]);
        shared.dispatch(old_generation, old.as_ref(), &PlayerEvent::TimedTracksChanged);

        assert_eq!(r.session.state(), PlaybackState::None);
        assert!(r.session.subtitle_tracks().is_empty());
        assert!(!shared.rebuild_textures.load(Ordering::Acquire));
        assert!(drain(&r.events).is_empty());

        shared.dispatch(r.session.generation(), old.as_ref(), &failed);
        assert_eq!(r.session.state(), PlaybackState::Failed);
    }

    #[test]
    fn failure_during_teardown_is_dropped() {
        let mut r = started(PlayerConfig::default());
        r.session.load_content(CLIP).unwrap();
        drain(&r.events);

        let old = r.backend.latest_player().unwrap();
        old.fail_on_detach(ErrorCode(0x80000001), "torn down");
        r.session.stop().unwrap();

        let events = drain(&r.events);
        assert!(events.iter().all(|e| e.event_type != EventType::Failed));
        assert_eq!(r.session.state(), PlaybackState::None);

        let fresh = r.backend.latest_player().unwrap();
        fresh.emit_failed(ErrorCode(0x80000001), "after teardown");
        let events = drain(&r.events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, Some(ErrorCode(0x80000001)));
    }

    #[test]
    fn reload_stops_previous_content() {
        let mut r = started(PlayerConfig::default());
        r.session.load_content(CLIP).unwrap();
        r.session.load_content(MANIFEST).unwrap();
        assert_eq!(r.backend.players_created(), 2);
        let events = drain(&r.events);
        assert!(events.iter().any(|e| e.event_type == EventType::None));
        assert_eq!(
            r.backend.latest_player().unwrap().source().unwrap().source_uri(),
            MANIFEST
        );
    }

    #[test]
    fn ungranted_local_file_is_not_found() {
        let mut r = started(PlayerConfig::default());
        match r.session.load_content("file-access:///clip.mp4") {
            Err(PlaybackError::NotFound(token)) => assert_eq!(token, "clip.mp4"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(r.backend.latest_player().unwrap().source().is_none());
        assert!(r.session.subtitle_tracks().is_empty());
        assert_eq!(r.session.state(), PlaybackState::None);
    }

    #[test]
    fn subtitle_tracks_are_replaced_wholesale() {
        let mut r = started(PlayerConfig::default());
        r.session.load_content(CLIP).unwrap();
        let player = r.backend.latest_player().unwrap();
        let track = |id: &str| SubtitleTrack {
            id: id.into(),
            title: format!("Track {id}"),
            language: "en".into(),
        };

        player.set_tracks(vec![track("1"), track("2")]);
        assert_eq!(r.session.subtitle_tracks().len(), 2);
        player.set_tracks(vec![track("3")]);
        let tracks = r.session.subtitle_tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, "3");
    }

    #[test]
    fn separate_audio_graph_follows_transport() {
        let mut r = started(PlayerConfig {
            audio_routing: AudioRouting::SeparateGraphToSoundCard,
            ..PlayerConfig::default()
        });
        r.session.load_content(CLIP).unwrap();
        let player = r.backend.latest_player().unwrap();
        assert_eq!(player.volume(), 0.0);
        assert!(r.session.audio().is_some());

        let graph = r.audio.latest_graph().unwrap();
        r.session.play().unwrap();
        assert!(graph.is_running());
        assert_eq!(graph.start_order(), vec!["input", "device-output", "graph"]);
        r.session.pause().unwrap();
        assert!(!graph.is_running());

        r.session.stop().unwrap();
        assert!(r.session.audio().is_none());
        assert_eq!(graph.quantum_subscriptions(), 0);
    }

    #[test]
    fn audio_graph_gets_its_own_source_instance() {
        let mut r = started(PlayerConfig {
            audio_routing: AudioRouting::SeparateGraphToFrameSink,
            ..PlayerConfig::default()
        });
        r.session.load_content(CLIP).unwrap();
        // Each source instance serves one consumer; a shared one would be rejected.
        assert_eq!(r.backend.sources_created(), 2);
        r.session.play().unwrap();
        r.audio.latest_graph().unwrap().render_quantum();

        let audio = r.session.audio().unwrap();
        assert_eq!(audio.quanta_processed(), 1);
        let mut buf = vec![0.0f32; 2048];
        assert!(audio.read_frames(&mut buf) > 0);
    }

    #[test]
    fn audio_file_input_skips_second_source() {
        let mut r = started(PlayerConfig {
            audio_routing: AudioRouting::SeparateGraphToSoundCard,
            audio_file_input: Some(std::path::PathBuf::from("/music/bed.wav")),
            ..PlayerConfig::default()
        });
        r.session.load_content(CLIP).unwrap();
        assert_eq!(r.backend.sources_created(), 1);
        assert_eq!(
            r.audio.latest_graph().unwrap().input_label().as_deref(),
            Some("file:/music/bed.wav")
        );
    }

    #[test]
    fn audio_failure_aborts_load() {
        let mut r = started(PlayerConfig {
            audio_routing: AudioRouting::SeparateGraphToSoundCard,
            ..PlayerConfig::default()
        });
        r.audio.inject(crate::backend::sim::AudioFault::DeviceOutput(
            crate::async_op::CreationStatus::DeviceNotAvailable,
        ));
        assert!(r.session.load_content(CLIP).is_err());
        assert!(r.session.audio().is_none());
        assert!(r.backend.latest_player().unwrap().source().is_none());
    }

    #[test]
    fn dropping_session_detaches_player() {
        let r = started(PlayerConfig::default());
        let player = r.backend.latest_player().unwrap();
        drop(r.session);
        assert_eq!(player.subscription_count(), 0);
    }
}
