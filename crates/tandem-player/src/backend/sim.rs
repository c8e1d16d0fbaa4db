//! In-process simulated backends.
//!
//! Used by the demo binary and the test suite. The simulated player delivers its
//! notifications synchronously on the calling thread, after releasing its own locks,
//! the same way a real backend calls back without holding internal state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{
    BackendObject, BackendPlaybackState, MediaBackend, MediaPlayer, PlaybackItem, PlayerEvent,
    PlayerEventHandler, PlayerEventKind, SubscriptionToken,
};
use crate::async_op::{AsyncOperation, CreationResult, CreationStatus};
use crate::audio::graph::{
    AudioEncoding, AudioFrameOutputNode, AudioGraph, AudioGraphBackend, AudioGraphSettings,
    AudioInputNode, AudioNode, QuantumHandler,
};
use crate::audio::ring::SampleRing;
use crate::error::{BackendError, ErrorCode};
use crate::gpu::device::{
    DecodeDevice, DecodeSurface, DecodeTexture, HostDevice, HostTexture, HostTextureView,
    SharedHandle, TextureDesc,
};
use crate::lock;
use crate::media::access_list::StorageFile;
use crate::media::resolver::MediaSource;
use crate::playback::types::{StereoscopicRenderMode, SubtitleTrack};

/// Code reported when the simulated player is handed something it cannot decode.
pub const UNSUPPORTED_BYTESTREAM: ErrorCode = ErrorCode(0xC00D_36C4);

/// Properties of a piece of simulated media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimMedia {
    pub width: u32,
    pub height: u32,
    pub duration: i64,
    pub can_seek: bool,
    pub stereo: bool,
    pub adaptive: bool,
    pub tracks: Vec<SubtitleTrack>,
}

impl SimMedia {
    /// An adaptive-streaming manifest. Ten minutes long.
    pub fn manifest(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            duration: 6_000_000_000,
            can_seek: true,
            stereo: false,
            adaptive: true,
            tracks: Vec::new(),
        }
    }

    /// A single progressive file. One minute long.
    pub fn progressive(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            duration: 600_000_000,
            can_seek: true,
            stereo: false,
            adaptive: false,
            tracks: Vec::new(),
        }
    }

    pub fn stereo(mut self) -> Self {
        self.stereo = true;
        self
    }

    pub fn with_tracks(mut self, tracks: Vec<SubtitleTrack>) -> Self {
        self.tracks = tracks;
        self
    }
}

struct SimAdaptive {
    uri: String,
    media: SimMedia,
}

/// A source instance. Claimed by the first consumer that uses it.
struct SimSource {
    uri: String,
    media: SimMedia,
    claimed: AtomicBool,
}

impl SimSource {
    fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::SeqCst)
    }
}

/// Simulated media backend with a catalog of known URIs.
pub struct SimBackend {
    catalog: Mutex<HashMap<String, SimMedia>>,
    players: Mutex<Vec<Arc<SimPlayer>>>,
    fail_player_creation: AtomicBool,
    sources_created: AtomicUsize,
    next_player_id: AtomicU64,
}

impl SimBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            catalog: Mutex::new(HashMap::new()),
            players: Mutex::new(Vec::new()),
            fail_player_creation: AtomicBool::new(false),
            sources_created: AtomicUsize::new(0),
            next_player_id: AtomicU64::new(1),
        })
    }

    /// Register media under a URI or a local file path.
    pub fn register(&self, key: impl Into<String>, media: SimMedia) {
        lock(&self.catalog).insert(key.into(), media);
    }

    pub fn fail_player_creation(&self, fail: bool) {
        self.fail_player_creation.store(fail, Ordering::SeqCst);
    }

    pub fn latest_player(&self) -> Option<Arc<SimPlayer>> {
        lock(&self.players).last().cloned()
    }

    pub fn players_created(&self) -> usize {
        lock(&self.players).len()
    }

    pub fn sources_created(&self) -> usize {
        self.sources_created.load(Ordering::SeqCst)
    }

    fn lookup(&self, key: &str) -> SimMedia {
        lock(&self.catalog)
            .get(key)
            .cloned()
            .unwrap_or_else(|| SimMedia::progressive(1280, 720))
    }

    fn new_source(&self, uri: &str, media: SimMedia) -> BackendObject {
        self.sources_created.fetch_add(1, Ordering::SeqCst);
        BackendObject::new(SimSource {
            uri: uri.to_string(),
            media,
            claimed: AtomicBool::new(false),
        })
    }
}

impl MediaBackend for SimBackend {
    fn create_player(&self) -> Result<Arc<dyn MediaPlayer>, BackendError> {
        if self.fail_player_creation.load(Ordering::SeqCst) {
            return Err(BackendError::new(
                ErrorCode::FAIL,
                "media player activation failed",
            ));
        }
        let id = self.next_player_id.fetch_add(1, Ordering::SeqCst);
        let player = SimPlayer::new(id);
        lock(&self.players).push(player.clone());
        Ok(player)
    }

    fn create_adaptive_source(&self, uri: &str) -> AsyncOperation<CreationResult<BackendObject>> {
        let media = lock(&self.catalog).get(uri).cloned();
        let uri = uri.to_string();
        AsyncOperation::spawn("sim-manifest", move || match media {
            Some(media) if media.adaptive => {
                CreationResult::success(BackendObject::new(SimAdaptive { uri, media }))
            }
            _ => CreationResult::failure(CreationStatus::UnsupportedManifest),
        })
    }

    fn source_from_adaptive(&self, adaptive: &BackendObject) -> Result<BackendObject, BackendError> {
        let adaptive = adaptive
            .downcast_ref::<SimAdaptive>()
            .ok_or_else(|| BackendError::fail("not a simulated adaptive source"))?;
        Ok(self.new_source(&adaptive.uri, adaptive.media.clone()))
    }

    fn source_from_uri(&self, uri: &str) -> Result<BackendObject, BackendError> {
        let media = self.lookup(uri);
        Ok(self.new_source(uri, media))
    }

    fn source_from_file(&self, file: &StorageFile) -> Result<BackendObject, BackendError> {
        let key = file.path.to_string_lossy();
        let media = self.lookup(&key);
        Ok(self.new_source(&key, media))
    }

    fn create_playback_item(&self, source: &MediaSource) -> Result<PlaybackItem, BackendError> {
        let sim = source
            .object()
            .downcast_ref::<SimSource>()
            .ok_or_else(|| BackendError::fail("not a simulated source"))?;
        if !sim.claim() {
            return Err(BackendError::new(
                ErrorCode::INVALID_STATE,
                format!("source for {} is already in use", sim.uri),
            ));
        }
        Ok(PlaybackItem::new(source.uri(), source.object().clone()))
    }
}

struct PlayerState {
    source: Option<PlaybackItem>,
    media: Option<SimMedia>,
    state: BackendPlaybackState,
    size: (u32, u32),
    tracks: Vec<SubtitleTrack>,
    volume: f64,
    auto_play: bool,
    frame_server: bool,
    detach_failure: Option<(ErrorCode, String)>,
    subscribe_budget: Option<usize>,
}

type HandlerTable = HashMap<PlayerEventKind, Vec<(SubscriptionToken, PlayerEventHandler)>>;

/// Simulated frame-server player.
pub struct SimPlayer {
    id: u64,
    state: Mutex<PlayerState>,
    handlers: Mutex<HandlerTable>,
    next_token: AtomicU64,
    frames_copied: AtomicU64,
}

impl SimPlayer {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: Mutex::new(PlayerState {
                source: None,
                media: None,
                state: BackendPlaybackState::None,
                size: (0, 0),
                tracks: Vec::new(),
                volume: 1.0,
                auto_play: true,
                frame_server: false,
                detach_failure: None,
                subscribe_budget: None,
            }),
            handlers: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            frames_copied: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deliver `event` to every subscribed handler on the calling thread.
    pub fn emit(&self, event: PlayerEvent) {
        let handlers = self.handlers_for(event.kind());
        for handler in handlers {
            handler(self, &event);
        }
    }

    pub fn emit_failed(&self, code: ErrorCode, message: &str) {
        self.emit(PlayerEvent::MediaFailed {
            code,
            message: message.to_string(),
        });
    }

    pub fn emit_frame(&self) {
        self.emit(PlayerEvent::VideoFrameAvailable);
    }

    pub fn set_natural_size(&self, width: u32, height: u32) {
        lock(&self.state).size = (width, height);
        self.emit(PlayerEvent::NaturalVideoSizeChanged);
    }

    pub fn set_tracks(&self, tracks: Vec<SubtitleTrack>) {
        lock(&self.state).tracks = tracks;
        self.emit(PlayerEvent::TimedTracksChanged);
    }

    /// Reach the end of the media.
    pub fn finish(&self) {
        lock(&self.state).state = BackendPlaybackState::Ended;
        self.emit(PlayerEvent::PlaybackStateChanged);
    }

    /// Report a failure the next time the source is detached.
    pub fn fail_on_detach(&self, code: ErrorCode, message: &str) {
        lock(&self.state).detach_failure = Some((code, message.to_string()));
    }

    /// Let only `count` more subscriptions succeed.
    pub fn fail_subscribe_after(&self, count: usize) {
        lock(&self.state).subscribe_budget = Some(count);
    }

    /// Snapshot of the handlers for `kind`, as a backend holds them while dispatching.
    pub fn handlers_for(&self, kind: PlayerEventKind) -> Vec<PlayerEventHandler> {
        lock(&self.handlers)
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.handlers).values().map(Vec::len).sum()
    }

    pub fn frames_copied(&self) -> u64 {
        self.frames_copied.load(Ordering::SeqCst)
    }

    pub fn volume(&self) -> f64 {
        lock(&self.state).volume
    }

    pub fn auto_play(&self) -> bool {
        lock(&self.state).auto_play
    }

    pub fn frame_server_enabled(&self) -> bool {
        lock(&self.state).frame_server
    }

    fn transition(&self, state: BackendPlaybackState) {
        lock(&self.state).state = state;
        self.emit(PlayerEvent::PlaybackStateChanged);
    }

    fn attach(&self, item: PlaybackItem) {
        let media = item
            .object()
            .downcast_ref::<SimSource>()
            .map(|s| s.media.clone());
        {
            let mut st = lock(&self.state);
            st.source = Some(item);
            st.media = media.clone();
            st.size = (0, 0);
            st.tracks.clear();
        }
        self.transition(BackendPlaybackState::Opening);

        let Some(media) = media else {
            self.emit_failed(UNSUPPORTED_BYTESTREAM, "unsupported byte stream");
            return;
        };
        lock(&self.state).size = (media.width, media.height);
        self.emit(PlayerEvent::NaturalVideoSizeChanged);
        self.emit(PlayerEvent::NaturalDurationChanged);
        if !media.tracks.is_empty() {
            self.set_tracks(media.tracks);
        }
    }

    fn detach(&self) {
        let failure = {
            let mut st = lock(&self.state);
            st.source = None;
            st.media = None;
            st.size = (0, 0);
            st.tracks.clear();
            st.detach_failure.take()
        };
        self.transition(BackendPlaybackState::None);
        if let Some((code, message)) = failure {
            self.emit_failed(code, &message);
        }
    }

    fn has_source(&self) -> bool {
        lock(&self.state).source.is_some()
    }
}

impl MediaPlayer for SimPlayer {
    fn set_auto_play(&self, enabled: bool) {
        lock(&self.state).auto_play = enabled;
    }

    fn set_volume(&self, volume: f64) {
        lock(&self.state).volume = volume.clamp(0.0, 1.0);
    }

    fn set_frame_server_enabled(&self, enabled: bool) -> Result<(), BackendError> {
        lock(&self.state).frame_server = enabled;
        Ok(())
    }

    fn source(&self) -> Option<PlaybackItem> {
        lock(&self.state).source.clone()
    }

    fn set_source(&self, item: Option<PlaybackItem>) -> Result<(), BackendError> {
        match item {
            Some(item) => self.attach(item),
            None => self.detach(),
        }
        Ok(())
    }

    fn play(&self) -> Result<(), BackendError> {
        if !self.has_source() {
            return Ok(());
        }
        self.transition(BackendPlaybackState::Buffering);
        self.transition(BackendPlaybackState::Playing);
        Ok(())
    }

    fn pause(&self) -> Result<(), BackendError> {
        if self.has_source() {
            self.transition(BackendPlaybackState::Paused);
        }
        Ok(())
    }

    fn playback_state(&self) -> Result<BackendPlaybackState, BackendError> {
        Ok(lock(&self.state).state)
    }

    fn natural_video_size(&self) -> Result<(u32, u32), BackendError> {
        Ok(lock(&self.state).size)
    }

    fn natural_duration(&self) -> i64 {
        lock(&self.state).media.as_ref().map_or(0, |m| m.duration)
    }

    fn can_seek(&self) -> bool {
        lock(&self.state).media.as_ref().is_some_and(|m| m.can_seek)
    }

    fn stereoscopic_render_mode(&self) -> StereoscopicRenderMode {
        match lock(&self.state).media.as_ref() {
            Some(m) if m.stereo => StereoscopicRenderMode::Stereo,
            _ => StereoscopicRenderMode::Mono,
        }
    }

    fn subtitle_tracks(&self) -> Vec<SubtitleTrack> {
        lock(&self.state).tracks.clone()
    }

    fn copy_frame_to_surface(&self, surface: &DecodeSurface) -> Result<(), BackendError> {
        let size = lock(&self.state).size;
        if size == (0, 0) {
            return Err(BackendError::new(ErrorCode::INVALID_STATE, "no frame decoded"));
        }
        if size != (surface.width, surface.height) {
            return Err(BackendError::new(
                ErrorCode::INVALID_STATE,
                format!(
                    "surface is {}x{}, frame is {}x{}",
                    surface.width, surface.height, size.0, size.1
                ),
            ));
        }
        self.frames_copied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(
        &self,
        kind: PlayerEventKind,
        handler: PlayerEventHandler,
    ) -> Result<SubscriptionToken, BackendError> {
        {
            let mut st = lock(&self.state);
            if let Some(budget) = st.subscribe_budget.as_mut() {
                if *budget == 0 {
                    return Err(BackendError::fail(format!("cannot subscribe to {kind:?}")));
                }
                *budget -= 1;
            }
        }
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        lock(&self.handlers)
            .entry(kind)
            .or_default()
            .push((token, handler));
        Ok(token)
    }

    fn unsubscribe(
        &self,
        kind: PlayerEventKind,
        token: SubscriptionToken,
    ) -> Result<(), BackendError> {
        let mut handlers = lock(&self.handlers);
        let list = handlers.entry(kind).or_default();
        let before = list.len();
        list.retain(|(t, _)| *t != token);
        if list.len() == before {
            return Err(BackendError::fail(format!("unknown token {token:?} for {kind:?}")));
        }
        if list.is_empty() {
            handlers.remove(&kind);
        }
        Ok(())
    }
}

/// Steps of shared texture creation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuStep {
    CreateTexture,
    CreateView,
    ExportHandle,
    OpenShared,
    CreateSurface,
}

impl GpuStep {
    pub const ALL: &[GpuStep] = &[
        GpuStep::CreateTexture,
        GpuStep::CreateView,
        GpuStep::ExportHandle,
        GpuStep::OpenShared,
        GpuStep::CreateSurface,
    ];
}

struct GpuShared {
    live: AtomicUsize,
    fault: Mutex<Option<GpuStep>>,
    next_handle: AtomicU64,
    exported: Mutex<HashMap<u64, TextureDesc>>,
}

impl GpuShared {
    fn check(&self, step: GpuStep) -> Result<(), BackendError> {
        let mut fault = lock(&self.fault);
        if *fault == Some(step) {
            *fault = None;
            return Err(BackendError::fail(format!("{step:?} failed")));
        }
        Ok(())
    }
}

/// Counts itself in `GpuShared::live` while alive.
struct Allocation {
    shared: Arc<GpuShared>,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
    }
}

fn allocate(shared: &Arc<GpuShared>) -> BackendObject {
    shared.live.fetch_add(1, Ordering::SeqCst);
    BackendObject::new(Allocation {
        shared: shared.clone(),
    })
}

pub struct SimHostDevice {
    shared: Arc<GpuShared>,
}

pub struct SimDecodeDevice {
    shared: Arc<GpuShared>,
}

/// Host and decode devices sharing one handle namespace.
pub struct SimGpu {
    pub host: Arc<SimHostDevice>,
    pub decode: Arc<SimDecodeDevice>,
    shared: Arc<GpuShared>,
}

impl SimGpu {
    pub fn new() -> Self {
        let shared = Arc::new(GpuShared {
            live: AtomicUsize::new(0),
            fault: Mutex::new(None),
            next_handle: AtomicU64::new(0x1000),
            exported: Mutex::new(HashMap::new()),
        });
        Self {
            host: Arc::new(SimHostDevice {
                shared: shared.clone(),
            }),
            decode: Arc::new(SimDecodeDevice {
                shared: shared.clone(),
            }),
            shared,
        }
    }

    /// Make the next call at `step` fail.
    pub fn fail_next(&self, step: GpuStep) {
        *lock(&self.shared.fault) = Some(step);
    }

    /// Device objects currently alive on either device.
    pub fn live_allocations(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }
}

impl Default for SimGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDevice for SimHostDevice {
    fn create_texture(&self, desc: &TextureDesc) -> Result<HostTexture, BackendError> {
        self.shared.check(GpuStep::CreateTexture)?;
        Ok(HostTexture::new(*desc, allocate(&self.shared)))
    }

    fn create_shader_resource_view(
        &self,
        _texture: &HostTexture,
    ) -> Result<HostTextureView, BackendError> {
        self.shared.check(GpuStep::CreateView)?;
        Ok(HostTextureView::new(allocate(&self.shared)))
    }

    fn shared_handle(&self, texture: &HostTexture) -> Result<SharedHandle, BackendError> {
        self.shared.check(GpuStep::ExportHandle)?;
        if !texture.desc.shared {
            return Err(BackendError::fail("texture was not created shareable"));
        }
        let handle = self.shared.next_handle.fetch_add(4, Ordering::SeqCst);
        lock(&self.shared.exported).insert(handle, texture.desc);
        Ok(SharedHandle(handle))
    }
}

impl DecodeDevice for SimDecodeDevice {
    fn open_shared_texture(&self, handle: SharedHandle) -> Result<DecodeTexture, BackendError> {
        self.shared.check(GpuStep::OpenShared)?;
        let desc = lock(&self.shared.exported)
            .get(&handle.0)
            .copied()
            .ok_or_else(|| BackendError::fail(format!("unknown shared handle {:#x}", handle.0)))?;
        Ok(DecodeTexture::new(desc, allocate(&self.shared)))
    }

    fn surface_from_texture(&self, texture: &DecodeTexture) -> Result<DecodeSurface, BackendError> {
        self.shared.check(GpuStep::CreateSurface)?;
        Ok(DecodeSurface::new(
            texture.desc.width,
            texture.desc.height,
            allocate(&self.shared),
        ))
    }
}

/// Failure to inject into the next matching audio creation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFault {
    Graph(CreationStatus),
    SourceInput(CreationStatus),
    DeviceOutput(CreationStatus),
}

type FaultList = Arc<Mutex<Vec<AudioFault>>>;

fn take_fault(faults: &FaultList, pick: impl Fn(&AudioFault) -> Option<CreationStatus>) -> Option<CreationStatus> {
    let mut faults = lock(faults);
    let idx = faults.iter().position(|f| pick(f).is_some())?;
    pick(&faults.remove(idx))
}

/// Simulated audio graph backend: 48 kHz stereo float, 10 ms quanta.
pub struct SimAudioBackend {
    faults: FaultList,
    graphs: Mutex<Vec<Arc<SimAudioGraph>>>,
}

impl SimAudioBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            faults: Arc::new(Mutex::new(Vec::new())),
            graphs: Mutex::new(Vec::new()),
        })
    }

    pub fn inject(&self, fault: AudioFault) {
        lock(&self.faults).push(fault);
    }

    pub fn latest_graph(&self) -> Option<Arc<SimAudioGraph>> {
        lock(&self.graphs).last().cloned()
    }
}

impl AudioGraphBackend for SimAudioBackend {
    fn create_graph(
        &self,
        _settings: &AudioGraphSettings,
    ) -> AsyncOperation<CreationResult<Arc<dyn AudioGraph>>> {
        let fault = take_fault(&self.faults, |f| match f {
            AudioFault::Graph(s) => Some(*s),
            _ => None,
        });
        if let Some(status) = fault {
            return AsyncOperation::ready(CreationResult::failure(status));
        }
        let graph = Arc::new(SimAudioGraph::new(self.faults.clone()));
        lock(&self.graphs).push(graph.clone());
        let graph: Arc<dyn AudioGraph> = graph;
        AsyncOperation::spawn("sim-audio-graph", move || CreationResult::success(graph))
    }
}

pub struct SimAudioGraph {
    encoding: AudioEncoding,
    samples_per_quantum: u32,
    running: AtomicBool,
    linked: Arc<AtomicBool>,
    start_log: Arc<Mutex<Vec<String>>>,
    quantum_handlers: Mutex<Vec<(SubscriptionToken, QuantumHandler)>>,
    next_token: AtomicU64,
    faults: FaultList,
    input_label: Mutex<Option<String>>,
    frame_rings: Mutex<Vec<Arc<SampleRing>>>,
}

impl SimAudioGraph {
    fn new(faults: FaultList) -> Self {
        Self {
            encoding: AudioEncoding {
                bitrate: 3_072_000,
                bits_per_sample: 32,
                channel_count: 2,
                sample_rate: 48_000,
            },
            samples_per_quantum: 480,
            running: AtomicBool::new(false),
            linked: Arc::new(AtomicBool::new(false)),
            start_log: Arc::new(Mutex::new(Vec::new())),
            quantum_handlers: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
            faults,
            input_label: Mutex::new(None),
            frame_rings: Mutex::new(Vec::new()),
        }
    }

    /// Process one quantum: notify subscribers and fill frame outputs with silence.
    pub fn render_quantum(&self) {
        if !self.is_running() {
            return;
        }
        let handlers: Vec<QuantumHandler> = lock(&self.quantum_handlers)
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler();
        }
        let samples = vec![0.0f32; (self.samples_per_quantum * self.encoding.channel_count) as usize];
        for ring in lock(&self.frame_rings).iter() {
            ring.push(&samples);
        }
    }

    pub fn start_order(&self) -> Vec<String> {
        lock(&self.start_log).clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_linked(&self) -> bool {
        self.linked.load(Ordering::SeqCst)
    }

    pub fn input_label(&self) -> Option<String> {
        lock(&self.input_label).clone()
    }

    pub fn quantum_subscriptions(&self) -> usize {
        lock(&self.quantum_handlers).len()
    }

    fn node(&self, label: &str, linked: Option<Arc<AtomicBool>>) -> SimAudioNode {
        SimAudioNode {
            label: label.to_string(),
            start_log: self.start_log.clone(),
            running: AtomicBool::new(false),
            linked,
        }
    }

    fn input_node(
        &self,
        label: String,
        fault: Option<CreationStatus>,
    ) -> AsyncOperation<CreationResult<Arc<dyn AudioInputNode>>> {
        if let Some(status) = fault {
            return AsyncOperation::ready(CreationResult::failure(status));
        }
        *lock(&self.input_label) = Some(label);
        let node: Arc<dyn AudioInputNode> = Arc::new(self.node("input", Some(self.linked.clone())));
        AsyncOperation::ready(CreationResult::success(node))
    }
}

impl AudioGraph for SimAudioGraph {
    fn samples_per_quantum(&self) -> Result<u32, BackendError> {
        Ok(self.samples_per_quantum)
    }

    fn encoding_properties(&self) -> Result<AudioEncoding, BackendError> {
        Ok(self.encoding)
    }

    fn subscribe_quantum_started(
        &self,
        handler: QuantumHandler,
    ) -> Result<SubscriptionToken, BackendError> {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        lock(&self.quantum_handlers).push((token, handler));
        Ok(token)
    }

    fn unsubscribe_quantum_started(&self, token: SubscriptionToken) -> Result<(), BackendError> {
        let mut handlers = lock(&self.quantum_handlers);
        let before = handlers.len();
        handlers.retain(|(t, _)| *t != token);
        if handlers.len() == before {
            return Err(BackendError::fail(format!("unknown token {token:?}")));
        }
        Ok(())
    }

    fn create_source_input_node(
        &self,
        source: &MediaSource,
    ) -> AsyncOperation<CreationResult<Arc<dyn AudioInputNode>>> {
        let mut fault = take_fault(&self.faults, |f| match f {
            AudioFault::SourceInput(s) => Some(*s),
            _ => None,
        });
        match source.object().downcast_ref::<SimSource>() {
            Some(sim) if sim.claim() => {}
            _ => fault = fault.or(Some(CreationStatus::FormatNotSupported)),
        }
        self.input_node(format!("source:{}", source.uri()), fault)
    }

    fn create_file_input_node(
        &self,
        path: &Path,
    ) -> AsyncOperation<CreationResult<Arc<dyn AudioInputNode>>> {
        let fault = take_fault(&self.faults, |f| match f {
            AudioFault::SourceInput(s) => Some(*s),
            _ => None,
        });
        self.input_node(format!("file:{}", path.display()), fault)
    }

    fn create_device_output_node(&self) -> AsyncOperation<CreationResult<Arc<dyn AudioNode>>> {
        let fault = take_fault(&self.faults, |f| match f {
            AudioFault::DeviceOutput(s) => Some(*s),
            _ => None,
        });
        if let Some(status) = fault {
            return AsyncOperation::ready(CreationResult::failure(status));
        }
        let node: Arc<dyn AudioNode> = Arc::new(self.node("device-output", None));
        AsyncOperation::ready(CreationResult::success(node))
    }

    fn create_frame_output_node(&self) -> Result<Arc<dyn AudioFrameOutputNode>, BackendError> {
        let ring = Arc::new(SampleRing::new());
        lock(&self.frame_rings).push(ring.clone());
        Ok(Arc::new(SimFrameOutput {
            node: self.node("frame-output", None),
            ring,
        }))
    }

    fn start(&self) -> Result<(), BackendError> {
        lock(&self.start_log).push("graph".to_string());
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), BackendError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct SimAudioNode {
    label: String,
    start_log: Arc<Mutex<Vec<String>>>,
    running: AtomicBool,
    linked: Option<Arc<AtomicBool>>,
}

impl AudioNode for SimAudioNode {
    fn start(&self) -> Result<(), BackendError> {
        if !self.running.swap(true, Ordering::SeqCst) {
            lock(&self.start_log).push(self.label.clone());
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), BackendError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl AudioInputNode for SimAudioNode {
    fn add_outgoing_connection(&self, _destination: &dyn AudioNode) -> Result<(), BackendError> {
        match &self.linked {
            Some(linked) => {
                linked.store(true, Ordering::SeqCst);
                Ok(())
            }
            None => Err(BackendError::fail("node has no outgoing connections")),
        }
    }
}

struct SimFrameOutput {
    node: SimAudioNode,
    ring: Arc<SampleRing>,
}

impl AudioNode for SimFrameOutput {
    fn start(&self) -> Result<(), BackendError> {
        self.node.start()
    }

    fn stop(&self) -> Result<(), BackendError> {
        self.node.stop()
    }
}

impl AudioFrameOutputNode for SimFrameOutput {
    fn read_samples(&self, dst: &mut [f32]) -> usize {
        self.ring.read(dst)
    }
}
