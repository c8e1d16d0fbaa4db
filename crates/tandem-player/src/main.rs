use std::sync::Arc;

use anyhow::{Context, Result};

use tandem_player::backend::sim::{SimAudioBackend, SimBackend, SimGpu, SimMedia};
use tandem_player::media::FutureAccessList;
use tandem_player::{Collaborators, PlaybackSession, PlayerConfig, SubtitleTrack};

const DEMO_URL: &str = "https://demo.tandem.invalid/showcase/master.m3u8";
const DEMO_FRAMES: usize = 90;
const DEMO_QUANTA: usize = 100;

/// Drive a session against the simulated backends and log what it reports.
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let url = std::env::args().nth(1).unwrap_or_else(|| DEMO_URL.to_string());
    let config = PlayerConfig::load();
    let access_list = Arc::new(FutureAccessList::load(&config.access_list_path()));

    let backend = SimBackend::new();
    backend.register(
        DEMO_URL,
        SimMedia::manifest(1920, 1080).with_tracks(vec![SubtitleTrack {
            id: "cc1".into(),
            title: "English CC".into(),
            language: "en".into(),
        }]),
    );
    let gpu = SimGpu::new();
    let audio = SimAudioBackend::new();

    let mut session = PlaybackSession::new(
        config,
        Collaborators {
            media: backend.clone(),
            access_list,
            audio: Some(audio.clone()),
            decode_device: Some(gpu.decode.clone()),
        },
    );
    let events = session.events();

    session
        .initialize()
        .context("Failed to initialize playback session")?;
    session.on_graphics_device_ready(gpu.host.clone());
    session
        .load_content(&url)
        .with_context(|| format!("Failed to load {url}"))?;
    session.play()?;
    session.render_tick()?;

    if let Some(player) = backend.latest_player() {
        for _ in 0..DEMO_FRAMES {
            player.emit_frame();
        }
        log::info!("Copied {} frames into the shared texture", player.frames_copied());
    }
    if let Some(pipeline) = session.audio() {
        if let Some(graph) = audio.latest_graph() {
            for _ in 0..DEMO_QUANTA {
                graph.render_quantum();
            }
        }
        let mut buf = vec![0.0f32; 4096];
        log::info!(
            "Audio graph processed {} quanta, {} samples buffered for the frame sink",
            pipeline.quanta_processed(),
            pipeline.read_frames(&mut buf)
        );
    }
    for track in session.subtitle_tracks() {
        log::info!("Subtitle track {}: {} ({})", track.id, track.title, track.language);
    }

    session.pause()?;
    session.stop()?;
    session.on_graphics_device_shutdown();

    for event in events.try_iter() {
        match event.code {
            Some(code) => log::warn!("{:?} {:?} {code}", event.event_type, event.state),
            None => log::info!(
                "{:?} {:?} {}x{}",
                event.event_type,
                event.state,
                event.description.width,
                event.description.height
            ),
        }
    }
    Ok(())
}
