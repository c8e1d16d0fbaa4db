pub mod graph;
pub mod ring;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use self::graph::{
    AudioEncoding, AudioGraph, AudioGraphBackend, AudioGraphSettings, AudioInputNode, OutputNode,
    QuantumHandler,
};
use crate::async_op::wait_for_creation;
use crate::error::{PlaybackError, Result};
use crate::media::resolver::MediaSource;
use crate::playback::subscriptions::{EventGate, EventSubscriptionManager};

/// Where a session's audio goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioRouting {
    /// The media player renders audio itself.
    #[default]
    PlayerNative,
    /// A separate audio graph decodes the same source and renders to the sound card.
    SeparateGraphToSoundCard,
    /// A separate audio graph renders into a frame sink the application drains.
    SeparateGraphToFrameSink,
}

impl AudioRouting {
    pub fn uses_graph(self) -> bool {
        !matches!(self, AudioRouting::PlayerNative)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            AudioRouting::PlayerNative => "Player",
            AudioRouting::SeparateGraphToSoundCard => "Graph (sound card)",
            AudioRouting::SeparateGraphToFrameSink => "Graph (frame sink)",
        }
    }
}

/// What the pipeline's input node decodes.
#[derive(Clone, Copy)]
pub enum AudioInput<'a> {
    /// A source instance of its own; never the one the video player uses.
    Source(&'a MediaSource),
    File(&'a Path),
}

/// Input node linked to an output node inside one audio graph.
pub struct AudioPipeline {
    routing: AudioRouting,
    graph: Option<Arc<dyn AudioGraph>>,
    input: Option<Arc<dyn AudioInputNode>>,
    output: Option<OutputNode>,
    encoding: AudioEncoding,
    samples_per_quantum: u32,
    quanta: Arc<AtomicU64>,
    subscriptions: EventSubscriptionManager,
}

impl AudioPipeline {
    /// Create the graph, its nodes and the link between them.
    ///
    /// Every step must succeed; on error whatever was created is released on drop.
    pub fn build(
        backend: &dyn AudioGraphBackend,
        routing: AudioRouting,
        input: AudioInput<'_>,
        gate: Arc<EventGate>,
    ) -> Result<Self> {
        if !routing.uses_graph() {
            return Err(PlaybackError::IllegalState(
                "audio routing does not use a separate graph",
            ));
        }

        let graph = wait_for_creation(
            backend.create_graph(&AudioGraphSettings::media()),
            "audio graph creation",
        )?;
        let samples_per_quantum = graph.samples_per_quantum()?;
        let encoding = graph.encoding_properties()?;
        log::info!(
            "Audio graph: {}Hz, {}ch, {} bits, {} samples per quantum",
            encoding.sample_rate,
            encoding.channel_count,
            encoding.bits_per_sample,
            samples_per_quantum
        );

        let mut pipeline = Self {
            routing,
            graph: Some(graph.clone()),
            input: None,
            output: None,
            encoding,
            samples_per_quantum,
            quanta: Arc::new(AtomicU64::new(0)),
            subscriptions: EventSubscriptionManager::new(gate),
        };

        let quanta = pipeline.quanta.clone();
        let on_quantum: QuantumHandler = Arc::new(move || {
            quanta.fetch_add(1, Ordering::Relaxed);
        });
        pipeline.subscriptions.subscribe_quantum(&graph, on_quantum)?;

        let input_node = match input {
            AudioInput::Source(source) => wait_for_creation(
                graph.create_source_input_node(source),
                "audio source input node",
            )?,
            AudioInput::File(path) => {
                log::info!("Audio input from file {}", path.display());
                wait_for_creation(graph.create_file_input_node(path), "audio file input node")?
            }
        };

        let output = match routing {
            AudioRouting::SeparateGraphToFrameSink => {
                OutputNode::Frames(graph.create_frame_output_node()?)
            }
            _ => OutputNode::Device(wait_for_creation(
                graph.create_device_output_node(),
                "audio device output node",
            )?),
        };

        input_node.add_outgoing_connection(output.as_node())?;
        pipeline.input = Some(input_node);
        pipeline.output = Some(output);

        log::info!("Audio pipeline ready ({})", routing.display_name());
        Ok(pipeline)
    }

    /// Start input, then output, then the graph.
    pub fn play(&self) -> Result<()> {
        if let Some(input) = &self.input {
            input.start()?;
        }
        if let Some(output) = &self.output {
            output.as_node().start()?;
        }
        if let Some(graph) = &self.graph {
            graph.start()?;
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        if let Some(graph) = &self.graph {
            graph.stop()?;
        }
        Ok(())
    }

    /// Detach the quantum subscription, stop the graph and release every node.
    pub fn shutdown(&mut self) {
        self.subscriptions.unsubscribe_all();
        if let Some(graph) = self.graph.take() {
            if let Err(e) = graph.stop() {
                log::warn!("Failed to stop audio graph: {e}");
            }
            log::info!("Audio pipeline shut down");
        }
        self.input = None;
        self.output = None;
    }

    pub fn is_active(&self) -> bool {
        self.graph.is_some()
    }

    pub fn routing(&self) -> AudioRouting {
        self.routing
    }

    pub fn encoding(&self) -> AudioEncoding {
        self.encoding
    }

    pub fn samples_per_quantum(&self) -> u32 {
        self.samples_per_quantum
    }

    /// Quanta processed since the graph started.
    pub fn quanta_processed(&self) -> u64 {
        self.quanta.load(Ordering::Relaxed)
    }

    /// Drain rendered samples when routed to a frame sink. Returns samples written.
    pub fn read_frames(&self, dst: &mut [f32]) -> usize {
        match &self.output {
            Some(OutputNode::Frames(node)) => node.read_samples(dst),
            _ => 0,
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
