//! Contracts for the platform audio graph used by separate audio routing.

use std::path::Path;
use std::sync::Arc;

use crate::async_op::{AsyncOperation, CreationResult};
use crate::backend::SubscriptionToken;
use crate::error::BackendError;
use crate::media::resolver::MediaSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioRenderCategory {
    #[default]
    Media,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioGraphSettings {
    pub render_category: AudioRenderCategory,
}

impl AudioGraphSettings {
    pub fn media() -> Self {
        Self {
            render_category: AudioRenderCategory::Media,
        }
    }
}

/// Sample format the graph renders in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioEncoding {
    pub bitrate: u32,
    pub bits_per_sample: u32,
    pub channel_count: u32,
    pub sample_rate: u32,
}

/// Invoked at the start of every processing quantum, on the graph's render thread.
pub type QuantumHandler = Arc<dyn Fn() + Send + Sync>;

pub trait AudioNode: Send + Sync {
    fn start(&self) -> Result<(), BackendError>;
    fn stop(&self) -> Result<(), BackendError>;
}

pub trait AudioInputNode: AudioNode {
    fn add_outgoing_connection(&self, destination: &dyn AudioNode) -> Result<(), BackendError>;
}

/// Output node that exposes rendered samples to the application instead of a device.
pub trait AudioFrameOutputNode: AudioNode {
    /// Drain rendered interleaved samples into `dst`. Returns the count written.
    fn read_samples(&self, dst: &mut [f32]) -> usize;
}

/// Output end of a pipeline.
#[derive(Clone)]
pub enum OutputNode {
    Device(Arc<dyn AudioNode>),
    Frames(Arc<dyn AudioFrameOutputNode>),
}

impl OutputNode {
    pub fn as_node(&self) -> &dyn AudioNode {
        match self {
            OutputNode::Device(node) => node.as_ref(),
            OutputNode::Frames(node) => node.as_ref(),
        }
    }
}

pub trait AudioGraph: Send + Sync {
    fn samples_per_quantum(&self) -> Result<u32, BackendError>;
    fn encoding_properties(&self) -> Result<AudioEncoding, BackendError>;

    fn subscribe_quantum_started(
        &self,
        handler: QuantumHandler,
    ) -> Result<SubscriptionToken, BackendError>;
    fn unsubscribe_quantum_started(&self, token: SubscriptionToken) -> Result<(), BackendError>;

    fn create_source_input_node(
        &self,
        source: &MediaSource,
    ) -> AsyncOperation<CreationResult<Arc<dyn AudioInputNode>>>;
    fn create_file_input_node(
        &self,
        path: &Path,
    ) -> AsyncOperation<CreationResult<Arc<dyn AudioInputNode>>>;
    fn create_device_output_node(&self) -> AsyncOperation<CreationResult<Arc<dyn AudioNode>>>;
    fn create_frame_output_node(&self) -> Result<Arc<dyn AudioFrameOutputNode>, BackendError>;

    fn start(&self) -> Result<(), BackendError>;
    fn stop(&self) -> Result<(), BackendError>;
}

pub trait AudioGraphBackend: Send + Sync {
    fn create_graph(
        &self,
        settings: &AudioGraphSettings,
    ) -> AsyncOperation<CreationResult<Arc<dyn AudioGraph>>>;
}
