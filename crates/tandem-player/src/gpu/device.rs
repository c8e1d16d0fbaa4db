//! Graphics device contracts for the two sides of the texture bridge.
//!
//! The host device owns the texture the renderer samples from. The decode device is
//! the one the media backend decodes on. They share one allocation through an opaque
//! OS handle.

use wgpu::{TextureFormat, TextureUsages};

use crate::backend::BackendObject;
use crate::error::BackendError;

/// Descriptor for a texture allocated on the host device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsages,
    pub mip_level_count: u32,
    pub sample_count: u32,
    /// Allocate with the shared-resource flag so another device can open it.
    pub shared: bool,
}

impl TextureDesc {
    /// BGRA8, one mip, one sample, bindable as both shader resource and render target.
    pub fn shared_color_target(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Bgra8Unorm,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::RENDER_ATTACHMENT,
            mip_level_count: 1,
            sample_count: 1,
            shared: true,
        }
    }
}

/// OS handle through which a shared texture is opened on another device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedHandle(pub u64);

#[derive(Debug, Clone)]
pub struct HostTexture {
    pub desc: TextureDesc,
    object: BackendObject,
}

impl HostTexture {
    pub fn new(desc: TextureDesc, object: BackendObject) -> Self {
        Self { desc, object }
    }

    pub fn object(&self) -> &BackendObject {
        &self.object
    }
}

/// Shader-resource view over a [`HostTexture`]; what the renderer binds.
#[derive(Debug, Clone)]
pub struct HostTextureView {
    object: BackendObject,
}

impl HostTextureView {
    pub fn new(object: BackendObject) -> Self {
        Self { object }
    }

    pub fn object(&self) -> &BackendObject {
        &self.object
    }
}

/// The shared texture as opened on the decode device.
#[derive(Debug, Clone)]
pub struct DecodeTexture {
    pub desc: TextureDesc,
    object: BackendObject,
}

impl DecodeTexture {
    pub fn new(desc: TextureDesc, object: BackendObject) -> Self {
        Self { desc, object }
    }

    pub fn object(&self) -> &BackendObject {
        &self.object
    }
}

/// Surface interface the media player copies decoded frames into.
#[derive(Debug, Clone)]
pub struct DecodeSurface {
    pub width: u32,
    pub height: u32,
    object: BackendObject,
}

impl DecodeSurface {
    pub fn new(width: u32, height: u32, object: BackendObject) -> Self {
        Self {
            width,
            height,
            object,
        }
    }

    pub fn object(&self) -> &BackendObject {
        &self.object
    }
}

pub trait HostDevice: Send + Sync {
    fn create_texture(&self, desc: &TextureDesc) -> Result<HostTexture, BackendError>;
    fn create_shader_resource_view(
        &self,
        texture: &HostTexture,
    ) -> Result<HostTextureView, BackendError>;
    fn shared_handle(&self, texture: &HostTexture) -> Result<SharedHandle, BackendError>;
}

pub trait DecodeDevice: Send + Sync {
    fn open_shared_texture(&self, handle: SharedHandle) -> Result<DecodeTexture, BackendError>;
    fn surface_from_texture(&self, texture: &DecodeTexture) -> Result<DecodeSurface, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_color_target_defaults() {
        let d = TextureDesc::shared_color_target(1920, 1080);
        assert_eq!(d.format, TextureFormat::Bgra8Unorm);
        assert!(d.usage.contains(TextureUsages::TEXTURE_BINDING));
        assert!(d.usage.contains(TextureUsages::RENDER_ATTACHMENT));
        assert_eq!(d.mip_level_count, 1);
        assert_eq!(d.sample_count, 1);
        assert!(d.shared);
    }
}
