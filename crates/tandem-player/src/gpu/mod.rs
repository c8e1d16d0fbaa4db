pub mod device;
pub mod texture_bridge;

pub use device::{DecodeDevice, HostDevice, SharedHandle, TextureDesc};
pub use texture_bridge::TextureBridge;
