pub mod context;
pub mod texture;

pub use context::{GpuContext, TextureLookup, WgpuTextures};
pub use texture::{TextureAllocator, TextureCache};
