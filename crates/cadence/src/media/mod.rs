pub mod loader;
pub mod types;

pub use loader::load_image;
pub use types::{ImageFrame, TextureId, TextureInfo};
