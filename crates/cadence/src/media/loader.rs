use std::path::Path;

use super::types::ImageFrame;

/// Load a still image (PNG, JPEG, GIF first frame, WebP) as RGBA8.
pub fn load_image(path: &Path) -> Result<ImageFrame, String> {
    let img = image::open(path).map_err(|e| format!("Failed to open image: {e}"))?;
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    log::debug!("Loaded {}: {}x{}", path.display(), w, h);
    Ok(ImageFrame::new(rgba.into_raw(), w, h))
}
