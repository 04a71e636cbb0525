use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use wgpu::{
    Device, DeviceDescriptor, ExperimentalFeatures, Instance, InstanceDescriptor, MemoryHints,
    PowerPreference, Queue, RequestAdapterOptions, TextureFormat, Trace,
};

use super::texture::TextureAllocator;
use crate::error::TextureError;
use crate::media::types::{ImageFrame, TextureId};

/// Headless wgpu device used to host pipeline textures.
pub struct GpuContext {
    pub device: Device,
    pub queue: Queue,
}

impl GpuContext {
    pub fn headless() -> Result<Self> {
        let instance = Instance::new(&InstanceDescriptor::default());

        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&DeviceDescriptor {
            label: Some("cadence-device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: ExperimentalFeatures::default(),
            memory_hints: MemoryHints::Performance,
            trace: Trace::Off,
        }))?;

        log::info!(
            "GPU initialized: {} ({:?})",
            adapter.get_info().name,
            adapter.get_info().backend
        );

        Ok(Self { device, queue })
    }

    /// A texture allocator on this device.
    pub fn textures(&self) -> WgpuTextures {
        WgpuTextures::new(self.device.clone(), self.queue.clone())
    }
}

struct LiveTexture {
    id: TextureId,
    format: TextureFormat,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// Lets the downstream consumer resolve a `TextureId` received with a frame.
#[derive(Clone, Default)]
pub struct TextureLookup {
    live: Arc<Mutex<Option<LiveTexture>>>,
}

impl TextureLookup {
    /// View of the texture with this id, if it is still the live one.
    pub fn view(&self, id: TextureId) -> Option<wgpu::TextureView> {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.as_ref()
            .filter(|t| t.id == id)
            .map(|t| t.view.clone())
    }

    pub fn format(&self, id: TextureId) -> Option<TextureFormat> {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.as_ref().filter(|t| t.id == id).map(|t| t.format)
    }
}

/// `TextureAllocator` backed by real wgpu textures.
pub struct WgpuTextures {
    device: Device,
    queue: Queue,
    next_id: u32,
    lookup: TextureLookup,
}

impl WgpuTextures {
    pub fn new(device: Device, queue: Queue) -> Self {
        Self {
            device,
            queue,
            next_id: 0,
            lookup: TextureLookup::default(),
        }
    }

    pub fn lookup(&self) -> TextureLookup {
        self.lookup.clone()
    }

    fn pop_error(&self) -> Option<wgpu::Error> {
        pollster::block_on(self.device.pop_error_scope())
    }
}

/// Sampled texture format for an image, depending on the HDR flag.
pub fn texture_format(use_hdr: bool) -> TextureFormat {
    if use_hdr {
        TextureFormat::Rgba16Float
    } else {
        TextureFormat::Rgba8UnormSrgb
    }
}

impl TextureAllocator for WgpuTextures {
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        use_hdr: bool,
    ) -> Result<TextureId, TextureError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(TextureError::InvalidSize { width, height });
        }

        let format = texture_format(use_hdr);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("cadence-input-image"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let validation = self.pop_error();
        let oom = self.pop_error();
        if let Some(e) = validation.or(oom) {
            texture.destroy();
            return Err(TextureError::Gpu(e.to_string()));
        }

        self.next_id += 1;
        let id = TextureId(self.next_id);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut live = self.lookup.live.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stale) = live.replace(LiveTexture {
            id,
            format,
            texture,
            view,
        }) {
            log::warn!("Texture {} replaced without delete", stale.id);
            stale.texture.destroy();
        }
        Ok(id)
    }

    fn upload(&mut self, id: TextureId, image: &ImageFrame) -> Result<(), TextureError> {
        let live = self.lookup.live.lock().unwrap_or_else(PoisonError::into_inner);
        let target = live
            .as_ref()
            .filter(|t| t.id == id)
            .ok_or(TextureError::Unknown(id.0))?;

        // HDR textures store f16 texels; widen the 8-bit source on the CPU.
        let widened;
        let (bytes, bytes_per_row): (&[u8], u32) = match target.format {
            TextureFormat::Rgba16Float => {
                widened = rgba8_to_rgba16f(&image.data);
                (widened.as_slice(), image.width * 8)
            }
            _ => (&image.data[..], image.bytes_per_row()),
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(image.height),
            },
            wgpu::Extent3d {
                width: image.width,
                height: image.height,
                depth_or_array_layers: 1,
            },
        );
        drop(live);
        match self.pop_error() {
            Some(e) => Err(TextureError::Gpu(e.to_string())),
            None => Ok(()),
        }
    }

    fn delete_texture(&mut self, id: TextureId) {
        let mut live = self.lookup.live.lock().unwrap_or_else(PoisonError::into_inner);
        if live.as_ref().is_some_and(|t| t.id == id) {
            if let Some(t) = live.take() {
                t.texture.destroy();
            }
        }
    }
}

/// Convert sRGB-encoded RGBA8 to linear half-float RGBA16.
fn rgba8_to_rgba16f(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() * 2);
    for (i, &c) in src.iter().enumerate() {
        let v = c as f32 / 255.0;
        // Alpha is linear already.
        let linear = if i % 4 == 3 { v } else { srgb_to_linear(v) };
        out.extend_from_slice(&f32_to_f16_bits(linear).to_le_bytes());
    }
    out
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// IEEE 754 binary16 encoding for values in [0, 1].
fn f32_to_f16_bits(v: f32) -> u16 {
    let bits = v.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32 - 127 + 15;
    let mant = bits & 0x007f_ffff;
    if exp <= 0 {
        if exp < -10 {
            return sign;
        }
        let m = (mant | 0x0080_0000) >> (1 - exp);
        return sign | ((m + 0x0000_1000) >> 13) as u16;
    }
    if exp >= 0x1f {
        return sign | 0x7c00;
    }
    // Rounding may carry into the exponent, which is the correct result.
    sign | ((((exp as u32) << 10) | (mant >> 13)) + ((mant >> 12) & 1)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hdr_flag_selects_format() {
        assert_eq!(texture_format(true), TextureFormat::Rgba16Float);
        assert_eq!(texture_format(false), TextureFormat::Rgba8UnormSrgb);
    }

    #[test]
    fn f16_encoding_known_values() {
        assert_eq!(f32_to_f16_bits(0.0), 0x0000);
        assert_eq!(f32_to_f16_bits(1.0), 0x3c00);
        assert_eq!(f32_to_f16_bits(0.5), 0x3800);
        assert_eq!(f32_to_f16_bits(0.25), 0x3400);
    }

    #[test]
    fn widening_doubles_size_and_keeps_alpha_linear() {
        let out = rgba8_to_rgba16f(&[255, 0, 255, 255]);
        assert_eq!(out.len(), 8);
        let texel: Vec<u16> = out
            .chunks(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(texel, vec![0x3c00, 0x0000, 0x3c00, 0x3c00]);
    }

    #[test]
    fn lookup_without_textures_is_empty() {
        let lookup = TextureLookup::default();
        assert!(lookup.view(TextureId(1)).is_none());
        assert!(lookup.format(TextureId(1)).is_none());
    }
}
