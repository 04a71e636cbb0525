use crate::error::TextureError;
use crate::media::types::{ImageFrame, TextureId, TextureInfo};

/// GPU texture backend used by the frame supply pipeline.
pub trait TextureAllocator: Send {
    /// Allocate an uninitialised 2D texture.
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        use_hdr: bool,
    ) -> Result<TextureId, TextureError>;

    /// Copy `image` into a texture previously returned by `create_texture`.
    fn upload(&mut self, id: TextureId, image: &ImageFrame) -> Result<(), TextureError>;

    fn delete_texture(&mut self, id: TextureId);
}

/// Owns at most one live texture at a time.
///
/// The only way to get a new texture is `replace_texture`, which always deletes the
/// previous one first.
pub struct TextureCache<A: TextureAllocator> {
    allocator: A,
    current: Option<TextureInfo>,
    replacements: u64,
}

impl<A: TextureAllocator> TextureCache<A> {
    pub fn new(allocator: A) -> Self {
        Self {
            allocator,
            current: None,
            replacements: 0,
        }
    }

    /// Delete the current texture (if any), then create and fill one for `image`.
    pub fn replace_texture(
        &mut self,
        image: &ImageFrame,
        use_hdr: bool,
    ) -> Result<TextureInfo, TextureError> {
        self.release();

        if image.width == 0 || image.height == 0 {
            return Err(TextureError::InvalidSize {
                width: image.width,
                height: image.height,
            });
        }
        if image.data.len() != image.expected_len() {
            return Err(TextureError::DataSize {
                expected: image.expected_len(),
                actual: image.data.len(),
            });
        }

        let id = self
            .allocator
            .create_texture(image.width, image.height, use_hdr)?;
        if let Err(e) = self.allocator.upload(id, image) {
            self.allocator.delete_texture(id);
            return Err(e);
        }

        let info = TextureInfo {
            id,
            width: image.width,
            height: image.height,
        };
        self.current = Some(info);
        self.replacements += 1;
        log::debug!(
            "Texture {} created: {}x{}{}",
            id,
            image.width,
            image.height,
            if use_hdr { " (hdr)" } else { "" }
        );
        Ok(info)
    }

    /// Delete the live texture, if there is one.
    pub fn release(&mut self) {
        if let Some(old) = self.current.take() {
            self.allocator.delete_texture(old.id);
        }
    }

    pub fn current(&self) -> Option<TextureInfo> {
        self.current
    }

    /// Number of textures created over the cache's lifetime.
    pub fn replacements(&self) -> u64 {
        self.replacements
    }
}

impl<A: TextureAllocator> Drop for TextureCache<A> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum AllocEvent {
        Create(TextureId, u32, u32, bool),
        Upload(TextureId),
        Delete(TextureId),
    }

    #[derive(Default)]
    pub struct AllocLog {
        pub events: Vec<AllocEvent>,
        pub live: HashSet<TextureId>,
        pub max_live: usize,
    }

    /// In-memory allocator that records every call.
    #[derive(Clone, Default)]
    pub struct FakeAllocator {
        pub log: Arc<Mutex<AllocLog>>,
        pub fail_upload: bool,
        next_id: u32,
    }

    impl FakeAllocator {
        pub fn failing_upload() -> Self {
            Self {
                fail_upload: true,
                ..Self::default()
            }
        }

        pub fn events(&self) -> Vec<AllocEvent> {
            self.log.lock().unwrap().events.clone()
        }

        pub fn live_count(&self) -> usize {
            self.log.lock().unwrap().live.len()
        }

        pub fn max_live(&self) -> usize {
            self.log.lock().unwrap().max_live
        }
    }

    impl TextureAllocator for FakeAllocator {
        fn create_texture(
            &mut self,
            width: u32,
            height: u32,
            use_hdr: bool,
        ) -> Result<TextureId, TextureError> {
            self.next_id += 1;
            let id = TextureId(self.next_id);
            let mut log = self.log.lock().unwrap();
            log.events.push(AllocEvent::Create(id, width, height, use_hdr));
            log.live.insert(id);
            log.max_live = log.max_live.max(log.live.len());
            Ok(id)
        }

        fn upload(&mut self, id: TextureId, _image: &ImageFrame) -> Result<(), TextureError> {
            if self.fail_upload {
                return Err(TextureError::Gpu("upload rejected".into()));
            }
            self.log.lock().unwrap().events.push(AllocEvent::Upload(id));
            Ok(())
        }

        fn delete_texture(&mut self, id: TextureId) {
            let mut log = self.log.lock().unwrap();
            log.events.push(AllocEvent::Delete(id));
            log.live.remove(&id);
        }
    }
}
