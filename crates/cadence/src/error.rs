use thiserror::Error;

/// Fatal error surfaced by either pipeline to its owner.
///
/// Transient non-availability (no decoded output yet, no input slot yet) is never an
/// error; it shows up as a "no progress" step instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Audio renderer failure, tagged with the renderer's index.
    #[error("renderer {index} failed: {source}")]
    Renderer {
        index: usize,
        #[source]
        source: RendererError,
    },
    /// GPU texture allocation or upload failure in the frame supply pipeline.
    #[error("frame processing failed: {0}")]
    FrameProcessing(#[from] TextureError),
    /// The pipeline worker thread has stopped accepting tasks.
    #[error("pipeline worker has shut down")]
    WorkerClosed,
}

impl PipelineError {
    pub fn for_renderer(index: usize, source: impl Into<RendererError>) -> Self {
        Self::Renderer {
            index,
            source: source.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RendererError {
    #[error(transparent)]
    Decoder(#[from] DecoderError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Debug, Error)]
pub enum TextureError {
    #[error("texture size {width}x{height} is invalid")]
    InvalidSize { width: u32, height: u32 },
    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    DataSize { expected: usize, actual: usize },
    #[error("texture {0} is not allocated")]
    Unknown(u32),
    #[error("GPU error: {0}")]
    Gpu(String),
}

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("failed to create decoder for {mime}: {reason}")]
    Creation { mime: String, reason: String },
    #[error("decoder {name} failed: {reason}")]
    Decode { name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("audio output initialization failed: {0}")]
    Initialization(String),
    #[error("audio output write failed: {0}")]
    Write(String),
}
