pub mod buffer;
pub mod counters;
pub mod cpal_sink;
pub mod decoder;
pub mod events;
pub mod format;
pub mod renderer;
pub mod ring;
pub mod sink;
pub mod source;

pub use buffer::{InputBuffer, OutputBuffer};
pub use counters::CodecCounters;
pub use cpal_sink::{CpalSink, SinkConfig};
pub use decoder::{AudioDecoder, DecoderFactory, PcmDecoder, PcmDecoderFactory};
pub use events::{EventDispatcher, RendererEvent};
pub use format::{AudioFormat, FormatHolder, PcmEncoding};
pub use renderer::{AudioDecoderRenderer, AudioRendererHandle, RendererState, StreamState};
pub use sink::{AudioSink, BufferResult, SessionId};
pub use source::{PacketSource, ReadResult, SampleSource, SourcePacket};
