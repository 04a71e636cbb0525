use serde::Serialize;

/// Decoder and renderer instrumentation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CodecCounters {
    pub codec_init_count: u32,
    pub codec_release_count: u32,
    pub input_buffer_count: u64,
    pub rendered_output_buffer_count: u64,
    pub skipped_output_buffer_count: u64,
}
