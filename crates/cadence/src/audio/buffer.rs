/// Slot for one compressed unit, lent by the decoder and filled by the source.
#[derive(Debug, Default)]
pub struct InputBuffer {
    pub data: Vec<u8>,
    pub timestamp_us: u64,
    end_of_stream: bool,
}

impl InputBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.timestamp_us = 0;
        self.end_of_stream = false;
    }

    /// Turn this slot into the empty end-of-stream marker.
    pub fn set_end_of_stream(&mut self) {
        self.data.clear();
        self.end_of_stream = true;
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }
}

/// Decoded PCM handed out by the decoder; returned to it once fully consumed.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    pub data: Vec<u8>,
    pub timestamp_us: u64,
    /// Buffers the decoder dropped before producing this one.
    pub skipped_output_buffer_count: u32,
    end_of_stream: bool,
}

impl OutputBuffer {
    pub fn end_of_stream() -> Self {
        Self {
            end_of_stream: true,
            ..Self::default()
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.timestamp_us = 0;
        self.skipped_output_buffer_count = 0;
        self.end_of_stream = false;
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }
}
