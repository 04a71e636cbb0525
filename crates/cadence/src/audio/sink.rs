use std::ops::BitOr;

use super::format::AudioFormat;
use crate::error::SinkError;

/// Audio session an output device is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u32);

/// Flags returned by `AudioSink::handle_buffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferResult(u8);

impl BufferResult {
    pub const NONE: Self = Self(0);
    /// The sink resynced its timeline; the playback position may jump backwards.
    pub const POSITION_DISCONTINUITY: Self = Self(1);
    /// Every byte of the buffer was accepted.
    pub const BUFFER_CONSUMED: Self = Self(2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for BufferResult {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Physical audio output (device + its buffer).
///
/// A buffer that `handle_buffer` did not fully consume must be passed again, unchanged,
/// on the next call; the sink remembers how much of it was already written.
pub trait AudioSink: Send {
    fn configure(&mut self, format: &AudioFormat);

    fn is_initialized(&self) -> bool;

    /// Open the device. With `None` a fresh session is allocated and returned.
    fn initialize(&mut self, session_id: Option<SessionId>) -> Result<SessionId, SinkError>;

    /// Written data that the device has not played yet.
    fn has_pending_data(&self) -> bool;

    fn handle_buffer(&mut self, data: &[u8], timestamp_us: u64)
    -> Result<BufferResult, SinkError>;

    /// No more buffers will follow; play out what is buffered.
    fn handle_end_of_stream(&mut self);

    /// Media time currently being heard, `None` if not known yet.
    fn current_position_us(&mut self, source_ended: bool) -> Option<u64>;

    fn play(&mut self);

    fn pause(&mut self);

    /// Drop buffered data and close the device; the next buffer re-initializes it.
    fn reset(&mut self);

    fn release(&mut self);

    /// Device buffer size in bytes of the configured encoding.
    fn buffer_size(&self) -> usize;

    fn buffer_size_us(&self) -> Option<u64>;

    fn set_volume(&mut self, volume: f32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_result_flags() {
        let both = BufferResult::POSITION_DISCONTINUITY | BufferResult::BUFFER_CONSUMED;
        assert!(both.contains(BufferResult::BUFFER_CONSUMED));
        assert!(both.contains(BufferResult::POSITION_DISCONTINUITY));
        assert!(!BufferResult::NONE.contains(BufferResult::BUFFER_CONSUMED));
        assert!(
            !BufferResult::BUFFER_CONSUMED.contains(BufferResult::POSITION_DISCONTINUITY)
        );
        assert_eq!(BufferResult::default(), BufferResult::NONE);
    }
}
