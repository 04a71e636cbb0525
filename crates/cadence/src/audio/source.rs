use crossbeam_channel::{Receiver, Sender, TryRecvError};

use super::buffer::InputBuffer;
use super::format::{AudioFormat, FormatHolder};

/// Outcome of a single source read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    NothingRead,
    /// A new format was written to the holder; the buffer was not touched.
    FormatRead,
    /// The buffer was filled with a sample or turned into the end-of-stream marker.
    BufferRead,
}

/// Upstream supplier of compressed audio units.
pub trait SampleSource: Send {
    /// Read the next item. With `buffer == None` only a format can be read.
    fn read(&mut self, holder: &mut FormatHolder, buffer: Option<&mut InputBuffer>)
    -> ReadResult;

    /// Whether a read is likely to return something right now.
    fn is_ready(&self) -> bool;
}

/// Items pushed into a `PacketSource`.
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePacket {
    Format(AudioFormat),
    Sample { data: Vec<u8>, timestamp_us: u64 },
    EndOfStream,
}

/// `SampleSource` fed from another thread through a channel.
pub struct PacketSource {
    rx: Receiver<SourcePacket>,
    peeked: Option<SourcePacket>,
    ended: bool,
}

impl PacketSource {
    /// `capacity == 0` gives an unbounded channel.
    pub fn channel(capacity: usize) -> (Sender<SourcePacket>, Self) {
        let (tx, rx) = if capacity == 0 {
            crossbeam_channel::unbounded()
        } else {
            crossbeam_channel::bounded(capacity)
        };
        (
            tx,
            Self {
                rx,
                peeked: None,
                ended: false,
            },
        )
    }

    fn next_packet(&mut self) -> Option<SourcePacket> {
        if let Some(packet) = self.peeked.take() {
            return Some(packet);
        }
        match self.rx.try_recv() {
            Ok(packet) => Some(packet),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

impl SampleSource for PacketSource {
    fn read(
        &mut self,
        holder: &mut FormatHolder,
        buffer: Option<&mut InputBuffer>,
    ) -> ReadResult {
        if self.ended {
            // End of stream is sticky.
            return match buffer {
                Some(buffer) => {
                    buffer.set_end_of_stream();
                    ReadResult::BufferRead
                }
                None => ReadResult::NothingRead,
            };
        }

        let Some(packet) = self.next_packet() else {
            return ReadResult::NothingRead;
        };
        match (packet, buffer) {
            (SourcePacket::Format(format), _) => {
                holder.format = Some(format);
                ReadResult::FormatRead
            }
            (
                SourcePacket::Sample {
                    data,
                    timestamp_us,
                },
                Some(buffer),
            ) => {
                buffer.clear();
                buffer.data.extend_from_slice(&data);
                buffer.timestamp_us = timestamp_us;
                ReadResult::BufferRead
            }
            (SourcePacket::EndOfStream, Some(buffer)) => {
                buffer.set_end_of_stream();
                self.ended = true;
                ReadResult::BufferRead
            }
            (packet, None) => {
                self.peeked = Some(packet);
                ReadResult::NothingRead
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.ended || self.peeked.is_some() || !self.rx.is_empty()
    }
}
