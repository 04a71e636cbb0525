use std::collections::VecDeque;

use super::buffer::{InputBuffer, OutputBuffer};
use super::format::{AudioFormat, PcmEncoding};
use crate::error::DecoderError;

/// Synchronous decoder driven one step at a time by the renderer.
///
/// Input slots are lent out by `dequeue_input_buffer` and handed back, filled, through
/// `queue_input_buffer`. Decoded buffers come out of `dequeue_output_buffer` and go back
/// through `release_output_buffer`. `None` means "not right now", never an error.
pub trait AudioDecoder: Send {
    fn name(&self) -> &str;

    fn dequeue_input_buffer(&mut self) -> Result<Option<InputBuffer>, DecoderError>;

    fn queue_input_buffer(&mut self, buffer: InputBuffer) -> Result<(), DecoderError>;

    fn dequeue_output_buffer(&mut self) -> Result<Option<OutputBuffer>, DecoderError>;

    fn release_output_buffer(&mut self, buffer: OutputBuffer);

    /// PCM encoding of decoded output, when the decoder knows it.
    fn output_encoding(&self) -> Option<PcmEncoding> {
        None
    }

    /// Discard all queued input and pending output.
    fn flush(&mut self);

    fn release(&mut self);
}

/// Creates a decoder once the input format is known.
pub trait DecoderFactory: Send {
    fn create_decoder(
        &mut self,
        format: &AudioFormat,
    ) -> Result<Box<dyn AudioDecoder>, DecoderError>;
}

const DEFAULT_INPUT_BUFFERS: usize = 16;
const DEFAULT_OUTPUT_BUFFERS: usize = 16;
const INPUT_BUFFER_SIZE: usize = 8192;

/// Pass-through "decoder" for raw PCM input.
///
/// Each queued input becomes one output buffer with the same payload and timestamp;
/// the end-of-stream marker becomes an end-of-stream output.
pub struct PcmDecoder {
    encoding: Option<PcmEncoding>,
    frame_size: usize,
    max_pending_inputs: usize,
    max_pending_outputs: usize,
    queued: VecDeque<InputBuffer>,
    ready: VecDeque<OutputBuffer>,
    spare_inputs: Vec<InputBuffer>,
    spare_outputs: Vec<OutputBuffer>,
    released: bool,
}

impl PcmDecoder {
    pub fn new(format: &AudioFormat) -> Result<Self, DecoderError> {
        let frame_size = format
            .frame_size()
            .filter(|_| format.is_raw())
            .filter(|&size| size > 0)
            .ok_or_else(|| DecoderError::Creation {
                mime: format.sample_mime.clone(),
                reason: "not raw PCM".to_string(),
            })?;
        Ok(Self {
            encoding: format.encoding,
            frame_size,
            max_pending_inputs: DEFAULT_INPUT_BUFFERS,
            max_pending_outputs: DEFAULT_OUTPUT_BUFFERS,
            queued: VecDeque::new(),
            ready: VecDeque::new(),
            spare_inputs: Vec::new(),
            spare_outputs: Vec::new(),
            released: false,
        })
    }

    /// Limit how many inputs may wait for an output slot and how many outputs may wait
    /// to be dequeued.
    pub fn with_buffer_counts(mut self, inputs: usize, outputs: usize) -> Self {
        self.max_pending_inputs = inputs.max(1);
        self.max_pending_outputs = outputs.max(1);
        self
    }

    fn check_live(&self) -> Result<(), DecoderError> {
        if self.released {
            return Err(DecoderError::Decode {
                name: self.name().to_string(),
                reason: "decoder released".to_string(),
            });
        }
        Ok(())
    }

    /// Move queued inputs into free output slots.
    fn decode_pending(&mut self) -> Result<(), DecoderError> {
        while self.ready.len() < self.max_pending_outputs {
            let Some(mut input) = self.queued.pop_front() else {
                break;
            };
            let output = if input.is_end_of_stream() {
                OutputBuffer::end_of_stream()
            } else {
                if input.data.len() % self.frame_size != 0 {
                    return Err(DecoderError::Decode {
                        name: self.name().to_string(),
                        reason: format!(
                            "{} bytes is not a whole number of {}-byte frames",
                            input.data.len(),
                            self.frame_size
                        ),
                    });
                }
                let mut output = self.spare_outputs.pop().unwrap_or_default();
                output.clear();
                std::mem::swap(&mut output.data, &mut input.data);
                output.timestamp_us = input.timestamp_us;
                output
            };
            input.clear();
            self.spare_inputs.push(input);
            self.ready.push_back(output);
        }
        Ok(())
    }
}

impl AudioDecoder for PcmDecoder {
    fn name(&self) -> &str {
        "pcm"
    }

    fn dequeue_input_buffer(&mut self) -> Result<Option<InputBuffer>, DecoderError> {
        self.check_live()?;
        self.decode_pending()?;
        if self.queued.len() >= self.max_pending_inputs {
            return Ok(None);
        }
        let mut buffer = self
            .spare_inputs
            .pop()
            .unwrap_or_else(|| InputBuffer::with_capacity(INPUT_BUFFER_SIZE));
        buffer.clear();
        Ok(Some(buffer))
    }

    fn queue_input_buffer(&mut self, buffer: InputBuffer) -> Result<(), DecoderError> {
        self.check_live()?;
        self.queued.push_back(buffer);
        self.decode_pending()
    }

    fn dequeue_output_buffer(&mut self) -> Result<Option<OutputBuffer>, DecoderError> {
        self.check_live()?;
        self.decode_pending()?;
        Ok(self.ready.pop_front())
    }

    fn release_output_buffer(&mut self, mut buffer: OutputBuffer) {
        buffer.clear();
        self.spare_outputs.push(buffer);
    }

    fn output_encoding(&self) -> Option<PcmEncoding> {
        self.encoding
    }

    fn flush(&mut self) {
        for mut input in self.queued.drain(..) {
            input.clear();
            self.spare_inputs.push(input);
        }
        for mut output in self.ready.drain(..) {
            output.clear();
            self.spare_outputs.push(output);
        }
    }

    fn release(&mut self) {
        self.flush();
        self.spare_inputs.clear();
        self.spare_outputs.clear();
        self.released = true;
    }
}

/// Creates `PcmDecoder`s; rejects compressed formats.
#[derive(Debug, Default)]
pub struct PcmDecoderFactory;

impl DecoderFactory for PcmDecoderFactory {
    fn create_decoder(
        &mut self,
        format: &AudioFormat,
    ) -> Result<Box<dyn AudioDecoder>, DecoderError> {
        Ok(Box::new(PcmDecoder::new(format)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo16() -> AudioFormat {
        AudioFormat::raw(2, 44_100, PcmEncoding::Pcm16)
    }

    fn queue(decoder: &mut PcmDecoder, data: &[u8], ts: u64) {
        let mut input = decoder.dequeue_input_buffer().unwrap().unwrap();
        input.data.extend_from_slice(data);
        input.timestamp_us = ts;
        decoder.queue_input_buffer(input).unwrap();
    }

    #[test]
    fn passes_payload_and_timestamp_through() {
        let mut d = PcmDecoder::new(&stereo16()).unwrap();
        queue(&mut d, &[1, 2, 3, 4], 10);
        queue(&mut d, &[5, 6, 7, 8, 9, 10, 11, 12], 20);

        let a = d.dequeue_output_buffer().unwrap().unwrap();
        assert_eq!(a.data, vec![1, 2, 3, 4]);
        assert_eq!(a.timestamp_us, 10);
        let b = d.dequeue_output_buffer().unwrap().unwrap();
        assert_eq!(b.timestamp_us, 20);
        assert!(d.dequeue_output_buffer().unwrap().is_none());
        d.release_output_buffer(a);
        d.release_output_buffer(b);
    }

    #[test]
    fn end_of_stream_marker_passes_through() {
        let mut d = PcmDecoder::new(&stereo16()).unwrap();
        let mut input = d.dequeue_input_buffer().unwrap().unwrap();
        input.set_end_of_stream();
        d.queue_input_buffer(input).unwrap();
        assert!(d.dequeue_output_buffer().unwrap().unwrap().is_end_of_stream());
    }

    #[test]
    fn rejects_partial_frames() {
        let mut d = PcmDecoder::new(&stereo16()).unwrap();
        let mut input = d.dequeue_input_buffer().unwrap().unwrap();
        input.data.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(
            d.queue_input_buffer(input),
            Err(DecoderError::Decode { .. })
        ));
    }

    #[test]
    fn input_slots_run_out_when_outputs_back_up() {
        let mut d = PcmDecoder::new(&stereo16())
            .unwrap()
            .with_buffer_counts(1, 1);
        queue(&mut d, &[0; 4], 0); // decoded into the only output slot
        queue(&mut d, &[0; 4], 1); // waits for an output slot
        assert!(d.dequeue_input_buffer().unwrap().is_none());

        let out = d.dequeue_output_buffer().unwrap().unwrap();
        d.release_output_buffer(out);
        assert!(d.dequeue_input_buffer().unwrap().is_some());
    }

    #[test]
    fn flush_drops_pending_work() {
        let mut d = PcmDecoder::new(&stereo16()).unwrap();
        queue(&mut d, &[0; 4], 0);
        d.flush();
        assert!(d.dequeue_output_buffer().unwrap().is_none());
    }

    #[test]
    fn released_decoder_errors() {
        let mut d = PcmDecoder::new(&stereo16()).unwrap();
        d.release();
        assert!(d.dequeue_input_buffer().is_err());
    }

    #[test]
    fn reports_input_encoding_as_output() {
        let d = PcmDecoder::new(&AudioFormat::raw(1, 48_000, PcmEncoding::Pcm24)).unwrap();
        assert_eq!(d.output_encoding(), Some(PcmEncoding::Pcm24));
        let d = PcmDecoder::new(&stereo16()).unwrap();
        assert_eq!(d.output_encoding(), Some(PcmEncoding::Pcm16));
    }

    #[test]
    fn factory_rejects_compressed_input() {
        let mut factory = PcmDecoderFactory;
        let err = factory
            .create_decoder(&AudioFormat::compressed("audio/mpeg", 2, 44_100))
            .err()
            .unwrap();
        assert!(matches!(err, DecoderError::Creation { .. }));
        assert!(factory.create_decoder(&stereo16()).is_ok());
    }
}
