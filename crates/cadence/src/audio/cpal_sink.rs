use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Stream;

use super::format::{AudioFormat, PcmEncoding};
use super::ring::SampleRing;
use super::sink::{AudioSink, BufferResult, SessionId};
use crate::error::SinkError;

static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy)]
pub struct SinkConfig {
    /// Device-side buffering, in milliseconds of audio.
    pub buffer_ms: u32,
    /// Timestamp drift beyond which the sink resyncs its timeline.
    pub discontinuity_threshold_us: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            buffer_ms: 500,
            discontinuity_threshold_us: 200_000,
        }
    }
}

/// Maps frames written/played to media time and detects timestamp jumps.
#[derive(Debug, Clone)]
pub(crate) struct SinkTimeline {
    sample_rate: u32,
    threshold_us: u64,
    start_media_time_us: Option<i64>,
    frames_written: u64,
}

impl SinkTimeline {
    pub(crate) fn new(sample_rate: u32, threshold_us: u64) -> Self {
        Self {
            sample_rate,
            threshold_us,
            start_media_time_us: None,
            frames_written: 0,
        }
    }

    fn frames_to_us(&self, frames: u64) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (frames * 1_000_000 / u64::from(self.sample_rate)) as i64
    }

    /// Called for the first write of each buffer. Returns true on a discontinuity.
    pub(crate) fn on_buffer_start(&mut self, timestamp_us: u64) -> bool {
        let timestamp = timestamp_us as i64;
        let Some(start) = self.start_media_time_us else {
            self.start_media_time_us = Some(timestamp);
            return false;
        };
        let expected = start + self.frames_to_us(self.frames_written);
        if timestamp.abs_diff(expected) > self.threshold_us {
            log::warn!("Audio timestamp discontinuity: expected {expected}us, got {timestamp}us");
            self.start_media_time_us = Some(start + (timestamp - expected));
            return true;
        }
        false
    }

    pub(crate) fn on_frames_written(&mut self, frames: u64) {
        self.frames_written += frames;
    }

    /// Media time of the frame being heard after `frames_played` frames.
    pub(crate) fn position_us(&self, frames_played: u64) -> Option<u64> {
        let start = self.start_media_time_us?;
        Some((start + self.frames_to_us(frames_played)).max(0) as u64)
    }
}

/// Bytes of one write: `frames` whole frames starting `start` bytes into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WriteChunk {
    pub(crate) start: usize,
    pub(crate) frames: usize,
    pub(crate) bytes: usize,
}

/// Progress through a buffer the ring may take over several calls.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PartialWrite {
    offset: usize,
    started: bool,
}

impl PartialWrite {
    /// True on the first write attempt for a buffer.
    pub(crate) fn begin(&mut self) -> bool {
        !std::mem::replace(&mut self.started, true)
    }

    pub(crate) fn next_chunk(
        &self,
        buffer_len: usize,
        frame_size: usize,
        free_frames: usize,
    ) -> WriteChunk {
        let remaining = buffer_len.saturating_sub(self.offset);
        let frames = (remaining / frame_size).min(free_frames);
        WriteChunk {
            start: self.offset,
            frames,
            bytes: frames * frame_size,
        }
    }

    /// Record `bytes` as written. Returns true once the buffer is done; a trailing
    /// partial frame can never be played, so it counts as done.
    pub(crate) fn advance(&mut self, bytes: usize, buffer_len: usize, frame_size: usize) -> bool {
        self.offset += bytes;
        if buffer_len.saturating_sub(self.offset) < frame_size {
            self.clear();
            return true;
        }
        false
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Convert little-endian PCM bytes to `f32` samples in [-1, 1].
pub(crate) fn convert_samples(encoding: PcmEncoding, bytes: &[u8], out: &mut Vec<f32>) {
    match encoding {
        PcmEncoding::Pcm8 => {
            out.extend(bytes.iter().map(|&b| (f32::from(b) - 128.0) / 128.0));
        }
        PcmEncoding::Pcm16 => out.extend(
            bytes
                .chunks_exact(2)
                .map(|c| f32::from(i16::from_le_bytes([c[0], c[1]])) / 32_768.0),
        ),
        PcmEncoding::Pcm24 => out.extend(bytes.chunks_exact(3).map(|c| {
            // Sign-extend via the top byte of an i32.
            let v = i32::from_le_bytes([0, c[0], c[1], c[2]]) >> 8;
            v as f32 / 8_388_608.0
        })),
        PcmEncoding::Pcm32 => out.extend(
            bytes
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / 2_147_483_648.0),
        ),
        PcmEncoding::Float => out.extend(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        ),
    }
}

struct PlaybackShared {
    playing: AtomicBool,
    volume: AtomicU32,
}

struct OpenStream {
    stream: Stream,
    ring: Arc<SampleRing>,
    timeline: SinkTimeline,
    encoding: PcmEncoding,
    channels: usize,
    frame_size: usize,
}

/// `AudioSink` backed by the default cpal output device.
pub struct CpalSink {
    config: SinkConfig,
    format: Option<AudioFormat>,
    open: Option<OpenStream>,
    shared: Arc<PlaybackShared>,
    progress: PartialWrite,
    scratch: Vec<f32>,
}

impl CpalSink {
    pub fn new(config: SinkConfig) -> Self {
        Self {
            config,
            format: None,
            open: None,
            shared: Arc::new(PlaybackShared {
                playing: AtomicBool::new(false),
                volume: AtomicU32::new(1.0f32.to_bits()),
            }),
            progress: PartialWrite::default(),
            scratch: Vec::new(),
        }
    }

    fn open_stream(&self, format: &AudioFormat) -> Result<OpenStream, SinkError> {
        let encoding = format.encoding.ok_or_else(|| {
            SinkError::Initialization(format!("cannot play {} directly", format.sample_mime))
        })?;
        let channels = usize::from(format.channel_count.max(1));

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| SinkError::Initialization("no audio output device found".into()))?;
        let device_name = device
            .description()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|_| "Unknown".into());

        let frames = u64::from(format.sample_rate) * u64::from(self.config.buffer_ms) / 1000;
        let ring = Arc::new(SampleRing::new(frames as usize * channels));

        let stream_config = cpal::StreamConfig {
            channels: format.channel_count.max(1),
            sample_rate: format.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let ring_clone = ring.clone();
        let shared = self.shared.clone();
        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !shared.playing.load(Ordering::Acquire) {
                        data.fill(0.0);
                        return;
                    }
                    let n = ring_clone.read(data);
                    data[n..].fill(0.0);
                    let volume = f32::from_bits(shared.volume.load(Ordering::Relaxed));
                    data[..n].iter_mut().for_each(|s| *s *= volume);
                },
                |err| {
                    log::error!("Audio output stream error: {err}");
                },
                None,
            )
            .map_err(|e| SinkError::Initialization(e.to_string()))?;

        log::info!(
            "Audio output on '{device_name}': {}Hz, {channels}ch, {:?}, ring {} samples",
            format.sample_rate,
            encoding,
            ring.capacity()
        );

        Ok(OpenStream {
            stream,
            ring,
            timeline: SinkTimeline::new(format.sample_rate, self.config.discontinuity_threshold_us),
            encoding,
            channels,
            frame_size: encoding.bytes_per_sample() * channels,
        })
    }
}

impl AudioSink for CpalSink {
    fn configure(&mut self, format: &AudioFormat) {
        if self.format.as_ref() != Some(format) && self.open.is_some() {
            self.reset();
        }
        self.format = Some(format.clone());
    }

    fn is_initialized(&self) -> bool {
        self.open.is_some()
    }

    fn initialize(&mut self, session_id: Option<SessionId>) -> Result<SessionId, SinkError> {
        let format = self
            .format
            .clone()
            .ok_or_else(|| SinkError::Initialization("output format not configured".into()))?;
        let open = self.open_stream(&format)?;
        if self.shared.playing.load(Ordering::Acquire) {
            open.stream
                .play()
                .map_err(|e| SinkError::Initialization(e.to_string()))?;
        }
        self.open = Some(open);
        self.progress.clear();
        Ok(session_id
            .unwrap_or_else(|| SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))))
    }

    fn has_pending_data(&self) -> bool {
        self.open.as_ref().is_some_and(|o| o.ring.available() > 0)
    }

    fn handle_buffer(
        &mut self,
        data: &[u8],
        timestamp_us: u64,
    ) -> Result<BufferResult, SinkError> {
        let Some(open) = self.open.as_mut() else {
            return Err(SinkError::Write("output not initialized".into()));
        };

        let mut result = BufferResult::NONE;
        if self.progress.begin() && open.timeline.on_buffer_start(timestamp_us) {
            result = result | BufferResult::POSITION_DISCONTINUITY;
        }

        let chunk = self.progress.next_chunk(
            data.len(),
            open.frame_size,
            open.ring.free() / open.channels,
        );
        let bytes = data
            .get(chunk.start..chunk.start + chunk.bytes)
            .unwrap_or_default();

        self.scratch.clear();
        convert_samples(open.encoding, bytes, &mut self.scratch);
        let pushed = open.ring.push(&self.scratch);
        if pushed != self.scratch.len() {
            return Err(SinkError::Write(format!(
                "ring accepted {pushed} of {} samples",
                self.scratch.len()
            )));
        }
        open.timeline.on_frames_written(chunk.frames as u64);

        if self.progress.advance(chunk.bytes, data.len(), open.frame_size) {
            result = result | BufferResult::BUFFER_CONSUMED;
        }
        Ok(result)
    }

    fn handle_end_of_stream(&mut self) {
        log::debug!("Audio sink: end of stream, draining buffered samples");
    }

    fn current_position_us(&mut self, _source_ended: bool) -> Option<u64> {
        let open = self.open.as_ref()?;
        let frames_played = open.ring.total_read() / open.channels as u64;
        open.timeline.position_us(frames_played)
    }

    fn play(&mut self) {
        self.shared.playing.store(true, Ordering::Release);
        if let Some(open) = &self.open {
            if let Err(e) = open.stream.play() {
                log::error!("Failed to start audio output: {e}");
            }
        }
    }

    fn pause(&mut self) {
        self.shared.playing.store(false, Ordering::Release);
        if let Some(open) = &self.open {
            if let Err(e) = open.stream.pause() {
                log::warn!("Failed to pause audio output: {e}");
            }
        }
    }

    fn reset(&mut self) {
        if self.open.take().is_some() {
            log::debug!("Audio output reset");
        }
        self.progress.clear();
    }

    fn release(&mut self) {
        self.reset();
        self.format = None;
        self.shared.playing.store(false, Ordering::Release);
        log::info!("Audio output released");
    }

    fn buffer_size(&self) -> usize {
        self.open
            .as_ref()
            .map_or(0, |o| o.ring.capacity() * o.encoding.bytes_per_sample())
    }

    fn buffer_size_us(&self) -> Option<u64> {
        let open = self.open.as_ref()?;
        let format = self.format.as_ref()?;
        Some(format.frames_to_us((open.ring.capacity() / open.channels) as u64))
    }

    fn set_volume(&mut self, volume: f32) {
        self.shared
            .volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}
