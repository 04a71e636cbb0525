//! Drives a decoder and an output device from periodic `render` calls and exposes the
//! device position as a playback clock.

use std::time::Instant;

use crossbeam_channel::Receiver;

use super::buffer::{InputBuffer, OutputBuffer};
use super::counters::CodecCounters;
use super::decoder::{AudioDecoder, DecoderFactory};
use super::events::{EventDispatcher, RendererEvent};
use super::format::{AudioFormat, FormatHolder, PcmEncoding};
use super::sink::{AudioSink, BufferResult, SessionId};
use super::source::{ReadResult, SampleSource};
use crate::error::{DecoderError, PipelineError, RendererError, SinkError};
use crate::worker::PipelineWorker;

/// Lifecycle state, driven by the owning player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    Disabled,
    Enabled,
    Started,
}

/// End-of-stream progress. Both directions latch until `reset`.
///
/// `Streaming -> InputEnded` when the source's end marker is queued to the decoder,
/// `InputEnded -> OutputEnded` when the decoder hands back the end marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Streaming,
    InputEnded,
    OutputEnded,
}

impl StreamState {
    pub fn input_ended(self) -> bool {
        !matches!(self, Self::Streaming)
    }

    pub fn output_ended(self) -> bool {
        matches!(self, Self::OutputEnded)
    }
}

/// Worker-side audio renderer.
pub struct AudioDecoderRenderer {
    index: usize,
    factory: Box<dyn DecoderFactory>,
    source: Box<dyn SampleSource>,
    sink: Box<dyn AudioSink>,
    events: EventDispatcher,
    counters: CodecCounters,

    format_holder: FormatHolder,
    input_format: Option<AudioFormat>,
    output_encoding: Option<PcmEncoding>,
    decoder: Option<Box<dyn AudioDecoder>>,
    input_buffer: Option<InputBuffer>,
    output_buffer: Option<OutputBuffer>,

    current_position_us: u64,
    allow_position_discontinuity: bool,
    stream: StreamState,
    state: RendererState,
    session_id: Option<SessionId>,
    sink_has_data: bool,
    last_feed: Instant,
    failed: bool,
}

impl AudioDecoderRenderer {
    pub fn new(
        index: usize,
        factory: Box<dyn DecoderFactory>,
        source: Box<dyn SampleSource>,
        sink: Box<dyn AudioSink>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            index,
            factory,
            source,
            sink,
            events,
            counters: CodecCounters::default(),
            format_holder: FormatHolder::default(),
            input_format: None,
            output_encoding: None,
            decoder: None,
            input_buffer: None,
            output_buffer: None,
            current_position_us: 0,
            allow_position_discontinuity: false,
            stream: StreamState::Streaming,
            state: RendererState::Disabled,
            session_id: None,
            sink_has_data: false,
            last_feed: Instant::now(),
            failed: false,
        }
    }

    /// Force the encoding the output device is configured with. Without this the
    /// decoder's output encoding is used, or 16-bit PCM if the decoder does not say.
    #[must_use]
    pub fn with_output_encoding(mut self, encoding: PcmEncoding) -> Self {
        self.output_encoding = Some(encoding);
        self
    }

    /// One rendering cycle: read a format if none yet, create the decoder on first need,
    /// then drain decoded output and feed compressed input until neither makes progress.
    ///
    /// After a fatal error this is a no-op until `reset` or `disable`.
    pub fn render(&mut self, position_us: u64) -> Result<(), PipelineError> {
        if self.state == RendererState::Disabled || self.failed || self.stream.output_ended() {
            return Ok(());
        }
        if self.input_format.is_none() && !self.read_format() {
            return Ok(());
        }
        log::trace!("Renderer {} render at {position_us}us", self.index);

        self.render_steps().map_err(|e| {
            self.failed = true;
            PipelineError::for_renderer(self.index, e)
        })
    }

    fn render_steps(&mut self) -> Result<(), RendererError> {
        self.ensure_decoder()?;
        while self.drain_output_buffer()? {}
        while self.feed_input_buffer()? {}
        Ok(())
    }

    fn read_format(&mut self) -> bool {
        if self.source.read(&mut self.format_holder, None) == ReadResult::FormatRead {
            self.on_input_format_changed();
            return true;
        }
        false
    }

    fn on_input_format_changed(&mut self) {
        if let Some(format) = self.format_holder.format.clone() {
            log::info!(
                "Renderer {} input format: {} {}ch {}Hz",
                self.index,
                format.sample_mime,
                format.channel_count,
                format.sample_rate
            );
            self.events
                .dispatch(RendererEvent::InputFormatChanged(format.clone()));
            self.input_format = Some(format);
        }
    }

    fn ensure_decoder(&mut self) -> Result<(), DecoderError> {
        if self.decoder.is_some() {
            return Ok(());
        }
        let Some(format) = self.input_format.as_ref() else {
            return Ok(());
        };

        let started = Instant::now();
        let decoder = self.factory.create_decoder(format)?;
        let initialized_at = Instant::now();
        let init_duration = initialized_at.duration_since(started);

        log::info!(
            "Renderer {} created decoder '{}' in {init_duration:?}",
            self.index,
            decoder.name()
        );
        self.events.dispatch(RendererEvent::DecoderInitialized {
            name: decoder.name().to_string(),
            initialized_at,
            init_duration,
        });
        self.counters.codec_init_count += 1;
        self.decoder = Some(decoder);
        Ok(())
    }

    /// Move one decoded buffer towards the device. Returns whether progress was made.
    pub fn drain_output_buffer(&mut self) -> Result<bool, RendererError> {
        if self.stream.output_ended() {
            return Ok(false);
        }
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(false);
        };

        if self.output_buffer.is_none() {
            let Some(buffer) = decoder.dequeue_output_buffer()? else {
                return Ok(false);
            };
            self.counters.skipped_output_buffer_count +=
                u64::from(buffer.skipped_output_buffer_count);
            self.output_buffer = Some(buffer);
        }

        if self
            .output_buffer
            .as_ref()
            .is_some_and(OutputBuffer::is_end_of_stream)
        {
            log::info!("Renderer {} output stream ended", self.index);
            self.stream = StreamState::OutputEnded;
            self.sink.handle_end_of_stream();
            self.release_output_buffer();
            return Ok(false);
        }

        if self.sink.is_initialized() {
            self.check_underrun();
        } else {
            self.initialize_sink()?;
        }

        let Some(output) = self.output_buffer.as_ref() else {
            return Ok(false);
        };
        let result = self.sink.handle_buffer(&output.data, output.timestamp_us)?;
        self.last_feed = Instant::now();

        if result.contains(BufferResult::POSITION_DISCONTINUITY) {
            self.allow_position_discontinuity = true;
        }
        if result.contains(BufferResult::BUFFER_CONSUMED) {
            self.counters.rendered_output_buffer_count += 1;
            self.release_output_buffer();
            return Ok(true);
        }
        Ok(false)
    }

    fn initialize_sink(&mut self) -> Result<(), SinkError> {
        let Some(input) = self.input_format.as_ref() else {
            return Err(SinkError::Initialization("input format unknown".into()));
        };
        let encoding = self
            .output_encoding
            .or_else(|| self.decoder.as_ref().and_then(|d| d.output_encoding()))
            .unwrap_or(PcmEncoding::Pcm16);
        let output = AudioFormat::raw(input.channel_count, input.sample_rate, encoding);
        self.sink.configure(&output);

        match self.session_id {
            Some(id) => {
                self.sink.initialize(Some(id))?;
            }
            None => {
                let id = self.sink.initialize(None)?;
                log::info!("Renderer {} bound to audio session {}", self.index, id.0);
                self.session_id = Some(id);
                self.events.dispatch(RendererEvent::AudioSessionId(id));
            }
        }
        self.sink_has_data = false;
        if self.state == RendererState::Started {
            self.sink.play();
        }
        Ok(())
    }

    fn check_underrun(&mut self) {
        let had_data = self.sink_has_data;
        self.sink_has_data = self.sink.has_pending_data();
        if had_data && !self.sink_has_data && self.state == RendererState::Started {
            let elapsed_since_last_feed_ms =
                u64::try_from(self.last_feed.elapsed().as_millis()).unwrap_or(u64::MAX);
            let buffer_size = self.sink.buffer_size();
            let buffer_size_ms = self
                .sink
                .buffer_size_us()
                .map_or(-1, |us| i64::try_from(us / 1000).unwrap_or(i64::MAX));
            log::warn!(
                "Renderer {} underrun: buffer {buffer_size} bytes ({buffer_size_ms}ms), \
                 {elapsed_since_last_feed_ms}ms since last feed",
                self.index
            );
            self.events.dispatch(RendererEvent::Underrun {
                buffer_size,
                buffer_size_ms,
                elapsed_since_last_feed_ms,
            });
        }
    }

    fn release_output_buffer(&mut self) {
        if let Some(buffer) = self.output_buffer.take() {
            if let Some(decoder) = self.decoder.as_mut() {
                decoder.release_output_buffer(buffer);
            }
        }
    }

    /// Move one unit from the source into the decoder. Returns whether progress was made.
    pub fn feed_input_buffer(&mut self) -> Result<bool, RendererError> {
        if self.stream.input_ended() {
            return Ok(false);
        }
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(false);
        };

        if self.input_buffer.is_none() {
            let Some(buffer) = decoder.dequeue_input_buffer()? else {
                return Ok(false);
            };
            self.input_buffer = Some(buffer);
        }

        let result = self
            .source
            .read(&mut self.format_holder, self.input_buffer.as_mut());
        match result {
            ReadResult::NothingRead => Ok(false),
            // The slot stays held for the next read.
            ReadResult::FormatRead => {
                self.on_input_format_changed();
                Ok(true)
            }
            ReadResult::BufferRead => {
                let Some(buffer) = self.input_buffer.take() else {
                    return Ok(false);
                };
                let end_of_stream = buffer.is_end_of_stream();
                decoder.queue_input_buffer(buffer)?;
                if end_of_stream {
                    log::info!("Renderer {} input stream ended", self.index);
                    self.stream = StreamState::InputEnded;
                    return Ok(false);
                }
                self.counters.input_buffer_count += 1;
                Ok(true)
            }
        }
    }

    /// Playback clock. Never moves backwards unless the device flagged a discontinuity
    /// (or the renderer was reset) since the previous read.
    pub fn position_us(&mut self) -> u64 {
        let ended = self.is_ended();
        if let Some(position) = self.sink.current_position_us(ended) {
            self.current_position_us = if self.allow_position_discontinuity {
                position
            } else {
                self.current_position_us.max(position)
            };
            self.allow_position_discontinuity = false;
        }
        self.current_position_us
    }

    pub fn is_ready(&self) -> bool {
        self.sink.has_pending_data()
            || (self.input_format.is_some()
                && (self.source.is_ready() || self.output_buffer.is_some()))
    }

    pub fn is_ended(&self) -> bool {
        self.stream.output_ended() && !self.sink.has_pending_data()
    }

    pub fn enable(&mut self, position_us: u64) {
        if self.state != RendererState::Disabled {
            log::warn!("Renderer {} is already enabled", self.index);
            return;
        }
        self.state = RendererState::Enabled;
        self.counters = CodecCounters::default();
        self.events
            .dispatch(RendererEvent::Enabled(self.counters.clone()));
        log::info!("Renderer {} enabled at {position_us}us", self.index);
        self.reset(position_us);
    }

    /// Drop everything buffered and restart from `position_us`.
    pub fn reset(&mut self, position_us: u64) {
        self.sink.reset();
        self.current_position_us = position_us;
        self.allow_position_discontinuity = true;
        self.stream = StreamState::Streaming;
        self.failed = false;
        if self.decoder.is_some() {
            self.flush_decoder();
        }
        log::debug!("Renderer {} reset to {position_us}us", self.index);
    }

    fn flush_decoder(&mut self) {
        self.input_buffer = None;
        self.release_output_buffer();
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.flush();
        }
    }

    pub fn start(&mut self) {
        if self.state != RendererState::Enabled {
            log::debug!("Renderer {} start ignored in {:?}", self.index, self.state);
            return;
        }
        self.state = RendererState::Started;
        self.sink.play();
    }

    pub fn stop(&mut self) {
        if self.state != RendererState::Started {
            return;
        }
        self.state = RendererState::Enabled;
        self.sink.pause();
    }

    /// Release the decoder and the device. A later `enable` starts a new session.
    pub fn disable(&mut self) {
        if self.state == RendererState::Disabled {
            return;
        }
        self.input_buffer = None;
        self.release_output_buffer();
        self.input_format = None;
        self.format_holder.format = None;
        self.session_id = None;
        if let Some(mut decoder) = self.decoder.take() {
            decoder.release();
            self.counters.codec_release_count += 1;
        }
        self.sink.release();
        self.state = RendererState::Disabled;
        self.failed = false;
        self.events
            .dispatch(RendererEvent::Disabled(self.counters.clone()));
        log::info!("Renderer {} disabled", self.index);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.sink.set_volume(volume);
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> RendererState {
        self.state
    }

    pub fn stream_state(&self) -> StreamState {
        self.stream
    }

    pub fn counters(&self) -> &CodecCounters {
        &self.counters
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn input_format(&self) -> Option<&AudioFormat> {
        self.input_format.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }
}

/// Thread-safe front end of an audio renderer running on its own worker.
///
/// Commands return as soon as they are queued; queries wait for every earlier command.
pub struct AudioRendererHandle {
    worker: PipelineWorker<AudioDecoderRenderer>,
}

impl AudioRendererHandle {
    pub fn spawn(renderer: AudioDecoderRenderer, queue_capacity: usize) -> std::io::Result<Self> {
        let name = format!("audio-{}", renderer.index());
        let worker = PipelineWorker::spawn(&name, renderer, queue_capacity)?;
        Ok(Self { worker })
    }

    pub fn render(&self, position_us: u64) -> Result<(), PipelineError> {
        self.worker
            .submit(move |renderer| renderer.render(position_us))
    }

    pub fn enable(&self, position_us: u64) -> Result<(), PipelineError> {
        self.command(move |renderer| renderer.enable(position_us))
    }

    pub fn reset(&self, position_us: u64) -> Result<(), PipelineError> {
        self.command(move |renderer| renderer.reset(position_us))
    }

    pub fn start(&self) -> Result<(), PipelineError> {
        self.command(AudioDecoderRenderer::start)
    }

    pub fn stop(&self) -> Result<(), PipelineError> {
        self.command(AudioDecoderRenderer::stop)
    }

    pub fn disable(&self) -> Result<(), PipelineError> {
        self.command(AudioDecoderRenderer::disable)
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), PipelineError> {
        self.command(move |renderer| renderer.set_volume(volume))
    }

    fn command<F>(&self, f: F) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut AudioDecoderRenderer) + Send + 'static,
    {
        self.worker.submit(move |renderer| {
            f(renderer);
            Ok(())
        })
    }

    pub fn position_us(&self) -> Result<u64, PipelineError> {
        self.worker.call(AudioDecoderRenderer::position_us)
    }

    pub fn is_ready(&self) -> Result<bool, PipelineError> {
        self.worker.call(|renderer| renderer.is_ready())
    }

    pub fn is_ended(&self) -> Result<bool, PipelineError> {
        self.worker.call(|renderer| renderer.is_ended())
    }

    pub fn counters(&self) -> Result<CodecCounters, PipelineError> {
        self.worker.call(|renderer| renderer.counters().clone())
    }

    /// Run a read-only query against the worker-side state.
    pub fn inspect<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        T: Send + 'static,
        F: FnOnce(&AudioDecoderRenderer) -> T + Send + 'static,
    {
        self.worker.call(move |renderer| f(renderer))
    }

    pub fn sync(&self) -> Result<(), PipelineError> {
        self.worker.sync()
    }

    /// Fatal decoder and output device errors, tagged with the renderer index.
    pub fn errors(&self) -> &Receiver<PipelineError> {
        self.worker.errors()
    }
}
