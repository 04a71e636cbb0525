use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::counters::CodecCounters;
use super::format::AudioFormat;
use super::sink::SessionId;

/// Non-fatal notifications from the audio renderer.
#[derive(Debug, Clone)]
pub enum RendererEvent {
    Enabled(CodecCounters),
    DecoderInitialized {
        name: String,
        initialized_at: Instant,
        init_duration: Duration,
    },
    InputFormatChanged(AudioFormat),
    AudioSessionId(SessionId),
    Underrun {
        buffer_size: usize,
        /// -1 when the sink cannot express its buffer as a duration.
        buffer_size_ms: i64,
        elapsed_since_last_feed_ms: u64,
    },
    Disabled(CodecCounters),
}

/// Delivers events without ever blocking the renderer; drops them if the listener lags.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    tx: Option<Sender<RendererEvent>>,
}

impl EventDispatcher {
    pub fn new(tx: Sender<RendererEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Dispatcher plus the receiving end, with a bounded queue.
    pub fn channel(capacity: usize) -> (Self, Receiver<RendererEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Dispatcher with no listener.
    pub fn none() -> Self {
        Self { tx: None }
    }

    pub fn dispatch(&self, event: RendererEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(event)) => {
                log::warn!("Renderer event dropped, listener is behind: {event:?}");
            }
        }
    }
}
