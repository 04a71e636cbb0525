use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::cpal_sink::SinkConfig;
use crate::audio::format::PcmEncoding;

/// Pipeline tuning persisted as JSON in the user config directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    /// 0 = unbounded worker task queue.
    #[serde(default)]
    pub worker_queue_capacity: usize,
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,
    #[serde(default)]
    pub use_hdr_textures: bool,
    #[serde(default = "default_sink_buffer_ms")]
    pub sink_buffer_ms: u32,
    #[serde(default = "default_discontinuity_threshold")]
    pub discontinuity_threshold_us: u64,
    /// Forces the output device encoding; `None` follows the decoder.
    #[serde(default)]
    pub output_encoding: Option<PcmEncoding>,
}

fn default_version() -> u32 { 1 }
fn default_event_capacity() -> usize { 64 }
fn default_sink_buffer_ms() -> u32 { 500 }
fn default_discontinuity_threshold() -> u64 { 200_000 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            worker_queue_capacity: 0,
            event_channel_capacity: default_event_capacity(),
            use_hdr_textures: false,
            sink_buffer_ms: default_sink_buffer_ms(),
            discontinuity_threshold_us: default_discontinuity_threshold(),
            output_encoding: None,
        }
    }
}

impl PipelineConfig {
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("cadence").join("pipeline.json")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded pipeline config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse pipeline config: {e}");
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("No pipeline config found, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self) {
        self.save_to(&Self::config_path());
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create config dir: {e}");
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    log::error!("Failed to write pipeline config: {e}");
                } else {
                    log::debug!("Saved pipeline config to {}", path.display());
                }
            }
            Err(e) => log::error!("Failed to serialize pipeline config: {e}"),
        }
    }

    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig {
            buffer_ms: self.sink_buffer_ms,
            discontinuity_threshold_us: self.discontinuity_threshold_us,
        }
    }

    /// The forced encoding, or 16-bit PCM.
    pub fn output_encoding(&self) -> PcmEncoding {
        self.output_encoding.unwrap_or(PcmEncoding::Pcm16)
    }
}
