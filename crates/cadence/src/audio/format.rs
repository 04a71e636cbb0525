use serde::{Deserialize, Serialize};

/// Mime type of uncompressed PCM.
pub const MIME_AUDIO_RAW: &str = "audio/raw";

/// Sample encoding of uncompressed audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PcmEncoding {
    Pcm8,
    Pcm16,
    Pcm24,
    Pcm32,
    Float,
}

impl PcmEncoding {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            PcmEncoding::Pcm8 => 1,
            PcmEncoding::Pcm16 => 2,
            PcmEncoding::Pcm24 => 3,
            PcmEncoding::Pcm32 | PcmEncoding::Float => 4,
        }
    }
}

/// Audio stream format as read from the upstream source.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFormat {
    pub sample_mime: String,
    pub channel_count: u16,
    pub sample_rate: u32,
    /// Only set for raw PCM.
    pub encoding: Option<PcmEncoding>,
}

impl AudioFormat {
    pub fn raw(channel_count: u16, sample_rate: u32, encoding: PcmEncoding) -> Self {
        Self {
            sample_mime: MIME_AUDIO_RAW.to_string(),
            channel_count,
            sample_rate,
            encoding: Some(encoding),
        }
    }

    pub fn compressed(sample_mime: &str, channel_count: u16, sample_rate: u32) -> Self {
        Self {
            sample_mime: sample_mime.to_string(),
            channel_count,
            sample_rate,
            encoding: None,
        }
    }

    pub fn is_raw(&self) -> bool {
        self.sample_mime == MIME_AUDIO_RAW && self.encoding.is_some()
    }

    /// Bytes per PCM frame (all channels), for raw formats.
    pub fn frame_size(&self) -> Option<usize> {
        self.encoding
            .map(|e| e.bytes_per_sample() * self.channel_count as usize)
    }

    /// Duration of `frames` PCM frames in microseconds.
    pub fn frames_to_us(&self, frames: u64) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        frames * 1_000_000 / u64::from(self.sample_rate)
    }
}

/// Filled by a source when it reads a format.
#[derive(Debug, Default)]
pub struct FormatHolder {
    pub format: Option<AudioFormat>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_format_frame_size() {
        let f = AudioFormat::raw(2, 48_000, PcmEncoding::Pcm16);
        assert!(f.is_raw());
        assert_eq!(f.frame_size(), Some(4));
        assert_eq!(f.frames_to_us(48_000), 1_000_000);
        assert_eq!(f.frames_to_us(24), 500);
    }

    #[test]
    fn compressed_format_has_no_frame_size() {
        let f = AudioFormat::compressed("audio/opus", 2, 48_000);
        assert!(!f.is_raw());
        assert_eq!(f.frame_size(), None);
    }

    #[test]
    fn encoding_serde_names() {
        let json = serde_json::to_string(&PcmEncoding::Pcm16).unwrap();
        assert_eq!(json, "\"pcm16\"");
        let e: PcmEncoding = serde_json::from_str("\"float\"").unwrap();
        assert_eq!(e, PcmEncoding::Float);
    }

    #[test]
    fn zero_sample_rate_is_zero_duration() {
        let f = AudioFormat::raw(1, 0, PcmEncoding::Pcm8);
        assert_eq!(f.frames_to_us(100), 0);
    }
}
