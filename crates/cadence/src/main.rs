use std::f32::consts::TAU;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Result, bail};
use crossbeam_channel::{RecvTimeoutError, Sender};

use cadence::PipelineConfig;
use cadence::audio::{
    AudioDecoderRenderer, AudioFormat, AudioRendererHandle, CpalSink, EventDispatcher,
    PacketSource, PcmDecoderFactory, PcmEncoding, SourcePacket,
};
use cadence::gpu::GpuContext;
use cadence::media::{TextureInfo, load_image};
use cadence::visual::{FrameConsumer, ImageFrameSupplyHandle};

const TONE_SAMPLE_RATE: u32 = 48_000;
const TONE_CHANNELS: u16 = 2;
const TONE_HZ: f32 = 440.0;
/// Frames per generated packet (10ms).
const TONE_CHUNK_FRAMES: usize = 480;

enum FrameMessage {
    Frame(TextureInfo, u64),
    End,
}

/// Forwards frames to the driver loop, which grants capacity for the next one.
struct ChannelConsumer {
    tx: Sender<FrameMessage>,
}

impl FrameConsumer for ChannelConsumer {
    fn queue_input_frame(&mut self, texture: TextureInfo, presentation_time_us: u64) {
        let _ = self.tx.send(FrameMessage::Frame(texture, presentation_time_us));
    }

    fn signal_end_of_current_input_stream(&mut self) {
        let _ = self.tx.send(FrameMessage::End);
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn run_images(args: &[String], config: &PipelineConfig) -> Result<()> {
    let paths: Vec<PathBuf> = args
        .iter()
        .skip_while(|a| *a != "--images")
        .skip(1)
        .take_while(|a| !a.starts_with("--"))
        .map(PathBuf::from)
        .collect();
    if paths.is_empty() {
        bail!("--images needs at least one path");
    }
    let duration_ms: u64 = flag_value(args, "--duration-ms").map_or(Ok(1000), str::parse)?;
    let fps: f32 = flag_value(args, "--fps").map_or(Ok(30.0), str::parse)?;
    let use_hdr = config.use_hdr_textures || args.iter().any(|a| a == "--hdr");

    let gpu = GpuContext::headless()?;
    let textures = gpu.textures();
    let lookup = textures.lookup();
    let (frame_tx, frame_rx) = crossbeam_channel::unbounded();
    let supply = ImageFrameSupplyHandle::spawn(
        textures,
        ChannelConsumer { tx: frame_tx },
        config.worker_queue_capacity,
    )?;

    for path in &paths {
        let image = load_image(path).map_err(anyhow::Error::msg)?;
        log::info!("Queueing {} ({}x{})", path.display(), image.width, image.height);
        supply.queue_input_image(image, duration_ms * 1000, fps, use_hdr)?;
    }
    supply.signal_end_of_input()?;
    supply.notify_downstream_ready()?;

    loop {
        if let Ok(e) = supply.errors().try_recv() {
            return Err(e.into());
        }
        match frame_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(FrameMessage::Frame(texture, pts)) => {
                if lookup.view(texture.id).is_none() {
                    log::warn!("Frame {} arrived after its texture was replaced", texture.id);
                }
                log::info!(
                    "Frame {} {}x{} {:?} @ {pts}us",
                    texture.id,
                    texture.width,
                    texture.height,
                    lookup.format(texture.id)
                );
                supply.notify_downstream_ready()?;
            }
            Ok(FrameMessage::End) => break,
            Err(RecvTimeoutError::Timeout) => bail!("frame supply stalled"),
            Err(RecvTimeoutError::Disconnected) => bail!("frame supply stopped"),
        }
    }

    let status = supply.status()?;
    log::info!(
        "Frame supply finished: {} frames, clock at {}us",
        status.frames_dispatched,
        status.presentation_time_us
    );
    Ok(())
}

fn tone_packet(encoding: PcmEncoding, first_frame: usize, frames: usize) -> Result<Vec<u8>> {
    let samples = (first_frame..first_frame + frames).flat_map(|n| {
        let v = (TAU * TONE_HZ * n as f32 / TONE_SAMPLE_RATE as f32).sin() * 0.2;
        std::iter::repeat_n(v, usize::from(TONE_CHANNELS))
    });
    Ok(match encoding {
        PcmEncoding::Pcm16 => samples
            .flat_map(|v| ((v * f32::from(i16::MAX)) as i16).to_le_bytes())
            .collect(),
        PcmEncoding::Float => samples.flat_map(f32::to_le_bytes).collect(),
        other => bail!("tone generator does not produce {other:?}"),
    })
}

fn run_tone(seconds: f32, config: &PipelineConfig) -> Result<()> {
    let encoding = config.output_encoding();
    let total_frames = (seconds.max(0.0) * TONE_SAMPLE_RATE as f32) as usize;
    let format = AudioFormat::raw(TONE_CHANNELS, TONE_SAMPLE_RATE, encoding);

    if !matches!(encoding, PcmEncoding::Pcm16 | PcmEncoding::Float) {
        bail!("tone generator does not produce {encoding:?}");
    }
    let (packets, source) = PacketSource::channel(64);
    let producer = thread::Builder::new()
        .name("cadence-tone".into())
        .spawn(move || {
            if packets.send(SourcePacket::Format(format.clone())).is_err() {
                return;
            }
            let mut frame = 0;
            while frame < total_frames {
                let frames = TONE_CHUNK_FRAMES.min(total_frames - frame);
                let Ok(data) = tone_packet(encoding, frame, frames) else {
                    break;
                };
                let timestamp_us = format.frames_to_us(frame as u64);
                if packets
                    .send(SourcePacket::Sample { data, timestamp_us })
                    .is_err()
                {
                    return;
                }
                frame += frames;
            }
            let _ = packets.send(SourcePacket::EndOfStream);
        })?;

    let (events, event_rx) = EventDispatcher::channel(config.event_channel_capacity);
    let renderer = AudioDecoderRenderer::new(
        0,
        Box::new(PcmDecoderFactory),
        Box::new(source),
        Box::new(CpalSink::new(config.sink_config())),
        events,
    );
    let renderer = match config.output_encoding {
        Some(encoding) => renderer.with_output_encoding(encoding),
        None => renderer,
    };
    let renderer = AudioRendererHandle::spawn(renderer, config.worker_queue_capacity)?;
    renderer.enable(0)?;
    renderer.start()?;

    let mut position_us = 0;
    loop {
        renderer.render(position_us)?;
        if let Ok(e) = renderer.errors().try_recv() {
            return Err(e.into());
        }
        for event in event_rx.try_iter() {
            log::info!("Renderer event: {event:?}");
        }
        if renderer.is_ended()? {
            break;
        }
        position_us = renderer.position_us()?;
        log::debug!("Audio position {position_us}us");
        thread::sleep(Duration::from_millis(10));
    }

    renderer.disable()?;
    let counters = renderer.counters()?;
    log::info!(
        "Tone finished at {position_us}us: {} buffers in, {} rendered",
        counters.input_buffer_count,
        counters.rendered_output_buffer_count
    );
    if producer.join().is_err() {
        log::error!("Tone producer panicked");
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = PipelineConfig::load();

    if args.iter().any(|a| a == "--images") {
        return run_images(&args, &config);
    }
    if let Some(seconds) = flag_value(&args, "--tone") {
        return run_tone(seconds.parse()?, &config);
    }

    eprintln!(
        "usage: cadence --images <paths...> [--duration-ms N] [--fps F] [--hdr]\n       \
         cadence --tone <seconds>"
    );
    std::process::exit(2);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected(n: usize) -> f32 {
        (TAU * TONE_HZ * n as f32 / TONE_SAMPLE_RATE as f32).sin() * 0.2
    }

    #[test]
    fn tone_pcm16_is_little_endian() {
        let data = tone_packet(PcmEncoding::Pcm16, 10, 2).unwrap();
        assert_eq!(data.len(), 2 * usize::from(TONE_CHANNELS) * 2);
        let left = i16::from_le_bytes([data[0], data[1]]);
        let right = i16::from_le_bytes([data[2], data[3]]);
        assert_eq!(left, (expected(10) * f32::from(i16::MAX)) as i16);
        assert_eq!(left, right);
        assert_ne!(left, 0);
    }

    #[test]
    fn tone_float_is_little_endian() {
        let data = tone_packet(PcmEncoding::Float, 3, 1).unwrap();
        assert_eq!(data.len(), usize::from(TONE_CHANNELS) * 4);
        let left = f32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        assert_eq!(left, expected(3));
    }

    #[test]
    fn tone_rejects_other_encodings() {
        assert!(tone_packet(PcmEncoding::Pcm24, 0, 1).is_err());
    }
}
