//! Offline consumer of the music interface: open, play, pull, write WAV.

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::Options;
use crate::container::ContainerBackend;
use crate::music::format::{AudioFormat, OutputSpec};
use crate::music::interface::{Music, MusicBackend, MusicKind};
use crate::music::meta::MetaTag;
use crate::music::source::MusicSource;
use crate::tracker::TrackerBackend;

/// Consecutive empty pulls after which rendering gives up
const MAX_EMPTY_PULLS: u32 = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub bytes: usize,
    pub frames: usize,
    /// The track reported it was done
    pub finished: bool,
}

/// Pick a backend for `source` by its header.
pub fn backend_for(source: &mut MusicSource, options: &Options) -> Result<Box<dyn MusicBackend>> {
    let spec = options.output_spec();
    let kind = MusicKind::detect_source(source).context("Failed to read the file header")?;
    Ok(match kind {
        Some(MusicKind::Tracker) => Box::new(TrackerBackend::new(spec)),
        Some(MusicKind::Container) | None => match options.codec_dir.as_deref() {
            Some(dir) => Box::new(ContainerBackend::shared(dir, spec)),
            None => Box::new(ContainerBackend::builtin(spec)),
        },
    })
}

/// Open a music file with the backend its header asks for.
pub fn open_music(path: &Path, options: &Options) -> Result<Box<dyn Music>> {
    let mut source = MusicSource::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let backend = backend_for(&mut source, options)?;
    log::info!(
        "Opening {} with the {} backend",
        path.display(),
        backend.interface().tag
    );
    let music = backend
        .new_music_ex(source, &options.music_args)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    Ok(music)
}

/// Human readable duration and tags
pub fn describe(music: &dyn Music) -> String {
    let mut out = String::new();
    match music.duration() {
        Some(d) => out.push_str(&format!("duration: {:.3}s\n", d)),
        None => out.push_str("duration: unknown\n"),
    }
    for tag in MetaTag::ALL {
        if let Some(value) = music.meta_tag(tag) {
            out.push_str(&format!("{}: {}\n", tag, value));
        }
    }
    out
}

fn wav_spec(spec: OutputSpec) -> hound::WavSpec {
    let (bits_per_sample, sample_format) = match spec.format {
        AudioFormat::U8 => (8, hound::SampleFormat::Int),
        AudioFormat::S16 => (16, hound::SampleFormat::Int),
        AudioFormat::S32 => (32, hound::SampleFormat::Int),
        AudioFormat::F32 => (32, hound::SampleFormat::Float),
    };
    hound::WavSpec {
        channels: spec.channels,
        sample_rate: spec.freq,
        bits_per_sample,
        sample_format,
    }
}

fn write_samples<W>(writer: &mut hound::WavWriter<W>, format: AudioFormat, data: &[u8]) -> Result<()>
where
    W: std::io::Write + std::io::Seek,
{
    match format {
        AudioFormat::U8 => {
            for &s in data {
                writer.write_sample((s as i16 - 128) as i8)?;
            }
        }
        AudioFormat::S16 => {
            for c in data.chunks_exact(2) {
                writer.write_sample(i16::from_ne_bytes([c[0], c[1]]))?;
            }
        }
        AudioFormat::S32 => {
            for c in data.chunks_exact(4) {
                writer.write_sample(i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))?;
            }
        }
        AudioFormat::F32 => {
            for c in data.chunks_exact(4) {
                writer.write_sample(f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))?;
            }
        }
    }
    Ok(())
}

/// Play `music` with `options` and write everything it produces to `output`.
pub fn render_to_wav(music: &mut dyn Music, options: &Options, output: &Path) -> Result<RenderStats> {
    let _span = tracing::info_span!("render", output = %output.display()).entered();
    let spec = options.output_spec();
    if options.loops < 0 && options.max_seconds.is_none() {
        anyhow::bail!("Endless playback needs a time cap");
    }

    music.set_volume(options.volume);
    music.play(options.loops).context("Failed to start playback")?;
    if let Some(position) = options.seek {
        music.seek(position).context("Failed to seek")?;
    }

    let frame_size = spec.frame_size();
    let chunk = (options.chunk_size - options.chunk_size % frame_size).max(frame_size);
    let cap = options.max_seconds.map(|s| spec.bytes_for_seconds(s));
    let mut buf = vec![0u8; chunk];

    let mut writer = hound::WavWriter::create(output, wav_spec(spec))
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let mut stats = RenderStats::default();
    let mut empty_pulls = 0;

    loop {
        let want = match cap {
            Some(cap) => chunk.min(cap - stats.bytes),
            None => chunk,
        };
        if want == 0 {
            break;
        }
        let pulled = music
            .play_audio(&mut buf[..want])
            .context("Failed to decode audio")?;
        write_samples(&mut writer, spec.format, &buf[..pulled.bytes])?;
        stats.bytes += pulled.bytes;

        if pulled.done {
            stats.finished = true;
            break;
        }
        if pulled.bytes == 0 {
            empty_pulls += 1;
            if empty_pulls >= MAX_EMPTY_PULLS {
                log::warn!("Track stopped producing audio; giving up");
                break;
            }
        } else {
            empty_pulls = 0;
        }
    }

    writer.finalize().context("Failed to finish the WAV file")?;
    stats.frames = stats.bytes / frame_size;
    log::info!(
        "Rendered {} frames ({:.2}s) to {}",
        stats.frames,
        stats.frames as f64 / spec.freq as f64,
        output.display()
    );
    Ok(stats)
}
