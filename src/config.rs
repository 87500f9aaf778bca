use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::logging::LogLevel;
use crate::music::format::{AudioFormat, OutputSpec};
use crate::music::pcm::MAX_VOLUME;

/// Render options that can be set via CLI or config file
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub frequency: u32,
    pub channels: u16,
    pub format: AudioFormat,
    /// Bytes requested per `PlayAudio` pull
    pub chunk_size: usize,
    /// Number of passes; negative loops forever
    pub loops: i32,
    pub volume: i32,
    pub music_args: String,
    pub seek: Option<f64>,
    pub max_seconds: Option<f64>,
    /// Directory of the shared codec libraries; the built-in one when unset
    pub codec_dir: Option<PathBuf>,
    pub log_level: LogLevel,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            frequency: 44100,
            channels: 2,
            format: AudioFormat::S16,
            chunk_size: 4096,
            loops: 1,
            volume: MAX_VOLUME,
            music_args: String::new(),
            seek: None,
            max_seconds: None,
            codec_dir: None,
            log_level: LogLevel::default(),
        }
    }
}

impl Options {
    pub fn output_spec(&self) -> OutputSpec {
        OutputSpec::new(self.format, self.channels, self.frequency)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "frequency" => self.frequency = parse_frequency(value)?,
            "channels" => self.channels = parse_channels(value)?,
            "format" => self.format = parse_format(value)?,
            "chunk_size" => {
                self.chunk_size = value.parse().context("Invalid chunk size")?;
                if self.chunk_size == 0 {
                    anyhow::bail!("Chunk size must be positive");
                }
            }
            "loops" => self.loops = value.parse().context("Invalid loop count")?,
            "volume" => self.volume = parse_volume(value)?,
            "args" => self.music_args = value.to_string(),
            "seek" => self.seek = Some(parse_seconds(value).context("Invalid seek position")?),
            "max_seconds" => {
                self.max_seconds = Some(parse_seconds(value).context("Invalid time cap")?)
            }
            "codec_dir" => self.codec_dir = Some(PathBuf::from(value)),
            "log_level" => {
                let level: i32 = value.parse().context("Invalid log level")?;
                self.log_level = LogLevel::from_i32(level);
            }
            other => log::warn!("Ignoring unknown config key '{}'", other),
        }
        Ok(())
    }
}

/// Split `key = value` lines, skipping blank lines and `#` comments.
fn parse_properties(data: &str, handler: &mut dyn FnMut(&str, &str) -> Result<()>) -> Result<()> {
    for (number, line) in data.lines().enumerate() {
        let line = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => handler(key.trim(), value.trim())
                .with_context(|| format!("line {}", number + 1))?,
            None => log::warn!("Key without value on line {}", number + 1),
        }
    }
    Ok(())
}

/// Load options from a property file; a missing file gives the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Options> {
    let mut options = Options::default();
    let Some(path) = path else {
        return Ok(options);
    };
    if !path.exists() {
        log::debug!("No config file at {}", path.display());
        return Ok(options);
    }
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_properties(&data, &mut |key, value| options.apply(key, value))
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    Ok(options)
}

/// Parse an output sample format name
pub fn parse_format(s: &str) -> Result<AudioFormat> {
    match s.to_lowercase().as_str() {
        "u8" => Ok(AudioFormat::U8),
        "s16" => Ok(AudioFormat::S16),
        "s32" => Ok(AudioFormat::S32),
        "f32" | "float" => Ok(AudioFormat::F32),
        _ => anyhow::bail!("Invalid sample format: {}. Valid options: u8, s16, s32, f32", s),
    }
}

pub fn parse_channels(s: &str) -> Result<u16> {
    let channels: u16 = s.parse().context("Invalid channel count")?;
    if !(1..=8).contains(&channels) {
        anyhow::bail!("Channel count out of range (1 to 8)");
    }
    Ok(channels)
}

/// Parse a music volume (0-128)
pub fn parse_volume(s: &str) -> Result<i32> {
    let volume: i32 = s.parse().context("Invalid volume")?;
    if !(0..=MAX_VOLUME).contains(&volume) {
        anyhow::bail!("Volume out of range (0 to {})", MAX_VOLUME);
    }
    Ok(volume)
}

pub fn parse_frequency(s: &str) -> Result<u32> {
    let freq: u32 = s.parse().context("Invalid frequency")?;

    const MIN_FREQ: u32 = 4000;
    const MAX_FREQ: u32 = 384_000;

    if !(MIN_FREQ..=MAX_FREQ).contains(&freq) {
        anyhow::bail!("Frequency out of range ({} to {})", MIN_FREQ, MAX_FREQ);
    }
    Ok(freq)
}

pub fn parse_seconds(s: &str) -> Result<f64> {
    let seconds: f64 = s.parse().context("Invalid number of seconds")?;
    if !seconds.is_finite() || seconds < 0.0 {
        anyhow::bail!("Seconds must be a non-negative number");
    }
    Ok(seconds)
}
