use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::config::{
    parse_channels, parse_format, parse_frequency, parse_seconds, parse_volume, Options,
};
use crate::logging::LogLevel;

/// Render a music file to WAV through the music backend interface
#[derive(Parser, Debug, Default)]
#[command(name = "mixmusic-render")]
#[command(version)]
#[command(about = "Decode a music track with the engine's music backends", long_about = None)]
pub struct Cli {
    /// Music file to play
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// WAV file to write
    #[arg(short, long, value_name = "OUTPUT.wav")]
    pub output: Option<PathBuf>,

    /// Number of passes (-1 loops until the time cap)
    #[arg(short, long, value_name = "N", allow_hyphen_values = true)]
    pub loops: Option<i32>,

    /// Music volume (0-128)
    #[arg(short, long, value_name = "VOLUME")]
    pub volume: Option<String>,

    /// Output frequency in Hz
    #[arg(short, long, value_name = "HZ")]
    pub rate: Option<String>,

    /// Output channel count
    #[arg(short, long, value_name = "N")]
    pub channels: Option<String>,

    /// Output sample format (u8, s16, s32, f32)
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Backend argument string, e.g. "1;g=0.5"
    #[arg(short, long, value_name = "STR")]
    pub args: Option<String>,

    /// Start position in seconds
    #[arg(short, long, value_name = "SECONDS")]
    pub seek: Option<String>,

    /// Stop rendering after this many seconds of output
    #[arg(long = "max-seconds", value_name = "SECONDS")]
    pub max_seconds: Option<String>,

    /// Print duration and tags instead of rendering
    #[arg(short, long)]
    pub info: bool,

    /// Load the codec libraries from this directory
    #[arg(long = "codec-dir", value_name = "DIR")]
    pub codec_dir: Option<PathBuf>,

    /// Configuration file path
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (0 = nothing .. 6 = everything)
    #[arg(long = "log-level", value_name = "N")]
    pub log_level: Option<i32>,
}

impl Cli {
    /// Merge CLI arguments into the options struct
    pub fn merge_into_options(&self, mut opts: Options) -> Result<Options> {
        if let Some(loops) = self.loops {
            opts.loops = loops;
        }

        if let Some(ref vol) = self.volume {
            opts.volume = parse_volume(vol).context("Invalid music volume")?;
        }

        if let Some(ref rate) = self.rate {
            opts.frequency = parse_frequency(rate)?;
        }

        if let Some(ref channels) = self.channels {
            opts.channels = parse_channels(channels)?;
        }

        if let Some(ref format) = self.format {
            opts.format = parse_format(format)?;
        }

        if let Some(ref args) = self.args {
            opts.music_args = args.clone();
        }

        if let Some(ref seek) = self.seek {
            opts.seek = Some(parse_seconds(seek).context("Invalid seek position")?);
        }

        if let Some(ref max) = self.max_seconds {
            opts.max_seconds = Some(parse_seconds(max).context("Invalid time cap")?);
        }

        if let Some(ref dir) = self.codec_dir {
            opts.codec_dir = Some(dir.clone());
        }

        if let Some(level) = self.log_level {
            opts.log_level = LogLevel::from_i32(level);
        }

        Ok(opts)
    }
}
