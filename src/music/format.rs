//! Sample format definitions for music backends
//!
//! Two families of formats meet here: the container sample formats a native
//! decoder reports (interleaved or planar), and the small fixed set of
//! sample types the engine's output accepts.

use std::fmt;

use crate::error::{MusicError, MusicResult};

/// Engine output sample type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    /// Unsigned 8-bit
    U8,
    /// Signed 16-bit, native endian
    S16,
    /// Signed 32-bit, native endian
    S32,
    /// 32-bit float, native endian
    F32,
}

impl AudioFormat {
    /// Returns the number of bytes per sample (one channel)
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            AudioFormat::U8 => 1,
            AudioFormat::S16 => 2,
            AudioFormat::S32 | AudioFormat::F32 => 4,
        }
    }

    /// Returns true for floating point samples
    pub fn is_float(&self) -> bool {
        matches!(self, AudioFormat::F32)
    }

    /// Short lowercase name, as accepted by the config parser
    pub fn name(&self) -> &'static str {
        match self {
            AudioFormat::U8 => "u8",
            AudioFormat::S16 => "s16",
            AudioFormat::S32 => "s32",
            AudioFormat::F32 => "f32",
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        AudioFormat::S16
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sample format as reported by a container decoder
///
/// The `*P` variants are planar: each channel lives in its own plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    S64,
    F32,
    F64,
    U8P,
    S16P,
    S32P,
    S64P,
    F32P,
    F64P,
}

impl SampleFormat {
    /// Returns true if each channel is stored in a separate plane
    pub fn is_planar(&self) -> bool {
        matches!(
            self,
            SampleFormat::U8P
                | SampleFormat::S16P
                | SampleFormat::S32P
                | SampleFormat::S64P
                | SampleFormat::F32P
                | SampleFormat::F64P
        )
    }

    /// The interleaved counterpart of this format
    pub fn packed(&self) -> SampleFormat {
        match self {
            SampleFormat::U8P => SampleFormat::U8,
            SampleFormat::S16P => SampleFormat::S16,
            SampleFormat::S32P => SampleFormat::S32,
            SampleFormat::S64P => SampleFormat::S64,
            SampleFormat::F32P => SampleFormat::F32,
            SampleFormat::F64P => SampleFormat::F64,
            other => *other,
        }
    }

    /// Returns the number of bytes per sample (one channel)
    pub fn bytes_per_sample(&self) -> usize {
        match self.packed() {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::F32 => 4,
            _ => 8,
        }
    }

    /// The engine output type this format maps to, if any
    pub fn engine_type(&self) -> Option<AudioFormat> {
        match self.packed() {
            SampleFormat::U8 => Some(AudioFormat::U8),
            SampleFormat::S16 => Some(AudioFormat::S16),
            SampleFormat::S32 => Some(AudioFormat::S32),
            SampleFormat::F32 => Some(AudioFormat::F32),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16",
            SampleFormat::S32 => "s32",
            SampleFormat::S64 => "s64",
            SampleFormat::F32 => "flt",
            SampleFormat::F64 => "dbl",
            SampleFormat::U8P => "u8p",
            SampleFormat::S16P => "s16p",
            SampleFormat::S32P => "s32p",
            SampleFormat::S64P => "s64p",
            SampleFormat::F32P => "fltp",
            SampleFormat::F64P => "dblp",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How one decoded stream maps onto the engine's sample types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFormatDescriptor {
    /// Engine sample type the stream is fed to the output queue as
    pub sample_type: AudioFormat,
    /// Whether decoded frames must be interleaved first
    pub planar: bool,
    /// Bytes per sample of one channel
    pub bytes_per_sample: usize,
}

impl SampleFormatDescriptor {
    /// Derive the descriptor for a container sample format.
    pub fn from_container(format: SampleFormat) -> MusicResult<Self> {
        let sample_type = format.engine_type().ok_or_else(|| {
            MusicError::FormatUnsupported(format!("sample format '{}' has no output mapping", format))
        })?;
        Ok(Self {
            sample_type,
            planar: format.is_planar(),
            bytes_per_sample: format.bytes_per_sample(),
        })
    }
}

/// Speaker position bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChannelLayout(pub u64);

impl ChannelLayout {
    pub const FRONT_LEFT: u64 = 0x1;
    pub const FRONT_RIGHT: u64 = 0x2;
    pub const FRONT_CENTER: u64 = 0x4;

    pub const MONO: ChannelLayout = ChannelLayout(Self::FRONT_CENTER);
    pub const STEREO: ChannelLayout = ChannelLayout(Self::FRONT_LEFT | Self::FRONT_RIGHT);
    pub const SURROUND: ChannelLayout =
        ChannelLayout(Self::FRONT_LEFT | Self::FRONT_RIGHT | Self::FRONT_CENTER);

    /// Layout to assume when a container does not report one.
    pub fn default_for(channels: u16) -> ChannelLayout {
        match channels {
            0 => ChannelLayout(0),
            1 => Self::MONO,
            2 => Self::STEREO,
            3 => Self::SURROUND,
            n if n >= 64 => ChannelLayout(u64::MAX),
            n => ChannelLayout((1u64 << n) - 1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of speaker positions in the mask
    pub fn channels(&self) -> u16 {
        self.0.count_ones() as u16
    }
}

/// The engine's fixed output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub format: AudioFormat,
    pub channels: u16,
    pub freq: u32,
}

impl OutputSpec {
    pub fn new(format: AudioFormat, channels: u16, freq: u32) -> Self {
        Self {
            format,
            channels,
            freq,
        }
    }

    /// Bytes in one sample frame (all channels)
    pub fn frame_size(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    /// Bytes needed to hold `seconds` of output
    pub fn bytes_for_seconds(&self, seconds: f64) -> usize {
        (seconds * self.freq as f64).round() as usize * self.frame_size()
    }
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            format: AudioFormat::S16,
            channels: 2,
            freq: 44100,
        }
    }
}
