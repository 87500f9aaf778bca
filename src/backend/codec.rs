// codec.rs - Native decoding library surface

//! The function table of a native decoding library, as traits.
//!
//! A [`CodecLibrary`] is what the loader hands out once every symbol is
//! resolved. It opens inputs ([`Demuxer`]), decoders ([`AudioDecoder`]) and
//! resamplers ([`Resampler`]). Data crossing the boundary uses the plain
//! structs below: [`Packet`], [`Frame`], [`StreamInfo`], [`Dictionary`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::backend::adapter::StreamAdapter;
use crate::backend::resample::Interleaver;
use crate::music::format::{ChannelLayout, SampleFormat};

/// Units per second of container-level timestamps and durations
pub const TIME_BASE: i64 = 1_000_000;

/// Error codes reported by the native library
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// End of file / end of stream
    Eof,
    /// Output not available in this state; feed more input
    Again,
    /// Invalid data found when processing input
    InvalidData(String),
    /// Feature or codec not implemented
    Unsupported(String),
    /// The byte source failed
    Io(String),
    Other(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Eof => write!(f, "End of file"),
            CodecError::Again => write!(f, "Resource temporarily unavailable"),
            CodecError::InvalidData(msg) => {
                write!(f, "Invalid data found when processing input: {}", msg)
            }
            CodecError::Unsupported(msg) => write!(f, "Not yet implemented: {}", msg),
            CodecError::Io(msg) => write!(f, "I/O error: {}", msg),
            CodecError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            CodecError::Eof
        } else {
            CodecError::Io(err.to_string())
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Rational number, used for time bases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }
}

/// `a * b / c`, rounded to nearest, without intermediate overflow.
pub fn rescale(a: i64, b: i64, c: i64) -> i64 {
    if c == 0 {
        return 0;
    }
    let n = a as i128 * b as i128;
    let c = c as i128;
    let half = c.abs() / 2;
    let q = if (n < 0) != (c < 0) {
        (n - if n < 0 { half } else { -half }) / c
    } else {
        (n + if n < 0 { -half } else { half }) / c
    };
    q.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Codec identifier, as assigned by the native library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodecId(pub u32);

impl CodecId {
    pub const NONE: CodecId = CodecId(0);
}

/// A decoder the library knows how to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub id: CodecId,
    pub name: String,
}

/// Codec parameters of one stream
#[derive(Clone, Default)]
pub struct CodecParameters {
    pub codec_id: Option<CodecId>,
    pub sample_format: Option<SampleFormat>,
    pub sample_rate: u32,
    pub channels: u16,
    pub layout: ChannelLayout,
    /// Total frames in the stream, when the container knows
    pub frames: Option<u64>,
    /// Library-private parameters carried through to `open_decoder`
    pub native: Option<Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for CodecParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecParameters")
            .field("codec_id", &self.codec_id)
            .field("sample_format", &self.sample_format)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("layout", &self.layout)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

/// One elementary stream of a container
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    pub time_base: Rational,
    pub params: CodecParameters,
}

impl StreamInfo {
    pub fn is_audio(&self) -> bool {
        self.params.sample_rate > 0 || self.params.channels > 0 || self.params.sample_format.is_some()
    }
}

/// Compressed packet read from a container
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub stream_index: usize,
    /// Presentation timestamp in the stream's time base
    pub pts: Option<i64>,
    pub duration: i64,
    pub data: Vec<u8>,
}

/// Decoded audio frame
///
/// Interleaved formats use one plane, planar formats one plane per channel.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub format: Option<SampleFormat>,
    pub rate: u32,
    pub channels: u16,
    pub layout: ChannelLayout,
    /// Samples per channel
    pub nb_samples: usize,
    pub planes: Vec<Vec<u8>>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the frame's data but keep its allocations for the next decode.
    pub fn unref(&mut self) {
        for plane in &mut self.planes {
            plane.clear();
        }
        self.nb_samples = 0;
    }

    /// Bytes of interleaved audio in the frame
    pub fn data_len(&self) -> usize {
        match self.format {
            Some(format) => self.nb_samples * self.channels as usize * format.bytes_per_sample(),
            None => 0,
        }
    }
}

/// String key/value metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dictionary {
    entries: Vec<(String, String)>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace `key`.
    pub fn insert(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
        } else {
            self.entries.push((key.to_string(), value.to_string()));
        }
    }

    /// Exact (case-sensitive) lookup
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// An opened, probed container
pub trait Demuxer: Send {
    fn streams(&self) -> &[StreamInfo];

    /// Pick the best audio stream and, if one is obvious, its decoder.
    fn find_best_audio_stream(&self) -> CodecResult<(usize, Option<CodecDescriptor>)>;

    /// Next packet of any stream; `Err(Eof)` at the end.
    fn read_packet(&mut self) -> CodecResult<Packet>;

    /// Seek `stream` to a timestamp in `[min_ts, max_ts]` close to `ts`.
    /// With `any`, the target need not be a key frame.
    fn seek(&mut self, stream: usize, min_ts: i64, ts: i64, max_ts: i64, any: bool)
        -> CodecResult<()>;

    fn metadata(&self) -> Option<&Dictionary> {
        None
    }

    /// Container duration in [`TIME_BASE`] units
    fn duration(&self) -> Option<i64> {
        None
    }
}

/// Send/receive audio decoder
pub trait AudioDecoder: Send {
    fn send_packet(&mut self, packet: &Packet) -> CodecResult<()>;

    /// Fill `frame` with the next decoded frame. `Err(Again)` means more
    /// input is needed, `Err(Eof)` that the decoder is drained.
    fn receive_frame(&mut self, frame: &mut Frame) -> CodecResult<()>;

    /// Drop buffered state (after a seek).
    fn flush(&mut self);
}

/// Resampler setup: interleave `in_format` into `out_format`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResamplerConfig {
    pub in_format: SampleFormat,
    pub out_format: SampleFormat,
    pub in_rate: u32,
    pub out_rate: u32,
    pub in_layout: ChannelLayout,
    pub out_layout: ChannelLayout,
    pub channels: u16,
}

/// Frame converter
pub trait Resampler: Send {
    /// Convert `frame` into `out`, writing at most `out_samples` samples per
    /// channel. Returns the samples per channel written.
    fn convert(&mut self, out: &mut [u8], out_samples: usize, frame: &Frame) -> CodecResult<usize>;
}

/// The resolved function table of a native decoding library
pub trait CodecLibrary: Send + Sync {
    fn name(&self) -> &str;

    /// Open and probe a container read through `io`.
    fn open_input(&self, io: StreamAdapter) -> CodecResult<Box<dyn Demuxer>>;

    fn find_decoder(&self, id: CodecId) -> Option<CodecDescriptor>;

    fn open_decoder(
        &self,
        codec: &CodecDescriptor,
        params: &CodecParameters,
    ) -> CodecResult<Box<dyn AudioDecoder>>;

    fn new_resampler(&self, config: &ResamplerConfig) -> CodecResult<Box<dyn Resampler>> {
        Ok(Box::new(Interleaver::new(config)?))
    }

    /// Human-readable text for an error code
    fn strerror(&self, err: &CodecError) -> String {
        err.to_string()
    }
}
