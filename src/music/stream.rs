// stream.rs - Output PCM queue

//! Output audio queue.
//!
//! Decoders push PCM in whatever interleaved format their stream carries.
//! [`AudioStream`] converts it on the way in (sample type, channel count
//! and rate), so everything waiting in the queue is already in the
//! engine's fixed [`OutputSpec`].

use std::collections::VecDeque;

use crate::error::{MusicError, MusicResult};
use crate::music::format::{AudioFormat, OutputSpec};

/// Interleaved input format of an [`AudioStream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub format: AudioFormat,
    pub channels: u16,
    pub rate: u32,
}

impl StreamSpec {
    pub fn new(format: AudioFormat, channels: u16, rate: u32) -> Self {
        Self {
            format,
            channels,
            rate,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }
}

/// Decode one native-endian sample to [-1.0, 1.0]
pub(crate) fn sample_to_f32(format: AudioFormat, bytes: &[u8]) -> f32 {
    match format {
        AudioFormat::U8 => (bytes[0] as f32 - 128.0) / 128.0,
        AudioFormat::S16 => i16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
        AudioFormat::S32 => {
            let v = i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (v as f64 / 2_147_483_648.0) as f32
        }
        AudioFormat::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

/// Encode one sample in [-1.0, 1.0] into `out`, clamping.
pub(crate) fn push_sample(format: AudioFormat, sample: f32, out: &mut VecDeque<u8>) {
    let s = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    match format {
        AudioFormat::U8 => {
            let v = (s * 128.0 + 128.0).round().clamp(0.0, 255.0) as u8;
            out.push_back(v);
        }
        AudioFormat::S16 => {
            let v = (s * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
            out.extend(v.to_ne_bytes());
        }
        AudioFormat::S32 => {
            let v = (s as f64 * 2_147_483_648.0)
                .round()
                .clamp(-2_147_483_648.0, 2_147_483_647.0) as i32;
            out.extend(v.to_ne_bytes());
        }
        AudioFormat::F32 => out.extend(s.to_ne_bytes()),
    }
}

/// Linear-interpolating rate converter with state carried across calls
#[derive(Debug, Default)]
struct RateConverter {
    /// Pending input frames, interleaved at the output channel count
    history: Vec<f32>,
    /// Read position inside `history`, in 1/out_rate input frames
    phase: u64,
}

impl RateConverter {
    fn clear(&mut self) {
        self.history.clear();
        self.phase = 0;
    }
}

/// Output audio queue converting to the engine format on `put`
#[derive(Debug)]
pub struct AudioStream {
    src: StreamSpec,
    dst: OutputSpec,
    /// Bytes of an incomplete input frame
    partial: Vec<u8>,
    converter: RateConverter,
    queue: VecDeque<u8>,
}

impl AudioStream {
    /// Create a queue converting from `src` to `dst`.
    pub fn new(src: StreamSpec, dst: OutputSpec) -> MusicResult<Self> {
        if src.channels == 0 || src.rate == 0 {
            return Err(MusicError::InvalidArgument(format!(
                "stream input needs a rate and channels, got {} Hz / {} ch",
                src.rate, src.channels
            )));
        }
        if dst.channels == 0 || dst.freq == 0 {
            return Err(MusicError::InvalidArgument(format!(
                "stream output needs a rate and channels, got {} Hz / {} ch",
                dst.freq, dst.channels
            )));
        }
        Ok(Self {
            src,
            dst,
            partial: Vec::new(),
            converter: RateConverter::default(),
            queue: VecDeque::new(),
        })
    }

    pub fn input_spec(&self) -> StreamSpec {
        self.src
    }

    pub fn output_spec(&self) -> OutputSpec {
        self.dst
    }

    /// Switch to a new input format. Buffered input is flushed first and
    /// queued output is kept.
    pub fn set_input_spec(&mut self, src: StreamSpec) -> MusicResult<()> {
        if src.channels == 0 || src.rate == 0 {
            return Err(MusicError::InvalidArgument(format!(
                "stream input needs a rate and channels, got {} Hz / {} ch",
                src.rate, src.channels
            )));
        }
        self.flush();
        self.src = src;
        Ok(())
    }

    fn is_passthrough(&self) -> bool {
        self.src.format == self.dst.format
            && self.src.channels == self.dst.channels
            && self.src.rate == self.dst.freq
    }

    /// Queue interleaved input bytes.
    pub fn put(&mut self, data: &[u8]) -> MusicResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.is_passthrough() {
            self.queue.extend(data.iter().copied());
            return Ok(());
        }

        let frame_size = self.src.frame_size();
        let mut input = data;
        if !self.partial.is_empty() {
            let need = frame_size - self.partial.len();
            let take = need.min(input.len());
            self.partial.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.partial.len() < frame_size {
                return Ok(());
            }
            let frame = std::mem::take(&mut self.partial);
            self.push_frames(&frame);
        }

        let whole = input.len() - input.len() % frame_size;
        self.push_frames(&input[..whole]);
        self.partial.extend_from_slice(&input[whole..]);
        Ok(())
    }

    /// Convert whole input frames and feed them through the rate converter.
    fn push_frames(&mut self, data: &[u8]) {
        let bps = self.src.format.bytes_per_sample();
        let in_ch = self.src.channels as usize;
        let out_ch = self.dst.channels as usize;
        let mut frame = vec![0f32; in_ch];

        for chunk in data.chunks_exact(bps * in_ch) {
            for (i, sample) in frame.iter_mut().enumerate() {
                *sample = sample_to_f32(self.src.format, &chunk[i * bps..(i + 1) * bps]);
            }
            remap_channels(&frame, out_ch, &mut self.converter.history);
        }

        if self.src.rate == self.dst.freq {
            let history = std::mem::take(&mut self.converter.history);
            for &s in &history {
                push_sample(self.dst.format, s, &mut self.queue);
            }
            self.converter.history = history;
            self.converter.history.clear();
        } else {
            self.resample(false);
        }
    }

    /// Emit every output frame the buffered input can produce.
    ///
    /// Output frame `k` sits at input position `k * in_rate / out_rate`.
    /// Without `drain`, an output frame is only produced once the input
    /// frame after it has arrived. With `drain` every position before the
    /// end of the input is emitted, so `n` input frames give exactly
    /// `ceil(n * out_rate / in_rate)` output frames.
    fn resample(&mut self, drain: bool) {
        let ch = self.dst.channels as usize;
        let step = self.src.rate as u64;
        let unit = self.dst.freq as u64;
        let frames = self.converter.history.len() / ch;
        if frames == 0 {
            return;
        }

        loop {
            let idx = (self.converter.phase / unit) as usize;
            let ready = if drain { idx < frames } else { idx + 1 < frames };
            if !ready {
                break;
            }
            let frac = (self.converter.phase % unit) as f32 / unit as f32;
            let next = (idx + 1).min(frames - 1);
            for c in 0..ch {
                let a = self.converter.history[idx * ch + c];
                let b = self.converter.history[next * ch + c];
                push_sample(self.dst.format, a + (b - a) * frac, &mut self.queue);
            }
            self.converter.phase += step;
        }

        let consumed = ((self.converter.phase / unit) as usize).min(frames);
        self.converter.history.drain(..consumed * ch);
        self.converter.phase -= consumed as u64 * unit;
    }

    /// Make all buffered input available as output (end of input).
    pub fn flush(&mut self) {
        if self.src.rate != self.dst.freq {
            self.resample(true);
        }
        self.converter.clear();
        self.partial.clear();
    }

    /// Drop everything queued or buffered.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.partial.clear();
        self.converter.clear();
    }

    /// Bytes ready to be read
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    /// Read converted output; returns the number of bytes written.
    pub fn get(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.queue.len());
        for (dst, src) in buf[..n].iter_mut().zip(self.queue.drain(..n)) {
            *dst = src;
        }
        n
    }
}

/// Append one frame of `input` to `out` at `out_ch` channels.
fn remap_channels(input: &[f32], out_ch: usize, out: &mut Vec<f32>) {
    let in_ch = input.len();
    if in_ch == out_ch {
        out.extend_from_slice(input);
    } else if in_ch == 1 {
        out.extend(std::iter::repeat(input[0]).take(out_ch));
    } else if out_ch == 1 {
        out.push(input.iter().sum::<f32>() / in_ch as f32);
    } else {
        for c in 0..out_ch {
            out.push(input.get(c).copied().unwrap_or(0.0));
        }
    }
}
