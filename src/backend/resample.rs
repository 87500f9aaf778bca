//! Planar to interleaved frame conversion.
//!
//! The pipeline only ever asks the resampler to change the sample layout:
//! rate, channel layout and sample type stay as decoded. Rate and channel
//! conversion to the engine format happen later in the output stream.

use crate::backend::codec::{CodecError, CodecResult, Frame, Resampler, ResamplerConfig};
use crate::music::format::SampleFormat;

/// Default [`Resampler`]: interleaves planar frames
#[derive(Debug, Clone)]
pub struct Interleaver {
    in_format: SampleFormat,
    channels: usize,
    bps: usize,
}

impl Interleaver {
    pub fn new(config: &ResamplerConfig) -> CodecResult<Self> {
        if config.in_format.packed() != config.out_format || config.out_format.is_planar() {
            return Err(CodecError::Unsupported(format!(
                "conversion {} -> {}",
                config.in_format, config.out_format
            )));
        }
        if config.in_rate != config.out_rate {
            return Err(CodecError::Unsupported(format!(
                "rate conversion {} -> {}",
                config.in_rate, config.out_rate
            )));
        }
        if config.in_layout != config.out_layout {
            return Err(CodecError::Unsupported("channel layout conversion".to_string()));
        }
        if config.channels == 0 {
            return Err(CodecError::InvalidData("zero channels".to_string()));
        }
        Ok(Self {
            in_format: config.in_format,
            channels: config.channels as usize,
            bps: config.in_format.bytes_per_sample(),
        })
    }
}

impl Resampler for Interleaver {
    fn convert(&mut self, out: &mut [u8], out_samples: usize, frame: &Frame) -> CodecResult<usize> {
        let count = frame.nb_samples.min(out_samples);
        let frame_bytes = self.bps * self.channels;
        if out.len() < count * frame_bytes {
            return Err(CodecError::Other(format!(
                "output buffer holds {} bytes, {} needed",
                out.len(),
                count * frame_bytes
            )));
        }
        if frame.channels as usize != self.channels {
            return Err(CodecError::InvalidData(format!(
                "frame has {} channels, resampler expects {}",
                frame.channels, self.channels
            )));
        }

        if !self.in_format.is_planar() {
            let plane = frame
                .planes
                .first()
                .ok_or_else(|| CodecError::InvalidData("frame has no data".to_string()))?;
            let len = count * frame_bytes;
            if plane.len() < len {
                return Err(CodecError::InvalidData("short frame plane".to_string()));
            }
            out[..len].copy_from_slice(&plane[..len]);
            return Ok(count);
        }

        if frame.planes.len() < self.channels {
            return Err(CodecError::InvalidData(format!(
                "frame has {} planes for {} channels",
                frame.planes.len(),
                self.channels
            )));
        }
        for (ch, plane) in frame.planes[..self.channels].iter().enumerate() {
            if plane.len() < count * self.bps {
                return Err(CodecError::InvalidData("short frame plane".to_string()));
            }
            for i in 0..count {
                let dst = i * frame_bytes + ch * self.bps;
                let src = i * self.bps;
                out[dst..dst + self.bps].copy_from_slice(&plane[src..src + self.bps]);
            }
        }
        Ok(count)
    }
}
