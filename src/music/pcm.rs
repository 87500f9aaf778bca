// pcm.rs - Consumer-side pull

//! The `PlayAudio` pull shared by all backends.
//!
//! A backend only has to implement [`PcmSource::get_some`], which hands out
//! whatever converted PCM it can produce right now. [`pull_audio`] keeps
//! calling it until the consumer's buffer is full, applies the music volume
//! and reports "done" once the source has finished for good.

use crate::error::MusicResult;
use crate::music::format::AudioFormat;

/// Highest music volume
pub const MAX_VOLUME: i32 = 128;

/// Consecutive empty `get_some` results tolerated in one pull
pub const MAX_ZERO_CYCLES: u32 = 10;

/// Result of one `get_some` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Chunk {
    pub bytes: usize,
    /// The source has stopped and its queue is empty
    pub done: bool,
}

/// Result of one consumer pull
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pulled {
    /// Bytes written to the front of the buffer
    pub bytes: usize,
    /// No more audio will follow
    pub done: bool,
}

/// A backend that can produce output-format PCM on demand
pub trait PcmSource {
    fn get_some(&mut self, buf: &mut [u8]) -> MusicResult<Chunk>;
}

/// Fill `buf` from `source`, scaling by `volume` (0..=128).
///
/// An error before anything was produced is returned; after a partial
/// fill the partial result is returned and the error stays in the last
/// error text.
pub fn pull_audio<S: PcmSource + ?Sized>(
    source: &mut S,
    buf: &mut [u8],
    volume: i32,
    format: AudioFormat,
) -> MusicResult<Pulled> {
    let mut filled = 0;
    let mut zero_cycles = 0;
    let mut done = false;

    while filled < buf.len() && !done {
        let chunk = match source.get_some(&mut buf[filled..]) {
            Ok(chunk) => chunk,
            Err(e) if filled == 0 => return Err(e),
            Err(e) => {
                log::debug!("pull stopped after {} bytes: {}", filled, e);
                break;
            }
        };
        done = chunk.done;

        if chunk.bytes == 0 {
            zero_cycles += 1;
            if zero_cycles > MAX_ZERO_CYCLES {
                log::trace!("no data after {} cycles, returning short fill", zero_cycles);
                break;
            }
            continue;
        }
        zero_cycles = 0;

        let end = filled + chunk.bytes;
        apply_volume(&mut buf[filled..end], volume, format);
        filled = end;
    }

    Ok(Pulled {
        bytes: filled,
        done,
    })
}

/// Scale samples in place by `volume / MAX_VOLUME`.
pub fn apply_volume(data: &mut [u8], volume: i32, format: AudioFormat) {
    let volume = volume.clamp(0, MAX_VOLUME);
    if volume == MAX_VOLUME {
        return;
    }

    match format {
        AudioFormat::U8 => {
            for s in data.iter_mut() {
                let centered = *s as i32 - 128;
                *s = (centered * volume / MAX_VOLUME + 128) as u8;
            }
        }
        AudioFormat::S16 => {
            for c in data.chunks_exact_mut(2) {
                let v = i16::from_ne_bytes([c[0], c[1]]) as i32 * volume / MAX_VOLUME;
                c.copy_from_slice(&(v as i16).to_ne_bytes());
            }
        }
        AudioFormat::S32 => {
            for c in data.chunks_exact_mut(4) {
                let v = i32::from_ne_bytes([c[0], c[1], c[2], c[3]]) as i64 * volume as i64
                    / MAX_VOLUME as i64;
                c.copy_from_slice(&(v as i32).to_ne_bytes());
            }
        }
        AudioFormat::F32 => {
            let scale = volume as f32 / MAX_VOLUME as f32;
            for c in data.chunks_exact_mut(4) {
                let v = f32::from_ne_bytes([c[0], c[1], c[2], c[3]]) * scale;
                c.copy_from_slice(&v.to_ne_bytes());
            }
        }
    }
}
