// pipeline.rs - Container decode pipeline

//! Per-track decode state of the container backend.
//!
//! Open: wrap the source, probe the container, pick the best audio stream,
//! resolve and open its decoder, negotiate the output format. Pull: drain
//! converted PCM, and when the queue runs dry read packets of the selected
//! stream and decode them until something comes out or the stream ends.
//! The end of a pass either stops the player or rewinds it, depending on
//! the loop counter.

use std::sync::Arc;

use crate::backend::adapter::StreamAdapter;
use crate::backend::codec::{
    rescale, AudioDecoder, CodecError, CodecLibrary, Demuxer, Frame, Packet, Rational, Resampler,
    ResamplerConfig, TIME_BASE,
};
use crate::backend::loader::{BackendLease, BackendLoader};
use crate::container::merge::MergeBuffer;
use crate::error::{self, MusicError, MusicResult};
use crate::music::format::{ChannelLayout, OutputSpec, SampleFormat, SampleFormatDescriptor};
use crate::music::interface::Music;
use crate::music::meta::{MetaTag, MetaTagSet};
use crate::music::pcm::{self, Chunk, PcmSource, Pulled, MAX_VOLUME};
use crate::music::playback::{PassEnd, PlaybackState};
use crate::music::source::MusicSource;
use crate::music::stream::{AudioStream, StreamSpec};

/// Frames the merge buffer holds before it has to grow
pub const MERGE_BUFFER_FRAMES: usize = 4096;

/// Format of decoded audio as reported by the stream or a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample: Option<SampleFormat>,
    pub rate: u32,
    pub channels: u16,
    pub layout: ChannelLayout,
}

impl StreamFormat {
    fn of_frame(frame: &Frame) -> Self {
        Self {
            sample: frame.format,
            rate: frame.rate,
            channels: frame.channels,
            layout: frame.layout,
        }
    }
}

/// The format the output chain is currently set up for
#[derive(Debug, Clone, Copy)]
struct Negotiated {
    sample: SampleFormat,
    rate: u32,
    channels: u16,
    desc: SampleFormatDescriptor,
}

/// Outcome of feeding one packet to the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Got,
    Nothing,
    Eof,
}

/// Convert seconds to stream time-base units with millisecond precision.
pub fn seek_timestamp(seconds: f64, time_base: Rational) -> i64 {
    rescale(
        (seconds * 1000.0) as i64,
        time_base.den as i64,
        time_base.num as i64,
    ) / 1000
}

fn native_error(library: &dyn CodecLibrary, context: &str, err: &CodecError) -> MusicError {
    MusicError::native(format!("Container: {}", context), library.strerror(err)).report()
}

/// A track decoded through a [`CodecLibrary`]
pub struct ContainerMusic {
    // Native handles are declared (and so dropped) before the lease that
    // keeps their library loaded.
    decoder: Box<dyn AudioDecoder>,
    demuxer: Box<dyn Demuxer>,
    resampler: Option<Box<dyn Resampler>>,
    frame: Frame,
    merge: Option<MergeBuffer>,
    stream: Option<AudioStream>,
    negotiated: Option<Negotiated>,
    stream_index: usize,
    time_base: Rational,
    spec: OutputSpec,
    playback: PlaybackState,
    volume: i32,
    position: Option<f64>,
    duration: Option<f64>,
    tags: MetaTagSet,
    lease: BackendLease,
}

impl ContainerMusic {
    /// Open `source` with the library managed by `loader`.
    ///
    /// Every handle acquired before a failing step is released again.
    pub fn open(
        loader: &Arc<BackendLoader>,
        source: MusicSource,
        spec: OutputSpec,
    ) -> MusicResult<Self> {
        let lease = loader.acquire()?;
        let library = Arc::clone(lease.library());

        let io = StreamAdapter::new(source).map_err(|e| MusicError::from(e).report())?;
        let demuxer = library
            .open_input(io)
            .map_err(|e| native_error(&*library, "Failed to open the input", &e))?;

        let (stream_index, codec) = demuxer.find_best_audio_stream().map_err(|e| {
            native_error(&*library, "Could not find audio stream in input file", &e)
        })?;
        let info = demuxer.streams().get(stream_index).cloned().ok_or_else(|| {
            MusicError::native("Container", format!("stream {} does not exist", stream_index))
                .report()
        })?;

        let codec = match codec {
            Some(codec) => codec,
            None => info
                .params
                .codec_id
                .and_then(|id| library.find_decoder(id))
                .ok_or_else(|| {
                    MusicError::native("Container", "Failed to find audio codec").report()
                })?,
        };
        let decoder = library
            .open_decoder(&codec, &info.params)
            .map_err(|e| native_error(&*library, "Failed to initialise the decoder", &e))?;

        let tags = demuxer
            .metadata()
            .map(MetaTagSet::from_dictionary)
            .unwrap_or_default();

        let duration = match demuxer.duration() {
            Some(d) if d != 0 => Some(d as f64 / TIME_BASE as f64),
            _ => match info.params.frames {
                Some(frames) if frames > 0 && info.params.sample_rate > 0 => {
                    Some(frames as f64 / info.params.sample_rate as f64)
                }
                _ => None,
            },
        };

        let mut music = ContainerMusic {
            decoder,
            demuxer,
            resampler: None,
            frame: Frame::new(),
            merge: None,
            stream: None,
            negotiated: None,
            stream_index,
            time_base: info.time_base,
            spec,
            playback: PlaybackState::new(),
            volume: MAX_VOLUME,
            position: Some(0.0),
            duration,
            tags,
            lease,
        };

        music.update_stream(StreamFormat {
            sample: info.params.sample_format,
            rate: info.params.sample_rate,
            channels: info.params.channels,
            layout: info.params.layout,
        })?;

        log::debug!(
            "Container: opened stream {} with {} ({} Hz, {} channels)",
            stream_index,
            codec.name,
            info.params.sample_rate,
            info.params.channels
        );
        Ok(music)
    }

    fn library(&self) -> &Arc<dyn CodecLibrary> {
        self.lease.library()
    }

    /// Set up the output chain for `format`.
    ///
    /// Returns `Ok(false)` when the format is not known yet (zero rate or
    /// channels, or no sample format), which is not an error.
    ///
    /// The resampler and merge buffer are rebuilt on a change, but the
    /// output stream is not replaced: only its input side is switched, so
    /// audio converted from earlier frames of the same packet stays queued
    /// instead of being freed with the old stream.
    fn update_stream(&mut self, format: StreamFormat) -> MusicResult<bool> {
        if format.rate == 0 || format.channels == 0 {
            return Ok(false);
        }
        let sample = match format.sample {
            Some(sample) => sample,
            None => return Ok(false),
        };
        if let Some(current) = self.negotiated {
            if current.sample == sample
                && current.rate == format.rate
                && current.channels == format.channels
                && self.stream.is_some()
            {
                return Ok(true);
            }
        }

        let desc = SampleFormatDescriptor::from_container(sample).map_err(MusicError::report)?;

        self.merge = None;
        self.resampler = None;
        self.negotiated = None;

        let input = StreamSpec::new(desc.sample_type, format.channels, format.rate);
        let stream = match self.stream.take() {
            Some(mut stream) => {
                stream.set_input_spec(input).map_err(MusicError::report)?;
                stream
            }
            None => AudioStream::new(input, self.spec).map_err(MusicError::report)?,
        };

        if desc.planar {
            let layout = if format.layout.is_empty() {
                ChannelLayout::default_for(format.channels)
            } else {
                format.layout
            };
            let config = ResamplerConfig {
                in_format: sample,
                out_format: sample.packed(),
                in_rate: format.rate,
                out_rate: format.rate,
                in_layout: layout,
                out_layout: layout,
                channels: format.channels,
            };
            let resampler = self.library().new_resampler(&config).map_err(|e| {
                native_error(&**self.library(), "Failed to initialise the resampler", &e)
            })?;
            let merge = MergeBuffer::with_size(
                format.channels as usize * desc.bytes_per_sample * MERGE_BUFFER_FRAMES,
            )
            .map_err(MusicError::report)?;
            self.resampler = Some(resampler);
            self.merge = Some(merge);
        }

        log::debug!(
            "Container: stream format {} {} Hz {} ch -> {} {} Hz {} ch",
            sample,
            format.rate,
            format.channels,
            self.spec.format,
            self.spec.freq,
            self.spec.channels
        );

        self.stream = Some(stream);
        self.negotiated = Some(Negotiated {
            sample,
            rate: format.rate,
            channels: format.channels,
            desc,
        });
        Ok(true)
    }

    /// Feed one packet and queue every frame it produces.
    fn decode_packet(&mut self, packet: &Packet) -> MusicResult<Step> {
        match self.decoder.send_packet(packet) {
            Ok(()) | Err(CodecError::Again) => {}
            Err(CodecError::Eof) => return Ok(Step::Eof),
            Err(e) => {
                let err = native_error(
                    &**self.library(),
                    "Error submitting a packet for decoding",
                    &e,
                );
                log::warn!("{}", err);
                return Err(err);
            }
        }

        let mut frame = std::mem::take(&mut self.frame);
        let result = self.receive_frames(&mut frame, packet);
        frame.unref();
        self.frame = frame;
        result
    }

    fn receive_frames(&mut self, frame: &mut Frame, packet: &Packet) -> MusicResult<Step> {
        let mut got_some = false;
        loop {
            match self.decoder.receive_frame(frame) {
                Ok(()) => {}
                Err(CodecError::Again) | Err(CodecError::Eof) => break,
                Err(e) => {
                    return Err(native_error(&**self.library(), "Error during decoding", &e));
                }
            }

            if !self.update_stream(StreamFormat::of_frame(frame))? {
                log::trace!("Container: skipping frame with unknown format");
                frame.unref();
                continue;
            }
            self.queue_frame(frame)?;

            self.position = packet
                .pts
                .map(|pts| pts as f64 * self.time_base.to_f64());
            frame.unref();
            got_some = true;
        }
        Ok(if got_some { Step::Got } else { Step::Nothing })
    }

    /// Push a decoded frame into the output queue, interleaving if planar.
    fn queue_frame(&mut self, frame: &Frame) -> MusicResult<()> {
        let negotiated = match self.negotiated {
            Some(n) => n,
            None => return Ok(()),
        };
        let channels = negotiated.channels as usize;
        let bps = negotiated.desc.bytes_per_sample;
        let (Some(stream), true) = (self.stream.as_mut(), frame.nb_samples > 0) else {
            return Ok(());
        };

        if negotiated.desc.planar {
            let (Some(merge), Some(resampler)) = (self.merge.as_mut(), self.resampler.as_mut())
            else {
                return Ok(());
            };
            merge.ensure(frame.data_len()).map_err(MusicError::report)?;
            let converted = resampler
                .convert(merge.as_mut_slice(), frame.nb_samples, frame)
                .map_err(|e| {
                    MusicError::native("Container: Failed to convert frame", e.to_string()).report()
                })?;
            stream
                .put(&merge.as_slice()[..converted * channels * bps])
                .map_err(MusicError::report)?;
        } else {
            let plane = frame.planes.first().map(Vec::as_slice).unwrap_or(&[]);
            let len = frame.data_len().min(plane.len());
            stream.put(&plane[..len]).map_err(MusicError::report)?;
        }
        Ok(())
    }

    /// Seek back to the start of the stream.
    ///
    /// The output stream is left alone, so a loop seam continues the rate
    /// converter where the previous pass ended.
    fn rewind(&mut self) -> MusicResult<()> {
        self.demuxer
            .seek(self.stream_index, i64::MIN, 0, i64::MAX, true)
            .map_err(|e| native_error(&**self.library(), "Failed to rewind", &e))?;
        self.decoder.flush();
        self.position = Some(0.0);
        Ok(())
    }

    /// Capacity of the merge buffer, if the stream is planar
    pub fn merge_buffer_capacity(&self) -> Option<usize> {
        self.merge.as_ref().map(MergeBuffer::capacity)
    }

    /// Index of the stream being decoded
    pub fn stream_index(&self) -> usize {
        self.stream_index
    }
}

impl PcmSource for ContainerMusic {
    fn get_some(&mut self, buf: &mut [u8]) -> MusicResult<Chunk> {
        if let Some(stream) = self.stream.as_mut() {
            let filled = stream.get(buf);
            if filled != 0 {
                return Ok(Chunk {
                    bytes: filled,
                    done: false,
                });
            }
        }

        if !self.playback.is_playing() {
            return Ok(Chunk {
                bytes: 0,
                done: true,
            });
        }

        let mut step = Step::Nothing;
        loop {
            let packet = match self.demuxer.read_packet() {
                Ok(packet) => packet,
                Err(CodecError::Eof) => {
                    step = Step::Eof;
                    break;
                }
                Err(e) => {
                    log::warn!("Container: reading packet failed: {}", e);
                    error::set_error(&format!("Container: Failed to read packet: {}", e));
                    break;
                }
            };
            if packet.stream_index != self.stream_index {
                continue;
            }
            match self.decode_packet(&packet)? {
                Step::Got => {
                    step = Step::Got;
                    break;
                }
                Step::Nothing => continue,
                Step::Eof => {
                    step = Step::Eof;
                    break;
                }
            }
        }

        if step != Step::Got {
            match self.playback.end_of_pass() {
                PassEnd::Finished => {
                    if let Some(stream) = self.stream.as_mut() {
                        stream.flush();
                    }
                }
                PassEnd::Rewind(loops) => {
                    if let Err(e) = self.rewind() {
                        self.playback.stop();
                        return Err(e);
                    }
                    self.playback.start(loops);
                }
            }
        }

        Ok(Chunk {
            bytes: 0,
            done: false,
        })
    }
}

impl Music for ContainerMusic {
    fn set_volume(&mut self, volume: i32) {
        self.volume = volume.clamp(0, MAX_VOLUME);
    }

    fn volume(&self) -> i32 {
        self.volume
    }

    fn play(&mut self, loops: i32) -> MusicResult<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream.clear();
        }
        self.rewind()?;
        self.playback.start(loops);
        Ok(())
    }

    fn stop(&mut self) {
        self.playback.stop();
    }

    fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    fn play_audio(&mut self, buf: &mut [u8]) -> MusicResult<Pulled> {
        let volume = self.volume;
        let format = self.spec.format;
        pcm::pull_audio(self, buf, volume, format)
    }

    fn seek(&mut self, position: f64) -> MusicResult<()> {
        if !position.is_finite() || position < 0.0 {
            return Err(
                MusicError::InvalidArgument(format!("seek position {}", position)).report()
            );
        }
        let ts = seek_timestamp(position, self.time_base);
        if let Err(e) = self.demuxer.seek(self.stream_index, 0, ts, ts, true) {
            log::warn!("Container: Seek failed: {}", e);
            return Err(native_error(&**self.library(), "Seek failed", &e));
        }
        self.position = Some(position);
        self.decoder.flush();
        if let Some(stream) = self.stream.as_mut() {
            stream.clear();
        }
        Ok(())
    }

    fn tell(&self) -> Option<f64> {
        self.position
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn meta_tag(&self, tag: MetaTag) -> Option<&str> {
        self.tags.get(tag)
    }
}
