// symphonia.rs - Built-in decoding library

//! The built-in decoding library, bound to `symphonia`.
//!
//! Symphonia is linked statically, so its "components" are always present
//! and always report the version this crate was built against. Going
//! through [`BackendLoader`] anyway keeps one code path for every library.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::Mutex;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{CodecType, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::IntoSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::sample::{Sample, SampleFormat as NativeSampleFormat};

use crate::backend::adapter::{StreamAdapter, IO_BUFFER_SIZE};
use crate::backend::codec::{
    AudioDecoder, CodecDescriptor, CodecError, CodecId, CodecLibrary, CodecParameters,
    CodecResult, Demuxer, Dictionary, Frame, Packet, Rational, StreamInfo,
};
use crate::backend::loader::{abi_version, AbiVersion, BackendLoader, ComponentSpec, LibraryProvider, SharedObject};
use crate::music::format::{ChannelLayout, SampleFormat};

/// Version of the symphonia API this binding targets
pub const SYMPHONIA_ABI: AbiVersion = abi_version(0, 5, 4);

static COMPONENTS: [ComponentSpec; 2] = [
    ComponentSpec {
        name: "symphonia-core",
        compiled: SYMPHONIA_ABI,
        symbols: &["get_probe", "next_packet", "seek", "metadata"],
    },
    ComponentSpec {
        name: "symphonia-codecs",
        compiled: SYMPHONIA_ABI,
        symbols: &["get_codecs", "make", "decode", "reset"],
    },
];

/// Statically linked component
struct BuiltinObject {
    spec: &'static ComponentSpec,
}

impl SharedObject for BuiltinObject {
    fn lookup(&self, symbol: &str) -> bool {
        self.spec.symbols.contains(&symbol)
    }

    fn version(&self) -> AbiVersion {
        SYMPHONIA_ABI
    }
}

/// Provider for the statically linked symphonia library
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinProvider;

impl LibraryProvider for BuiltinProvider {
    fn components(&self) -> &[ComponentSpec] {
        &COMPONENTS
    }

    fn open(&self, component: &ComponentSpec) -> Result<Box<dyn SharedObject>, String> {
        COMPONENTS
            .iter()
            .find(|c| c.name == component.name)
            .map(|spec| Box::new(BuiltinObject { spec }) as Box<dyn SharedObject>)
            .ok_or_else(|| format!("no built-in component named {}", component.name))
    }

    fn bind(&self, _objects: &[Box<dyn SharedObject>]) -> Result<Arc<dyn CodecLibrary>, String> {
        Ok(Arc::new(SymphoniaLibrary::new()))
    }
}

/// A loader for the built-in library
pub fn builtin_loader() -> Arc<BackendLoader> {
    Arc::new(BackendLoader::new("Container", Box::new(BuiltinProvider)))
}

fn map_error(err: SymphoniaError) -> CodecError {
    match err {
        SymphoniaError::IoError(e) => CodecError::from(e),
        SymphoniaError::DecodeError(msg) => CodecError::InvalidData(msg.to_string()),
        SymphoniaError::Unsupported(msg) => CodecError::Unsupported(msg.to_string()),
        SymphoniaError::SeekError(kind) => CodecError::Other(format!("seek error: {:?}", kind)),
        SymphoniaError::LimitError(msg) => CodecError::Other(format!("limit reached: {}", msg)),
        SymphoniaError::ResetRequired => CodecError::Other("decoder reset required".to_string()),
    }
}

fn map_sample_format(format: NativeSampleFormat) -> SampleFormat {
    // Symphonia always decodes into planar buffers
    match format {
        NativeSampleFormat::U8 | NativeSampleFormat::S8 => SampleFormat::U8P,
        NativeSampleFormat::U16 | NativeSampleFormat::S16 => SampleFormat::S16P,
        NativeSampleFormat::U24
        | NativeSampleFormat::S24
        | NativeSampleFormat::U32
        | NativeSampleFormat::S32 => SampleFormat::S32P,
        NativeSampleFormat::F32 => SampleFormat::F32P,
        NativeSampleFormat::F64 => SampleFormat::F64P,
    }
}

/// `Read + Seek + Sync` view of a [`StreamAdapter`]
struct SharedAdapter(Mutex<StreamAdapter>);

impl Read for SharedAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.get_mut().read(buf)
    }
}

impl Seek for SharedAdapter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Seek::seek(self.0.get_mut(), pos)
    }
}

impl MediaSource for SharedAdapter {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        self.0.lock().size().ok().map(|n| n as u64)
    }
}

/// Per-stream data symphonia needs to build a decoder
struct NativeTrack {
    track_id: u32,
    params: symphonia::core::codecs::CodecParameters,
}

pub struct SymphoniaLibrary {
    /// Codec types seen so far; a `CodecId` is the index plus one
    codecs: Mutex<Vec<CodecType>>,
}

impl SymphoniaLibrary {
    pub fn new() -> Self {
        Self {
            codecs: Mutex::new(Vec::new()),
        }
    }

    fn intern(&self, codec: CodecType) -> CodecId {
        let mut codecs = self.codecs.lock();
        let index = match codecs.iter().position(|c| *c == codec) {
            Some(index) => index,
            None => {
                codecs.push(codec);
                codecs.len() - 1
            }
        };
        CodecId(index as u32 + 1)
    }

    fn codec_type(&self, id: CodecId) -> Option<CodecType> {
        let index = (id.0 as usize).checked_sub(1)?;
        self.codecs.lock().get(index).copied()
    }

    fn describe(&self, codec: CodecType) -> Option<CodecDescriptor> {
        let desc = symphonia::default::get_codecs().get_codec(codec)?;
        Some(CodecDescriptor {
            id: self.intern(codec),
            name: desc.short_name.to_string(),
        })
    }
}

impl Default for SymphoniaLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecLibrary for SymphoniaLibrary {
    fn name(&self) -> &str {
        "symphonia"
    }

    fn open_input(&self, io: StreamAdapter) -> CodecResult<Box<dyn Demuxer>> {
        let source: Box<dyn MediaSource> = Box::new(SharedAdapter(Mutex::new(io)));
        let stream = MediaSourceStream::new(
            source,
            MediaSourceStreamOptions {
                buffer_len: IO_BUFFER_SIZE,
            },
        );
        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let mut probed = symphonia::default::get_probe()
            .format(&Hint::new(), stream, &format_opts, &MetadataOptions::default())
            .map_err(map_error)?;

        let mut metadata = Dictionary::new();
        if let Some(probed_meta) = probed.metadata.get() {
            if let Some(revision) = probed_meta.current() {
                collect_tags(revision, &mut metadata);
            }
        }
        if let Some(revision) = probed.format.metadata().current() {
            collect_tags(revision, &mut metadata);
        }

        let mut streams = Vec::new();
        let mut track_ids = Vec::new();
        for (index, track) in probed.format.tracks().iter().enumerate() {
            let cp = &track.codec_params;
            let time_base = match (cp.time_base, cp.sample_rate) {
                (Some(tb), _) => Rational::new(tb.numer as i32, tb.denom as i32),
                (None, Some(rate)) => Rational::new(1, rate as i32),
                (None, None) => Rational::new(1, 1),
            };
            let channels = cp.channels.map(|c| c.count() as u16).unwrap_or(0);
            let layout = cp
                .channels
                .map(|c| ChannelLayout(c.bits() as u64))
                .unwrap_or_default();
            let codec_id = if cp.codec == CODEC_TYPE_NULL {
                None
            } else {
                Some(self.intern(cp.codec))
            };
            streams.push(StreamInfo {
                index,
                time_base,
                params: CodecParameters {
                    codec_id,
                    sample_format: cp.sample_format.map(map_sample_format),
                    sample_rate: cp.sample_rate.unwrap_or(0),
                    channels,
                    layout,
                    frames: cp.n_frames,
                    native: Some(Arc::new(NativeTrack {
                        track_id: track.id,
                        params: cp.clone(),
                    })),
                },
            });
            track_ids.push(track.id);
        }

        let default_track = probed.format.default_track().map(|t| t.id);
        let best = default_track
            .and_then(|id| track_ids.iter().position(|t| *t == id))
            .filter(|&i| streams[i].is_audio() && streams[i].params.codec_id.is_some())
            .or_else(|| {
                streams
                    .iter()
                    .position(|s| s.is_audio() && s.params.codec_id.is_some())
            });
        let best = best.map(|i| {
            let codec = self
                .codec_type(streams[i].params.codec_id.unwrap_or(CodecId::NONE))
                .and_then(|ty| self.describe(ty));
            (i, codec)
        });

        log::debug!(
            "probed container: {} stream(s), {} metadata entries",
            streams.len(),
            metadata.len()
        );

        Ok(Box::new(SymphoniaDemuxer {
            reader: probed.format,
            streams,
            track_ids,
            best,
            metadata,
        }))
    }

    fn find_decoder(&self, id: CodecId) -> Option<CodecDescriptor> {
        self.codec_type(id).and_then(|ty| self.describe(ty))
    }

    fn open_decoder(
        &self,
        codec: &CodecDescriptor,
        params: &CodecParameters,
    ) -> CodecResult<Box<dyn AudioDecoder>> {
        let native = params
            .native
            .as_ref()
            .and_then(|n| n.downcast_ref::<NativeTrack>())
            .ok_or_else(|| CodecError::InvalidData("stream was not opened by symphonia".to_string()))?;
        if self.codec_type(codec.id) != Some(native.params.codec) {
            return Err(CodecError::InvalidData(format!(
                "decoder {} does not match the stream codec",
                codec.name
            )));
        }
        let decoder = symphonia::default::get_codecs()
            .make(&native.params, &DecoderOptions::default())
            .map_err(map_error)?;
        Ok(Box::new(SymphoniaDecoder {
            decoder,
            track_id: native.track_id,
            ready: None,
            spare: Frame::new(),
        }))
    }
}

fn collect_tags(revision: &MetadataRevision, dict: &mut Dictionary) {
    for tag in revision.tags() {
        let key = match tag.std_key {
            Some(StandardTagKey::TrackTitle) => "title".to_string(),
            Some(StandardTagKey::Artist) => "artist".to_string(),
            Some(StandardTagKey::Album) => "album".to_string(),
            Some(StandardTagKey::Copyright) => "copyright".to_string(),
            _ => tag.key.to_ascii_lowercase(),
        };
        dict.insert(&key, &tag.value.to_string());
    }
}

struct SymphoniaDemuxer {
    reader: Box<dyn FormatReader>,
    streams: Vec<StreamInfo>,
    track_ids: Vec<u32>,
    best: Option<(usize, Option<CodecDescriptor>)>,
    metadata: Dictionary,
}

impl Demuxer for SymphoniaDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn find_best_audio_stream(&self) -> CodecResult<(usize, Option<CodecDescriptor>)> {
        self.best
            .clone()
            .ok_or_else(|| CodecError::Other("Stream not found".to_string()))
    }

    fn read_packet(&mut self) -> CodecResult<Packet> {
        let packet = self.reader.next_packet().map_err(map_error)?;
        let stream_index = self
            .track_ids
            .iter()
            .position(|id| *id == packet.track_id())
            .unwrap_or(usize::MAX);
        Ok(Packet {
            stream_index,
            pts: i64::try_from(packet.ts).ok(),
            duration: packet.dur as i64,
            data: packet.buf().to_vec(),
        })
    }

    fn seek(
        &mut self,
        stream: usize,
        min_ts: i64,
        ts: i64,
        max_ts: i64,
        any: bool,
    ) -> CodecResult<()> {
        if ts < min_ts || ts > max_ts {
            return Err(CodecError::Other(format!(
                "timestamp {} outside [{}, {}]",
                ts, min_ts, max_ts
            )));
        }
        let track_id = *self
            .track_ids
            .get(stream)
            .ok_or_else(|| CodecError::Other(format!("no stream {}", stream)))?;
        let mode = if any {
            SeekMode::Coarse
        } else {
            SeekMode::Accurate
        };
        self.reader
            .seek(
                mode,
                SeekTo::TimeStamp {
                    ts: ts.max(0) as u64,
                    track_id,
                },
            )
            .map_err(map_error)?;
        Ok(())
    }

    fn metadata(&self) -> Option<&Dictionary> {
        if self.metadata.is_empty() {
            None
        } else {
            Some(&self.metadata)
        }
    }
}

struct SymphoniaDecoder {
    decoder: Box<dyn Decoder>,
    track_id: u32,
    /// Frame decoded by the last `send_packet`, waiting for `receive_frame`
    ready: Option<Frame>,
    /// Storage handed back by `receive_frame`, filled by the next decode
    spare: Frame,
}

impl AudioDecoder for SymphoniaDecoder {
    fn send_packet(&mut self, packet: &Packet) -> CodecResult<()> {
        if self.ready.is_some() {
            return Err(CodecError::Again);
        }
        let native = symphonia::core::formats::Packet::new_from_slice(
            self.track_id,
            packet.pts.unwrap_or(0).max(0) as u64,
            packet.duration.max(0) as u64,
            &packet.data,
        );
        match self.decoder.decode(&native) {
            Ok(decoded) => {
                let mut frame = std::mem::take(&mut self.spare);
                fill_frame(decoded, &mut frame);
                self.ready = Some(frame);
                Ok(())
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                // Corrupt packet: drop it and carry on with the next one
                log::debug!("skipping undecodable packet: {}", msg);
                Ok(())
            }
            Err(e) => Err(map_error(e)),
        }
    }

    fn receive_frame(&mut self, frame: &mut Frame) -> CodecResult<()> {
        match self.ready.take() {
            Some(mut ready) => {
                std::mem::swap(frame, &mut ready);
                self.spare = ready;
                Ok(())
            }
            None => Err(CodecError::Again),
        }
    }

    fn flush(&mut self) {
        if let Some(frame) = self.ready.take() {
            self.spare = frame;
        }
        self.decoder.reset();
    }
}

/// Native-endian byte output for the sample types frames carry
trait PutBytes: Copy {
    fn put(self, out: &mut Vec<u8>);
}

impl PutBytes for u8 {
    fn put(self, out: &mut Vec<u8>) {
        out.push(self);
    }
}

impl PutBytes for i16 {
    fn put(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_ne_bytes());
    }
}

impl PutBytes for i32 {
    fn put(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_ne_bytes());
    }
}

impl PutBytes for f32 {
    fn put(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_ne_bytes());
    }
}

impl PutBytes for f64 {
    fn put(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_ne_bytes());
    }
}

fn copy_planes<S, T>(buf: &AudioBuffer<S>, format: SampleFormat, frame: &mut Frame)
where
    S: Sample + IntoSample<T>,
    T: PutBytes,
{
    let spec = buf.spec();
    let channels = spec.channels.count();
    frame.format = Some(format);
    frame.rate = spec.rate;
    frame.channels = channels as u16;
    frame.layout = ChannelLayout(spec.channels.bits() as u64);
    frame.nb_samples = buf.frames();
    frame.planes.resize_with(channels, Vec::new);
    for (ch, plane) in frame.planes.iter_mut().enumerate() {
        plane.clear();
        plane.reserve(buf.frames() * format.bytes_per_sample());
        for &sample in buf.chan(ch) {
            let value: T = sample.into_sample();
            value.put(plane);
        }
    }
}

fn fill_frame(decoded: AudioBufferRef<'_>, frame: &mut Frame) {
    match decoded {
        AudioBufferRef::U8(buf) => copy_planes::<u8, u8>(&*buf, SampleFormat::U8P, frame),
        AudioBufferRef::S8(buf) => copy_planes::<i8, u8>(&*buf, SampleFormat::U8P, frame),
        AudioBufferRef::U16(buf) => copy_planes::<u16, i16>(&*buf, SampleFormat::S16P, frame),
        AudioBufferRef::S16(buf) => copy_planes::<i16, i16>(&*buf, SampleFormat::S16P, frame),
        AudioBufferRef::U24(buf) => copy_planes::<_, i32>(&*buf, SampleFormat::S32P, frame),
        AudioBufferRef::S24(buf) => copy_planes::<_, i32>(&*buf, SampleFormat::S32P, frame),
        AudioBufferRef::U32(buf) => copy_planes::<u32, i32>(&*buf, SampleFormat::S32P, frame),
        AudioBufferRef::S32(buf) => copy_planes::<i32, i32>(&*buf, SampleFormat::S32P, frame),
        AudioBufferRef::F32(buf) => copy_planes::<f32, f32>(&*buf, SampleFormat::F32P, frame),
        AudioBufferRef::F64(buf) => copy_planes::<f64, f64>(&*buf, SampleFormat::F64P, frame),
    }
}
