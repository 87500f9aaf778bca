//! Synthetic codec library for integration tests.
//!
//! Containers start with `SYNT` followed by a little-endian header:
//!
//! ```text
//! u8  format code (0xFF = not known until decoding)
//! u32 sample rate
//! u16 channels
//! u64 channel layout
//! u64 frames (0 = unknown)
//! i64 duration in microseconds (0 = unknown)
//! u8  1 if the best-stream lookup names a decoder
//! u8  tag count, then (u8 len, key, u8 len, value) pairs
//! ```
//!
//! followed by packets: `u8 stream, i64 pts (i64::MIN = none), u8 format,
//! u32 rate, u16 channels, u32 samples, u32 data length, data`. Stream 0 is
//! audio, stream 1 is a data stream the pipeline must skip. Format code
//! `CORRUPT` makes the decoder fail on that packet.

#![allow(dead_code)]

use std::io::Read;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use mixmusic::backend::{
    abi_version, AbiVersion, AudioDecoder, BackendLoader, CodecDescriptor, CodecError, CodecId,
    CodecLibrary, CodecParameters, CodecResult, ComponentSpec, Demuxer, Dictionary, Frame,
    LibraryProvider, Packet, Rational, SharedObject, StreamAdapter, StreamInfo,
};
use mixmusic::music::{ChannelLayout, SampleFormat};

pub const MAGIC: &[u8; 4] = b"SYNT";
pub const UNKNOWN_FORMAT: u8 = 0xFF;
pub const CORRUPT: u8 = 0xEE;
pub const NO_PTS: i64 = i64::MIN;
pub const SYNT_CODEC: CodecId = CodecId(7);

pub const COMPILED: AbiVersion = abi_version(4, 2, 0);
pub const SYMBOLS: &[&str] = &["synt_open_input", "synt_read_packet", "synt_decode"];

pub const FORMATS: [SampleFormat; 12] = [
    SampleFormat::U8,
    SampleFormat::S16,
    SampleFormat::S32,
    SampleFormat::S64,
    SampleFormat::F32,
    SampleFormat::F64,
    SampleFormat::U8P,
    SampleFormat::S16P,
    SampleFormat::S32P,
    SampleFormat::S64P,
    SampleFormat::F32P,
    SampleFormat::F64P,
];

pub fn format_code(format: SampleFormat) -> u8 {
    FORMATS.iter().position(|&f| f == format).map_or(UNKNOWN_FORMAT, |i| i as u8)
}

fn format_from_code(code: u8) -> Option<SampleFormat> {
    FORMATS.get(code as usize).copied()
}

/// Observable side effects of the synthetic library
#[derive(Debug, Default)]
pub struct SyntStats {
    pub demuxers_open: AtomicUsize,
    pub decoders_open: AtomicUsize,
    pub seeks: AtomicUsize,
    pub last_seek: AtomicI64,
    pub flushes: AtomicUsize,
    pub packets_sent: AtomicUsize,
}

impl SyntStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// One packet of a synthetic container
#[derive(Debug, Clone)]
pub struct SyntPacket {
    pub stream: u8,
    pub pts: i64,
    pub format: u8,
    pub rate: u32,
    pub channels: u16,
    pub samples: u32,
    pub data: Vec<u8>,
}

/// Sample bytes for `format` where channel `c` of every frame holds the
/// value `(c + 1) / 4` full scale.
pub fn sample_data(format: SampleFormat, channels: u16, samples: u32) -> Vec<u8> {
    let value = |c: u16| (c as f64 + 1.0) / 4.0;
    let encode = |v: f64| -> Vec<u8> {
        match format.packed() {
            SampleFormat::U8 => vec![(v * 128.0 + 128.0) as u8],
            SampleFormat::S16 => ((v * 32767.0) as i16).to_ne_bytes().to_vec(),
            SampleFormat::S32 => ((v * 2147483647.0) as i32).to_ne_bytes().to_vec(),
            SampleFormat::S64 => ((v * 9.2e18) as i64).to_ne_bytes().to_vec(),
            SampleFormat::F32 => (v as f32).to_ne_bytes().to_vec(),
            _ => v.to_ne_bytes().to_vec(),
        }
    };
    let mut out = Vec::new();
    if format.is_planar() {
        for c in 0..channels {
            for _ in 0..samples {
                out.extend(encode(value(c)));
            }
        }
    } else {
        for _ in 0..samples {
            for c in 0..channels {
                out.extend(encode(value(c)));
            }
        }
    }
    out
}

/// Builder for synthetic containers
#[derive(Debug, Clone)]
pub struct SyntFile {
    pub format: u8,
    pub rate: u32,
    pub channels: u16,
    pub layout: u64,
    pub frames: u64,
    pub duration_us: i64,
    pub names_decoder: bool,
    pub tags: Vec<(String, String)>,
    pub packets: Vec<SyntPacket>,
}

impl SyntFile {
    pub fn new(format: SampleFormat, rate: u32, channels: u16) -> Self {
        Self {
            format: format_code(format),
            rate,
            channels,
            layout: 0,
            frames: 0,
            duration_us: 0,
            names_decoder: true,
            tags: Vec::new(),
            packets: Vec::new(),
        }
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }

    /// Append `count` audio packets of `samples` frames in the header format.
    /// Timestamps count samples (time base 1/rate).
    pub fn audio_packets(mut self, count: usize, samples: u32) -> Self {
        let format = format_from_code(self.format).unwrap_or(SampleFormat::S16);
        for _ in 0..count {
            let pts = self.next_pts();
            self.packets.push(SyntPacket {
                stream: 0,
                pts,
                format: format_code(format),
                rate: self.rate,
                channels: self.channels,
                samples,
                data: sample_data(format, self.channels, samples),
            });
        }
        self
    }

    pub fn packet(mut self, packet: SyntPacket) -> Self {
        self.packets.push(packet);
        self
    }

    /// A packet of the data stream
    pub fn data_packet(mut self) -> Self {
        self.packets.push(SyntPacket {
            stream: 1,
            pts: NO_PTS,
            format: UNKNOWN_FORMAT,
            rate: 0,
            channels: 0,
            samples: 0,
            data: vec![0xAB; 16],
        });
        self
    }

    fn next_pts(&self) -> i64 {
        self.packets
            .iter()
            .filter(|p| p.stream == 0)
            .map(|p| p.samples as i64)
            .sum()
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        out.push(self.format);
        out.extend(self.rate.to_le_bytes());
        out.extend(self.channels.to_le_bytes());
        out.extend(self.layout.to_le_bytes());
        out.extend(self.frames.to_le_bytes());
        out.extend(self.duration_us.to_le_bytes());
        out.push(self.names_decoder as u8);
        out.push(self.tags.len() as u8);
        for (key, value) in &self.tags {
            out.push(key.len() as u8);
            out.extend(key.as_bytes());
            out.push(value.len() as u8);
            out.extend(value.as_bytes());
        }
        for p in &self.packets {
            out.push(p.stream);
            out.extend(p.pts.to_le_bytes());
            out.push(p.format);
            out.extend(p.rate.to_le_bytes());
            out.extend(p.channels.to_le_bytes());
            out.extend(p.samples.to_le_bytes());
            out.extend((p.data.len() as u32).to_le_bytes());
            out.extend(&p.data);
        }
        out
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(CodecError::InvalidData("truncated container".to_string()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> CodecResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> CodecResult<u32> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(b))
    }

    fn u64(&mut self) -> CodecResult<u64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }

    fn string(&mut self) -> CodecResult<String> {
        let len = self.u8()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }
}

fn encode_packet_payload(p: &SyntPacket) -> Vec<u8> {
    let mut data = vec![p.format];
    data.extend(p.rate.to_le_bytes());
    data.extend(p.channels.to_le_bytes());
    data.extend(p.samples.to_le_bytes());
    data.extend(&p.data);
    data
}

pub struct SyntDemuxer {
    streams: Vec<StreamInfo>,
    packets: Vec<SyntPacket>,
    cursor: usize,
    metadata: Dictionary,
    duration_us: i64,
    names_decoder: bool,
    stats: Arc<SyntStats>,
}

impl Demuxer for SyntDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn find_best_audio_stream(&self) -> CodecResult<(usize, Option<CodecDescriptor>)> {
        let codec = self.names_decoder.then(|| CodecDescriptor {
            id: SYNT_CODEC,
            name: "synt".to_string(),
        });
        Ok((0, codec))
    }

    fn read_packet(&mut self) -> CodecResult<Packet> {
        let p = self.packets.get(self.cursor).ok_or(CodecError::Eof)?;
        self.cursor += 1;
        Ok(Packet {
            stream_index: p.stream as usize,
            pts: (p.pts != NO_PTS).then_some(p.pts),
            duration: p.samples as i64,
            data: encode_packet_payload(p),
        })
    }

    fn seek(&mut self, stream: usize, _min_ts: i64, ts: i64, _max_ts: i64, _any: bool) -> CodecResult<()> {
        self.stats.seeks.fetch_add(1, Ordering::SeqCst);
        self.stats.last_seek.store(ts, Ordering::SeqCst);
        if ts <= 0 {
            self.cursor = 0;
            return Ok(());
        }
        let target = self
            .packets
            .iter()
            .position(|p| p.stream as usize == stream && p.pts != NO_PTS && p.pts >= ts)
            .ok_or_else(|| CodecError::Other(format!("timestamp {} out of range", ts)))?;
        self.cursor = target;
        Ok(())
    }

    fn metadata(&self) -> Option<&Dictionary> {
        (!self.metadata.is_empty()).then_some(&self.metadata)
    }

    fn duration(&self) -> Option<i64> {
        (self.duration_us != 0).then_some(self.duration_us)
    }
}

impl Drop for SyntDemuxer {
    fn drop(&mut self) {
        self.stats.demuxers_open.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SyntDecoder {
    ready: Option<Frame>,
    stats: Arc<SyntStats>,
}

impl AudioDecoder for SyntDecoder {
    fn send_packet(&mut self, packet: &Packet) -> CodecResult<()> {
        self.stats.packets_sent.fetch_add(1, Ordering::SeqCst);
        let mut r = Reader {
            data: &packet.data,
            pos: 0,
        };
        let code = r.u8()?;
        if code == CORRUPT {
            return Err(CodecError::InvalidData("corrupt packet".to_string()));
        }
        let format = format_from_code(code);
        let rate = r.u32()?;
        let channels = r.u16()?;
        let samples = r.u32()? as usize;
        let data = &packet.data[r.pos..];

        let mut frame = Frame {
            format,
            rate,
            channels,
            layout: ChannelLayout::default_for(channels),
            nb_samples: samples,
            planes: Vec::new(),
        };
        match format {
            Some(f) if f.is_planar() && channels > 0 => {
                let plane = samples * f.bytes_per_sample();
                frame.planes = data.chunks(plane.max(1)).map(<[u8]>::to_vec).collect();
            }
            _ => frame.planes = vec![data.to_vec()],
        }
        self.ready = Some(frame);
        Ok(())
    }

    fn receive_frame(&mut self, frame: &mut Frame) -> CodecResult<()> {
        match self.ready.take() {
            Some(ready) => {
                *frame = ready;
                Ok(())
            }
            None => Err(CodecError::Again),
        }
    }

    fn flush(&mut self) {
        self.stats.flushes.fetch_add(1, Ordering::SeqCst);
        self.ready = None;
    }
}

impl Drop for SyntDecoder {
    fn drop(&mut self) {
        self.stats.decoders_open.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SyntLibrary {
    pub stats: Arc<SyntStats>,
}

impl CodecLibrary for SyntLibrary {
    fn name(&self) -> &str {
        "synt"
    }

    fn open_input(&self, mut io: StreamAdapter) -> CodecResult<Box<dyn Demuxer>> {
        let mut data = Vec::new();
        io.read_to_end(&mut data)?;
        let mut r = Reader { data: &data, pos: 0 };
        if r.take(4)? != MAGIC {
            return Err(CodecError::InvalidData("Invalid data found when processing input".to_string()));
        }
        let format = format_from_code(r.u8()?);
        let rate = r.u32()?;
        let channels = r.u16()?;
        let layout = ChannelLayout(r.u64()?);
        let frames = r.u64()?;
        let duration_us = r.u64()? as i64;
        let names_decoder = r.u8()? != 0;

        let mut metadata = Dictionary::new();
        for _ in 0..r.u8()? {
            let key = r.string()?;
            let value = r.string()?;
            metadata.insert(&key, &value);
        }

        let mut packets = Vec::new();
        while !r.at_end() {
            let stream = r.u8()?;
            let pts = r.u64()? as i64;
            let format = r.u8()?;
            let rate = r.u32()?;
            let channels = r.u16()?;
            let samples = r.u32()?;
            let len = r.u32()? as usize;
            packets.push(SyntPacket {
                stream,
                pts,
                format,
                rate,
                channels,
                samples,
                data: r.take(len)?.to_vec(),
            });
        }

        let audio = StreamInfo {
            index: 0,
            time_base: Rational::new(1, rate.max(1) as i32),
            params: CodecParameters {
                codec_id: Some(SYNT_CODEC),
                sample_format: format,
                sample_rate: rate,
                channels,
                layout,
                frames: (frames != 0).then_some(frames),
                native: None,
            },
        };
        let data_stream = StreamInfo {
            index: 1,
            time_base: Rational::new(1, 1000),
            params: CodecParameters::default(),
        };

        self.stats.demuxers_open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntDemuxer {
            streams: vec![audio, data_stream],
            packets,
            cursor: 0,
            metadata,
            duration_us,
            names_decoder,
            stats: Arc::clone(&self.stats),
        }))
    }

    fn find_decoder(&self, id: CodecId) -> Option<CodecDescriptor> {
        (id == SYNT_CODEC).then(|| CodecDescriptor {
            id,
            name: "synt".to_string(),
        })
    }

    fn open_decoder(&self, codec: &CodecDescriptor, _params: &CodecParameters) -> CodecResult<Box<dyn AudioDecoder>> {
        if codec.id != SYNT_CODEC {
            return Err(CodecError::Unsupported(codec.name.clone()));
        }
        self.stats.decoders_open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntDecoder {
            ready: None,
            stats: Arc::clone(&self.stats),
        }))
    }
}

pub struct SyntObject {
    version: AbiVersion,
    missing: Option<&'static str>,
    released: Arc<AtomicUsize>,
}

impl SharedObject for SyntObject {
    fn lookup(&self, symbol: &str) -> bool {
        self.missing != Some(symbol)
    }

    fn version(&self) -> AbiVersion {
        self.version
    }
}

impl Drop for SyntObject {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Provider handing out the synthetic library
pub struct SyntProvider {
    pub components: Vec<ComponentSpec>,
    pub runtime: AbiVersion,
    pub missing: Option<&'static str>,
    pub stats: Arc<SyntStats>,
    pub opened: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl SyntProvider {
    pub fn new(stats: Arc<SyntStats>) -> Self {
        Self {
            components: vec![ComponentSpec {
                name: "libsynt",
                compiled: COMPILED,
                symbols: SYMBOLS,
            }],
            runtime: COMPILED,
            missing: None,
            stats,
            opened: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl LibraryProvider for SyntProvider {
    fn components(&self) -> &[ComponentSpec] {
        &self.components
    }

    fn open(&self, _component: &ComponentSpec) -> Result<Box<dyn SharedObject>, String> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntObject {
            version: self.runtime,
            missing: self.missing,
            released: Arc::clone(&self.released),
        }))
    }

    fn bind(&self, _objects: &[Box<dyn SharedObject>]) -> Result<Arc<dyn CodecLibrary>, String> {
        Ok(Arc::new(SyntLibrary {
            stats: Arc::clone(&self.stats),
        }))
    }
}

/// Loader over a fresh synthetic library
pub fn synt_loader() -> (Arc<BackendLoader>, Arc<SyntStats>) {
    let stats = Arc::new(SyntStats::default());
    let provider = SyntProvider::new(Arc::clone(&stats));
    (
        Arc::new(BackendLoader::new("Container", Box::new(provider))),
        stats,
    )
}
