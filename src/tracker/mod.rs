// tracker/mod.rs - ProTracker module backend

//! Tracker music backend.
//!
//! Renders ProTracker modules with the pure Rust `mod_player` crate. The
//! player synthesizes stereo float samples at the engine rate; they are
//! queued as S16 and converted to the engine format by the same output
//! stream the container backend uses.

use std::io::Write;

use mod_player::{PlayerState, Song};

use crate::error::{MusicError, MusicResult};
use crate::music::args::MusicArgs;
use crate::music::format::{AudioFormat, OutputSpec};
use crate::music::interface::{
    has_tracker_signature, Capabilities, Music, MusicBackend, MusicInterface, MusicKind,
    DETECT_HEADER_LEN,
};
use crate::music::pcm::{self, Chunk, PcmSource, Pulled, MAX_VOLUME};
use crate::music::playback::{PassEnd, PlaybackState};
use crate::music::source::MusicSource;
use crate::music::stream::{AudioStream, StreamSpec};

/// Frames synthesized per refill
pub const RENDER_FRAMES: usize = 1024;

const ROWS_PER_PATTERN: usize = 64;
/// Row length at the default 125 BPM and speed 6
const SECONDS_PER_ROW: f64 = 0.12;

pub static TRACKER_INTERFACE: MusicInterface = MusicInterface {
    tag: "Tracker",
    kind: MusicKind::Tracker,
    capabilities: Capabilities {
        load: false,
        seek: true,
        tell: true,
        duration: true,
        meta_tags: false,
        tracks: true,
        track_mute: false,
        tempo: false,
        speed: false,
        pitch: false,
    },
};

/// Backend for ProTracker modules
#[derive(Debug, Clone, Copy)]
pub struct TrackerBackend {
    spec: OutputSpec,
}

impl TrackerBackend {
    pub fn new(spec: OutputSpec) -> Self {
        Self { spec }
    }
}

impl MusicBackend for TrackerBackend {
    fn interface(&self) -> &MusicInterface {
        &TRACKER_INTERFACE
    }

    fn new_music_ex(&self, source: MusicSource, args: &str) -> MusicResult<Box<dyn Music>> {
        let args = MusicArgs::parse(args);
        Ok(Box::new(TrackerMusic::open(source, &args, self.spec)?))
    }
}

fn read_all(source: &mut MusicSource) -> MusicResult<Vec<u8>> {
    let mut data = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = source.read_full(&mut chunk)?;
        data.extend_from_slice(&chunk[..n]);
        if n < chunk.len() {
            return Ok(data);
        }
    }
}

/// `mod_player` only parses from a path
fn parse_module(data: &[u8]) -> MusicResult<Song> {
    let mut file = tempfile::Builder::new()
        .prefix("mixmusic")
        .suffix(".mod")
        .tempfile()?;
    file.write_all(data)?;
    file.flush()?;
    let path = file
        .path()
        .to_str()
        .ok_or_else(|| MusicError::Io("temporary path is not valid UTF-8".to_string()))?;
    Ok(mod_player::read_mod_file(path))
}

/// A playing tracker module
pub struct TrackerMusic {
    song: Song,
    player: PlayerState,
    stream: AudioStream,
    spec: OutputSpec,
    playback: PlaybackState,
    /// Mixing volume with the gain applied
    volume: i32,
    gain: f64,
    /// Frames synthesized since the start of the pass
    rendered: u64,
    duration: f64,
    scratch: Vec<u8>,
}

impl TrackerMusic {
    pub fn open(mut source: MusicSource, args: &MusicArgs, spec: OutputSpec) -> MusicResult<Self> {
        if args.track != 0 {
            return Err(
                MusicError::InvalidArgument(format!("module has no track {}", args.track))
                    .report(),
            );
        }

        let data = read_all(&mut source).map_err(MusicError::report)?;
        if data.len() < DETECT_HEADER_LEN || !has_tracker_signature(&data) {
            return Err(
                MusicError::FormatUnsupported("not a ProTracker module".to_string()).report(),
            );
        }
        let song = parse_module(&data).map_err(MusicError::report)?;

        let stream = AudioStream::new(StreamSpec::new(AudioFormat::S16, 2, spec.freq), spec)
            .map_err(MusicError::report)?;
        let player = PlayerState::new(song.format.num_channels, spec.freq);
        let rows = song.num_used_patterns as usize * ROWS_PER_PATTERN;
        let duration = rows as f64 * SECONDS_PER_ROW;

        log::debug!(
            "Tracker: {} channels, {} positions, ~{:.1}s",
            song.format.num_channels,
            song.num_used_patterns,
            duration
        );

        let gain = if args.gain > 0.0 { args.gain as f64 } else { 1.0 };
        let mut music = Self {
            song,
            player,
            stream,
            spec,
            playback: PlaybackState::new(),
            volume: MAX_VOLUME,
            gain,
            rendered: 0,
            duration,
            scratch: Vec::with_capacity(RENDER_FRAMES * 4),
        };
        music.set_volume(MAX_VOLUME);
        Ok(music)
    }

    fn restart(&mut self) {
        self.player = PlayerState::new(self.song.format.num_channels, self.spec.freq);
        self.rendered = 0;
    }

    /// Synthesize up to `frames` frames into the scratch buffer.
    fn render(&mut self, frames: usize) -> usize {
        self.scratch.clear();
        let mut count = 0;
        while count < frames && !self.player.song_has_ended {
            let (left, right) = mod_player::next_sample(&self.song, &mut self.player);
            if self.player.song_has_ended {
                break;
            }
            for s in [left, right] {
                let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
                self.scratch.extend_from_slice(&v.to_ne_bytes());
            }
            count += 1;
        }
        self.rendered += count as u64;
        count
    }
}

impl PcmSource for TrackerMusic {
    fn get_some(&mut self, buf: &mut [u8]) -> MusicResult<Chunk> {
        let filled = self.stream.get(buf);
        if filled != 0 {
            return Ok(Chunk {
                bytes: filled,
                done: false,
            });
        }
        if !self.playback.is_playing() {
            return Ok(Chunk {
                bytes: 0,
                done: true,
            });
        }

        if self.render(RENDER_FRAMES) > 0 {
            self.stream
                .put(&self.scratch)
                .map_err(MusicError::report)?;
        } else {
            match self.playback.end_of_pass() {
                PassEnd::Finished => self.stream.flush(),
                PassEnd::Rewind(loops) => {
                    self.restart();
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

impl Music for TrackerMusic {
    fn set_volume(&mut self, volume: i32) {
        let volume = volume.clamp(0, MAX_VOLUME) as f64;
        self.volume = (volume * self.gain + 0.5).floor() as i32;
    }

    fn volume(&self) -> i32 {
        (self.volume as f64 / self.gain + 0.5).floor() as i32
    }

    fn play(&mut self, loops: i32) -> MusicResult<()> {
        self.stream.clear();
        self.restart();
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
        self.stream.clear();
        self.restart();
        let mut target = (position * self.spec.freq as f64) as u64;
        while target > 0 {
            let step = target.min(RENDER_FRAMES as u64) as usize;
            if self.render(step) < step {
                break;
            }
            target -= step as u64;
        }
        self.scratch.clear();
        Ok(())
    }

    fn tell(&self) -> Option<f64> {
        Some(self.rendered as f64 / self.spec.freq as f64)
    }

    fn duration(&self) -> Option<f64> {
        Some(self.duration)
    }

    fn num_tracks(&self) -> MusicResult<i32> {
        Ok(1)
    }

    fn start_track(&mut self, track: i32) -> MusicResult<()> {
        if track != 0 {
            return Err(
                MusicError::InvalidArgument(format!("module has no track {}", track)).report(),
            );
        }
        self.stream.clear();
        self.restart();
        Ok(())
    }
}
