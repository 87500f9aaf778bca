// interface.rs - Music backend contract

//! The music backend contract.
//!
//! Each backend is one [`MusicBackend`] implementation described by a
//! constant [`MusicInterface`]. A backend builds players ([`Music`]) from a
//! byte source; the engine drives every player through the same trait and
//! never branches on the format. Optional operations have default bodies
//! returning [`MusicError::Unsupported`], and the descriptor's
//! [`Capabilities`] say which ones a backend really provides.

use std::io;

use crate::error::{MusicError, MusicResult};
use crate::music::meta::MetaTag;
use crate::music::pcm::Pulled;
use crate::music::source::{MusicSource, Whence};

/// Format family handled by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MusicKind {
    /// Compressed audio inside a container (WAV, Ogg, FLAC, MP3, MP4 ...)
    Container,
    /// Tracker module synthesized from patterns and samples
    Tracker,
}

/// Bytes of header needed by [`MusicKind::detect`]
pub const DETECT_HEADER_LEN: usize = 1084;

const TRACKER_SIGNATURES: [&[u8; 4]; 7] =
    [b"M.K.", b"M!K!", b"FLT4", b"FLT8", b"4CHN", b"6CHN", b"8CHN"];

impl MusicKind {
    /// Guess the format family from the first bytes of a file.
    pub fn detect(header: &[u8]) -> Option<MusicKind> {
        if header.len() >= 4 {
            let magic = &header[..4];
            if magic == b"RIFF" || magic == b"FORM" || magic == b"OggS" || magic == b"fLaC" {
                return Some(MusicKind::Container);
            }
        }
        if header.starts_with(b"ID3") {
            return Some(MusicKind::Container);
        }
        if header.len() >= 2 && header[0] == 0xFF && (header[1] & 0xE0) == 0xE0 {
            return Some(MusicKind::Container);
        }
        if header.len() >= 8 && &header[4..8] == b"ftyp" {
            return Some(MusicKind::Container);
        }
        if has_tracker_signature(header) {
            return Some(MusicKind::Tracker);
        }
        None
    }

    /// Sniff a source's header and rewind it to where it was.
    pub fn detect_source(source: &mut MusicSource) -> io::Result<Option<MusicKind>> {
        let start = source.tell()?;
        let mut header = vec![0u8; DETECT_HEADER_LEN];
        let read = source.read_full(&mut header)?;
        source.seek(start as i64, Whence::Set)?;
        Ok(Self::detect(&header[..read]))
    }
}

/// True when the ProTracker signature at offset 1080 is present
pub fn has_tracker_signature(header: &[u8]) -> bool {
    header
        .get(1080..1084)
        .map(|sig| TRACKER_SIGNATURES.iter().any(|s| &s[..] == sig))
        .unwrap_or(false)
}

/// Optional operations a backend provides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub load: bool,
    pub seek: bool,
    pub tell: bool,
    pub duration: bool,
    pub meta_tags: bool,
    pub tracks: bool,
    pub track_mute: bool,
    pub tempo: bool,
    pub speed: bool,
    pub pitch: bool,
}

/// Constant description of one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicInterface {
    pub tag: &'static str,
    pub kind: MusicKind,
    pub capabilities: Capabilities,
}

/// A pluggable decoder for one format family
pub trait MusicBackend: Send + Sync {
    fn interface(&self) -> &MusicInterface;

    /// Make the backend's native library usable. Counted: every successful
    /// `load` needs one `unload`.
    fn load(&self) -> MusicResult<()> {
        Ok(())
    }

    fn unload(&self) {}

    /// Create a player for `source`.
    fn new_music(&self, source: MusicSource) -> MusicResult<Box<dyn Music>> {
        self.new_music_ex(source, "")
    }

    /// Create a player for `source` with an extra argument string
    /// (see [`crate::music::args`]).
    fn new_music_ex(&self, source: MusicSource, args: &str) -> MusicResult<Box<dyn Music>>;
}

/// One playing (or stopped) track
///
/// Dropping a player releases every resource it owns, whatever state it is
/// in.
pub trait Music: Send {
    /// Set the volume, 0..=128.
    fn set_volume(&mut self, volume: i32);

    fn volume(&self) -> i32;

    /// Start playing from the beginning. `loops` is the number of passes,
    /// -1 for forever.
    fn play(&mut self, loops: i32) -> MusicResult<()>;

    /// Stop at the next pull.
    fn stop(&mut self);

    fn is_playing(&self) -> bool;

    /// Fill `buf` with output-format PCM.
    fn play_audio(&mut self, buf: &mut [u8]) -> MusicResult<Pulled>;

    /// Jump to `position` seconds.
    fn seek(&mut self, _position: f64) -> MusicResult<()> {
        Err(MusicError::Unsupported("Seek"))
    }

    /// Current position in seconds, `None` when unknown
    fn tell(&self) -> Option<f64> {
        None
    }

    /// Track length in seconds, `None` when unknown
    fn duration(&self) -> Option<f64> {
        None
    }

    fn meta_tag(&self, _tag: MetaTag) -> Option<&str> {
        None
    }

    fn num_tracks(&self) -> MusicResult<i32> {
        Err(MusicError::Unsupported("GetNumTracks"))
    }

    fn start_track(&mut self, _track: i32) -> MusicResult<()> {
        Err(MusicError::Unsupported("StartTrack"))
    }

    fn set_track_muted(&mut self, _track: i32, _muted: bool) -> MusicResult<()> {
        Err(MusicError::Unsupported("SetTrackMuted"))
    }

    fn set_tempo(&mut self, _tempo: f64) -> MusicResult<()> {
        Err(MusicError::Unsupported("SetTempo"))
    }

    fn tempo(&self) -> MusicResult<f64> {
        Err(MusicError::Unsupported("GetTempo"))
    }

    fn set_speed(&mut self, _speed: f64) -> MusicResult<()> {
        Err(MusicError::Unsupported("SetSpeed"))
    }

    fn speed(&self) -> MusicResult<f64> {
        Err(MusicError::Unsupported("GetSpeed"))
    }

    fn set_pitch(&mut self, _pitch: f64) -> MusicResult<()> {
        Err(MusicError::Unsupported("SetPitch"))
    }

    fn pitch(&self) -> MusicResult<f64> {
        Err(MusicError::Unsupported("GetPitch"))
    }
}
