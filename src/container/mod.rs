//! Container music backend.
//!
//! Plays anything the loaded codec library can demux and decode. The
//! library is loaded through a [`BackendLoader`]; every open track holds a
//! lease on it, so the library stays resident until the last track is
//! freed.

pub mod merge;
pub mod pipeline;

use std::path::Path;
use std::sync::Arc;

use crate::backend::loader::BackendLoader;
use crate::backend::native::ffmpeg_loader;
use crate::backend::symphonia::builtin_loader;
use crate::error::MusicResult;
use crate::music::format::OutputSpec;
use crate::music::interface::{
    Capabilities, Music, MusicBackend, MusicInterface, MusicKind,
};
use crate::music::source::MusicSource;

pub use merge::MergeBuffer;
pub use pipeline::{seek_timestamp, ContainerMusic, StreamFormat};

pub static CONTAINER_INTERFACE: MusicInterface = MusicInterface {
    tag: "Container",
    kind: MusicKind::Container,
    capabilities: Capabilities {
        load: true,
        seek: true,
        tell: true,
        duration: true,
        meta_tags: true,
        tracks: false,
        track_mute: false,
        tempo: false,
        speed: false,
        pitch: false,
    },
};

/// Backend decoding through a loadable codec library
pub struct ContainerBackend {
    loader: Arc<BackendLoader>,
    spec: OutputSpec,
}

impl ContainerBackend {
    pub fn new(loader: Arc<BackendLoader>, spec: OutputSpec) -> Self {
        Self { loader, spec }
    }

    /// Backend over the built-in symphonia library
    pub fn builtin(spec: OutputSpec) -> Self {
        Self::new(builtin_loader(), spec)
    }

    /// Backend that requires the FFmpeg shared libraries found in `dir`
    pub fn shared(dir: &Path, spec: OutputSpec) -> Self {
        Self::new(ffmpeg_loader(dir), spec)
    }

    pub fn loader(&self) -> &Arc<BackendLoader> {
        &self.loader
    }

    pub fn output_spec(&self) -> OutputSpec {
        self.spec
    }

    /// Open a track and keep the concrete type.
    pub fn open(&self, source: MusicSource) -> MusicResult<ContainerMusic> {
        ContainerMusic::open(&self.loader, source, self.spec)
    }
}

impl MusicBackend for ContainerBackend {
    fn interface(&self) -> &MusicInterface {
        &CONTAINER_INTERFACE
    }

    fn load(&self) -> MusicResult<()> {
        self.loader.load()
    }

    fn unload(&self) {
        self.loader.unload()
    }

    fn new_music_ex(&self, source: MusicSource, args: &str) -> MusicResult<Box<dyn Music>> {
        if !args.is_empty() {
            log::debug!("Container: ignoring arguments \"{}\"", args);
        }
        Ok(Box::new(self.open(source)?))
    }
}
