//! Music backends for a game audio engine.
//!
//! Every music format is played through the same [`Music`] interface: the
//! engine opens a track from a byte source, starts it with a loop count
//! and pulls PCM in its fixed output format. Compressed container audio is
//! decoded through a loadable codec library; tracker modules are
//! synthesized in-process.

pub mod backend;
pub mod cli;
pub mod config;
pub mod container;
pub mod error;
pub mod logging;
pub mod music;
pub mod render;
pub mod tracker;

pub use cli::Cli;
pub use config::Options;
pub use container::{ContainerBackend, ContainerMusic};
pub use error::{MusicError, MusicResult};
pub use logging::LogLevel;
pub use music::{Music, MusicBackend, MusicSource, OutputSpec};
pub use tracker::{TrackerBackend, TrackerMusic};
