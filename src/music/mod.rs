//! Music layer shared by all backends.

pub mod args;
pub mod format;
pub mod interface;
pub mod meta;
pub mod pcm;
pub mod playback;
pub mod source;
pub mod stream;

pub use args::MusicArgs;
pub use format::{AudioFormat, ChannelLayout, OutputSpec, SampleFormat, SampleFormatDescriptor};
pub use interface::{Capabilities, Music, MusicBackend, MusicInterface, MusicKind};
pub use meta::{MetaTag, MetaTagSet};
pub use pcm::{Pulled, MAX_VOLUME};
pub use playback::{PassEnd, PlaybackState};
pub use source::{ByteSource, IoSource, MusicSource, Whence};
pub use stream::{AudioStream, StreamSpec};
