//! Codec library plumbing: loading, byte I/O and the decode abstractions.

pub mod adapter;
pub mod codec;
pub mod loader;
pub mod native;
pub mod resample;
pub mod symphonia;

pub use adapter::{SeekWhence, StreamAdapter, IO_BUFFER_SIZE};
pub use codec::{
    AudioDecoder, CodecDescriptor, CodecError, CodecId, CodecLibrary, CodecParameters,
    CodecResult, Demuxer, Dictionary, Frame, Packet, Rational, Resampler, ResamplerConfig,
    StreamInfo, TIME_BASE,
};
pub use loader::{
    abi_version, AbiVersion, BackendLease, BackendLoader, ComponentSpec, LibraryProvider,
    SharedObject,
};
pub use native::{ffmpeg_loader, NativeComponent, SharedLibraryProvider};
pub use resample::Interleaver;
