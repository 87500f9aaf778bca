// source.rs - Byte sources consumed by music backends

//! The seekable byte-source collaborator.
//!
//! Backends never touch files directly. They read from a [`ByteSource`],
//! which may be a plain file, a memory block, or a window into a larger
//! archive. [`MusicSource`] adds the "take ownership" flag of the player
//! constructors: an owned source is closed when the player lets go of it.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Origin for [`ByteSource::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Current,
    End,
}

/// Generic seekable byte source
pub trait ByteSource: Send {
    /// Current absolute position
    fn tell(&mut self) -> io::Result<u64>;

    /// Move the read position; returns the new absolute position.
    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64>;

    /// Read up to `buf.len()` bytes. Zero means end of data.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Total size in bytes
    fn size(&mut self) -> io::Result<u64>;

    /// Release the underlying resource.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// [`ByteSource`] over anything that implements `Read + Seek`
pub struct IoSource<T> {
    inner: T,
}

impl<T: Read + Seek + Send> IoSource<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl IoSource<File> {
    /// Open a file for reading.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(File::open(path)?))
    }
}

impl IoSource<io::Cursor<Vec<u8>>> {
    /// Wrap an in-memory block.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::new(io::Cursor::new(data))
    }
}

impl<T: Read + Seek + Send> ByteSource for IoSource<T> {
    fn tell(&mut self) -> io::Result<u64> {
        self.inner.stream_position()
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64> {
        let from = match whence {
            Whence::Set => {
                if offset < 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "seek before start of stream",
                    ));
                }
                SeekFrom::Start(offset as u64)
            }
            Whence::Current => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        };
        self.inner.seek(from)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn size(&mut self) -> io::Result<u64> {
        let here = self.inner.stream_position()?;
        let end = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(here))?;
        Ok(end)
    }
}

/// A byte source handed to a player constructor
///
/// When `owned` is set the source is closed exactly once, when the
/// `MusicSource` is dropped. A failed constructor drops it too, so an owned
/// source never outlives a player that could not be built.
pub struct MusicSource {
    inner: Box<dyn ByteSource>,
    owned: bool,
}

impl MusicSource {
    pub fn new(inner: Box<dyn ByteSource>, take_ownership: bool) -> Self {
        Self {
            inner,
            owned: take_ownership,
        }
    }

    /// Open a file as an owned source.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(Box::new(IoSource::open(path)?), true))
    }

    /// Wrap an in-memory block as an owned source.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::new(Box::new(IoSource::from_bytes(data)), true)
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn tell(&mut self) -> io::Result<u64> {
        self.inner.tell()
    }

    pub fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<u64> {
        self.inner.seek(offset, whence)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    pub fn size(&mut self) -> io::Result<u64> {
        self.inner.size()
    }

    /// Read from the current position until `buf` is full or data runs out.
    pub fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl Drop for MusicSource {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = self.inner.close() {
                log::warn!("failed to close music source: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for MusicSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MusicSource")
            .field("owned", &self.owned)
            .finish_non_exhaustive()
    }
}
