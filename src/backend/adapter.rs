// adapter.rs - Byte source to native I/O callbacks

//! Custom I/O bridge between a [`MusicSource`] and the decoding library.
//!
//! The library pulls bytes with `read(buf) -> n | EOF` and moves around with
//! `seek(offset, whence) -> position`, where one extra whence asks for the
//! total size. The music may be embedded in a larger archive, so the
//! adapter remembers where the source was positioned when it was wrapped
//! and presents everything relative to that start offset.

use std::io::{self, Read, Seek, SeekFrom};

use crate::backend::codec::{CodecError, CodecResult};
use crate::music::source::{MusicSource, Whence};

/// Read-ahead buffer between the adapter and the container reader.
/// Must be a power of two larger than 32 KiB.
pub const IO_BUFFER_SIZE: usize = 64 * 1024;

/// Seek origins understood by [`StreamAdapter::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Set,
    Current,
    End,
    /// Do not move; report the stream size
    Size,
}

/// A music source as seen by the native library
#[derive(Debug)]
pub struct StreamAdapter {
    source: MusicSource,
    start: u64,
}

impl StreamAdapter {
    /// Wrap `source`, taking its current position as the stream start.
    pub fn new(mut source: MusicSource) -> io::Result<Self> {
        let start = source.tell()?;
        Ok(Self { source, start })
    }

    /// Absolute offset of the stream start in the underlying source
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Read callback: zero bytes is reported as end of file.
    pub fn read_packet(&mut self, buf: &mut [u8]) -> CodecResult<usize> {
        match self.source.read(buf) {
            Ok(0) => Err(CodecError::Eof),
            Ok(n) => Ok(n),
            Err(e) => Err(CodecError::Io(e.to_string())),
        }
    }

    /// Seek callback. Positions are relative to the stream start.
    pub fn seek(&mut self, offset: i64, whence: SeekWhence) -> CodecResult<i64> {
        let absolute = match whence {
            SeekWhence::Size => return self.size(),
            SeekWhence::Set => {
                if offset < 0 {
                    return Err(CodecError::Io("seek before stream start".to_string()));
                }
                self.source.seek(self.start as i64 + offset, Whence::Set)
            }
            SeekWhence::Current => self.source.seek(offset, Whence::Current),
            SeekWhence::End => self.source.seek(offset, Whence::End),
        }
        .map_err(|e| CodecError::Io(e.to_string()))?;

        if absolute < self.start {
            self.source
                .seek(self.start as i64, Whence::Set)
                .map_err(|e| CodecError::Io(e.to_string()))?;
            return Err(CodecError::Io("seek before stream start".to_string()));
        }
        Ok((absolute - self.start) as i64)
    }

    /// Logical stream size (bytes after the start offset)
    pub fn size(&mut self) -> CodecResult<i64> {
        let total = self
            .source
            .size()
            .map_err(|e| CodecError::Io(e.to_string()))?;
        Ok(total.saturating_sub(self.start) as i64)
    }
}

impl Read for StreamAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.read_packet(buf) {
            Ok(n) => Ok(n),
            Err(CodecError::Eof) => Ok(0),
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
        }
    }
}

impl Seek for StreamAdapter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let result = match pos {
            SeekFrom::Start(offset) => StreamAdapter::seek(self, offset as i64, SeekWhence::Set),
            SeekFrom::Current(offset) => StreamAdapter::seek(self, offset, SeekWhence::Current),
            SeekFrom::End(offset) => StreamAdapter::seek(self, offset, SeekWhence::End),
        };
        result
            .map(|pos| pos as u64)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
    }
}
