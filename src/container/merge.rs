//! Scratch buffer planar frames are interleaved into.

use crate::error::{MusicError, MusicResult};

/// Grow-only byte buffer
///
/// Capacity never shrinks; asking for a size that already fits is free.
#[derive(Debug, Default)]
pub struct MergeBuffer {
    data: Vec<u8>,
}

impl MergeBuffer {
    /// Allocate `size` bytes up front.
    pub fn with_size(size: usize) -> MusicResult<Self> {
        let mut buffer = Self::default();
        buffer.ensure(size)?;
        Ok(buffer)
    }

    /// Make sure at least `size` bytes are usable, growing if needed.
    ///
    /// On allocation failure the old contents stay valid.
    pub fn ensure(&mut self, size: usize) -> MusicResult<()> {
        if size <= self.data.len() {
            return Ok(());
        }
        self.data
            .try_reserve_exact(size - self.data.len())
            .map_err(|_| MusicError::OutOfMemory(format!("merge buffer of {} bytes", size)))?;
        self.data.resize(size, 0);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}
