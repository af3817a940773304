//! DCPU-16 memory subsystem.
//!
//! 65536 sixteen-bit words, word addressed. Every `u16` is a valid address,
//! so plain reads and writes cannot fail.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// The number of words in the address space.
pub const MEMORY_SIZE: usize = 0x10000;

/// DCPU-16 RAM.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    words: Vec<u16>,
}

impl Memory {
    /// Create a new memory with all words zeroed.
    pub fn new() -> Self {
        Self {
            words: vec![0; MEMORY_SIZE],
        }
    }

    #[inline]
    pub fn read(&self, addr: u16) -> u16 {
        self.words[addr as usize]
    }

    #[inline]
    pub fn write(&mut self, addr: u16, value: u16) {
        self.words[addr as usize] = value;
    }

    /// Clear all memory to zeros.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Replace the whole memory image with `image`, zero-filling the rest.
    ///
    /// Images larger than the address space are rejected and memory is
    /// left untouched.
    pub fn flash(&mut self, image: &[u16]) -> Result<(), MemoryError> {
        if image.len() > MEMORY_SIZE {
            return Err(MemoryError::ImageTooLarge {
                size: image.len(),
                available: MEMORY_SIZE,
            });
        }

        self.words[..image.len()].copy_from_slice(image);
        self.words[image.len()..].fill(0);
        Ok(())
    }

    /// Borrow `len` words starting at `start`.
    ///
    /// Returns `None` if the window runs past the end of memory; windows
    /// never wrap around.
    pub fn window(&self, start: u16, len: usize) -> Option<&[u16]> {
        let start = start as usize;
        self.words.get(start..start.checked_add(len)?)
    }

    /// Mutable counterpart of [`Memory::window`].
    pub fn window_mut(&mut self, start: u16, len: usize) -> Option<&mut [u16]> {
        let start = start as usize;
        self.words.get_mut(start..start.checked_add(len)?)
    }

    /// The whole address space.
    pub fn as_slice(&self) -> &[u16] {
        &self.words
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only show non-zero words
        let non_zero = self.words.iter().filter(|w| **w != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_words", &non_zero)
            .field("total_words", &MEMORY_SIZE)
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Image does not fit in the address space.
    #[error("image of {size} words exceeds the {available}-word address space")]
    ImageTooLarge { size: usize, available: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_read_write() {
        let mut mem = Memory::new();

        mem.write(0xffff, 42);
        assert_eq!(mem.read(0xffff), 42);
        assert_eq!(mem.read(0), 0);
    }

    #[test]
    fn test_flash_replaces_contents() {
        let mut mem = Memory::new();
        mem.write(0x10, 0xdead);

        mem.flash(&[1, 2, 3]).unwrap();

        assert_eq!(mem.read(0), 1);
        assert_eq!(mem.read(1), 2);
        assert_eq!(mem.read(2), 3);
        assert_eq!(mem.read(0x10), 0);
    }

    #[test]
    fn test_flash_full_image() {
        let mut mem = Memory::new();
        let image = vec![7u16; MEMORY_SIZE];
        mem.flash(&image).unwrap();
        assert_eq!(mem.read(0xffff), 7);
    }

    #[test]
    fn test_flash_oversized_is_rejected() {
        let mut mem = Memory::new();
        mem.write(5, 99);

        let image = vec![1u16; MEMORY_SIZE + 1];
        let err = mem.flash(&image).unwrap_err();

        assert_eq!(
            err,
            MemoryError::ImageTooLarge { size: MEMORY_SIZE + 1, available: MEMORY_SIZE }
        );
        assert_eq!(mem.read(5), 99);
        assert_eq!(mem.read(0), 0);
    }

    #[test]
    fn test_window_bounds() {
        let mut mem = Memory::new();
        assert_eq!(mem.window(0xfe00, 512).map(<[u16]>::len), Some(512));
        assert!(mem.window(0xfe01, 512).is_none());
        assert!(mem.window_mut(0xffff, 2).is_none());
        assert!(mem.window_mut(0xffff, 1).is_some());
    }
}
