//! Binary images of memory and disks.
//!
//! An image is a flat run of 16-bit words with no header. Big-endian is the
//! usual byte order for DCPU-16 tooling; little-endian is accepted too.

use std::path::Path;
use thiserror::Error;

/// Byte order of the words in an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Big,
    Little,
}

/// Decode raw bytes into words.
pub fn decode_image(bytes: &[u8], endian: Endian) -> Result<Vec<u16>, ImageError> {
    if bytes.len() % 2 != 0 {
        return Err(ImageError::OddLength { len: bytes.len() });
    }

    let words = bytes
        .chunks_exact(2)
        .map(|pair| {
            let pair = [pair[0], pair[1]];
            match endian {
                Endian::Big => u16::from_be_bytes(pair),
                Endian::Little => u16::from_le_bytes(pair),
            }
        })
        .collect();
    Ok(words)
}

/// Encode words as raw bytes.
pub fn encode_image(words: &[u16], endian: Endian) -> Vec<u8> {
    words
        .iter()
        .flat_map(|word| match endian {
            Endian::Big => word.to_be_bytes(),
            Endian::Little => word.to_le_bytes(),
        })
        .collect()
}

/// Load an image file.
pub fn load_image<P: AsRef<Path>>(path: P, endian: Endian) -> Result<Vec<u16>, ImageError> {
    let bytes = std::fs::read(path.as_ref())
        .map_err(|e| ImageError::IoError(format!("{}: {}", path.as_ref().display(), e)))?;
    decode_image(&bytes, endian)
}

/// Save words to an image file.
pub fn save_image<P: AsRef<Path>>(path: P, words: &[u16], endian: Endian) -> Result<(), ImageError> {
    std::fs::write(path.as_ref(), encode_image(words, endian))
        .map_err(|e| ImageError::IoError(format!("{}: {}", path.as_ref().display(), e)))
}

/// Errors that can occur while reading or writing images.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("image has an odd number of bytes ({len})")]
    OddLength { len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_order() {
        let bytes = [0x7c, 0x01, 0x00, 0x30];
        assert_eq!(decode_image(&bytes, Endian::Big).unwrap(), vec![0x7c01, 0x0030]);
        assert_eq!(decode_image(&bytes, Endian::Little).unwrap(), vec![0x017c, 0x3000]);
        assert_eq!(encode_image(&[0x7c01], Endian::Little), vec![0x01, 0x7c]);
    }

    #[test]
    fn test_odd_length() {
        assert_eq!(decode_image(&[1, 2, 3], Endian::Big), Err(ImageError::OddLength { len: 3 }));
    }

    #[test]
    fn test_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("saturn-image-{}.bin", std::process::id()));
        let words = vec![0xdead, 0xbeef, 0x0001];

        save_image(&path, &words, Endian::Little).unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), 6);
        assert_eq!(load_image(&path, Endian::Little).unwrap(), words);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(load_image(&path, Endian::Big), Err(ImageError::IoError(_))));
    }
}
