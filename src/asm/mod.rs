//! Assembler and disassembler for DCPU-16 programs.
//!
//! This module provides:
//! - A two-pass assembler (text → memory words)
//! - A disassembler (memory words → readable text)
//! - Raw binary images for programs and floppy disks

pub mod assembler;
pub mod disasm;
pub mod image;

pub use assembler::{assemble, AssemblerError};
pub use disasm::{disassemble, disassemble_at, format_instruction};
pub use image::{decode_image, encode_image, load_image, save_image, Endian, ImageError};
