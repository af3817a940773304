//! # Saturn
//!
//! An emulator of the DCPU-16, the 16-bit CPU of the game 0x10c.
//!
//! The core is [`Cpu`]: registers, 64K words of memory, the interrupt queue
//! and a hardware bus. Peripherals implement [`Device`] and are attached
//! with [`Cpu::attach_device`]; [`hw`] ships a clock, an M35FD floppy drive
//! and a SPED-3 display.

pub mod cpu;
pub mod hw;
pub mod asm;

#[cfg(feature = "tui")]
pub mod tui;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export commonly used types
pub use cpu::{Cpu, CpuError, CpuSnapshot, CpuState, Instruction, Memory, Register, Registers};
pub use hw::{Clock, Device, DeviceContext, DeviceHandle, DeviceInfo, Display, Floppy, FloppyDisk};
pub use asm::{assemble, disassemble, disassemble_at, AssemblerError, Endian, ImageError, load_image, save_image};

#[cfg(feature = "tui")]
pub use tui::run_debugger;
