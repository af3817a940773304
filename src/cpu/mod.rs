//! CPU emulation for the DCPU-16.
//!
//! This module implements the DCPU-16 1.7 architecture:
//! - 65536 sixteen-bit memory words
//! - 8 general registers plus PC, SP, EX and IA
//! - basic and special instruction sets with per-instruction cycle costs
//! - a 256-entry interrupt queue and the hardware bus instructions

pub mod memory;
pub mod registers;
pub mod decode;
pub mod interrupt;
pub mod execute;

pub use memory::{Memory, MemoryError, MEMORY_SIZE};
pub use registers::{Register, Registers};
pub use decode::{BasicOp, DecodeError, Instruction, Operand, SpecialOp};
pub use interrupt::{InterruptError, InterruptQueue, INTERRUPT_QUEUE_CAPACITY};
pub use execute::{Cpu, CpuError, CpuSnapshot, CpuState};
