//! DCPU-16 register file.
//!
//! The DCPU-16 has eight general purpose registers (A, B, C, X, Y, Z, I, J)
//! and four special registers:
//! - PC: program counter
//! - SP: stack pointer
//! - EX: overflow / extra register
//! - IA: interrupt address

use serde::{Serialize, Deserialize};
use std::fmt;

/// A general purpose register, numbered as in the operand encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Register {
    A,
    B,
    C,
    X,
    Y,
    Z,
    I,
    J,
}

impl Register {
    /// All registers in encoding order.
    pub const ALL: [Register; 8] = [
        Register::A,
        Register::B,
        Register::C,
        Register::X,
        Register::Y,
        Register::Z,
        Register::I,
        Register::J,
    ];

    /// Register for the low three bits of an operand code.
    pub fn from_code(code: u16) -> Self {
        Self::ALL[(code & 0x7) as usize]
    }

    /// Operand code (0-7).
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Assembler name.
    pub fn name(self) -> &'static str {
        match self {
            Register::A => "A",
            Register::B => "B",
            Register::C => "C",
            Register::X => "X",
            Register::Y => "Y",
            Register::Z => "Z",
            Register::I => "I",
            Register::J => "J",
        }
    }

    /// Parse an assembler name (case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The DCPU-16 register file.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    pub a: u16,
    pub b: u16,
    pub c: u16,
    pub x: u16,
    pub y: u16,
    pub z: u16,
    pub i: u16,
    pub j: u16,

    /// Program counter.
    pub pc: u16,
    /// Stack pointer. Grows downwards; the first push lands at 0xffff.
    pub sp: u16,
    /// Carry, borrow and high-word results of arithmetic.
    pub ex: u16,
    /// Interrupt address. Zero means interrupts are ignored.
    pub ia: u16,
}

impl Registers {
    /// Create a new register file with all values zeroed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all registers to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Read a general purpose register.
    pub fn get(&self, reg: Register) -> u16 {
        match reg {
            Register::A => self.a,
            Register::B => self.b,
            Register::C => self.c,
            Register::X => self.x,
            Register::Y => self.y,
            Register::Z => self.z,
            Register::I => self.i,
            Register::J => self.j,
        }
    }

    /// Write a general purpose register.
    pub fn set(&mut self, reg: Register, value: u16) {
        match reg {
            Register::A => self.a = value,
            Register::B => self.b = value,
            Register::C => self.c = value,
            Register::X => self.x = value,
            Register::Y => self.y = value,
            Register::Z => self.z = value,
            Register::I => self.i = value,
            Register::J => self.j = value,
        }
    }

    /// Increment the program counter by one word.
    /// Returns the old value.
    pub fn advance_pc(&mut self) -> u16 {
        let old = self.pc;
        self.pc = self.pc.wrapping_add(1);
        old
    }

    /// Pre-decrement SP and return the address to push to.
    pub fn push_addr(&mut self) -> u16 {
        self.sp = self.sp.wrapping_sub(1);
        self.sp
    }

    /// Return the address to pop from and post-increment SP.
    pub fn pop_addr(&mut self) -> u16 {
        let addr = self.sp;
        self.sp = self.sp.wrapping_add(1);
        addr
    }
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "A={:04x} B={:04x} C={:04x} X={:04x} Y={:04x} Z={:04x} I={:04x} J={:04x} \
             PC={:04x} SP={:04x} EX={:04x} IA={:04x}",
            self.a, self.b, self.c, self.x, self.y, self.z, self.i, self.j,
            self.pc, self.sp, self.ex, self.ia
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_codes() {
        for (code, reg) in Register::ALL.iter().enumerate() {
            assert_eq!(reg.code(), code as u16);
            assert_eq!(Register::from_code(code as u16), *reg);
        }
        // Indirect forms share the low three bits
        assert_eq!(Register::from_code(0x0b), Register::X);
        assert_eq!(Register::from_code(0x17), Register::J);
    }

    #[test]
    fn test_get_set() {
        let mut regs = Registers::new();
        for (n, reg) in Register::ALL.iter().enumerate() {
            regs.set(*reg, 0x100 + n as u16);
        }
        assert_eq!(regs.a, 0x100);
        assert_eq!(regs.j, 0x107);
        assert_eq!(regs.get(Register::Z), 0x105);
    }

    #[test]
    fn test_parse_register() {
        assert_eq!(Register::parse("a"), Some(Register::A));
        assert_eq!(Register::parse("J"), Some(Register::J));
        assert_eq!(Register::parse("PC"), None);
    }

    #[test]
    fn test_stack_addresses_wrap() {
        let mut regs = Registers::new();
        assert_eq!(regs.push_addr(), 0xffff);
        assert_eq!(regs.sp, 0xffff);
        assert_eq!(regs.pop_addr(), 0xffff);
        assert_eq!(regs.sp, 0);
    }

    #[test]
    fn test_advance_pc() {
        let mut regs = Registers::new();
        regs.pc = 0xffff;

        let old = regs.advance_pc();
        assert_eq!(old, 0xffff);
        assert_eq!(regs.pc, 0);
    }
}
