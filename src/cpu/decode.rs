//! Instruction decoder for the DCPU-16.
//!
//! Instructions are one word long, optionally followed by up to two
//! "next words" consumed by their operands. The first word is laid out as
//! `aaaaaabbbbbooooo`: a 5-bit opcode, a 5-bit destination operand `b` and a
//! 6-bit source operand `a`. Opcode 0 selects a special instruction whose
//! opcode lives in the `b` field.

use crate::cpu::registers::Register;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Decoded operand descriptor.
///
/// Operands that read a next word carry no value here; the word is fetched
/// from memory when the operand is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// `A` .. `J`
    Register(Register),
    /// `[reg]`
    Indirect(Register),
    /// `[reg + next word]`
    IndirectOffset(Register),
    /// `PUSH` / `[--SP]`, destination position only
    Push,
    /// `POP` / `[SP++]`, source position only
    Pop,
    /// `PEEK` / `[SP]`
    Peek,
    /// `PICK n` / `[SP + next word]`
    Pick,
    Sp,
    Pc,
    Ex,
    /// `[next word]`
    IndirectNext,
    /// `next word` (literal)
    Next,
    /// Inline literal, 0xffff and 0..=30, source position only
    Literal(u16),
}

impl Operand {
    /// Decode the 6-bit source operand.
    pub fn from_a(code: u16) -> Self {
        match code & 0x3f {
            0x18 => Operand::Pop,
            c @ 0x20..=0x3f => Operand::Literal(c.wrapping_sub(0x21)),
            c => Self::from_common(c),
        }
    }

    /// Decode the 5-bit destination operand.
    pub fn from_b(code: u16) -> Self {
        match code & 0x1f {
            0x18 => Operand::Push,
            c => Self::from_common(c),
        }
    }

    fn from_common(code: u16) -> Self {
        match code {
            0x00..=0x07 => Operand::Register(Register::from_code(code)),
            0x08..=0x0f => Operand::Indirect(Register::from_code(code)),
            0x10..=0x17 => Operand::IndirectOffset(Register::from_code(code)),
            0x19 => Operand::Peek,
            0x1a => Operand::Pick,
            0x1b => Operand::Sp,
            0x1c => Operand::Pc,
            0x1d => Operand::Ex,
            0x1e => Operand::IndirectNext,
            _ => Operand::Next,
        }
    }

    /// Inline literal for `value`, if it fits the short form.
    pub fn short_literal(value: u16) -> Option<Self> {
        (value == 0xffff || value <= 30).then_some(Operand::Literal(value))
    }

    /// Operand code as stored in the instruction word.
    pub fn code(self) -> u16 {
        match self {
            Operand::Register(r) => r.code(),
            Operand::Indirect(r) => 0x08 + r.code(),
            Operand::IndirectOffset(r) => 0x10 + r.code(),
            Operand::Push | Operand::Pop => 0x18,
            Operand::Peek => 0x19,
            Operand::Pick => 0x1a,
            Operand::Sp => 0x1b,
            Operand::Pc => 0x1c,
            Operand::Ex => 0x1d,
            Operand::IndirectNext => 0x1e,
            Operand::Next => 0x1f,
            Operand::Literal(v) => v.wrapping_add(0x21) & 0x3f,
        }
    }

    /// True if resolving this operand consumes a next word (and a cycle).
    pub fn has_next_word(self) -> bool {
        matches!(
            self,
            Operand::IndirectOffset(_) | Operand::Pick | Operand::IndirectNext | Operand::Next
        )
    }
}

/// Basic (two operand) opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasicOp {
    Set,
    Add,
    Sub,
    Mul,
    Mli,
    Div,
    Dvi,
    Mod,
    Mdi,
    And,
    Bor,
    Xor,
    Shr,
    Asr,
    Shl,
    Ifb,
    Ifc,
    Ife,
    Ifn,
    Ifg,
    Ifa,
    Ifl,
    Ifu,
    Adx,
    Sbx,
    Sti,
    Std,
}

impl BasicOp {
    pub const ALL: [BasicOp; 27] = [
        BasicOp::Set, BasicOp::Add, BasicOp::Sub, BasicOp::Mul, BasicOp::Mli,
        BasicOp::Div, BasicOp::Dvi, BasicOp::Mod, BasicOp::Mdi, BasicOp::And,
        BasicOp::Bor, BasicOp::Xor, BasicOp::Shr, BasicOp::Asr, BasicOp::Shl,
        BasicOp::Ifb, BasicOp::Ifc, BasicOp::Ife, BasicOp::Ifn, BasicOp::Ifg,
        BasicOp::Ifa, BasicOp::Ifl, BasicOp::Ifu, BasicOp::Adx, BasicOp::Sbx,
        BasicOp::Sti, BasicOp::Std,
    ];

    pub fn from_code(code: u16) -> Option<Self> {
        let op = match code {
            0x01 => BasicOp::Set,
            0x02 => BasicOp::Add,
            0x03 => BasicOp::Sub,
            0x04 => BasicOp::Mul,
            0x05 => BasicOp::Mli,
            0x06 => BasicOp::Div,
            0x07 => BasicOp::Dvi,
            0x08 => BasicOp::Mod,
            0x09 => BasicOp::Mdi,
            0x0a => BasicOp::And,
            0x0b => BasicOp::Bor,
            0x0c => BasicOp::Xor,
            0x0d => BasicOp::Shr,
            0x0e => BasicOp::Asr,
            0x0f => BasicOp::Shl,
            0x10 => BasicOp::Ifb,
            0x11 => BasicOp::Ifc,
            0x12 => BasicOp::Ife,
            0x13 => BasicOp::Ifn,
            0x14 => BasicOp::Ifg,
            0x15 => BasicOp::Ifa,
            0x16 => BasicOp::Ifl,
            0x17 => BasicOp::Ifu,
            0x1a => BasicOp::Adx,
            0x1b => BasicOp::Sbx,
            0x1e => BasicOp::Sti,
            0x1f => BasicOp::Std,
            _ => return None,
        };
        Some(op)
    }

    pub fn code(self) -> u16 {
        match self {
            BasicOp::Set => 0x01,
            BasicOp::Add => 0x02,
            BasicOp::Sub => 0x03,
            BasicOp::Mul => 0x04,
            BasicOp::Mli => 0x05,
            BasicOp::Div => 0x06,
            BasicOp::Dvi => 0x07,
            BasicOp::Mod => 0x08,
            BasicOp::Mdi => 0x09,
            BasicOp::And => 0x0a,
            BasicOp::Bor => 0x0b,
            BasicOp::Xor => 0x0c,
            BasicOp::Shr => 0x0d,
            BasicOp::Asr => 0x0e,
            BasicOp::Shl => 0x0f,
            BasicOp::Ifb => 0x10,
            BasicOp::Ifc => 0x11,
            BasicOp::Ife => 0x12,
            BasicOp::Ifn => 0x13,
            BasicOp::Ifg => 0x14,
            BasicOp::Ifa => 0x15,
            BasicOp::Ifl => 0x16,
            BasicOp::Ifu => 0x17,
            BasicOp::Adx => 0x1a,
            BasicOp::Sbx => 0x1b,
            BasicOp::Sti => 0x1e,
            BasicOp::Std => 0x1f,
        }
    }

    /// Base cost in cycles, excluding next words and failed-test penalties.
    pub fn cycles(self) -> u16 {
        match self {
            BasicOp::Set
            | BasicOp::And
            | BasicOp::Bor
            | BasicOp::Xor
            | BasicOp::Shr
            | BasicOp::Asr
            | BasicOp::Shl => 1,
            BasicOp::Add
            | BasicOp::Sub
            | BasicOp::Mul
            | BasicOp::Mli
            | BasicOp::Sti
            | BasicOp::Std => 2,
            BasicOp::Div
            | BasicOp::Dvi
            | BasicOp::Mod
            | BasicOp::Mdi
            | BasicOp::Adx
            | BasicOp::Sbx => 3,
            _ => 2, // conditionals
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            BasicOp::Set => "SET",
            BasicOp::Add => "ADD",
            BasicOp::Sub => "SUB",
            BasicOp::Mul => "MUL",
            BasicOp::Mli => "MLI",
            BasicOp::Div => "DIV",
            BasicOp::Dvi => "DVI",
            BasicOp::Mod => "MOD",
            BasicOp::Mdi => "MDI",
            BasicOp::And => "AND",
            BasicOp::Bor => "BOR",
            BasicOp::Xor => "XOR",
            BasicOp::Shr => "SHR",
            BasicOp::Asr => "ASR",
            BasicOp::Shl => "SHL",
            BasicOp::Ifb => "IFB",
            BasicOp::Ifc => "IFC",
            BasicOp::Ife => "IFE",
            BasicOp::Ifn => "IFN",
            BasicOp::Ifg => "IFG",
            BasicOp::Ifa => "IFA",
            BasicOp::Ifl => "IFL",
            BasicOp::Ifu => "IFU",
            BasicOp::Adx => "ADX",
            BasicOp::Sbx => "SBX",
            BasicOp::Sti => "STI",
            BasicOp::Std => "STD",
        }
    }

    pub fn from_mnemonic(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(name))
    }
}

/// Special (single operand) opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecialOp {
    /// Push PC, jump to a
    Jsr,
    /// Raise a software interrupt with message a
    Int,
    /// a := IA
    Iag,
    /// IA := a
    Ias,
    /// Return from interrupt: queueing off, pop A, pop PC
    Rfi,
    /// Turn interrupt queueing on (a != 0) or off
    Iaq,
    /// a := number of attached devices
    Hwn,
    /// Query identity of device a
    Hwq,
    /// Send a hardware interrupt to device a
    Hwi,
}

impl SpecialOp {
    pub const ALL: [SpecialOp; 9] = [
        SpecialOp::Jsr, SpecialOp::Int, SpecialOp::Iag, SpecialOp::Ias, SpecialOp::Rfi,
        SpecialOp::Iaq, SpecialOp::Hwn, SpecialOp::Hwq, SpecialOp::Hwi,
    ];

    pub fn from_code(code: u16) -> Option<Self> {
        let op = match code {
            0x01 => SpecialOp::Jsr,
            0x08 => SpecialOp::Int,
            0x09 => SpecialOp::Iag,
            0x0a => SpecialOp::Ias,
            0x0b => SpecialOp::Rfi,
            0x0c => SpecialOp::Iaq,
            0x10 => SpecialOp::Hwn,
            0x11 => SpecialOp::Hwq,
            0x12 => SpecialOp::Hwi,
            _ => return None,
        };
        Some(op)
    }

    pub fn code(self) -> u16 {
        match self {
            SpecialOp::Jsr => 0x01,
            SpecialOp::Int => 0x08,
            SpecialOp::Iag => 0x09,
            SpecialOp::Ias => 0x0a,
            SpecialOp::Rfi => 0x0b,
            SpecialOp::Iaq => 0x0c,
            SpecialOp::Hwn => 0x10,
            SpecialOp::Hwq => 0x11,
            SpecialOp::Hwi => 0x12,
        }
    }

    pub fn cycles(self) -> u16 {
        match self {
            SpecialOp::Iag | SpecialOp::Ias => 1,
            SpecialOp::Iaq | SpecialOp::Hwn => 2,
            SpecialOp::Jsr | SpecialOp::Rfi => 3,
            SpecialOp::Int | SpecialOp::Hwq | SpecialOp::Hwi => 4,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            SpecialOp::Jsr => "JSR",
            SpecialOp::Int => "INT",
            SpecialOp::Iag => "IAG",
            SpecialOp::Ias => "IAS",
            SpecialOp::Rfi => "RFI",
            SpecialOp::Iaq => "IAQ",
            SpecialOp::Hwn => "HWN",
            SpecialOp::Hwq => "HWQ",
            SpecialOp::Hwi => "HWI",
        }
    }

    pub fn from_mnemonic(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(name))
    }
}

/// Decoded DCPU-16 instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// `OP b, a`
    Basic { op: BasicOp, b: Operand, a: Operand },
    /// `OP a`
    Special { op: SpecialOp, a: Operand },
}

impl Instruction {
    /// Length in words, including next words.
    pub fn size(&self) -> u16 {
        match self {
            Instruction::Basic { b, a, .. } => {
                1 + u16::from(b.has_next_word()) + u16::from(a.has_next_word())
            }
            Instruction::Special { a, .. } => 1 + u16::from(a.has_next_word()),
        }
    }

    /// Base cost in cycles; next words add one each.
    pub fn cycles(&self) -> u16 {
        match self {
            Instruction::Basic { op, .. } => op.cycles(),
            Instruction::Special { op, .. } => op.cycles(),
        }
    }
}

const fn opcode_field(word: u16) -> u16 {
    word & 0x1f
}

const fn b_field(word: u16) -> u16 {
    (word >> 5) & 0x1f
}

const fn a_field(word: u16) -> u16 {
    word >> 10
}

const fn code_has_next_word(code: u16) -> bool {
    matches!(code, 0x10..=0x17 | 0x1a | 0x1e | 0x1f)
}

/// Decode the first word of an instruction.
pub fn decode(word: u16) -> Result<Instruction, DecodeError> {
    let a = Operand::from_a(a_field(word));

    match opcode_field(word) {
        0 => {
            let code = b_field(word);
            let op = SpecialOp::from_code(code)
                .ok_or(DecodeError::InvalidSpecialOpcode { opcode: code, word })?;
            Ok(Instruction::Special { op, a })
        }
        code => {
            let op = BasicOp::from_code(code)
                .ok_or(DecodeError::InvalidOpcode { opcode: code, word })?;
            let b = Operand::from_b(b_field(word));
            Ok(Instruction::Basic { op, b, a })
        }
    }
}

/// Length in words of the instruction starting with `word`.
///
/// Works from the raw operand fields, so it is defined for reserved
/// opcodes too.
pub fn instruction_len(word: u16) -> u16 {
    let mut len = 1 + u16::from(a_field(word) < 0x20 && code_has_next_word(a_field(word)));
    if opcode_field(word) != 0 {
        len += u16::from(code_has_next_word(b_field(word)));
    }
    len
}

/// True if `word` encodes one of the IFx instructions, which skip the next
/// instruction when their test fails.
pub fn is_conditional_word(word: u16) -> bool {
    (0x10..=0x17).contains(&opcode_field(word))
}

/// Encode an instruction back to its first word.
///
/// Inline literals are only representable in the `a` position; a literal
/// given as `b` is truncated to the 5-bit field.
pub fn encode(instr: &Instruction) -> u16 {
    match instr {
        Instruction::Basic { op, b, a } => op.code() | (b.code() & 0x1f) << 5 | a.code() << 10,
        Instruction::Special { op, a } => op.code() << 5 | a.code() << 10,
    }
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("reserved opcode {opcode:#04x} in word {word:#06x}")]
    InvalidOpcode { opcode: u16, word: u16 },

    #[error("reserved special opcode {opcode:#04x} in word {word:#06x}")]
    InvalidSpecialOpcode { opcode: u16, word: u16 },
}
