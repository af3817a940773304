//! Disassembler for DCPU-16 programs.
//!
//! Converts memory words back to assembly the assembler accepts.

use crate::cpu::decode::{decode, instruction_len, Instruction, Operand};
use crate::cpu::Memory;

/// Disassemble the instruction at `addr`.
///
/// Returns the text and the instruction length in words. Reserved opcodes
/// come out as `DAT` of their words. Next words wrap at the end of memory.
pub fn disassemble_at(mem: &Memory, addr: u16) -> (String, u16) {
    let word = mem.read(addr);
    let len = instruction_len(word);
    let next: Vec<u16> = (1..len).map(|n| mem.read(addr.wrapping_add(n))).collect();
    (disassemble_words(word, &next), len)
}

/// Disassemble a program loaded at address 0.
pub fn disassemble(words: &[u16]) -> String {
    let mut output = String::new();
    output.push_str("; DCPU-16 Disassembly\n");
    output.push_str("; -------------------\n\n");

    let mut addr = 0;
    while addr < words.len() {
        let word = words[addr];
        let len = instruction_len(word) as usize;
        let end = (addr + len).min(words.len());
        let raw = &words[addr..end];

        let text = if end - addr < len {
            // truncated at the end of the image
            format_dat(raw)
        } else {
            disassemble_words(word, &raw[1..])
        };

        let hex: Vec<String> = raw.iter().map(|w| format!("{:04x}", w)).collect();
        output.push_str(&format!("{:04x}: {:<28} ; {}\n", addr, text, hex.join(" ")));
        addr = end;
    }

    output
}

fn disassemble_words(word: u16, next: &[u16]) -> String {
    match decode(word) {
        Ok(instr) => format_instruction(&instr, next),
        Err(_) => {
            let mut raw = vec![word];
            raw.extend_from_slice(next);
            format_dat(&raw)
        }
    }
}

fn format_dat(words: &[u16]) -> String {
    let items: Vec<String> = words.iter().map(|w| format!("{:#06x}", w)).collect();
    format!("DAT {}", items.join(", "))
}

/// Format a decoded instruction; `next` holds its next words in fetch order
/// (a's before b's).
pub fn format_instruction(instr: &Instruction, next: &[u16]) -> String {
    let mut next = next.iter().copied();
    match instr {
        Instruction::Basic { op, b, a } => {
            let a = format_operand(*a, &mut next);
            let b = format_operand(*b, &mut next);
            format!("{} {}, {}", op.mnemonic(), b, a)
        }
        Instruction::Special { op, a } => {
            format!("{} {}", op.mnemonic(), format_operand(*a, &mut next))
        }
    }
}

fn format_operand(operand: Operand, next: &mut impl Iterator<Item = u16>) -> String {
    let mut word = || next.next().unwrap_or(0);
    match operand {
        Operand::Register(r) => r.to_string(),
        Operand::Indirect(r) => format!("[{}]", r),
        Operand::IndirectOffset(r) => format!("[{} + {:#06x}]", r, word()),
        Operand::Push => "PUSH".to_string(),
        Operand::Pop => "POP".to_string(),
        Operand::Peek => "PEEK".to_string(),
        Operand::Pick => format!("PICK {:#06x}", word()),
        Operand::Sp => "SP".to_string(),
        Operand::Pc => "PC".to_string(),
        Operand::Ex => "EX".to_string(),
        Operand::IndirectNext => format!("[{:#06x}]", word()),
        Operand::Next => format!("{:#06x}", word()),
        Operand::Literal(0xffff) => "-1".to_string(),
        Operand::Literal(v) => v.to_string(),
    }
}
