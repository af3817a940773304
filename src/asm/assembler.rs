//! Two-pass assembler for DCPU-16 programs.
//!
//! Syntax:
//! ```text
//! ; Comment
//! :loop               ; Define a label (Notch style)
//! start:              ; ... or with a trailing colon
//!     SET A, 0x30     ; Short literals (-1..=30) are inlined in the a position
//!     SET [A+2], PICK 1
//!     SET PUSH, [0x1000]
//!     IFN A, 10
//!         SET PC, loop
//!     JSR start
//!     ORG 0x100       ; Pad with zeros up to an address
//!     DAT "hi", 0, loop
//! ```
//!
//! Label references always use the next-word form, so instruction sizes are
//! known in the first pass and labels are patched in the second.

use crate::cpu::decode::{encode, BasicOp, Instruction, Operand, SpecialOp};
use crate::cpu::registers::Register;
use crate::cpu::MEMORY_SIZE;
use std::collections::HashMap;
use thiserror::Error;

/// Assemble source code to memory words, starting at address 0.
pub fn assemble(source: &str) -> Result<Vec<u16>, AssemblerError> {
    let mut asm = Assembler::new();
    asm.assemble(source)
}

/// A value in an operand or `DAT` item.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Number(u16),
    Label(String),
}

/// An operand plus the next word it needs, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedOperand {
    operand: Operand,
    next: Option<Value>,
}

impl ParsedOperand {
    fn plain(operand: Operand) -> Self {
        Self { operand, next: None }
    }

    fn with(operand: Operand, value: Value) -> Self {
        Self { operand, next: Some(value) }
    }
}

/// The assembler state.
struct Assembler {
    /// Symbol table (label -> address).
    symbols: HashMap<String, u16>,
    /// Label references to patch: (output index, label, source line).
    pending: Vec<(usize, String, usize)>,
    /// Output words.
    output: Vec<u16>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            symbols: HashMap::new(),
            pending: Vec::new(),
            output: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Result<Vec<u16>, AssemblerError> {
        // Pass 1: collect labels and generate code
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        if self.output.len() > MEMORY_SIZE {
            return Err(AssemblerError::ProgramTooLarge { size: self.output.len() });
        }

        // Pass 2: patch label references
        self.resolve_references()?;

        Ok(std::mem::take(&mut self.output))
    }

    fn current_addr(&self) -> u16 {
        self.output.len() as u16
    }

    fn process_line(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let mut line = strip_comment(line).trim();

        // Any number of labels may precede the statement
        loop {
            if let Some(rest) = line.strip_prefix(':') {
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                self.define_label(&rest[..end], line_num)?;
                line = rest[end..].trim_start();
                continue;
            }

            let first = line.split_whitespace().next().unwrap_or("");
            if let Some(label) = first.strip_suffix(':') {
                self.define_label(label, line_num)?;
                line = line[first.len()..].trim_start();
                continue;
            }
            break;
        }

        if line.is_empty() {
            return Ok(());
        }

        let (mnemonic, rest) = match line.find(char::is_whitespace) {
            Some(idx) => (&line[..idx], line[idx..].trim()),
            None => (line, ""),
        };
        self.process_statement(mnemonic, rest, line_num)
    }

    fn define_label(&mut self, label: &str, line_num: usize) -> Result<(), AssemblerError> {
        if !is_identifier(label) {
            return Err(AssemblerError::SyntaxError {
                line: line_num,
                message: format!("invalid label name `{}`", label),
            });
        }

        let key = label.to_uppercase();
        if self.symbols.contains_key(&key) {
            return Err(AssemblerError::DuplicateLabel { line: line_num, label: label.to_string() });
        }
        self.symbols.insert(key, self.current_addr());
        Ok(())
    }

    fn process_statement(&mut self, mnemonic: &str, rest: &str, line_num: usize) -> Result<(), AssemblerError> {
        let upper = mnemonic.to_uppercase();
        match upper.as_str() {
            "DAT" | ".DAT" => {
                let items = split_operands(rest);
                if items.iter().all(|item| item.is_empty()) {
                    return Err(AssemblerError::SyntaxError {
                        line: line_num,
                        message: "DAT requires at least one value".into(),
                    });
                }
                for item in items {
                    self.emit_data(item, line_num)?;
                }
            }

            "ORG" | ".ORG" => {
                let addr = match parse_value(rest, line_num)? {
                    Value::Number(addr) => addr,
                    Value::Label(_) => {
                        return Err(AssemblerError::SyntaxError {
                            line: line_num,
                            message: "ORG requires a numeric address".into(),
                        })
                    }
                };
                if (addr as usize) < self.output.len() {
                    return Err(AssemblerError::SyntaxError {
                        line: line_num,
                        message: format!("ORG {:#06x} is behind the current address {:#06x}", addr, self.current_addr()),
                    });
                }
                self.output.resize(addr as usize, 0);
            }

            _ => {
                if let Some(op) = BasicOp::from_mnemonic(&upper) {
                    let operands = split_operands(rest);
                    let [b, a] = operands.as_slice() else {
                        return Err(operand_count(mnemonic, 2, operands.len(), line_num));
                    };
                    let b = parse_operand(b, false, line_num)?;
                    let a = parse_operand(a, true, line_num)?;
                    self.emit(encode(&Instruction::Basic { op, b: b.operand, a: a.operand }));
                    // a's next word is read first
                    self.emit_next(a.next, line_num);
                    self.emit_next(b.next, line_num);
                } else if let Some(op) = SpecialOp::from_mnemonic(&upper) {
                    let operands = split_operands(rest);
                    let [a] = operands.as_slice() else {
                        return Err(operand_count(mnemonic, 1, operands.len(), line_num));
                    };
                    let a = parse_operand(a, true, line_num)?;
                    self.emit(encode(&Instruction::Special { op, a: a.operand }));
                    self.emit_next(a.next, line_num);
                } else {
                    return Err(AssemblerError::UnknownMnemonic {
                        line: line_num,
                        mnemonic: mnemonic.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    fn emit_data(&mut self, item: &str, line_num: usize) -> Result<(), AssemblerError> {
        if let Some(body) = item.strip_prefix('"') {
            let body = body.strip_suffix('"').ok_or_else(|| AssemblerError::SyntaxError {
                line: line_num,
                message: "unterminated string".into(),
            })?;
            for word in unescape(body, line_num)? {
                self.emit(word);
            }
            return Ok(());
        }

        let value = parse_value(item, line_num)?;
        self.emit_next(Some(value), line_num);
        Ok(())
    }

    fn emit(&mut self, word: u16) {
        self.output.push(word);
    }

    fn emit_next(&mut self, value: Option<Value>, line_num: usize) {
        match value {
            None => {}
            Some(Value::Number(n)) => self.emit(n),
            Some(Value::Label(label)) => {
                self.pending.push((self.output.len(), label.to_uppercase(), line_num));
                self.emit(0);
            }
        }
    }

    fn resolve_references(&mut self) -> Result<(), AssemblerError> {
        for (out_idx, label, line_num) in &self.pending {
            let addr = self.symbols.get(label).ok_or_else(|| AssemblerError::UndefinedLabel {
                line: *line_num,
                label: label.clone(),
            })?;
            self.output[*out_idx] = *addr;
        }
        Ok(())
    }
}

fn operand_count(mnemonic: &str, expected: usize, found: usize, line_num: usize) -> AssemblerError {
    AssemblerError::SyntaxError {
        line: line_num,
        message: format!("{} takes {} operand(s), found {}", mnemonic.to_uppercase(), expected, found),
    }
}

/// Drop a trailing `;` comment, ignoring semicolons inside strings.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (idx, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ';' if !in_string => return &line[..idx],
            _ => {}
        }
    }
    line
}

/// Split on commas outside strings. An empty operand list yields no items.
fn split_operands(text: &str) -> Vec<&str> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut items = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, c) in text.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ',' if !in_string => {
                items.push(text[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    items.push(text[start..].trim());
    items
}

fn unescape(body: &str, line_num: usize) -> Result<Vec<u16>, AssemblerError> {
    let mut words = Vec::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        let c = if c == '\\' {
            match chars.next() {
                Some('n') => '\n',
                Some('t') => '\t',
                Some('0') => '\0',
                Some(c @ ('\\' | '"')) => c,
                other => {
                    return Err(AssemblerError::SyntaxError {
                        line: line_num,
                        message: format!("invalid escape `\\{}`", other.map(String::from).unwrap_or_default()),
                    })
                }
            }
        } else {
            c
        };
        let code = u16::try_from(u32::from(c))
            .map_err(|_| AssemblerError::ValueOutOfRange { line: line_num, value: i64::from(u32::from(c)) })?;
        words.push(code);
    }
    Ok(words)
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '.')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn parse_number(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, text),
    };

    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).ok()?
    } else if digits.starts_with(|c: char| c.is_ascii_digit()) {
        digits.parse::<i64>().ok()?
    } else {
        return None;
    };

    Some(if negative { -magnitude } else { magnitude })
}

/// Parse a number (wrapped to 16 bits) or a label reference.
fn parse_value(text: &str, line_num: usize) -> Result<Value, AssemblerError> {
    let text = text.trim();
    if let Some(value) = parse_number(text) {
        if !(-0x8000..=0xffff).contains(&value) {
            return Err(AssemblerError::ValueOutOfRange { line: line_num, value });
        }
        return Ok(Value::Number(value as u16));
    }

    if is_identifier(text) {
        return Ok(Value::Label(text.to_string()));
    }

    Err(AssemblerError::SyntaxError {
        line: line_num,
        message: format!("expected a number or label, found `{}`", text),
    })
}

/// Parse one operand. `is_a` selects the source position, where `POP` and
/// inline literals are legal.
fn parse_operand(text: &str, is_a: bool, line_num: usize) -> Result<ParsedOperand, AssemblerError> {
    let invalid = |message: &str| AssemblerError::SyntaxError {
        line: line_num,
        message: format!("{} `{}`", message, text),
    };

    let text = text.trim();
    let upper = text.to_ascii_uppercase();

    if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        return parse_indirect(inner, is_a, line_num);
    }

    match upper.as_str() {
        "PUSH" if is_a => return Err(invalid("PUSH is only valid as a destination:")),
        "PUSH" => return Ok(ParsedOperand::plain(Operand::Push)),
        "POP" if !is_a => return Err(invalid("POP is only valid as a source:")),
        "POP" => return Ok(ParsedOperand::plain(Operand::Pop)),
        "PEEK" => return Ok(ParsedOperand::plain(Operand::Peek)),
        "SP" => return Ok(ParsedOperand::plain(Operand::Sp)),
        "PC" => return Ok(ParsedOperand::plain(Operand::Pc)),
        "EX" => return Ok(ParsedOperand::plain(Operand::Ex)),
        _ => {}
    }

    if let Some(reg) = Register::parse(text) {
        return Ok(ParsedOperand::plain(Operand::Register(reg)));
    }

    if upper.starts_with("PICK") && upper[4..].starts_with(char::is_whitespace) {
        let value = parse_value(&text[4..], line_num)?;
        return Ok(ParsedOperand::with(Operand::Pick, value));
    }

    let value = parse_value(text, line_num)?;
    if is_a {
        if let Value::Number(n) = value {
            if let Some(literal) = Operand::short_literal(n) {
                return Ok(ParsedOperand::plain(literal));
            }
        }
    }
    Ok(ParsedOperand::with(Operand::Next, value))
}

/// The inside of `[...]`.
fn parse_indirect(inner: &str, is_a: bool, line_num: usize) -> Result<ParsedOperand, AssemblerError> {
    let inner = inner.trim();
    let compact: String = inner.split_whitespace().collect::<String>().to_uppercase();

    match compact.as_str() {
        "--SP" if !is_a => return Ok(ParsedOperand::plain(Operand::Push)),
        "SP++" if is_a => return Ok(ParsedOperand::plain(Operand::Pop)),
        "SP" => return Ok(ParsedOperand::plain(Operand::Peek)),
        _ => {}
    }

    // Terms joined by + or -, at most one register and one value
    let mut base: Option<Operand> = None;
    let mut value: Option<Value> = None;
    for (negative, term) in split_terms(inner) {
        let upper = term.to_uppercase();
        let reg = if upper == "SP" {
            Some(Operand::Pick)
        } else {
            Register::parse(term).map(Operand::IndirectOffset)
        };

        if let Some(reg) = reg {
            if negative || base.is_some() {
                return Err(bad_indirect(inner, line_num));
            }
            base = Some(reg);
            continue;
        }

        if value.is_some() {
            return Err(bad_indirect(inner, line_num));
        }
        value = Some(match parse_value(term, line_num)? {
            Value::Number(n) if negative => Value::Number(n.wrapping_neg()),
            Value::Label(_) if negative => return Err(bad_indirect(inner, line_num)),
            v => v,
        });
    }

    match (base, value) {
        (Some(Operand::Pick), None) => Ok(ParsedOperand::plain(Operand::Peek)),
        (Some(Operand::IndirectOffset(reg)), None) => Ok(ParsedOperand::plain(Operand::Indirect(reg))),
        (Some(base), Some(value)) => Ok(ParsedOperand::with(base, value)),
        (None, Some(value)) => Ok(ParsedOperand::with(Operand::IndirectNext, value)),
        _ => Err(bad_indirect(inner, line_num)),
    }
}

fn bad_indirect(inner: &str, line_num: usize) -> AssemblerError {
    AssemblerError::SyntaxError {
        line: line_num,
        message: format!("invalid memory operand `[{}]`", inner),
    }
}

/// Split `a + b - c` into signed terms. A leading sign belongs to the first
/// term.
fn split_terms(text: &str) -> Vec<(bool, &str)> {
    let mut terms = Vec::new();
    let mut negative = false;
    let mut start = 0;
    for (idx, c) in text.char_indices() {
        if (c == '+' || c == '-') && !text[start..idx].trim().is_empty() {
            terms.push((negative, text[start..idx].trim()));
            negative = c == '-';
            start = idx + 1;
        }
    }
    let last = text[start..].trim();
    match last.strip_prefix('-') {
        Some(rest) if terms.is_empty() => terms.push((true, rest.trim())),
        _ => terms.push((negative, last)),
    }
    terms
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },

    #[error("label defined twice on line {line}: {label}")]
    DuplicateLabel { line: usize, label: String },

    #[error("value out of range on line {line}: {value}")]
    ValueOutOfRange { line: usize, value: i64 },

    #[error("program of {size} words does not fit in memory")]
    ProgramTooLarge { size: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_reference_sample() {
        let source = r#"
            ; Try some basic stuff
                SET A, 0x30              ; 7c01 0030
                SET [0x1000], 0x20       ; 7fc1 0020 1000
                SUB A, [0x1000]          ; 7803 1000
                IFN A, 0x10              ; c413
                   SET PC, crash         ; 7f81 xxxx
            :crash SET PC, crash
        "#;

        let words = assemble(source).unwrap();
        assert_eq!(
            words,
            vec![0x7c01, 0x0030, 0x7fc1, 0x0020, 0x1000, 0x7803, 0x1000, 0xc413, 0x7f81, 0x000a, 0x7f81, 0x000a]
        );
    }

    #[test]
    fn test_short_literals_only_in_a() {
        assert_eq!(assemble("SET A, -1").unwrap(), vec![0x8001]);
        assert_eq!(assemble("SET A, 30").unwrap(), vec![0xfc01]);
        assert_eq!(assemble("SET A, 31").unwrap(), vec![0x7c01, 31]);
        // literal destination takes a next word
        assert_eq!(assemble("SET 5, A").unwrap(), vec![0x03e1, 5]);
    }

    #[test]
    fn test_operand_forms() {
        assert_eq!(assemble("SET [A+2], B").unwrap(), vec![0x0601, 2]);
        assert_eq!(assemble("SET [2 + A], B").unwrap(), vec![0x0601, 2]);
        assert_eq!(assemble("SET [A - 1], B").unwrap(), vec![0x0601, 0xffff]);
        assert_eq!(assemble("SET [C], B").unwrap(), vec![0x0541]);
        assert_eq!(assemble("SET A, PICK 3").unwrap(), vec![0x6801, 3]);
        assert_eq!(assemble("SET A, [SP + 3]").unwrap(), vec![0x6801, 3]);
        assert_eq!(assemble("SET PUSH, A").unwrap(), vec![0x0301]);
        assert_eq!(assemble("SET [--SP], A").unwrap(), vec![0x0301]);
        assert_eq!(assemble("SET A, POP").unwrap(), vec![0x6001]);
        assert_eq!(assemble("SET A, [SP++]").unwrap(), vec![0x6001]);
        assert_eq!(assemble("SET PEEK, [SP]").unwrap(), vec![0x6721]);
        assert_eq!(assemble("SET EX, SP").unwrap(), vec![0x6fa1]);
    }

    #[test]
    fn test_special_and_labels() {
        let source = "
            JSR sub
            sub: IAS sub
        ";
        let words = assemble(source).unwrap();
        assert_eq!(words, vec![0x7c20, 2, 0x7d40, 2]);
    }

    #[test]
    fn test_dat_and_org() {
        let source = r#"
            DAT "hi", 0, end ; "strings; with comments"
            ORG 0x8
            end: DAT -2, 0b101, "\"\n"
        "#;
        let words = assemble(source).unwrap();
        assert_eq!(words, vec![0x68, 0x69, 0, 8, 0, 0, 0, 0, 0xfffe, 5, 0x22, 0x0a]);
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        assert_eq!(
            assemble("SET A, 1\nFOO A").unwrap_err(),
            AssemblerError::UnknownMnemonic { line: 2, mnemonic: "FOO".into() }
        );
        assert_eq!(
            assemble("\n\nSET PC, nowhere").unwrap_err(),
            AssemblerError::UndefinedLabel { line: 3, label: "NOWHERE".into() }
        );
        assert!(matches!(assemble("SET A").unwrap_err(), AssemblerError::SyntaxError { line: 1, .. }));
        assert!(matches!(assemble("SET A, PUSH").unwrap_err(), AssemblerError::SyntaxError { line: 1, .. }));
        assert!(matches!(assemble("SET POP, A").unwrap_err(), AssemblerError::SyntaxError { line: 1, .. }));
        assert_eq!(
            assemble("DAT 70000").unwrap_err(),
            AssemblerError::ValueOutOfRange { line: 1, value: 70000 }
        );
        assert!(matches!(
            assemble("x: DAT 1\nx: DAT 2").unwrap_err(),
            AssemblerError::DuplicateLabel { line: 2, .. }
        ));
        assert!(matches!(assemble("DAT 1, 2\nORG 1").unwrap_err(), AssemblerError::SyntaxError { line: 2, .. }));
    }

    #[test]
    fn test_program_too_large() {
        let source = "ORG 0xffff\nDAT 1, 2";
        assert_eq!(assemble(source).unwrap_err(), AssemblerError::ProgramTooLarge { size: 0x10001 });
    }
}
