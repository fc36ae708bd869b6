//! Disassembler: bytecode bytes in, mnemonic text out. Deliberately kept
//! independent of the compiler core — it shares only the [`crate::opcode`]
//! table, never the parser or code generator, so it can disassemble NCS
//! files this compiler never produced.

use crate::ncs::MAGIC;
use crate::opcode::{Opcode, TypeTag};
use std::fmt;

#[derive(Debug)]
pub enum DisasmError {
    BadMagic,
    Truncated { at: usize },
    UnknownOpcode { at: usize, byte: u8 },
}

impl fmt::Display for DisasmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisasmError::BadMagic => write!(f, "not an NCS file (bad magic header)"),
            DisasmError::Truncated { at } => write!(f, "truncated instruction stream at byte {}", at),
            DisasmError::UnknownOpcode { at, byte } => {
                write!(f, "unknown opcode 0x{:02X} at byte {}", byte, at)
            }
        }
    }
}

impl std::error::Error for DisasmError {}

pub struct DecodedInstruction {
    pub offset: usize,
    pub text: String,
}

/// Decode an entire NCS file into one rendered line per instruction,
/// each prefixed with its absolute byte offset as a jump-target label.
pub fn disassemble(bytes: &[u8]) -> Result<Vec<DecodedInstruction>, DisasmError> {
    if bytes.len() < 13 || &bytes[0..8] != MAGIC || bytes[8] != b'T' {
        return Err(DisasmError::BadMagic);
    }
    let mut cursor = 13usize;
    let mut out = Vec::new();

    while cursor < bytes.len() {
        let start = cursor;
        let op_byte = *bytes.get(cursor).ok_or(DisasmError::Truncated { at: cursor })?;
        let opcode = Opcode::from_byte(op_byte).ok_or(DisasmError::UnknownOpcode {
            at: cursor,
            byte: op_byte,
        })?;
        cursor += 1;

        let type_tag = if opcode.has_type_byte() {
            let b = *bytes.get(cursor).ok_or(DisasmError::Truncated { at: cursor })?;
            cursor += 1;
            TypeTag::from_byte(b)
        } else {
            None
        };

        let (operand_text, consumed) = decode_operand(opcode, bytes, cursor)?;
        cursor += consumed;

        let mut line = format!("{:06} {}", start, opcode.mnemonic());
        if let Some(tag) = type_tag {
            write_tag(&mut line, tag);
        }
        if !operand_text.is_empty() {
            line.push(' ');
            line.push_str(&operand_text);
        }
        out.push(DecodedInstruction {
            offset: start,
            text: line,
        });
    }

    Ok(out)
}

fn write_tag(line: &mut String, tag: TypeTag) {
    use std::fmt::Write;
    let _ = write!(line, "{:?}", tag);
}

fn decode_operand(opcode: Opcode, bytes: &[u8], at: usize) -> Result<(String, usize), DisasmError> {
    let need = |n: usize| -> Result<&[u8], DisasmError> {
        bytes
            .get(at..at + n)
            .ok_or(DisasmError::Truncated { at })
    };

    match opcode {
        Opcode::Const => {
            // The type tag (already consumed by the caller) tells us the
            // shape, but the disassembler only has the previous byte by
            // then; re-read it directly here for operand sizing.
            let tag_byte = *bytes.get(at - 1).ok_or(DisasmError::Truncated { at })?;
            match TypeTag::from_byte(tag_byte) {
                Some(TypeTag::Int) => {
                    let b = need(4)?;
                    let v = i32::from_be_bytes(b.try_into().unwrap());
                    Ok((v.to_string(), 4))
                }
                Some(TypeTag::Float) => {
                    let b = need(4)?;
                    let bits = u32::from_be_bytes(b.try_into().unwrap());
                    Ok((f32::from_bits(bits).to_string(), 4))
                }
                Some(TypeTag::String) => {
                    let len_bytes = need(2)?;
                    let len = u16::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
                    let s = need(2 + len)?;
                    let text = String::from_utf8_lossy(&s[2..]).to_string();
                    Ok((format!("\"{}\"", text), 2 + len))
                }
                Some(TypeTag::Object) => {
                    let b = need(4)?;
                    let v = u32::from_be_bytes(b.try_into().unwrap());
                    Ok((v.to_string(), 4))
                }
                _ => Ok((String::new(), 0)),
            }
        }
        Opcode::CpDownSp | Opcode::CpTopSp | Opcode::CpDownBp | Opcode::CpTopBp => {
            let off = need(4)?;
            let size = need(6)?;
            let offset = i32::from_be_bytes(off.try_into().unwrap());
            let size = u16::from_be_bytes(size[4..6].try_into().unwrap());
            Ok((format!("{}, {}", offset, size), 6))
        }
        Opcode::MovSp | Opcode::DecIsp | Opcode::IncIsp | Opcode::DecBp | Opcode::IncBp => {
            let b = need(4)?;
            let v = i32::from_be_bytes(b.try_into().unwrap());
            Ok((v.to_string(), 4))
        }
        Opcode::Action => {
            let idx_bytes = need(2)?;
            let argc = *bytes.get(at + 2).ok_or(DisasmError::Truncated { at })?;
            let idx = u16::from_be_bytes(idx_bytes.try_into().unwrap());
            Ok((format!("{}, {}", idx, argc), 3))
        }
        Opcode::Jmp | Opcode::Jsr | Opcode::Jz | Opcode::Jnz => {
            let b = need(4)?;
            let target = u32::from_be_bytes(b.try_into().unwrap());
            Ok((format!("{:06}", target), 4))
        }
        Opcode::Destruct => {
            let b = need(6)?;
            let size_to_destroy = u16::from_be_bytes(b[0..2].try_into().unwrap());
            let offset_to_save = i16::from_be_bytes(b[2..4].try_into().unwrap());
            let size_to_save = u16::from_be_bytes(b[4..6].try_into().unwrap());
            Ok((
                format!("{}, {}, {}", size_to_destroy, offset_to_save, size_to_save),
                6,
            ))
        }
        _ => Ok((String::new(), 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ncs::{emit, Instruction, Operand};
    use crate::opcode::{Opcode, TypeTag};

    #[test]
    fn disassembles_const_and_retn() {
        let insns = vec![
            Instruction {
                opcode: Opcode::Const,
                type_tag: Some(TypeTag::Int),
                operand: Operand::ConstInt(42),
            },
            Instruction {
                opcode: Opcode::Retn,
                type_tag: None,
                operand: Operand::None,
            },
        ];
        let bytes = emit(&insns);
        let decoded = disassemble(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].text.contains("CONST"));
        assert!(decoded[0].text.contains("42"));
        assert!(decoded[1].text.contains("RETN"));
    }

    #[test]
    fn rejects_bad_magic() {
        let err = disassemble(b"not an ncs file").unwrap_err();
        assert!(matches!(err, DisasmError::BadMagic));
    }
}
