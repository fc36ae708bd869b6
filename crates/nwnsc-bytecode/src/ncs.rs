//! NCS binary emitter.
//!
//! Wire shape: an 8-byte magic header `b"NCS V1.0"`, followed by a single
//! top-level `T` directive — the byte `'T'` plus a big-endian `u32` giving
//! the total file size including the header — then the instruction stream
//! itself, every multi-byte field big-endian.

use crate::opcode::{Opcode, TypeTag};

pub const MAGIC: &[u8; 8] = b"NCS V1.0";

/// One already-resolved instruction, ready to serialize. Jump/call
/// operands are absolute byte offsets from the start of the file by the
/// time they reach this stage — the code generator's back-patcher has
/// already resolved every `Linker` symbol before building these.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    pub type_tag: Option<TypeTag>,
    pub operand: Operand,
}

#[derive(Debug, Clone)]
pub enum Operand {
    None,
    ConstInt(i32),
    ConstFloat(f32),
    ConstString(String),
    ConstObject(u32),
    /// CPDOWNSP/CPTOPSP/CPDOWNBP/CPTOPBP: (stack offset, size in bytes).
    StackCopy(i32, u16),
    /// MOVSP/DECISP/INCISP/DECBP/INCBP: a signed stack-pointer delta.
    StackAdjust(i32),
    /// ACTION: engine-function index plus argument count.
    Action { index: u16, arg_count: u8 },
    /// JMP/JSR/JZ/JNZ: absolute byte offset of the target instruction.
    Jump(u32),
    /// DESTRUCT: size to pop, offset of the element to keep, size to keep.
    Destruct {
        size_to_destroy: u16,
        offset_to_save: i16,
        size_to_save: u16,
    },
}

impl Instruction {
    pub fn encoded_len(&self) -> usize {
        let mut n = 1; // opcode byte
        if self.type_tag.is_some() {
            n += 1;
        }
        n += match &self.operand {
            Operand::None => 0,
            Operand::ConstInt(_) => 4,
            Operand::ConstFloat(_) => 4,
            Operand::ConstString(s) => 2 + s.len(),
            Operand::ConstObject(_) => 4,
            Operand::StackCopy(_, _) => 4 + 2,
            Operand::StackAdjust(_) => 4,
            Operand::Action { .. } => 2 + 1,
            Operand::Jump(_) => 4,
            Operand::Destruct { .. } => 2 + 2 + 2,
        };
        n
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.opcode as u8);
        if let Some(tag) = self.type_tag {
            out.push(tag.byte());
        }
        match &self.operand {
            Operand::None => {}
            Operand::ConstInt(v) => out.extend_from_slice(&v.to_be_bytes()),
            Operand::ConstFloat(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
            Operand::ConstString(s) => {
                out.extend_from_slice(&(s.len() as u16).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Operand::ConstObject(v) => out.extend_from_slice(&v.to_be_bytes()),
            Operand::StackCopy(offset, size) => {
                out.extend_from_slice(&offset.to_be_bytes());
                out.extend_from_slice(&size.to_be_bytes());
            }
            Operand::StackAdjust(delta) => out.extend_from_slice(&delta.to_be_bytes()),
            Operand::Action { index, arg_count } => {
                out.extend_from_slice(&index.to_be_bytes());
                out.push(*arg_count);
            }
            Operand::Jump(target) => out.extend_from_slice(&target.to_be_bytes()),
            Operand::Destruct {
                size_to_destroy,
                offset_to_save,
                size_to_save,
            } => {
                out.extend_from_slice(&size_to_destroy.to_be_bytes());
                out.extend_from_slice(&offset_to_save.to_be_bytes());
                out.extend_from_slice(&size_to_save.to_be_bytes());
            }
        }
    }
}

/// Header length: 8-byte magic + 1-byte 'T' + 4-byte size field.
const HEADER_LEN: usize = 8 + 1 + 4;

/// Serialize a resolved instruction stream into the NCS wire format.
/// `instructions` must already carry absolute offsets for every jump —
/// the caller lays them out with [`layout_offsets`] first so the code
/// generator's back-patcher can resolve `Linker` symbols against them.
pub fn emit(instructions: &[Instruction]) -> Vec<u8> {
    let mut body = Vec::new();
    for insn in instructions {
        insn.write(&mut body);
    }

    let total_size = (HEADER_LEN + body.len()) as u32;
    let mut out = Vec::with_capacity(total_size as usize);
    out.extend_from_slice(MAGIC);
    out.push(b'T');
    out.extend_from_slice(&total_size.to_be_bytes());
    out.extend_from_slice(&body);
    out
}

/// Compute the absolute byte offset (from file start, i.e. including
/// `HEADER_LEN`) of each instruction in `instructions`, in order. Used by
/// the code generator to resolve jump targets before calling [`emit`].
pub fn layout_offsets(instructions: &[Instruction]) -> Vec<u32> {
    let mut offsets = Vec::with_capacity(instructions.len());
    let mut cursor = HEADER_LEN as u32;
    for insn in instructions {
        offsets.push(cursor);
        cursor += insn.encoded_len() as u32;
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    #[test]
    fn empty_program_has_header_and_retn() {
        let insns = vec![Instruction {
            opcode: Opcode::Retn,
            type_tag: None,
            operand: Operand::None,
        }];
        let bytes = emit(&insns);
        assert_eq!(&bytes[0..8], MAGIC);
        assert_eq!(bytes[8], b'T');
        let size = u32::from_be_bytes(bytes[9..13].try_into().unwrap());
        assert_eq!(size as usize, bytes.len());
        assert_eq!(bytes[13], Opcode::Retn as u8);
    }

    #[test]
    fn const_int_roundtrips_big_endian() {
        let insns = vec![Instruction {
            opcode: Opcode::Const,
            type_tag: Some(TypeTag::Int),
            operand: Operand::ConstInt(10),
        }];
        let bytes = emit(&insns);
        let payload = &bytes[13..];
        assert_eq!(payload[0], Opcode::Const as u8);
        assert_eq!(payload[1], TypeTag::Int.byte());
        assert_eq!(i32::from_be_bytes(payload[2..6].try_into().unwrap()), 10);
    }

    #[test]
    fn layout_offsets_accounts_for_header() {
        let insns = vec![
            Instruction {
                opcode: Opcode::Const,
                type_tag: Some(TypeTag::Int),
                operand: Operand::ConstInt(1),
            },
            Instruction {
                opcode: Opcode::Retn,
                type_tag: None,
                operand: Operand::None,
            },
        ];
        let offsets = layout_offsets(&insns);
        assert_eq!(offsets[0], HEADER_LEN as u32);
        assert_eq!(offsets[1], HEADER_LEN as u32 + insns[0].encoded_len() as u32);
    }
}
