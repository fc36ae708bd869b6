//! NCS/NDB wire formats: the binary bytecode container, the text debug
//! symbol container, and the disassembler. Kept as its own crate since
//! none of this needs the compiler core — a disassembler has to be able
//! to read bytecode this crate's own emitter never wrote.

pub mod disasm;
pub mod ncs;
pub mod ndb;
pub mod opcode;

pub use disasm::{disassemble, DecodedInstruction, DisasmError};
pub use ncs::{emit, layout_offsets, Instruction, Operand};
pub use ndb::NdbWriter;
pub use opcode::{Opcode, TypeTag};
