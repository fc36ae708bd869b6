//! Peephole optimizer (component H), run per-function on the unresolved
//! `FuncInstr` stream before linking — after linking, jump targets are
//! absolute byte offsets and no longer tolerate instructions being added
//! or removed.
//!
//! Four passes, applied in a fixed order and repeated until none of them
//! change anything:
//!   - dead code after an unconditional `RETN`/`JMP`, up to the next label
//!   - `MOVSP 0` elision
//!   - `CONST n; NEG` folded into `CONST -n`
//!   - the `CPTOPSP off,4; CONST 1; ADD/SUB; CPDOWNSP off,4` read-modify-
//!     write shape folded into a single `INCISP`/`DECISP off`
//!
//! Gated by the optimize-expressions/optimize-return switches at the
//! call site (`compile.rs` skips this module entirely when the caller
//! asked for unoptimized output).

use crate::codegen::FuncInstr;
use nwnsc_bytecode::ncs::{Instruction, Operand};
use nwnsc_bytecode::opcode::{Opcode, TypeTag};

pub fn optimize(unit: Vec<FuncInstr>) -> Vec<FuncInstr> {
    let mut current = unit;
    loop {
        let before = current.len();
        current = elide_dead_code(current);
        current = elide_zero_movsp(current);
        current = fuse_const_neg(current);
        current = fuse_increment(current);
        if current.len() == before {
            break;
        }
    }
    current
}

fn is_unconditional_terminator(instr: &FuncInstr) -> bool {
    match instr {
        FuncInstr::Real(Instruction { opcode: Opcode::Retn, .. }) => true,
        FuncInstr::Branch { opcode: Opcode::Jmp, .. } => true,
        _ => false,
    }
}

/// Drops every instruction between an unconditional terminator and the
/// next label (or function end) — it can never be reached, since the
/// only way into that span would be falling through the terminator.
fn elide_dead_code(unit: Vec<FuncInstr>) -> Vec<FuncInstr> {
    let mut out = Vec::with_capacity(unit.len());
    let mut skipping = false;
    for instr in unit {
        if skipping {
            if matches!(instr, FuncInstr::Label(_)) {
                skipping = false;
            } else {
                continue;
            }
        }
        let becomes_dead = is_unconditional_terminator(&instr);
        out.push(instr);
        if becomes_dead {
            skipping = true;
        }
    }
    out
}

fn elide_zero_movsp(unit: Vec<FuncInstr>) -> Vec<FuncInstr> {
    unit.into_iter()
        .filter(|instr| {
            !matches!(
                instr,
                FuncInstr::Real(Instruction {
                    opcode: Opcode::MovSp,
                    operand: Operand::StackAdjust(0),
                    ..
                })
            )
        })
        .collect()
}

enum Fused {
    None,
    Int(i32),
    Float(f32),
}

fn fuse_const_neg(unit: Vec<FuncInstr>) -> Vec<FuncInstr> {
    let mut out: Vec<FuncInstr> = Vec::with_capacity(unit.len());
    for instr in unit {
        let fused = match (out.last(), &instr) {
            (
                Some(FuncInstr::Real(Instruction {
                    opcode: Opcode::Const,
                    type_tag: Some(TypeTag::Int),
                    operand: Operand::ConstInt(v),
                })),
                FuncInstr::Real(Instruction { opcode: Opcode::Neg, type_tag: Some(TypeTag::Int), .. }),
            ) => Fused::Int(*v),
            (
                Some(FuncInstr::Real(Instruction {
                    opcode: Opcode::Const,
                    type_tag: Some(TypeTag::Float),
                    operand: Operand::ConstFloat(v),
                })),
                FuncInstr::Real(Instruction { opcode: Opcode::Neg, type_tag: Some(TypeTag::Float), .. }),
            ) => Fused::Float(*v),
            _ => Fused::None,
        };
        match fused {
            Fused::Int(v) => {
                out.pop();
                out.push(FuncInstr::Real(Instruction {
                    opcode: Opcode::Const,
                    type_tag: Some(TypeTag::Int),
                    operand: Operand::ConstInt(-v),
                }));
            }
            Fused::Float(v) => {
                out.pop();
                out.push(FuncInstr::Real(Instruction {
                    opcode: Opcode::Const,
                    type_tag: Some(TypeTag::Float),
                    operand: Operand::ConstFloat(-v),
                }));
            }
            Fused::None => out.push(instr),
        }
    }
    out
}

/// `CPTOPSP off,4; CONST 1; ADD/SUB(II); CPDOWNSP off,4` is exactly the
/// shape `gen_compound_assign` emits for `i += 1` / `i -= 1` on a plain
/// SP-relative integer: read the current value, push the literal, fold,
/// write the result back to the slot it came from. `INCISP`/`DECISP`
/// does the same read-modify-write in one instruction.
fn fuse_increment(unit: Vec<FuncInstr>) -> Vec<FuncInstr> {
    let mut out: Vec<FuncInstr> = Vec::with_capacity(unit.len());
    let mut i = 0;
    while i < unit.len() {
        if i + 3 < unit.len() {
            if let (
                FuncInstr::Real(Instruction { opcode: Opcode::CpTopSp, operand: Operand::StackCopy(off1, 4), .. }),
                FuncInstr::Real(Instruction {
                    opcode: Opcode::Const,
                    type_tag: Some(TypeTag::Int),
                    operand: Operand::ConstInt(1),
                }),
                FuncInstr::Real(Instruction { opcode: op @ (Opcode::Add | Opcode::Sub), type_tag: Some(TypeTag::IntInt), .. }),
                FuncInstr::Real(Instruction { opcode: Opcode::CpDownSp, operand: Operand::StackCopy(off2, 4), .. }),
            ) = (&unit[i], &unit[i + 1], &unit[i + 2], &unit[i + 3])
            {
                if off1 == off2 {
                    let fused_op = if *op == Opcode::Add { Opcode::IncIsp } else { Opcode::DecIsp };
                    out.push(FuncInstr::Real(Instruction {
                        opcode: fused_op,
                        type_tag: None,
                        operand: Operand::StackAdjust(*off1),
                    }));
                    i += 4;
                    continue;
                }
            }
        }
        out.push(unit[i].clone());
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real(opcode: Opcode, type_tag: Option<TypeTag>, operand: Operand) -> FuncInstr {
        FuncInstr::Real(Instruction { opcode, type_tag, operand })
    }

    #[test]
    fn drops_instructions_after_unconditional_return_until_label() {
        let unit = vec![
            real(Opcode::Retn, None, Operand::None),
            real(Opcode::MovSp, None, Operand::StackAdjust(-4)),
            FuncInstr::Label(1),
            real(Opcode::Retn, None, Operand::None),
        ];
        let out = optimize(unit);
        assert_eq!(out.len(), 3);
        assert!(matches!(out[1], FuncInstr::Label(1)));
    }

    #[test]
    fn elides_zero_movsp() {
        let unit = vec![
            real(Opcode::MovSp, None, Operand::StackAdjust(0)),
            real(Opcode::Retn, None, Operand::None),
        ];
        let out = optimize(unit);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn fuses_const_neg() {
        let unit = vec![
            real(Opcode::Const, Some(TypeTag::Int), Operand::ConstInt(5)),
            real(Opcode::Neg, Some(TypeTag::Int), Operand::None),
            real(Opcode::Retn, None, Operand::None),
        ];
        let out = optimize(unit);
        assert!(matches!(
            &out[0],
            FuncInstr::Real(Instruction { opcode: Opcode::Const, operand: Operand::ConstInt(-5), .. })
        ));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn fuses_increment_by_one() {
        let unit = vec![
            real(Opcode::CpTopSp, None, Operand::StackCopy(-4, 4)),
            real(Opcode::Const, Some(TypeTag::Int), Operand::ConstInt(1)),
            real(Opcode::Add, Some(TypeTag::IntInt), Operand::None),
            real(Opcode::CpDownSp, None, Operand::StackCopy(-4, 4)),
            real(Opcode::Retn, None, Operand::None),
        ];
        let out = optimize(unit);
        assert_eq!(out.len(), 2);
        assert!(matches!(
            &out[0],
            FuncInstr::Real(Instruction { opcode: Opcode::IncIsp, operand: Operand::StackAdjust(-4), .. })
        ));
    }

    #[test]
    fn leaves_decrement_pattern_with_mismatched_offsets_alone() {
        let unit = vec![
            real(Opcode::CpTopSp, None, Operand::StackCopy(-4, 4)),
            real(Opcode::Const, Some(TypeTag::Int), Operand::ConstInt(1)),
            real(Opcode::Sub, Some(TypeTag::IntInt), Operand::None),
            real(Opcode::CpDownSp, None, Operand::StackCopy(-8, 4)),
            real(Opcode::Retn, None, Operand::None),
        ];
        let out = optimize(unit);
        assert_eq!(out.len(), 5);
    }
}
