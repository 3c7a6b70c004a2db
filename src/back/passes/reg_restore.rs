//! Prologue/epilogue synthesis: decide which callee-saved registers the
//! function actually writes (plus `$ra` when it makes calls), lay out the
//! frame, and patch the stack-argument load offsets recorded by the
//! lowerer.
//!
//! Frame layout, from `$sp` upward: outgoing call arguments, alloca
//! storage, spill slots, saved registers.

use crate::back::mir::{regs, Func, MInstData, Operand};
use crate::common::Set;

pub fn reg_restore(f: &mut Func) {
    let mut saved: Set<i32> = Set::new();
    if !f.is_main {
        let mut is_leaf = true;
        for bb in f.blocks.clone() {
            for i in f.insts_of(bb) {
                if matches!(f.inst(i), MInstData::Call { .. }) {
                    is_leaf = false;
                }
                for d in f.defs(i) {
                    if d.is_machine() && regs::is_callee_saved(d.val) {
                        saved.insert(d.val);
                    }
                }
            }
        }
        if !is_leaf {
            saved.insert(regs::RA);
        }
    }

    let stack_size =
        ((f.max_call_arg_num + f.alloca_num + f.spill_num + saved.len() as u32) * 4) as i32;
    log::info!(
        "{} has stack size {} ({} args, {} allocas, {} spills, {} saved)",
        f.name,
        stack_size,
        f.max_call_arg_num,
        f.alloca_num,
        f.spill_num,
        saved.len()
    );

    // Stack arguments sit above this frame; the lowerer left their
    // positions in the offset field.
    for l in f.arg_loads.clone() {
        if f.is_removed(l) {
            continue;
        }
        if let MInstData::Load { off, .. } = f.inst_mut(l) {
            *off = stack_size + (*off - 4) * 4;
        }
    }

    if stack_size == 0 {
        return;
    }

    let sp = Operand::machine(regs::SP);
    let entry = f.blocks[0];
    let mut at = f.push_front(
        entry,
        MInstData::Binary {
            op: crate::back::mir::BinOp::Add,
            dst: sp,
            lhs: sp,
            rhs: Operand::imm(-stack_size),
        },
    );
    let base = ((f.max_call_arg_num + f.alloca_num + f.spill_num) * 4) as i32;
    let mut p = base;
    for &r in &saved {
        at = f.insert_after(
            at,
            MInstData::Store {
                src: Operand::machine(r),
                base: sp,
                off: p,
            },
        );
        p += 4;
    }

    for bb in f.blocks.clone() {
        for i in f.insts_of(bb) {
            if !matches!(f.inst(i), MInstData::Return) {
                continue;
            }
            let mut p = base;
            for &r in &saved {
                f.insert_before(
                    i,
                    MInstData::Load {
                        dst: Operand::machine(r),
                        base: sp,
                        off: p,
                    },
                );
                p += 4;
            }
            if !f.is_main {
                f.insert_before(
                    i,
                    MInstData::Binary {
                        op: crate::back::mir::BinOp::Add,
                        dst: sp,
                        lhs: sp,
                        rhs: Operand::imm(stack_size),
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::mir::BinOp;
    use crate::common::id;

    #[test]
    fn frame_and_prologue_shape() {
        let mut f = Func::new(id("g"), false, true);
        let b = f.new_block();
        // Writes $s0 and calls something, so $s0 and $ra must be saved.
        f.push(
            b,
            MInstData::Move {
                dst: Operand::machine(regs::S0),
                src: Operand::machine(regs::A0),
            },
        );
        f.push(
            b,
            MInstData::Call {
                name: id("h"),
                arg_regs: 0,
            },
        );
        f.push(
            b,
            MInstData::Move {
                dst: Operand::machine(regs::V0),
                src: Operand::machine(regs::S0),
            },
        );
        f.push(b, MInstData::Return);

        reg_restore(&mut f);

        // Frame: two saved words, multiple of 4, adjusted first.
        let insts = f.insts_of(b);
        match *f.inst(insts[0]) {
            MInstData::Binary { op: BinOp::Add, dst, rhs, .. } => {
                assert!(dst.equiv(Operand::machine(regs::SP)));
                assert_eq!(rhs.val, -8);
            }
            _ => panic!("prologue must adjust $sp first"),
        }
        // Saves for $s0 and $ra follow.
        assert!(matches!(*f.inst(insts[1]), MInstData::Store { .. }));
        assert!(matches!(*f.inst(insts[2]), MInstData::Store { .. }));
        // Before the return: two restores and the $sp adjustment.
        let n = insts.len();
        assert!(matches!(*f.inst(insts[n - 2]), MInstData::Binary { .. }));
        assert!(matches!(*f.inst(insts[n - 3]), MInstData::Load { .. }));
        assert!(matches!(*f.inst(insts[n - 4]), MInstData::Load { .. }));
    }
}
