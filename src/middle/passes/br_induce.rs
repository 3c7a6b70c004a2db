//! Fuse a branch on a single-use relational binary into one
//! compare-and-branch instruction, so the lowerer can emit MIPS `beq`-family
//! branches without materializing the comparison in a register.
//!
//! This must be the last pass before machine lowering.

use crate::middle::ir::{FuncRef, InstKind, Program, RelOp};

pub fn br_induce(prog: &mut Program, f: FuncRef) {
    for bb in prog.func(f).blocks.clone() {
        let c = prog.control_inst(bb);
        let InstKind::Branch {
            cond,
            then_bb,
            else_bb,
        } = prog.inst(c).kind
        else {
            continue;
        };
        let cv = prog.used(cond);
        if !prog.is_inst(cv) || prog.sole_use(cv) != Some(cond) {
            continue;
        }
        let InstKind::Binary { op, lhs, rhs } = prog.inst(cv).kind else {
            continue;
        };
        let Some(rel) = RelOp::from_bin_op(op) else {
            continue;
        };

        log::info!("{}: fusing branch with its comparison", bb);
        let lv = prog.used(lhs);
        let rv = prog.used(rhs);
        let cj = prog.new_cond_jump(rel, lv, rv, then_bb, else_bb);
        prog.insert_before(c, cj);
        prog.erase_inst(c);
        // The comparison lost its only user with the branch.
        prog.erase_inst(cv);
    }
}
