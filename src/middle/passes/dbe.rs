//! Dead-branch and dead-block elimination.
//!
//! Establishes the CFG invariants the other passes assume: exactly one
//! control instruction per block, as its last instruction, and every block
//! reachable from the entry.

use crate::common::Set;
use crate::front::ast::BinOp;
use crate::middle::ir::{eval_bin, Block, FuncRef, InstKind, Program, Value, INT_MAX, INT_MIN};

/// Constant-fold a binary whose result is decided by its operands alone:
/// both sides constant, or a comparison against the end of the int range.
fn simplify_bin(prog: &mut Program, i: Value) -> Option<Value> {
    let InstKind::Binary { op, lhs, rhs } = prog.inst(i).kind else {
        return None;
    };
    let lv = prog.used(lhs);
    let rv = prog.used(rhs);
    if let (Some(l), Some(r)) = (prog.as_const(lv), prog.as_const(rv)) {
        return Some(prog.const_of(eval_bin(op, l, r)));
    }
    let decided = match op {
        BinOp::Lt => (prog.is_const(lv, INT_MAX) || prog.is_const(rv, INT_MIN)).then_some(0),
        BinOp::Gt => (prog.is_const(lv, INT_MIN) || prog.is_const(rv, INT_MAX)).then_some(0),
        BinOp::Le => (prog.is_const(lv, INT_MIN) || prog.is_const(rv, INT_MAX)).then_some(1),
        BinOp::Ge => (prog.is_const(lv, INT_MAX) || prog.is_const(rv, INT_MIN)).then_some(1),
        _ => None,
    };
    decided.map(|c| prog.const_of(c))
}

pub fn dbe(prog: &mut Program, f: FuncRef) {
    let blocks = prog.func(f).blocks.clone();

    // Delete everything past the first control instruction.
    for &bb in &blocks {
        let mut ended = false;
        for i in prog.insts_of(bb) {
            if ended {
                prog.erase_dangling(i);
            } else if prog.is_control(i) {
                ended = true;
            }
        }
    }

    for &bb in &blocks {
        for i in prog.insts_of(bb) {
            if let Some(v) = simplify_bin(prog, i) {
                prog.erase_with(i, v);
            }
        }
    }

    // Fold branches whose condition is a constant.
    for &bb in &blocks {
        let c = prog.control_inst(bb);
        if let InstKind::Branch {
            cond,
            then_bb,
            else_bb,
        } = prog.inst(c).kind
        {
            if let Some(cv) = prog.as_const(prog.used(cond)) {
                log::info!("folding branch with constant condition {}", cv);
                let to = if cv != 0 { then_bb } else { else_bb };
                let j = prog.new_jump(to);
                prog.insert_before(c, j);
                prog.erase_inst(c);
            }
        }
    }

    // Erase unreachable blocks, fixing up the phis of surviving successors.
    for &u in &blocks {
        prog.block_mut(u).vis = false;
    }
    let entry = prog.func(f).entry();
    let mut stack = vec![entry];
    while let Some(u) = stack.pop() {
        if prog.block(u).vis {
            continue;
        }
        prog.block_mut(u).vis = true;
        stack.extend(prog.succs(u));
    }

    let mut deleted: Set<Block> = Set::new();
    for &u in &blocks {
        if prog.block(u).vis {
            continue;
        }
        log::info!("unreachable {}", u);
        for v in prog.succs(u) {
            if deleted.contains(&v) {
                continue;
            }
            // The dead block can still appear in a live successor's phis.
            for i in prog.insts_of(v) {
                if matches!(prog.inst(i).kind, InstKind::Phi { .. }) {
                    prog.phi_remove_incoming(i, u);
                } else {
                    break;
                }
            }
        }
        for i in prog.insts_of(u) {
            prog.erase_dangling(i);
        }
        deleted.insert(u);
    }
    prog.func_mut(f).blocks.retain(|b| !deleted.contains(b));

    log::info!("{}: dbe done", prog.func(f).name);
}
