//! Dead-code elimination: mark from the side-effecting seeds through the
//! operand chains, then sweep everything unmarked. The use lists guarantee
//! swept instructions have no surviving users.

use crate::middle::ir::{FuncRef, Program, Value};

fn mark(prog: &mut Program, seed: Value) {
    let mut stack = vec![seed];
    while let Some(i) = stack.pop() {
        if prog.inst(i).vis {
            continue;
        }
        prog.inst_mut(i).vis = true;
        for u in prog.owned_uses(i) {
            let v = prog.used(u);
            if prog.is_inst(v) && !prog.inst(v).vis {
                stack.push(v);
            }
        }
    }
}

pub fn dce(prog: &mut Program, f: FuncRef) {
    log::info!("dce {}", prog.func(f).name);
    let blocks = prog.func(f).blocks.clone();

    for &bb in &blocks {
        for i in prog.insts_of(bb) {
            prog.inst_mut(i).vis = false;
        }
    }
    for &bb in &blocks {
        for i in prog.insts_of(bb) {
            if prog.has_side_effects(i) {
                mark(prog, i);
            }
        }
    }
    for &bb in &blocks {
        for i in prog.insts_of(bb) {
            if !prog.inst(i).vis {
                prog.erase_dangling(i);
            }
        }
    }
}

/// The cleanup pair every pipeline runs: branch folding before and after a
/// code sweep. The trailing dbe re-establishes the CFG invariants in case
/// the sweep emptied a path.
pub fn cd(prog: &mut Program, f: FuncRef) {
    super::dbe(prog, f);
    dce(prog, f);
    super::dbe(prog, f);
}
