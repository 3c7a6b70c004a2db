//! Re-establish block shape after lowering: every block becomes
//! `[other..] [branches..] [jump/return]`, with code that followed a branch
//! split into a fall-through block and code after a jump or return dropped.
//! Successor lists are rebuilt afterwards, including fall-through edges.

use crate::back::mir::{Func, MInstData};

pub fn bb_normalize(f: &mut Func) {
    // Walk the live layout so blocks split off below are themselves
    // normalized when their turn comes.
    let mut idx = 0;
    while idx < f.blocks.len() {
        let bb = f.blocks[idx];
        idx += 1;
        let mut branched = false;
        for i in f.insts_of(bb) {
            match f.inst(i) {
                MInstData::Branch { .. } | MInstData::BranchZero { .. } => branched = true,
                MInstData::Jump { .. } | MInstData::Return => {
                    // Nothing after an unconditional transfer runs.
                    let mut j = f.next_inst(i);
                    while let Some(x) = j {
                        j = f.next_inst(x);
                        f.remove(x);
                    }
                    break;
                }
                _ if branched => {
                    // The phi copies landed after a conditional branch;
                    // they belong to the fall-through path.
                    let nbb = f.new_block_after(bb);
                    f.block_mut(nbb).loop_depth = f.block(bb).loop_depth;
                    let mut j = Some(i);
                    while let Some(x) = j {
                        j = f.next_inst(x);
                        f.unlink(x);
                        f.relink_push(nbb, x);
                    }
                    break;
                }
                _ => {}
            }
        }
    }

    let blocks = f.blocks.clone();
    for &bb in &blocks {
        f.block_mut(bb).succ.clear();
        let mut fall = true;
        for i in f.insts_of(bb) {
            match *f.inst(i) {
                MInstData::Return => {
                    debug_assert!(f.next_inst(i).is_none());
                    fall = false;
                    break;
                }
                MInstData::Branch { to, .. } | MInstData::BranchZero { to, .. } => {
                    f.block_mut(bb).succ.push(to);
                }
                MInstData::Jump { to } => {
                    debug_assert!(f.next_inst(i).is_none());
                    f.block_mut(bb).succ.push(to);
                    fall = false;
                    break;
                }
                _ => {}
            }
        }
        if fall {
            let next = f
                .next_block(bb)
                .expect("fall-through off the end of the function");
            f.block_mut(bb).succ.push(next);
        }
    }
}
