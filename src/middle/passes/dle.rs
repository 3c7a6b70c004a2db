//! Dead-loop elimination.
//!
//! A natural loop can go away when it has a unique pre-header and a unique
//! exit, computes nothing visible outside itself, and cannot return: the
//! pre-header's edge is retargeted at the exit and the body is dropped.
//! Applied to innermost loops, to a fixed point.

use crate::common::Set;
use crate::middle::analysis::{build_loop, LoopForest};
use crate::middle::ir::{Block, FuncRef, InstKind, Program};

fn try_elim(prog: &mut Program, forest: &LoopForest, l: u32) -> bool {
    let data = &forest.loops[l as usize];
    let header = data.header;
    let loop_bbs: Set<Block> = data.blocks.iter().copied().collect();

    let mut pre_header = None;
    for &bb in &prog.block(header).preds {
        if !loop_bbs.contains(&bb) {
            if pre_header.is_some() {
                return false;
            }
            pre_header = Some(bb);
        }
    }
    let Some(pre_header) = pre_header else {
        return false;
    };

    let mut exit = None;
    for &bb in &loop_bbs {
        for v in prog.succs(bb) {
            if !loop_bbs.contains(&v) {
                match exit {
                    None => exit = Some(v),
                    Some(e) if e != v => return false,
                    _ => {}
                }
            }
        }
    }
    let Some(exit) = exit else {
        return false;
    };

    // Exit phis must agree on what the loop hands them.
    for i in prog.insts_of(exit) {
        let InstKind::Phi { ref args } = prog.inst(i).kind else {
            break;
        };
        let mut v = None;
        for &(u, bb) in args {
            if loop_bbs.contains(&bb) {
                let val = prog.used(u);
                match v {
                    None => v = Some(val),
                    Some(p) if p != val => return false,
                    _ => {}
                }
            }
        }
        debug_assert!(v.is_some(), "exit phi with no in-loop incoming");
    }

    // Nothing in the body may escape: no returns, no side effects, no
    // value used outside the loop.
    for &bb in &loop_bbs {
        for i in prog.insts_of(bb) {
            if matches!(prog.inst(i).kind, InstKind::Return { .. }) {
                return false;
            }
            if !prog.is_control(i) && prog.has_side_effects(i) {
                return false;
            }
            for u in prog.uses_of(i) {
                let user_bb = prog.inst(prog.use_data(u).user).bb;
                if !loop_bbs.contains(&user_bb) {
                    return false;
                }
            }
        }
    }

    log::info!("dropping loop with header {}", header);

    for i in prog.insts_of(exit) {
        if !matches!(prog.inst(i).kind, InstKind::Phi { .. }) {
            break;
        }
        let mut carried = None;
        loop {
            let in_loop = match &prog.inst(i).kind {
                InstKind::Phi { args } => args
                    .iter()
                    .find(|&&(_, bb)| loop_bbs.contains(&bb))
                    .map(|&(_, bb)| bb),
                _ => unreachable!(),
            };
            match in_loop {
                Some(bb) => carried = prog.phi_remove_incoming(i, bb),
                None => break,
            }
        }
        let carried = carried.expect("checked above");
        prog.phi_push(i, carried, pre_header);
    }

    prog.replace_succ(pre_header, header, exit);

    let f = prog.block(header).func;
    for &bb in &loop_bbs {
        for i in prog.insts_of(bb) {
            prog.erase_dangling(i);
        }
    }
    prog.func_mut(f).blocks.retain(|b| !loop_bbs.contains(b));
    true
}

fn visit_leaves(prog: &mut Program, forest: &LoopForest, l: u32, changed: &mut bool) {
    let children = forest.loops[l as usize].children.clone();
    if children.is_empty() {
        *changed |= try_elim(prog, forest, l);
    } else {
        for c in children {
            visit_leaves(prog, forest, c, changed);
        }
    }
}

pub fn dle(prog: &mut Program, f: FuncRef) {
    loop {
        let forest = build_loop(prog, f);
        let mut changed = false;
        for &r in &forest.roots {
            visit_leaves(prog, &forest, r, &mut changed);
        }
        if !changed {
            break;
        }
    }
}
