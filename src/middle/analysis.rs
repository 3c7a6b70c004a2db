//! CFG analyses: predecessors, dominators, dominance frontier, natural
//! loops. Results are cached on the blocks themselves and rebuilt on demand
//! by the passes that need them; the loop forest is returned as a value.

use crate::middle::ir::{Block, FuncRef, Program};

/// Recompute every block's predecessor list.
pub fn build_pred(prog: &mut Program, f: FuncRef) {
    let blocks = prog.func(f).blocks.clone();
    for &u in &blocks {
        prog.block_mut(u).preds.clear();
    }
    for &u in &blocks {
        for v in prog.succs(u) {
            prog.block_mut(v).preds.push(u);
        }
    }
}

/// Mark as visited everything reachable from `from` without passing
/// through `skip`.
fn traverse(prog: &mut Program, from: Block, skip: Block) {
    let mut stack = vec![from];
    while let Some(u) = stack.pop() {
        if prog.block(u).vis || u == skip {
            continue;
        }
        prog.block_mut(u).vis = true;
        stack.extend(prog.succs(u));
    }
}

/// Dominator sets by reachability: `w` dominates `u` iff removing `w`
/// disconnects the entry from `u`. Also fills in immediate dominators,
/// dominator-tree children and depths.
pub fn build_dom(prog: &mut Program, f: FuncRef) {
    let blocks = prog.func(f).blocks.clone();
    let entry = prog.func(f).entry();

    for &u in &blocks {
        let b = prog.block_mut(u);
        b.dom.clear();
        b.dom_children.clear();
        b.idom = None;
    }

    for &w in &blocks {
        for &u in &blocks {
            prog.block_mut(u).vis = false;
        }
        traverse(prog, entry, w);
        for &u in &blocks {
            if !prog.block(u).vis {
                prog.block_mut(u).dom.insert(w);
                log::trace!("{}: {} doms {}", prog.func(f).name, w, u);
            }
        }
    }

    // The immediate dominator is the unique dominator with no dominator of
    // `u` strictly between the two.
    for &u in &blocks {
        let dom: Vec<Block> = prog.block(u).dom.iter().copied().collect();
        'cand: for &w in &dom {
            if w == u {
                continue;
            }
            for &v in &dom {
                if v != u && v != w && prog.block(v).dom.contains(&w) {
                    continue 'cand;
                }
            }
            prog.block_mut(u).idom = Some(w);
            break;
        }
        if let Some(w) = prog.block(u).idom {
            prog.block_mut(w).dom_children.push(u);
        }
    }

    // Depths, top-down over the dominator tree.
    let mut stack = vec![(entry, 0u32)];
    while let Some((u, d)) = stack.pop() {
        prog.block_mut(u).dom_depth = d;
        for v in prog.block(u).dom_children.clone() {
            stack.push((v, d + 1));
        }
    }
}

/// Dominance frontiers: for every join block `u`, walk each predecessor up
/// the dominator tree to `idom(u)`, adding `u` along the way. Entries may
/// repeat; consumers test membership with the block `vis` flags.
pub fn build_df(prog: &mut Program, f: FuncRef) {
    build_dom(prog, f);
    build_pred(prog, f);

    let blocks = prog.func(f).blocks.clone();
    for &u in &blocks {
        prog.block_mut(u).df.clear();
    }

    for &u in &blocks {
        if prog.block(u).preds.len() < 2 {
            continue;
        }
        let stop = prog.block(u).idom;
        for p in prog.block(u).preds.clone() {
            let mut walk = Some(p);
            while walk != stop {
                let w = walk.expect("predecessor walk escaped the dominator tree");
                prog.block_mut(w).df.push(u);
                log::trace!("{}: {} has {} in df", prog.func(f).name, w, u);
                walk = prog.block(w).idom;
            }
        }
    }
}

/// One natural loop.
#[derive(Debug)]
pub struct LoopData {
    pub header: Block,
    pub parent: Option<u32>,
    pub children: Vec<u32>,
    pub depth: u32,
    /// Blocks whose innermost loop is this one.
    pub blocks: Vec<Block>,
}

/// The loop forest of one function.
#[derive(Debug, Default)]
pub struct LoopForest {
    pub loops: Vec<LoopData>,
    pub roots: Vec<u32>,
}

impl LoopForest {
    pub fn root_of(&self, mut l: u32) -> u32 {
        while let Some(p) = self.loops[l as usize].parent {
            l = p;
        }
        l
    }
}

/// Detect natural loops from back-edges, bottom-up over the dominator tree
/// so inner loops are found before the loops enclosing them. Each block's
/// `loop_idx`/`depth` caches are refreshed; the forest is returned for the
/// passes that walk loops explicitly.
pub fn build_loop(prog: &mut Program, f: FuncRef) -> LoopForest {
    build_dom(prog, f);
    build_pred(prog, f);

    let blocks = prog.func(f).blocks.clone();
    for &u in &blocks {
        let b = prog.block_mut(u);
        b.loop_idx = None;
        b.depth = 0;
    }

    let mut forest = LoopForest::default();

    // Dominator-tree post-order.
    let entry = prog.func(f).entry();
    let mut order = Vec::new();
    let mut stack = vec![(entry, false)];
    while let Some((u, expanded)) = stack.pop() {
        if expanded {
            order.push(u);
            continue;
        }
        stack.push((u, true));
        for v in prog.block(u).dom_children.clone() {
            stack.push((v, false));
        }
    }

    for &header in &order {
        let mut latches: Vec<Block> = prog
            .block(header)
            .preds
            .iter()
            .copied()
            .filter(|&v| prog.block(v).dom.contains(&header))
            .collect();
        if latches.is_empty() {
            continue;
        }
        let lp = forest.loops.len() as u32;
        forest.loops.push(LoopData {
            header,
            parent: None,
            children: Vec::new(),
            depth: 0,
            blocks: Vec::new(),
        });
        while let Some(v) = latches.pop() {
            if let Some(ch) = prog.block(v).loop_idx {
                let root = forest.root_of(ch);
                if root != lp {
                    forest.loops[root as usize].parent = Some(lp);
                    let inner_header = forest.loops[root as usize].header;
                    for p in prog.block(inner_header).preds.clone() {
                        if prog.block(p).loop_idx != Some(root) {
                            latches.push(p);
                        }
                    }
                }
            } else {
                prog.block_mut(v).loop_idx = Some(lp);
                if v != header {
                    latches.extend(prog.block(v).preds.iter().copied());
                }
            }
        }
    }

    for l in 0..forest.loops.len() {
        match forest.loops[l].parent {
            Some(p) => forest.loops[p as usize].children.push(l as u32),
            None => forest.roots.push(l as u32),
        }
    }

    // Depths over the loop forest; blocks inherit their innermost loop's.
    let mut stack: Vec<(u32, u32)> = forest.roots.iter().map(|&r| (r, 1)).collect();
    while let Some((l, d)) = stack.pop() {
        forest.loops[l as usize].depth = d;
        log::trace!(
            "loop with header {} has depth {}",
            forest.loops[l as usize].header,
            d
        );
        for &c in &forest.loops[l as usize].children {
            stack.push((c, d + 1));
        }
    }
    for &u in &blocks {
        if let Some(l) = prog.block(u).loop_idx {
            forest.loops[l as usize].blocks.push(u);
            prog.block_mut(u).depth = forest.loops[l as usize].depth;
        }
    }

    forest
}

/// Reverse-postorder-ready postorder of the reachable blocks.
pub fn postorder(prog: &mut Program, f: FuncRef) -> Vec<Block> {
    let blocks = prog.func(f).blocks.clone();
    for &u in &blocks {
        prog.block_mut(u).vis = false;
    }
    let entry = prog.func(f).entry();
    let mut order = Vec::new();
    let mut stack = vec![(entry, 0usize)];
    prog.block_mut(entry).vis = true;
    while let Some(&(u, next)) = stack.last() {
        let succs = prog.succs(u);
        if next < succs.len() {
            stack.last_mut().unwrap().1 += 1;
            let v = succs[next];
            if !prog.block(v).vis {
                prog.block_mut(v).vis = true;
                stack.push((v, 0));
            }
        } else {
            order.push(u);
            stack.pop();
        }
    }
    order
}

/// All blocks executing at most once per function entry: the entry itself
/// and every block all of whose predecessors execute at most once and are
/// outside any cycle involving the block.
pub fn build_once_blocks(prog: &mut Program, f: FuncRef) {
    build_pred(prog, f);
    let blocks = prog.func(f).blocks.clone();
    for &u in &blocks {
        prog.block_mut(u).is_once = false;
    }
    let entry = prog.func(f).entry();
    if !prog.block(entry).preds.is_empty() {
        return;
    }
    prog.block_mut(entry).is_once = true;
    let mut wl = vec![entry];
    while !wl.is_empty() {
        let mut nl = Vec::new();
        for &u in &wl {
            for v in prog.succs(u) {
                if prog.block(v).is_once {
                    continue;
                }
                let ok = prog
                    .block(v)
                    .preds
                    .iter()
                    .all(|&p| prog.block(p).is_once);
                if ok {
                    prog.block_mut(v).is_once = true;
                    nl.push(v);
                }
            }
        }
        wl = nl;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use crate::front::ast::BinOp;
    use crate::middle::ir::{FuncKind, Program};

    /// entry → (a | b) → join → back to entry? No: diamond + loop:
    /// entry → cond; cond → body | exit; body → cond.
    fn loop_cfg() -> (Program, FuncRef) {
        let mut prog = Program::new(Vec::new(), Vec::new());
        let f = prog.add_func(FuncKind::User, id("f"), false, Vec::new());
        let entry = prog.new_block(f);
        let cond = prog.new_block(f);
        let body = prog.new_block(f);
        let exit = prog.new_block(f);

        let j = prog.new_jump(cond);
        prog.push_inst(entry, j);
        let zero = prog.const_of(0);
        let one = prog.const_of(1);
        let c = prog.new_binary(BinOp::Lt, zero, one);
        prog.push_inst(cond, c);
        let br = prog.new_branch(c, body, exit);
        prog.push_inst(cond, br);
        let j2 = prog.new_jump(cond);
        prog.push_inst(body, j2);
        let ret = prog.new_return(None);
        prog.push_inst(exit, ret);
        (prog, f)
    }

    #[test]
    fn dominators_on_a_loop() {
        let (mut prog, f) = loop_cfg();
        build_dom(&mut prog, f);
        let bs = prog.func(f).blocks.clone();
        let (entry, cond, body, exit) = (bs[0], bs[1], bs[2], bs[3]);

        assert_eq!(prog.block(entry).dom_depth, 0);
        assert_eq!(prog.block(cond).idom, Some(entry));
        assert_eq!(prog.block(body).idom, Some(cond));
        assert_eq!(prog.block(exit).idom, Some(cond));
        assert!(prog.block(exit).dom.contains(&cond));
        assert!(!prog.block(exit).dom.contains(&body));
    }

    #[test]
    fn natural_loop_found() {
        let (mut prog, f) = loop_cfg();
        let forest = build_loop(&mut prog, f);
        let bs = prog.func(f).blocks.clone();
        let (entry, cond, body, exit) = (bs[0], bs[1], bs[2], bs[3]);

        assert_eq!(forest.loops.len(), 1);
        assert_eq!(forest.loops[0].header, cond);
        assert_eq!(prog.block(cond).depth, 1);
        assert_eq!(prog.block(body).depth, 1);
        assert_eq!(prog.block(entry).depth, 0);
        assert_eq!(prog.block(exit).depth, 0);
    }

    #[test]
    fn df_of_loop_header() {
        let (mut prog, f) = loop_cfg();
        build_df(&mut prog, f);
        let bs = prog.func(f).blocks.clone();
        let (cond, body) = (bs[1], bs[2]);
        // cond has two preds (entry, body); body's walk to idom(cond)=entry
        // puts cond into df(body) and df(cond).
        assert!(prog.block(body).df.contains(&cond));
        assert!(prog.block(cond).df.contains(&cond));
    }
}
