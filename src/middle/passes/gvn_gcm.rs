//! Global value numbering and global code motion.
//!
//! Value numbering works over a memoized (value, number) table with
//! structural equality: binaries canonicalize their commuted forms, calls
//! participate when the callee is pure, and a phi whose incomings all
//! number alike collapses to that number. Code motion then schedules every
//! non-pinned instruction: first as deep in the dominator tree as its
//! operands allow, then as late as its users allow, choosing the shallowest
//! loop depth on the path between the two.

use crate::common::Set;
use crate::front::ast::BinOp;
use crate::middle::analysis::{build_loop, postorder};
use crate::middle::ir::{
    eval_bin, Block, FuncRef, InstKind, Program, Value, INT_MAX, INT_MIN,
};
use crate::middle::passes::dce;

/// Algebraic simplification of a binary with at least one constant operand.
fn reduced_bin(prog: &mut Program, i: Value) -> Option<Value> {
    let InstKind::Binary { op, lhs, rhs } = prog.inst(i).kind else {
        return None;
    };
    let lv = prog.used(lhs);
    let rv = prog.used(rhs);
    let lc = prog.as_const(lv);
    let rc = prog.as_const(rv);
    if let (Some(l), Some(r)) = (lc, rc) {
        return Some(prog.const_of(eval_bin(op, l, r)));
    }
    if lc.is_none() && rc.is_none() {
        return None;
    }
    match op {
        BinOp::Lt if prog.is_const(lv, INT_MAX) || prog.is_const(rv, INT_MIN) => {
            Some(prog.const_of(0))
        }
        BinOp::Gt if prog.is_const(lv, INT_MIN) || prog.is_const(rv, INT_MAX) => {
            Some(prog.const_of(0))
        }
        BinOp::Le if prog.is_const(lv, INT_MIN) || prog.is_const(rv, INT_MAX) => {
            Some(prog.const_of(1))
        }
        BinOp::Ge if prog.is_const(lv, INT_MAX) || prog.is_const(rv, INT_MIN) => {
            Some(prog.const_of(1))
        }
        BinOp::Add if lc == Some(0) => Some(rv),
        BinOp::Add if rc == Some(0) => Some(lv),
        BinOp::Sub if rc == Some(0) => Some(lv),
        BinOp::Mul if lc == Some(0) || rc == Some(0) => Some(prog.const_of(0)),
        BinOp::Mul if lc == Some(1) => Some(rv),
        BinOp::Mul if rc == Some(1) => Some(lv),
        BinOp::Div if rc == Some(1) => Some(lv),
        BinOp::Mod if rc == Some(1) => Some(prog.const_of(0)),
        _ => None,
    }
}

/// `a x b` and `b y a` compute the same thing.
fn is_mirror(a: BinOp, b: BinOp) -> bool {
    use BinOp::*;
    matches!((a, b), (Lt, Gt) | (Gt, Lt) | (Le, Ge) | (Ge, Le))
        || (a == b && matches!(a, Eq | Ne | Add | Mul))
}

#[derive(Default)]
struct Gvn {
    /// Memoized (value, number) pairs; the number is the representative
    /// value every structurally equal computation maps to.
    vn: Vec<(Value, Value)>,
}

impl Gvn {
    fn lookup(&self, v: Value) -> Option<Value> {
        self.vn.iter().find(|&&(k, _)| k == v).map(|&(_, n)| n)
    }

    fn get(&mut self, prog: &Program, v: Value) -> Value {
        if let Some(n) = self.lookup(v) {
            return n;
        }
        let n = if prog.is_inst(v) {
            match &prog.inst(v).kind {
                InstKind::Binary { .. } => self.find_binary(prog, v),
                InstKind::Call { func, .. } if prog.func(*func).is_pure => {
                    self.find_call(prog, v)
                }
                InstKind::Gep { .. } => self.find_gep(prog, v),
                _ => v,
            }
        } else {
            v
        };
        self.vn.push((v, n));
        n
    }

    fn find_binary(&mut self, prog: &Program, k: Value) -> Value {
        let InstKind::Binary { op, lhs, rhs } = prog.inst(k).kind else {
            unreachable!()
        };
        let lh = self.get(prog, prog.used(lhs));
        let rh = self.get(prog, prog.used(rhs));
        let mut idx = 0;
        while idx < self.vn.len() {
            let (cand, n) = self.vn[idx];
            idx += 1;
            if cand == k || !prog.is_inst(cand) {
                continue;
            }
            if let InstKind::Binary {
                op: o,
                lhs: cl,
                rhs: cr,
            } = prog.inst(cand).kind
            {
                let l = self.get(prog, prog.used(cl));
                let r = self.get(prog, prog.used(cr));
                if (lh == l && rh == r && op == o) || (lh == r && rh == l && is_mirror(op, o)) {
                    return n;
                }
            }
        }
        k
    }

    fn find_call(&mut self, prog: &Program, k: Value) -> Value {
        let InstKind::Call { func, ref args } = prog.inst(k).kind else {
            unreachable!()
        };
        let args: Vec<Value> = args.iter().map(|&u| prog.used(u)).collect();
        let nums: Vec<Value> = args.iter().map(|&a| self.get(prog, a)).collect();
        let mut idx = 0;
        while idx < self.vn.len() {
            let (cand, n) = self.vn[idx];
            idx += 1;
            if cand == k || !prog.is_inst(cand) {
                continue;
            }
            if let InstKind::Call {
                func: cf,
                args: ref cargs,
            } = prog.inst(cand).kind
            {
                if cf != func || cargs.len() != nums.len() {
                    continue;
                }
                let cargs: Vec<Value> = cargs.iter().map(|&u| prog.used(u)).collect();
                if cargs
                    .iter()
                    .zip(&nums)
                    .all(|(&ca, &na)| self.get(prog, ca) == na)
                {
                    return n;
                }
            }
        }
        k
    }

    fn find_gep(&mut self, prog: &Program, k: Value) -> Value {
        let InstKind::Gep {
            base, off, size, ..
        } = prog.inst(k).kind
        else {
            unreachable!()
        };
        let b = self.get(prog, prog.used(base));
        let o = self.get(prog, prog.used(off));
        let mut idx = 0;
        while idx < self.vn.len() {
            let (cand, n) = self.vn[idx];
            idx += 1;
            if cand == k || !prog.is_inst(cand) {
                continue;
            }
            if let InstKind::Gep {
                base: cb,
                off: co,
                size: cs,
                ..
            } = prog.inst(cand).kind
            {
                if cs == size
                    && self.get(prog, prog.used(cb)) == b
                    && self.get(prog, prog.used(co)) == o
                {
                    return n;
                }
            }
        }
        k
    }

    fn replace(&mut self, prog: &mut Program, i: Value, n: Value) {
        if i != n {
            prog.erase_with(i, n);
            if let Some(pos) = self.vn.iter().position(|&(k, _)| k == i) {
                self.vn.swap_remove(pos);
            }
        }
    }

    fn check(&mut self, prog: &mut Program, i: Value) {
        match prog.inst(i).kind {
            InstKind::Binary { .. } => {
                if let Some(v) = reduced_bin(prog, i) {
                    let n = self.get(prog, v);
                    self.replace(prog, i, n);
                } else {
                    let n = self.get(prog, i);
                    self.replace(prog, i, n);
                }
            }
            InstKind::Call { func, .. } => {
                if prog.func(func).is_pure {
                    let n = self.get(prog, i);
                    self.replace(prog, i, n);
                }
            }
            InstKind::Gep { .. } => {
                let n = self.get(prog, i);
                self.replace(prog, i, n);
            }
            InstKind::Phi { ref args } => {
                debug_assert!(!args.is_empty());
                let vals: Vec<Value> = args.iter().map(|&(u, _)| prog.used(u)).collect();
                let rt = self.get(prog, vals[0]);
                if vals[1..].iter().all(|&v| self.get(prog, v) == rt) {
                    self.replace(prog, i, rt);
                }
            }
            _ => {}
        }
    }

    fn run(&mut self, prog: &mut Program, f: FuncRef) {
        let po = postorder(prog, f);
        for &bb in po.iter().rev() {
            for i in prog.insts_of(bb) {
                self.check(prog, i);
            }
        }
    }
}

fn is_pinned(prog: &Program, i: Value) -> bool {
    match prog.inst(i).kind {
        InstKind::Call { func, .. } => !prog.func(func).is_pure,
        InstKind::Phi { .. } | InstKind::Load { .. } | InstKind::Alloca { .. } => true,
        _ => prog.has_side_effects(i),
    }
}

fn schedule_early(prog: &mut Program, i: Value, root: Block) {
    if prog.inst(i).vis {
        return;
    }
    prog.inst_mut(i).vis = true;
    let mut bb = root;
    for u in prog.owned_uses(i) {
        let x = prog.used(u);
        if prog.is_inst(x) {
            schedule_early(prog, x, root);
            let xbb = prog.inst(x).bb;
            if prog.block(xbb).dom_depth > prog.block(bb).dom_depth {
                bb = xbb;
            }
        }
    }
    if bb != prog.inst(i).bb {
        prog.unlink_inst(i);
        let last = prog.last_inst(bb).expect("blocks always hold a terminator");
        prog.insert_before(last, i);
    }
}

fn find_lca(prog: &Program, mut u: Block, mut v: Block) -> Block {
    while prog.block(u).dom_depth > prog.block(v).dom_depth {
        u = prog.block(u).idom.unwrap();
    }
    while prog.block(v).dom_depth > prog.block(u).dom_depth {
        v = prog.block(v).idom.unwrap();
    }
    while u != v {
        u = prog.block(u).idom.unwrap();
        v = prog.block(v).idom.unwrap();
    }
    u
}

fn schedule_late(prog: &mut Program, i: Value) {
    if prog.inst(i).vis {
        return;
    }
    prog.inst_mut(i).vis = true;

    let mut users: Set<Value> = Set::new();
    let mut lca: Option<Block> = None;
    for u in prog.uses_of(i) {
        let x = prog.use_data(u).user;
        users.insert(x);
        schedule_late(prog, x);
        let ubb = match &prog.inst(x).kind {
            InstKind::Phi { args } => {
                // Several incomings can carry the same value; match the
                // exact use slot to find the edge this use lives on.
                args.iter()
                    .find(|&&(uu, _)| uu == u)
                    .map(|&(_, bb)| bb)
                    .expect("phi use without a matching incoming entry")
            }
            _ => prog.inst(x).bb,
        };
        lca = Some(match lca {
            None => ubb,
            Some(l) => find_lca(prog, l, ubb),
        });
    }
    let lca = lca.expect("unused value survived dce");

    // Between the latest legal block and the earliest one, prefer the
    // shallowest loop nesting.
    let mut best = lca;
    let mut cur = lca;
    let early = prog.inst(i).bb;
    while cur != early {
        cur = prog
            .block(cur)
            .idom
            .expect("early block does not dominate the late one");
        if prog.block(cur).depth < prog.block(best).depth {
            best = cur;
        }
    }

    // Reinsert even when the block is unchanged so producers end up before
    // their consumers after the early pass shuffled them.
    prog.unlink_inst(i);
    let mut before = None;
    for j in prog.insts_of(best) {
        if !matches!(prog.inst(j).kind, InstKind::Phi { .. }) && users.contains(&j) {
            before = Some(j);
            break;
        }
    }
    let at = before.unwrap_or_else(|| prog.last_inst(best).unwrap());
    prog.insert_before(at, i);
}

pub fn gg(prog: &mut Program, f: FuncRef) {
    log::info!("{}: gvn+gcm", prog.func(f).name);

    build_loop(prog, f);
    Gvn::default().run(prog, f);
    dce(prog, f);

    let collect = |prog: &Program| -> Vec<Value> {
        prog.func(f)
            .blocks
            .iter()
            .flat_map(|&bb| prog.insts_of(bb))
            .collect()
    };

    let all = collect(prog);
    let mut wl = Vec::new();
    for &i in &all {
        let pinned = is_pinned(prog, i);
        prog.inst_mut(i).vis = pinned;
        if !pinned {
            wl.push(i);
        }
    }
    let entry = prog.func(f).entry();
    for &i in &wl {
        schedule_early(prog, i, entry);
    }

    for &i in &all {
        prog.inst_mut(i).vis = is_pinned(prog, i);
    }
    for &i in &wl {
        schedule_late(prog, i);
    }
}
