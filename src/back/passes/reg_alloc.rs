//! Graph-coloring register allocation: iterated Chaitin–Briggs with
//! conservative move coalescing, in the shape of Appel's worklist
//! formulation. Physical registers enter the graph precolored with
//! effectively infinite degree, so they are never simplified or spilled.
//! When coloring fails, the chosen virtual is rewritten through a stack
//! slot in windows of at most ~30 instructions to bound the introduced
//! live ranges, and the whole allocation restarts.

use crate::back::mir::{regs, Func, MInst, MInstData, Operand, K};
use crate::back::passes::liveness::{build_liveness, def_use_uncolored, is_ignored};
use crate::common::{Map, Set};

const INF: u32 = u32::MAX / 2;

#[derive(Debug)]
struct Node {
    reg: Operand,
    degree: u32,
    color: usize,
    colored: bool,
    alias: Option<usize>,
    coalesced: bool,
    on_stack: bool,
    adj: Set<usize>,
    moves: Set<MInst>,
    /// Deepest loop nesting this register appears in; spill choice avoids
    /// the busy ones.
    depth: u32,
}

struct Allocator<'a> {
    f: &'a mut Func,
    index: Map<Operand, usize>,
    nodes: Vec<Node>,
    select_stack: Vec<usize>,
    wl_moves: Set<MInst>,
    active_moves: Set<MInst>,
    spilled: Set<usize>,
    coalesced_list: Vec<usize>,
    spill_wl: Set<usize>,
    freeze_wl: Set<usize>,
    simplify_wl: Set<usize>,
}

impl<'a> Allocator<'a> {
    fn new(f: &'a mut Func) -> Self {
        Allocator {
            f,
            index: Map::new(),
            nodes: Vec::new(),
            select_stack: Vec::new(),
            wl_moves: Set::new(),
            active_moves: Set::new(),
            spilled: Set::new(),
            coalesced_list: Vec::new(),
            spill_wl: Set::new(),
            freeze_wl: Set::new(),
            simplify_wl: Set::new(),
        }
    }

    fn clear(&mut self) {
        self.index.clear();
        self.nodes.clear();
        self.select_stack.clear();
        self.wl_moves.clear();
        self.active_moves.clear();
        self.spilled.clear();
        self.coalesced_list.clear();
        self.spill_wl.clear();
        self.freeze_wl.clear();
        self.simplify_wl.clear();
    }

    fn node(&mut self, r: Operand) -> usize {
        if let Some(&u) = self.index.get(&r) {
            return u;
        }
        let u = self.nodes.len();
        self.nodes.push(Node {
            reg: r,
            degree: if r.is_machine() { INF } else { 0 },
            color: K,
            colored: false,
            alias: None,
            coalesced: false,
            on_stack: false,
            adj: Set::new(),
            moves: Set::new(),
            depth: 0,
        });
        self.index.insert(r, u);
        u
    }

    fn is_precolored(&self, u: usize) -> bool {
        self.nodes[u].reg.is_machine()
    }

    fn add_edge(&mut self, u: usize, v: usize) {
        if u == v || self.nodes[u].adj.contains(&v) {
            return;
        }
        if !self.is_precolored(u) {
            self.nodes[u].adj.insert(v);
            self.nodes[u].degree += 1;
        }
        if !self.is_precolored(v) {
            self.nodes[v].adj.insert(u);
            self.nodes[v].degree += 1;
        }
    }

    /// Neighbors still in play: not selected, not coalesced away.
    fn adjacent(&self, u: usize) -> Vec<usize> {
        self.nodes[u]
            .adj
            .iter()
            .copied()
            .filter(|&x| !self.nodes[x].on_stack && !self.nodes[x].coalesced)
            .collect()
    }

    fn node_moves(&self, u: usize) -> Vec<MInst> {
        self.nodes[u]
            .moves
            .iter()
            .copied()
            .filter(|m| self.active_moves.contains(m) || self.wl_moves.contains(m))
            .collect()
    }

    fn move_related(&self, u: usize) -> bool {
        self.nodes[u]
            .moves
            .iter()
            .any(|m| self.active_moves.contains(m) || self.wl_moves.contains(m))
    }

    fn build(&mut self) {
        for bb in self.f.blocks.clone() {
            let depth = self.f.block(bb).loop_depth;
            let mut live = self.f.block(bb).live_out.clone();
            for i in self.f.insts_of(bb).into_iter().rev() {
                let (def, use_) = def_use_uncolored(self.f, i);

                // Dead pure definitions surface between rounds; drop them
                // here rather than paying edges for them.
                if def.len() == 1
                    && def[0].is_virtual()
                    && !live.contains(&def[0])
                    && self.f.inst(i).is_pure()
                {
                    self.f.remove(i);
                    continue;
                }

                for &x in def.iter().chain(use_.iter()) {
                    let u = self.node(x);
                    self.nodes[u].depth = self.nodes[u].depth.max(depth);
                }

                if let MInstData::Move { dst, src } = *self.f.inst(i) {
                    if !is_ignored(src) && !is_ignored(dst) {
                        live.remove(&src);
                        let du = self.node(dst);
                        self.nodes[du].moves.insert(i);
                        let su = self.node(src);
                        self.nodes[su].moves.insert(i);
                        self.wl_moves.insert(i);
                    }
                }

                for &d in &def {
                    live.insert(d);
                }
                let live_now: Vec<Operand> = live.iter().copied().collect();
                for &d in &def {
                    let dn = self.node(d);
                    for &l in &live_now {
                        let ln = self.node(l);
                        self.add_edge(ln, dn);
                    }
                }
                for &d in &def {
                    live.remove(&d);
                }
                for &u in &use_ {
                    live.insert(u);
                }
            }
        }
    }

    fn make_wl(&mut self) {
        for id in 0..self.f.vreg_cnt {
            let Some(&u) = self.index.get(&Operand::vreg(id)) else {
                continue;
            };
            if self.nodes[u].degree >= K as u32 {
                self.spill_wl.insert(u);
            } else if self.move_related(u) {
                self.freeze_wl.insert(u);
            } else {
                self.simplify_wl.insert(u);
            }
        }
    }

    fn simplify(&mut self) {
        let u = *self.simplify_wl.iter().next().unwrap();
        self.simplify_wl.remove(&u);
        log::trace!("simplifying {} with degree {}", self.nodes[u].reg, self.nodes[u].degree);
        self.select_stack.push(u);
        self.nodes[u].on_stack = true;
        for v in self.adjacent(u) {
            self.dec_degree(v);
        }
    }

    fn dec_degree(&mut self, u: usize) {
        let d = self.nodes[u].degree;
        self.nodes[u].degree = d.saturating_sub(1);
        if d == K as u32 {
            self.enable_moves(u);
            for v in self.adjacent(u) {
                self.enable_moves(v);
            }
            self.spill_wl.remove(&u);
            if self.move_related(u) {
                self.freeze_wl.insert(u);
            } else {
                self.simplify_wl.insert(u);
            }
        }
    }

    fn enable_moves(&mut self, u: usize) {
        for m in self.node_moves(u) {
            if self.active_moves.remove(&m) {
                self.wl_moves.insert(m);
            }
        }
    }

    fn move_ends(&self, m: MInst) -> (Operand, Operand) {
        match *self.f.inst(m) {
            MInstData::Move { dst, src } => (dst, src),
            _ => unreachable!("move worklist holds a non-move"),
        }
    }

    fn get_alias(&self, mut u: usize) -> usize {
        while self.nodes[u].coalesced {
            u = self.nodes[u].alias.expect("coalesced node without alias");
        }
        u
    }

    fn add_wl(&mut self, u: usize) {
        if !self.is_precolored(u) && self.nodes[u].degree < K as u32 && !self.move_related(u) {
            self.freeze_wl.remove(&u);
            self.simplify_wl.insert(u);
        }
    }

    /// George: `t` tolerates `u` taking over its neighbor.
    fn ok(&self, t: usize, r: usize) -> bool {
        self.nodes[t].degree < K as u32
            || self.is_precolored(t)
            || self.nodes[t].adj.contains(&r)
            || self.nodes[r].adj.contains(&t)
    }

    /// Briggs: the combined node keeps fewer than K significant neighbors.
    fn conservative(&self, s: &Set<usize>) -> bool {
        s.iter()
            .filter(|&&u| self.nodes[u].degree >= K as u32)
            .count()
            < K
    }

    fn coalesce(&mut self) {
        let m = *self.wl_moves.iter().next().unwrap();
        self.wl_moves.remove(&m);
        let (dst, src) = self.move_ends(m);
        let mut u = self.get_alias(self.index[&dst]);
        let mut v = self.get_alias(self.index[&src]);
        if src.is_machine() {
            std::mem::swap(&mut u, &mut v);
        }

        if u == v {
            self.add_wl(u);
            return;
        }
        if self.is_precolored(v)
            || self.nodes[u].adj.contains(&v)
            || self.nodes[v].adj.contains(&u)
        {
            // Constrained: the endpoints interfere.
            self.add_wl(u);
            self.add_wl(v);
            return;
        }

        let u_pre = self.is_precolored(u);
        let adj_v = self.adjacent(v);
        let fits = if u_pre {
            adj_v.iter().all(|&t| self.ok(t, u))
        } else {
            let mut s: Set<usize> = adj_v.into_iter().collect();
            s.extend(self.adjacent(u));
            self.conservative(&s)
        };
        if fits {
            self.combine(u, v);
            self.add_wl(u);
        } else {
            self.active_moves.insert(m);
        }
    }

    fn combine(&mut self, u: usize, v: usize) {
        log::trace!("combining {} with {}", self.nodes[u].reg, self.nodes[v].reg);
        if !self.freeze_wl.remove(&v) {
            self.spill_wl.remove(&v);
        }
        self.nodes[v].coalesced = true;
        self.nodes[v].alias = Some(u);
        self.coalesced_list.push(v);
        let vmoves = self.nodes[v].moves.clone();
        self.nodes[u].moves.extend(vmoves);
        for t in self.adjacent(v) {
            self.add_edge(t, u);
            self.dec_degree(t);
        }
        if self.nodes[u].degree >= K as u32 && self.freeze_wl.remove(&u) {
            self.spill_wl.insert(u);
        }
    }

    fn freeze(&mut self) {
        let u = *self.freeze_wl.iter().next().unwrap();
        self.freeze_wl.remove(&u);
        log::trace!("freezing {}", self.nodes[u].reg);
        self.simplify_wl.insert(u);
        self.freeze_moves(u);
    }

    fn freeze_moves(&mut self, u: usize) {
        let ureg = self.nodes[u].reg;
        for m in self.node_moves(u) {
            if !self.active_moves.remove(&m) {
                self.wl_moves.remove(&m);
            }
            let (dst, src) = self.move_ends(m);
            let other = if src == ureg { dst } else { src };
            if let Some(&v) = self.index.get(&other) {
                if !self.move_related(v) && self.nodes[v].degree < K as u32 {
                    self.freeze_wl.remove(&v);
                    self.simplify_wl.insert(v);
                }
            }
        }
    }

    fn select_spill(&mut self) {
        // Prefer evicting high-degree registers that stay out of loops.
        let u = *self
            .spill_wl
            .iter()
            .max_by(|&&a, &&b| {
                let score =
                    |u: usize| self.nodes[u].degree as f64 / f64::powi(2.0, self.nodes[u].depth as i32);
                score(a)
                    .partial_cmp(&score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap();
        log::trace!("selecting spill candidate {}", self.nodes[u].reg);
        debug_assert!(self.nodes[u].reg.is_virtual());
        self.spill_wl.remove(&u);
        self.simplify_wl.insert(u);
        self.freeze_moves(u);
    }

    fn get_color(&self, u: usize) -> usize {
        if self.is_precolored(u) {
            return regs::alloc_index(self.nodes[u].reg.val)
                .expect("precolored register outside the allocatable set");
        }
        if self.nodes[u].colored {
            return self.nodes[u].color;
        }
        K
    }

    fn assign_colors(&mut self) {
        while let Some(u) = self.select_stack.pop() {
            let mut ok = [true; K];
            for &v in &self.nodes[u].adj.clone() {
                let c = self.get_color(self.get_alias(v));
                if c < K {
                    ok[c] = false;
                }
            }
            match ok.iter().position(|&b| b) {
                Some(c) => {
                    self.nodes[u].colored = true;
                    self.nodes[u].color = c;
                    log::trace!(
                        "coloring {} with ${}",
                        self.nodes[u].reg,
                        regs::name(regs::ALLOCATABLE[c])
                    );
                }
                None => {
                    log::info!("spilling {}", self.nodes[u].reg);
                    self.spilled.insert(u);
                }
            }
        }

        for k in 0..self.coalesced_list.len() {
            let v = self.coalesced_list[k];
            let a = self.get_alias(v);
            let c = self.get_color(a);
            if c >= K {
                debug_assert!(self.spilled.contains(&a));
                continue;
            }
            self.nodes[v].color = c;
            self.nodes[v].colored = true;
        }

        let mut map: Map<Operand, Operand> = Map::new();
        for (&r, &u) in &self.index {
            if r.is_virtual() && self.nodes[u].colored {
                map.insert(r, Operand::machine(regs::ALLOCATABLE[self.nodes[u].color]));
            }
        }
        for bb in self.f.blocks.clone() {
            for i in self.f.insts_of(bb) {
                for x in self.f.regs_mut(i) {
                    if let Some(&m) = map.get(x) {
                        *x = m;
                    }
                }
            }
        }
    }

    /// Rewrite one spilled virtual through a dedicated stack slot. Long
    /// blocks are chopped into windows so the replacement ranges stay
    /// short.
    fn spill(&mut self, r: Operand) {
        log::info!("rewriting spilled register {}", r);
        let off =
            ((self.f.max_call_arg_num + self.f.alloca_num + self.f.spill_num) * 4) as i32;
        let sp = Operand::machine(regs::SP);
        for bb in self.f.blocks.clone() {
            let mut first_use: Option<MInst> = None;
            let mut last_def: Option<MInst> = None;
            let mut spiller = Operand::void();
            let mut cnt = 0u32;

            macro_rules! flush {
                () => {
                    if let Some(at) = first_use.take() {
                        debug_assert!(spiller.is_virtual());
                        self.f.insert_before(
                            at,
                            MInstData::Load {
                                dst: spiller,
                                base: sp,
                                off,
                            },
                        );
                    }
                    if let Some(at) = last_def.take() {
                        debug_assert!(spiller.is_virtual());
                        self.f.insert_after(
                            at,
                            MInstData::Store {
                                src: spiller,
                                base: sp,
                                off,
                            },
                        );
                    }
                    spiller = Operand::void();
                };
            }

            for i in self.f.insts_of(bb) {
                let (defs, uses) = self.f.def_use(i);
                let writes = defs.contains(&r);
                let reads = uses.contains(&r);
                if writes || reads {
                    if spiller.is_void() {
                        spiller = self.f.make_vreg();
                    }
                    let (d, us) = self.f.def_use_mut(i);
                    if let Some(d) = d {
                        if *d == r {
                            *d = spiller;
                        }
                    }
                    for u in us {
                        if *u == r {
                            *u = spiller;
                        }
                    }
                    if writes {
                        if reads && first_use.is_none() && last_def.is_none() {
                            first_use = Some(i);
                        }
                        last_def = Some(i);
                    } else if first_use.is_none() && last_def.is_none() {
                        first_use = Some(i);
                    }
                }
                cnt += 1;
                if cnt > 30 {
                    flush!();
                    cnt = 0;
                }
            }
            flush!();
        }
        self.f.spill_num += 1;
    }

    fn run(&mut self) {
        loop {
            log::debug!("{}: register allocation round", self.f.name);
            build_liveness(self.f);
            self.clear();
            for r in regs::ALLOCATABLE {
                self.node(Operand::machine(r));
            }
            self.build();
            self.make_wl();
            loop {
                if !self.simplify_wl.is_empty() {
                    self.simplify();
                } else if !self.wl_moves.is_empty() {
                    self.coalesce();
                } else if !self.freeze_wl.is_empty() {
                    self.freeze();
                } else if !self.spill_wl.is_empty() {
                    self.select_spill();
                } else {
                    break;
                }
            }
            self.assign_colors();
            if self.spilled.is_empty() {
                break;
            }
            let spilled: Vec<Operand> = self.spilled.iter().map(|&u| self.nodes[u].reg).collect();
            for r in spilled {
                self.spill(r);
            }
        }
    }
}

pub fn reg_alloc(f: &mut Func) {
    Allocator::new(f).run();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::mir::BinOp;
    use crate::common::id;

    /// Every register operand must be physical once allocation finishes.
    #[test]
    fn all_operands_get_machine_registers() {
        let mut f = Func::new(id("f"), false, true);
        let b = f.new_block();
        let mut prev = Operand::machine(regs::A0);
        // A chain long enough to exercise simplify ordering but colorable
        // without spills.
        for _ in 0..10 {
            let v = f.make_vreg();
            f.push(
                b,
                MInstData::Binary {
                    op: BinOp::Add,
                    dst: v,
                    lhs: prev,
                    rhs: Operand::imm(1),
                },
            );
            prev = v;
        }
        f.push(
            b,
            MInstData::Move {
                dst: Operand::machine(regs::V0),
                src: prev,
            },
        );
        f.push(b, MInstData::Return);

        crate::back::passes::bb_normalize(&mut f);
        reg_alloc(&mut f);
        assert_eq!(f.spill_num, 0);
        for bb in f.blocks.clone() {
            for i in f.insts_of(bb) {
                let (d, u) = f.def_use(i);
                for x in d.into_iter().chain(u) {
                    assert!(x.is_machine(), "unallocated operand {}", x);
                }
            }
        }
    }
}
