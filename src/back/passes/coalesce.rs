//! Copy cleanup: drop no-op moves, rewrite `op dst, x, 0` into moves, and
//! thread repeated immediates through registers within a block so the same
//! constant is not loaded twice.

use crate::back::mir::{BinOp, Func, MInstData, Operand};
use crate::common::Map;

/// Which registers currently hold which constant, per block.
#[derive(Default)]
struct ConstState {
    m: Map<Operand, i32>,
    rm: Map<i32, Vec<Operand>>,
}

impl ConstState {
    fn pop(&mut self, x: Operand) {
        if let Some(&c) = self.m.get(&x) {
            if let Some(v) = self.rm.get_mut(&c) {
                v.retain(|y| !y.equiv(x));
            }
        }
    }

    fn push(&mut self, x: Operand, c: i32) {
        self.pop(x);
        self.m.insert(x, c);
        self.rm.entry(c).or_default().push(x);
    }

    fn holds(&self, x: Operand, c: i32) -> bool {
        self.rm
            .get(&c)
            .map_or(false, |v| v.iter().any(|y| y.equiv(x)))
    }

    fn find(&self, c: i32) -> Option<Operand> {
        self.rm.get(&c).and_then(|v| v.last().copied())
    }

    fn clear(&mut self) {
        self.m.clear();
        self.rm.clear();
    }
}

fn li_coalesce(f: &mut Func) {
    let mut s = ConstState::default();
    for bb in f.blocks.clone() {
        s.clear();
        for i in f.insts_of(bb) {
            if let MInstData::Move { dst, src } = *f.inst(i) {
                if src.is_const() {
                    let c = src.val;
                    if s.holds(dst, c) {
                        f.remove(i);
                    } else {
                        if let Some(r) = s.find(c) {
                            *f.inst_mut(i) = MInstData::Move { dst, src: r };
                        }
                        s.push(dst, c);
                    }
                    continue;
                }
                s.pop(dst);
                continue;
            }
            for d in f.defs(i) {
                s.pop(d);
            }
        }
    }
}

pub fn move_coalesce(f: &mut Func) {
    for bb in f.blocks.clone() {
        for i in f.insts_of(bb) {
            match *f.inst(i) {
                MInstData::Binary { op, dst, lhs, rhs }
                    if matches!(op, BinOp::Add | BinOp::Sub | BinOp::Xor)
                        && rhs == Operand::imm(0) =>
                {
                    if dst.equiv(lhs) {
                        f.remove(i);
                    } else {
                        *f.inst_mut(i) = MInstData::Move { dst, src: lhs };
                    }
                }
                MInstData::Move { dst, src } if dst.equiv(src) => {
                    f.remove(i);
                }
                _ => {}
            }
        }
    }
    li_coalesce(f);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::mir::regs;
    use crate::common::id;

    #[test]
    fn zero_adds_become_moves() {
        let mut f = Func::new(id("f"), false, false);
        let b = f.new_block();
        let v0 = f.make_vreg();
        let v1 = f.make_vreg();
        f.push(
            b,
            MInstData::Binary {
                op: BinOp::Add,
                dst: v1,
                lhs: v0,
                rhs: Operand::imm(0),
            },
        );
        f.push(
            b,
            MInstData::Binary {
                op: BinOp::Add,
                dst: v0,
                lhs: v0,
                rhs: Operand::imm(0),
            },
        );
        f.push(b, MInstData::Return);
        move_coalesce(&mut f);
        let insts = f.insts_of(b);
        assert_eq!(insts.len(), 2);
        assert!(matches!(*f.inst(insts[0]), MInstData::Move { .. }));
    }

    #[test]
    fn repeated_immediates_are_threaded() {
        // li v0, 1; syscall; li a0, 1  =>  the second li reuses $v0.
        let mut f = Func::new(id("f"), false, false);
        let b = f.new_block();
        let v0 = Operand::machine(regs::V0);
        let a0 = Operand::machine(regs::A0);
        f.push(b, MInstData::Move { dst: v0, src: Operand::imm(1) });
        f.push(b, MInstData::Sys { no: 1 });
        f.push(b, MInstData::Move { dst: a0, src: Operand::imm(1) });
        f.push(b, MInstData::Return);
        move_coalesce(&mut f);
        let insts = f.insts_of(b);
        match *f.inst(insts[2]) {
            MInstData::Move { dst, src } => {
                assert!(dst.equiv(a0));
                assert!(src.equiv(v0));
            }
            _ => panic!("expected a move"),
        }
    }
}
