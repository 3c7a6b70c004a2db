//! Per-block liveness over the allocation candidates: virtual registers and
//! the allocatable physical ones. Reserved registers never enter the sets.

use crate::back::mir::{regs, Func, MInst, Operand};
use crate::common::Set;

/// Not an allocation candidate: constants, voids, and reserved physical
/// registers.
pub fn is_ignored(x: Operand) -> bool {
    !(x.is_virtual() || (x.is_machine() && regs::alloc_index(x.val).is_some()))
}

pub fn def_use_uncolored(f: &Func, i: MInst) -> (Vec<Operand>, Vec<Operand>) {
    let (mut def, mut use_) = f.def_use(i);
    def.retain(|&x| !is_ignored(x));
    use_.retain(|&x| !is_ignored(x));
    (def, use_)
}

pub fn build_liveness(f: &mut Func) {
    let blocks = f.blocks.clone();
    for &bb in &blocks {
        let mut use_set = Set::new();
        let mut def_set = Set::new();
        for i in f.insts_of(bb) {
            let (def, use_) = def_use_uncolored(f, i);
            for x in use_ {
                if !def_set.contains(&x) {
                    use_set.insert(x);
                }
            }
            for x in def {
                if !use_set.contains(&x) {
                    def_set.insert(x);
                }
            }
        }
        let b = f.block_mut(bb);
        b.live_in = use_set.clone();
        b.use_set = use_set;
        b.def_set = def_set;
        b.live_out.clear();
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &bb in &blocks {
            let mut out: Set<Operand> = Set::new();
            for &s in &f.block(bb).succ.clone() {
                out.extend(f.block(s).live_in.iter().copied());
            }
            if out != f.block(bb).live_out {
                changed = true;
                let mut live_in = f.block(bb).use_set.clone();
                for &x in &out {
                    if !f.block(bb).def_set.contains(&x) {
                        live_in.insert(x);
                    }
                }
                let b = f.block_mut(bb);
                b.live_out = out;
                b.live_in = live_in;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::mir::{BinOp, MInstData};
    use crate::common::id;

    #[test]
    fn straight_line_liveness() {
        // b0: V0 = $a0; branch to b1
        // b1: V1 = V0 + 1; $v0 = V1; ret
        let mut f = Func::new(id("f"), false, true);
        let b0 = f.new_block();
        let b1 = f.new_block();
        let v0 = f.make_vreg();
        let v1 = f.make_vreg();
        f.push(
            b0,
            MInstData::Move {
                dst: v0,
                src: Operand::machine(regs::A0),
            },
        );
        f.push(
            b1,
            MInstData::Binary {
                op: BinOp::Add,
                dst: v1,
                lhs: v0,
                rhs: Operand::imm(1),
            },
        );
        f.push(
            b1,
            MInstData::Move {
                dst: Operand::machine(regs::V0),
                src: v1,
            },
        );
        f.push(b1, MInstData::Return);
        f.block_mut(b0).succ.push(b1);

        build_liveness(&mut f);
        assert!(f.block(b0).live_out.contains(&v0));
        assert!(f.block(b1).live_in.contains(&v0));
        assert!(!f.block(b1).live_in.contains(&v1));
        assert!(f.block(b0).use_set.contains(&Operand::machine(regs::A0)));
        // $v0 is written before the return reads it.
        assert!(!f.block(b1).use_set.contains(&Operand::machine(regs::V0)));
    }
}
