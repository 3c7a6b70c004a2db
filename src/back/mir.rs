//! The machine-level IR: MIPS instructions over virtual and physical
//! registers.
//!
//! Instructions live in a per-function arena and are linked into their
//! blocks intrusively, so handles stay valid across the insertions and
//! deletions the passes perform; the argument-load catalogue and the
//! allocator's move worklists depend on that stability. Blocks are kept in
//! a layout-order vector, and a block without a terminating jump falls
//! through to the next one.

use derive_more::Display;

use crate::common::{entity_handle, Id, Map, Set};
use crate::middle::ir::RelOp;

pub const MAX_ARG_REGS: u32 = 4;
pub const DATA_BASE: u32 = 0x1001_0000;

pub fn is_imm(x: i32) -> bool {
    (-32768..=32767).contains(&x)
}

/// Physical register numbering and the allocation classes.
pub mod regs {
    pub const ZERO: i32 = 0;
    pub const AT: i32 = 1;
    pub const V0: i32 = 2;
    pub const V1: i32 = 3;
    pub const A0: i32 = 4;
    pub const T0: i32 = 8;
    pub const S0: i32 = 16;
    pub const T8: i32 = 24;
    pub const T9: i32 = 25;
    pub const K0: i32 = 26;
    pub const GP: i32 = 28;
    pub const SP: i32 = 29;
    pub const FP: i32 = 30;
    pub const RA: i32 = 31;

    /// v, a, t first; measured to beat other orders.
    pub const ALLOCATABLE: [i32; 25] = [
        V0, V1, A0, 5, 6, 7, T0, 9, 10, 11, 12, 13, 14, 15, S0, 17, 18, 19, 20, 21, 22, 23, T8,
        T9, FP,
    ];

    pub const CALLER_SAVED: [i32; 14] = [V0, V1, A0, 5, 6, 7, T0, 9, 10, 11, 12, 13, 14, 15];

    pub const CALLEE_SAVED: [i32; 11] = [S0, 17, 18, 19, 20, 21, 22, 23, T8, T9, FP];

    /// Index into [ALLOCATABLE], or None for reserved registers.
    pub fn alloc_index(r: i32) -> Option<usize> {
        ALLOCATABLE.iter().position(|&x| x == r)
    }

    pub fn is_callee_saved(r: i32) -> bool {
        CALLEE_SAVED.contains(&r)
    }

    pub fn name(r: i32) -> String {
        match r {
            0 | 1 => r.to_string(),
            2..=3 => format!("v{}", r - 2),
            4..=7 => format!("a{}", r - 4),
            8..=15 => format!("t{}", r - 8),
            16..=23 => format!("s{}", r - 16),
            24..=25 => format!("t{}", r - 16),
            26..=27 => format!("k{}", r - 26),
            28 => "gp".into(),
            29 => "sp".into(),
            30 => "fp".into(),
            31 => "ra".into(),
            _ => unreachable!("bad register number {}", r),
        }
    }
}

/// Number of colors available to the allocator.
pub const K: usize = regs::ALLOCATABLE.len();

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum OperandKind {
    Virtual,
    Machine,
    Const,
    Void,
}

/// A register-or-immediate operand. `Machine` operands are physical
/// registers, pre-assigned before allocation or colored by it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Operand {
    pub kind: OperandKind,
    pub val: i32,
}

impl Operand {
    pub fn vreg(id: u32) -> Operand {
        Operand {
            kind: OperandKind::Virtual,
            val: id as i32,
        }
    }

    pub fn machine(r: i32) -> Operand {
        Operand {
            kind: OperandKind::Machine,
            val: r,
        }
    }

    pub fn imm(v: i32) -> Operand {
        Operand {
            kind: OperandKind::Const,
            val: v,
        }
    }

    pub fn void() -> Operand {
        Operand {
            kind: OperandKind::Void,
            val: 0,
        }
    }

    pub fn zero() -> Operand {
        Operand::machine(regs::ZERO)
    }

    pub fn is_reg(self) -> bool {
        matches!(self.kind, OperandKind::Virtual | OperandKind::Machine)
    }

    pub fn is_const(self) -> bool {
        self.kind == OperandKind::Const
    }

    pub fn is_void(self) -> bool {
        self.kind == OperandKind::Void
    }

    /// A constant that fits the signed 16-bit immediate slot.
    pub fn is_imm(self) -> bool {
        self.is_const() && is_imm(self.val)
    }

    pub fn is_virtual(self) -> bool {
        self.kind == OperandKind::Virtual
    }

    pub fn is_machine(self) -> bool {
        self.kind == OperandKind::Machine
    }

    /// Same register, ignoring the const/void kinds.
    pub fn equiv(self, rhs: Operand) -> bool {
        self.is_reg() && self.kind == rhs.kind && self.val == rhs.val
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            OperandKind::Virtual => write!(f, "V{}", self.val),
            OperandKind::Machine => write!(f, "${}", regs::name(self.val)),
            OperandKind::Const => write!(f, "{}", self.val),
            OperandKind::Void => write!(f, "void"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Display, Debug)]
pub enum BinOp {
    #[display("addu")]
    Add,
    #[display("subu")]
    Sub,
    #[display("slt")]
    Lt,
    #[display("sltu")]
    Ltu,
    #[display("xor")]
    Xor,
    #[display("mul")]
    Mul,
}

impl BinOp {
    /// Mnemonic of the immediate form.
    pub fn imm_name(self) -> &'static str {
        match self {
            BinOp::Add => "addiu",
            BinOp::Lt => "slti",
            BinOp::Ltu => "sltiu",
            BinOp::Xor => "xori",
            _ => unreachable!("{} has no immediate form", self),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Display, Debug)]
pub enum ShiftOp {
    #[display("sll")]
    Ll,
    #[display("srl")]
    Rl,
    #[display("sra")]
    Ra,
}

/// Two-register compare-and-branch; `^ 1` on the discriminant negates.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BranchOp {
    Eq = 0,
    Ne = 1,
}

impl BranchOp {
    pub fn invert(self) -> BranchOp {
        match self {
            BranchOp::Eq => BranchOp::Ne,
            BranchOp::Ne => BranchOp::Eq,
        }
    }
}

entity_handle!(MInst, "i");
entity_handle!(MBlock, "mbb");

#[derive(Clone, Debug)]
pub enum MInstData {
    Binary {
        op: BinOp,
        dst: Operand,
        lhs: Operand,
        rhs: Operand,
    },
    Shift {
        op: ShiftOp,
        dst: Operand,
        lhs: Operand,
        rhs: u32,
    },
    /// `move` or `li`, depending on the source kind.
    Move {
        dst: Operand,
        src: Operand,
    },
    Mult {
        lhs: Operand,
        rhs: Operand,
    },
    Div {
        lhs: Operand,
        rhs: Operand,
    },
    MFHi {
        dst: Operand,
    },
    MFLo {
        dst: Operand,
    },
    Call {
        name: Id,
        /// min(arity, 4): how many `$a` registers the call reads.
        arg_regs: u32,
    },
    Branch {
        op: BranchOp,
        lhs: Operand,
        rhs: Operand,
        to: MBlock,
    },
    BranchZero {
        op: RelOp,
        lhs: Operand,
        to: MBlock,
    },
    Jump {
        to: MBlock,
    },
    Return,
    Load {
        dst: Operand,
        base: Operand,
        off: i32,
    },
    Store {
        src: Operand,
        base: Operand,
        off: i32,
    },
    Sys {
        no: u32,
    },
    LoadStr {
        dst: Operand,
        id: u32,
    },
    /// Tombstone for removed instructions.
    Removed,
}

impl MInstData {
    /// No effects besides writing its destination register.
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            MInstData::Binary { .. }
                | MInstData::Shift { .. }
                | MInstData::Move { .. }
                | MInstData::MFLo { .. }
                | MInstData::MFHi { .. }
                | MInstData::Load { .. }
                | MInstData::LoadStr { .. }
        )
    }
}

#[derive(Debug)]
struct MInstNode {
    data: MInstData,
    bb: MBlock,
    prev: Option<MInst>,
    next: Option<MInst>,
}

#[derive(Debug)]
pub struct MBlockData {
    pub id: u32,
    first: Option<MInst>,
    last: Option<MInst>,
    pub succ: Vec<MBlock>,
    pub loop_depth: u32,
    pub use_set: Set<Operand>,
    pub def_set: Set<Operand>,
    pub live_in: Set<Operand>,
    pub live_out: Set<Operand>,
}

pub struct Func {
    pub name: Id,
    pub is_main: bool,
    pub returns_int: bool,
    /// Blocks in layout order; a block without a jump falls through to its
    /// successor in this vector.
    pub blocks: Vec<MBlock>,
    pub vreg_cnt: u32,
    /// Prologue loads of stack-passed arguments; their offsets are patched
    /// once the frame size is known.
    pub arg_loads: Vec<MInst>,
    /// `add dst, $sp, K` instructions reserving alloca space; patched with
    /// the call-argument area size at the end of lowering.
    pub allocas: Vec<MInst>,
    /// Words of outgoing stack arguments needed by the calls made here.
    pub max_call_arg_num: u32,
    /// Words of spill slots, in words.
    pub spill_num: u32,
    /// Words of alloca storage.
    pub alloca_num: u32,

    insts: Vec<MInstNode>,
    mblocks: Vec<MBlockData>,
    bb_cnt: u32,
}

impl Func {
    pub fn new(name: Id, is_main: bool, returns_int: bool) -> Func {
        Func {
            name,
            is_main,
            returns_int,
            blocks: Vec::new(),
            vreg_cnt: 0,
            arg_loads: Vec::new(),
            allocas: Vec::new(),
            max_call_arg_num: 0,
            spill_num: 0,
            alloca_num: 0,
            insts: Vec::new(),
            mblocks: Vec::new(),
            bb_cnt: 0,
        }
    }

    pub fn make_vreg(&mut self) -> Operand {
        let r = Operand::vreg(self.vreg_cnt);
        self.vreg_cnt += 1;
        r
    }

    fn alloc_block(&mut self) -> MBlock {
        let id = self.bb_cnt;
        self.bb_cnt += 1;
        let b = MBlock(self.mblocks.len() as u32);
        self.mblocks.push(MBlockData {
            id,
            first: None,
            last: None,
            succ: Vec::new(),
            loop_depth: 0,
            use_set: Set::new(),
            def_set: Set::new(),
            live_in: Set::new(),
            live_out: Set::new(),
        });
        b
    }

    pub fn new_block(&mut self) -> MBlock {
        let b = self.alloc_block();
        self.blocks.push(b);
        b
    }

    /// Insert a fresh block right after `after` in layout order.
    pub fn new_block_after(&mut self, after: MBlock) -> MBlock {
        let b = self.alloc_block();
        let pos = self
            .blocks
            .iter()
            .position(|&x| x == after)
            .expect("block not in layout");
        self.blocks.insert(pos + 1, b);
        b
    }

    /// The layout successor a block falls through into.
    pub fn next_block(&self, b: MBlock) -> Option<MBlock> {
        let pos = self.blocks.iter().position(|&x| x == b)?;
        self.blocks.get(pos + 1).copied()
    }

    pub fn block(&self, b: MBlock) -> &MBlockData {
        &self.mblocks[b.index()]
    }

    pub fn block_mut(&mut self, b: MBlock) -> &mut MBlockData {
        &mut self.mblocks[b.index()]
    }

    pub fn inst(&self, i: MInst) -> &MInstData {
        &self.insts[i.index()].data
    }

    pub fn inst_mut(&mut self, i: MInst) -> &mut MInstData {
        &mut self.insts[i.index()].data
    }

    pub fn inst_block(&self, i: MInst) -> MBlock {
        self.insts[i.index()].bb
    }

    pub fn is_removed(&self, i: MInst) -> bool {
        matches!(self.insts[i.index()].data, MInstData::Removed)
    }

    pub fn first_inst(&self, b: MBlock) -> Option<MInst> {
        self.mblocks[b.index()].first
    }

    pub fn last_inst(&self, b: MBlock) -> Option<MInst> {
        self.mblocks[b.index()].last
    }

    pub fn next_inst(&self, i: MInst) -> Option<MInst> {
        self.insts[i.index()].next
    }

    pub fn prev_inst(&self, i: MInst) -> Option<MInst> {
        self.insts[i.index()].prev
    }

    pub fn insts_of(&self, b: MBlock) -> Vec<MInst> {
        let mut res = Vec::new();
        let mut cur = self.mblocks[b.index()].first;
        while let Some(i) = cur {
            res.push(i);
            cur = self.insts[i.index()].next;
        }
        res
    }

    fn alloc_inst(&mut self, data: MInstData, bb: MBlock) -> MInst {
        let i = MInst(self.insts.len() as u32);
        self.insts.push(MInstNode {
            data,
            bb,
            prev: None,
            next: None,
        });
        i
    }

    pub fn push(&mut self, b: MBlock, data: MInstData) -> MInst {
        let i = self.alloc_inst(data, b);
        let last = self.mblocks[b.index()].last;
        self.insts[i.index()].prev = last;
        match last {
            Some(l) => self.insts[l.index()].next = Some(i),
            None => self.mblocks[b.index()].first = Some(i),
        }
        self.mblocks[b.index()].last = Some(i);
        i
    }

    pub fn push_front(&mut self, b: MBlock, data: MInstData) -> MInst {
        let i = self.alloc_inst(data, b);
        let first = self.mblocks[b.index()].first;
        self.insts[i.index()].next = first;
        match first {
            Some(x) => self.insts[x.index()].prev = Some(i),
            None => self.mblocks[b.index()].last = Some(i),
        }
        self.mblocks[b.index()].first = Some(i);
        i
    }

    pub fn insert_before(&mut self, at: MInst, data: MInstData) -> MInst {
        let bb = self.insts[at.index()].bb;
        let prev = self.insts[at.index()].prev;
        let i = self.alloc_inst(data, bb);
        self.insts[i.index()].prev = prev;
        self.insts[i.index()].next = Some(at);
        self.insts[at.index()].prev = Some(i);
        match prev {
            Some(p) => self.insts[p.index()].next = Some(i),
            None => self.mblocks[bb.index()].first = Some(i),
        }
        i
    }

    pub fn insert_after(&mut self, at: MInst, data: MInstData) -> MInst {
        let bb = self.insts[at.index()].bb;
        let next = self.insts[at.index()].next;
        let i = self.alloc_inst(data, bb);
        self.insts[i.index()].next = next;
        self.insts[i.index()].prev = Some(at);
        self.insts[at.index()].next = Some(i);
        match next {
            Some(n) => self.insts[n.index()].prev = Some(i),
            None => self.mblocks[bb.index()].last = Some(i),
        }
        i
    }

    /// Unlink and tombstone an instruction.
    pub fn remove(&mut self, i: MInst) {
        let MInstNode { bb, prev, next, .. } = self.insts[i.index()];
        match prev {
            Some(p) => self.insts[p.index()].next = next,
            None => self.mblocks[bb.index()].first = next,
        }
        match next {
            Some(n) => self.insts[n.index()].prev = prev,
            None => self.mblocks[bb.index()].last = prev,
        }
        let node = &mut self.insts[i.index()];
        node.prev = None;
        node.next = None;
        node.data = MInstData::Removed;
    }

    /// Move an already-allocated instruction to the end of another block.
    /// Used when splitting blocks; the instruction must be unlinked first.
    pub fn relink_push(&mut self, b: MBlock, i: MInst) {
        let last = self.mblocks[b.index()].last;
        let node = &mut self.insts[i.index()];
        node.bb = b;
        node.prev = last;
        node.next = None;
        match last {
            Some(l) => self.insts[l.index()].next = Some(i),
            None => self.mblocks[b.index()].first = Some(i),
        }
        self.mblocks[b.index()].last = Some(i);
    }

    /// Unlink without tombstoning, for relinking into another block.
    pub fn unlink(&mut self, i: MInst) {
        let MInstNode { bb, prev, next, .. } = self.insts[i.index()];
        match prev {
            Some(p) => self.insts[p.index()].next = next,
            None => self.mblocks[bb.index()].first = next,
        }
        match next {
            Some(n) => self.insts[n.index()].prev = prev,
            None => self.mblocks[bb.index()].last = prev,
        }
        let node = &mut self.insts[i.index()];
        node.prev = None;
        node.next = None;
    }

    /// `(defs, uses)` of one instruction, registers only. Entries may
    /// repeat; callers put them into sets.
    pub fn def_use(&self, i: MInst) -> (Vec<Operand>, Vec<Operand>) {
        use MInstData::*;
        match *self.inst(i) {
            Binary { dst, lhs, rhs, .. } => {
                let mut uses = vec![lhs];
                if rhs.is_reg() {
                    uses.push(rhs);
                }
                (vec![dst], uses)
            }
            Shift { dst, lhs, .. } => (vec![dst], vec![lhs]),
            Move { dst, src } => {
                let uses = if src.is_reg() { vec![src] } else { vec![] };
                (vec![dst], uses)
            }
            Mult { lhs, rhs } | Div { lhs, rhs } => (vec![], vec![lhs, rhs]),
            MFHi { dst } | MFLo { dst } => (vec![dst], vec![]),
            Call { arg_regs, .. } => {
                // A call clobbers every caller-saved register and reads its
                // argument registers.
                let defs = regs::CALLER_SAVED
                    .iter()
                    .map(|&r| Operand::machine(r))
                    .collect();
                let uses = (0..arg_regs)
                    .map(|k| Operand::machine(regs::A0 + k as i32))
                    .collect();
                (defs, uses)
            }
            Branch { lhs, rhs, .. } => (vec![], vec![lhs, rhs]),
            BranchZero { lhs, .. } => (vec![], vec![lhs]),
            Jump { .. } => (vec![], vec![]),
            Return => {
                if self.returns_int {
                    (vec![], vec![Operand::machine(regs::V0)])
                } else {
                    (vec![], vec![])
                }
            }
            Load { dst, base, .. } => (vec![dst], vec![base]),
            Store { src, base, .. } => (vec![], vec![src, base]),
            Sys { no } => match no {
                1 | 4 | 11 => (
                    vec![],
                    vec![Operand::machine(regs::V0), Operand::machine(regs::A0)],
                ),
                5 => (
                    vec![Operand::machine(regs::V0)],
                    vec![Operand::machine(regs::V0)],
                ),
                _ => unreachable!("unexpected syscall {}", no),
            },
            LoadStr { dst, .. } => (vec![dst], vec![]),
            Removed => (vec![], vec![]),
        }
    }

    /// Mutable access to every register slot of an instruction.
    pub fn regs_mut(&mut self, i: MInst) -> Vec<&mut Operand> {
        use MInstData::*;
        match self.inst_mut(i) {
            Binary { dst, lhs, rhs, .. } => {
                if rhs.is_reg() {
                    vec![dst, lhs, rhs]
                } else {
                    vec![dst, lhs]
                }
            }
            Shift { dst, lhs, .. } => vec![dst, lhs],
            Move { dst, src } => {
                if src.is_reg() {
                    vec![dst, src]
                } else {
                    vec![dst]
                }
            }
            Mult { lhs, rhs } | Div { lhs, rhs } => vec![lhs, rhs],
            MFHi { dst } | MFLo { dst } => vec![dst],
            Branch { lhs, rhs, .. } => vec![lhs, rhs],
            BranchZero { lhs, .. } => vec![lhs],
            Load { dst, base, .. } => vec![dst, base],
            Store { src, base, .. } => vec![src, base],
            LoadStr { dst, .. } => vec![dst],
            _ => vec![],
        }
    }

    /// Mutable `(def, uses)` split, for the spill rewriter.
    pub fn def_use_mut(&mut self, i: MInst) -> (Option<&mut Operand>, Vec<&mut Operand>) {
        use MInstData::*;
        match self.inst_mut(i) {
            Binary { dst, lhs, rhs, .. } => {
                if rhs.is_reg() {
                    (Some(dst), vec![lhs, rhs])
                } else {
                    (Some(dst), vec![lhs])
                }
            }
            Shift { dst, lhs, .. } => (Some(dst), vec![lhs]),
            Move { dst, src } => {
                if src.is_reg() {
                    (Some(dst), vec![src])
                } else {
                    (Some(dst), vec![])
                }
            }
            Mult { lhs, rhs } | Div { lhs, rhs } => (None, vec![lhs, rhs]),
            MFHi { dst } | MFLo { dst } => (Some(dst), vec![]),
            Branch { lhs, rhs, .. } => (None, vec![lhs, rhs]),
            BranchZero { lhs, .. } => (None, vec![lhs]),
            Load { dst, base, .. } => (Some(dst), vec![base]),
            Store { src, base, .. } => (None, vec![src, base]),
            LoadStr { dst, .. } => (Some(dst), vec![]),
            _ => (None, vec![]),
        }
    }

    /// Registers written, for the callee-saved scan.
    pub fn defs(&self, i: MInst) -> Vec<Operand> {
        self.def_use(i).0
    }
}

/// A global variable as the emitter needs it.
pub struct GlobData {
    pub name: Id,
    /// Evaluated initializer words, or None for `.space`.
    pub init: Option<Vec<i32>>,
    pub size_words: u32,
    pub addr: u32,
}

pub struct Prog {
    pub funcs: Vec<Func>,
    pub globs: Vec<GlobData>,
    /// Interned format-string fragments, in insertion order.
    strs: Vec<String>,
    str_index: Map<String, u32>,
    pub gp_used: bool,
    pub str_base_addr: u32,
}

impl Prog {
    pub fn new(globs: Vec<GlobData>, str_base_addr: u32) -> Prog {
        Prog {
            funcs: Vec::new(),
            globs,
            strs: Vec::new(),
            str_index: Map::new(),
            gp_used: false,
            str_base_addr,
        }
    }

    /// Intern a raw format fragment, returning its id.
    pub fn find_str(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.str_index.get(s) {
            return id;
        }
        let id = self.strs.len() as u32;
        self.strs.push(s.to_owned());
        self.str_index.insert(s.to_owned(), id);
        id
    }

    pub fn strs(&self) -> &[String] {
        &self.strs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;

    #[test]
    fn register_tables_are_consistent() {
        assert_eq!(K, 25);
        for &r in &regs::CALLEE_SAVED {
            assert!(regs::alloc_index(r).is_some());
        }
        for &r in &regs::CALLER_SAVED {
            assert!(regs::alloc_index(r).is_some());
        }
        assert_eq!(regs::CALLER_SAVED.len() + regs::CALLEE_SAVED.len(), K);
        assert!(regs::alloc_index(regs::SP).is_none());
        assert!(regs::alloc_index(regs::RA).is_none());
        assert!(regs::alloc_index(regs::GP).is_none());
        assert_eq!(regs::name(regs::T9), "t9");
        assert_eq!(regs::name(regs::FP), "fp");
    }

    #[test]
    fn operand_predicates() {
        assert!(Operand::imm(32767).is_imm());
        assert!(!Operand::imm(32768).is_imm());
        assert!(Operand::vreg(3).equiv(Operand::vreg(3)));
        assert!(!Operand::vreg(3).equiv(Operand::machine(3)));
        assert!(!Operand::imm(3).equiv(Operand::imm(3)));
    }

    #[test]
    fn intrusive_inst_list() {
        let mut f = Func::new(id("f"), false, false);
        let b = f.new_block();
        let i1 = f.push(b, MInstData::Sys { no: 5 });
        let i3 = f.push(b, MInstData::Return);
        let i2 = f.insert_before(
            i3,
            MInstData::Move {
                dst: Operand::vreg(0),
                src: Operand::machine(regs::V0),
            },
        );
        assert_eq!(f.insts_of(b), vec![i1, i2, i3]);
        f.remove(i2);
        assert_eq!(f.insts_of(b), vec![i1, i3]);
        assert!(f.is_removed(i2));
    }
}
