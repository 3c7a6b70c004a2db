//! The SSA intermediate representation.
//!
//! All IR nodes live in arenas owned by [Program] and are addressed by small
//! `u32` handles: [Value] for constants, globals, arguments, undef and
//! instructions; [UseRef] for operand slots; [Block] for basic blocks;
//! [FuncRef] for functions (user functions plus the `getint` and per-call
//! `printf` pseudo-functions).
//!
//! Every value carries an intrusive doubly-linked list of its uses. A use is
//! created registered, reassignment is an unregister-then-register, and
//! `replace_uses` repoints the whole list; these are the only ways operands
//! change, so the use lists are authoritative at all times.
//!
//! Instructions are linked into their block through an intrusive list as
//! well, which keeps insertion before or after an arbitrary instruction O(1)
//! for the passes that reschedule code.

use smallvec::SmallVec;

use crate::common::{entity_handle, Id, Map, Set};
use crate::front::ast::{BinOp, Decl, DeclRef};

entity_handle!(Value, "%");
entity_handle!(UseRef, "u");
entity_handle!(Block, "$L");
entity_handle!(FuncRef, "f");

pub const INT_MAX: i32 = i32::MAX;
pub const INT_MIN: i32 = i32::MIN;

/// One operand slot: which value it reads and which instruction reads it.
#[derive(Debug)]
pub struct UseData {
    pub value: Option<Value>,
    pub user: Value,
    prev: Option<UseRef>,
    next: Option<UseRef>,
}

#[derive(Debug)]
pub struct ValueNode {
    pub data: ValueData,
    uses_head: Option<UseRef>,
    uses_tail: Option<UseRef>,
}

#[derive(Debug)]
pub enum ValueData {
    Const(i32),
    Global(DeclRef),
    Arg { var: DeclRef, pos: u32 },
    Undef,
    Inst(Inst),
}

#[derive(Debug)]
pub struct Inst {
    pub kind: InstKind,
    pub bb: Block,
    prev: Option<Value>,
    next: Option<Value>,
    /// Scratch marker used by the passes (dead-code marking, scheduling).
    pub vis: bool,
    /// Promotable-alloca slot for mem2reg; -1 everywhere else.
    pub aid: i32,
}

#[derive(Debug)]
pub enum InstKind {
    Binary {
        op: BinOp,
        lhs: UseRef,
        rhs: UseRef,
    },
    Call {
        func: FuncRef,
        args: SmallVec<[UseRef; 4]>,
    },
    Branch {
        cond: UseRef,
        then_bb: Block,
        else_bb: Block,
    },
    Jump {
        to: Block,
    },
    Return {
        val: Option<UseRef>,
    },
    Alloca {
        var: DeclRef,
    },
    Load {
        var: DeclRef,
        base: UseRef,
        off: UseRef,
    },
    Store {
        var: DeclRef,
        base: UseRef,
        off: UseRef,
        val: UseRef,
    },
    Gep {
        var: DeclRef,
        base: UseRef,
        off: UseRef,
        size: i32,
    },
    Phi {
        args: Vec<(UseRef, Block)>,
    },
    CondJump {
        op: RelOp,
        lhs: UseRef,
        rhs: UseRef,
        then_bb: Block,
        else_bb: Block,
    },
    /// Tombstone for erased instructions; never linked into a block.
    Nop,
}

/// Relational ops for fused compare-and-branch, numbered so that `op ^ 1`
/// is the logical negation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum RelOp {
    Eq = 0,
    Ne = 1,
    Lt = 2,
    Ge = 3,
    Le = 4,
    Gt = 5,
}

impl RelOp {
    pub fn from_u8(x: u8) -> RelOp {
        match x {
            0 => RelOp::Eq,
            1 => RelOp::Ne,
            2 => RelOp::Lt,
            3 => RelOp::Ge,
            4 => RelOp::Le,
            5 => RelOp::Gt,
            _ => unreachable!(),
        }
    }

    pub fn invert(self) -> RelOp {
        RelOp::from_u8(self as u8 ^ 1)
    }

    /// The op with its operands exchanged.
    pub fn swap(self) -> RelOp {
        match self {
            RelOp::Eq => RelOp::Eq,
            RelOp::Ne => RelOp::Ne,
            RelOp::Lt => RelOp::Gt,
            RelOp::Gt => RelOp::Lt,
            RelOp::Le => RelOp::Ge,
            RelOp::Ge => RelOp::Le,
        }
    }

    pub fn eval(self, lh: i32, rh: i32) -> bool {
        match self {
            RelOp::Eq => lh == rh,
            RelOp::Ne => lh != rh,
            RelOp::Lt => lh < rh,
            RelOp::Ge => lh >= rh,
            RelOp::Le => lh <= rh,
            RelOp::Gt => lh > rh,
        }
    }

    pub fn from_bin_op(op: BinOp) -> Option<RelOp> {
        Some(match op {
            BinOp::Eq => RelOp::Eq,
            BinOp::Ne => RelOp::Ne,
            BinOp::Lt => RelOp::Lt,
            BinOp::Le => RelOp::Le,
            BinOp::Gt => RelOp::Gt,
            BinOp::Ge => RelOp::Ge,
            _ => return None,
        })
    }
}

/// Evaluate a binary operator on constants.
///
/// Division by zero folds to zero: such a program has no defined meaning,
/// and the compiler must not crash on it.
pub fn eval_bin(op: BinOp, lh: i32, rh: i32) -> i32 {
    match op {
        BinOp::Add => lh.wrapping_add(rh),
        BinOp::Sub => lh.wrapping_sub(rh),
        BinOp::Mul => lh.wrapping_mul(rh),
        BinOp::Div => {
            if rh == 0 {
                0
            } else {
                lh.wrapping_div(rh)
            }
        }
        BinOp::Mod => {
            if rh == 0 {
                0
            } else {
                lh.wrapping_rem(rh)
            }
        }
        BinOp::Lt => (lh < rh) as i32,
        BinOp::Gt => (lh > rh) as i32,
        BinOp::Le => (lh <= rh) as i32,
        BinOp::Ge => (lh >= rh) as i32,
        BinOp::Eq => (lh == rh) as i32,
        BinOp::Ne => (lh != rh) as i32,
        BinOp::And => (lh != 0 && rh != 0) as i32,
        BinOp::Or => (lh != 0 || rh != 0) as i32,
    }
}

#[derive(Debug)]
pub struct BlockData {
    pub id: u32,
    pub func: FuncRef,
    first: Option<Value>,
    last: Option<Value>,

    // Analysis caches, rebuilt on demand.
    pub preds: Vec<Block>,
    pub dom: Set<Block>,
    pub idom: Option<Block>,
    pub dom_children: Vec<Block>,
    pub dom_depth: u32,
    pub df: Vec<Block>,
    /// Innermost containing loop, as an index into the latest loop forest
    /// built for this function.
    pub loop_idx: Option<u32>,
    /// Loop nesting depth; 0 outside any loop.
    pub depth: u32,
    pub vis: bool,
    /// Executed at most once per run; computed by the dead-global pass.
    pub is_once: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum FuncKind {
    User,
    GetInt,
    Printf(String),
}

#[derive(Debug)]
pub struct FuncData {
    pub kind: FuncKind,
    pub name: Id,
    pub returns_int: bool,
    pub params: Vec<DeclRef>,
    /// The Argument value of each parameter, in position order.
    pub arg_values: Vec<Value>,
    /// Blocks in layout order; the first is the entry.
    pub blocks: Vec<Block>,
    pub bb_cnt: u32,

    // Call-graph facts.
    pub callers: Set<FuncRef>,
    pub used_callers: Set<FuncRef>,
    pub has_side_effects: bool,
    pub has_global_loads: bool,
    pub has_param_loads: bool,
    pub is_pure: bool,
    pub is_once: bool,
    pub is_unused: bool,
}

impl FuncData {
    fn new(kind: FuncKind, name: Id, returns_int: bool, params: Vec<DeclRef>) -> FuncData {
        let pseudo = kind != FuncKind::User;
        FuncData {
            kind,
            name,
            returns_int,
            params,
            arg_values: Vec::new(),
            blocks: Vec::new(),
            bb_cnt: 0,
            callers: Set::new(),
            used_callers: Set::new(),
            // Pseudo-functions do I/O; they are never pure.
            has_side_effects: pseudo,
            has_global_loads: false,
            has_param_loads: false,
            is_pure: false,
            is_once: false,
            is_unused: false,
        }
    }

    pub fn entry(&self) -> Block {
        self.blocks[0]
    }
}

pub struct Program {
    pub decls: Vec<Decl>,
    pub globals: Vec<DeclRef>,
    pub funcs: Vec<FuncData>,
    /// User functions in source order (`main` last by the grammar).
    pub user_funcs: Vec<FuncRef>,
    pub getint: FuncRef,
    pub printf_funcs: Vec<FuncRef>,
    /// The address value of each program-scope variable.
    pub global_value: Map<DeclRef, Value>,

    values: Vec<ValueNode>,
    uses: Vec<UseData>,
    blocks: Vec<BlockData>,
    consts: Map<i32, Value>,
    pub undef: Value,
}

impl Program {
    pub fn new(decls: Vec<Decl>, globals: Vec<DeclRef>) -> Program {
        let mut prog = Program {
            decls,
            globals,
            funcs: Vec::new(),
            user_funcs: Vec::new(),
            getint: FuncRef(0),
            printf_funcs: Vec::new(),
            global_value: Map::new(),
            values: Vec::new(),
            uses: Vec::new(),
            blocks: Vec::new(),
            consts: Map::new(),
            undef: Value(0),
        };
        prog.undef = prog.push_value(ValueData::Undef);
        prog.const_of(0);
        prog.const_of(1);
        prog
    }

    // Values

    fn push_value(&mut self, data: ValueData) -> Value {
        let v = Value(self.values.len() as u32);
        self.values.push(ValueNode {
            data,
            uses_head: None,
            uses_tail: None,
        });
        v
    }

    pub fn val(&self, v: Value) -> &ValueNode {
        &self.values[v.index()]
    }

    pub fn const_of(&mut self, c: i32) -> Value {
        if let Some(&v) = self.consts.get(&c) {
            return v;
        }
        let v = self.push_value(ValueData::Const(c));
        self.consts.insert(c, v);
        v
    }

    pub fn as_const(&self, v: Value) -> Option<i32> {
        match self.val(v).data {
            ValueData::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_const(&self, v: Value, c: i32) -> bool {
        self.as_const(v) == Some(c)
    }

    pub fn new_global(&mut self, var: DeclRef) -> Value {
        self.push_value(ValueData::Global(var))
    }

    pub fn new_arg(&mut self, var: DeclRef, pos: u32) -> Value {
        self.push_value(ValueData::Arg { var, pos })
    }

    // Uses

    pub fn use_data(&self, u: UseRef) -> &UseData {
        &self.uses[u.index()]
    }

    /// The value a use currently reads; the use must not be released.
    pub fn used(&self, u: UseRef) -> Value {
        self.uses[u.index()].value.expect("read of a released use")
    }

    pub fn new_use(&mut self, value: Value, user: Value) -> UseRef {
        let u = UseRef(self.uses.len() as u32);
        self.uses.push(UseData {
            value: None,
            user,
            prev: None,
            next: None,
        });
        self.register_use(u, value);
        u
    }

    fn register_use(&mut self, u: UseRef, value: Value) {
        debug_assert!(self.uses[u.index()].value.is_none());
        let tail = self.values[value.index()].uses_tail;
        {
            let slot = &mut self.uses[u.index()];
            slot.value = Some(value);
            slot.prev = tail;
            slot.next = None;
        }
        match tail {
            Some(t) => self.uses[t.index()].next = Some(u),
            None => self.values[value.index()].uses_head = Some(u),
        }
        self.values[value.index()].uses_tail = Some(u);
    }

    fn unregister_use(&mut self, u: UseRef) {
        let UseData {
            value, prev, next, ..
        } = self.uses[u.index()];
        let value = value.expect("unregistering a released use");
        match prev {
            Some(p) => self.uses[p.index()].next = next,
            None => self.values[value.index()].uses_head = next,
        }
        match next {
            Some(n) => self.uses[n.index()].prev = prev,
            None => self.values[value.index()].uses_tail = prev,
        }
        let u = &mut self.uses[u.index()];
        u.value = None;
        u.prev = None;
        u.next = None;
    }

    /// Repoint a use: atomic unregister-then-register.
    pub fn set_use(&mut self, u: UseRef, value: Value) {
        self.unregister_use(u);
        self.register_use(u, value);
    }

    /// Unregister a use and return what it read.
    pub fn release_use(&mut self, u: UseRef) -> Value {
        let v = self.used(u);
        self.unregister_use(u);
        v
    }

    pub fn has_uses(&self, v: Value) -> bool {
        self.val(v).uses_head.is_some()
    }

    /// Does `v` have exactly one use?
    pub fn sole_use(&self, v: Value) -> Option<UseRef> {
        let node = self.val(v);
        match (node.uses_head, node.uses_tail) {
            (Some(h), Some(t)) if h == t => Some(h),
            _ => None,
        }
    }

    /// Snapshot of the use list, safe to iterate while mutating.
    pub fn uses_of(&self, v: Value) -> Vec<UseRef> {
        let mut res = Vec::new();
        let mut cur = self.val(v).uses_head;
        while let Some(u) = cur {
            res.push(u);
            cur = self.uses[u.index()].next;
        }
        res
    }

    /// Repoint every use of `v` at `n`, leaving `v` without users.
    pub fn replace_uses(&mut self, v: Value, n: Value) {
        debug_assert!(v != n, "replacing a value with itself never terminates");
        while let Some(u) = self.val(v).uses_head {
            self.set_use(u, n);
        }
    }

    // Instructions

    pub fn inst(&self, v: Value) -> &Inst {
        match &self.val(v).data {
            ValueData::Inst(i) => i,
            _ => panic!("{} is not an instruction", v),
        }
    }

    pub fn inst_mut(&mut self, v: Value) -> &mut Inst {
        match &mut self.values[v.index()].data {
            ValueData::Inst(i) => i,
            _ => panic!("value is not an instruction"),
        }
    }

    pub fn is_inst(&self, v: Value) -> bool {
        matches!(self.val(v).data, ValueData::Inst(_))
    }

    fn new_inst(&mut self) -> Value {
        self.push_value(ValueData::Inst(Inst {
            kind: InstKind::Nop,
            bb: Block(u32::MAX),
            prev: None,
            next: None,
            vis: false,
            aid: -1,
        }))
    }

    pub fn new_binary(&mut self, op: BinOp, lhs: Value, rhs: Value) -> Value {
        let v = self.new_inst();
        let lhs = self.new_use(lhs, v);
        let rhs = self.new_use(rhs, v);
        self.inst_mut(v).kind = InstKind::Binary { op, lhs, rhs };
        v
    }

    pub fn new_call(&mut self, func: FuncRef, argv: &[Value]) -> Value {
        let v = self.new_inst();
        let args = argv.iter().map(|&a| self.new_use(a, v)).collect();
        self.inst_mut(v).kind = InstKind::Call { func, args };
        v
    }

    pub fn new_branch(&mut self, cond: Value, then_bb: Block, else_bb: Block) -> Value {
        let v = self.new_inst();
        let cond = self.new_use(cond, v);
        self.inst_mut(v).kind = InstKind::Branch {
            cond,
            then_bb,
            else_bb,
        };
        v
    }

    pub fn new_jump(&mut self, to: Block) -> Value {
        let v = self.new_inst();
        self.inst_mut(v).kind = InstKind::Jump { to };
        v
    }

    pub fn new_return(&mut self, val: Option<Value>) -> Value {
        let v = self.new_inst();
        let val = val.map(|x| self.new_use(x, v));
        self.inst_mut(v).kind = InstKind::Return { val };
        v
    }

    pub fn new_alloca(&mut self, var: DeclRef) -> Value {
        let v = self.new_inst();
        self.inst_mut(v).kind = InstKind::Alloca { var };
        v
    }

    pub fn new_load(&mut self, var: DeclRef, base: Value, off: Value) -> Value {
        let v = self.new_inst();
        let base = self.new_use(base, v);
        let off = self.new_use(off, v);
        self.inst_mut(v).kind = InstKind::Load { var, base, off };
        v
    }

    pub fn new_store(&mut self, var: DeclRef, base: Value, off: Value, val: Value) -> Value {
        let v = self.new_inst();
        let base = self.new_use(base, v);
        let off = self.new_use(off, v);
        let val = self.new_use(val, v);
        self.inst_mut(v).kind = InstKind::Store {
            var,
            base,
            off,
            val,
        };
        v
    }

    pub fn new_gep(&mut self, var: DeclRef, base: Value, off: Value, size: i32) -> Value {
        let v = self.new_inst();
        let base = self.new_use(base, v);
        let off = self.new_use(off, v);
        self.inst_mut(v).kind = InstKind::Gep {
            var,
            base,
            off,
            size,
        };
        v
    }

    pub fn new_phi(&mut self) -> Value {
        let v = self.new_inst();
        self.inst_mut(v).kind = InstKind::Phi { args: Vec::new() };
        v
    }

    pub fn phi_push(&mut self, phi: Value, val: Value, bb: Block) {
        let u = self.new_use(val, phi);
        match &mut self.inst_mut(phi).kind {
            InstKind::Phi { args } => args.push((u, bb)),
            _ => panic!("phi_push on a non-phi"),
        }
    }

    /// Remove the first incoming phi entry from `pred`, releasing its use.
    /// Returns the value that entry carried.
    pub fn phi_remove_incoming(&mut self, phi: Value, pred: Block) -> Option<Value> {
        let pos = match &self.inst(phi).kind {
            InstKind::Phi { args } => args.iter().position(|&(_, bb)| bb == pred)?,
            _ => panic!("phi_remove_incoming on a non-phi"),
        };
        let u = match &mut self.inst_mut(phi).kind {
            InstKind::Phi { args } => args.remove(pos).0,
            _ => unreachable!(),
        };
        Some(self.release_use(u))
    }

    pub fn new_cond_jump(
        &mut self,
        op: RelOp,
        lhs: Value,
        rhs: Value,
        then_bb: Block,
        else_bb: Block,
    ) -> Value {
        let v = self.new_inst();
        let lhs = self.new_use(lhs, v);
        let rhs = self.new_use(rhs, v);
        self.inst_mut(v).kind = InstKind::CondJump {
            op,
            lhs,
            rhs,
            then_bb,
            else_bb,
        };
        v
    }

    /// The operand slots owned by an instruction, in operand order.
    pub fn owned_uses(&self, v: Value) -> SmallVec<[UseRef; 4]> {
        let mut res = SmallVec::new();
        match &self.inst(v).kind {
            InstKind::Binary { lhs, rhs, .. } => {
                res.push(*lhs);
                res.push(*rhs);
            }
            InstKind::Call { args, .. } => res.extend(args.iter().copied()),
            InstKind::Branch { cond, .. } => res.push(*cond),
            InstKind::Return { val } => res.extend(val.iter().copied()),
            InstKind::Load { base, off, .. } | InstKind::Gep { base, off, .. } => {
                res.push(*base);
                res.push(*off);
            }
            InstKind::Store { base, off, val, .. } => {
                res.push(*base);
                res.push(*off);
                res.push(*val);
            }
            InstKind::Phi { args } => res.extend(args.iter().map(|&(u, _)| u)),
            InstKind::CondJump { lhs, rhs, .. } => {
                res.push(*lhs);
                res.push(*rhs);
            }
            InstKind::Jump { .. } | InstKind::Alloca { .. } | InstKind::Nop => {}
        }
        res
    }

    pub fn is_control(&self, v: Value) -> bool {
        matches!(
            self.inst(v).kind,
            InstKind::Branch { .. }
                | InstKind::Jump { .. }
                | InstKind::Return { .. }
                | InstKind::CondJump { .. }
        )
    }

    /// Has observable effects beyond its own result.
    pub fn has_side_effects(&self, v: Value) -> bool {
        match &self.inst(v).kind {
            InstKind::Store { .. } => true,
            InstKind::Call { func, .. } => !self.funcs[func.index()].is_pure,
            k => matches!(
                k,
                InstKind::Branch { .. }
                    | InstKind::Jump { .. }
                    | InstKind::Return { .. }
                    | InstKind::CondJump { .. }
            ),
        }
    }

    // Blocks

    pub fn block(&self, b: Block) -> &BlockData {
        &self.blocks[b.index()]
    }

    pub fn block_mut(&mut self, b: Block) -> &mut BlockData {
        &mut self.blocks[b.index()]
    }

    pub fn new_block(&mut self, f: FuncRef) -> Block {
        let b = self.new_block_detached(f);
        self.attach_block(f, b);
        b
    }

    /// Create a block that is not yet part of the function's layout; the
    /// builder uses this for join and latch blocks whose position is only
    /// known once the body in between has been built.
    pub fn new_block_detached(&mut self, f: FuncRef) -> Block {
        let b = Block(self.blocks.len() as u32);
        self.blocks.push(BlockData {
            id: u32::MAX,
            func: f,
            first: None,
            last: None,
            preds: Vec::new(),
            dom: Set::new(),
            idom: None,
            dom_children: Vec::new(),
            dom_depth: 0,
            df: Vec::new(),
            loop_idx: None,
            depth: 0,
            vis: false,
            is_once: false,
        });
        b
    }

    /// Append a detached block to the function layout and number it.
    pub fn attach_block(&mut self, f: FuncRef, b: Block) {
        debug_assert_eq!(self.blocks[b.index()].id, u32::MAX, "block attached twice");
        let id = self.funcs[f.index()].bb_cnt;
        self.funcs[f.index()].bb_cnt += 1;
        self.blocks[b.index()].id = id;
        self.funcs[f.index()].blocks.push(b);
    }

    pub fn first_inst(&self, b: Block) -> Option<Value> {
        self.block(b).first
    }

    pub fn last_inst(&self, b: Block) -> Option<Value> {
        self.block(b).last
    }

    pub fn next_inst(&self, v: Value) -> Option<Value> {
        self.inst(v).next
    }

    pub fn prev_inst(&self, v: Value) -> Option<Value> {
        self.inst(v).prev
    }

    /// The instructions of `b`, snapshotted.
    pub fn insts_of(&self, b: Block) -> Vec<Value> {
        let mut res = Vec::new();
        let mut cur = self.block(b).first;
        while let Some(i) = cur {
            res.push(i);
            cur = self.inst(i).next;
        }
        res
    }

    pub fn push_inst(&mut self, b: Block, v: Value) {
        let last = self.block(b).last;
        {
            let i = self.inst_mut(v);
            i.bb = b;
            i.prev = last;
            i.next = None;
        }
        match last {
            Some(l) => self.inst_mut(l).next = Some(v),
            None => self.block_mut(b).first = Some(v),
        }
        self.block_mut(b).last = Some(v);
    }

    pub fn push_front_inst(&mut self, b: Block, v: Value) {
        let first = self.block(b).first;
        {
            let i = self.inst_mut(v);
            i.bb = b;
            i.prev = None;
            i.next = first;
        }
        match first {
            Some(f) => self.inst_mut(f).prev = Some(v),
            None => self.block_mut(b).last = Some(v),
        }
        self.block_mut(b).first = Some(v);
    }

    /// Insert `v` immediately before `before`, which must be linked.
    pub fn insert_before(&mut self, before: Value, v: Value) {
        let b = self.inst(before).bb;
        let prev = self.inst(before).prev;
        {
            let i = self.inst_mut(v);
            i.bb = b;
            i.prev = prev;
            i.next = Some(before);
        }
        self.inst_mut(before).prev = Some(v);
        match prev {
            Some(p) => self.inst_mut(p).next = Some(v),
            None => self.block_mut(b).first = Some(v),
        }
    }

    /// Unlink `v` from its block without touching its uses.
    pub fn unlink_inst(&mut self, v: Value) {
        let Inst { bb, prev, next, .. } = *self.inst(v);
        match prev {
            Some(p) => self.inst_mut(p).next = next,
            None => self.block_mut(bb).first = next,
        }
        match next {
            Some(n) => self.inst_mut(n).prev = prev,
            None => self.block_mut(bb).last = prev,
        }
        let i = self.inst_mut(v);
        i.prev = None;
        i.next = None;
    }

    /// Unlink `v`, release its operand slots and tombstone it. The value
    /// must have no remaining users.
    pub fn erase_inst(&mut self, v: Value) {
        debug_assert!(!self.has_uses(v), "erasing {} which still has users", v);
        self.unlink_inst(v);
        for u in self.owned_uses(v) {
            self.unregister_use(u);
        }
        self.inst_mut(v).kind = InstKind::Nop;
    }

    /// Transfer the users of `v` to `n`, then erase `v`.
    pub fn erase_with(&mut self, v: Value, n: Value) {
        self.replace_uses(v, n);
        self.erase_inst(v);
    }

    /// Erase `v` even if used: survivors see Undef. Only unreachable code
    /// is dropped this way.
    pub fn erase_dangling(&mut self, v: Value) {
        if self.has_uses(v) {
            let undef = self.undef;
            self.replace_uses(v, undef);
        }
        self.erase_inst(v);
    }

    /// The control instruction terminating `b`.
    pub fn control_inst(&self, b: Block) -> Value {
        let last = self
            .block(b)
            .last
            .unwrap_or_else(|| panic!("{} is empty", b));
        debug_assert!(
            self.is_control(last),
            "{} ends with a non-branch instruction",
            b
        );
        last
    }

    pub fn succs(&self, b: Block) -> SmallVec<[Block; 2]> {
        let mut res = SmallVec::new();
        match &self.inst(self.control_inst(b)).kind {
            InstKind::Branch {
                then_bb, else_bb, ..
            }
            | InstKind::CondJump {
                then_bb, else_bb, ..
            } => {
                res.push(*then_bb);
                res.push(*else_bb);
            }
            InstKind::Jump { to } => res.push(*to),
            InstKind::Return { .. } => {}
            _ => unreachable!(),
        }
        res
    }

    /// Retarget every successor edge of `b` equal to `from` to `to`.
    pub fn replace_succ(&mut self, b: Block, from: Block, to: Block) {
        let c = self.control_inst(b);
        match &mut self.inst_mut(c).kind {
            InstKind::Branch {
                then_bb, else_bb, ..
            }
            | InstKind::CondJump {
                then_bb, else_bb, ..
            } => {
                if *then_bb == from {
                    *then_bb = to;
                }
                if *else_bb == from {
                    *else_bb = to;
                }
            }
            InstKind::Jump { to: t } => {
                if *t == from {
                    *t = to;
                }
            }
            _ => {}
        }
    }

    // Functions

    pub fn func(&self, f: FuncRef) -> &FuncData {
        &self.funcs[f.index()]
    }

    pub fn func_mut(&mut self, f: FuncRef) -> &mut FuncData {
        &mut self.funcs[f.index()]
    }

    pub fn add_func(&mut self, kind: FuncKind, name: Id, returns_int: bool, params: Vec<DeclRef>) -> FuncRef {
        let f = FuncRef(self.funcs.len() as u32);
        self.funcs.push(FuncData::new(kind, name, returns_int, params));
        f
    }

    pub fn decl(&self, d: DeclRef) -> &Decl {
        &self.decls[d.index()]
    }

    /// Total instruction count of a function; used by the fixed-point tests.
    pub fn inst_count(&self, f: FuncRef) -> usize {
        self.funcs[f.index()]
            .blocks
            .iter()
            .map(|&b| self.insts_of(b).len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;

    fn tiny_prog() -> (Program, FuncRef, Block) {
        let mut prog = Program::new(Vec::new(), Vec::new());
        let f = prog.add_func(FuncKind::User, id("f"), true, Vec::new());
        let bb = prog.new_block(f);
        (prog, f, bb)
    }

    #[test]
    fn use_lists_track_operands() {
        let (mut prog, _f, bb) = tiny_prog();
        let a = prog.const_of(3);
        let b = prog.const_of(4);
        let add = prog.new_binary(BinOp::Add, a, b);
        prog.push_inst(bb, add);
        let mul = prog.new_binary(BinOp::Mul, add, add);
        prog.push_inst(bb, mul);

        let uses = prog.uses_of(add);
        assert_eq!(uses.len(), 2);
        for u in &uses {
            assert_eq!(prog.use_data(*u).user, mul);
            assert_eq!(prog.used(*u), add);
        }

        // replace_uses leaves the definition userless.
        let c = prog.const_of(7);
        prog.replace_uses(add, c);
        assert!(!prog.has_uses(add));
        assert_eq!(prog.uses_of(c).len(), 2);
    }

    #[test]
    fn intrusive_list_ops() {
        let (mut prog, _f, bb) = tiny_prog();
        let z = prog.const_of(0);
        let i1 = prog.new_binary(BinOp::Add, z, z);
        let i2 = prog.new_binary(BinOp::Sub, z, z);
        let i3 = prog.new_binary(BinOp::Mul, z, z);
        prog.push_inst(bb, i1);
        prog.push_inst(bb, i3);
        prog.insert_before(i3, i2);
        assert_eq!(prog.insts_of(bb), vec![i1, i2, i3]);
        prog.unlink_inst(i2);
        assert_eq!(prog.insts_of(bb), vec![i1, i3]);
        prog.push_front_inst(bb, i2);
        assert_eq!(prog.insts_of(bb), vec![i2, i1, i3]);
    }

    #[test]
    fn consts_are_interned() {
        let mut prog = Program::new(Vec::new(), Vec::new());
        assert_eq!(prog.const_of(42), prog.const_of(42));
        assert_ne!(prog.const_of(0), prog.const_of(1));
    }

    #[test]
    fn relop_negation_and_swap() {
        use RelOp::*;
        for (op, neg) in [(Eq, Ne), (Lt, Ge), (Le, Gt)] {
            assert_eq!(op.invert(), neg);
            assert_eq!(neg.invert(), op);
        }
        assert_eq!(Lt.swap(), Gt);
        assert_eq!(Le.swap(), Ge);
        assert_eq!(Eq.swap(), Eq);
    }
}
