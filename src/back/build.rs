//! Lowering from the SSA IR to the machine IR.
//!
//! One machine block per IR block, in the same layout order, so
//! fall-through edges can be exploited while branches are emitted. Values
//! carry their machine result in a side table; constants stay immediates
//! until an instruction demands a register.
//!
//! Multiplication by a constant strength-reduces to shifts where possible;
//! division and remainder by a constant go through signed magic-number
//! multiplication instead of `div`.

use crate::back::magic::magic_s32;
use crate::back::mir::{
    is_imm, regs, BranchOp, Func, GlobData, MBlock, MInstData, Operand, Prog, MAX_ARG_REGS,
    DATA_BASE,
};
use crate::common::Map;
use crate::front::ast::BinOp;
use crate::middle::ir::{
    eval_bin, Block, FuncKind, FuncRef, InstKind, Program, RelOp, UseRef, Value, ValueData,
    INT_MAX, INT_MIN,
};

struct Lower<'p> {
    prog: &'p Program,
    mp: &'p mut Prog,
    mf: Func,
    bb_map: Map<Block, MBlock>,
    val_res: Map<Value, Operand>,
    /// Virtuals holding the first four arguments, captured in the entry.
    args: Vec<Operand>,
    cur: MBlock,
    /// Fall-through target of the block being lowered.
    next_mbb: Option<MBlock>,
}

impl<'p> Lower<'p> {
    fn push(&mut self, data: MInstData) -> crate::back::mir::MInst {
        self.mf.push(self.cur, data)
    }

    fn make_vreg(&mut self) -> Operand {
        self.mf.make_vreg()
    }

    fn move_to_reg(&mut self, src: Operand) -> Operand {
        let dst = self.make_vreg();
        self.push(MInstData::Move { dst, src });
        dst
    }

    /// Force an operand into a register, folding the well-known constants.
    fn ensure_reg(&mut self, x: Operand) -> Operand {
        debug_assert!(!x.is_void());
        if x.is_const() {
            if x.val == 0 {
                return Operand::zero();
            }
            if x.val as u32 == DATA_BASE {
                self.mp.gp_used = true;
                return Operand::machine(regs::GP);
            }
            return self.move_to_reg(x);
        }
        x
    }

    /// Binary whose rhs may be an out-of-range constant.
    fn new_binary(
        &mut self,
        op: crate::back::mir::BinOp,
        dst: Operand,
        lhs: Operand,
        mut rhs: Operand,
    ) -> crate::back::mir::MInst {
        debug_assert!(lhs.is_reg());
        debug_assert!(!rhs.is_void());
        if rhs.is_const() && !rhs.is_imm() {
            rhs = self.move_to_reg(rhs);
        }
        self.push(MInstData::Binary { op, dst, lhs, rhs })
    }

    fn new_syscall(&mut self, no: u32) {
        self.push(MInstData::Move {
            dst: Operand::machine(regs::V0),
            src: Operand::imm(no as i32),
        });
        self.push(MInstData::Sys { no });
    }

    /// The machine operand of an already-lowered value; never emits.
    fn val_operand(&self, v: Value) -> Operand {
        match &self.prog.val(v).data {
            ValueData::Const(c) => Operand::imm(*c),
            ValueData::Global(d) => Operand::imm(self.prog.decl(*d).addr as i32),
            ValueData::Undef => {
                log::warn!("undef value is used");
                Operand::zero()
            }
            ValueData::Arg { pos, .. } => {
                if (*pos as usize) < self.args.len() {
                    self.args[*pos as usize]
                } else {
                    *self
                        .val_res
                        .get(&v)
                        .expect("stack argument was loaded in the prologue")
                }
            }
            ValueData::Inst(_) => *self.val_res.get(&v).expect("operand lowered before use"),
        }
    }

    fn build_use(&self, u: UseRef) -> Operand {
        self.val_operand(self.prog.used(u))
    }

    fn neg_reg(&mut self, x: Operand) -> Operand {
        let dst = self.make_vreg();
        self.push(MInstData::Binary {
            op: crate::back::mir::BinOp::Sub,
            dst,
            lhs: Operand::zero(),
            rhs: x,
        });
        dst
    }

    /// lh * rh with rh constant: shifts for powers of two, `mult` otherwise.
    fn mul_by_const(&mut self, lh: Operand, rh: i32) -> Operand {
        use crate::back::mir::ShiftOp;
        debug_assert!(lh.is_reg());
        if rh == 0 {
            return Operand::imm(0);
        }
        if rh == 1 {
            return lh;
        }
        let neg = rh < 0;
        let rhu = rh.unsigned_abs();
        let dst = self.make_vreg();
        if rhu.is_power_of_two() {
            let w = rhu.trailing_zeros();
            self.push(MInstData::Shift {
                op: ShiftOp::Ll,
                dst,
                lhs: lh,
                rhs: w,
            });
            // -2^31 survives as-is: the shifted value already wraps right.
            if neg && rhu != rh as u32 {
                return self.neg_reg(dst);
            }
        } else {
            let rht = self.move_to_reg(Operand::imm(rh));
            self.push(MInstData::Mult { lhs: lh, rhs: rht });
            self.push(MInstData::MFLo { dst });
        }
        dst
    }

    /// lh / rh with rh constant, by magic-number multiplication.
    fn div_by_const(&mut self, n: Operand, d: i32) -> Operand {
        use crate::back::mir::{BinOp as M, ShiftOp};
        debug_assert!(n.is_reg());
        debug_assert_ne!(d, 0);
        if d == 1 {
            return n;
        }
        if d == -1 {
            return self.neg_reg(n);
        }
        let ad = d.unsigned_abs();
        if ad.is_power_of_two() {
            // q = (n + ((n >> 31) >>> (32 - k))) >> k
            let k = ad.trailing_zeros();
            let sign = self.make_vreg();
            self.push(MInstData::Shift {
                op: ShiftOp::Ra,
                dst: sign,
                lhs: n,
                rhs: 31,
            });
            let bias = self.make_vreg();
            self.push(MInstData::Shift {
                op: ShiftOp::Rl,
                dst: bias,
                lhs: sign,
                rhs: 32 - k,
            });
            let sum = self.make_vreg();
            self.push(MInstData::Binary {
                op: M::Add,
                dst: sum,
                lhs: n,
                rhs: bias,
            });
            let q = self.make_vreg();
            self.push(MInstData::Shift {
                op: ShiftOp::Ra,
                dst: q,
                lhs: sum,
                rhs: k,
            });
            if d < 0 {
                return self.neg_reg(q);
            }
            return q;
        }

        let m = magic_s32(d);
        let mt = self.move_to_reg(Operand::imm(m.mul_by));
        self.push(MInstData::Mult { lhs: n, rhs: mt });
        let mut q = self.make_vreg();
        self.push(MInstData::MFHi { dst: q });
        if d > 0 && m.mul_by < 0 {
            let t = self.make_vreg();
            self.push(MInstData::Binary {
                op: M::Add,
                dst: t,
                lhs: q,
                rhs: n,
            });
            q = t;
        }
        if d < 0 && m.mul_by > 0 {
            let t = self.make_vreg();
            self.push(MInstData::Binary {
                op: M::Sub,
                dst: t,
                lhs: q,
                rhs: n,
            });
            q = t;
        }
        if m.shift_by > 0 {
            let t = self.make_vreg();
            self.push(MInstData::Shift {
                op: ShiftOp::Ra,
                dst: t,
                lhs: q,
                rhs: m.shift_by as u32,
            });
            q = t;
        }
        let sign = self.make_vreg();
        self.push(MInstData::Shift {
            op: ShiftOp::Rl,
            dst: sign,
            lhs: q,
            rhs: 31,
        });
        let res = self.make_vreg();
        self.push(MInstData::Binary {
            op: M::Add,
            dst: res,
            lhs: q,
            rhs: sign,
        });
        res
    }

    /// lh % rh with rh constant: n - (n / d) * d.
    fn rem_by_const(&mut self, n: Operand, d: i32) -> Operand {
        use crate::back::mir::BinOp as M;
        if d == 1 || d == -1 {
            return Operand::imm(0);
        }
        let q = self.div_by_const(n, d);
        let p = self.mul_by_const(q, d);
        let r = self.make_vreg();
        self.push(MInstData::Binary {
            op: M::Sub,
            dst: r,
            lhs: n,
            rhs: p,
        });
        r
    }

    fn build_binary(&mut self, op: BinOp, lhs: UseRef, rhs: UseRef) -> Operand {
        use crate::back::mir::BinOp as M;
        let mut lh = self.build_use(lhs);
        let mut rh = self.build_use(rhs);
        let mut op = op;

        if lh.is_const() && rh.is_const() {
            return Operand::imm(eval_bin(op, lh.val, rh.val));
        }

        if op == BinOp::Div || op == BinOp::Mod {
            if rh.is_const() {
                if rh.val == 0 {
                    // Division by zero has no defined meaning; fold it the
                    // way the constant folder does.
                    return Operand::imm(0);
                }
                let n = self.ensure_reg(lh);
                return if op == BinOp::Div {
                    self.div_by_const(n, rh.val)
                } else {
                    self.rem_by_const(n, rh.val)
                };
            }
            let lhr = self.ensure_reg(lh);
            let rhr = self.ensure_reg(rh);
            self.push(MInstData::Div { lhs: lhr, rhs: rhr });
            let dst = self.make_vreg();
            if op == BinOp::Div {
                self.push(MInstData::MFLo { dst });
            } else {
                self.push(MInstData::MFHi { dst });
            }
            return dst;
        }

        if op == BinOp::Mul {
            if lh.is_const() {
                return self.mul_by_const(rh, lh.val);
            }
            if rh.is_const() {
                return self.mul_by_const(lh, rh.val);
            }
            self.push(MInstData::Mult { lhs: lh, rhs: rh });
            let dst = self.make_vreg();
            self.push(MInstData::MFLo { dst });
            return dst;
        }

        let dst = self.make_vreg();
        if lh.is_const() {
            // rh is a register; put the constant on the right when the
            // operator allows it.
            match op {
                BinOp::Sub => {
                    let t = self.move_to_reg(lh);
                    self.push(MInstData::Binary {
                        op: M::Sub,
                        dst,
                        lhs: t,
                        rhs: rh,
                    });
                    return dst;
                }
                BinOp::Gt => {
                    self.new_binary(M::Lt, dst, rh, lh);
                    return dst;
                }
                _ => {
                    std::mem::swap(&mut lh, &mut rh);
                    op = match op {
                        BinOp::Add | BinOp::Eq | BinOp::Ne => op,
                        BinOp::Lt => BinOp::Gt,
                        BinOp::Gt => BinOp::Lt,
                        BinOp::Le => BinOp::Ge,
                        BinOp::Ge => BinOp::Le,
                        _ => unreachable!("operator {} cannot be swapped", op),
                    };
                }
            }
        }

        // lh is a register from here on.
        match op {
            BinOp::Add => {
                self.new_binary(M::Add, dst, lh, rh);
                dst
            }
            BinOp::Sub => {
                if rh.is_const() {
                    // There is no subiu; negate the immediate. -INT_MIN is
                    // INT_MIN again, which addu handles modulo 2^32.
                    let rhs = if rh.val == INT_MIN {
                        self.move_to_reg(Operand::imm(INT_MIN))
                    } else {
                        Operand::imm(-rh.val)
                    };
                    self.new_binary(M::Add, dst, lh, rhs);
                } else {
                    self.push(MInstData::Binary {
                        op: M::Sub,
                        dst,
                        lhs: lh,
                        rhs: rh,
                    });
                }
                dst
            }
            BinOp::Lt => {
                self.new_binary(M::Lt, dst, lh, rh);
                dst
            }
            BinOp::Gt => {
                let rt = self.ensure_reg(rh);
                self.push(MInstData::Binary {
                    op: M::Lt,
                    dst,
                    lhs: rt,
                    rhs: lh,
                });
                dst
            }
            BinOp::Le => {
                // r1 <= r2 : !(r2 < r1);  r1 <= imm : r1 < imm + 1
                if rh.is_const() {
                    if rh.val == INT_MAX {
                        return Operand::imm(1);
                    }
                    self.new_binary(M::Lt, dst, lh, Operand::imm(rh.val + 1));
                } else {
                    let nt = self.make_vreg();
                    self.push(MInstData::Binary {
                        op: M::Lt,
                        dst: nt,
                        lhs: rh,
                        rhs: lh,
                    });
                    self.push(MInstData::Binary {
                        op: M::Xor,
                        dst,
                        lhs: nt,
                        rhs: Operand::imm(1),
                    });
                }
                dst
            }
            BinOp::Ge => {
                // !(r1 < rhs)
                let nt = self.make_vreg();
                self.new_binary(M::Lt, nt, lh, rh);
                self.push(MInstData::Binary {
                    op: M::Xor,
                    dst,
                    lhs: nt,
                    rhs: Operand::imm(1),
                });
                dst
            }
            BinOp::Eq => {
                let nt = self.make_vreg();
                self.new_binary(M::Xor, nt, lh, rh);
                self.push(MInstData::Binary {
                    op: M::Ltu,
                    dst,
                    lhs: nt,
                    rhs: Operand::imm(1),
                });
                dst
            }
            BinOp::Ne => {
                let nt = self.make_vreg();
                self.new_binary(M::Xor, nt, lh, rh);
                self.push(MInstData::Binary {
                    op: M::Ltu,
                    dst,
                    lhs: Operand::zero(),
                    rhs: nt,
                });
                dst
            }
            _ => unreachable!(),
        }
    }

    fn flush_literal(&mut self, buf: &mut String) {
        if buf.is_empty() {
            return;
        }
        if buf.len() == 1 || buf == "\\n" {
            let c = if buf.len() == 1 {
                buf.as_bytes()[0] as i32
            } else {
                b'\n' as i32
            };
            self.push(MInstData::Move {
                dst: Operand::machine(regs::A0),
                src: Operand::imm(c),
            });
            self.new_syscall(11);
        } else {
            let id = self.mp.find_str(buf);
            self.push(MInstData::LoadStr {
                dst: Operand::machine(regs::A0),
                id,
            });
            self.new_syscall(4);
        }
        buf.clear();
    }

    fn build_printf(&mut self, fmt: &str, args: &[UseRef]) {
        let bytes = fmt.as_bytes();
        let mut buf = String::new();
        let mut k = 0;
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' {
                // The format checker guarantees every % introduces %d.
                let arg = self.build_use(args[k]);
                k += 1;
                if arg.is_const() {
                    buf.push_str(&arg.val.to_string());
                } else {
                    self.flush_literal(&mut buf);
                    self.push(MInstData::Move {
                        dst: Operand::machine(regs::A0),
                        src: arg,
                    });
                    self.new_syscall(1);
                }
                i += 2;
            } else {
                buf.push(bytes[i] as char);
                i += 1;
            }
        }
        self.flush_literal(&mut buf);
    }

    fn build_call(&mut self, func: FuncRef, args: &[UseRef]) -> Operand {
        let callee = self.prog.func(func);
        match &callee.kind {
            FuncKind::GetInt => {
                self.new_syscall(5);
                self.move_to_reg(Operand::machine(regs::V0))
            }
            FuncKind::Printf(fmt) => {
                let fmt = fmt.clone();
                self.build_printf(&fmt, args);
                Operand::void()
            }
            FuncKind::User => {
                let n = args.len() as u32;
                if n > MAX_ARG_REGS {
                    self.mf.max_call_arg_num = self.mf.max_call_arg_num.max(n - MAX_ARG_REGS);
                }
                for (i, &u) in args.iter().enumerate() {
                    let arg = self.build_use(u);
                    if (i as u32) < MAX_ARG_REGS {
                        self.push(MInstData::Move {
                            dst: Operand::machine(regs::A0 + i as i32),
                            src: arg,
                        });
                    } else {
                        let src = self.ensure_reg(arg);
                        self.push(MInstData::Store {
                            src,
                            base: Operand::machine(regs::SP),
                            off: (i as i32 - MAX_ARG_REGS as i32) * 4,
                        });
                    }
                }
                let returns_int = callee.returns_int;
                let name = callee.name;
                self.push(MInstData::Call {
                    name,
                    arg_regs: n.min(MAX_ARG_REGS),
                });
                if returns_int {
                    self.move_to_reg(Operand::machine(regs::V0))
                } else {
                    Operand::void()
                }
            }
        }
    }

    /// `(base register, byte offset)` for a load or store; element offsets
    /// are scaled here, and constant addresses fold onto `$0` or `$gp`.
    fn resolve_mem(&mut self, base: Operand, off: Operand) -> (Operand, i32) {
        use crate::back::mir::{BinOp as M, ShiftOp};
        if off.is_const() {
            let obytes = off.val.wrapping_mul(4);
            if base.is_const() {
                let d = base.val.wrapping_add(obytes);
                if !is_imm(d) {
                    let rel = (d as u32).wrapping_sub(DATA_BASE) as i32;
                    if is_imm(rel) {
                        self.mp.gp_used = true;
                        return (Operand::machine(regs::GP), rel);
                    }
                }
                return (Operand::zero(), d);
            }
            return (base, obytes);
        }
        let t = self.make_vreg();
        self.push(MInstData::Shift {
            op: ShiftOp::Ll,
            dst: t,
            lhs: off,
            rhs: 2,
        });
        if base.is_const() {
            // Big offsets on a register base; MARS assembles them.
            return (t, base.val);
        }
        let t2 = self.make_vreg();
        self.push(MInstData::Binary {
            op: M::Add,
            dst: t2,
            lhs: base,
            rhs: t,
        });
        (t2, 0)
    }

    fn build_inst(&mut self, i: Value) -> Operand {
        use crate::back::mir::BinOp as M;
        match &self.prog.inst(i).kind {
            InstKind::Binary { op, lhs, rhs } => self.build_binary(*op, *lhs, *rhs),

            InstKind::Call { func, args } => {
                let args: Vec<UseRef> = args.iter().copied().collect();
                self.build_call(*func, &args)
            }

            InstKind::Branch {
                cond,
                then_bb,
                else_bb,
            } => {
                let con = self.build_use(*cond);
                let then_m = self.bb_map[then_bb];
                let else_m = self.bb_map[else_bb];
                if con.is_const() {
                    let to = if con.val != 0 { then_m } else { else_m };
                    if self.next_mbb != Some(to) {
                        self.push(MInstData::Jump { to });
                    }
                } else if self.next_mbb == Some(then_m) {
                    self.push(MInstData::Branch {
                        op: BranchOp::Eq,
                        lhs: con,
                        rhs: Operand::zero(),
                        to: else_m,
                    });
                } else {
                    self.push(MInstData::Branch {
                        op: BranchOp::Ne,
                        lhs: con,
                        rhs: Operand::zero(),
                        to: then_m,
                    });
                    if self.next_mbb != Some(else_m) {
                        self.push(MInstData::Jump { to: else_m });
                    }
                }
                Operand::void()
            }

            InstKind::Jump { to } => {
                let to = self.bb_map[to];
                if self.next_mbb != Some(to) {
                    self.push(MInstData::Jump { to });
                }
                Operand::void()
            }

            InstKind::Return { val } => {
                if self.mf.returns_int {
                    let v = val.expect("int function returns a value");
                    let src = self.build_use(v);
                    self.push(MInstData::Move {
                        dst: Operand::machine(regs::V0),
                        src,
                    });
                }
                self.push(MInstData::Return);
                Operand::void()
            }

            InstKind::Load { base, off, .. } => {
                let base = self.build_use(*base);
                let off = self.build_use(*off);
                let dst = self.make_vreg();
                let (b, boff) = self.resolve_mem(base, off);
                self.push(MInstData::Load {
                    dst,
                    base: b,
                    off: boff,
                });
                dst
            }

            InstKind::Store { base, off, val, .. } => {
                let base = self.build_use(*base);
                let off = self.build_use(*off);
                let v = self.build_use(*val);
                let src = self.ensure_reg(v);
                let (b, boff) = self.resolve_mem(base, off);
                self.push(MInstData::Store {
                    src,
                    base: b,
                    off: boff,
                });
                Operand::void()
            }

            InstKind::Gep {
                base, off, size, ..
            } => {
                let base = self.build_use(*base);
                let off = self.build_use(*off);
                let stride = size.wrapping_mul(4);
                if off.is_const() {
                    let obytes = off.val.wrapping_mul(stride);
                    if base.is_const() {
                        return Operand::imm(base.val.wrapping_add(obytes));
                    }
                    let dst = self.make_vreg();
                    self.new_binary(M::Add, dst, base, Operand::imm(obytes));
                    return dst;
                }
                let ot = self.mul_by_const(off, stride);
                let dst = self.make_vreg();
                self.new_binary(M::Add, dst, ot, base);
                dst
            }

            InstKind::Alloca { var } => {
                let dst = self.make_vreg();
                let add = self.new_binary(
                    M::Add,
                    dst,
                    Operand::machine(regs::SP),
                    Operand::imm(self.mf.alloca_num as i32),
                );
                self.mf.allocas.push(add);
                self.mf.alloca_num += self.prog.decl(*var).size();
                dst
            }

            InstKind::Phi { .. } => {
                // Resolved after the whole function is lowered; reserve the
                // result register now.
                self.make_vreg()
            }

            InstKind::CondJump {
                op,
                lhs,
                rhs,
                then_bb,
                else_bb,
            } => {
                self.build_cond_jump(*op, *lhs, *rhs, *then_bb, *else_bb);
                Operand::void()
            }

            InstKind::Nop => unreachable!("tombstone reached lowering"),
        }
    }

    fn build_cond_jump(&mut self, op: RelOp, lhs: UseRef, rhs: UseRef, then_bb: Block, else_bb: Block) {
        use crate::back::mir::BinOp as M;
        let mut lh = self.build_use(lhs);
        let mut rh = self.build_use(rhs);
        let mut op = op;
        let then_m = self.bb_map[&then_bb];
        let else_m = self.bb_map[&else_bb];

        let is_zeroish = |x: Operand| x.is_const() || (x.is_machine() && x.val == regs::ZERO);
        if is_zeroish(lh) {
            std::mem::swap(&mut lh, &mut rh);
            op = op.swap();
        }
        if is_zeroish(lh) {
            // Both sides decided; this only happens when the folding passes
            // were skipped.
            let lv = if lh.is_const() { lh.val } else { 0 };
            let rv = if rh.is_const() { rh.val } else { 0 };
            let to = if op.eval(lv, rv) { then_m } else { else_m };
            if self.next_mbb != Some(to) {
                self.push(MInstData::Jump { to });
            }
            return;
        }

        let r0 = Operand::zero();
        let to = then_m;
        let br: MInstData = if rh.val == 0 && (rh.is_const() || rh.is_machine()) {
            MInstData::BranchZero { op, lhs: lh, to }
        } else if rh.is_reg() {
            match op {
                RelOp::Eq => MInstData::Branch {
                    op: BranchOp::Eq,
                    lhs: lh,
                    rhs: rh,
                    to,
                },
                RelOp::Ne => MInstData::Branch {
                    op: BranchOp::Ne,
                    lhs: lh,
                    rhs: rh,
                    to,
                },
                _ => {
                    // Lt: lh < rh      Le: !(rh < lh)
                    // Gt: rh < lh      Ge: !(lh < rh)
                    let t = self.make_vreg();
                    if op == RelOp::Lt || op == RelOp::Ge {
                        self.push(MInstData::Binary {
                            op: M::Lt,
                            dst: t,
                            lhs: lh,
                            rhs: rh,
                        });
                    } else {
                        self.push(MInstData::Binary {
                            op: M::Lt,
                            dst: t,
                            lhs: rh,
                            rhs: lh,
                        });
                    }
                    MInstData::Branch {
                        op: if op == RelOp::Lt || op == RelOp::Gt {
                            BranchOp::Ne
                        } else {
                            BranchOp::Eq
                        },
                        lhs: t,
                        rhs: r0,
                        to,
                    }
                }
            }
        } else {
            debug_assert!(rh.is_const());
            match (rh.val, op) {
                (1, RelOp::Lt) => MInstData::BranchZero {
                    op: RelOp::Le,
                    lhs: lh,
                    to,
                },
                (1, RelOp::Ge) => MInstData::BranchZero {
                    op: RelOp::Gt,
                    lhs: lh,
                    to,
                },
                (-1, RelOp::Le) => MInstData::BranchZero {
                    op: RelOp::Lt,
                    lhs: lh,
                    to,
                },
                (-1, RelOp::Gt) => MInstData::BranchZero {
                    op: RelOp::Ge,
                    lhs: lh,
                    to,
                },
                _ => {
                    if op == RelOp::Eq || op == RelOp::Ne {
                        // li then beq beats xor then sltiu here.
                        let t = self.move_to_reg(rh);
                        MInstData::Branch {
                            op: if op == RelOp::Eq {
                                BranchOp::Eq
                            } else {
                                BranchOp::Ne
                            },
                            lhs: lh,
                            rhs: t,
                            to,
                        }
                    } else {
                        // lh < c : slti c     lh <= c : slti c+1
                        // lh >= c : !slti c   lh > c  : !slti c+1
                        let t = self.make_vreg();
                        if op == RelOp::Lt || op == RelOp::Ge {
                            self.new_binary(M::Lt, t, lh, Operand::imm(rh.val));
                        } else {
                            debug_assert_ne!(rh.val, INT_MAX);
                            self.new_binary(M::Lt, t, lh, Operand::imm(rh.val + 1));
                        }
                        MInstData::Branch {
                            op: if op == RelOp::Lt || op == RelOp::Le {
                                BranchOp::Ne
                            } else {
                                BranchOp::Eq
                            },
                            lhs: t,
                            rhs: r0,
                            to,
                        }
                    }
                }
            }
        };

        if self.next_mbb == Some(then_m) {
            let br = invert_branch(br, else_m);
            self.push(br);
        } else {
            self.push(br);
            if self.next_mbb != Some(else_m) {
                self.push(MInstData::Jump { to: else_m });
            }
        }
    }
}

fn invert_branch(br: MInstData, new_to: MBlock) -> MInstData {
    match br {
        MInstData::Branch { op, lhs, rhs, .. } => MInstData::Branch {
            op: op.invert(),
            lhs,
            rhs,
            to: new_to,
        },
        MInstData::BranchZero { op, lhs, .. } => MInstData::BranchZero {
            op: op.invert(),
            lhs,
            to: new_to,
        },
        _ => unreachable!(),
    }
}

fn lower_func(prog: &Program, mp: &mut Prog, f: FuncRef) -> Func {
    let func = prog.func(f);
    let is_main = func.name.as_str() == "main";
    let mut mf = Func::new(func.name, is_main, func.returns_int);

    let mut bb_map = Map::new();
    for &bb in &func.blocks {
        let m = mf.new_block();
        mf.block_mut(m).loop_depth = prog.block(bb).depth;
        bb_map.insert(bb, m);
    }
    let entry_m = bb_map[&func.blocks[0]];

    // Capture the register arguments into fresh virtuals, then load any
    // stack arguments once. Both live in the entry so the definitions
    // dominate every use; dead loads fall to the machine DCE.
    let mut args = Vec::new();
    let n_reg_args = (func.params.len() as u32).min(MAX_ARG_REGS) as usize;
    for i in 0..n_reg_args {
        let dst = mf.make_vreg();
        mf.push(
            entry_m,
            MInstData::Move {
                dst,
                src: Operand::machine(regs::A0 + i as i32),
            },
        );
        args.push(dst);
    }
    let mut val_res: Map<Value, Operand> = Map::new();
    for pos in n_reg_args..func.params.len() {
        let dst = mf.make_vreg();
        let load = mf.push(
            entry_m,
            MInstData::Load {
                dst,
                base: Operand::machine(regs::SP),
                // Placeholder offset: the argument's position; reg_restore
                // rewrites it once the frame size is known.
                off: pos as i32,
            },
        );
        mf.arg_loads.push(load);
        val_res.insert(func.arg_values[pos], dst);
    }

    let mut lower = Lower {
        prog,
        mp,
        mf,
        bb_map,
        val_res,
        args,
        cur: entry_m,
        next_mbb: None,
    };

    let blocks = func.blocks.clone();
    for (k, &ibb) in blocks.iter().enumerate() {
        lower.cur = lower.bb_map[&ibb];
        lower.next_mbb = blocks.get(k + 1).map(|b| lower.bb_map[b]);
        for i in prog.insts_of(ibb) {
            let res = lower.build_inst(i);
            lower.val_res.insert(i, res);
        }
    }

    // Phi resolution: a rendezvous virtual per phi, written at the end of
    // every incoming block and read into the phi's register at the top of
    // its own. This transiently leaves extra copies behind terminators;
    // bb_normalize repairs the block shape right after.
    for &ibb in &blocks {
        let mbb = lower.bb_map[&ibb];
        let head = lower.mf.first_inst(mbb);
        for i in prog.insts_of(ibb) {
            let InstKind::Phi { ref args } = prog.inst(i).kind else {
                break;
            };
            let t = lower.mf.make_vreg();
            let phi_res = lower.val_res[&i];
            let mv = MInstData::Move {
                dst: phi_res,
                src: t,
            };
            match head {
                Some(h) => {
                    lower.mf.insert_before(h, mv);
                }
                None => {
                    lower.mf.push(mbb, mv);
                }
            }
            for &(u, pred) in args.iter() {
                let val = prog.used(u);
                if matches!(prog.val(val).data, ValueData::Undef) {
                    continue;
                }
                let src = lower.val_operand(val);
                let ubb = lower.bb_map[&pred];
                let mut placed = false;
                for j in lower.mf.insts_of(ubb) {
                    let target = match *lower.mf.inst(j) {
                        MInstData::Branch { to, .. }
                        | MInstData::BranchZero { to, .. }
                        | MInstData::Jump { to } => Some(to),
                        _ => None,
                    };
                    if target == Some(mbb) {
                        lower.mf.insert_before(j, MInstData::Move { dst: t, src });
                        placed = true;
                        break;
                    }
                }
                if !placed && lower.mf.next_block(ubb) == Some(mbb) {
                    lower.mf.push(ubb, MInstData::Move { dst: t, src });
                }
            }
        }
    }

    // Alloca offsets sit after the outgoing-argument area, whose size is
    // only known now.
    let max_args = lower.mf.max_call_arg_num;
    for a in lower.mf.allocas.clone() {
        if lower.mf.is_removed(a) {
            continue;
        }
        if let MInstData::Binary { rhs, .. } = lower.mf.inst_mut(a) {
            debug_assert!(rhs.is_const());
            rhs.val = ((max_args + rhs.val as u32) * 4) as i32;
        }
    }

    lower.mf
}

/// Lay out the data segment and lower every function.
pub fn build_mr(prog: &mut Program) -> Prog {
    let mut data = DATA_BASE;
    let mut globs = Vec::new();
    for g in prog.globals.clone() {
        prog.decls[g.index()].addr = data;
        let d = prog.decl(g);
        log::info!("addr of {} is {:#x}", d.name, data);
        globs.push(GlobData {
            name: d.name,
            init: if d.has_init {
                Some(d.words.clone())
            } else {
                None
            },
            size_words: d.size(),
            addr: data,
        });
        data += d.size() * 4;
    }

    let mut mp = Prog::new(globs, data);
    for f in prog.user_funcs.clone() {
        let mf = lower_func(prog, &mut mp, f);
        mp.funcs.push(mf);
    }
    mp
}
