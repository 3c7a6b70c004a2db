//! Lowering from the AST to the SSA IR.
//!
//! Scalars still go through Alloca/Load/Store here; mem2reg promotes them
//! right after. Short-circuit `&&`/`||` become control flow plus a phi, so
//! no And/Or binary survives construction. Array offsets are kept in
//! elements; the back end scales them to bytes.

use crate::common::{id, Map};
use crate::front::ast::{self, BinOp, DeclRef, Expr, LVal, Stmt};
use crate::middle::ir::{eval_bin, Block, FuncKind, FuncRef, Program, Value};

struct Builder<'p> {
    prog: &'p mut Program,
    func: FuncRef,
    bb: Block,
    is_main: bool,
    /// (break target, continue target) of each enclosing `while`.
    loops: Vec<(Block, Block)>,
    /// Current IR binding of every declaration in scope: globals map to
    /// their address value, scalar locals and params to their alloca,
    /// array params to the incoming argument.
    values: Map<DeclRef, Value>,
}

impl<'p> Builder<'p> {
    fn push(&mut self, v: Value) -> Value {
        self.prog.push_inst(self.bb, v);
        v
    }

    fn new_bb(&mut self) -> Block {
        self.bb = self.prog.new_block(self.func);
        self.bb
    }

    fn attach(&mut self, bb: Block) {
        self.prog.attach_block(self.func, bb);
        self.bb = bb;
    }

    fn decl_value(&self, var: DeclRef) -> Value {
        *self
            .values
            .get(&var)
            .unwrap_or_else(|| panic!("{} has no storage yet", self.prog.decl(var).name))
    }

    /// `(base, offset)` for a fully-indexed access to `var`.
    fn resolve_idx(&mut self, var: DeclRef, idx: &[Expr]) -> (Value, Value) {
        let dims = self.prog.decl(var).dims.clone();
        debug_assert_eq!(idx.len(), dims.len());
        if idx.is_empty() {
            return (self.decl_value(var), self.prog.const_of(0));
        }
        let base = if idx.len() > 1 {
            self.unfold(var, &idx[0])
        } else {
            self.decl_value(var)
        };
        let off = self.build_expr(idx.last().unwrap());
        (base, off)
    }

    /// Address of row `i` of the two-dimensional array `var`.
    fn unfold(&mut self, var: DeclRef, row: &Expr) -> Value {
        let row_len = *self.prog.decl(var).dims.last().unwrap();
        let base = self.decl_value(var);
        let off = self.build_expr(row);
        let gep = self.prog.new_gep(var, base, off, row_len);
        self.push(gep)
    }

    fn build_lval(&mut self, lv: &LVal) -> Value {
        let dims_len = self.prog.decl(lv.var).dims.len();
        if lv.idx.len() == dims_len {
            let (base, off) = self.resolve_idx(lv.var, &lv.idx);
            let load = self.prog.new_load(lv.var, base, off);
            return self.push(load);
        }
        debug_assert!(lv.idx.len() < dims_len);
        debug_assert!(dims_len <= 2);
        if lv.idx.is_empty() {
            // The whole array, passed as an argument.
            return self.decl_value(lv.var);
        }
        self.unfold(lv.var, &lv.idx[0])
    }

    fn build_expr(&mut self, e: &Expr) -> Value {
        match e {
            Expr::Num(v) => self.prog.const_of(*v),
            Expr::LVal(lv) => self.build_lval(lv),
            Expr::Call { func, args } => {
                let f = self.prog.user_funcs[func.index()];
                self.build_call(f, args)
            }
            Expr::Binary { op, lhs, rhs } => self.build_binary(*op, lhs, rhs),
        }
    }

    fn build_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Value {
        let lh = self.build_expr(lhs);

        if op == BinOp::And || op == BinOp::Or {
            // bb:      br lh ? rh-chain : end   (mirrored for ||)
            // rh-end:  j end
            // end:     phi(bb: 0/1, rh-end: rh)
            let bb = self.bb;
            let bb_rh = self.new_bb();
            let rh = self.build_expr(rhs);
            let bb_rh_end = self.bb;
            let bb_end = self.new_bb();
            let jump = self.prog.new_jump(bb_end);
            self.prog.push_inst(bb_rh_end, jump);
            let phi = self.prog.new_phi();
            self.prog.push_front_inst(bb_end, phi);
            let (zero, one) = (self.prog.const_of(0), self.prog.const_of(1));
            let br = if op == BinOp::And {
                self.prog.phi_push(phi, zero, bb);
                self.prog.new_branch(lh, bb_rh, bb_end)
            } else {
                self.prog.phi_push(phi, one, bb);
                self.prog.new_branch(lh, bb_end, bb_rh)
            };
            self.prog.push_inst(bb, br);
            self.prog.phi_push(phi, rh, bb_rh_end);
            return phi;
        }

        let rh = self.build_expr(rhs);
        if let (Some(l), Some(r)) = (self.prog.as_const(lh), self.prog.as_const(rh)) {
            return self.prog.const_of(eval_bin(op, l, r));
        }

        // Identity folds; argument evaluation has no side effects in this
        // source subset, so dropping an operand is always legal.
        let lc = self.prog.as_const(lh);
        let rc = self.prog.as_const(rh);
        match op {
            BinOp::Add => {
                if lc == Some(0) {
                    return rh;
                }
                if rc == Some(0) {
                    return lh;
                }
            }
            BinOp::Sub => {
                if rc == Some(0) {
                    return lh;
                }
            }
            BinOp::Mul => {
                if lc == Some(0) || rc == Some(0) {
                    return self.prog.const_of(0);
                }
                if lc == Some(1) {
                    return rh;
                }
                if rc == Some(1) {
                    return lh;
                }
            }
            BinOp::Div => {
                if lc == Some(0) {
                    return self.prog.const_of(0);
                }
                if rc == Some(1) {
                    return lh;
                }
            }
            BinOp::Mod => {
                if lc == Some(0) || rc == Some(1) {
                    return self.prog.const_of(0);
                }
            }
            _ => {}
        }

        let bin = self.prog.new_binary(op, lh, rh);
        self.push(bin)
    }

    fn build_call(&mut self, f: FuncRef, args: &[Expr]) -> Value {
        let argv: Vec<Value> = args.iter().map(|a| self.build_expr(a)).collect();
        let call = self.prog.new_call(f, &argv);
        self.push(call)
    }

    fn build_assign(&mut self, lhs: &LVal, rhs: Value) {
        log::debug!(
            "assigning {} dims to {} ({} dims)",
            lhs.idx.len(),
            self.prog.decl(lhs.var).name,
            self.prog.decl(lhs.var).dims.len()
        );
        let (base, off) = self.resolve_idx(lhs.var, &lhs.idx);
        let store = self.prog.new_store(lhs.var, base, off, rhs);
        self.push(store);
    }

    fn build_stmt(&mut self, s: &Stmt) {
        match s {
            Stmt::Assign { lhs, rhs } => {
                let v = self.build_expr(rhs);
                self.build_assign(lhs, v);
            }

            Stmt::GetInt { lhs } => {
                let getint = self.prog.getint;
                let call = self.prog.new_call(getint, &[]);
                self.push(call);
                self.build_assign(lhs, call);
            }

            Stmt::Decl(vars) => {
                for &var in vars {
                    let alloca = self.prog.new_alloca(var);
                    self.push(alloca);
                    self.values.insert(var, alloca);
                    let decl = self.prog.decl(var);
                    if decl.has_init {
                        let scalar = decl.dims.is_empty();
                        let init = decl.init.clone();
                        for (i, e) in init.iter().enumerate() {
                            let v = self.build_expr(e);
                            let off = if scalar {
                                self.prog.const_of(0)
                            } else {
                                self.prog.const_of(i as i32)
                            };
                            let store = self.prog.new_store(var, alloca, off, v);
                            self.push(store);
                        }
                    }
                }
            }

            Stmt::Expr(e) => {
                self.build_expr(e);
            }

            Stmt::Empty => {}

            Stmt::Block(stmts) => {
                for st in stmts {
                    self.build_stmt(st);
                    if matches!(st, Stmt::Break | Stmt::Continue | Stmt::Return(_)) {
                        break;
                    }
                }
            }

            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let con = self.build_expr(cond);
                let bb = self.bb;
                let bb_then = self.new_bb();
                self.build_stmt(then_body);
                let bb_then_end = self.bb;

                if let Some(else_body) = else_body {
                    let bb_else = self.new_bb();
                    self.build_stmt(else_body);
                    let bb_else_end = self.bb;
                    let br = self.prog.new_branch(con, bb_then, bb_else);
                    self.prog.push_inst(bb, br);

                    let bb_end = self.new_bb();
                    let j1 = self.prog.new_jump(bb_end);
                    self.prog.push_inst(bb_then_end, j1);
                    let j2 = self.prog.new_jump(bb_end);
                    self.prog.push_inst(bb_else_end, j2);
                } else {
                    let bb_end = self.new_bb();
                    let j = self.prog.new_jump(bb_end);
                    self.prog.push_inst(bb_then_end, j);
                    let br = self.prog.new_branch(con, bb_then, bb_end);
                    self.prog.push_inst(bb, br);
                }
            }

            Stmt::While { cond, body } => {
                // br cond, loop, end
                // loop: body; j cont
                // cont: br cond, loop, end
                // end:
                let con = self.build_expr(cond);
                let bb = self.bb;

                let bb_loop = self.new_bb();
                let bb_cont = self.prog.new_block_detached(self.func);
                let bb_end = self.prog.new_block_detached(self.func);

                self.loops.push((bb_end, bb_cont));
                self.build_stmt(body);
                self.loops.pop();
                let bb_loop_end = self.bb;

                self.attach(bb_cont);
                let con2 = self.build_expr(cond);
                let bb_cont_end = self.bb;
                self.attach(bb_end);

                let br = self.prog.new_branch(con, bb_loop, bb_end);
                self.prog.push_inst(bb, br);
                let j = self.prog.new_jump(bb_cont);
                self.prog.push_inst(bb_loop_end, j);
                let br2 = self.prog.new_branch(con2, bb_loop, bb_end);
                self.prog.push_inst(bb_cont_end, br2);
            }

            Stmt::Break => {
                let to = self.loops.last().expect("break outside a loop").0;
                let j = self.prog.new_jump(to);
                self.push(j);
            }

            Stmt::Continue => {
                let to = self.loops.last().expect("continue outside a loop").1;
                let j = self.prog.new_jump(to);
                self.push(j);
            }

            Stmt::Return(val) => {
                let v = val.as_ref().map(|e| self.build_expr(e));
                let ret = self.prog.new_return(if self.is_main { None } else { v });
                self.push(ret);
            }

            Stmt::Printf { fmt, args } => {
                let f = self.prog.printf_funcs[*fmt as usize];
                self.build_call(f, args);
            }
        }
    }
}

/// Build the SSA program for a parsed translation unit.
pub fn build_ir(ast: ast::Program) -> Program {
    let ast::Program {
        decls,
        globals,
        funcs,
        printfs,
    } = ast;
    let mut prog = Program::new(decls, globals);

    let mut values = Map::new();
    for &g in &prog.globals.clone() {
        let v = prog.new_global(g);
        prog.global_value.insert(g, v);
        values.insert(g, v);
    }

    for fun in &funcs {
        let f = prog.add_func(
            FuncKind::User,
            fun.name,
            fun.returns_int,
            fun.params.clone(),
        );
        prog.user_funcs.push(f);
    }
    prog.getint = prog.add_func(FuncKind::GetInt, id("getint"), true, Vec::new());
    for fmt in printfs {
        let f = prog.add_func(FuncKind::Printf(fmt), id("printf"), false, Vec::new());
        prog.printf_funcs.push(f);
    }

    for (i, fun) in funcs.iter().enumerate() {
        let f = prog.user_funcs[i];
        let bb = prog.new_block(f);

        let mut builder_values = values.clone();
        for (pos, &param) in fun.params.iter().enumerate() {
            let arg = prog.new_arg(param, pos as u32);
            prog.func_mut(f).arg_values.push(arg);
            if prog.decl(param).dims.is_empty() {
                let alloca = prog.new_alloca(param);
                prog.push_inst(bb, alloca);
                let zero = prog.const_of(0);
                let store = prog.new_store(param, alloca, zero, arg);
                prog.push_inst(bb, store);
                builder_values.insert(param, alloca);
            } else {
                // Array names as parameters are never assigned to.
                builder_values.insert(param, arg);
            }
        }

        let is_main = fun.name.as_str() == "main";
        if is_main {
            prog.func_mut(f).returns_int = false;
        }

        let mut b = Builder {
            prog: &mut prog,
            func: f,
            bb,
            is_main,
            loops: Vec::new(),
            values: builder_values,
        };
        for st in &fun.body {
            b.build_stmt(st);
            if matches!(st, Stmt::Break | Stmt::Continue | Stmt::Return(_)) {
                break;
            }
        }

        // Guarantee a terminator on the last block.
        let last_bb = *prog.func(f).blocks.last().unwrap();
        let needs_ret = match prog.last_inst(last_bb) {
            Some(i) => !prog.is_control(i),
            None => true,
        };
        if needs_ret {
            let ret = prog.new_return(None);
            prog.push_inst(last_bb, ret);
        }
    }

    prog
}
