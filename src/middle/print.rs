//! Textual dumps of the SSA IR, for the staged dump files and `--emit ir`.

use std::fmt;

use crate::common::Map;
use crate::middle::ir::{FuncKind, FuncRef, InstKind, Program, RelOp, Value, ValueData};

fn rel_repr(op: RelOp) -> &'static str {
    match op {
        RelOp::Eq => "==",
        RelOp::Ne => "!=",
        RelOp::Lt => "<",
        RelOp::Ge => ">=",
        RelOp::Le => "<=",
        RelOp::Gt => ">",
    }
}

struct FuncPrinter<'p> {
    prog: &'p Program,
    ids: Map<Value, u32>,
}

impl<'p> FuncPrinter<'p> {
    fn new(prog: &'p Program, f: FuncRef) -> Self {
        let mut ids = Map::new();
        for &bb in &prog.func(f).blocks {
            for i in prog.insts_of(bb) {
                let n = ids.len() as u32;
                ids.insert(i, n);
            }
        }
        FuncPrinter { prog, ids }
    }

    fn val(&self, v: Value) -> String {
        match &self.prog.val(v).data {
            ValueData::Const(c) => c.to_string(),
            ValueData::Global(d) => format!("@{}", self.prog.decl(*d).name),
            ValueData::Arg { var, .. } => format!("{}", self.prog.decl(*var).name),
            ValueData::Undef => "undef".into(),
            ValueData::Inst(_) => match self.ids.get(&v) {
                Some(n) => format!("%{}", n),
                None => format!("%?{}", v.0),
            },
        }
    }

    fn inst(&self, f: &mut fmt::Formatter<'_>, i: Value) -> fmt::Result {
        let prog = self.prog;
        let name = self.val(i);
        match &prog.inst(i).kind {
            InstKind::Binary { op, lhs, rhs } => writeln!(
                f,
                "    {} = {} {} {}",
                name,
                self.val(prog.used(*lhs)),
                op,
                self.val(prog.used(*rhs))
            ),
            InstKind::Call { func, args } => {
                let args: Vec<String> = args
                    .iter()
                    .map(|&u| self.val(prog.used(u)))
                    .collect();
                let callee = prog.func(*func);
                let call = format!("call {}({})", callee.name, args.join(", "));
                if callee.returns_int {
                    writeln!(f, "    {} = {}", name, call)
                } else {
                    writeln!(f, "    {}", call)
                }
            }
            InstKind::Branch {
                cond,
                then_bb,
                else_bb,
            } => writeln!(
                f,
                "    br {} ? {} : {}",
                self.val(prog.used(*cond)),
                bb_name(prog, *then_bb),
                bb_name(prog, *else_bb)
            ),
            InstKind::Jump { to } => writeln!(f, "    j {}", bb_name(prog, *to)),
            InstKind::Return { val } => match val {
                Some(u) => writeln!(f, "    ret {}", self.val(prog.used(*u))),
                None => writeln!(f, "    ret"),
            },
            InstKind::Alloca { var } => {
                writeln!(f, "    {} = alloca {}", name, prog.decl(*var).name)
            }
            InstKind::Load { var, base, off } => writeln!(
                f,
                "    {} = load {} {}[{}]",
                name,
                prog.decl(*var).name,
                self.val(prog.used(*base)),
                self.val(prog.used(*off))
            ),
            InstKind::Store {
                var,
                base,
                off,
                val,
            } => writeln!(
                f,
                "    store {} {}[{}], {}",
                prog.decl(*var).name,
                self.val(prog.used(*base)),
                self.val(prog.used(*off)),
                self.val(prog.used(*val))
            ),
            InstKind::Gep {
                var,
                base,
                off,
                size,
            } => writeln!(
                f,
                "    {} = gep {} {} + {} * {}",
                name,
                prog.decl(*var).name,
                self.val(prog.used(*base)),
                self.val(prog.used(*off)),
                size
            ),
            InstKind::Phi { args } => {
                let parts: Vec<String> = args
                    .iter()
                    .map(|&(u, bb)| {
                        format!("[{}: {}]", bb_name(prog, bb), self.val(prog.used(u)))
                    })
                    .collect();
                writeln!(f, "    {} = phi {}", name, parts.join(" "))
            }
            InstKind::CondJump {
                op,
                lhs,
                rhs,
                then_bb,
                else_bb,
            } => writeln!(
                f,
                "    br {} {} {} ? {} : {}",
                self.val(prog.used(*lhs)),
                rel_repr(*op),
                self.val(prog.used(*rhs)),
                bb_name(prog, *then_bb),
                bb_name(prog, *else_bb)
            ),
            InstKind::Nop => writeln!(f, "    nop"),
        }
    }
}

fn bb_name(prog: &Program, bb: crate::middle::ir::Block) -> String {
    format!("$L{}", prog.block(bb).id)
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &g in &self.globals {
            let decl = self.decl(g);
            if decl.is_const {
                write!(f, "const ")?;
            }
            write!(f, "int {}", decl.name)?;
            for d in &decl.dims {
                write!(f, "[{}]", d)?;
            }
            if !decl.words.is_empty() {
                let words: Vec<String> = decl.words.iter().map(|w| w.to_string()).collect();
                write!(f, " = {{{}}}", words.join(", "))?;
            }
            writeln!(f)?;
        }
        writeln!(f)?;

        for &fr in &self.user_funcs {
            let func = self.func(fr);
            debug_assert!(matches!(func.kind, FuncKind::User));
            let ret = if func.returns_int { "int" } else { "void" };
            let params: Vec<String> = func
                .params
                .iter()
                .map(|&p| self.decl(p).name.to_string())
                .collect();
            writeln!(f, "{} {}({}) {{", ret, func.name, params.join(", "))?;
            let printer = FuncPrinter::new(self, fr);
            for &bb in &func.blocks {
                writeln!(f, "{}:", bb_name(self, bb))?;
                for i in self.insts_of(bb) {
                    printer.inst(f, i)?;
                }
            }
            writeln!(f, "}}")?;
            writeln!(f)?;
        }
        Ok(())
    }
}
