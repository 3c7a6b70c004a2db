//! The abstract syntax tree.
//!
//! Declarations live in a single arena on [Program] and are addressed by
//! [DeclRef]; statements and expressions refer to them by handle so the
//! middle end can take the arena over without back-pointers.

use derive_more::Display;

use crate::common::{entity_handle, Id};

entity_handle!(DeclRef, "d");
entity_handle!(FuncId, "f");

#[derive(Debug, Default)]
pub struct Program {
    /// Arena of every declaration in the translation unit.
    pub decls: Vec<Decl>,
    pub globals: Vec<DeclRef>,
    pub funcs: Vec<Func>,
    /// Format strings of the printf statements, in source order, without the
    /// surrounding quotes.  `Stmt::Printf` addresses this list.
    pub printfs: Vec<String>,
}

impl Program {
    pub fn decl(&self, d: DeclRef) -> &Decl {
        &self.decls[d.index()]
    }

    pub fn add_decl(&mut self, decl: Decl) -> DeclRef {
        let r = DeclRef(self.decls.len() as u32);
        self.decls.push(decl);
        r
    }
}

/// A variable or constant declaration.
#[derive(Debug)]
pub struct Decl {
    pub name: Id,
    pub is_const: bool,
    pub is_global: bool,
    pub has_init: bool,
    /// 0-, 1- or 2-dimensional; -1 denotes the unsized first dimension of an
    /// array parameter.
    pub dims: Vec<i32>,
    /// Flattened initializer expressions.
    pub init: Vec<Expr>,
    /// Initializer evaluated to words; filled for const and global decls.
    pub words: Vec<i32>,
    /// Data-segment base address, assigned when the machine program is laid
    /// out; meaningful for globals only.
    pub addr: u32,
}

impl Decl {
    pub fn new(name: Id, is_const: bool) -> Decl {
        Decl {
            name,
            is_const,
            is_global: false,
            has_init: false,
            dims: Vec::new(),
            init: Vec::new(),
            words: Vec::new(),
            addr: 0,
        }
    }

    pub fn is_array(&self) -> bool {
        !self.dims.is_empty()
    }

    /// Storage size in words.
    pub fn size(&self) -> u32 {
        debug_assert!(self.dims.len() <= 2);
        self.dims.iter().map(|&d| d as u32).product()
    }
}

#[derive(Debug)]
pub struct Func {
    pub name: Id,
    pub returns_int: bool,
    pub params: Vec<DeclRef>,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub struct LVal {
    pub var: DeclRef,
    pub idx: Vec<Expr>,
}

#[derive(Clone, Debug)]
pub enum Expr {
    Num(i32),
    LVal(LVal),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: FuncId,
        args: Vec<Expr>,
    },
}

#[derive(Debug)]
pub enum Stmt {
    Assign {
        lhs: LVal,
        rhs: Expr,
    },
    /// `lhs = getint();`
    GetInt {
        lhs: LVal,
    },
    Decl(Vec<DeclRef>),
    Expr(Expr),
    Empty,
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then_body: Box<Stmt>,
        else_body: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Printf {
        fmt: u32,
        args: Vec<Expr>,
    },
}

/// Binary operators as they appear in source. `And`/`Or` never survive IR
/// construction; the rest map one-to-one onto IR binaries.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Debug)]
pub enum BinOp {
    #[display("+")]
    Add,
    #[display("-")]
    Sub,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("%")]
    Mod,
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
    #[display("<=")]
    Le,
    #[display(">=")]
    Ge,
    #[display("==")]
    Eq,
    #[display("!=")]
    Ne,
    #[display("&&")]
    And,
    #[display("||")]
    Or,
}

/// Evaluate a constant expression.
///
/// Only the arithmetic operators may appear in constant contexts (array
/// dimensions, const and global initializers); anything else is a bug in the
/// caller, not a user error.
pub fn eval(decls: &[Decl], e: &Expr) -> i32 {
    match e {
        Expr::Num(v) => *v,
        Expr::Binary { op, lhs, rhs } => {
            let lh = eval(decls, lhs);
            let rh = eval(decls, rhs);
            match op {
                BinOp::Add => lh.wrapping_add(rh),
                BinOp::Sub => lh.wrapping_sub(rh),
                BinOp::Mul => lh.wrapping_mul(rh),
                BinOp::Div => lh / rh,
                BinOp::Mod => lh % rh,
                _ => panic!("evaluating on unexpected operator {}", op),
            }
        }
        Expr::LVal(lv) => {
            let var = &decls[lv.var.index()];
            if !var.is_const {
                panic!("evaluating on non-const variable {}", var.name);
            }
            if var.dims.len() != lv.idx.len() {
                panic!("mismatched index dims on {}", var.name);
            }
            if var.dims.is_empty() {
                var.words[0]
            } else {
                let mut idx = eval(decls, lv.idx.last().unwrap());
                if lv.idx.len() > 1 {
                    idx += eval(decls, &lv.idx[0]) * var.dims[1];
                }
                var.words[idx as usize]
            }
        }
        Expr::Call { .. } => panic!("evaluating on a call"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;

    #[test]
    fn eval_const_array() {
        let mut prog = Program::default();
        let mut d = Decl::new(id("a"), true);
        d.dims = vec![2, 3];
        d.words = vec![1, 2, 3, 4, 5, 6];
        let a = prog.add_decl(d);

        let e = Expr::Binary {
            op: BinOp::Mul,
            lhs: Box::new(Expr::LVal(LVal {
                var: a,
                idx: vec![Expr::Num(1), Expr::Num(2)],
            })),
            rhs: Box::new(Expr::Num(7)),
        };
        assert_eq!(eval(&prog.decls, &e), 42);
    }
}
