//! The parser.
//!
//! Recursive descent over the token slice. Diagnostics are pushed into a
//! [Reporter]; the three "missing closer" kinds (`;` `)` `]`) are recovered
//! from in place, everything else aborts the enclosing tentative parse.
//! Tentative parses (assignment-vs-expression, `return` with an optional
//! value, call argument lists) use an explicit checkpoint: the token cursor
//! and the reporter mask depth are saved and restored on failure.

use crate::common::{id, Id};
use crate::front::ast::*;
use crate::front::errors::{ErrorKind, Reporter};
use crate::front::lex::{Token, TokenKind};
use crate::front::symbol::{Symbol, SymbolTable};

/// A hard syntax failure; unwinds to the nearest tentative-parse handler.
#[derive(Debug)]
pub struct Abort;

type PResult<T> = Result<T, Abort>;

pub struct Parser<'a, 'src> {
    toks: &'a [Token<'src>],
    pos: usize,
    prog: Program,
    syms: SymbolTable,
    reporter: &'a mut Reporter,
    cur_returns_int: bool,
    while_depth: u32,
}

/// Binary operator precedence tiers; 0 means "not a binary operator".
fn level(kind: TokenKind) -> u8 {
    use TokenKind::*;
    match kind {
        Mul | Div | Mod => 1,
        Add | Sub => 2,
        Le | Ge | Lt | Gt => 3,
        Eq | Ne => 4,
        And => 5,
        Or => 6,
        _ => 0,
    }
}

const LEVEL_ADD: u8 = 2;
const LEVEL_OR: u8 = 6;

fn bin_op(kind: TokenKind) -> BinOp {
    use TokenKind::*;
    match kind {
        Add => BinOp::Add,
        Sub => BinOp::Sub,
        Mul => BinOp::Mul,
        Div => BinOp::Div,
        Mod => BinOp::Mod,
        Lt => BinOp::Lt,
        Gt => BinOp::Gt,
        Le => BinOp::Le,
        Ge => BinOp::Ge,
        Eq => BinOp::Eq,
        Ne => BinOp::Ne,
        And => BinOp::And,
        Or => BinOp::Or,
        _ => panic!("token {} is not a binary operator", kind),
    }
}

impl<'a, 'src> Parser<'a, 'src> {
    fn new(toks: &'a [Token<'src>], reporter: &'a mut Reporter) -> Self {
        Parser {
            toks,
            pos: 0,
            prog: Program::default(),
            syms: SymbolTable::new(),
            reporter,
            cur_returns_int: false,
            while_depth: 0,
        }
    }

    // Token-cursor helpers

    fn peek(&self) -> PResult<Token<'src>> {
        self.toks.get(self.pos).copied().ok_or(Abort)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.toks.get(self.pos).is_some_and(|t| t.is_a(kind))
    }

    fn at_nth(&self, n: usize, kind: TokenKind) -> bool {
        self.toks.get(self.pos + n).is_some_and(|t| t.is_a(kind))
    }

    fn bump(&mut self) -> Token<'src> {
        let t = self.toks[self.pos];
        log::trace!("getting token {} at ln {}", t, t.line);
        self.pos += 1;
        t
    }

    fn try_get(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            return true;
        }
        false
    }

    /// Line of the last consumed token.
    fn prev_line(&self) -> u32 {
        if self.pos == 0 {
            1
        } else {
            self.toks[self.pos - 1].line
        }
    }

    /// Consume `kind`, recovering from a missing `;` `)` `]` by reporting
    /// the lettered error at the previous token's line.
    fn expect(&mut self, kind: TokenKind) -> PResult<()> {
        if self.at(kind) {
            self.bump();
            return Ok(());
        }
        let err = match kind {
            TokenKind::Semi => ErrorKind::MissingSemi,
            TokenKind::RPar => ErrorKind::MissingRPar,
            TokenKind::RBrk => ErrorKind::MissingRBrk,
            _ => return Err(Abort),
        };
        self.reporter.push(err, self.prev_line());
        Ok(())
    }

    /// Consume `kind` and return the token; no recovery.
    fn expect_tok(&mut self, kind: TokenKind) -> PResult<Token<'src>> {
        if self.at(kind) {
            return Ok(self.bump());
        }
        Err(Abort)
    }

    // Tentative parsing

    fn checkpoint(&mut self) -> (usize, usize) {
        self.reporter.mask_push();
        (self.pos, self.reporter.mask_depth())
    }

    fn resolve(&mut self) {
        self.reporter.mask_resolve();
    }

    fn reject(&mut self, cp: (usize, usize)) {
        self.pos = cp.0;
        while self.reporter.mask_depth() >= cp.1 {
            self.reporter.mask_reject();
        }
    }

    // Symbols

    fn insert_symbol(&mut self, name: Id, sym: Symbol, ident: Token) {
        if !self.syms.insert(name, sym) {
            self.reporter.push(ErrorKind::Redefined, ident.line);
        }
    }

    fn find_var(&mut self, ident: Token) -> DeclRef {
        match self.syms.find(id(ident.text)) {
            Some(Symbol::Var(d)) => d,
            Some(Symbol::Func(_)) => panic!("symbol {} is not a variable", ident.text),
            None => {
                self.reporter.push(ErrorKind::Undeclared, ident.line);
                // Keep the tree well-formed; errors suppress lowering.
                self.prog.add_decl(Decl::new(id(ident.text), false))
            }
        }
    }

    fn find_func(&mut self, ident: Token) -> Option<FuncId> {
        match self.syms.find(id(ident.text)) {
            Some(Symbol::Func(f)) => Some(f),
            Some(Symbol::Var(_)) => panic!("symbol {} is not a function", ident.text),
            None => {
                self.reporter.push(ErrorKind::Undeclared, ident.line);
                None
            }
        }
    }

    // CompUnit → {Decl} {FuncDef} MainFuncDef

    fn comp_unit(&mut self) -> PResult<()> {
        loop {
            if self.at(TokenKind::Const) {
                let decls = self.const_decl()?;
                self.mark_globals(decls);
            } else if self.at_nth(2, TokenKind::LPar) {
                break;
            } else {
                let decls = self.var_decl()?;
                self.mark_globals(decls);
            }
        }

        loop {
            if self.at_nth(1, TokenKind::Main) {
                let main = self.main_func_def()?;
                self.prog.funcs.push(main);
                break;
            }
            let func = self.func_def()?;
            self.prog.funcs.push(func);
        }
        Ok(())
    }

    fn mark_globals(&mut self, decls: Vec<DeclRef>) {
        for d in decls {
            let decl = &mut self.prog.decls[d.index()];
            decl.is_global = true;
            if !decl.is_const {
                // Const decls are evaluated at their definition; global
                // variables get the same treatment here since their
                // initializers must be constant expressions too.
                Self::eval_init(&mut self.prog.decls, d);
            }
            self.prog.globals.push(d);
        }
    }

    fn eval_init(decls: &mut Vec<Decl>, d: DeclRef) {
        let init = std::mem::take(&mut decls[d.index()].init);
        let words: Vec<i32> = init.iter().map(|e| eval(decls, e)).collect();
        let decl = &mut decls[d.index()];
        decl.init = init;
        decl.words = words;
    }

    fn const_decl(&mut self) -> PResult<Vec<DeclRef>> {
        self.expect_tok(TokenKind::Const)?;
        self.expect_tok(TokenKind::Int)?;
        let mut res = vec![self.const_def()?];
        while self.try_get(TokenKind::Comma) {
            res.push(self.const_def()?);
        }
        self.expect(TokenKind::Semi)?;
        Ok(res)
    }

    fn const_def(&mut self) -> PResult<DeclRef> {
        let ident = self.expect_tok(TokenKind::Ident)?;
        let mut decl = Decl::new(id(ident.text), true);
        decl.has_init = true;
        while self.try_get(TokenKind::LBrk) {
            decl.dims.push(self.const_exp()?);
            self.expect(TokenKind::RBrk)?;
        }
        self.expect_tok(TokenKind::Assign)?;
        let mut init = Vec::new();
        self.init_val(&mut init)?;
        decl.init = init;

        let d = self.prog.add_decl(decl);
        Self::eval_init(&mut self.prog.decls, d);
        self.insert_symbol(id(ident.text), Symbol::Var(d), ident);
        Ok(d)
    }

    fn var_decl(&mut self) -> PResult<Vec<DeclRef>> {
        self.expect_tok(TokenKind::Int)?;
        let mut res = vec![self.var_def()?];
        while self.try_get(TokenKind::Comma) {
            res.push(self.var_def()?);
        }
        self.expect(TokenKind::Semi)?;
        Ok(res)
    }

    fn var_def(&mut self) -> PResult<DeclRef> {
        let ident = self.expect_tok(TokenKind::Ident)?;
        let mut decl = Decl::new(id(ident.text), false);
        while self.try_get(TokenKind::LBrk) {
            decl.dims.push(self.const_exp()?);
            self.expect(TokenKind::RBrk)?;
        }
        if self.try_get(TokenKind::Assign) {
            decl.has_init = true;
            let mut init = Vec::new();
            self.init_val(&mut init)?;
            decl.init = init;
        }
        let d = self.prog.add_decl(decl);
        self.insert_symbol(id(ident.text), Symbol::Var(d), ident);
        Ok(d)
    }

    /// Initializer values; brace nests are flattened in source order.
    fn init_val(&mut self, res: &mut Vec<Expr>) -> PResult<()> {
        if self.try_get(TokenKind::LBrc) {
            if !self.try_get(TokenKind::RBrc) {
                loop {
                    self.init_val(res)?;
                    if !self.try_get(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect_tok(TokenKind::RBrc)?;
            }
        } else {
            let e = self.exp()?;
            res.push(e);
        }
        Ok(())
    }

    fn func_def(&mut self) -> PResult<Func> {
        let returns_int = self.func_type()?;
        self.cur_returns_int = returns_int;
        let ident = self.expect_tok(TokenKind::Ident)?;
        let name = id(ident.text);
        self.expect_tok(TokenKind::LPar)?;

        let mut params = Vec::new();
        if !self.try_get(TokenKind::RPar) {
            if self.at(TokenKind::LBrc) {
                self.reporter
                    .push(ErrorKind::MissingRPar, self.prev_line());
            } else {
                self.formal_params(&mut params)?;
                self.expect(TokenKind::RPar)?;
            }
        }

        let fid = FuncId(self.prog.funcs.len() as u32);
        self.insert_symbol(name, Symbol::Func(fid), ident); // for recursion

        log::debug!("entering func {}", name);
        self.syms.push();
        for &(d, line) in &params {
            let pname = self.prog.decl(d).name;
            if !self.syms.insert(pname, Symbol::Var(d)) {
                self.reporter.push(ErrorKind::Redefined, line);
            }
        }
        let body = self.block(false)?;
        self.syms.pop();
        log::debug!("exiting func {}", name);

        if returns_int && !matches!(body.last(), Some(Stmt::Return(_))) {
            self.reporter
                .push(ErrorKind::MissingReturn, self.prev_line());
        }

        Ok(Func {
            name,
            returns_int,
            params: params.into_iter().map(|(d, _)| d).collect(),
            body,
        })
    }

    fn main_func_def(&mut self) -> PResult<Func> {
        self.cur_returns_int = true;
        self.expect_tok(TokenKind::Int)?;
        self.expect_tok(TokenKind::Main)?;
        self.expect_tok(TokenKind::LPar)?;
        self.expect(TokenKind::RPar)?;
        let body = self.block(true)?;
        if !matches!(body.last(), Some(Stmt::Return(_))) {
            self.reporter
                .push(ErrorKind::MissingReturn, self.prev_line());
        }
        Ok(Func {
            name: id("main"),
            returns_int: true,
            params: Vec::new(),
            body,
        })
    }

    fn func_type(&mut self) -> PResult<bool> {
        if self.try_get(TokenKind::Int) {
            return Ok(true);
        }
        self.expect_tok(TokenKind::Void)?;
        Ok(false)
    }

    fn formal_params(&mut self, res: &mut Vec<(DeclRef, u32)>) -> PResult<()> {
        loop {
            res.push(self.formal_param()?);
            if !self.try_get(TokenKind::Comma) {
                break;
            }
        }
        Ok(())
    }

    fn formal_param(&mut self) -> PResult<(DeclRef, u32)> {
        self.expect_tok(TokenKind::Int)?;
        let ident = self.expect_tok(TokenKind::Ident)?;
        let mut decl = Decl::new(id(ident.text), false);
        if self.try_get(TokenKind::LBrk) {
            decl.dims.push(-1);
            self.expect(TokenKind::RBrk)?;
            while self.try_get(TokenKind::LBrk) {
                decl.dims.push(self.const_exp()?);
                self.expect(TokenKind::RBrk)?;
            }
        }
        Ok((self.prog.add_decl(decl), ident.line))
    }

    fn block(&mut self, push_scope: bool) -> PResult<Vec<Stmt>> {
        self.expect_tok(TokenKind::LBrc)?;
        if push_scope {
            self.syms.push();
        }
        let mut stmts = Vec::new();
        while !self.try_get(TokenKind::RBrc) {
            stmts.push(self.block_item()?);
        }
        if push_scope {
            self.syms.pop();
        }
        Ok(stmts)
    }

    fn block_item(&mut self) -> PResult<Stmt> {
        if self.at(TokenKind::Const) {
            return Ok(Stmt::Decl(self.const_decl()?));
        }
        if self.at(TokenKind::Int) {
            return Ok(Stmt::Decl(self.var_decl()?));
        }
        self.statement()
    }

    fn statement(&mut self) -> PResult<Stmt> {
        let tk = self.peek()?;
        match tk.kind {
            TokenKind::If => {
                self.bump();
                self.expect_tok(TokenKind::LPar)?;
                let cond = self.cond()?;
                self.expect(TokenKind::RPar)?;
                let then_body = Box::new(self.statement()?);
                let else_body = if self.try_get(TokenKind::Else) {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then_body,
                    else_body,
                })
            }

            TokenKind::While => {
                self.bump();
                self.expect_tok(TokenKind::LPar)?;
                let cond = self.cond()?;
                self.expect(TokenKind::RPar)?;
                self.while_depth += 1;
                let body = self.statement();
                self.while_depth -= 1;
                Ok(Stmt::While {
                    cond,
                    body: Box::new(body?),
                })
            }

            TokenKind::Break => {
                if self.while_depth == 0 {
                    self.reporter.push(ErrorKind::BreakOutsideLoop, tk.line);
                }
                self.bump();
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Break)
            }

            TokenKind::Continue => {
                if self.while_depth == 0 {
                    self.reporter.push(ErrorKind::BreakOutsideLoop, tk.line);
                }
                self.bump();
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Continue)
            }

            TokenKind::Return => {
                self.bump();
                let mut val = None;
                if !self.at(TokenKind::Semi) {
                    let cp = self.checkpoint();
                    let attempt = self.exp().and_then(|e| {
                        if self.at(TokenKind::Assign) {
                            Err(Abort)
                        } else {
                            Ok(e)
                        }
                    });
                    match attempt {
                        Ok(e) => {
                            self.resolve();
                            if !self.cur_returns_int {
                                self.reporter.push(ErrorKind::ReturnValueInVoid, tk.line);
                            }
                            val = Some(e);
                        }
                        Err(Abort) => self.reject(cp),
                    }
                }
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Return(val))
            }

            TokenKind::Printf => {
                self.bump();
                self.expect_tok(TokenKind::LPar)?;
                let fmt = self.expect_tok(TokenKind::Str)?;
                let mut args = Vec::new();
                while self.try_get(TokenKind::Comma) {
                    args.push(self.exp()?);
                }
                self.check_format(fmt, args.len(), tk.line);
                self.expect(TokenKind::RPar)?;
                let idx = self.prog.printfs.len() as u32;
                self.prog
                    .printfs
                    .push(fmt.text[1..fmt.text.len() - 1].to_owned());
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Printf { fmt: idx, args })
            }

            TokenKind::LBrc => Ok(Stmt::Block(self.block(true)?)),

            TokenKind::Semi => {
                self.bump();
                Ok(Stmt::Empty)
            }

            TokenKind::Ident if self.assign_ahead() => {
                let cp = self.checkpoint();
                match self.assign_stmt() {
                    Ok(stmt) => {
                        self.resolve();
                        self.expect(TokenKind::Semi)?;
                        Ok(stmt)
                    }
                    Err(Abort) => {
                        self.reject(cp);
                        let stmt = Stmt::Expr(self.exp()?);
                        self.expect(TokenKind::Semi)?;
                        Ok(stmt)
                    }
                }
            }

            _ => {
                let stmt = Stmt::Expr(self.exp()?);
                self.expect(TokenKind::Semi)?;
                Ok(stmt)
            }
        }
    }

    /// Is there an `=` before the next `;`? Decides assignment vs
    /// expression statement for identifier-led statements.
    fn assign_ahead(&self) -> bool {
        for t in &self.toks[self.pos..] {
            if t.is_a(TokenKind::Semi) {
                return false;
            }
            if t.is_a(TokenKind::Assign) {
                return true;
            }
        }
        false
    }

    fn assign_stmt(&mut self) -> PResult<Stmt> {
        let lhs = self.lvalue_non_const()?;
        self.expect_tok(TokenKind::Assign)?;
        if self.try_get(TokenKind::GetInt) {
            self.expect_tok(TokenKind::LPar)?;
            self.expect(TokenKind::RPar)?;
            Ok(Stmt::GetInt { lhs })
        } else {
            Ok(Stmt::Assign {
                lhs,
                rhs: self.exp()?,
            })
        }
    }

    fn check_format(&mut self, fmt: Token, arg_count: usize, line: u32) {
        let inner = fmt.text[1..fmt.text.len() - 1].as_bytes();
        for (i, &c) in inner.iter().enumerate() {
            let next = inner.get(i + 1).copied();
            let normal = (c == 32 || c == 33 || (40..=126).contains(&c))
                && (c != b'\\' || next == Some(b'n'));
            let conv = c == b'%' && next == Some(b'd');
            if !(normal || conv) {
                self.reporter.push(ErrorKind::IllegalFormatChar, fmt.line);
                break;
            }
        }
        let conversions = inner.windows(2).filter(|w| w == b"%d").count();
        if conversions != arg_count {
            self.reporter.push(ErrorKind::PrintfArgMismatch, line);
        }
    }

    fn exp(&mut self) -> PResult<Expr> {
        self.bin_exp(LEVEL_ADD)
    }

    fn cond(&mut self) -> PResult<Expr> {
        self.bin_exp(LEVEL_OR)
    }

    fn bin_exp(&mut self, lvl: u8) -> PResult<Expr> {
        if lvl == 0 {
            return self.unary_exp();
        }
        let mut lhs = self.bin_exp(lvl - 1)?;
        while let Some(t) = self.toks.get(self.pos) {
            if level(t.kind) != lvl {
                break;
            }
            let op = bin_op(t.kind);
            self.bump();
            let rhs = self.bin_exp(lvl - 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary_exp(&mut self) -> PResult<Expr> {
        let tk = self.peek()?;
        match tk.kind {
            TokenKind::Add => {
                self.bump();
                self.unary_exp()
            }
            TokenKind::Sub => {
                self.bump();
                Ok(Expr::Binary {
                    op: BinOp::Sub,
                    lhs: Box::new(Expr::Num(0)),
                    rhs: Box::new(self.unary_exp()?),
                })
            }
            TokenKind::Not => {
                self.bump();
                Ok(Expr::Binary {
                    op: BinOp::Eq,
                    lhs: Box::new(self.unary_exp()?),
                    rhs: Box::new(Expr::Num(0)),
                })
            }
            TokenKind::Ident if self.at_nth(1, TokenKind::LPar) => self.call_exp(tk),
            _ => self.primary_exp(),
        }
    }

    fn call_exp(&mut self, ident: Token<'src>) -> PResult<Expr> {
        self.bump();
        self.expect_tok(TokenKind::LPar)?;
        let func = self.find_func(ident);
        let mut args = Vec::new();
        if !self.try_get(TokenKind::RPar) {
            let cp = self.checkpoint();
            let attempt = (|| -> PResult<Vec<Expr>> {
                let mut args = Vec::new();
                loop {
                    args.push(self.exp()?);
                    if !self.try_get(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RPar)?;
                Ok(args)
            })();
            match attempt {
                Ok(a) => {
                    self.resolve();
                    args = a;
                }
                Err(Abort) => {
                    self.reject(cp);
                    self.reporter
                        .push(ErrorKind::MissingRPar, self.prev_line());
                }
            }
        }
        if let Some(f) = func {
            self.check_args(f, &args, ident.line);
            Ok(Expr::Call { func: f, args })
        } else {
            Ok(Expr::Call {
                func: FuncId(u32::MAX),
                args,
            })
        }
    }

    fn check_args(&mut self, f: FuncId, args: &[Expr], line: u32) {
        // The callee is already parsed (or is the current function in a
        // recursive call whose signature is complete by now).
        let params: Vec<Vec<i32>> = match self.prog.funcs.get(f.index()) {
            Some(func) => func
                .params
                .iter()
                .map(|&p| self.prog.decl(p).dims.clone())
                .collect(),
            None => {
                // Recursive call: the parameter decls are in the arena even
                // though the Func itself is not pushed yet. Skip checking.
                return;
            }
        };
        if params.len() != args.len() {
            self.reporter.push(ErrorKind::ArgCountMismatch, line);
            return;
        }
        for (arg, par_dims) in args.iter().zip(&params) {
            let ok = match arg {
                Expr::LVal(lv) => {
                    let var = self.prog.decl(lv.var);
                    let arg_rank = var.dims.len().saturating_sub(lv.idx.len());
                    arg_rank == par_dims.len()
                        && (par_dims.len() < 2 || par_dims[1] == var.dims[1])
                }
                Expr::Call { func, .. } => {
                    par_dims.is_empty()
                        && self
                            .prog
                            .funcs
                            .get(func.index())
                            .map_or(true, |g| g.returns_int)
                }
                _ => par_dims.is_empty(),
            };
            if !ok {
                self.reporter.push(ErrorKind::ArgTypeMismatch, line);
                return;
            }
        }
    }

    fn primary_exp(&mut self) -> PResult<Expr> {
        let tk = self.peek()?;
        if tk.is_a(TokenKind::LPar) {
            self.bump();
            let e = self.exp()?;
            self.expect(TokenKind::RPar)?;
            return Ok(e);
        }
        if tk.is_a(TokenKind::Num) {
            self.bump();
            let val = tk
                .text
                .parse::<i64>()
                .expect("integer literal out of range") as i32;
            return Ok(Expr::Num(val));
        }
        Ok(Expr::LVal(self.lvalue()?))
    }

    fn lvalue(&mut self) -> PResult<LVal> {
        let ident = self.expect_tok(TokenKind::Ident)?;
        let var = self.find_var(ident);
        let mut idx = Vec::new();
        while self.try_get(TokenKind::LBrk) {
            idx.push(self.exp()?);
            self.expect(TokenKind::RBrk)?;
        }
        Ok(LVal { var, idx })
    }

    fn lvalue_non_const(&mut self) -> PResult<LVal> {
        let ident = self.expect_tok(TokenKind::Ident)?;
        let var = self.find_var(ident);
        if self.prog.decl(var).is_const {
            self.reporter.push(ErrorKind::AssignToConst, ident.line);
        }
        let mut idx = Vec::new();
        while self.try_get(TokenKind::LBrk) {
            idx.push(self.exp()?);
            self.expect(TokenKind::RBrk)?;
        }
        Ok(LVal { var, idx })
    }

    fn const_exp(&mut self) -> PResult<i32> {
        let e = self.bin_exp(LEVEL_ADD)?;
        Ok(eval(&self.prog.decls, &e))
    }
}

/// Parse a token stream into a program.
///
/// Lettered diagnostics go into `reporter`. Returns `None` only when the
/// input is malformed beyond the lettered recovery set; the caller decides
/// whether the collected diagnostics suppress code generation.
pub fn parse<'src>(toks: &[Token<'src>], reporter: &mut Reporter) -> Option<Program> {
    let mut parser = Parser::new(toks, reporter);
    match parser.comp_unit() {
        Ok(()) => Some(parser.prog),
        Err(Abort) => panic!("syntax error near line {}", parser.prev_line()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::lex::lex;

    fn parse_ok(src: &str) -> Program {
        let toks = lex(src);
        let mut r = Reporter::default();
        let prog = parse(&toks, &mut r).unwrap();
        assert!(!r.has_errors(), "unexpected errors: {}", r);
        prog
    }

    #[test]
    fn simple_main() {
        let prog = parse_ok("int main() { return 0; }");
        assert_eq!(prog.funcs.len(), 1);
        assert_eq!(prog.funcs[0].name.as_str(), "main");
        assert!(matches!(prog.funcs[0].body[0], Stmt::Return(Some(_))));
    }

    #[test]
    fn globals_are_evaluated() {
        let prog = parse_ok(
            "const int N = 4;\nint a[N] = {1, 2, 3, N};\nint main() { return a[0]; }",
        );
        assert_eq!(prog.globals.len(), 2);
        let a = prog.decl(prog.globals[1]);
        assert_eq!(a.dims, vec![4]);
        assert_eq!(a.words, vec![1, 2, 3, 4]);
    }

    #[test]
    fn precedence() {
        let prog = parse_ok("int main() { int x; x = 1 + 2 * 3; return x; }");
        let Stmt::Assign { rhs, .. } = &prog.funcs[0].body[1] else {
            panic!("expected assignment");
        };
        let Expr::Binary { op: BinOp::Add, rhs: mul, .. } = rhs else {
            panic!("expected + at the top");
        };
        assert!(matches!(**mul, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn missing_semi_reported() {
        let toks = lex("int main() { int x; x = 1\n return x; }");
        let mut r = Reporter::default();
        let _ = parse(&toks, &mut r);
        assert!(r.has_errors());
        assert_eq!(r.to_string().trim(), "1 i");
    }

    #[test]
    fn break_outside_loop() {
        let toks = lex("int main() { break; return 0; }");
        let mut r = Reporter::default();
        let _ = parse(&toks, &mut r);
        assert_eq!(r.to_string().trim(), "1 m");
    }
}
