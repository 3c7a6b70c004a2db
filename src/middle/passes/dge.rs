//! Dead-global elimination and privatization.
//!
//! A scalar global used by exactly one function that runs at most once per
//! program can live in that function's frame instead: it becomes an alloca
//! initialized with the global's initializer value, and mem2reg promotes it
//! from there. Globals with no users at all are dropped outright.

use crate::common::{Map, Set};
use crate::front::ast::DeclRef;
use crate::middle::analysis::build_once_blocks;
use crate::middle::ir::{FuncRef, InstKind, Program, Value};

/// Per-callee record of how many call sites exist program-wide.
enum CallSites {
    None,
    One(Value),
    Many,
}

/// Compute `is_once` for every user function: `main` runs once, and a
/// function whose unique call site sits in an at-most-once block of an
/// at-most-once caller runs at most once itself.
fn build_once(prog: &mut Program) {
    let user_funcs = prog.user_funcs.clone();
    let mut main = None;
    for &f in &user_funcs {
        let is_main = main.is_none() && prog.func(f).name.as_str() == "main";
        prog.func_mut(f).is_once = is_main;
        if is_main {
            main = Some(f);
        }
        build_once_blocks(prog, f);
    }
    let main = main.expect("a program always has a main function");

    let mut sites: Map<FuncRef, CallSites> = user_funcs
        .iter()
        .map(|&f| (f, CallSites::None))
        .collect();
    for &f in &user_funcs {
        for bb in prog.func(f).blocks.clone() {
            for i in prog.insts_of(bb) {
                if let InstKind::Call { func: callee, .. } = prog.inst(i).kind {
                    if let Some(s) = sites.get_mut(&callee) {
                        *s = match s {
                            CallSites::None => CallSites::One(i),
                            _ => CallSites::Many,
                        };
                    }
                }
            }
        }
    }

    // once_callees[f] = callees whose unique call site is in an
    // at-most-once block of f.
    let mut once_callees: Map<FuncRef, Vec<FuncRef>> = Map::new();
    for (&callee, s) in &sites {
        match s {
            CallSites::One(call) => {
                let bb = prog.inst(*call).bb;
                if prog.block(bb).is_once {
                    once_callees
                        .entry(prog.block(bb).func)
                        .or_default()
                        .push(callee);
                }
            }
            CallSites::None => {
                if !prog.func(callee).is_once {
                    prog.func_mut(callee).is_unused = true;
                }
            }
            CallSites::Many => {}
        }
    }

    let mut wl = vec![main];
    while let Some(f) = wl.pop() {
        log::info!("dge: once func {}", prog.func(f).name);
        if let Some(callees) = once_callees.get(&f) {
            for &g in callees.clone().iter() {
                if !prog.func(g).is_once {
                    prog.func_mut(g).is_once = true;
                    wl.push(g);
                }
            }
        }
    }
}

/// Try to privatize or drop one global. Returns true when the global is no
/// longer needed in the data segment.
fn try_elim(prog: &mut Program, d: DeclRef) -> bool {
    if !prog.decl(d).dims.is_empty() {
        return false;
    }
    let g = *prog
        .global_value
        .get(&d)
        .expect("every global has an address value");

    let mut user: Option<FuncRef> = None;
    for u in prog.uses_of(g) {
        let i = prog.use_data(u).user;
        let f = prog.block(prog.inst(i).bb).func;
        match user {
            None => user = Some(f),
            Some(prev) if prev != f => return false,
            _ => {}
        }
    }

    let Some(user) = user else {
        log::info!("dge: elim {} with no user", prog.decl(d).name);
        return true;
    };
    if !prog.func(user).is_once {
        return false;
    }

    let entry = prog.func(user).entry();
    let init = prog.decl(d).words.first().copied().unwrap_or(0);
    let alloca = prog.new_alloca(d);
    let zero = prog.const_of(0);
    let init = prog.const_of(init);
    let store = prog.new_store(d, alloca, zero, init);
    prog.push_front_inst(entry, store);
    prog.push_front_inst(entry, alloca);
    prog.replace_uses(g, alloca);
    log::info!(
        "dge: move {} into {}",
        prog.decl(d).name,
        prog.func(user).name
    );
    true
}

pub fn dge(prog: &mut Program) -> bool {
    build_once(prog);
    let mut eliminated = Set::new();
    for d in prog.globals.clone() {
        if try_elim(prog, d) {
            eliminated.insert(d);
        }
    }
    prog.globals.retain(|d| !eliminated.contains(d));
    !eliminated.is_empty()
}
