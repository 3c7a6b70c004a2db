//! Call-graph construction and purity analysis.
//!
//! A function is pure when it neither stores to caller-visible memory, nor
//! reads globals or array parameters, nor calls anything impure; only pure
//! calls take part in value numbering and code motion.

use crate::middle::ir::{FuncRef, InstKind, Program, ValueData};

pub fn cg(prog: &mut Program) {
    for &f in &prog.user_funcs.clone() {
        let func = prog.func_mut(f);
        func.callers.clear();
        func.used_callers.clear();
        func.has_side_effects = false;
        func.has_global_loads = false;
        func.has_param_loads = false;
    }

    for &f in &prog.user_funcs.clone() {
        for bb in prog.func(f).blocks.clone() {
            for i in prog.insts_of(bb) {
                match prog.inst(i).kind {
                    InstKind::Call { func: callee, .. } => {
                        prog.func_mut(callee).callers.insert(f);
                        if prog.func(callee).has_side_effects {
                            prog.func_mut(f).has_side_effects = true;
                        }
                        if prog.has_uses(i) {
                            prog.func_mut(callee).used_callers.insert(f);
                        }
                    }
                    InstKind::Store { var, .. } => {
                        let d = prog.decl(var);
                        if d.is_global || d.dims.first().copied() == Some(-1) {
                            prog.func_mut(f).has_side_effects = true;
                        }
                    }
                    InstKind::Load { var, base, .. } => {
                        let d = prog.decl(var);
                        if d.is_global {
                            if !d.is_const {
                                prog.func_mut(f).has_global_loads = true;
                            }
                        } else if matches!(
                            prog.val(prog.used(base)).data,
                            ValueData::Arg { .. }
                        ) {
                            prog.func_mut(f).has_param_loads = true;
                        }
                    }
                    InstKind::Gep { base, .. } => {
                        if matches!(prog.val(prog.used(base)).data, ValueData::Arg { .. }) {
                            prog.func_mut(f).has_param_loads = true;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    propagate(prog, |func| func.has_side_effects, |func| &func.callers, |func| {
        func.has_side_effects = true;
    });
    propagate(
        prog,
        |func| func.has_global_loads,
        |func| &func.used_callers,
        |func| {
            func.has_global_loads = true;
        },
    );

    for &f in &prog.user_funcs.clone() {
        let func = prog.func_mut(f);
        func.is_pure =
            !(func.has_side_effects || func.has_global_loads || func.has_param_loads);
        if func.is_pure {
            log::info!("{} is pure", func.name);
        }
    }
}

fn propagate(
    prog: &mut Program,
    has: impl Fn(&crate::middle::ir::FuncData) -> bool,
    edges: impl Fn(&crate::middle::ir::FuncData) -> &crate::common::Set<FuncRef>,
    set: impl Fn(&mut crate::middle::ir::FuncData),
) {
    let mut wl: Vec<FuncRef> = prog
        .user_funcs
        .iter()
        .copied()
        .filter(|&f| has(prog.func(f)))
        .collect();
    while let Some(u) = wl.pop() {
        for v in edges(prog.func(u)).clone() {
            if !has(prog.func(v)) {
                set(prog.func_mut(v));
                wl.push(v);
            }
        }
    }
}
