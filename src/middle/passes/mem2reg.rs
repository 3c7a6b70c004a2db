//! Promotion of scalar allocas to SSA values (Cytron et al.):
//! phi placement on the iterated dominance frontier of the defining blocks,
//! then a renaming walk over the CFG with one value stack per alloca.

use crate::middle::analysis::build_df;
use crate::middle::ir::{Block, FuncRef, InstKind, Program, Value, ValueData};

pub fn mem2reg(prog: &mut Program, f: FuncRef) {
    build_df(prog, f);
    let blocks = prog.func(f).blocks.clone();

    // Promotable allocas are the scalar ones.
    let mut allocas: Vec<Value> = Vec::new();
    for &bb in &blocks {
        for i in prog.insts_of(bb) {
            if let InstKind::Alloca { var } = prog.inst(i).kind {
                if prog.decl(var).dims.is_empty() {
                    prog.inst_mut(i).aid = allocas.len() as i32;
                    log::info!(
                        "found promotable alloca {} for {}",
                        allocas.len(),
                        prog.decl(var).name
                    );
                    allocas.push(i);
                } else {
                    prog.inst_mut(i).aid = -1;
                }
            }
        }
    }
    let n = allocas.len();

    /// The promotable-alloca slot a load/store goes through, if any.
    fn alloca_slot(prog: &Program, base: crate::middle::ir::UseRef) -> Option<usize> {
        let b = prog.used(base);
        if let ValueData::Inst(inst) = &prog.val(b).data {
            if matches!(inst.kind, InstKind::Alloca { .. }) && inst.aid >= 0 {
                return Some(inst.aid as usize);
            }
        }
        None
    }

    // Defining blocks per alloca. Duplicates are fine; placement tests the
    // block `vis` flags.
    let mut def_bbs: Vec<Vec<Block>> = vec![Vec::new(); n];
    for &bb in &blocks {
        for i in prog.insts_of(bb) {
            if let InstKind::Store { base, .. } = prog.inst(i).kind {
                if let Some(a) = alloca_slot(prog, base) {
                    def_bbs[a].push(bb);
                    log::trace!("found def {} for alloca {}", bb, a);
                }
            }
        }
    }

    // Phi placement on the iterated dominance frontier.
    for (a, defs) in def_bbs.iter().enumerate() {
        for &bb in &blocks {
            prog.block_mut(bb).vis = false;
        }
        let mut wl: Vec<Block> = defs.clone();
        while let Some(u) = wl.pop() {
            for v in prog.block(u).df.clone() {
                if !prog.block(v).vis {
                    log::trace!("alloca {}: phi at {} (df of {})", a, v, u);
                    prog.block_mut(v).vis = true;
                    let phi = prog.new_phi();
                    prog.inst_mut(phi).aid = a as i32;
                    prog.push_front_inst(v, phi);
                    wl.push(v);
                }
            }
        }
    }

    // Renaming walk.
    for &bb in &blocks {
        prog.block_mut(bb).vis = false;
    }
    let entry = prog.func(f).entry();
    prog.block_mut(entry).vis = true;
    let undef = prog.undef;
    let mut wl: Vec<(Block, Vec<Value>)> = vec![(entry, vec![undef; n])];
    while let Some((bb, mut vals)) = wl.pop() {
        for i in prog.insts_of(bb) {
            match prog.inst(i).kind {
                InstKind::Alloca { .. } => {
                    if prog.inst(i).aid >= 0 {
                        prog.unlink_inst(i);
                    }
                }
                InstKind::Load { base, .. } => {
                    if let Some(a) = alloca_slot(prog, base) {
                        prog.erase_with(i, vals[a]);
                    }
                }
                InstKind::Store { base, val, .. } => {
                    if let Some(a) = alloca_slot(prog, base) {
                        vals[a] = prog.used(val);
                        prog.erase_inst(i);
                    }
                }
                InstKind::Phi { .. } => {
                    if prog.inst(i).aid >= 0 {
                        vals[prog.inst(i).aid as usize] = i;
                    }
                }
                _ => {}
            }
        }
        for v in prog.succs(bb) {
            for i in prog.insts_of(v) {
                match prog.inst(i).kind {
                    InstKind::Phi { .. } => {
                        let aid = prog.inst(i).aid;
                        if aid >= 0 {
                            let val = vals[aid as usize];
                            prog.phi_push(i, val, bb);
                        }
                    }
                    _ => break,
                }
            }
            if !prog.block(v).vis {
                prog.block_mut(v).vis = true;
                wl.push((v, vals.clone()));
            }
        }
    }

    for a in allocas {
        prog.erase_inst(a);
    }

    log::info!("{}: mem2reg done", prog.func(f).name);
}
