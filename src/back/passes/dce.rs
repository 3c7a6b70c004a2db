//! Machine-level dead code elimination: a backward walk per block deleting
//! pure definitions of virtual registers that are dead at that point.

use crate::back::passes::liveness::build_liveness;
use crate::back::mir::Func;

pub fn dce(f: &mut Func) {
    build_liveness(f);
    for bb in f.blocks.clone() {
        let mut live = f.block(bb).live_out.clone();
        for i in f.insts_of(bb).into_iter().rev() {
            let (def, use_) = f.def_use(i);
            if def.len() == 1
                && def[0].is_virtual()
                && !live.contains(&def[0])
                && f.inst(i).is_pure()
            {
                log::trace!("machine dce erasing {}", i);
                f.remove(i);
                continue;
            }
            for d in def {
                live.remove(&d);
            }
            for u in use_ {
                live.insert(u);
            }
        }
    }
}
