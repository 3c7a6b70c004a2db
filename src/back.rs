//! The back-end of the compiler: machine IR, lowering, machine passes and
//! assembly emission.

pub mod build;
pub mod emit;
pub mod magic;
pub mod mir;
pub mod passes;

pub use mir::Prog;

use passes::{bb_normalize, dce, move_coalesce, reg_alloc, reg_restore};

/// Run the machine pipeline over every function.
pub fn run_mips_passes(prog: &mut Prog) {
    for f in &mut prog.funcs {
        bb_normalize(f);
        move_coalesce(f);
        dce(f);
        reg_alloc(f);
        reg_restore(f);
        move_coalesce(f);
    }
}
